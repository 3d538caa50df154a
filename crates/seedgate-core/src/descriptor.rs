//! Immutable description of a torrent's logical layout.

use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::hash::{InfoHash, PieceHash};
use crate::metainfo;

/// One file within the torrent payload.
///
/// `path` is the display path: the torrent name for single-file torrents,
/// `<name>/<components...>` for multi-file ones. Concatenating all files in
/// order yields the torrent's logical data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpec {
    /// UTF-8 display path, unique within the torrent.
    pub path: String,
    /// Declared length in bytes; zero-length files are legal.
    pub length: u64,
    /// Byte offset of the file within the concatenated payload.
    pub offset: u64,
}

/// Byte extent of a piece within the concatenated payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceExtent {
    /// Offset of the piece's first byte.
    pub offset: u64,
    /// Piece length; the final piece may be short.
    pub length: u64,
}

/// Immutable-once-loaded torrent metadata.
#[derive(Debug, Clone)]
pub struct TorrentDescriptor {
    info_hash: InfoHash,
    name: String,
    piece_length: u64,
    pieces: Vec<PieceHash>,
    files: Vec<FileSpec>,
    total_length: u64,
    metainfo: Bytes,
}

impl TorrentDescriptor {
    /// Parse a bencoded metainfo document.
    ///
    /// The raw bytes are retained so `source.torrent` downloads and snapshot
    /// uploads stay byte-identical to what the supplier provided.
    pub fn from_metainfo(data: impl Into<Bytes>) -> Result<Arc<Self>> {
        let data = data.into();
        let info_hash = metainfo::info_hash(&data)?;
        let meta = metainfo::parse(&data)?;

        let name = meta.info.name;
        let piece_length = u64::try_from(meta.info.piece_length)
            .ok()
            .filter(|&len| len > 0)
            .ok_or_else(|| Error::integrity("piece length must be positive"))?;

        let mut files = Vec::new();
        let mut offset = 0u64;
        match meta.info.files {
            Some(raw_files) => {
                for raw in raw_files {
                    let length = u64::try_from(raw.length)
                        .map_err(|_| Error::integrity("negative file length"))?;
                    let mut path = name.clone();
                    for component in &raw.path {
                        path.push('/');
                        path.push_str(component);
                    }
                    files.push(FileSpec {
                        path,
                        length,
                        offset,
                    });
                    offset += length;
                }
            }
            None => {
                let length = meta
                    .info
                    .length
                    .and_then(|len| u64::try_from(len).ok())
                    .ok_or_else(|| Error::integrity("single-file torrent without length"))?;
                files.push(FileSpec {
                    path: name.clone(),
                    length,
                    offset: 0,
                });
                offset = length;
            }
        }
        let total_length = offset;

        if meta.info.pieces.len() % 20 != 0 {
            return Err(Error::integrity("pieces blob is not a multiple of 20"));
        }
        let pieces: Vec<PieceHash> = meta
            .info
            .pieces
            .chunks_exact(20)
            .map(|chunk| {
                let mut raw = [0u8; 20];
                raw.copy_from_slice(chunk);
                PieceHash::new(raw)
            })
            .collect();

        let expected = usize::try_from(total_length.div_ceil(piece_length))
            .map_err(|_| Error::integrity("torrent too large for this platform"))?;
        if pieces.len() != expected {
            return Err(Error::integrity(format!(
                "piece count {} does not cover {} bytes with piece length {}",
                pieces.len(),
                total_length,
                piece_length
            )));
        }

        Ok(Arc::new(Self {
            info_hash,
            name,
            piece_length,
            pieces,
            files,
            total_length,
            metainfo: data,
        }))
    }

    /// The torrent's info-hash.
    #[must_use]
    pub const fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    /// Display name from the info dictionary.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Nominal piece length.
    #[must_use]
    pub const fn piece_length(&self) -> u64 {
        self.piece_length
    }

    /// Number of pieces.
    #[must_use]
    pub fn num_pieces(&self) -> u32 {
        u32::try_from(self.pieces.len()).unwrap_or(u32::MAX)
    }

    /// Total payload length in bytes.
    #[must_use]
    pub const fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Ordered file listing.
    #[must_use]
    pub fn files(&self) -> &[FileSpec] {
        &self.files
    }

    /// The raw bencoded metainfo this descriptor was parsed from.
    #[must_use]
    pub fn metainfo_bytes(&self) -> Bytes {
        self.metainfo.clone()
    }

    /// Declared SHA-1 of piece `index`.
    #[must_use]
    pub fn piece_hash(&self, index: u32) -> Option<&PieceHash> {
        self.pieces.get(index as usize)
    }

    /// Byte extent of piece `index` within the concatenated payload.
    #[must_use]
    pub fn piece_extent(&self, index: u32) -> Option<PieceExtent> {
        if u64::from(index) >= u64::try_from(self.pieces.len()).unwrap_or(0) {
            return None;
        }
        let offset = u64::from(index) * self.piece_length;
        let length = self.piece_length.min(self.total_length - offset);
        Some(PieceExtent { offset, length })
    }

    /// Find a file by display path.
    #[must_use]
    pub fn file_index(&self, path: &str) -> Option<usize> {
        self.files.iter().position(|file| file.path == path)
    }

    /// Half-open range of piece indexes intersecting any byte of the file.
    ///
    /// Zero-length files intersect no pieces and return an empty range, so
    /// they count as complete immediately.
    #[must_use]
    pub fn file_piece_range(&self, file_index: usize) -> Range<u32> {
        let Some(file) = self.files.get(file_index) else {
            return 0..0;
        };
        if file.length == 0 {
            let start = u32::try_from(file.offset / self.piece_length).unwrap_or(u32::MAX);
            return start..start;
        }
        let first = u32::try_from(file.offset / self.piece_length).unwrap_or(u32::MAX);
        let last =
            u32::try_from((file.offset + file.length).div_ceil(self.piece_length)).unwrap_or(0);
        first..last.min(self.num_pieces())
    }

    /// Indexes of the files a piece covers, in payload order.
    #[must_use]
    pub fn files_for_piece(&self, index: u32) -> Vec<usize> {
        let Some(extent) = self.piece_extent(index) else {
            return Vec::new();
        };
        let piece_end = extent.offset + extent.length;
        self.files
            .iter()
            .enumerate()
            .filter(|(_, file)| {
                file.length > 0
                    && file.offset < piece_end
                    && file.offset + file.length > extent.offset
            })
            .map(|(i, _)| i)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn multi_file_metainfo() -> Vec<u8> {
        // Two files of 24 and 40 bytes over 16-byte pieces: 4 pieces total,
        // piece 1 spans both files.
        let mut doc = Vec::new();
        doc.extend_from_slice(b"d4:infod5:filesl");
        doc.extend_from_slice(b"d6:lengthi24e4:pathl5:a.binee");
        doc.extend_from_slice(b"d6:lengthi40e4:pathl3:sub5:b.binee");
        doc.extend_from_slice(b"e4:name4:demo12:piece lengthi16e6:pieces80:");
        doc.extend_from_slice(&[0x11; 80]);
        doc.extend_from_slice(b"ee");
        doc
    }

    #[test]
    fn parses_multi_file_layout() {
        let descriptor = TorrentDescriptor::from_metainfo(multi_file_metainfo()).expect("parse");
        assert_eq!(descriptor.name(), "demo");
        assert_eq!(descriptor.total_length(), 64);
        assert_eq!(descriptor.num_pieces(), 4);
        let files = descriptor.files();
        assert_eq!(files[0].path, "demo/a.bin");
        assert_eq!(files[1].path, "demo/sub/b.bin");
        assert_eq!(files[1].offset, 24);
    }

    #[test]
    fn piece_extents_split_on_the_last_piece() {
        let mut doc = Vec::new();
        doc.extend_from_slice(b"d4:infod6:lengthi20e4:name4:solo12:piece lengthi16e6:pieces40:");
        doc.extend_from_slice(&[0x22; 40]);
        doc.extend_from_slice(b"ee");
        let descriptor = TorrentDescriptor::from_metainfo(doc).expect("parse");
        assert_eq!(
            descriptor.piece_extent(0),
            Some(PieceExtent {
                offset: 0,
                length: 16
            })
        );
        assert_eq!(
            descriptor.piece_extent(1),
            Some(PieceExtent {
                offset: 16,
                length: 4
            })
        );
        assert_eq!(descriptor.piece_extent(2), None);
    }

    #[test]
    fn file_piece_ranges_intersect_correctly() {
        let descriptor = TorrentDescriptor::from_metainfo(multi_file_metainfo()).expect("parse");
        // a.bin covers bytes [0, 24) -> pieces 0..2
        assert_eq!(descriptor.file_piece_range(0), 0..2);
        // b.bin covers bytes [24, 64) -> pieces 1..4
        assert_eq!(descriptor.file_piece_range(1), 1..4);
        // piece 1 spans both files
        assert_eq!(descriptor.files_for_piece(1), vec![0, 1]);
        assert_eq!(descriptor.files_for_piece(0), vec![0]);
        assert_eq!(descriptor.files_for_piece(3), vec![1]);
    }

    #[test]
    fn rejects_mismatched_piece_counts() {
        let mut doc = Vec::new();
        doc.extend_from_slice(b"d4:infod6:lengthi64e4:name4:solo12:piece lengthi16e6:pieces20:");
        doc.extend_from_slice(&[0x33; 20]);
        doc.extend_from_slice(b"ee");
        assert!(TorrentDescriptor::from_metainfo(doc).is_err());
    }
}
