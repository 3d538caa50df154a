//! Synthetic bencoded metainfo builders.

use std::sync::Arc;

use sha1::{Digest, Sha1};

use seedgate_core::TorrentDescriptor;

fn bencode_str(out: &mut Vec<u8>, value: &[u8]) {
    out.extend_from_slice(value.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(value);
}

fn bencode_int(out: &mut Vec<u8>, value: u64) {
    out.push(b'i');
    out.extend_from_slice(value.to_string().as_bytes());
    out.push(b'e');
}

fn metainfo_document(
    name: &str,
    piece_length: u64,
    files: Option<&[(&str, u64)]>,
    length: u64,
    piece_hashes: &[u8],
) -> Vec<u8> {
    let mut doc = Vec::new();
    doc.extend_from_slice(b"d4:infod");
    if let Some(files) = files {
        bencode_str(&mut doc, b"files");
        doc.push(b'l');
        for (path, len) in files {
            doc.push(b'd');
            bencode_str(&mut doc, b"length");
            bencode_int(&mut doc, *len);
            bencode_str(&mut doc, b"path");
            doc.push(b'l');
            for component in path.split('/') {
                bencode_str(&mut doc, component.as_bytes());
            }
            doc.push(b'e');
            doc.push(b'e');
        }
        doc.push(b'e');
    } else {
        bencode_str(&mut doc, b"length");
        bencode_int(&mut doc, length);
    }
    bencode_str(&mut doc, b"name");
    bencode_str(&mut doc, name.as_bytes());
    bencode_str(&mut doc, b"piece length");
    bencode_int(&mut doc, piece_length);
    bencode_str(&mut doc, b"pieces");
    bencode_str(&mut doc, piece_hashes);
    doc.extend_from_slice(b"ee");
    doc
}

/// Build a multi-file descriptor with placeholder piece hashes.
///
/// File paths are given relative to the torrent root; the descriptor exposes
/// them prefixed with `name/` as real multi-file torrents do.
pub fn descriptor_with_files(
    name: &str,
    piece_length: u64,
    files: &[(&str, u64)],
) -> Arc<TorrentDescriptor> {
    let total: u64 = files.iter().map(|(_, len)| len).sum();
    let num_pieces = total.div_ceil(piece_length);
    let mut hashes = Vec::with_capacity(num_pieces as usize * 20);
    for i in 0..num_pieces {
        let mut raw = [0x5au8; 20];
        raw[..8].copy_from_slice(&i.to_be_bytes());
        hashes.extend_from_slice(&raw);
    }
    let doc = metainfo_document(name, piece_length, Some(files), total, &hashes);
    TorrentDescriptor::from_metainfo(doc).expect("fixture metainfo parses")
}

/// Build a single-file torrent from real content: the descriptor's piece
/// hashes are the SHA-1 of the content's pieces.
pub fn single_file_torrent(
    name: &str,
    piece_length: u64,
    content: &[u8],
) -> (Arc<TorrentDescriptor>, Vec<u8>) {
    let mut hashes = Vec::new();
    for chunk in content.chunks(piece_length as usize) {
        let mut hasher = Sha1::new();
        hasher.update(chunk);
        hashes.extend_from_slice(&hasher.finalize());
    }
    let doc = metainfo_document(name, piece_length, None, content.len() as u64, &hashes);
    let descriptor = TorrentDescriptor::from_metainfo(doc).expect("fixture metainfo parses");
    (descriptor, content.to_vec())
}

/// Build a multi-file torrent from real content slices, returning the
/// descriptor and the concatenated payload.
pub fn build_torrent(
    name: &str,
    piece_length: u64,
    files: &[(&str, &[u8])],
) -> (Arc<TorrentDescriptor>, Vec<u8>) {
    let mut payload = Vec::new();
    for (_, content) in files {
        payload.extend_from_slice(content);
    }
    let mut hashes = Vec::new();
    for chunk in payload.chunks(piece_length as usize) {
        let mut hasher = Sha1::new();
        hasher.update(chunk);
        hashes.extend_from_slice(&hasher.finalize());
    }
    let specs: Vec<(&str, u64)> = files
        .iter()
        .map(|(path, content)| (*path, content.len() as u64))
        .collect();
    let doc = metainfo_document(
        name,
        piece_length,
        Some(&specs),
        payload.len() as u64,
        &hashes,
    );
    let descriptor = TorrentDescriptor::from_metainfo(doc).expect("fixture metainfo parses");
    (descriptor, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_paths_carry_the_name_prefix() {
        let descriptor = descriptor_with_files("demo", 16, &[("a.bin", 24), ("sub/b.bin", 8)]);
        assert_eq!(descriptor.files()[0].path, "demo/a.bin");
        assert_eq!(descriptor.files()[1].path, "demo/sub/b.bin");
        assert_eq!(descriptor.total_length(), 32);
        assert_eq!(descriptor.num_pieces(), 2);
    }

    #[test]
    fn content_torrent_hashes_match_payload() {
        let (descriptor, payload) = single_file_torrent("solo", 4, b"abcdefgh");
        assert_eq!(descriptor.num_pieces(), 2);
        let first = descriptor.piece_hash(0).expect("hash");
        let expected = seedgate_core::hash::PieceHash::digest(&payload[..4]);
        assert_eq!(first, &expected);
    }
}
