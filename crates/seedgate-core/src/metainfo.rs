//! Bencoded metainfo parsing.
//!
//! The info-hash must be computed over the exact bytes of the info dictionary
//! as it appeared on the wire, so the parser keeps a raw slice scanner next to
//! the typed `serde_bencode` view instead of re-encoding.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::hash::InfoHash;

#[derive(Debug, Deserialize)]
pub(crate) struct RawMetainfo {
    pub(crate) info: RawInfo,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawInfo {
    #[serde(default)]
    pub(crate) files: Option<Vec<RawFile>>,
    #[serde(default)]
    pub(crate) length: Option<i64>,
    pub(crate) name: String,
    #[serde(rename = "piece length")]
    pub(crate) piece_length: i64,
    pub(crate) pieces: serde_bytes::ByteBuf,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawFile {
    pub(crate) length: i64,
    pub(crate) path: Vec<String>,
}

pub(crate) fn parse(data: &[u8]) -> Result<RawMetainfo> {
    serde_bencode::from_bytes(data)
        .map_err(|err| Error::integrity(format!("malformed metainfo: {err}")))
}

/// Compute the info-hash of a bencoded metainfo document from the raw bytes
/// of its `info` dictionary.
pub fn info_hash(data: &[u8]) -> Result<InfoHash> {
    let slice = raw_info_slice(data)?;
    Ok(InfoHash::digest(slice))
}

/// Locate the exact byte range of the top-level `info` value.
fn raw_info_slice(data: &[u8]) -> Result<&[u8]> {
    if data.first() != Some(&b'd') {
        return Err(Error::integrity("metainfo is not a bencoded dictionary"));
    }
    let mut pos = 1;
    while pos < data.len() && data[pos] != b'e' {
        let (key, after_key) = read_string(data, pos)?;
        let after_value = skip_value(data, after_key)?;
        if key == b"info" {
            return Ok(&data[after_key..after_value]);
        }
        pos = after_value;
    }
    Err(Error::integrity("metainfo has no info dictionary"))
}

/// Read a bencoded string at `pos`, returning its bytes and the offset of the
/// following value.
fn read_string(data: &[u8], pos: usize) -> Result<(&[u8], usize)> {
    let colon = data[pos..]
        .iter()
        .position(|&b| b == b':')
        .map(|off| pos + off)
        .ok_or_else(|| truncated(pos))?;
    let len: usize = std::str::from_utf8(&data[pos..colon])
        .ok()
        .and_then(|digits| digits.parse().ok())
        .ok_or_else(|| Error::integrity(format!("bad string length at offset {pos}")))?;
    let end = (colon + 1)
        .checked_add(len)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| truncated(pos))?;
    Ok((&data[colon + 1..end], end))
}

/// Skip one bencoded value starting at `pos`, returning the offset just past
/// it.
fn skip_value(data: &[u8], pos: usize) -> Result<usize> {
    match data.get(pos) {
        Some(b'i') => {
            let end = data[pos..]
                .iter()
                .position(|&b| b == b'e')
                .map(|off| pos + off)
                .ok_or_else(|| truncated(pos))?;
            Ok(end + 1)
        }
        Some(b'l') | Some(b'd') => {
            let is_dict = data[pos] == b'd';
            let mut cursor = pos + 1;
            while *data.get(cursor).ok_or_else(|| truncated(cursor))? != b'e' {
                if is_dict {
                    let (_, after_key) = read_string(data, cursor)?;
                    cursor = after_key;
                }
                cursor = skip_value(data, cursor)?;
            }
            Ok(cursor + 1)
        }
        Some(b'0'..=b'9') => {
            let (_, end) = read_string(data, pos)?;
            Ok(end)
        }
        Some(other) => Err(Error::integrity(format!(
            "unexpected bencode byte {other:#04x} at offset {pos}"
        ))),
        None => Err(truncated(pos)),
    }
}

fn truncated(pos: usize) -> Error {
    Error::integrity(format!("truncated metainfo at offset {pos}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let mut doc = Vec::new();
        doc.extend_from_slice(b"d8:announce20:http://tracker/a/bcd4:info");
        doc.extend_from_slice(sample_info().as_slice());
        doc.extend_from_slice(b"e");
        doc
    }

    fn sample_info() -> Vec<u8> {
        let mut info = Vec::new();
        info.extend_from_slice(b"d6:lengthi32e4:name4:demo12:piece lengthi16e6:pieces40:");
        info.extend_from_slice(&[0xaa; 20]);
        info.extend_from_slice(&[0xbb; 20]);
        info.extend_from_slice(b"e");
        info
    }

    #[test]
    fn info_hash_covers_only_the_info_dict() {
        let expected = InfoHash::digest(&sample_info());
        assert_eq!(info_hash(&sample()).expect("hash"), expected);
    }

    #[test]
    fn parse_reads_typed_fields() {
        let meta = parse(&sample()).expect("parse");
        assert_eq!(meta.info.name, "demo");
        assert_eq!(meta.info.piece_length, 16);
        assert_eq!(meta.info.length, Some(32));
        assert_eq!(meta.info.pieces.len(), 40);
    }

    #[test]
    fn rejects_truncated_documents() {
        let doc = sample();
        assert!(info_hash(&doc[..doc.len() - 4]).is_err());
        assert!(info_hash(b"le").is_err());
    }

    #[test]
    fn skips_nested_values_before_info() {
        let mut doc = Vec::new();
        doc.extend_from_slice(b"d5:nestsd4:listli1e3:abcee4:info");
        doc.extend_from_slice(sample_info().as_slice());
        doc.extend_from_slice(b"e");
        let expected = InfoHash::digest(&sample_info());
        assert_eq!(info_hash(&doc).expect("hash"), expected);
    }
}
