//! Directory resolution and on-disk naming.
//!
//! A torrent lives at `<base>/<hash>/`, or inside one of several shard
//! directories when `base` ends in `*`. File payloads are stored
//! content-addressed under `content/<xx>/<sha1(safe-name)>` so on-disk names
//! are fixed-width and independent of arbitrary torrent paths.

use std::fs;
use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};

use seedgate_core::{Error, InfoHash, Result};

/// Per-torrent completion database file name.
pub const DB_FILE: &str = ".torrent.db";

/// Map `(base, info-hash)` to the torrent's on-disk directory.
///
/// When `base` does not end in `*` the result is simply
/// `<base>/<hash>`. Otherwise `base` is `<parent>/<prefix>*`: children of
/// `<parent>` whose names start with `<prefix>` are shard candidates. No
/// candidate falls back to `<prefix>/<hash>`, one candidate is used directly,
/// several are chosen between by a stable SHA-1-weighted distribution.
pub fn resolve_dir(base: &str, hash: InfoHash) -> Result<PathBuf> {
    let hex = hash.hex();
    let Some(prefix) = base.strip_suffix('*') else {
        return Ok(Path::new(base).join(hex));
    };

    let (parent, leaf_prefix) = match prefix.rfind('/') {
        Some(split) => (&prefix[..=split], &prefix[split + 1..]),
        None => (".", prefix),
    };

    let mut candidates = Vec::new();
    let entries = fs::read_dir(parent).map_err(|err| Error::io("read shard parent", err))?;
    for entry in entries {
        let entry = entry.map_err(|err| Error::io("read shard parent", err))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = entry
            .file_type()
            .map_err(|err| Error::io("stat shard candidate", err))?
            .is_dir();
        if is_dir && name.starts_with(leaf_prefix) {
            candidates.push(name);
        }
    }

    match candidates.len() {
        0 => Ok(Path::new(prefix).join(hex)),
        1 => Ok(Path::new(parent).join(&candidates[0]).join(hex)),
        _ => {
            let chosen = distribute_by_hash(&mut candidates, &hex)?;
            Ok(Path::new(parent).join(chosen).join(hex))
        }
    }
}

/// Pick a shard directory for `hash_hex` with a stable, ~uniform weighting.
///
/// The first five hex characters of `SHA1(hash_hex)` form an integer in
/// `[0, 2^20)`; candidates (sorted lexicographically) partition that space
/// into equal intervals.
fn distribute_by_hash(candidates: &mut [String], hash_hex: &str) -> Result<String> {
    candidates.sort_unstable();

    let mut hasher = Sha1::new();
    hasher.update(hash_hex.as_bytes());
    let digest = hex::encode(hasher.finalize());
    let num = i64::from_str_radix(&digest[..5], 16)
        .map_err(|err| Error::fatal(format!("bad distribution hex for {hash_hex}: {err}")))?
        * 1000;

    let total: i64 = 1_048_575 * 1000;
    let interval = total / candidates.len() as i64;
    for (i, candidate) in candidates.iter().enumerate() {
        if num < (i as i64 + 1) * interval {
            return Ok(candidate.clone());
        }
    }
    // Unreachable for well-formed inputs; an unresolved distribution is a bug.
    Err(Error::fatal(format!(
        "failed to distribute info-hash {hash_hex} over {} shards",
        candidates.len()
    )))
}

/// Sentinel file recording when the torrent was last used: a sibling of the
/// torrent directory named `<dir>.touch`.
pub fn touch_path(base: &str, hash: InfoHash) -> Result<PathBuf> {
    let dir = resolve_dir(base, hash)?;
    let mut name = dir.into_os_string();
    name.push(".touch");
    Ok(PathBuf::from(name))
}

/// Deterministic filesystem-safe rewrite of a torrent display path.
///
/// Each `/`-separated component has path-hostile characters replaced and dot
/// traversals neutralised; the result only feeds a hash, so collisions from
/// replacement do not matter as long as the mapping is stable.
pub fn safe_name(path: &str) -> String {
    let mut out = Vec::new();
    for component in path.split('/') {
        if component.is_empty() || component == "." || component == ".." {
            out.push("_".to_string());
            continue;
        }
        let cleaned: String = component
            .chars()
            .map(|c| {
                if c.is_control() || matches!(c, '<' | '>' | ':' | '"' | '\\' | '|' | '?' | '*') {
                    '_'
                } else {
                    c
                }
            })
            .collect();
        out.push(cleaned);
    }
    out.join("/")
}

/// Content-addressed location of a file payload relative to the torrent
/// directory: `content/<first-two-hex>/<sha1(safe-name)>`.
#[must_use]
pub fn content_rel_path(path: &str) -> PathBuf {
    let mut hasher = Sha1::new();
    hasher.update(safe_name(path).as_bytes());
    let digest = hex::encode(hasher.finalize());
    Path::new("content").join(&digest[..2]).join(digest)
}
