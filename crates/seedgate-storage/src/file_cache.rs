//! Cached lookup from `(info-hash, path)` to a fully-downloaded local file.
//!
//! A hit means the HTTP layer can serve a plain file read and skip the swarm
//! entirely. Lookups are memoized for a minute; absence of the database, the
//! table, or the row is "no cache", not an error.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use seedgate_core::{Error, FileSpec, InfoHash, Result};

use crate::db::read_file_completion;
use crate::layout::{DB_FILE, content_rel_path, resolve_dir};

/// Memoization window for lookups.
const CACHE_TTL: Duration = Duration::from_secs(60);

/// Short-TTL memoized file-completion lookup.
pub struct FileCacheMap {
    base: String,
    cache: Cache<String, Option<PathBuf>>,
}

impl FileCacheMap {
    /// New map over the given data directory base.
    #[must_use]
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            cache: Cache::builder().time_to_live(CACHE_TTL).build(),
        }
    }

    /// Absolute path of the cached file when it is wholly downloaded and its
    /// on-disk length matches the declared length; `None` otherwise.
    pub async fn get(&self, hash: InfoHash, file: &FileSpec) -> Result<Option<PathBuf>> {
        let key = format!("{hash}{}", file.path);
        let base = self.base.clone();
        let file = file.clone();
        self.cache
            .try_get_with(key, async move { lookup(&base, hash, &file).await })
            .await
            .map_err(|err: Arc<Error>| Error::transient(format!("file cache lookup: {err}")))
    }
}

async fn lookup(base: &str, hash: InfoHash, file: &FileSpec) -> Result<Option<PathBuf>> {
    let dir = resolve_dir(base, hash)?;
    let path = file.path.clone();
    let length = file.length;
    tokio::task::spawn_blocking(move || {
        let db_path = dir.join(DB_FILE);
        if !read_file_completion(&db_path, &path)? {
            return Ok(None);
        }
        let cached = dir.join(content_rel_path(&path));
        match std::fs::metadata(&cached) {
            Ok(meta) if meta.len() == length => Ok(Some(cached)),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::io("stat cached file", err)),
        }
    })
    .await
    .map_err(|err| Error::fatal(format!("file cache lookup task failed: {err}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CompletionDb;
    use seedgate_core::FileSpec;
    use tempfile::TempDir;

    fn spec(path: &str, length: u64) -> FileSpec {
        FileSpec {
            path: path.to_string(),
            length,
            offset: 0,
        }
    }

    #[tokio::test]
    async fn missing_database_means_no_cache() {
        let tmp = TempDir::new().expect("tempdir");
        let map = FileCacheMap::new(tmp.path().display().to_string());
        let hash = InfoHash::new([0x11; 20]);
        let hit = map.get(hash, &spec("demo/movie.mp4", 10)).await.expect("lookup");
        assert!(hit.is_none());
    }

    #[tokio::test]
    async fn hit_requires_row_and_matching_length() {
        let tmp = TempDir::new().expect("tempdir");
        let hash = InfoHash::new([0x22; 20]);
        let dir = resolve_dir(&tmp.path().display().to_string(), hash).expect("resolve");
        std::fs::create_dir_all(&dir).expect("mkdir");

        let db = CompletionDb::open(&dir);
        db.insert_file("demo/movie.mp4").expect("insert");
        db.close();

        let map = FileCacheMap::new(tmp.path().display().to_string());

        // Row present but no file on disk.
        let miss = map.get(hash, &spec("demo/movie.mp4", 4)).await.expect("lookup");
        assert!(miss.is_none());

        let cached = dir.join(content_rel_path("demo/movie.mp4"));
        std::fs::create_dir_all(cached.parent().unwrap()).expect("mkdir");
        std::fs::write(&cached, b"abcd").expect("write");

        // The earlier miss is memoized; a fresh map sees the file.
        let map = FileCacheMap::new(tmp.path().display().to_string());
        let hit = map.get(hash, &spec("demo/movie.mp4", 4)).await.expect("lookup");
        assert_eq!(hit, Some(cached.clone()));

        // Length mismatch is treated as incomplete.
        let map = FileCacheMap::new(tmp.path().display().to_string());
        let short = map.get(hash, &spec("demo/movie.mp4", 999)).await.expect("lookup");
        assert!(short.is_none());
    }
}
