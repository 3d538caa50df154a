//! Per-torrent "used recently" sentinels.
//!
//! `touch(h)` creates (or bumps the mtime of) `<resolved dir>.touch`. Rapid
//! touches are coalesced so a streaming request issuing thousands of writes
//! costs at most one syscall per key per window.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use moka::future::Cache;
use tracing::warn;

use seedgate_core::{Error, InfoHash, Result};

use crate::layout::touch_path;

/// Coalescing window for repeated touches of the same hash.
const COALESCE_WINDOW: Duration = Duration::from_secs(30);

/// Coalesced touch-file updater.
pub struct TouchMap {
    base: String,
    window: Cache<InfoHash, ()>,
    syscalls: AtomicU64,
}

impl TouchMap {
    /// New map over the given data directory base.
    #[must_use]
    pub fn new(base: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            base: base.into(),
            window: Cache::builder().time_to_live(COALESCE_WINDOW).build(),
            syscalls: AtomicU64::new(0),
        })
    }

    /// Record that `hash` was just used. Filesystem errors are logged, not
    /// surfaced: a failed touch only risks an early eviction.
    pub async fn touch(&self, hash: InfoHash) {
        self.window
            .get_with(hash, async {
                if let Err(err) = self.touch_now(hash).await {
                    warn!(info_hash = %hash, error = %err, "touch failed");
                }
            })
            .await;
    }

    async fn touch_now(&self, hash: InfoHash) -> Result<()> {
        let path = touch_path(&self.base, hash)?;
        self.syscalls.fetch_add(1, Ordering::Relaxed);
        tokio::task::spawn_blocking(move || {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&path)
                .map_err(|err| Error::io("create touch file", err))?;
            file.set_modified(SystemTime::now())
                .map_err(|err| Error::io("bump touch mtime", err))
        })
        .await
        .map_err(|err| Error::fatal(format!("touch task failed: {err}")))?
    }

    /// Number of filesystem updates performed (as opposed to coalesced).
    #[must_use]
    pub fn syscalls(&self) -> u64 {
        self.syscalls.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn touch_creates_the_sentinel() {
        let tmp = TempDir::new().expect("tempdir");
        let map = TouchMap::new(tmp.path().display().to_string());
        let hash = InfoHash::new([0x0f; 20]);
        map.touch(hash).await;
        let path = touch_path(&tmp.path().display().to_string(), hash).expect("path");
        assert!(path.exists());
    }

    #[tokio::test]
    async fn rapid_touches_coalesce_to_one_syscall() {
        let tmp = TempDir::new().expect("tempdir");
        let map = TouchMap::new(tmp.path().display().to_string());
        let hash = InfoHash::new([0x10; 20]);
        for _ in 0..5 {
            map.touch(hash).await;
        }
        assert_eq!(map.syscalls(), 1);

        // A different key is not coalesced with the first.
        map.touch(InfoHash::new([0x11; 20])).await;
        assert_eq!(map.syscalls(), 2);
    }
}
