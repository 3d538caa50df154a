//! Free-space-preserving eviction of dormant torrent directories.
//!
//! Every tick the cleaner samples the data filesystem; while free space is
//! below the keep-free target it drops torrent trees oldest-touch-first,
//! detaching each from the engine, re-sampling after every drop.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use seedgate_core::{InfoHash, Result, TorrentDropper};
use seedgate_telemetry::Metrics;

/// Tick cadence.
const TICK: Duration = Duration::from_secs(30);

/// Source of free-space samples; injectable for tests.
pub trait FreeSpaceProbe: Send + Sync {
    /// Free bytes available on the filesystem containing `path`.
    fn free_bytes(&self, path: &Path) -> io::Result<u64>;
}

/// `statvfs`-backed probe used in production.
pub struct StatvfsProbe;

impl FreeSpaceProbe for StatvfsProbe {
    fn free_bytes(&self, path: &Path) -> io::Result<u64> {
        let stat = nix::sys::statvfs::statvfs(path).map_err(io::Error::from)?;
        Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
    }
}

/// Periodic disk cleaner.
pub struct Cleaner {
    base: String,
    keep_free: u64,
    dropper: Arc<dyn TorrentDropper>,
    probe: Arc<dyn FreeSpaceProbe>,
    metrics: Metrics,
}

impl Cleaner {
    /// New cleaner over `base` keeping `keep_free` bytes available.
    pub fn new(
        base: impl Into<String>,
        keep_free: u64,
        dropper: Arc<dyn TorrentDropper>,
        probe: Arc<dyn FreeSpaceProbe>,
        metrics: Metrics,
    ) -> Self {
        Self {
            base: base.into(),
            keep_free,
            dropper,
            probe,
            metrics,
        }
    }

    /// Tick loop; one pass at a time, cancelled by `shutdown`.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(TICK);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.clean_once().await {
                        warn!(error = %err, "cleaner pass failed");
                    }
                }
                () = shutdown.cancelled() => return Ok(()),
            }
        }
    }

    /// One cleaning pass.
    pub async fn clean_once(&self) -> Result<()> {
        let root = self.statfs_root();
        let free = self
            .probe
            .free_bytes(&root)
            .map_err(|err| seedgate_core::Error::io("statvfs", err))?;
        self.metrics.set_cleaner_free_bytes(free);
        debug!(
            free_gb = free / (1 << 30),
            keep_gb = self.keep_free / (1 << 30),
            "cleaner tick"
        );
        if free >= self.keep_free {
            return Ok(());
        }

        let mut entries = self.scan()?;
        entries.sort_by_key(|entry| entry.touch);
        for entry in entries {
            info!(info_hash = %entry.hash, touch = ?entry.touch, "dropping torrent tree");
            self.drop_entry(&entry).await;
            self.metrics.inc_cleaner_drop();
            let free = self
                .probe
                .free_bytes(&root)
                .map_err(|err| seedgate_core::Error::io("statvfs", err))?;
            self.metrics.set_cleaner_free_bytes(free);
            if free >= self.keep_free {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Directories the cleaner scans: the base itself, or every matching
    /// shard directory when the base carries a `*` suffix.
    fn candidate_dirs(&self) -> Vec<PathBuf> {
        let Some(prefix) = self.base.strip_suffix('*') else {
            return vec![PathBuf::from(&self.base)];
        };
        let (parent, leaf_prefix) = match prefix.rfind('/') {
            Some(split) => (&prefix[..=split], &prefix[split + 1..]),
            None => (".", prefix),
        };
        let mut dirs = Vec::new();
        if let Ok(entries) = std::fs::read_dir(parent) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if entry.file_type().map(|t| t.is_dir()).unwrap_or(false)
                    && name.starts_with(leaf_prefix)
                {
                    dirs.push(entry.path());
                }
            }
        }
        dirs
    }

    fn statfs_root(&self) -> PathBuf {
        match self.base.strip_suffix('*') {
            Some(prefix) => {
                let parent = match prefix.rfind('/') {
                    Some(split) => &prefix[..=split],
                    None => ".",
                };
                PathBuf::from(parent)
            }
            None => PathBuf::from(&self.base),
        }
    }

    fn scan(&self) -> Result<Vec<StoreEntry>> {
        let mut by_hash: HashMap<InfoHash, StoreEntry> = HashMap::new();
        for dir in self.candidate_dirs() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(seedgate_core::Error::io("scan data dir", err)),
            };
            for entry in entries {
                let entry = entry.map_err(|err| seedgate_core::Error::io("scan data dir", err))?;
                let name = entry.file_name().to_string_lossy().into_owned();
                let file_type = entry
                    .file_type()
                    .map_err(|err| seedgate_core::Error::io("scan data dir", err))?;
                if !file_type.is_dir() {
                    if let Some(stem) = name.strip_suffix(".touch") {
                        if let Ok(hash) = stem.parse::<InfoHash>() {
                            let touch = entry
                                .metadata()
                                .and_then(|meta| meta.modified())
                                .unwrap_or(SystemTime::UNIX_EPOCH);
                            let slot = by_hash.entry(hash).or_insert_with(|| StoreEntry {
                                hash,
                                dir: dir.join(stem),
                                touch_file: entry.path(),
                                touch: SystemTime::UNIX_EPOCH,
                            });
                            slot.touch = touch;
                            slot.touch_file = entry.path();
                        }
                    }
                } else if let Ok(hash) = name.parse::<InfoHash>() {
                    by_hash.entry(hash).or_insert_with(|| StoreEntry {
                        hash,
                        dir: entry.path(),
                        touch_file: dir.join(format!("{name}.touch")),
                        touch: SystemTime::UNIX_EPOCH,
                    });
                }
            }
        }
        Ok(by_hash.into_values().collect())
    }

    async fn drop_entry(&self, entry: &StoreEntry) {
        for (label, path) in [("dir", &entry.dir), ("touch", &entry.touch_file)] {
            let path = path.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                if path.is_dir() {
                    std::fs::remove_dir_all(&path)
                } else {
                    match std::fs::remove_file(&path) {
                        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                        other => other,
                    }
                }
            })
            .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(info_hash = %entry.hash, what = label, error = %err, "drop failed")
                }
                Err(err) => {
                    warn!(info_hash = %entry.hash, what = label, error = %err, "drop task failed")
                }
            }
        }
        self.dropper.drop_torrent(entry.hash).await;
    }
}

struct StoreEntry {
    hash: InfoHash,
    dir: PathBuf,
    touch_file: PathBuf,
    touch: SystemTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::TempDir;

    struct FakeProbe {
        free: AtomicU64,
    }

    impl FreeSpaceProbe for FakeProbe {
        fn free_bytes(&self, _path: &Path) -> io::Result<u64> {
            Ok(self.free.load(Ordering::Relaxed))
        }
    }

    struct RecordingDropper {
        dropped: Mutex<Vec<InfoHash>>,
        probe_free: Arc<FakeProbe>,
        reclaim: u64,
    }

    #[async_trait]
    impl TorrentDropper for RecordingDropper {
        async fn drop_torrent(&self, hash: InfoHash) {
            self.dropped.lock().unwrap().push(hash);
            self.probe_free.fetch_add(self.reclaim);
        }
    }

    impl FakeProbe {
        fn fetch_add(&self, n: u64) {
            self.free.fetch_add(n, Ordering::Relaxed);
        }
    }

    const GIB: u64 = 1 << 30;

    fn seed_torrent(base: &Path, byte: u8, age_rank: u64) -> InfoHash {
        let hash = InfoHash::new([byte; 20]);
        let dir = base.join(hash.hex());
        std::fs::create_dir_all(&dir).expect("mkdir");
        std::fs::write(dir.join("payload"), b"x").expect("payload");
        let touch = base.join(format!("{}.touch", hash.hex()));
        std::fs::write(&touch, b"").expect("touch");
        // Rank the touch files oldest-first by backdating their mtimes.
        let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000 + age_rank * 3_600);
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(&touch)
            .expect("open touch");
        file.set_modified(mtime).expect("set mtime");
        hash
    }

    #[tokio::test]
    async fn drops_oldest_first_until_free_recovers() {
        let tmp = TempDir::new().expect("tempdir");
        let oldest = seed_torrent(tmp.path(), 0x01, 0);
        let middle = seed_torrent(tmp.path(), 0x02, 1);
        let newest = seed_torrent(tmp.path(), 0x03, 2);

        // 0 free, keep 1 GiB, each drop reclaims 2 GiB: exactly one drop.
        let probe = Arc::new(FakeProbe {
            free: AtomicU64::new(0),
        });
        let dropper = Arc::new(RecordingDropper {
            dropped: Mutex::new(Vec::new()),
            probe_free: Arc::clone(&probe),
            reclaim: 2 * GIB,
        });
        let cleaner = Cleaner::new(
            tmp.path().display().to_string(),
            GIB,
            Arc::clone(&dropper) as Arc<dyn TorrentDropper>,
            probe,
            Metrics::new().expect("metrics"),
        );

        cleaner.clean_once().await.expect("clean");

        let dropped = dropper.dropped.lock().unwrap().clone();
        assert_eq!(dropped, vec![oldest]);
        assert!(!tmp.path().join(oldest.hex()).exists());
        assert!(tmp.path().join(middle.hex()).exists());
        assert!(tmp.path().join(newest.hex()).exists());
    }

    #[tokio::test]
    async fn free_space_at_target_performs_no_drops() {
        let tmp = TempDir::new().expect("tempdir");
        seed_torrent(tmp.path(), 0x04, 0);

        let probe = Arc::new(FakeProbe {
            free: AtomicU64::new(GIB),
        });
        let dropper = Arc::new(RecordingDropper {
            dropped: Mutex::new(Vec::new()),
            probe_free: Arc::clone(&probe),
            reclaim: 0,
        });
        let cleaner = Cleaner::new(
            tmp.path().display().to_string(),
            GIB,
            Arc::clone(&dropper) as Arc<dyn TorrentDropper>,
            probe,
            Metrics::new().expect("metrics"),
        );

        cleaner.clean_once().await.expect("clean");
        assert!(dropper.dropped.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn directories_without_touch_files_rank_oldest() {
        let tmp = TempDir::new().expect("tempdir");
        let touched = seed_torrent(tmp.path(), 0x05, 5);
        let untouched = InfoHash::new([0x06; 20]);
        std::fs::create_dir_all(tmp.path().join(untouched.hex())).expect("mkdir");

        let probe = Arc::new(FakeProbe {
            free: AtomicU64::new(0),
        });
        let dropper = Arc::new(RecordingDropper {
            dropped: Mutex::new(Vec::new()),
            probe_free: Arc::clone(&probe),
            reclaim: 2 * GIB,
        });
        let cleaner = Cleaner::new(
            tmp.path().display().to_string(),
            GIB,
            Arc::clone(&dropper) as Arc<dyn TorrentDropper>,
            probe,
            Metrics::new().expect("metrics"),
        );

        cleaner.clean_once().await.expect("clean");
        let dropped = dropper.dropped.lock().unwrap().clone();
        assert_eq!(dropped, vec![untouched]);
        assert!(tmp.path().join(touched.hex()).exists());
    }
}
