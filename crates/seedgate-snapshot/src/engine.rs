//! Per-torrent snapshot engine.
//!
//! Activated by the first byte written to an HTTP response for the torrent,
//! the engine mirrors completed pieces to the object store once the
//! completion and served-bytes thresholds are met, persists resumption state
//! (`downloaded_size`, `completed_pieces`, `touch`) on the way, and writes a
//! `done` sentinel only after a final `completed_pieces` write observed every
//! piece mirrored.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use seedgate_config::SnapshotSettings;
use seedgate_core::{InfoHash, ObjectStore, PieceHash, TorrentHandle};
use seedgate_telemetry::Metrics;

/// Cadence of the snapshot evaluation loop.
const TICK: Duration = Duration::from_secs(10);

/// Minimum growth of the cumulative counter before `downloaded_size` is
/// rewritten.
const SIZE_PERSIST_DELTA: u64 = 10 << 20;

/// Minimum growth of the mirrored set before `completed_pieces` is
/// rewritten.
const CP_PERSIST_DELTA: usize = 10;

/// How long in-flight uploads may drain during finalization.
const DRAIN_GRACE: Duration = Duration::from_secs(30 * 60);

/// Threshold-gated piece mirror for one torrent.
pub struct SnapshotEngine {
    settings: SnapshotSettings,
    hash: InfoHash,
    handle: Weak<dyn TorrentHandle>,
    store: Arc<dyn ObjectStore>,
    metrics: Metrics,
    served: AtomicU64,
    activated: AtomicBool,
    detached: AtomicBool,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl SnapshotEngine {
    /// Engine for `hash`, holding a back reference to its live handle. The
    /// run task is registered with `tracker` so shutdown can wait for
    /// in-flight snapshot work.
    #[must_use]
    pub fn new(
        settings: SnapshotSettings,
        hash: InfoHash,
        handle: &Arc<dyn TorrentHandle>,
        store: Arc<dyn ObjectStore>,
        metrics: Metrics,
        shutdown: CancellationToken,
        tracker: TaskTracker,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            hash,
            handle: Arc::downgrade(handle),
            store,
            metrics,
            served: AtomicU64::new(0),
            activated: AtomicBool::new(false),
            detached: AtomicBool::new(false),
            shutdown,
            tracker,
        })
    }

    /// Record `n` bytes served to an HTTP client; the first call activates
    /// the engine.
    pub fn add(self: &Arc<Self>, n: u64) {
        self.served.fetch_add(n, Ordering::Relaxed);
        if !self.activated.swap(true, Ordering::AcqRel) {
            let engine = Arc::clone(self);
            self.tracker.spawn(async move { engine.run().await });
        }
    }

    /// Whether the engine has finished or lost its torrent handle. A
    /// detached engine never uploads again; callers build a fresh one on the
    /// next activation.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    async fn run(self: Arc<Self>) {
        if let Err(err) = self.run_inner().await {
            warn!(info_hash = %self.hash, error = %err, "snapshot run aborted");
        }
        self.detached.store(true, Ordering::Release);
    }

    async fn run_inner(&self) -> seedgate_core::Result<()> {
        let Some(handle) = self.handle.upgrade() else {
            return Ok(());
        };
        let descriptor = handle.descriptor();
        let storage = handle.storage();
        let hex = self.hash.hex();
        let bucket = self.settings.bucket.clone();

        // Bucket setup; per-torrent spread buckets keep piece payloads out of
        // the side-object namespace.
        let piece_bucket = if self.settings.bucket_spread {
            let spread = format!("{bucket}-{}", &hex[..2]);
            self.store.ensure_bucket(&bucket).await?;
            self.store.ensure_bucket(&spread).await?;
            spread
        } else {
            bucket.clone()
        };

        if descriptor.total_length() > self.settings.torrent_size_limit {
            info!(
                info_hash = %self.hash,
                length = descriptor.total_length(),
                limit = self.settings.torrent_size_limit,
                "torrent exceeds snapshot size limit"
            );
            return Ok(());
        }

        let now_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.store
            .put(
                &bucket,
                &format!("touch/{hex}"),
                Bytes::from(now_unix.to_string()),
            )
            .await?;

        if self.store.exists(&bucket, &format!("done/{hex}")).await? {
            info!(info_hash = %self.hash, "snapshot already complete, skipping");
            return Ok(());
        }

        // Resume: cumulative served bytes and the mirrored-piece set from a
        // previous activation, plus the metainfo for future re-seeders.
        let prev_downloaded = match self
            .store
            .get(&bucket, &format!("downloaded_size/{hex}"))
            .await?
        {
            Some(raw) => std::str::from_utf8(&raw)
                .ok()
                .and_then(|text| text.trim().parse::<u64>().ok())
                .unwrap_or(0),
            None => 0,
        };
        let cp: HashSet<PieceHash> = match self
            .store
            .get(&bucket, &format!("completed_pieces/{hex}"))
            .await?
        {
            Some(raw) => raw
                .chunks_exact(20)
                .map(|chunk| {
                    let mut bytes = [0u8; 20];
                    bytes.copy_from_slice(chunk);
                    PieceHash::new(bytes)
                })
                .collect(),
            None => HashSet::new(),
        };
        self.store
            .put(
                &bucket,
                &format!("torrents/{hex}"),
                descriptor.metainfo_bytes(),
            )
            .await?;

        let num_pieces = descriptor.num_pieces();
        let total_length = descriptor.total_length().max(1);
        let cp = Arc::new(Mutex::new(cp));
        let queued: Arc<Mutex<HashSet<u32>>> = Arc::new(Mutex::new(HashSet::new()));
        let permits = Arc::new(Semaphore::new(self.settings.concurrency));
        let mut uploads: JoinSet<()> = JoinSet::new();

        let mut last_persisted_size = prev_downloaded;
        let mut last_size_write: Option<Instant> = None;
        let mut last_persisted_cp = lock(&cp).len();
        let mut last_cp_write: Option<Instant> = None;
        let mut last_downloaded = 0u64;
        let mut written_at = Instant::now();
        let mut full_download_started = false;
        let mut forced = false;

        let closed = handle.closed();
        let mut ticker = tokio::time::interval(TICK);
        info!(info_hash = %self.hash, resumed_pieces = last_persisted_cp, prev_downloaded, "snapshot running");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = closed.cancelled() => {
                    debug!(info_hash = %self.hash, "handle closed, pausing snapshot");
                    break;
                }
                () = self.shutdown.cancelled() => {
                    debug!(info_hash = %self.hash, "shutdown, stopping snapshot");
                    break;
                }
            }

            let downloaded = prev_downloaded + self.served.load(Ordering::Relaxed);
            if downloaded > last_downloaded {
                last_downloaded = downloaded;
                written_at = Instant::now();
            }

            let cp_snapshot: HashSet<PieceHash> = lock(&cp).clone();
            let completed_num = (0..num_pieces)
                .filter(|&piece| {
                    storage.piece_complete(piece)
                        || descriptor
                            .piece_hash(piece)
                            .is_some_and(|hash| cp_snapshot.contains(hash))
                })
                .count() as u32;
            let completed_ratio = f64::from(completed_num) / f64::from(num_pieces.max(1));
            let ratio = downloaded as f64 / total_length as f64;

            if downloaded.saturating_sub(last_persisted_size) >= SIZE_PERSIST_DELTA
                && last_size_write
                    .map_or(true, |at| at.elapsed() >= self.settings.stat_write_delay)
            {
                self.store
                    .put(
                        &bucket,
                        &format!("downloaded_size/{hex}"),
                        Bytes::from(downloaded.to_string()),
                    )
                    .await?;
                last_persisted_size = downloaded;
                last_size_write = Some(Instant::now());
            }

            if cp_snapshot.len().saturating_sub(last_persisted_cp) >= CP_PERSIST_DELTA
                && last_cp_write
                    .map_or(true, |at| at.elapsed() >= self.settings.stat_write_delay)
            {
                self.store
                    .put(
                        &bucket,
                        &format!("completed_pieces/{hex}"),
                        encode_piece_set(&cp_snapshot),
                    )
                    .await?;
                last_persisted_cp = cp_snapshot.len();
                last_cp_write = Some(Instant::now());
            }

            // No byte progress for the whole watchdog window while the ratio
            // holds: force the swarm to fetch everything so the snapshot can
            // finish.
            if !forced
                && written_at.elapsed() >= self.settings.write_timeout
                && ratio >= self.settings.download_ratio
            {
                info!(info_hash = %self.hash, "write timeout elapsed, forcing full snapshot");
                forced = true;
                full_download_started = true;
                handle.download_all();
            }

            if !full_download_started
                && completed_ratio >= self.settings.start_full_download_threshold
            {
                info!(
                    info_hash = %self.hash,
                    completed_ratio,
                    "starting full download"
                );
                full_download_started = true;
                handle.download_all();
            }

            let uploading = forced
                || (ratio >= self.settings.download_ratio
                    && completed_ratio >= self.settings.start_threshold);
            if uploading {
                for piece in 0..num_pieces {
                    if !storage.piece_complete(piece) {
                        continue;
                    }
                    let Some(piece_hash) = descriptor.piece_hash(piece).copied() else {
                        continue;
                    };
                    if cp_snapshot.contains(&piece_hash) || !lock(&queued).insert(piece) {
                        continue;
                    }

                    let permits = Arc::clone(&permits);
                    let storage = Arc::clone(&storage);
                    let store = Arc::clone(&self.store);
                    let cp = Arc::clone(&cp);
                    let queued = Arc::clone(&queued);
                    let metrics = self.metrics.clone();
                    let descriptor = Arc::clone(&descriptor);
                    let piece_bucket = piece_bucket.clone();
                    let hex = hex.clone();
                    let hash = self.hash;
                    uploads.spawn(async move {
                        let _permit = permits.acquire_owned().await;
                        let Ok(_permit) = _permit else { return };
                        let Some(extent) = descriptor.piece_extent(piece) else {
                            return;
                        };
                        let mut buf = vec![0u8; extent.length as usize];
                        let read = storage.read_piece(piece, 0, &mut buf);
                        let outcome = match read {
                            Ok(n) if n == buf.len() => {
                                store
                                    .put(
                                        &piece_bucket,
                                        &format!("{hex}/{piece_hash}"),
                                        Bytes::from(buf),
                                    )
                                    .await
                            }
                            Ok(n) => Err(seedgate_core::Error::integrity(format!(
                                "short piece read: {n} of {}",
                                buf.len()
                            ))),
                            Err(err) => Err(seedgate_core::Error::io("read piece", err)),
                        };
                        match outcome {
                            Ok(()) => {
                                lock(&cp).insert(piece_hash);
                                metrics.inc_snapshot_upload();
                            }
                            Err(err) => {
                                // Leave the piece unqueued so the next tick
                                // retries it.
                                lock(&queued).remove(&piece);
                                metrics.inc_snapshot_upload_failure();
                                warn!(
                                    info_hash = %hash,
                                    piece,
                                    error = %err,
                                    "piece upload failed"
                                );
                            }
                        }
                    });
                }
            }

            while uploads.try_join_next().is_some() {}

            if lock(&cp).len() as u32 >= num_pieces {
                break;
            }
        }

        // Drain in-flight uploads, then record the final mirrored set; the
        // done sentinel is only legal when every piece made it.
        let drain = async {
            while uploads.join_next().await.is_some() {}
        };
        if tokio::time::timeout(DRAIN_GRACE, drain).await.is_err() {
            warn!(info_hash = %self.hash, "snapshot drain timed out");
            uploads.abort_all();
        }

        let final_cp: HashSet<PieceHash> = lock(&cp).clone();
        self.store
            .put(
                &bucket,
                &format!("completed_pieces/{hex}"),
                encode_piece_set(&final_cp),
            )
            .await?;
        self.store
            .put(
                &bucket,
                &format!("downloaded_size/{hex}"),
                Bytes::from((prev_downloaded + self.served.load(Ordering::Relaxed)).to_string()),
            )
            .await?;
        if final_cp.len() as u32 >= num_pieces {
            self.store
                .put(&bucket, &format!("done/{hex}"), Bytes::new())
                .await?;
            info!(info_hash = %self.hash, pieces = final_cp.len(), "snapshot complete");
        }
        Ok(())
    }
}

fn encode_piece_set(set: &HashSet<PieceHash>) -> Bytes {
    let mut blob = Vec::with_capacity(set.len() * 20);
    for hash in set {
        blob.extend_from_slice(hash.as_bytes());
    }
    Bytes::from(blob)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seedgate_config::S3Settings;
    use seedgate_core::{PieceStorage, TorrentEngine};
    use seedgate_test_support::{MemoryObjectStore, MemoryStorage, StubEngine, build_torrent};

    fn settings(bucket: &str) -> SnapshotSettings {
        SnapshotSettings {
            bucket: bucket.to_string(),
            bucket_spread: false,
            concurrency: 2,
            stat_write_delay: Duration::from_secs(0),
            write_timeout: Duration::from_secs(3600),
            start_threshold: 0.5,
            start_full_download_threshold: 0.75,
            download_ratio: 2.0,
            torrent_size_limit: 10_000_000_000,
            s3: S3Settings {
                access_key_id: String::new(),
                secret_access_key: String::new(),
                endpoint: String::new(),
                region: String::new(),
            },
        }
    }

    async fn seeded_handle(
        payload_piece_count: u32,
    ) -> (
        Arc<seedgate_test_support::StubHandle>,
        Arc<dyn TorrentHandle>,
        Arc<MemoryStorage>,
        InfoHash,
    ) {
        let content: Vec<u8> = (0..payload_piece_count * 16).map(|i| i as u8).collect();
        let (descriptor, payload) = build_torrent("demo", 16, &[("a.bin", &content)]);
        let storage = MemoryStorage::new(Arc::clone(&descriptor));
        storage.data_fill(&payload);
        let engine = StubEngine::new();
        let handle = engine
            .add_torrent(
                Arc::clone(&descriptor),
                storage.clone() as Arc<dyn PieceStorage>,
                None,
            )
            .await
            .expect("add");
        let hash = descriptor.info_hash();
        let stub = engine.handle(hash).expect("stub handle");
        (stub, handle, storage, hash)
    }

    async fn wait_until<F: Fn() -> bool>(cond: F) {
        for _ in 0..600 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("condition never became true");
    }

    #[tokio::test(start_paused = true)]
    async fn full_run_mirrors_every_piece_and_writes_done() {
        let (_stub, handle, storage, hash) = seeded_handle(4).await;
        for piece in 0..4 {
            storage.mark_complete(piece).expect("mark");
        }
        let store = MemoryObjectStore::new();
        let engine = SnapshotEngine::new(
            settings("pieces"),
            hash,
            &handle,
            store.clone(),
            Metrics::new().expect("metrics"),
            CancellationToken::new(),
            TaskTracker::new(),
        );

        // Served twice the torrent length: ratio 2.0 is met.
        engine.add(128);

        let hex = hash.hex();
        let done_key = format!("done/{hex}");
        let store_probe = store.clone();
        wait_until(move || store_probe.object("pieces", &done_key).is_some()).await;

        let cp = store
            .object("pieces", &format!("completed_pieces/{hex}"))
            .expect("completed pieces");
        assert_eq!(cp.len(), 4 * 20, "one 20-byte hash per piece");
        assert!(store.object("pieces", &format!("touch/{hex}")).is_some());
        assert!(store.object("pieces", &format!("torrents/{hex}")).is_some());

        let piece_keys: Vec<String> = store
            .keys("pieces")
            .into_iter()
            .filter(|key| key.starts_with(&format!("{hex}/")))
            .collect();
        assert_eq!(piece_keys.len(), 4);
        let probe = engine.clone();
        wait_until(move || probe.is_detached()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn thresholds_gate_uploads() {
        let (_stub, handle, storage, hash) = seeded_handle(4).await;
        storage.mark_complete(0).expect("mark");
        let store = MemoryObjectStore::new();
        let engine = SnapshotEngine::new(
            settings("pieces"),
            hash,
            &handle,
            store.clone(),
            Metrics::new().expect("metrics"),
            CancellationToken::new(),
            TaskTracker::new(),
        );

        // Ratio is satisfied but completion (1/4) is below the 0.5 start
        // threshold: side objects are written, pieces are not.
        engine.add(1_000);
        let hex = hash.hex();
        let store_probe = store.clone();
        let touch_key = format!("touch/{hex}");
        wait_until(move || store_probe.object("pieces", &touch_key).is_some()).await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        let piece_keys: Vec<String> = store
            .keys("pieces")
            .into_iter()
            .filter(|key| key.starts_with(&format!("{hex}/")))
            .collect();
        assert!(piece_keys.is_empty(), "no uploads below start threshold");
        assert!(store.object("pieces", &format!("done/{hex}")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn low_served_ratio_blocks_uploads() {
        let (_stub, handle, storage, hash) = seeded_handle(4).await;
        for piece in 0..4 {
            storage.mark_complete(piece).expect("mark");
        }
        let store = MemoryObjectStore::new();
        let engine = SnapshotEngine::new(
            settings("pieces"),
            hash,
            &handle,
            store.clone(),
            Metrics::new().expect("metrics"),
            CancellationToken::new(),
            TaskTracker::new(),
        );

        // One byte served: ratio far below 2.0.
        engine.add(1);
        let hex = hash.hex();
        let store_probe = store.clone();
        let touch_key = format!("touch/{hex}");
        wait_until(move || store_probe.object("pieces", &touch_key).is_some()).await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        let piece_keys: Vec<String> = store
            .keys("pieces")
            .into_iter()
            .filter(|key| key.starts_with(&format!("{hex}/")))
            .collect();
        assert!(piece_keys.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn done_sentinel_short_circuits() {
        let (_stub, handle, storage, hash) = seeded_handle(2).await;
        for piece in 0..2 {
            storage.mark_complete(piece).expect("mark");
        }
        let store = MemoryObjectStore::new();
        store
            .put("pieces", &format!("done/{}", hash.hex()), Bytes::new())
            .await
            .expect("seed done");
        let puts_before = store.puts();

        let engine = SnapshotEngine::new(
            settings("pieces"),
            hash,
            &handle,
            store.clone(),
            Metrics::new().expect("metrics"),
            CancellationToken::new(),
            TaskTracker::new(),
        );
        engine.add(64);

        let probe = engine.clone();
        wait_until(move || probe.is_detached()).await;
        // Only the touch object was written after the sentinel check.
        assert_eq!(store.puts(), puts_before + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn oversize_torrents_are_skipped() {
        let (_stub, handle, storage, hash) = seeded_handle(2).await;
        for piece in 0..2 {
            storage.mark_complete(piece).expect("mark");
        }
        let mut tuned = settings("pieces");
        tuned.torrent_size_limit = 8;
        let store = MemoryObjectStore::new();
        let engine = SnapshotEngine::new(
            tuned,
            hash,
            &handle,
            store.clone(),
            Metrics::new().expect("metrics"),
            CancellationToken::new(),
            TaskTracker::new(),
        );
        engine.add(1_000);
        let probe = engine.clone();
        wait_until(move || probe.is_detached()).await;
        assert!(store.keys("pieces").is_empty(), "nothing recorded for oversize torrents");
    }

    #[tokio::test(start_paused = true)]
    async fn resume_only_uploads_missing_pieces() {
        let (_stub, handle, storage, hash) = seeded_handle(4).await;
        for piece in 0..4 {
            storage.mark_complete(piece).expect("mark");
        }
        let descriptor = handle.descriptor();
        let store = MemoryObjectStore::new();
        let hex = hash.hex();

        // Pieces 0 and 1 were mirrored by a previous activation.
        let mut blob = Vec::new();
        blob.extend_from_slice(descriptor.piece_hash(0).unwrap().as_bytes());
        blob.extend_from_slice(descriptor.piece_hash(1).unwrap().as_bytes());
        store
            .put("pieces", &format!("completed_pieces/{hex}"), Bytes::from(blob))
            .await
            .expect("seed cp");

        let engine = SnapshotEngine::new(
            settings("pieces"),
            hash,
            &handle,
            store.clone(),
            Metrics::new().expect("metrics"),
            CancellationToken::new(),
            TaskTracker::new(),
        );
        engine.add(128);

        let store_probe = store.clone();
        let done_key = format!("done/{hex}");
        wait_until(move || store_probe.object("pieces", &done_key).is_some()).await;

        let piece_keys: Vec<String> = store
            .keys("pieces")
            .into_iter()
            .filter(|key| key.starts_with(&format!("{hex}/")))
            .collect();
        assert_eq!(piece_keys.len(), 2, "only the missing pieces are uploaded");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_uploads_are_retried() {
        let (_stub, handle, storage, hash) = seeded_handle(2).await;
        for piece in 0..2 {
            storage.mark_complete(piece).expect("mark");
        }
        let store = MemoryObjectStore::new();
        let hex = hash.hex();
        // Piece uploads fail until the injection is cleared; side objects
        // keep succeeding.
        store.fail_puts_matching(Some(&format!("{hex}/")));

        let engine = SnapshotEngine::new(
            settings("pieces"),
            hash,
            &handle,
            store.clone(),
            Metrics::new().expect("metrics"),
            CancellationToken::new(),
            TaskTracker::new(),
        );
        engine.add(64);

        let store_probe = store.clone();
        let torrents_key = format!("torrents/{hex}");
        wait_until(move || store_probe.object("pieces", &torrents_key).is_some()).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(
            store.object("pieces", &format!("done/{hex}")).is_none(),
            "engine must not finish while uploads fail"
        );

        store.fail_puts_matching(None);
        let store_probe = store.clone();
        let done_key = format!("done/{hex}");
        wait_until(move || store_probe.object("pieces", &done_key).is_some()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn full_download_starts_at_threshold() {
        let (stub, handle, storage, hash) = seeded_handle(4).await;
        for piece in 0..3 {
            storage.mark_complete(piece).expect("mark");
        }
        let store = MemoryObjectStore::new();
        let engine = SnapshotEngine::new(
            settings("pieces"),
            hash,
            &handle,
            store.clone(),
            Metrics::new().expect("metrics"),
            CancellationToken::new(),
            TaskTracker::new(),
        );
        // Below the upload ratio, but 3/4 complete crosses the 0.75 full
        // download threshold.
        engine.add(1);

        let probe = Arc::clone(&stub);
        wait_until(move || probe.download_all_requested()).await;
        let hex = hash.hex();
        let piece_keys: Vec<String> = store
            .keys("pieces")
            .into_iter()
            .filter(|key| key.starts_with(&format!("{hex}/")))
            .collect();
        assert!(piece_keys.is_empty(), "ratio gate still blocks uploads");
    }
}
