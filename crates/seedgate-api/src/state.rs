//! Shared application state wired through the routers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;

use seedgate_session::{BucketPool, StatAggregator, TorrentMap};
use seedgate_snapshot::SnapshotMap;
use seedgate_storage::{FileCacheMap, TouchMap};
use seedgate_telemetry::Metrics;

/// Dependencies shared by every request handler.
pub struct ApiState {
    /// Torrent activation and lifecycle.
    pub map: Arc<TorrentMap>,
    /// Progress frame producer.
    pub stat: Arc<StatAggregator>,
    /// Coalesced touch-file updater.
    pub touch: Arc<TouchMap>,
    /// Completed-file short circuit.
    pub cache: Arc<FileCacheMap>,
    /// Per-session token buckets.
    pub buckets: Arc<BucketPool>,
    /// Snapshot mirroring, absent when disabled.
    pub snapshots: Option<Arc<SnapshotMap>>,
    /// Shared metrics registry.
    pub metrics: Metrics,
    /// Cancelled when the process is shutting down.
    pub shutdown: CancellationToken,
    last_activity: AtomicU64,
}

impl ApiState {
    /// Assemble the state.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        map: Arc<TorrentMap>,
        stat: Arc<StatAggregator>,
        touch: Arc<TouchMap>,
        cache: Arc<FileCacheMap>,
        buckets: Arc<BucketPool>,
        snapshots: Option<Arc<SnapshotMap>>,
        metrics: Metrics,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let state = Self {
            map,
            stat,
            touch,
            cache,
            buckets,
            snapshots,
            metrics,
            shutdown,
            last_activity: AtomicU64::new(now_unix()),
        };
        state.mark_activity();
        Arc::new(state)
    }

    /// Record data-port I/O; feeds the scale-to-zero grace listener.
    pub fn mark_activity(&self) {
        self.last_activity.store(now_unix(), Ordering::Relaxed);
    }

    /// Seconds since the last data-port I/O.
    #[must_use]
    pub fn idle_seconds(&self) -> u64 {
        now_unix().saturating_sub(self.last_activity.load(Ordering::Relaxed))
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
