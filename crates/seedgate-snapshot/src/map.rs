//! Per-torrent snapshot engines, created on demand and aged out after an
//! hour without traffic.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use seedgate_config::SnapshotSettings;
use seedgate_core::{InfoHash, ObjectStore, Result};
use seedgate_session::TorrentMap;
use seedgate_telemetry::Metrics;

use crate::engine::SnapshotEngine;

/// Idle window before an engine is evicted from the map.
const ENGINE_TTI: Duration = Duration::from_secs(60 * 60);

/// Registry of live snapshot engines keyed by info-hash.
pub struct SnapshotMap {
    map: Arc<TorrentMap>,
    store: Arc<dyn ObjectStore>,
    settings: SnapshotSettings,
    metrics: Metrics,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    engines: Cache<InfoHash, Arc<SnapshotEngine>>,
}

impl SnapshotMap {
    /// Map over the torrent map and object store.
    #[must_use]
    pub fn new(
        map: Arc<TorrentMap>,
        store: Arc<dyn ObjectStore>,
        settings: SnapshotSettings,
        metrics: Metrics,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            map,
            store,
            settings,
            metrics,
            shutdown,
            tracker: TaskTracker::new(),
            engines: Cache::builder().time_to_idle(ENGINE_TTI).build(),
        })
    }

    /// Wait for every in-flight snapshot run to wind down. Called once
    /// during shutdown, after the token has been cancelled.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// The engine for `hash`, building one against the current live handle
    /// when absent or when the cached engine has detached.
    pub async fn get(&self, hash: InfoHash) -> Result<Arc<SnapshotEngine>> {
        if let Some(engine) = self.engines.get(&hash) {
            if !engine.is_detached() {
                return Ok(engine);
            }
            self.engines.invalidate(&hash);
        }
        let handle = self.map.get(hash).await?;
        let engine = SnapshotEngine::new(
            self.settings.clone(),
            hash,
            &handle,
            Arc::clone(&self.store),
            self.metrics.clone(),
            self.shutdown.clone(),
            self.tracker.clone(),
        );
        self.engines.insert(hash, Arc::clone(&engine));
        Ok(engine)
    }

    /// Refresh the idle timer for `hash`.
    pub fn touch(&self, hash: InfoHash) {
        let _ = self.engines.get(&hash);
    }
}
