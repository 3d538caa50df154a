//! Lazy, refcounted registry of active torrents.
//!
//! A torrent is activated on first `get`, watched by a stats probe while
//! open, and dropped after an idle TTL. Expiry is serialized with `get`
//! through the map mutex: either the `get` resets the timer first or the
//! expiry removes the entry and the next `get` reactivates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use seedgate_core::{
    Error, InfoHash, PieceStorage, Result, TorrentDescriptor, TorrentDropper, TorrentEngine,
    TorrentHandle,
};
use seedgate_storage::{PieceStore, resolve_dir};
use seedgate_telemetry::{Metrics, metrics::StallPhase};

use crate::meta::MetaSource;
use crate::vault::Vault;

/// Stats sampling cadence for the activation probes.
const PROBE_TICK: Duration = Duration::from_millis(50);

/// Probe ticks per stall-accounting second.
const TICKS_PER_SECOND: u32 = 20;

/// Opens the piece storage for a descriptor; a seam so tests can substitute
/// heap-backed storage.
#[async_trait]
pub trait StorageFactory: Send + Sync {
    /// Open (or create) storage for `descriptor`.
    async fn open(&self, descriptor: Arc<TorrentDescriptor>) -> Result<Arc<dyn PieceStorage>>;
}

/// Production factory mapping torrents into the data directory.
pub struct DiskStorageFactory {
    base: String,
}

impl DiskStorageFactory {
    /// Factory over the configured data directory base.
    #[must_use]
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }
}

#[async_trait]
impl StorageFactory for DiskStorageFactory {
    async fn open(&self, descriptor: Arc<TorrentDescriptor>) -> Result<Arc<dyn PieceStorage>> {
        let dir = resolve_dir(&self.base, descriptor.info_hash())?;
        let store = PieceStore::open(dir, descriptor).await?;
        Ok(store)
    }
}

/// Tunables for the map.
#[derive(Debug, Clone)]
pub struct TorrentMapConfig {
    /// Idle TTL after which an unused handle is dropped.
    pub idle_ttl: Duration,
}

impl Default for TorrentMapConfig {
    fn default() -> Self {
        Self {
            idle_ttl: Duration::from_secs(600),
        }
    }
}

struct Entry {
    cell: OnceCell<Arc<dyn TorrentHandle>>,
    last_access: Mutex<Instant>,
    closed: AtomicBool,
    finalized: AtomicBool,
}

impl Entry {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            cell: OnceCell::new(),
            last_access: Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
        })
    }

    fn touch(&self) {
        *lock(&self.last_access) = Instant::now();
    }

    fn last_access(&self) -> Instant {
        *lock(&self.last_access)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Concurrent map `InfoHash -> live torrent handle` with idle TTL.
pub struct TorrentMap {
    entries: Mutex<HashMap<InfoHash, Arc<Entry>>>,
    engine: Arc<dyn TorrentEngine>,
    meta: Arc<MetaSource>,
    vault: Option<Arc<Vault>>,
    storage: Arc<dyn StorageFactory>,
    metrics: Metrics,
    config: TorrentMapConfig,
}

impl TorrentMap {
    /// Assemble the map over its collaborators.
    #[must_use]
    pub fn new(
        engine: Arc<dyn TorrentEngine>,
        meta: Arc<MetaSource>,
        vault: Option<Arc<Vault>>,
        storage: Arc<dyn StorageFactory>,
        metrics: Metrics,
        config: TorrentMapConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            engine,
            meta,
            vault,
            storage,
            metrics,
            config,
        })
    }

    /// The metainfo source backing activations.
    #[must_use]
    pub fn meta(&self) -> &Arc<MetaSource> {
        &self.meta
    }

    /// Return the live handle for `hash`, activating the torrent on first
    /// access. Concurrent calls for an absent key share one activation.
    pub async fn get(self: &Arc<Self>, hash: InfoHash) -> Result<Arc<dyn TorrentHandle>> {
        loop {
            let entry = {
                let mut entries = lock(&self.entries);
                match entries.get(&hash) {
                    Some(existing) if !existing.is_closed() => {
                        existing.touch();
                        Arc::clone(existing)
                    }
                    _ => {
                        let fresh = Entry::new();
                        entries.insert(hash, Arc::clone(&fresh));
                        fresh
                    }
                }
            };

            let init = entry
                .cell
                .get_or_try_init(|| self.activate(hash, Arc::clone(&entry)))
                .await;

            match init {
                Ok(handle) => {
                    if entry.is_closed() {
                        // Expiry or an explicit drop won the race; the loser
                        // retries against a fresh entry.
                        self.finalize(&entry).await;
                        continue;
                    }
                    return Ok(Arc::clone(handle));
                }
                Err(err) => {
                    let mut entries = lock(&self.entries);
                    if let Some(current) = entries.get(&hash) {
                        if Arc::ptr_eq(current, &entry) {
                            entries.remove(&hash);
                        }
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Reset the idle timer without activating; a no-op for absent keys.
    pub fn touch(&self, hash: InfoHash) {
        let entries = lock(&self.entries);
        if let Some(entry) = entries.get(&hash) {
            entry.touch();
        }
    }

    /// Peek at the live handle without activating. Resets the idle timer on
    /// a hit.
    #[must_use]
    pub fn try_get(&self, hash: InfoHash) -> Option<Arc<dyn TorrentHandle>> {
        let entries = lock(&self.entries);
        let entry = entries.get(&hash)?;
        if entry.is_closed() {
            return None;
        }
        let handle = entry.cell.get()?;
        entry.touch();
        Some(Arc::clone(handle))
    }

    /// Close every live handle and shut the engine down.
    pub async fn shutdown(&self) {
        let drained: Vec<Arc<Entry>> = {
            let mut entries = lock(&self.entries);
            entries.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            entry.closed.store(true, Ordering::Release);
            self.finalize(&entry).await;
        }
        self.engine.shutdown().await;
    }

    async fn activate(
        self: &Arc<Self>,
        hash: InfoHash,
        entry: Arc<Entry>,
    ) -> Result<Arc<dyn TorrentHandle>> {
        info!(info_hash = %hash, "activating torrent");
        let outcome = self.activate_inner(hash).await;
        match outcome {
            Ok(handle) => {
                self.metrics.inc_active_torrents();
                self.spawn_probe(hash, Arc::clone(&handle));
                self.spawn_expiry(hash, entry);
                Ok(handle)
            }
            Err(err) => {
                self.metrics.inc_activation_failure();
                warn!(info_hash = %hash, error = %err, "activation failed");
                Err(err)
            }
        }
    }

    async fn activate_inner(&self, hash: InfoHash) -> Result<Arc<dyn TorrentHandle>> {
        let descriptor = self.meta.descriptor(hash).await?;
        let storage = self.storage.open(Arc::clone(&descriptor)).await?;
        let webseed = match &self.vault {
            Some(vault) => match vault.webseed_url(hash).await {
                Ok(url) => url,
                Err(err) => {
                    warn!(info_hash = %hash, error = %err, "webseed lookup failed");
                    None
                }
            },
            None => None,
        };
        self.engine.add_torrent(descriptor, storage, webseed).await
    }

    fn spawn_expiry(self: &Arc<Self>, hash: InfoHash, entry: Arc<Entry>) {
        let map = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let deadline = entry.last_access() + map.config.idle_ttl;
                if deadline > Instant::now() {
                    tokio::time::sleep_until(deadline).await;
                    continue;
                }
                let expired = {
                    let mut entries = lock(&map.entries);
                    match entries.get(&hash) {
                        Some(current) if Arc::ptr_eq(current, &entry) => {
                            if entry.last_access() + map.config.idle_ttl <= Instant::now() {
                                entry.closed.store(true, Ordering::Release);
                                entries.remove(&hash);
                                true
                            } else {
                                false
                            }
                        }
                        // Someone else already removed or replaced the entry;
                        // make sure its handle is finalized and stop.
                        _ => {
                            entry.closed.store(true, Ordering::Release);
                            true
                        }
                    }
                };
                if expired {
                    info!(info_hash = %hash, "idle torrent expired");
                    map.finalize(&entry).await;
                    return;
                }
            }
        });
    }

    async fn finalize(&self, entry: &Arc<Entry>) {
        if entry.finalized.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = entry.cell.get() {
            handle.close().await;
        }
        self.metrics.dec_active_torrents();
    }

    fn spawn_probe(&self, hash: InfoHash, handle: Arc<dyn TorrentHandle>) {
        let metrics = self.metrics.clone();
        let closed = handle.closed();
        tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker = tokio::time::interval(PROBE_TICK);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            let mut first_peer_seen = false;
            let mut ten_peers_seen = false;
            let mut thirty_peers_seen = false;
            let mut first_byte_seen = false;
            let mut ticks: u32 = 0;
            let mut bytes_at_second_start: u64 = 0;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    () = closed.cancelled() => {
                        debug!(info_hash = %hash, "probe stopped");
                        return;
                    }
                }
                let stats = handle.stats();
                let elapsed = started.elapsed();
                if !first_peer_seen && stats.active_peers >= 1 {
                    first_peer_seen = true;
                    metrics.observe_first_peer(elapsed);
                }
                if !ten_peers_seen && stats.active_peers >= 10 {
                    ten_peers_seen = true;
                    metrics.observe_ten_peers(elapsed);
                }
                if !thirty_peers_seen && stats.active_peers >= 30 {
                    thirty_peers_seen = true;
                    metrics.observe_thirty_peers(elapsed);
                }
                if !first_byte_seen && stats.bytes_completed > 0 {
                    first_byte_seen = true;
                    metrics.observe_first_byte(elapsed);
                }

                ticks += 1;
                if ticks % TICKS_PER_SECOND == 0 {
                    let grew = stats.bytes_completed > bytes_at_second_start;
                    let phase = if stats.active_peers == 0 && stats.bytes_completed == 0 {
                        Some(StallPhase::Discovery)
                    } else if stats.bytes_completed == 0 {
                        Some(StallPhase::Idle)
                    } else if !grew {
                        Some(StallPhase::Download)
                    } else {
                        None
                    };
                    if let Some(phase) = phase {
                        metrics.add_stall_second(phase);
                    }
                    bytes_at_second_start = stats.bytes_completed;
                }
            }
        });
    }
}

#[async_trait]
impl TorrentDropper for TorrentMap {
    async fn drop_torrent(&self, hash: InfoHash) {
        let entry = {
            let mut entries = lock(&self.entries);
            entries.remove(&hash)
        };
        if let Some(entry) = entry {
            entry.closed.store(true, Ordering::Release);
            self.finalize(&entry).await;
            info!(info_hash = %hash, "torrent detached");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
