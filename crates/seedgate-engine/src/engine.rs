//! Engine and handle types.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use leaky_bucket::RateLimiter;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use seedgate_core::{
    FileReader, PieceState, PiecePriority, PieceStorage, ReaderOptions, Result, SwarmStats,
    TorrentDescriptor, TorrentEngine, TorrentHandle,
};

use crate::fetch;
use crate::reader::PieceWaitReader;

/// Default read-ahead window when the caller supplies no policy.
const DEFAULT_WINDOW: u64 = 32 << 20;

/// A reader's current appetite, in payload-global coordinates.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Demand {
    pub(crate) position: u64,
    pub(crate) window: u64,
}

/// State shared between the handle, its readers, and the fetch task.
pub(crate) struct Shared {
    pub(crate) descriptor: Arc<TorrentDescriptor>,
    pub(crate) storage: Arc<dyn PieceStorage>,
    pub(crate) demand: Mutex<HashMap<u64, Demand>>,
    pub(crate) completion_tx: watch::Sender<u64>,
    pub(crate) fetching: AtomicBool,
    next_stream: AtomicU64,
}

impl Shared {
    pub(crate) fn demand_snapshot(&self) -> Vec<Demand> {
        let mut demands: Vec<Demand> = self.lock_demand().values().copied().collect();
        demands.sort_by_key(|demand| demand.position);
        demands
    }

    pub(crate) fn set_demand(&self, stream_id: u64, demand: Demand) {
        self.lock_demand().insert(stream_id, demand);
    }

    pub(crate) fn clear_demand(&self, stream_id: u64) {
        self.lock_demand().remove(&stream_id);
    }

    pub(crate) fn notify_piece(&self) {
        self.completion_tx.send_modify(|count| *count += 1);
    }

    fn lock_demand(&self) -> MutexGuard<'_, HashMap<u64, Demand>> {
        match self.demand.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Webseed-only torrent engine.
pub struct WebseedEngine {
    client: reqwest::Client,
    limiter: Option<(Arc<RateLimiter>, usize)>,
}

impl WebseedEngine {
    /// Engine with an optional global download cap in bytes per second.
    #[must_use]
    pub fn new(client: reqwest::Client, download_rate: Option<u64>) -> Arc<Self> {
        let limiter = download_rate.map(|rate| {
            let capacity = usize::try_from(rate.max(1)).unwrap_or(usize::MAX);
            let refill = (capacity / 10).max(1);
            (
                Arc::new(
                    RateLimiter::builder()
                        .max(capacity)
                        .initial(capacity)
                        .refill(refill)
                        .interval(Duration::from_millis(100))
                        .build(),
                ),
                capacity,
            )
        });
        Arc::new(Self { client, limiter })
    }
}

#[async_trait]
impl TorrentEngine for WebseedEngine {
    async fn add_torrent(
        &self,
        descriptor: Arc<TorrentDescriptor>,
        storage: Arc<dyn PieceStorage>,
        webseed: Option<String>,
    ) -> Result<Arc<dyn TorrentHandle>> {
        let (completion_tx, _) = watch::channel(u64::from(storage.completed_pieces()));
        let shared = Arc::new(Shared {
            descriptor: Arc::clone(&descriptor),
            storage,
            demand: Mutex::new(HashMap::new()),
            completion_tx,
            fetching: AtomicBool::new(webseed.is_some()),
            next_stream: AtomicU64::new(0),
        });
        let handle = Arc::new(WebseedHandle {
            shared: Arc::clone(&shared),
            closed: CancellationToken::new(),
            download_all: AtomicBool::new(false),
        });

        if let Some(url) = webseed {
            info!(info_hash = %descriptor.info_hash(), url, "fetching from webseed");
            let client = self.client.clone();
            let limiter = self.limiter.clone();
            let closed = handle.closed.clone();
            tokio::spawn(async move {
                fetch::run(shared, client, limiter, url, closed).await;
            });
        }
        Ok(handle)
    }

    async fn shutdown(&self) {}
}

/// Live handle over the shared state.
pub struct WebseedHandle {
    shared: Arc<Shared>,
    closed: CancellationToken,
    download_all: AtomicBool,
}

#[async_trait]
impl TorrentHandle for WebseedHandle {
    fn descriptor(&self) -> Arc<TorrentDescriptor> {
        Arc::clone(&self.shared.descriptor)
    }

    fn storage(&self) -> Arc<dyn PieceStorage> {
        Arc::clone(&self.shared.storage)
    }

    fn stats(&self) -> SwarmStats {
        let descriptor = &self.shared.descriptor;
        let mut bytes_completed = 0;
        for piece in 0..descriptor.num_pieces() {
            if self.shared.storage.piece_complete(piece) {
                if let Some(extent) = descriptor.piece_extent(piece) {
                    bytes_completed += extent.length;
                }
            }
        }
        let fetching = self.shared.fetching.load(Ordering::Relaxed);
        SwarmStats {
            bytes_completed,
            active_peers: u32::from(fetching),
            seeders: u32::from(fetching),
            checking: false,
        }
    }

    fn piece_states(&self) -> Vec<PieceState> {
        let descriptor = &self.shared.descriptor;
        let piece_length = descriptor.piece_length();
        let demands = self.shared.demand_snapshot();
        (0..descriptor.num_pieces())
            .map(|piece| {
                let complete = self.shared.storage.piece_complete(piece);
                let start = u64::from(piece) * piece_length;
                let end = start + piece_length;
                let mut priority = PiecePriority::None;
                for demand in &demands {
                    if demand.position >= start && demand.position < end {
                        priority = PiecePriority::High;
                        break;
                    }
                    if start >= demand.position && start < demand.position + demand.window {
                        priority = PiecePriority::Normal;
                    }
                }
                PieceState { complete, priority }
            })
            .collect()
    }

    async fn reader(
        &self,
        file_index: usize,
        options: ReaderOptions,
    ) -> Result<Box<dyn FileReader>> {
        let file = self
            .shared
            .descriptor
            .files()
            .get(file_index)
            .ok_or_else(|| seedgate_core::Error::not_found("file index out of range"))?;
        let stream_id = self.shared.next_stream.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(PieceWaitReader::new(
            Arc::clone(&self.shared),
            stream_id,
            file.offset,
            file.length,
            options.readahead,
            DEFAULT_WINDOW,
        )))
    }

    fn download_all(&self) {
        // The fetch loop already works through every remaining piece; this
        // widens the demand so reader-driven prioritization no longer
        // narrows it.
        self.download_all.store(true, Ordering::Relaxed);
        self.shared.set_demand(
            u64::MAX,
            Demand {
                position: 0,
                window: self.shared.descriptor.total_length(),
            },
        );
    }

    async fn close(&self) {
        if !self.closed.is_cancelled() {
            self.closed.cancel();
            self.shared.storage.close();
        }
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }
}
