//! Narrow ports through which the gateway consumes its external
//! collaborators: the BitTorrent protocol engine, the metainfo suppliers, and
//! the object store.

use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncSeek};
use tokio_util::sync::CancellationToken;

use crate::descriptor::TorrentDescriptor;
use crate::error::Result;
use crate::hash::InfoHash;

/// Piece priority as surfaced to stat consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PiecePriority {
    /// The engine is not requesting the piece.
    #[default]
    None,
    /// Default request priority.
    Normal,
    /// Urgent, reader-driven priority.
    High,
}

/// Point-in-time state of a single piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PieceState {
    /// Whether the piece has been downloaded and verified.
    pub complete: bool,
    /// Current request priority.
    pub priority: PiecePriority,
}

/// Aggregate swarm statistics for an active torrent.
#[derive(Debug, Clone, Copy, Default)]
pub struct SwarmStats {
    /// Verified bytes downloaded so far.
    pub bytes_completed: u64,
    /// Currently connected peers.
    pub active_peers: u32,
    /// Connected peers that are seeding.
    pub seeders: u32,
    /// Whether the engine is still verifying restored on-disk state.
    pub checking: bool,
}

/// Function computing the desired read-ahead from
/// `(current_pos, contiguous_read_start_pos)`.
pub type ReadaheadFn = Arc<dyn Fn(u64, u64) -> u64 + Send + Sync>;

/// Options for an engine-backed file reader.
#[derive(Clone, Default)]
pub struct ReaderOptions {
    /// Verify pieces on arrival and prefer low-latency reads.
    pub responsive: bool,
    /// Dynamic read-ahead policy supplied by the HTTP layer.
    pub readahead: Option<ReadaheadFn>,
}

impl std::fmt::Debug for ReaderOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderOptions")
            .field("responsive", &self.responsive)
            .field("readahead", &self.readahead.is_some())
            .finish()
    }
}

/// Seekable byte stream over one file of an active torrent. Reads block
/// (pend) until the covering piece has been downloaded and verified.
pub trait FileReader: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> FileReader for T {}

/// Piece-granular storage owned by a torrent handle.
///
/// Implementations present the concatenation of the torrent's files as a
/// single address space; piece I/O spanning file boundaries is split
/// internally. All methods are synchronous because the backing store is
/// memory-mapped; callers on the async runtime wrap them in blocking tasks
/// when the touched range may fault to disk.
pub trait PieceStorage: Send + Sync {
    /// Descriptor of the stored torrent.
    fn descriptor(&self) -> &Arc<TorrentDescriptor>;

    /// Read from piece `index` starting at `offset` within the piece.
    fn read_piece(&self, index: u32, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Write into piece `index` starting at `offset` within the piece.
    fn write_piece(&self, index: u32, offset: u64, data: &[u8]) -> io::Result<usize>;

    /// Whether piece `index` is recorded complete.
    fn piece_complete(&self, index: u32) -> bool;

    /// Record piece `index` as complete, durably.
    fn mark_complete(&self, index: u32) -> Result<()>;

    /// Record piece `index` as incomplete after detected corruption.
    fn mark_not_complete(&self, index: u32) -> Result<()>;

    /// Number of pieces currently recorded complete.
    fn completed_pieces(&self) -> u32;

    /// Synchronize dirty regions to disk.
    fn flush(&self) -> io::Result<()>;

    /// Unmap regions, close files and the completion database. Idempotent.
    fn close(&self);

    /// Directory holding the torrent's on-disk state.
    fn dir(&self) -> &Path;
}

/// Live handle to a torrent that has joined the swarm.
#[async_trait]
pub trait TorrentHandle: Send + Sync {
    /// Descriptor of the torrent.
    fn descriptor(&self) -> Arc<TorrentDescriptor>;

    /// The piece storage owned by this handle.
    fn storage(&self) -> Arc<dyn PieceStorage>;

    /// Current swarm statistics.
    fn stats(&self) -> SwarmStats;

    /// Per-piece states, indexed by piece position.
    fn piece_states(&self) -> Vec<PieceState>;

    /// Open a reader over file `file_index`.
    async fn reader(
        &self,
        file_index: usize,
        options: ReaderOptions,
    ) -> Result<Box<dyn FileReader>>;

    /// Ask the engine to download every remaining piece.
    fn download_all(&self);

    /// Detach from the swarm and close the storage. Idempotent.
    async fn close(&self);

    /// Token cancelled once the handle has been closed.
    fn closed(&self) -> CancellationToken;
}

impl std::fmt::Debug for dyn TorrentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TorrentHandle")
            .field("descriptor", &self.descriptor())
            .finish()
    }
}

/// The BitTorrent protocol engine, consumed as an external capability.
#[async_trait]
pub trait TorrentEngine: Send + Sync {
    /// Join the swarm for `descriptor`, storing pieces in `storage`.
    ///
    /// `webseed`, when present, is an HTTP URL the engine may fetch bytes
    /// from as if it were a peer.
    async fn add_torrent(
        &self,
        descriptor: Arc<TorrentDescriptor>,
        storage: Arc<dyn PieceStorage>,
        webseed: Option<String>,
    ) -> Result<Arc<dyn TorrentHandle>>;

    /// Release engine-wide resources.
    async fn shutdown(&self);
}

/// Remote metainfo supplier (the "torrent-store" RPC).
#[async_trait]
pub trait MetainfoStore: Send + Sync {
    /// Fetch the bencoded metainfo for `hash`.
    async fn pull(&self, hash: InfoHash) -> Result<Bytes>;
}

/// Content-addressed object store used by the snapshot engine.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object, `None` when absent.
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Bytes>>;

    /// Store an object. Implementations attach a `Content-MD5` of the body.
    async fn put(&self, bucket: &str, key: &str, body: Bytes) -> Result<()>;

    /// Whether an object exists.
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool>;

    /// Create the bucket if it does not already exist.
    async fn ensure_bucket(&self, bucket: &str) -> Result<()>;
}

/// Detaches a torrent from the engine; implemented by the torrent map and
/// consumed by the disk cleaner.
#[async_trait]
pub trait TorrentDropper: Send + Sync {
    /// Drop the torrent's live handle, if any.
    async fn drop_torrent(&self, hash: InfoHash);
}
