//! Scriptable stub implementation of the torrent engine port.

use std::collections::HashMap;
use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};
use tokio_util::sync::CancellationToken;

use seedgate_core::{
    FileReader, InfoHash, PieceState, PiecePriority, PieceStorage, ReaderOptions, Result,
    SwarmStats, TorrentDescriptor, TorrentEngine, TorrentHandle,
};

/// Stub engine recording admissions and handing out [`StubHandle`]s.
#[derive(Default)]
pub struct StubEngine {
    adds: AtomicU64,
    handles: Mutex<HashMap<InfoHash, Arc<StubHandle>>>,
    webseeds: Mutex<HashMap<InfoHash, Option<String>>>,
}

impl StubEngine {
    /// Fresh engine.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// How many torrents have been admitted.
    #[must_use]
    pub fn adds(&self) -> u64 {
        self.adds.load(Ordering::Relaxed)
    }

    /// The live handle for `hash`, if admitted.
    #[must_use]
    pub fn handle(&self, hash: InfoHash) -> Option<Arc<StubHandle>> {
        self.handles.lock().unwrap().get(&hash).cloned()
    }

    /// The webseed URL passed at admission, if any.
    #[must_use]
    pub fn webseed(&self, hash: InfoHash) -> Option<Option<String>> {
        self.webseeds.lock().unwrap().get(&hash).cloned()
    }
}

#[async_trait]
impl TorrentEngine for StubEngine {
    async fn add_torrent(
        &self,
        descriptor: Arc<TorrentDescriptor>,
        storage: Arc<dyn PieceStorage>,
        webseed: Option<String>,
    ) -> Result<Arc<dyn TorrentHandle>> {
        self.adds.fetch_add(1, Ordering::Relaxed);
        let hash = descriptor.info_hash();
        let handle = Arc::new(StubHandle {
            descriptor,
            storage,
            stats: Mutex::new(SwarmStats::default()),
            reader_opens: AtomicU64::new(0),
            download_all: AtomicBool::new(false),
            closed: CancellationToken::new(),
        });
        self.handles.lock().unwrap().insert(hash, Arc::clone(&handle));
        self.webseeds.lock().unwrap().insert(hash, webseed);
        Ok(handle)
    }

    async fn shutdown(&self) {
        let handles: Vec<Arc<StubHandle>> =
            self.handles.lock().unwrap().values().cloned().collect();
        for handle in handles {
            handle.close().await;
        }
    }
}

/// Stub torrent handle backed by whatever [`PieceStorage`] it was given.
pub struct StubHandle {
    descriptor: Arc<TorrentDescriptor>,
    storage: Arc<dyn PieceStorage>,
    stats: Mutex<SwarmStats>,
    reader_opens: AtomicU64,
    download_all: AtomicBool,
    closed: CancellationToken,
}

impl StubHandle {
    /// Override the swarm stats the handle reports.
    pub fn set_stats(&self, stats: SwarmStats) {
        *self.stats.lock().unwrap() = stats;
    }

    /// How many readers have been opened.
    #[must_use]
    pub fn reader_opens(&self) -> u64 {
        self.reader_opens.load(Ordering::Relaxed)
    }

    /// Whether `download_all` has been requested.
    #[must_use]
    pub fn download_all_requested(&self) -> bool {
        self.download_all.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TorrentHandle for StubHandle {
    fn descriptor(&self) -> Arc<TorrentDescriptor> {
        Arc::clone(&self.descriptor)
    }

    fn storage(&self) -> Arc<dyn PieceStorage> {
        Arc::clone(&self.storage)
    }

    fn stats(&self) -> SwarmStats {
        let mut stats = *self.stats.lock().unwrap();
        stats.bytes_completed = stats
            .bytes_completed
            .max(u64::from(self.storage.completed_pieces()) * self.descriptor.piece_length());
        stats
    }

    fn piece_states(&self) -> Vec<PieceState> {
        (0..self.descriptor.num_pieces())
            .map(|index| PieceState {
                complete: self.storage.piece_complete(index),
                priority: PiecePriority::Normal,
            })
            .collect()
    }

    async fn reader(
        &self,
        file_index: usize,
        _options: ReaderOptions,
    ) -> Result<Box<dyn FileReader>> {
        self.reader_opens.fetch_add(1, Ordering::Relaxed);
        let file = self
            .descriptor
            .files()
            .get(file_index)
            .ok_or_else(|| seedgate_core::Error::not_found("file index out of range"))?;
        Ok(Box::new(StorageReader {
            storage: Arc::clone(&self.storage),
            piece_length: self.descriptor.piece_length(),
            start: file.offset,
            len: file.length,
            pos: 0,
        }))
    }

    fn download_all(&self) {
        self.download_all.store(true, Ordering::Relaxed);
    }

    async fn close(&self) {
        if !self.closed.is_cancelled() {
            self.storage.close();
            self.closed.cancel();
        }
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }
}

/// Synchronous reader over the handle's storage, exposed through the async
/// traits.
struct StorageReader {
    storage: Arc<dyn PieceStorage>,
    piece_length: u64,
    start: u64,
    len: u64,
    pos: u64,
}

impl AsyncRead for StorageReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.pos >= self.len {
            return Poll::Ready(Ok(()));
        }
        let global = self.start + self.pos;
        let piece = u32::try_from(global / self.piece_length)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "piece overflow"))?;
        let within = global % self.piece_length;
        let remaining_in_piece = self.piece_length - within;
        let remaining_in_file = self.len - self.pos;
        let want = (buf.remaining() as u64)
            .min(remaining_in_piece)
            .min(remaining_in_file) as usize;

        let mut scratch = vec![0u8; want];
        let n = self.storage.read_piece(piece, within, &mut scratch)?;
        buf.put_slice(&scratch[..n]);
        self.pos += n as u64;
        Poll::Ready(Ok(()))
    }
}

impl AsyncSeek for StorageReader {
    fn start_seek(mut self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        let next = match position {
            SeekFrom::Start(offset) => i64::try_from(offset).unwrap_or(i64::MAX),
            SeekFrom::End(offset) => i64::try_from(self.len).unwrap_or(i64::MAX) + offset,
            SeekFrom::Current(offset) => i64::try_from(self.pos).unwrap_or(i64::MAX) + offset,
        };
        if next < 0 || next > i64::try_from(self.len).unwrap_or(i64::MAX) {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek out of range"));
        }
        self.pos = next as u64;
        Ok(())
    }

    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Poll::Ready(Ok(self.pos))
    }
}
