//! Shapes raw engine stats into per-torrent / per-file progress frames and
//! emits diffs over a stream.

use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use futures_core::Stream;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use seedgate_core::{Error, InfoHash, PieceState, PiecePriority, Result};

use crate::torrent_map::TorrentMap;

/// Emission cadence of the diff stream.
const EMIT_TICK: Duration = Duration::from_secs(1);

/// Lifecycle status surfaced to stat consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatStatus {
    /// The torrent is still activating.
    Initialization,
    /// No peers and no bytes yet.
    WaitingForPeers,
    /// The engine is verifying restored on-disk state.
    Restoring,
    /// Bytes are flowing (or the torrent is complete).
    Seeding,
    /// Peers are connected but nothing has been downloaded yet.
    Idle,
    /// Final frame before the stream closes.
    Terminated,
}

/// State of one piece as shown to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PieceStat {
    /// Piece position (file-relative in per-file frames).
    pub position: u32,
    /// Whether the piece is downloaded and verified.
    pub complete: bool,
    /// Request priority bucket.
    pub priority: PiecePriority,
}

/// One progress frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatFrame {
    /// Completed bytes (of the torrent, or of the file for per-file frames).
    pub completed: u64,
    /// Total bytes.
    pub total: u64,
    /// Connected peers.
    pub peers: u32,
    /// Connected seeders.
    pub seeders: u32,
    /// Connected leechers.
    pub leechers: u32,
    /// Lifecycle status.
    pub status: StatStatus,
    /// Piece states; in diff frames only the changed entries.
    pub pieces: Vec<PieceStat>,
}

impl StatFrame {
    fn initialization() -> Self {
        Self {
            completed: 0,
            total: 0,
            peers: 0,
            seeders: 0,
            leechers: 0,
            status: StatStatus::Initialization,
            pieces: Vec::new(),
        }
    }

    fn terminated() -> Self {
        Self {
            completed: 0,
            total: 0,
            peers: 0,
            seeders: 0,
            leechers: 0,
            status: StatStatus::Terminated,
            pieces: Vec::new(),
        }
    }
}

/// Produces stat frames and diff streams for active torrents.
pub struct StatAggregator {
    map: Arc<TorrentMap>,
}

impl StatAggregator {
    /// Aggregator over the torrent map.
    #[must_use]
    pub fn new(map: Arc<TorrentMap>) -> Arc<Self> {
        Arc::new(Self { map })
    }

    /// One frame for the torrent (or one of its files).
    ///
    /// A torrent that has not finished activating yields an
    /// `INITIALIZATION` frame; an unknown file path is `NotFound`.
    pub fn stat(&self, hash: InfoHash, path: Option<&str>) -> Result<StatFrame> {
        let Some(handle) = self.map.try_get(hash) else {
            return Ok(StatFrame::initialization());
        };

        let descriptor = handle.descriptor();
        let stats = handle.stats();
        let states = handle.piece_states();
        let leechers = stats.active_peers.saturating_sub(stats.seeders);

        let (completed, total, pieces) = match path {
            None => {
                let pieces = states
                    .iter()
                    .enumerate()
                    .map(|(position, state)| piece_stat(position as u32, state))
                    .collect();
                (stats.bytes_completed, descriptor.total_length(), pieces)
            }
            Some(path) => {
                let file_index = descriptor
                    .file_index(path)
                    .ok_or_else(|| Error::not_found(format!("no file {path} in {hash}")))?;
                let file = &descriptor.files()[file_index];
                let range = descriptor.file_piece_range(file_index);
                let file_start = file.offset;
                let file_end = file.offset + file.length;

                let mut completed = 0u64;
                let mut pieces = Vec::with_capacity(range.len());
                for (relative, piece) in range.clone().enumerate() {
                    let state = states
                        .get(piece as usize)
                        .copied()
                        .unwrap_or_default();
                    if state.complete {
                        if let Some(extent) = descriptor.piece_extent(piece) {
                            let start = extent.offset.max(file_start);
                            let end = (extent.offset + extent.length).min(file_end);
                            completed += end.saturating_sub(start);
                        }
                    }
                    pieces.push(piece_stat(relative as u32, &state));
                }
                (completed, file.length, pieces)
            }
        };

        let status = if stats.checking {
            StatStatus::Restoring
        } else if completed == 0 && stats.active_peers == 0 {
            StatStatus::WaitingForPeers
        } else if completed == 0 {
            StatStatus::Idle
        } else {
            StatStatus::Seeding
        };

        Ok(StatFrame {
            completed,
            total,
            peers: stats.active_peers,
            seeders: stats.seeders,
            leechers,
            status,
            pieces,
        })
    }

    /// Stream of stat frames, one per second, skipping ticks where neither
    /// `completed` nor `peers` changed and carrying only the piece diff.
    ///
    /// The first emitted frame carries the full piece array. The stream ends
    /// after the torrent reaches a steady completed state, and emits a single
    /// `TERMINATED` frame when the torrent is closed or `shutdown` fires.
    pub fn stream(
        self: &Arc<Self>,
        hash: InfoHash,
        path: Option<String>,
        shutdown: CancellationToken,
    ) -> impl Stream<Item = Result<StatFrame>> + Send {
        let aggregator = Arc::clone(self);
        stream! {
            let mut ticker = tokio::time::interval(EMIT_TICK);
            let mut prev: Option<StatFrame> = None;
            let mut was_active = false;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    () = shutdown.cancelled() => {
                        yield Ok(StatFrame::terminated());
                        return;
                    }
                }

                let active = aggregator.map.try_get(hash).is_some();
                if was_active && !active {
                    debug!(info_hash = %hash, "torrent closed, terminating stat stream");
                    yield Ok(StatFrame::terminated());
                    return;
                }
                was_active = active;

                let frame = match aggregator.stat(hash, path.as_deref()) {
                    Ok(frame) => frame,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                };

                if let Some(prev_frame) = &prev {
                    if frame.completed == prev_frame.completed
                        && frame.peers == prev_frame.peers
                    {
                        continue;
                    }
                }

                let diff_pieces = match &prev {
                    None => frame.pieces.clone(),
                    Some(prev_frame) => diff(&frame.pieces, &prev_frame.pieces),
                };
                let steady = frame.total > 0
                    && frame.completed == frame.total
                    && !matches!(
                        frame.status,
                        StatStatus::Initialization | StatStatus::Restoring
                    );
                let emitted = StatFrame {
                    pieces: diff_pieces,
                    ..frame.clone()
                };
                prev = Some(frame);
                yield Ok(emitted);
                if steady {
                    return;
                }
            }
        }
    }
}

fn piece_stat(position: u32, state: &PieceState) -> PieceStat {
    PieceStat {
        position,
        complete: state.complete,
        priority: state.priority,
    }
}

/// Entries of `next` that are absent from `prev` or changed state.
fn diff(next: &[PieceStat], prev: &[PieceStat]) -> Vec<PieceStat> {
    next.iter()
        .filter(|piece| {
            !prev.iter().any(|old| {
                old.position == piece.position
                    && old.complete == piece.complete
                    && old.priority == piece.priority
            })
        })
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{FileStore, MetaSource};
    use crate::torrent_map::{StorageFactory, TorrentMapConfig};
    use async_trait::async_trait;
    use seedgate_core::{PieceStorage, SwarmStats, TorrentDescriptor, TorrentHandle};
    use seedgate_test_support::{MemoryMetainfoStore, MemoryStorage, StubEngine, descriptor_with_files};
    use tokio_stream::StreamExt;

    struct MemoryFactory;

    #[async_trait]
    impl StorageFactory for MemoryFactory {
        async fn open(
            &self,
            descriptor: Arc<TorrentDescriptor>,
        ) -> Result<Arc<dyn PieceStorage>> {
            Ok(MemoryStorage::new(descriptor))
        }
    }

    async fn active_torrent() -> (Arc<StubEngine>, Arc<TorrentMap>, InfoHash) {
        let engine = StubEngine::new();
        let remote = MemoryMetainfoStore::new();
        let descriptor = descriptor_with_files("demo", 16, &[("a.bin", 32), ("b.bin", 32)]);
        let hash = remote.insert(descriptor.metainfo_bytes());
        let meta = Arc::new(MetaSource::new(
            Arc::new(FileStore::load(None).expect("empty")),
            Some(remote),
        ));
        let map = TorrentMap::new(
            Arc::clone(&engine) as Arc<dyn seedgate_core::TorrentEngine>,
            meta,
            None,
            Arc::new(MemoryFactory),
            seedgate_telemetry::Metrics::new().expect("metrics"),
            TorrentMapConfig::default(),
        );
        map.get(hash).await.expect("activate");
        (engine, map, hash)
    }

    #[tokio::test]
    async fn unknown_torrent_reports_initialization() {
        let (_, map, _) = active_torrent().await;
        let aggregator = StatAggregator::new(map);
        let frame = aggregator
            .stat(InfoHash::new([0x77; 20]), None)
            .expect("frame");
        assert_eq!(frame.status, StatStatus::Initialization);
        assert_eq!(frame.completed, 0);
    }

    #[tokio::test]
    async fn torrent_frame_reflects_piece_states() {
        let (engine, map, hash) = active_torrent().await;
        let handle = engine.handle(hash).expect("handle");
        handle.storage().mark_complete(0).expect("mark");
        handle.set_stats(SwarmStats {
            active_peers: 3,
            seeders: 1,
            ..SwarmStats::default()
        });

        let aggregator = StatAggregator::new(map);
        let frame = aggregator.stat(hash, None).expect("frame");
        assert_eq!(frame.total, 64);
        assert_eq!(frame.peers, 3);
        assert_eq!(frame.leechers, 2);
        assert_eq!(frame.pieces.len(), 4);
        assert!(frame.pieces[0].complete);
        assert!(!frame.pieces[1].complete);
        assert_eq!(frame.status, StatStatus::Seeding);
    }

    #[tokio::test]
    async fn file_frames_use_relative_positions() {
        let (engine, map, hash) = active_torrent().await;
        let handle = engine.handle(hash).expect("handle");
        // b.bin covers pieces 2..4; complete piece 2 only.
        handle.storage().mark_complete(2).expect("mark");

        let aggregator = StatAggregator::new(map);
        let frame = aggregator.stat(hash, Some("demo/b.bin")).expect("frame");
        assert_eq!(frame.total, 32);
        assert_eq!(frame.completed, 16);
        assert_eq!(frame.pieces.len(), 2);
        assert_eq!(frame.pieces[0].position, 0);
        assert!(frame.pieces[0].complete);
        assert!(!frame.pieces[1].complete);
    }

    #[tokio::test]
    async fn unknown_file_is_not_found() {
        let (_, map, hash) = active_torrent().await;
        let aggregator = StatAggregator::new(map);
        assert!(
            aggregator
                .stat(hash, Some("demo/missing.bin"))
                .expect_err("missing file")
                .is_not_found()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stream_emits_full_frame_then_diffs() {
        let (engine, map, hash) = active_torrent().await;
        let handle = engine.handle(hash).expect("handle");
        handle.set_stats(SwarmStats {
            active_peers: 1,
            ..SwarmStats::default()
        });

        let aggregator = StatAggregator::new(map);
        let shutdown = CancellationToken::new();
        let stream = aggregator.stream(hash, None, shutdown.clone());
        tokio::pin!(stream);

        let first = stream.next().await.expect("frame").expect("ok");
        assert_eq!(first.pieces.len(), 4, "first frame carries all pieces");

        // No change: nothing is emitted; completing a piece changes
        // `completed`, so only the flipped piece is sent.
        handle.storage().mark_complete(1).expect("mark");
        let second = stream.next().await.expect("frame").expect("ok");
        assert_eq!(second.pieces.len(), 1);
        assert_eq!(second.pieces[0].position, 1);
        assert!(second.pieces[0].complete);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_emits_terminated() {
        let (_, map, hash) = active_torrent().await;
        let aggregator = StatAggregator::new(map);
        let shutdown = CancellationToken::new();
        let stream = aggregator.stream(hash, None, shutdown.clone());
        tokio::pin!(stream);

        let _first = stream.next().await.expect("frame").expect("ok");
        shutdown.cancel();
        let last = stream.next().await.expect("frame").expect("ok");
        assert_eq!(last.status, StatStatus::Terminated);
        assert!(stream.next().await.is_none());
    }
}
