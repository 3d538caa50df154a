//! Stat service implementation over the aggregator.

use std::pin::Pin;
use std::sync::Arc;

use futures_core::Stream;
use futures_util::StreamExt;
use tonic::{Request, Response, Status};

use seedgate_core::{InfoHash, PiecePriority};
use seedgate_session::{PieceStat, StatFrame, StatStatus};

use crate::grpc::pb::{
    self, File, FilesReply, FilesRequest, StatReply, StatRequest, piece, stat_reply,
};
use crate::state::ApiState;

/// gRPC stat service; the torrent is addressed by the `info-hash` request
/// metadata entry.
pub struct StatService {
    state: Arc<ApiState>,
}

impl StatService {
    /// Service over the shared state.
    #[must_use]
    pub fn new(state: Arc<ApiState>) -> Self {
        Self { state }
    }
}

fn metadata_hash<T>(request: &Request<T>) -> Result<InfoHash, Status> {
    let value = request
        .metadata()
        .get("info-hash")
        .ok_or_else(|| Status::invalid_argument("missing info-hash metadata"))?;
    value
        .to_str()
        .ok()
        .and_then(|text| text.parse::<InfoHash>().ok())
        .ok_or_else(|| Status::invalid_argument("malformed info-hash metadata"))
}

fn to_status(err: &seedgate_core::Error) -> Status {
    if err.is_not_found() {
        Status::not_found(err.to_string())
    } else {
        Status::internal(err.to_string())
    }
}

fn frame_to_reply(frame: &StatFrame) -> StatReply {
    StatReply {
        completed: i64::try_from(frame.completed).unwrap_or(i64::MAX),
        total: i64::try_from(frame.total).unwrap_or(i64::MAX),
        peers: i32::try_from(frame.peers).unwrap_or(i32::MAX),
        status: status_to_pb(frame.status) as i32,
        pieces: frame.pieces.iter().map(piece_to_pb).collect(),
        seeders: i32::try_from(frame.seeders).unwrap_or(i32::MAX),
        leechers: i32::try_from(frame.leechers).unwrap_or(i32::MAX),
    }
}

fn status_to_pb(status: StatStatus) -> stat_reply::Status {
    match status {
        StatStatus::Initialization => stat_reply::Status::Initialization,
        StatStatus::WaitingForPeers => stat_reply::Status::WaitingForPeers,
        StatStatus::Restoring => stat_reply::Status::Restoring,
        StatStatus::Seeding => stat_reply::Status::Seeding,
        StatStatus::Idle => stat_reply::Status::Idle,
        StatStatus::Terminated => stat_reply::Status::Terminated,
    }
}

fn piece_to_pb(piece: &PieceStat) -> pb::Piece {
    let priority = match piece.priority {
        PiecePriority::None => piece::Priority::None,
        PiecePriority::Normal => piece::Priority::Normal,
        PiecePriority::High => piece::Priority::High,
    };
    pb::Piece {
        position: i64::from(piece.position),
        complete: piece.complete,
        priority: priority as i32,
    }
}

#[tonic::async_trait]
impl pb::torrent_web_seeder_server::TorrentWebSeeder for StatService {
    async fn files(
        &self,
        request: Request<FilesRequest>,
    ) -> Result<Response<FilesReply>, Status> {
        let hash = metadata_hash(&request)?;
        let descriptor = self
            .state
            .map
            .meta()
            .descriptor(hash)
            .await
            .map_err(|err| to_status(&err))?;
        let files = descriptor
            .files()
            .iter()
            .map(|file| File {
                path: file.path.clone(),
            })
            .collect();
        Ok(Response::new(FilesReply { files }))
    }

    async fn stat(&self, request: Request<StatRequest>) -> Result<Response<StatReply>, Status> {
        let hash = metadata_hash(&request)?;
        let path = request.into_inner().path;
        let path = (!path.is_empty()).then_some(path);
        let frame = self
            .state
            .stat
            .stat(hash, path.as_deref())
            .map_err(|err| to_status(&err))?;
        Ok(Response::new(frame_to_reply(&frame)))
    }

    type StatStreamStream = Pin<Box<dyn Stream<Item = Result<StatReply, Status>> + Send>>;

    async fn stat_stream(
        &self,
        request: Request<StatRequest>,
    ) -> Result<Response<Self::StatStreamStream>, Status> {
        let hash = metadata_hash(&request)?;
        let path = request.into_inner().path;
        let path = (!path.is_empty()).then_some(path);
        let frames = self
            .state
            .stat
            .stream(hash, path, self.state.shutdown.clone());
        let replies = frames.map(|frame| match frame {
            Ok(frame) => Ok(frame_to_reply(&frame)),
            Err(err) => Err(to_status(&err)),
        });
        Ok(Response::new(Box::pin(replies)))
    }
}
