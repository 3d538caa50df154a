//! Direct tests of the gRPC stat service (no transport).

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tonic::Request;

use seedgate_api::ApiState;
use seedgate_api::grpc::StatService;
use seedgate_api::grpc::pb::torrent_web_seeder_server::TorrentWebSeeder;
use seedgate_api::grpc::pb::{FilesRequest, StatRequest, stat_reply};
use seedgate_core::{PieceStorage, TorrentHandle};
use seedgate_session::{
    BucketPool, DiskStorageFactory, FileStore, MetaSource, StatAggregator, TorrentMap,
    TorrentMapConfig,
};
use seedgate_storage::{FileCacheMap, TouchMap};
use seedgate_telemetry::Metrics;
use seedgate_test_support::{MemoryMetainfoStore, StubEngine, descriptor_with_files};

async fn service() -> (StatService, Arc<StubEngine>, String, tempfile::TempDir) {
    let tmp = tempfile::TempDir::new().expect("tempdir");
    let base = tmp.path().display().to_string();
    let engine = StubEngine::new();
    let remote = MemoryMetainfoStore::new();
    let descriptor = descriptor_with_files("demo", 16, &[("a.bin", 32), ("b.bin", 32)]);
    let hash = remote.insert(descriptor.metainfo_bytes());
    let meta = Arc::new(MetaSource::new(
        Arc::new(FileStore::load(None).expect("empty")),
        Some(remote),
    ));
    let metrics = Metrics::new().expect("metrics");
    let map = TorrentMap::new(
        engine.clone(),
        meta,
        None,
        Arc::new(DiskStorageFactory::new(base.clone())),
        metrics.clone(),
        TorrentMapConfig::default(),
    );
    map.get(hash).await.expect("activate");
    let state = ApiState::new(
        Arc::clone(&map),
        StatAggregator::new(Arc::clone(&map)),
        TouchMap::new(base.clone()),
        Arc::new(FileCacheMap::new(base.clone())),
        Arc::new(BucketPool::new()),
        None,
        metrics,
        CancellationToken::new(),
    );
    (StatService::new(state), engine, hash.hex(), tmp)
}

fn with_hash<T>(message: T, hex: &str) -> Request<T> {
    let mut request = Request::new(message);
    request
        .metadata_mut()
        .insert("info-hash", hex.parse().expect("metadata"));
    request
}

#[tokio::test]
async fn files_lists_every_path() {
    let (service, _engine, hex, _tmp) = service().await;
    let reply = service
        .files(with_hash(FilesRequest {}, &hex))
        .await
        .expect("files")
        .into_inner();
    let paths: Vec<&str> = reply.files.iter().map(|file| file.path.as_str()).collect();
    assert_eq!(paths, vec!["demo/a.bin", "demo/b.bin"]);
}

#[tokio::test]
async fn stat_reports_piece_states() {
    let (service, engine, hex, _tmp) = service().await;
    let handle = engine.handle(hex.parse().expect("hash")).expect("handle");
    handle.storage().mark_complete(0).expect("mark");

    let reply = service
        .stat(with_hash(
            StatRequest {
                path: String::new(),
            },
            &hex,
        ))
        .await
        .expect("stat")
        .into_inner();
    assert_eq!(reply.total, 64);
    assert_eq!(reply.pieces.len(), 4);
    assert!(reply.pieces[0].complete);
    assert_eq!(reply.status, stat_reply::Status::Seeding as i32);
}

#[tokio::test]
async fn missing_metadata_is_rejected() {
    let (service, _engine, _hex, _tmp) = service().await;
    let err = service
        .stat(Request::new(StatRequest {
            path: String::new(),
        }))
        .await
        .expect_err("no metadata");
    assert_eq!(err.code(), tonic::Code::InvalidArgument);
}

#[tokio::test]
async fn unknown_file_is_not_found() {
    let (service, _engine, hex, _tmp) = service().await;
    let err = service
        .stat(with_hash(
            StatRequest {
                path: "demo/missing.bin".to_string(),
            },
            &hex,
        ))
        .await
        .expect_err("missing file");
    assert_eq!(err.code(), tonic::Code::NotFound);
}
