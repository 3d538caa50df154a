//! End-to-end tests of the HTTP surface against a stub swarm engine and real
//! on-disk piece storage.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use seedgate_api::{ApiState, build_router};
use seedgate_core::{InfoHash, PieceStorage, TorrentHandle};
use seedgate_session::{
    BucketPool, FileStore, MetaSource, StatAggregator, TorrentMap, TorrentMapConfig,
    torrent_map::DiskStorageFactory,
};
use seedgate_snapshot::SnapshotMap;
use seedgate_storage::{FileCacheMap, TouchMap, db::read_file_completion, layout, resolve_dir};
use seedgate_telemetry::Metrics;
use seedgate_test_support::{MemoryMetainfoStore, MemoryObjectStore, StubEngine, single_file_torrent};

struct Harness {
    state: Arc<ApiState>,
    engine: Arc<StubEngine>,
    remote: Arc<MemoryMetainfoStore>,
    base: String,
    _tmp: tempfile::TempDir,
}

fn harness(snapshots: Option<Arc<SnapshotMap>>) -> Harness {
    let tmp = tempfile::TempDir::new().expect("tempdir");
    let base = tmp.path().display().to_string();
    let engine = StubEngine::new();
    let remote = MemoryMetainfoStore::new();
    let meta = Arc::new(MetaSource::new(
        Arc::new(FileStore::load(None).expect("empty")),
        Some(remote.clone()),
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
    let state = ApiState::new(
        Arc::clone(&map),
        StatAggregator::new(Arc::clone(&map)),
        TouchMap::new(base.clone()),
        Arc::new(FileCacheMap::new(base.clone())),
        Arc::new(BucketPool::new()),
        snapshots,
        metrics,
        CancellationToken::new(),
    );
    Harness {
        state,
        engine,
        remote,
        base,
        _tmp: tmp,
    }
}

fn snapshot_harness(store: Arc<MemoryObjectStore>) -> Harness {
    let mut h = harness(None);
    let settings = seedgate_config::SnapshotSettings {
        bucket: "pieces".to_string(),
        bucket_spread: false,
        concurrency: 2,
        stat_write_delay: Duration::from_secs(0),
        write_timeout: Duration::from_secs(3600),
        start_threshold: 0.5,
        start_full_download_threshold: 0.75,
        download_ratio: 2.0,
        torrent_size_limit: 10_000_000_000,
        s3: seedgate_config::S3Settings {
            access_key_id: String::new(),
            secret_access_key: String::new(),
            endpoint: String::new(),
            region: String::new(),
        },
    };
    let snapshots = SnapshotMap::new(
        Arc::clone(&h.state.map),
        store,
        settings,
        h.state.metrics.clone(),
        CancellationToken::new(),
    );
    let state = ApiState::new(
        Arc::clone(&h.state.map),
        Arc::clone(&h.state.stat),
        Arc::clone(&h.state.touch),
        Arc::clone(&h.state.cache),
        Arc::clone(&h.state.buckets),
        Some(snapshots),
        h.state.metrics.clone(),
        CancellationToken::new(),
    );
    h.state = state;
    h
}

/// Register a 256-byte single-file torrent and activate it with its payload
/// written into storage (pieces not yet marked complete).
async fn seeded_torrent(h: &Harness) -> (InfoHash, Vec<u8>) {
    let content: Vec<u8> = (0u16..256).map(|i| (i % 251) as u8).collect();
    let (descriptor, payload) = single_file_torrent("movie.mp4", 16, &content);
    let hash = h.remote.insert(descriptor.metainfo_bytes());
    let handle = h.state.map.get(hash).await.expect("activate");
    let storage = handle.storage();
    for piece in 0..descriptor.num_pieces() {
        let extent = descriptor.piece_extent(piece).expect("extent");
        let start = extent.offset as usize;
        let end = start + extent.length as usize;
        storage
            .write_piece(piece, 0, &payload[start..end])
            .expect("write piece");
    }
    (hash, payload)
}

async fn read_body(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body")
        .to_vec()
}

#[tokio::test]
async fn cache_miss_range_request_streams_from_the_engine() {
    let h = harness(None);
    let (hash, payload) = seeded_torrent(&h).await;
    let app = build_router(Arc::clone(&h.state));

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/{hash}/movie.mp4"))
                .header(header::RANGE, "bytes=0-63")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers()[header::CONTENT_LENGTH],
        "64",
        "content length must match the range"
    );
    assert_eq!(
        response.headers()[header::LAST_MODIFIED],
        "Thu, 01 Jan 1970 00:00:00 GMT"
    );
    assert!(response.headers().contains_key(header::ETAG));
    let body = read_body(response).await;
    assert_eq!(body, &payload[..64]);

    // The touch sentinel advanced; no file completion row was written.
    let touch = layout::touch_path(&h.base, hash).expect("touch path");
    assert!(touch.exists());
    let dir = resolve_dir(&h.base, hash).expect("dir");
    assert!(
        !read_file_completion(&dir.join(layout::DB_FILE), "movie.mp4").expect("query"),
        "an incomplete file must not gain a completion row"
    );
}

#[tokio::test]
async fn cache_hit_short_circuits_the_engine_reader() {
    let h = harness(None);
    let (hash, payload) = seeded_torrent(&h).await;

    // Complete every piece and wait for the background derivation to record
    // the file.
    let handle = h.engine.handle(hash).expect("handle");
    let storage = handle.storage();
    let descriptor = handle.descriptor();
    for piece in 0..descriptor.num_pieces() {
        storage.mark_complete(piece).expect("mark");
    }
    let dir = resolve_dir(&h.base, hash).expect("dir");
    let db_path = dir.join(layout::DB_FILE);
    for _ in 0..100 {
        if read_file_completion(&db_path, "movie.mp4").unwrap_or(false) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(read_file_completion(&db_path, "movie.mp4").expect("derived"));

    let readers_before = handle.reader_opens();
    let app = build_router(Arc::clone(&h.state));
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/{hash}/movie.mp4"))
                .header(header::RANGE, "bytes=0-63")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    let body = read_body(response).await;
    assert_eq!(body, &payload[..64]);
    assert_eq!(
        handle.reader_opens(),
        readers_before,
        "a cached file must be served without the engine's reader"
    );
}

#[tokio::test]
async fn listing_and_source_torrent_round_trip() {
    let h = harness(None);
    let (hash, _) = seeded_torrent(&h).await;
    let app = build_router(Arc::clone(&h.state));

    let listing = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/{hash}/"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(listing.status(), StatusCode::OK);
    let body = String::from_utf8(read_body(listing).await).expect("utf8");
    assert!(body.contains("source.torrent"));
    assert!(body.contains("movie.mp4"));

    let source = app
        .oneshot(
            Request::builder()
                .uri(format!("/{hash}/source.torrent"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(source.status(), StatusCode::OK);
    assert_eq!(
        source.headers()[header::CONTENT_TYPE],
        "application/x-bittorrent"
    );
    let raw = read_body(source).await;
    assert_eq!(
        seedgate_core::metainfo::info_hash(&raw).expect("hash"),
        hash,
        "re-encoded metainfo must keep its info-hash"
    );
}

#[tokio::test]
async fn unknown_paths_and_hashes_return_not_found() {
    let h = harness(None);
    let (hash, _) = seeded_torrent(&h).await;
    let app = build_router(Arc::clone(&h.state));

    let bogus = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/not-a-hash/file")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(bogus.status(), StatusCode::NOT_FOUND);

    let missing_file = app
        .oneshot(
            Request::builder()
                .uri(format!("/{hash}/nope.bin"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(missing_file.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn info_hash_header_replaces_the_path_segment() {
    let h = harness(None);
    let (hash, payload) = seeded_torrent(&h).await;
    let app = build_router(Arc::clone(&h.state));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/movie.mp4")
                .header("X-Info-Hash", hash.hex())
                .header(header::RANGE, "bytes=0-15")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(read_body(response).await, &payload[..16]);
}

#[tokio::test]
async fn origin_requests_get_cors_headers() {
    let h = harness(None);
    let (hash, _) = seeded_torrent(&h).await;
    let app = build_router(Arc::clone(&h.state));

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/{hash}/movie.mp4"))
                .header(header::ORIGIN, "https://player.example")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS],
        "true"
    );
}

#[tokio::test]
async fn download_flag_forces_attachment_disposition() {
    let h = harness(None);
    let (hash, _) = seeded_torrent(&h).await;
    let app = build_router(Arc::clone(&h.state));

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/{hash}/movie.mp4?download"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"movie.mp4\""
    );
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/octet-stream"
    );
}

#[tokio::test]
async fn done_probe_reports_cache_state() {
    let h = harness(None);
    let (hash, _) = seeded_torrent(&h).await;
    let app = build_router(Arc::clone(&h.state));

    let incomplete = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/{hash}/movie.mp4?done"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(incomplete.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn throttled_requests_still_deliver_exact_bytes() {
    let h = harness(None);
    let (hash, payload) = seeded_torrent(&h).await;
    let app = build_router(Arc::clone(&h.state));

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/{hash}/movie.mp4"))
                .header("X-Session-ID", "s1")
                .header("X-Download-Rate", "1MB")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_body(response).await, payload);
    assert_eq!(h.state.buckets.len(), 1, "the session got its bucket");
}

#[tokio::test]
async fn served_bytes_activate_the_snapshot_engine() {
    let store = MemoryObjectStore::new();
    let h = snapshot_harness(Arc::clone(&store));
    let (hash, payload) = seeded_torrent(&h).await;
    let app = build_router(Arc::clone(&h.state));

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/{hash}/movie.mp4"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_body(response).await.len(), payload.len());

    let touch_key = format!("touch/{}", hash.hex());
    let mut seen = false;
    for _ in 0..100 {
        if store.object("pieces", &touch_key).is_some() {
            seen = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(seen, "the first served byte must activate the snapshot");
}
