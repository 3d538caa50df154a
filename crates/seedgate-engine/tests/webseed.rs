//! Webseed engine tests against a local HTTP file server.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use tokio::io::AsyncReadExt;

use seedgate_core::{PieceStorage, ReaderOptions, TorrentEngine};
use seedgate_engine::WebseedEngine;
use seedgate_test_support::{MemoryStorage, build_torrent, single_file_torrent};

#[derive(Clone)]
struct Files(Arc<Vec<(String, Vec<u8>)>>);

async fn serve_file(State(files): State<Files>, Path(path): Path<String>) -> (StatusCode, Vec<u8>) {
    for (name, content) in files.0.iter() {
        if *name == path {
            // Range is deliberately ignored: the fetcher must cope with a
            // 200 carrying the whole file.
            return (StatusCode::OK, content.clone());
        }
    }
    (StatusCode::NOT_FOUND, Vec::new())
}

async fn spawn_server(files: Vec<(String, Vec<u8>)>) -> String {
    let app = Router::new()
        .route("/{*path}", get(serve_file))
        .with_state(Files(Arc::new(files)));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}/")
}

async fn wait_for<F: Fn() -> bool>(cond: F, what: &str) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn fetches_verifies_and_completes_every_piece() {
    let content: Vec<u8> = (0u16..256).map(|i| (i % 249) as u8).collect();
    let (descriptor, payload) = single_file_torrent("movie.mp4", 16, &content);
    let url = spawn_server(vec![("movie.mp4".to_string(), payload.clone())]).await;

    let storage = MemoryStorage::new(Arc::clone(&descriptor));
    let engine = WebseedEngine::new(reqwest::Client::new(), None);
    let handle = engine
        .add_torrent(
            Arc::clone(&descriptor),
            storage.clone() as Arc<dyn PieceStorage>,
            Some(url),
        )
        .await
        .expect("add");

    let probe = storage.clone();
    let total = descriptor.num_pieces();
    wait_for(|| probe.completed_pieces() == total, "all pieces").await;

    let mut back = vec![0u8; 16];
    for piece in 0..total {
        assert!(storage.piece_complete(piece));
        let n = storage.read_piece(piece, 0, &mut back).expect("read");
        let start = piece as usize * 16;
        assert_eq!(&back[..n], &payload[start..start + n]);
    }
    handle.close().await;
}

#[tokio::test]
async fn corrupt_webseed_data_is_never_marked_complete() {
    let content: Vec<u8> = vec![0xab; 64];
    let (descriptor, _) = single_file_torrent("movie.mp4", 16, &content);
    // Serve different bytes than the descriptor hashes.
    let url = spawn_server(vec![("movie.mp4".to_string(), vec![0xcd; 64])]).await;

    let storage = MemoryStorage::new(Arc::clone(&descriptor));
    let engine = WebseedEngine::new(reqwest::Client::new(), None);
    let handle = engine
        .add_torrent(
            Arc::clone(&descriptor),
            storage.clone() as Arc<dyn PieceStorage>,
            Some(url),
        )
        .await
        .expect("add");

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(
        storage.completed_pieces(),
        0,
        "hash-mismatched pieces must stay incomplete"
    );
    handle.close().await;
}

#[tokio::test]
async fn multi_file_pieces_assemble_across_boundaries() {
    let first = vec![0x11u8; 24];
    let second = vec![0x22u8; 40];
    let (descriptor, payload) =
        build_torrent("demo", 16, &[("a.bin", &first), ("sub/b.bin", &second)]);
    let url = spawn_server(vec![
        ("demo/a.bin".to_string(), first.clone()),
        ("demo/sub/b.bin".to_string(), second.clone()),
    ])
    .await;

    let storage = MemoryStorage::new(Arc::clone(&descriptor));
    let engine = WebseedEngine::new(reqwest::Client::new(), None);
    let _handle = engine
        .add_torrent(
            Arc::clone(&descriptor),
            storage.clone() as Arc<dyn PieceStorage>,
            Some(url),
        )
        .await
        .expect("add");

    let probe = storage.clone();
    let total = descriptor.num_pieces();
    wait_for(|| probe.completed_pieces() == total, "all pieces").await;

    let mut whole = vec![0u8; payload.len()];
    let mut offset = 0usize;
    for piece in 0..total {
        let n = storage
            .read_piece(piece, 0, &mut whole[offset..])
            .expect("read");
        offset += n;
    }
    assert_eq!(whole, payload);
}

#[tokio::test]
async fn readers_pend_until_their_piece_arrives() {
    let content: Vec<u8> = (0u8..64).collect();
    let (descriptor, payload) = single_file_torrent("movie.mp4", 16, &content);

    // No webseed: pieces appear only when the test writes them.
    let storage = MemoryStorage::new(Arc::clone(&descriptor));
    let engine = WebseedEngine::new(reqwest::Client::new(), None);
    let handle = engine
        .add_torrent(
            Arc::clone(&descriptor),
            storage.clone() as Arc<dyn PieceStorage>,
            None,
        )
        .await
        .expect("add");

    let mut reader = handle
        .reader(0, ReaderOptions::default())
        .await
        .expect("reader");

    let writer_storage = storage.clone();
    let writer_payload = payload.clone();
    let writer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        for piece in 0..4u32 {
            let start = piece as usize * 16;
            writer_storage
                .write_piece(piece, 0, &writer_payload[start..start + 16])
                .expect("write");
            writer_storage.mark_complete(piece).expect("mark");
        }
    });

    // The read blocks until the writer task lands the pieces; without the
    // wakeup this would time out.
    let mut sink = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), reader.read_to_end(&mut sink))
        .await
        .expect("read should complete once pieces arrive")
        .expect("read");
    assert_eq!(sink, payload);
    writer.await.expect("writer");
}
