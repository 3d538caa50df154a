//! The serve-file path: cache short-circuit, engine-backed streaming with
//! dynamic read-ahead, throttling, and touch/snapshot write observers.

use std::sync::Arc;

use async_stream::stream;
use axum::http::{HeaderMap, HeaderValue, Method, header};
use axum::response::Response;
use futures_util::StreamExt;
use sha1::{Digest, Sha1};
use tracing::{debug, warn};

use seedgate_core::{Error, InfoHash, ReaderOptions, ReadaheadFn};

use crate::error::ApiError;
use crate::http::range::{self, BodyStream};
use crate::state::ApiState;
use crate::throttle::ThrottledReader;

/// Upper bound of the dynamic read-ahead window.
const READAHEAD_CEILING: u64 = 250 << 20;

/// Lower bound of the dynamic read-ahead window.
const READAHEAD_FLOOR: u64 = 1 << 20;

/// Serve one file of a torrent, honoring `Range`.
pub(crate) async fn serve_file(
    state: Arc<ApiState>,
    hash: InfoHash,
    path: &str,
    download: bool,
    method: Method,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    state.touch.touch(hash).await;

    let descriptor = state.map.meta().descriptor(hash).await?;
    let file_index = descriptor
        .file_index(path)
        .ok_or_else(|| Error::not_found(format!("no file {path} in {hash}")))?;
    let file = descriptor.files()[file_index].clone();

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::ETAG, etag_for(hash, path));
    if download {
        response_headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
        let base = path.rsplit('/').next().unwrap_or(path);
        if let Ok(value) =
            HeaderValue::from_str(&format!("attachment; filename=\"{base}\""))
        {
            response_headers.insert(header::CONTENT_DISPOSITION, value);
        }
    }
    apply_cors(&headers, &mut response_headers);

    // A wholly-downloaded file is served straight off disk: no read-ahead
    // heuristic, no throttling, no snapshot accounting.
    if let Some(cached) = state.cache.get(hash, &file).await? {
        debug!(info_hash = %hash, path, "serving cached file");
        let reader = tokio::fs::File::open(&cached)
            .await
            .map_err(|err| Error::io("open cached file", err))?;
        return Ok(range::serve_reader(
            &method,
            &headers,
            Box::new(reader),
            file.length,
            response_headers,
            |stream| stream,
        )
        .await);
    }

    let handle = state.map.get(hash).await?;
    let file_length = file.length;
    let readahead: ReadaheadFn =
        Arc::new(move |pos, contiguous_start| dynamic_readahead(file_length, pos, contiguous_start));
    let reader = handle
        .reader(
            file_index,
            ReaderOptions {
                responsive: true,
                readahead: Some(readahead),
            },
        )
        .await?;

    let reader = match (session_header(&headers, "x-session-id"), session_header(&headers, "x-download-rate")) {
        (Some(session_id), Some(rate)) => {
            let bucket = state.buckets.get(&session_id, &rate)?;
            Box::new(ThrottledReader::new(reader, bucket)) as Box<dyn seedgate_core::FileReader>
        }
        _ => reader,
    };

    let snapshot = match &state.snapshots {
        Some(snapshots) => match snapshots.get(hash).await {
            Ok(engine) => Some((engine, Arc::clone(snapshots))),
            Err(err) => {
                warn!(info_hash = %hash, error = %err, "snapshot unavailable");
                None
            }
        },
        None => None,
    };

    let observer_state = Arc::clone(&state);
    let wrap = move |inner: BodyStream| -> BodyStream {
        Box::pin(stream! {
            let mut inner = inner;
            while let Some(chunk) = inner.next().await {
                if let Ok(bytes) = &chunk {
                    observer_state.mark_activity();
                    observer_state.metrics.add_bytes_served(bytes.len() as u64);
                    observer_state.touch.touch(hash).await;
                    if let Some((engine, snapshots)) = &snapshot {
                        snapshots.touch(hash);
                        engine.add(bytes.len() as u64);
                    }
                }
                yield chunk;
            }
        })
    };

    Ok(range::serve_reader(&method, &headers, reader, file_length, response_headers, wrap).await)
}

/// Read-ahead doubles with the contiguous streamed span, floored at 1% of
/// the file (at least 1 MiB) and capped to bound tail latency for seek-heavy
/// clients.
pub(crate) fn dynamic_readahead(file_length: u64, pos: u64, contiguous_start: u64) -> u64 {
    let mut ra = 2 * pos.saturating_sub(contiguous_start);
    let floor = (file_length / 100).max(READAHEAD_FLOOR);
    if ra < floor {
        ra = floor;
    }
    ra.min(READAHEAD_CEILING)
}

pub(crate) fn apply_cors(request: &HeaderMap, response: &mut HeaderMap) {
    if request.get(header::ORIGIN).is_some() {
        response.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
        response.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );
    }
}

pub(crate) fn etag_for(hash: InfoHash, path: &str) -> HeaderValue {
    let mut hasher = Sha1::new();
    hasher.update(hash.hex().as_bytes());
    hasher.update(path.as_bytes());
    let digest = hex::encode(hasher.finalize());
    HeaderValue::from_str(&format!("\"{digest}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("\"\""))
}

fn session_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readahead_doubles_the_contiguous_span() {
        let len = 1 << 30;
        // Fresh stream: floor applies (1% of 1 GiB > 1 MiB).
        assert_eq!(dynamic_readahead(len, 0, 0), len / 100);
        // 100 MiB of contiguous streaming doubles.
        assert_eq!(
            dynamic_readahead(len, 100 << 20, 0),
            (200u64 << 20).min(READAHEAD_CEILING)
        );
        // Capped at 250 MiB.
        assert_eq!(dynamic_readahead(len, 200 << 20, 0), READAHEAD_CEILING);
    }

    #[test]
    fn readahead_floor_is_one_mebibyte_for_small_files() {
        assert_eq!(dynamic_readahead(1024, 0, 0), READAHEAD_FLOOR);
        assert_eq!(dynamic_readahead(1024, 512, 512), READAHEAD_FLOOR);
    }

    #[test]
    fn etag_is_stable_and_quoted() {
        let hash = InfoHash::new([0xaa; 20]);
        let one = etag_for(hash, "demo/movie.mp4");
        let two = etag_for(hash, "demo/movie.mp4");
        assert_eq!(one, two);
        let text = one.to_str().expect("ascii");
        assert!(text.starts_with('"') && text.ends_with('"'));
        assert_eq!(text.len(), 42);
    }
}
