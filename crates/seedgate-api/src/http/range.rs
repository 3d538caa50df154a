//! Range-aware serving of seekable readers.

use std::pin::Pin;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::Response;
use bytes::Bytes;
use futures_core::Stream;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use seedgate_core::FileReader;

/// Fixed `Last-Modified` value: the content of a torrent file never changes,
/// so the epoch keeps caches stable across instances.
pub const EPOCH_HTTP_DATE: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

/// Chunk size of the response body stream.
const STREAM_CHUNK: usize = 64 * 1024;

/// Boxed response body stream handed to wrappers.
pub type BodyStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

enum Resolved {
    Full,
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

/// Resolve a `Range` header against a resource of `len` bytes. Only the
/// first range of a multi-range request is honored.
fn resolve(range: Option<&str>, len: u64) -> Resolved {
    let Some(range) = range else {
        return Resolved::Full;
    };
    let Some(spec) = range.strip_prefix("bytes=") else {
        return Resolved::Full;
    };
    let Some(first) = spec.split(',').next().map(str::trim) else {
        return Resolved::Full;
    };
    let Some((start_raw, end_raw)) = first.split_once('-') else {
        return Resolved::Unsatisfiable;
    };

    if start_raw.is_empty() {
        // Suffix form: last N bytes.
        let Ok(suffix) = end_raw.parse::<u64>() else {
            return Resolved::Unsatisfiable;
        };
        if suffix == 0 || len == 0 {
            return Resolved::Unsatisfiable;
        }
        let start = len.saturating_sub(suffix);
        return Resolved::Partial {
            start,
            end: len - 1,
        };
    }

    let Ok(start) = start_raw.parse::<u64>() else {
        return Resolved::Unsatisfiable;
    };
    if start >= len {
        return Resolved::Unsatisfiable;
    }
    let end = if end_raw.is_empty() {
        len - 1
    } else {
        match end_raw.parse::<u64>() {
            Ok(end) if end >= start => end.min(len - 1),
            _ => return Resolved::Unsatisfiable,
        }
    };
    Resolved::Partial { start, end }
}

/// Serve `reader` honoring `Range`, `If-None-Match`, and `HEAD`, writing
/// `206 Partial Content` or `200 OK`. `wrap` may interpose on the body
/// stream (touch extension, snapshot accounting); it sees exactly the bytes
/// sent to the client.
pub async fn serve_reader<W>(
    method: &Method,
    request_headers: &HeaderMap,
    mut reader: Box<dyn FileReader>,
    len: u64,
    mut response_headers: HeaderMap,
    wrap: W,
) -> Response
where
    W: FnOnce(BodyStream) -> BodyStream,
{
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response_headers.insert(
        header::LAST_MODIFIED,
        HeaderValue::from_static(EPOCH_HTTP_DATE),
    );

    let not_modified = matches!(
        (
            request_headers.get(header::IF_NONE_MATCH),
            response_headers.get(header::ETAG),
        ),
        (Some(if_none_match), Some(etag)) if if_none_match == etag
    );
    if not_modified {
        return build(StatusCode::NOT_MODIFIED, response_headers, None, Body::empty());
    }

    let range = request_headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());
    let (status, start, count) = match resolve(range, len) {
        Resolved::Full => (StatusCode::OK, 0, len),
        Resolved::Partial { start, end } => {
            let value = format!("bytes {start}-{end}/{len}");
            response_headers.insert(
                header::CONTENT_RANGE,
                HeaderValue::from_str(&value).unwrap_or(HeaderValue::from_static("")),
            );
            (StatusCode::PARTIAL_CONTENT, start, end - start + 1)
        }
        Resolved::Unsatisfiable => {
            let value = format!("bytes */{len}");
            response_headers.insert(
                header::CONTENT_RANGE,
                HeaderValue::from_str(&value).unwrap_or(HeaderValue::from_static("")),
            );
            return build(
                StatusCode::RANGE_NOT_SATISFIABLE,
                response_headers,
                None,
                Body::empty(),
            );
        }
    };

    if method == Method::HEAD || count == 0 {
        return build(status, response_headers, Some(count), Body::empty());
    }

    if let Err(err) = reader.seek(std::io::SeekFrom::Start(start)).await {
        return build(
            StatusCode::INTERNAL_SERVER_ERROR,
            HeaderMap::new(),
            None,
            Body::from(format!("seek failed: {err}")),
        );
    }
    let limited = reader.take(count);
    let stream: BodyStream = Box::pin(ReaderStream::with_capacity(limited, STREAM_CHUNK));
    let stream = wrap(stream);
    build(
        status,
        response_headers,
        Some(count),
        Body::from_stream(stream),
    )
}

fn build(
    status: StatusCode,
    headers: HeaderMap,
    content_length: Option<u64>,
    body: Body,
) -> Response {
    let mut builder = Response::builder().status(status);
    if let Some(target) = builder.headers_mut() {
        target.extend(headers);
        if let Some(len) = content_length {
            if let Ok(value) = HeaderValue::from_str(&len.to_string()) {
                target.insert(header::CONTENT_LENGTH, value);
            }
        }
    }
    builder.body(body).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partial(range: &str, len: u64) -> Option<(u64, u64)> {
        match resolve(Some(range), len) {
            Resolved::Partial { start, end } => Some((start, end)),
            _ => None,
        }
    }

    #[test]
    fn parses_the_common_forms() {
        assert_eq!(partial("bytes=0-65535", 1 << 30), Some((0, 65535)));
        assert_eq!(partial("bytes=100-", 200), Some((100, 199)));
        assert_eq!(partial("bytes=-50", 200), Some((150, 199)));
        assert_eq!(partial("bytes=0-999999", 100), Some((0, 99)));
    }

    #[test]
    fn rejects_out_of_bounds_starts() {
        assert!(matches!(
            resolve(Some("bytes=200-"), 200),
            Resolved::Unsatisfiable
        ));
        assert!(matches!(
            resolve(Some("bytes=5-2"), 200),
            Resolved::Unsatisfiable
        ));
    }

    #[test]
    fn missing_or_foreign_units_serve_fully() {
        assert!(matches!(resolve(None, 10), Resolved::Full));
        assert!(matches!(resolve(Some("items=0-4"), 10), Resolved::Full));
    }

    #[test]
    fn only_the_first_range_is_honored() {
        assert_eq!(partial("bytes=0-4, 10-14", 100), Some((0, 4)));
    }
}
