//! HTTP router and request dispatch.
//!
//! Paths follow the `/<hash>/<file path>` shape with arbitrary nesting, so
//! dispatch is manual from the fallback handler; the info-hash may also
//! arrive via `X-Info-Hash` when a proxy strips the leading path segment.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use percent_encoding::percent_decode_str;
use tower_http::trace::TraceLayer;

use seedgate_core::InfoHash;

use crate::error::ApiError;
use crate::state::ApiState;

pub mod listing;
pub mod range;
pub mod serve;
pub mod sse;

/// Header carrying the info-hash when the path does not.
const HEADER_INFO_HASH: &str = "x-info-hash";

/// Build the data-port router.
pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(root))
        .fallback(dispatch)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root(
    State(state): State<Arc<ApiState>>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let response = match header_hash(&headers) {
        Some(Ok(hash)) => torrent_scope(&state, hash, "", &query, &method, &headers).await,
        Some(Err(response)) => response,
        None => listing::index(&state),
    };
    state
        .metrics
        .inc_http_request("/", response.status().as_u16());
    response
}

async fn dispatch(
    State(state): State<Arc<ApiState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let path = percent_decode_str(uri.path()).decode_utf8_lossy();
    let trimmed = path.trim_start_matches('/');

    let (hash, rest) = match header_hash(&headers) {
        Some(Ok(hash)) => (hash, trimmed.trim_end_matches('/')),
        Some(Err(response)) => return response,
        None => {
            let (first, rest) = match trimmed.split_once('/') {
                Some((first, rest)) => (first, rest),
                None => (trimmed, ""),
            };
            match first.parse::<InfoHash>() {
                Ok(hash) => (hash, rest),
                Err(_) => {
                    let response = StatusCode::NOT_FOUND.into_response();
                    state.metrics.inc_http_request("unknown", 404);
                    return response;
                }
            }
        }
    };

    let response = torrent_scope(&state, hash, rest, &query, &method, &headers).await;
    state
        .metrics
        .inc_http_request(route_label(rest, &query), response.status().as_u16());
    response
}

async fn torrent_scope(
    state: &Arc<ApiState>,
    hash: InfoHash,
    rest: &str,
    query: &HashMap<String, String>,
    method: &Method,
    headers: &HeaderMap,
) -> Response {
    let outcome: Result<Response, ApiError> = async {
        if rest.is_empty() {
            return listing::torrent_listing(state, hash).await;
        }
        if rest == "source.torrent" {
            return listing::source_torrent(state, hash).await;
        }
        if query.contains_key("stats") {
            return Ok(sse::stat_events(state, hash, Some(rest.to_string())).into_response());
        }
        if query.contains_key("done") {
            return listing::done_probe(state, hash, rest).await;
        }
        let download = query.contains_key("download");
        serve::serve_file(
            Arc::clone(state),
            hash,
            rest,
            download,
            method.clone(),
            headers.clone(),
        )
        .await
    }
    .await;

    match outcome {
        Ok(mut response) => {
            serve::apply_cors(headers, response.headers_mut());
            response
        }
        Err(err) => {
            let mut response = err.into_response();
            serve::apply_cors(headers, response.headers_mut());
            response
        }
    }
}

fn header_hash(headers: &HeaderMap) -> Option<Result<InfoHash, Response>> {
    let value = headers.get(HEADER_INFO_HASH)?;
    let parsed = value
        .to_str()
        .ok()
        .and_then(|text| text.parse::<InfoHash>().ok());
    Some(match parsed {
        Some(hash) => Ok(hash),
        None => Err((StatusCode::BAD_REQUEST, "malformed X-Info-Hash").into_response()),
    })
}

fn route_label(rest: &str, query: &HashMap<String, String>) -> &'static str {
    if rest.is_empty() {
        "listing"
    } else if rest == "source.torrent" {
        "source-torrent"
    } else if query.contains_key("stats") {
        "stats"
    } else if query.contains_key("done") {
        "done"
    } else {
        "serve"
    }
}
