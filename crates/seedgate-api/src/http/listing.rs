//! Index and per-torrent directory listings, plus the `source.torrent`
//! re-download.

use std::fmt::Write as _;
use std::sync::Arc;

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};

use seedgate_core::{Error, InfoHash};

use crate::error::ApiError;
use crate::state::ApiState;

/// `GET /`: anchors for every info-hash known to the file store.
pub(crate) fn index(state: &Arc<ApiState>) -> Response {
    let mut body = String::new();
    for hash in state.map.meta().file_store().list() {
        let _ = writeln!(body, "<a href=\"/{hash}/\">{hash}</a><br />");
    }
    Html(body).into_response()
}

/// `GET /<hash>/`: `..`, `source.torrent`, then every file path.
pub(crate) async fn torrent_listing(
    state: &Arc<ApiState>,
    hash: InfoHash,
) -> Result<Response, ApiError> {
    let descriptor = state.map.meta().descriptor(hash).await?;
    let mut body = String::new();
    let _ = writeln!(body, "<a href=\"../\">..</a><br />");
    let _ = writeln!(
        body,
        "<a href=\"source.torrent\">source.torrent</a><br />"
    );
    for file in descriptor.files() {
        let _ = writeln!(body, "<a href=\"/{hash}/{0}\">{0}</a><br />", file.path);
    }
    Ok(Html(body).into_response())
}

/// `GET /<hash>/source.torrent`: the metainfo re-encoded as bencode.
pub(crate) async fn source_torrent(
    state: &Arc<ApiState>,
    hash: InfoHash,
) -> Result<Response, ApiError> {
    let descriptor = state.map.meta().descriptor(hash).await?;
    let mut response = descriptor.metainfo_bytes().into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/x-bittorrent"),
    );
    Ok(response)
}

/// `GET /<hash>/<path>?done`: liveness probe for the cache short circuit.
pub(crate) async fn done_probe(
    state: &Arc<ApiState>,
    hash: InfoHash,
    path: &str,
) -> Result<Response, ApiError> {
    let descriptor = state.map.meta().descriptor(hash).await?;
    let file_index = descriptor
        .file_index(path)
        .ok_or_else(|| Error::not_found(format!("no file {path} in {hash}")))?;
    let file = &descriptor.files()[file_index];
    if state.cache.get(hash, file).await?.is_some() {
        Ok(StatusCode::OK.into_response())
    } else {
        Ok(StatusCode::NOT_FOUND.into_response())
    }
}
