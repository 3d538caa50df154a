//! Request-level error mapping.
//!
//! Within a request any error becomes a `500` with a short text body, except
//! `NotFound` which becomes `404`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use seedgate_core::Error;

/// Error wrapper giving core errors an HTTP rendering.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            Error::NotFound(detail) => (StatusCode::NOT_FOUND, detail.clone()),
            other => {
                warn!(error = %other, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        };
        (status, body).into_response()
    }
}
