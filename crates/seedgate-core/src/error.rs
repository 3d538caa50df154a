//! Contractual error kinds shared by the gateway's ports and services.

use std::io;

/// Convenience alias used across the workspace.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors classified by how callers must react to them.
///
/// `NotFound` is returned and never retried; `Timeout` and `Transient` are
/// surfaced and re-attempted on the caller's next natural cadence;
/// `Integrity` selects a degraded mode; `Fatal` aborts the operation and
/// propagates to the supervisor.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The torrent, file, piece, or side object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A deadline elapsed while talking to a collaborator.
    #[error("timeout: {0}")]
    Timeout(String),

    /// A retryable upstream failure (object-store 5xx, network blip).
    #[error("transient: {0}")]
    Transient(String),

    /// Stored state disagrees with the descriptor; degraded mode applies.
    #[error("integrity: {0}")]
    Integrity(String),

    /// Unrecoverable failure; the operation aborts and propagates upward.
    #[error("fatal: {0}")]
    Fatal(String),

    /// Raw I/O failure from the filesystem layer.
    #[error("i/o failure during {operation}")]
    Io {
        /// Short name of the failed operation.
        operation: &'static str,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Build a `NotFound` error.
    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::NotFound(detail.into())
    }

    /// Build a `Timeout` error.
    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::Timeout(detail.into())
    }

    /// Build a `Transient` error.
    pub fn transient(detail: impl Into<String>) -> Self {
        Self::Transient(detail.into())
    }

    /// Build an `Integrity` error.
    pub fn integrity(detail: impl Into<String>) -> Self {
        Self::Integrity(detail.into())
    }

    /// Build a `Fatal` error.
    pub fn fatal(detail: impl Into<String>) -> Self {
        Self::Fatal(detail.into())
    }

    /// Wrap an I/O error with the operation that produced it.
    pub fn io(operation: &'static str, source: io::Error) -> Self {
        Self::Io { operation, source }
    }

    /// Whether the error names something that does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io { source, .. } => source,
            Error::NotFound(detail) => io::Error::new(io::ErrorKind::NotFound, detail),
            Error::Timeout(detail) => io::Error::new(io::ErrorKind::TimedOut, detail),
            other => io::Error::other(other.to_string()),
        }
    }
}
