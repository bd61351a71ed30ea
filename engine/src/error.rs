//! Error types for the Notably engine.

use crate::kv::KvError;
use thiserror::Error;

/// All possible errors from the Notably engine.
///
/// The first four carry stable discriminants so an edge can map them onto
/// protocol status codes; `Backend` wraps the failing operation name around
/// whatever the key-value layer reported. The engine never retries.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{op}: backend error: {source}")]
    Backend {
        op: &'static str,
        #[source]
        source: KvError,
    },
}

impl Error {
    /// Wrap a KV failure with the name of the failing engine operation.
    pub(crate) fn backend(op: &'static str, source: KvError) -> Self {
        Error::Backend { op, source }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
