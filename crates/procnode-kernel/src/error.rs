//! Node tree error types.

use std::io;
use thiserror::Error;

/// Error returned by node and router operations.
///
/// The first four variants are structural: they describe a caller asking for
/// something the tree cannot do. `Backing` wraps a failure raised by a
/// publisher's provider or sink.
#[derive(Debug, Error)]
pub enum ProcError {
    /// Path or key not served by any node.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation the node does not implement (write on a read-only file,
    /// growing a provider-backed file).
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Read, write or close without a prior successful open.
    #[error("no open session")]
    NoOpenSession,

    /// Open mode incompatible with an existing session or the node's
    /// capabilities.
    #[error("access conflict: {0}")]
    AccessConflict(String),

    /// Provider or sink failure.
    #[error("backing store error: {0}")]
    Backing(String),

    /// Path that cannot be normalized.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Pending write would exceed the configured ceiling.
    #[error("write exceeds {limit} byte limit")]
    TooLarge { limit: usize },
}

impl ProcError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an Unsupported error.
    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported(what.into())
    }

    /// Create an AccessConflict error.
    pub fn access_conflict(reason: impl Into<String>) -> Self {
        Self::AccessConflict(reason.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Wrap a provider or sink failure, keeping the whole context chain.
    pub fn backing(err: anyhow::Error) -> Self {
        Self::Backing(format!("{err:#}"))
    }

    /// Short stable tag for wire protocols and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcError::NotFound(_) => "not-found",
            ProcError::Unsupported(_) => "unsupported",
            ProcError::NoOpenSession => "no-session",
            ProcError::AccessConflict(_) => "access-conflict",
            ProcError::Backing(_) => "backing",
            ProcError::InvalidPath(_) => "invalid-path",
            ProcError::TooLarge { .. } => "too-large",
        }
    }
}

/// Convert ProcError to std::io::Error so OS adapters can map to errno.
impl From<ProcError> for io::Error {
    fn from(e: ProcError) -> Self {
        match e {
            ProcError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            ProcError::Unsupported(msg) => io::Error::new(io::ErrorKind::Unsupported, msg),
            ProcError::NoOpenSession => {
                io::Error::new(io::ErrorKind::InvalidInput, "no open session")
            }
            ProcError::AccessConflict(msg) => io::Error::new(io::ErrorKind::PermissionDenied, msg),
            ProcError::Backing(msg) => io::Error::other(msg),
            ProcError::InvalidPath(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            ProcError::TooLarge { limit } => io::Error::new(
                io::ErrorKind::FileTooLarge,
                format!("write exceeds {limit} byte limit"),
            ),
        }
    }
}

/// Result type for node operations.
pub type ProcResult<T> = Result<T, ProcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backing_keeps_context_chain() {
        let err = anyhow::anyhow!("disk gone").context("saving settings");
        let proc_err = ProcError::backing(err);
        assert_eq!(proc_err.kind(), "backing");
        assert_eq!(
            proc_err.to_string(),
            "backing store error: saving settings: disk gone"
        );
    }

    #[test]
    fn test_io_error_mapping() {
        let io_err: io::Error = ProcError::not_found("/app/x").into();
        assert_eq!(io_err.kind(), io::ErrorKind::NotFound);

        let io_err: io::Error = ProcError::access_conflict("busy").into();
        assert_eq!(io_err.kind(), io::ErrorKind::PermissionDenied);

        let io_err: io::Error = ProcError::unsupported("resize").into();
        assert_eq!(io_err.kind(), io::ErrorKind::Unsupported);
    }
}
