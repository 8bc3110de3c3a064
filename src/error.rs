//! Unified error type for the store, transport and server layers.
//!
//! Every fallible operation in the crate returns [`ServerResult`]. Variants
//! carry enough context (paths, peer addresses, field names) to be logged
//! usefully without the caller having to reach back into the originating
//! component.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the store, transport, codec and server components.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("I/O error: {source} (path: {path:?})")]
    Io {
        source: io::Error,
        path: Option<PathBuf>,
    },

    #[error("no key found for hash {key_hash}")]
    NotFound { key_hash: String },

    #[error("codec error: {reason}")]
    Codec { reason: String },

    #[error("unknown control message variant (tag {tag})")]
    UnknownVariant { tag: u8 },

    #[error("short read while expecting a {expected}-byte IV (got {got})")]
    ShortIv { expected: usize, got: usize },

    #[error("crypto error: {reason}")]
    Crypto { reason: String },

    #[error("configuration error: {field} - {message}")]
    Config { field: String, message: String },

    #[error("no peer registered for address {addr}")]
    PeerNotFound { addr: SocketAddr },

    #[error("no peer answered within the fetch window for key hash {key_hash}")]
    FetchTimeout { key_hash: String },
}

/// Result type alias used throughout the crate.
pub type ServerResult<T> = Result<T, ServerError>;

/// Broad error categories, used for logging and for deciding whether an
/// error is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    FileSystem,
    Network,
    Codec,
    Configuration,
    Crypto,
    NotFound,
}

impl ServerError {
    /// Wrap a raw I/O error with the path that was being operated on.
    pub fn io(source: io::Error, path: impl Into<PathBuf>) -> Self {
        ServerError::Io {
            source,
            path: Some(path.into()),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ServerError::Io { .. } => ErrorCategory::FileSystem,
            ServerError::PeerNotFound { .. } | ServerError::FetchTimeout { .. } => {
                ErrorCategory::Network
            }
            ServerError::Codec { .. } | ServerError::UnknownVariant { .. } => ErrorCategory::Codec,
            ServerError::Config { .. } => ErrorCategory::Configuration,
            ServerError::Crypto { .. } | ServerError::ShortIv { .. } => ErrorCategory::Crypto,
            ServerError::NotFound { .. } => ErrorCategory::NotFound,
        }
    }

    /// Whether the failed operation is plausibly worth retrying (transient
    /// I/O conditions, but never codec desync or missing data).
    pub fn is_retryable(&self) -> bool {
        match self {
            ServerError::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionAborted
            ),
            ServerError::FetchTimeout { .. } => true,
            _ => false,
        }
    }
}

impl From<io::Error> for ServerError {
    fn from(source: io::Error) -> Self {
        ServerError::Io { source, path: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorizes_io_errors() {
        let err = ServerError::io(io::Error::new(io::ErrorKind::NotFound, "gone"), "some/path");
        assert_eq!(err.category(), ErrorCategory::FileSystem);
    }

    #[test]
    fn retryable_distinguishes_timeout_from_not_found() {
        let timeout = ServerError::FetchTimeout {
            key_hash: "abc".into(),
        };
        assert!(timeout.is_retryable());

        let not_found = ServerError::NotFound {
            key_hash: "abc".into(),
        };
        assert!(!not_found.is_retryable());
    }
}
