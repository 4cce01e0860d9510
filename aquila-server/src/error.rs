//! Server error types.

use thiserror::Error;

/// Errors surfaced by the registry and the transport layer.
#[derive(Debug, Error)]
pub enum ServerError {
    /// An operation referenced a connection with no session behind it,
    /// typically because the session was taken over or never established.
    #[error("no session for this connection")]
    UnknownWriter,

    /// TLS configuration or handshake error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Offline store failure.
    #[error("storage error: {0}")]
    Storage(#[from] aquila_storage::StorageError),
}
