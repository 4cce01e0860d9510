//! Credential validation for CONNECT.

use thiserror::Error;

/// Why a credential check failed.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("bad user name or password")]
    BadCredentials,

    /// The backend itself failed (file unreadable, directory unreachable).
    #[error("authentication backend failure: {0}")]
    Backend(String),
}

/// Validates the username/password pair from a CONNECT packet.
///
/// Any error rejects the CONNECT with reason code `NotAuthorized` (135).
/// When no authenticator is configured the broker accepts every client.
pub trait Authenticator: Send + Sync {
    fn validate(&self, username: &str, password: &[u8]) -> Result<(), AuthError>;
}
