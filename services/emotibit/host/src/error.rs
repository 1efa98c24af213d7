//! Host facade errors.

use emotibit_session::SessionError;
use thiserror::Error;

/// Errors returned by [`crate::WifiHost`]
#[derive(Error, Debug)]
pub enum HostError {
    /// Binding sockets or another session operation failed
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// The host has not been initialized, or was destroyed
    #[error("host is not initialized")]
    NotInitialized,
}

/// Result type for host operations
pub type Result<T> = std::result::Result<T, HostError>;
