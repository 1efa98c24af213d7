//! Session error types.

use thiserror::Error;

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// No free port found for a socket
    #[error("bind conflict: no free port for {socket} socket from {first_port} after {attempts} attempts")]
    BindConflict {
        /// Which socket was being bound
        socket: &'static str,
        /// First port tried
        first_port: u16,
        /// Number of ports tried
        attempts: u16,
    },

    /// No local network is eligible for advertising
    #[error("no available network")]
    NoAvailableNetwork,

    /// Socket I/O error
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Session result type
pub type Result<T> = std::result::Result<T, SessionError>;

/// Whether an I/O error only means "nothing to do this cycle"
pub fn is_transient(err: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        err.kind(),
        ErrorKind::WouldBlock
            | ErrorKind::Interrupted
            | ErrorKind::TimedOut
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
    )
}
