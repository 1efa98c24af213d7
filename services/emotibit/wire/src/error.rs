//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// A required header field is absent or not numeric
    #[error("malformed header: {0}")]
    MalformedHeader(&'static str),

    /// Declared data length exceeds the fields actually present
    #[error("truncated packet: declared {declared} fields, {available} available")]
    Truncated {
        /// Payload length announced by the header
        declared: usize,
        /// Payload fields actually present
        available: usize,
    },

    /// Type tag is not two ASCII characters
    #[error("invalid type tag {0:?}")]
    TypeTag(String),
}
