//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while framing or parsing control-channel messages.
///
/// Every variant is fatal for the connection that produced it. The server
/// never replies with an error message; the client observes the disconnect.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// Frame does not start with a decimal byte count
    #[error("invalid length prefix: {0:?}")]
    InvalidLength(String),

    /// Length prefix is not followed by `==`
    #[error("missing '==' separator after length prefix")]
    MissingSeparator,

    /// Declared length disagrees with the payload that followed
    #[error("length mismatch: declared {declared} bytes, got {actual}")]
    LengthMismatch {
        /// Byte count from the prefix
        declared: usize,
        /// Bytes actually present
        actual: usize,
    },

    /// Frame exceeds the configured ceiling
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Declared or buffered size
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// Payload is not valid UTF-8
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    /// Message has fewer than the three mandatory fields
    #[error("malformed message: expected at least {expected} fields, got {actual}")]
    MissingFields {
        /// Minimum field count
        expected: usize,
        /// Fields present
        actual: usize,
    },

    /// Command is missing an argument it requires
    #[error("missing argument for {0}")]
    MissingArgument(&'static str),

    /// Volume argument is not a finite number
    #[error("invalid volume: {0:?}")]
    InvalidVolume(String),
}
