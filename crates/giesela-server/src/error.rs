//! Server error types.

use std::fmt;

use giesela_proto::ProtocolError;
use thiserror::Error;

use crate::engine::EngineError;

/// Errors that can occur in the server.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error (invalid bind address, zero connection ceiling,
    /// etc.).
    ///
    /// These are fatal errors that prevent server startup. Fix configuration
    /// and restart.
    Config(String),

    /// Transport/network error (socket I/O failure, send timeout, etc.).
    ///
    /// Fatal for the connection it happened on. The server keeps serving
    /// other clients.
    Transport(String),

    /// Protocol error (malformed frame, too few fields, etc.).
    ///
    /// Indicates a client sent malformed data. Fatal for that connection. No
    /// error reply is sent; the client infers failure from the disconnect.
    Protocol(ProtocolError),

    /// Engine submission error.
    ///
    /// Recovered locally: logged, and the connection stays open.
    Engine(EngineError),
}

impl ServerError {
    /// Whether this error must close the connection it occurred on.
    pub fn is_fatal_for_connection(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Protocol(_))
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Protocol(err) => write!(f, "protocol error: {err}"),
            Self::Engine(err) => write!(f, "engine error: {err}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Protocol(err) => Some(err),
            Self::Engine(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err)
    }
}

impl From<EngineError> for ServerError {
    fn from(err: EngineError) -> Self {
        Self::Engine(err)
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Outcome of a registration lookup that found nothing.
///
/// A negative result for the caller, not a failure of the server.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// No connection is waiting for this token
    #[error("no pending registration for token")]
    NotFound,
}
