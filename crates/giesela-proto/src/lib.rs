//! Giesela companion wire protocol.
//!
//! The control channel is plain UTF-8 text over TCP. Every message the server
//! sends is wrapped in a length-prefixed [`Frame`] (`"<N>==<payload>"`).
//! Older clients send unframed text, so the
//! [`FrameDecoder`] accepts both shapes.
//!
//! # Layers
//!
//! - [`frame`]: byte-level framing and incremental reassembly
//! - [`message`]: semicolon-delimited client and server messages

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
pub mod frame;
pub mod message;

pub use errors::{ProtocolError, Result};
pub use frame::{DEFAULT_MAX_FRAME_SIZE, Frame, FrameDecoder};
pub use message::{
    ClientMessage, Command, DEFAULT_COVER_URL, PlayStatus, RoomSnapshot, ServerMessage,
    USER_IDENTIFICATION,
};
