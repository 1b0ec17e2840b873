//! Connection Session
//!
//! One task per accepted socket. The session owns the read half, feeds bytes
//! through a [`FrameDecoder`], and acts on each parsed message. It is the only
//! place a connection is closed.
//!
//! # State machine
//!
//! ```text
//! Open ──bind──────────► Bound ◄──┐
//!   │                      │      │ bind
//!   └──identify──► AwaitingRegistration
//!
//! any ──EOF / error / exit / malformed / shutdown──► Closed
//! ```

use std::{fmt, sync::Arc};

use bytes::{Bytes, BytesMut};
use giesela_proto::{ClientMessage, FrameDecoder, ProtocolError, ServerMessage};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::watch,
};

use crate::{
    ServerContext,
    connection::{ConnectionHandle, ConnectionId},
    error::ServerError,
    registry::SessionRegistry,
};

/// Lifecycle state of a connection session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, nothing received yet
    Open,
    /// Sent a registration request, waiting for its token to be presented
    AwaitingRegistration,
    /// Bound to a room and user
    Bound,
    /// Read loop exited; registry purged
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CloseReason {
    /// Peer closed its end (EOF)
    PeerClosed,
    /// Client sent `exit`, `sdown` or an empty message
    ClientExit,
    /// Client sent bytes that do not parse
    Protocol(ProtocolError),
    /// Socket read or write failed
    Transport(String),
    /// Server is shutting down
    Shutdown,
}

impl From<ServerError> for CloseReason {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Protocol(e) => Self::Protocol(e),
            ServerError::Transport(e) => Self::Transport(e),
            other => Self::Transport(other.to_string()),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("peer closed"),
            Self::ClientExit => f.write_str("client exit"),
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Shutdown => f.write_str("server shutdown"),
        }
    }
}

/// Purges the registry when dropped, so cleanup also runs on panic or
/// cancellation of the session task.
struct RegistryGuard {
    registry: Arc<SessionRegistry>,
    id: ConnectionId,
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        if self.registry.purge(self.id) {
            tracing::debug!(connection_id = self.id, "purged connection from registry");
        }
    }
}

/// Per-connection read loop and message handling.
pub(crate) struct ConnectionSession<R> {
    handle: ConnectionHandle,
    reader: R,
    decoder: FrameDecoder,
    buffer: BytesMut,
    state: SessionState,
    context: Arc<ServerContext>,
    shutdown: watch::Receiver<bool>,
}

impl<R: AsyncRead + Unpin + Send> ConnectionSession<R> {
    pub(crate) fn new(
        handle: ConnectionHandle,
        reader: R,
        context: Arc<ServerContext>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            handle,
            reader,
            decoder: FrameDecoder::new(context.config.max_frame_size),
            buffer: BytesMut::with_capacity(context.config.read_buffer_size),
            state: SessionState::Open,
            context,
            shutdown,
        }
    }

    /// Serve the connection until it closes.
    ///
    /// Cleanup (registry purge, write-half shutdown) runs exactly once on the
    /// way out. Cleanup failures are logged, not returned.
    pub(crate) async fn run(mut self) -> CloseReason {
        let guard =
            RegistryGuard { registry: Arc::clone(&self.context.registry), id: self.handle.id() };

        let reason = self.read_loop().await;
        self.transition(SessionState::Closed);

        drop(guard);
        if let Err(e) = self.handle.shutdown().await {
            tracing::debug!(connection_id = self.handle.id(), error = %e, "write half shutdown failed");
        }

        reason
    }

    async fn read_loop(&mut self) -> CloseReason {
        loop {
            loop {
                match self.decoder.decode(&mut self.buffer) {
                    Ok(Some(payload)) => {
                        if let Some(reason) = self.process(payload).await {
                            return reason;
                        }
                    },
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(connection_id = self.handle.id(), error = %e, "malformed frame");
                        return CloseReason::Protocol(e);
                    },
                }
            }

            if *self.shutdown.borrow() {
                return CloseReason::Shutdown;
            }

            self.buffer.reserve(self.context.config.read_buffer_size);
            let awaiting_prefix = self.decoder.awaiting_prefix(&self.buffer);

            let read = tokio::select! {
                read = self.reader.read_buf(&mut self.buffer) => Some(read),
                _ = self.shutdown.changed() => return CloseReason::Shutdown,
                () = self.handle.closed() => {
                    return CloseReason::Transport("send failed, stream poisoned".to_string());
                },
                () = tokio::time::sleep(self.context.config.prefix_idle_timeout), if awaiting_prefix => None,
            };

            // A bare number went quiet; it was never a length prefix
            let Some(read) = read else {
                match self.decoder.flush_bare(&mut self.buffer) {
                    Ok(Some(payload)) => {
                        if let Some(reason) = self.process(payload).await {
                            return reason;
                        }
                    },
                    Ok(None) => {},
                    Err(e) => return CloseReason::Protocol(e),
                }
                continue;
            };

            match read {
                Ok(0) => return CloseReason::PeerClosed,
                Ok(n) => tracing::trace!(connection_id = self.handle.id(), bytes = n, "read"),
                Err(e) => return CloseReason::Transport(e.to_string()),
            }
        }
    }

    /// Handle one payload and classify any error. Returns a close reason if
    /// the session must end.
    async fn process(&mut self, payload: Bytes) -> Option<CloseReason> {
        match self.handle_payload(payload).await {
            Ok(reason) => reason,
            Err(e) if e.is_fatal_for_connection() => {
                tracing::warn!(connection_id = self.handle.id(), error = %e, "closing connection");
                Some(e.into())
            },
            Err(e) => {
                tracing::warn!(connection_id = self.handle.id(), error = %e, "recovered, connection stays open");
                None
            },
        }
    }

    /// Act on one decoded payload.
    ///
    /// Returns a close reason for a clean exit. Errors are classified by the
    /// caller: protocol and transport errors close, engine errors do not.
    async fn handle_payload(&mut self, payload: Bytes) -> Result<Option<CloseReason>, ServerError> {
        let id = self.handle.id();

        let text = std::str::from_utf8(&payload).map_err(|_| ProtocolError::InvalidUtf8)?;
        let message = ClientMessage::parse(text)?;
        tracing::debug!(connection_id = id, ?message, "received");

        if let Some((room_id, user_id)) = message.binding() {
            self.context.registry.bind(&self.handle, room_id, user_id);
            self.transition(SessionState::Bound);
        }

        match message {
            ClientMessage::Ping => self.handle.send(&ServerMessage::Pong).await?,
            ClientMessage::Disconnect => return Ok(Some(CloseReason::ClientExit)),
            ClientMessage::Identify { token } => {
                self.context.registry.await_registration(&self.handle, &token);
                self.transition(SessionState::AwaitingRegistration);
                tracing::info!(connection_id = id, "awaiting registration");
            },
            ClientMessage::SendInformation { room_id, .. } => {
                let broadcaster = Arc::clone(&self.context.broadcaster);
                let handle = self.handle.clone();
                tokio::spawn(async move {
                    let snapshot = broadcaster.snapshot(&room_id).await;
                    if let Err(e) = handle.send(&ServerMessage::Information(snapshot)).await {
                        tracing::debug!(connection_id = handle.id(), %room_id, error = %e, "information reply failed");
                    }
                });
            },
            ClientMessage::Command { room_id, user_id, command } => {
                tracing::debug!(connection_id = id, %room_id, %user_id, command = command.name(), "dispatching");
                self.context.dispatcher.dispatch(&room_id, &user_id, command)?;
            },
            ClientMessage::Unrecognized { verb, room_id, user_id, arguments } => {
                tracing::debug!(connection_id = id, %verb, %room_id, %user_id, ?arguments, "ignoring unrecognized message");
            },
        }

        Ok(None)
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            tracing::debug!(connection_id = self.handle.id(), from = ?self.state, to = ?next, "session state");
            self.state = next;
        }
    }
}
