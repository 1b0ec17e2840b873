//! Shared write side of a client connection.
//!
//! Only the owning session reads from a socket, but the broadcaster, the
//! registration path and the session itself all write to it. Every write goes
//! through [`ConnectionHandle`], which serializes whole frames behind a
//! per-connection async lock so frames from different writers never
//! interleave.

use std::{
    fmt,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use giesela_proto::{Frame, ServerMessage};
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::{Mutex, Notify},
};

use crate::error::ServerError;

/// Server-assigned connection identity. Unique for the process lifetime.
pub type ConnectionId = u64;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Cheap, clonable reference to a connection's write half.
///
/// Clones share the same socket. Holding a handle never keeps the session
/// alive; once the session closes, sends fail with a transport error.
///
/// A send that fails or times out may leave part of a frame on the socket.
/// The handle is then poisoned: later sends fail fast and the owning session
/// is woken to close the connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    writer: Mutex<BoxedWriter>,
    send_timeout: Duration,
    closed: AtomicBool,
    poisoned: Notify,
}

impl ConnectionHandle {
    /// Wrap a write half.
    pub fn new(
        id: ConnectionId,
        peer: Option<SocketAddr>,
        writer: impl AsyncWrite + Send + Unpin + 'static,
        send_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id,
                peer,
                writer: Mutex::new(Box::new(writer)),
                send_timeout,
                closed: AtomicBool::new(false),
                poisoned: Notify::new(),
            }),
        }
    }

    /// Connection identity.
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Whether the socket is shut down or poisoned by a failed send.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Resolves once the handle is closed.
    pub(crate) async fn closed(&self) {
        let notified = self.inner.poisoned.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.is_closed() {
            return;
        }
        notified.await;
    }

    /// Mark the stream unusable and wake the owning session.
    pub(crate) fn poison(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(connection_id = self.inner.id, peer = ?self.inner.peer, "connection handle poisoned");
        }
        self.inner.poisoned.notify_waiters();
    }

    /// Frame and send a server message.
    pub async fn send(&self, message: &ServerMessage) -> Result<(), ServerError> {
        self.send_frame(&message.to_frame()).await
    }

    /// Send one frame, whole, or fail.
    ///
    /// # Errors
    ///
    /// - `ServerError::Transport` if the socket is closed, the write fails, or
    ///   the write does not finish within the send timeout. The last two
    ///   poison the handle.
    pub async fn send_frame(&self, frame: &Frame) -> Result<(), ServerError> {
        if self.is_closed() {
            return Err(ServerError::Transport("connection closed".to_string()));
        }

        let bytes = frame.to_bytes();
        let mut writer = self.inner.writer.lock().await;

        // A previous holder of the lock may have poisoned the stream
        if self.is_closed() {
            return Err(ServerError::Transport("connection closed".to_string()));
        }

        let write = async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        };

        let result = match tokio::time::timeout(self.inner.send_timeout, write).await {
            Ok(result) => result.map_err(ServerError::from),
            Err(_) => Err(ServerError::Transport(format!(
                "send timed out after {:?}",
                self.inner.send_timeout
            ))),
        };

        if result.is_err() {
            self.poison();
        }
        result
    }

    /// Shut down the write half. Only the owning session calls this.
    pub(crate) async fn shutdown(&self) -> std::io::Result<()> {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.poisoned.notify_waiters();
        let mut writer = self.inner.writer.lock().await;
        writer.shutdown().await
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
