//! Giesela companion control-plane server.
//!
//! Companion apps keep a raw TCP connection open to receive live room state,
//! pair themselves with a playback session through a token handshake, and
//! send playback commands. This crate wires those connections to the playback
//! engine.
//!
//! # Architecture
//!
//! ```text
//! Server (accept loop) ──► ConnectionSession (task per client)
//!                               │            │
//!                               ▼            ▼
//!                       SessionRegistry   CommandDispatcher ──► EngineContext
//!                               ▲                                    ▲
//!                               └──────────── Broadcaster ───────────┘
//! ```
//!
//! The engine runs on its own task and is reached only through
//! [`EngineContext`]. Sessions never wait on it: commands are posted and their
//! outcomes logged elsewhere.
//!
//! # Components
//!
//! - [`Server`]: binds the listener and runs the accept loop
//! - [`ServerHandle`]: registration, broadcasts and shutdown from outside
//! - [`SessionRegistry`]: room, user and pending-token tables
//! - [`Broadcaster`]: room state and message fan-out
//! - [`CommandDispatcher`]: protocol commands into engine calls
//! - [`MemoryEngine`]: in-memory [`PlaybackEngine`] for standalone runs

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod broadcaster;
mod config;
mod connection;
mod dispatcher;
pub mod engine;
mod error;
mod registry;
pub mod resolver;
mod session;

use std::{net::SocketAddr, sync::Arc};

pub use broadcaster::{Broadcaster, video_id};
pub use config::ServerConfig;
pub use connection::{ConnectionHandle, ConnectionId};
pub use dispatcher::{CommandDispatcher, Outcome};
pub use engine::{EngineContext, EngineError, MemoryEngine, PlaybackEngine, RadioStation};
pub use error::{RegistrationError, ServerError};
use giesela_proto::ServerMessage;
pub use registry::{Registration, SessionRegistry};
pub use resolver::{MetadataResolver, TitleResolver};
use session::ConnectionSession;
pub use session::{CloseReason, SessionState};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{OwnedSemaphorePermit, Semaphore, watch},
    task::JoinHandle,
};

/// Components shared by every session and the server handle.
pub(crate) struct ServerContext {
    pub(crate) config: ServerConfig,
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) dispatcher: CommandDispatcher,
    pub(crate) broadcaster: Arc<Broadcaster>,
}

impl ServerContext {
    pub(crate) fn new(
        config: ServerConfig,
        engine: EngineContext,
        resolver: Arc<dyn MetadataResolver>,
    ) -> Arc<Self> {
        let registry = Arc::new(SessionRegistry::new());
        let broadcaster = Arc::new(Broadcaster::new(
            Arc::clone(&registry),
            engine.clone(),
            resolver,
            config.resolver_timeout,
        ));

        Arc::new(Self { config, registry, dispatcher: CommandDispatcher::new(engine), broadcaster })
    }
}

/// Companion control-plane server.
///
/// Owns the listener. Everything else lives in a shared context reachable
/// through [`ServerHandle`].
pub struct Server {
    listener: TcpListener,
    context: Arc<ServerContext>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Server {
    /// Validate `config` and bind the listener.
    ///
    /// # Errors
    ///
    /// - `ServerError::Config` if the configuration is invalid
    /// - `ServerError::Transport` if the address cannot be bound
    pub async fn bind(
        config: ServerConfig,
        engine: EngineContext,
        resolver: Arc<dyn MetadataResolver>,
    ) -> Result<Self, ServerError> {
        let addr = config.validate()?;
        let listener = TcpListener::bind(addr).await?;
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            listener,
            context: ServerContext::new(config, engine, resolver),
            shutdown: Arc::new(shutdown),
        })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle for driving the server from outside the accept loop.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle { context: Arc::clone(&self.context), shutdown: Arc::clone(&self.shutdown) }
    }

    /// Accept connections until shutdown.
    ///
    /// At the connection ceiling the loop stops accepting and retries after
    /// `accept_backoff`; pending clients wait in the listen backlog. Accept
    /// errors are logged and the loop continues. Returning drops the listener.
    pub async fn run(self) -> Result<(), ServerError> {
        let config = &self.context.config;
        tracing::info!(
            addr = %self.local_addr()?,
            max_connections = config.max_connections,
            "server listening"
        );

        let permits = Arc::new(Semaphore::new(config.max_connections));
        let mut shutdown = self.shutdown.subscribe();

        let periodic = config.broadcast_interval.map(|interval| {
            let broadcaster = Arc::clone(&self.context.broadcaster);
            tokio::spawn(broadcaster.run_periodic(interval, self.shutdown.subscribe()))
        });

        let mut next_id: ConnectionId = 1;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                tracing::warn!(
                    max_connections = config.max_connections,
                    backoff = ?config.accept_backoff,
                    "connection limit reached, pausing accept"
                );
                tokio::select! {
                    () = tokio::time::sleep(config.accept_backoff) => continue,
                    _ = shutdown.changed() => break,
                }
            };

            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                _ = shutdown.changed() => break,
            };

            match accepted {
                Ok((stream, peer)) => {
                    self.spawn_session(next_id, stream, peer, permit);
                    next_id += 1;
                },
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                },
            }
        }

        tracing::info!("server stopped accepting");

        if let Some(periodic) = periodic {
            join_logged(periodic, "periodic broadcast").await;
        }

        Ok(())
    }

    fn spawn_session(
        &self,
        id: ConnectionId,
        stream: TcpStream,
        peer: SocketAddr,
        permit: OwnedSemaphorePermit,
    ) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(connection_id = id, error = %e, "failed to set TCP_NODELAY");
        }

        let (reader, writer) = stream.into_split();
        let handle = ConnectionHandle::new(id, Some(peer), writer, self.context.config.send_timeout);
        let session =
            ConnectionSession::new(handle, reader, Arc::clone(&self.context), self.shutdown.subscribe());

        tracing::info!(connection_id = id, %peer, "connection accepted");

        tokio::spawn(async move {
            let _permit = permit;
            let reason = session.run().await;
            tracing::info!(connection_id = id, %peer, %reason, "connection closed");
        });
    }
}

/// Wait for a background task, logging a panic or cancellation. Returns
/// whether it finished cleanly.
async fn join_logged(task: JoinHandle<()>, name: &'static str) -> bool {
    match task.await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(task = name, error = %e, "background task failed");
            false
        },
    }
}

/// Clonable control surface of a running server.
#[derive(Clone)]
pub struct ServerHandle {
    context: Arc<ServerContext>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl ServerHandle {
    /// Complete a registration handshake.
    ///
    /// Consumes the first connection waiting on `token` (case-insensitive),
    /// sends it `USERINFORMATION;<room>;<user>` and reports the pairing. A
    /// failed send is logged; the token still counts as consumed.
    ///
    /// # Errors
    ///
    /// - `RegistrationError::NotFound` if no connection waits on the token
    pub async fn resolve_registration(
        &self,
        token: &str,
        room_id: &str,
        user_id: &str,
    ) -> Result<Registration, RegistrationError> {
        let handle = self.context.registry.take_pending(token).ok_or(RegistrationError::NotFound)?;

        let reply =
            ServerMessage::UserInformation { room_id: room_id.to_string(), user_id: user_id.to_string() };
        match handle.send(&reply).await {
            Ok(()) => {
                tracing::info!(connection_id = handle.id(), %room_id, %user_id, "registration resolved");
            },
            Err(e) => {
                tracing::warn!(connection_id = handle.id(), %room_id, %user_id, error = %e, "registration reply failed");
            },
        }

        Ok(Registration {
            connection_id: handle.id(),
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
        })
    }

    /// Send every bound room its current state. Returns successful sends.
    pub async fn broadcast_room_state(&self) -> usize {
        self.context.broadcaster.broadcast_room_state().await
    }

    /// Run one room-state broadcast on a detached task.
    pub fn spawn_broadcast_room_state(&self) -> JoinHandle<usize> {
        self.context.broadcaster.spawn_broadcast_room_state()
    }

    /// Send `MESSAGE;<text>` to every user. Returns successful sends.
    pub async fn broadcast_message(&self, text: &str) -> usize {
        self.context.broadcaster.broadcast_message(text).await
    }

    /// Send `MESSAGE;<text>` to one user.
    pub async fn send_message(&self, user_id: &str, text: &str) -> bool {
        self.context.broadcaster.send_message(user_id, text).await
    }

    /// The session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.context.registry
    }

    /// Signal shutdown to the accept loop, every session, and the broadcast
    /// timer.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Whether shutdown has been signalled.
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn join_reports_panicked_task() {
        let task = tokio::spawn(async { panic!("timer exploded") });
        assert!(!join_logged(task, "test").await);
    }

    #[tokio::test]
    async fn join_reports_clean_exit() {
        let task = tokio::spawn(async {});
        assert!(join_logged(task, "test").await);
    }
}
