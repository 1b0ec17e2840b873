//! Broadcaster
//!
//! Pushes room state and free-form messages to registered connections. Reads
//! the registry for its targets, queries the engine context for state, and
//! writes through [`ConnectionHandle`]s. A failed send only removes the
//! failing connection from the table it was reached through; closing the
//! socket stays with its session.

use std::{
    sync::{Arc, LazyLock},
    time::Duration,
};

use giesela_proto::{PlayStatus, RoomSnapshot, ServerMessage, message::format_decimal};
use regex::Regex;
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    engine::{CurrentEntry, EngineContext, TransportState},
    registry::SessionRegistry,
    resolver::{MetadataResolver, ResolveError},
};

#[allow(clippy::expect_used)]
static VIDEO_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:[?&]v=|/embed/|/1/|/v/|https://(?:www\.)?youtu\.be/)([^&\n?#]+)")
        .expect("invariant: video id pattern is valid")
});

/// Extract a YouTube video id from a URL.
pub fn video_id(url: &str) -> Option<&str> {
    VIDEO_ID.captures(url).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// Room-state and message fan-out.
pub struct Broadcaster {
    registry: Arc<SessionRegistry>,
    engine: EngineContext,
    resolver: Arc<dyn MetadataResolver>,
    resolver_timeout: Duration,
}

impl Broadcaster {
    /// Create a broadcaster over the given registry and engine.
    pub fn new(
        registry: Arc<SessionRegistry>,
        engine: EngineContext,
        resolver: Arc<dyn MetadataResolver>,
        resolver_timeout: Duration,
    ) -> Self {
        Self { registry, engine, resolver, resolver_timeout }
    }

    /// Current state of a room, ready to send.
    ///
    /// Never fails: an unreachable engine reads as a room without a player.
    pub async fn snapshot(&self, room_id: &str) -> RoomSnapshot {
        let state = match self.engine.player_state(room_id).await {
            Ok(Some(state)) => state,
            Ok(None) => return RoomSnapshot::unconnected(),
            Err(e) => {
                tracing::warn!(%room_id, error = %e, "engine state query failed");
                return RoomSnapshot::unconnected();
            },
        };

        let Some(mut entry) = state.current else {
            return RoomSnapshot::stopped(state.volume);
        };
        self.attach_metadata(&mut entry).await;

        let status = match state.status {
            TransportState::Playing => PlayStatus::Playing,
            TransportState::Paused => PlayStatus::Paused,
            TransportState::Stopped => PlayStatus::Stopped,
        };

        RoomSnapshot {
            artist: entry.display_artist(),
            title: entry.display_title(),
            video_id: video_id(entry.url()).unwrap_or(" ").to_string(),
            status,
            cover_url: entry.cover_url().to_string(),
            progress: format_decimal(state.progress),
            duration: entry.duration_secs().unwrap_or(0).to_string(),
            volume: format_decimal(state.volume),
        }
    }

    async fn attach_metadata(&self, entry: &mut CurrentEntry) {
        let CurrentEntry::Track(track) = entry else {
            return;
        };
        if track.metadata.is_some() {
            return;
        }

        let lookup = tokio::time::timeout(self.resolver_timeout, self.resolver.resolve(&track.title));
        match lookup.await.unwrap_or(Err(ResolveError::Timeout(self.resolver_timeout))) {
            Ok(guess) => track.metadata = Some(guess),
            Err(e) => tracing::debug!(title = %track.title, error = %e, "metadata lookup failed"),
        }
    }

    /// Send every room's current state to all of its connections.
    ///
    /// Each room is snapshotted once. Returns the number of successful sends.
    pub async fn broadcast_room_state(&self) -> usize {
        let mut delivered = 0;

        for room_id in self.registry.rooms() {
            let snapshot = self.snapshot(&room_id).await;
            let frame = ServerMessage::Information(snapshot).to_frame();

            for handle in self.registry.connections_in_room(&room_id) {
                match handle.send_frame(&frame).await {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        tracing::warn!(
                            connection_id = handle.id(),
                            %room_id,
                            error = %e,
                            "room state send failed, unbinding connection"
                        );
                        self.registry.unbind_room(handle.id(), &room_id);
                    },
                }
            }
        }

        delivered
    }

    /// Run one room-state pass on a detached task.
    pub fn spawn_broadcast_room_state(self: &Arc<Self>) -> JoinHandle<usize> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.broadcast_room_state().await })
    }

    /// Send `MESSAGE;<text>` to every user's current connection.
    ///
    /// Returns the number of successful sends.
    pub async fn broadcast_message(&self, text: &str) -> usize {
        let frame = ServerMessage::Message(text.to_string()).to_frame();
        let mut delivered = 0;

        for (user_id, handle) in self.registry.users() {
            match handle.send_frame(&frame).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        connection_id = handle.id(),
                        %user_id,
                        error = %e,
                        "message send failed, forgetting user"
                    );
                    self.registry.forget_user(&user_id, handle.id());
                },
            }
        }

        delivered
    }

    /// Send `MESSAGE;<text>` to one user.
    ///
    /// Returns `false` if the user has no connection or the send failed.
    pub async fn send_message(&self, user_id: &str, text: &str) -> bool {
        let Some(handle) = self.registry.connection_of(user_id) else {
            tracing::debug!(%user_id, "no connection for user");
            return false;
        };

        match handle.send(&ServerMessage::Message(text.to_string())).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(connection_id = handle.id(), %user_id, error = %e, "message send failed");
                self.registry.forget_user(user_id, handle.id());
                false
            },
        }
    }

    /// Broadcast room state every `interval` until shutdown is signalled.
    pub async fn run_periodic(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    let delivered = self.broadcast_room_state().await;
                    tracing::trace!(delivered, "periodic room state broadcast");
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                },
            }
        }

        tracing::debug!("periodic broadcast stopped");
    }
}
