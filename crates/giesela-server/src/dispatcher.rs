//! Command Dispatcher
//!
//! Turns protocol commands into engine calls. [`CommandDispatcher::dispatch`]
//! runs on the connection task and only posts the command; [`apply`] runs on
//! the engine task and decides which engine calls to make, so every decision
//! that depends on player state sees the state the command actually acts on.

use giesela_proto::Command;

use crate::engine::{EngineContext, EngineError, PlaybackEngine, TransportState};

/// What `apply` did for a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Player brought into the room
    Summoned,
    /// Playback paused
    Paused,
    /// Playback resumed
    Resumed,
    /// `PLAY_PAUSE` on a stopped player; nothing to toggle
    Ignored,
    /// Current entry skipped
    Skipped,
    /// Volume handed to the engine, as received
    VolumeSet(f64),
    /// Track queued
    Queued,
    /// Track reference was a playlist and got imported
    Imported,
    /// Radio station switched
    RadioSwitched,
    /// Room has no player; the command was dropped without an engine call
    NoPlayer,
}

/// Execute one command against the engine.
///
/// Must run inside the engine context. `SUMMON` always reaches the engine;
/// every other command needs a player in the room.
pub(crate) async fn apply<E: PlaybackEngine + ?Sized>(
    engine: &mut E,
    room_id: &str,
    command: Command,
) -> Result<Outcome, EngineError> {
    let player = engine.player(room_id);

    match (command, player) {
        (Command::Summon, _) => {
            engine.summon(room_id).await?;
            Ok(Outcome::Summoned)
        },
        (_, None) => Ok(Outcome::NoPlayer),
        (Command::PlayPause, Some(state)) => match state.status {
            TransportState::Paused => {
                engine.resume(room_id).await?;
                Ok(Outcome::Resumed)
            },
            TransportState::Playing => {
                engine.pause(room_id).await?;
                Ok(Outcome::Paused)
            },
            TransportState::Stopped => Ok(Outcome::Ignored),
        },
        (Command::Skip, Some(_)) => {
            engine.skip(room_id).await?;
            Ok(Outcome::Skipped)
        },
        (Command::VolumeChange(volume), Some(_)) => {
            engine.set_volume(room_id, volume).await?;
            Ok(Outcome::VolumeSet(volume))
        },
        (Command::Play(track), Some(_)) => match engine.enqueue(room_id, &track).await {
            Ok(()) => Ok(Outcome::Queued),
            Err(e) if e.is_wrong_entry_type() => {
                engine.import_playlist(room_id, &track).await?;
                Ok(Outcome::Imported)
            },
            Err(e) => Err(e),
        },
        (Command::Radio(station), Some(_)) => {
            engine.switch_radio(room_id, &station).await?;
            Ok(Outcome::RadioSwitched)
        },
    }
}

/// Forwards commands into the engine context without waiting on them.
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    engine: EngineContext,
}

impl CommandDispatcher {
    /// Create a dispatcher posting into `engine`.
    pub fn new(engine: EngineContext) -> Self {
        Self { engine }
    }

    /// Post a command and return immediately.
    ///
    /// The outcome is awaited and logged on a detached task. Engine failures
    /// never reach the caller.
    ///
    /// # Errors
    ///
    /// - `EngineError::Unavailable` if the engine context has stopped
    pub fn dispatch(&self, room_id: &str, user_id: &str, command: Command) -> Result<(), EngineError> {
        let name = command.name();
        let outcome = self.engine.submit(room_id, command)?;

        let room_id = room_id.to_string();
        let user_id = user_id.to_string();
        tokio::spawn(async move {
            match outcome.await {
                Ok(Ok(Outcome::NoPlayer)) => {
                    tracing::debug!(%room_id, %user_id, command = name, "no player in room, command skipped");
                },
                Ok(Ok(outcome)) => {
                    tracing::debug!(%room_id, %user_id, command = name, ?outcome, "command applied");
                },
                Ok(Err(e)) => {
                    tracing::warn!(%room_id, %user_id, command = name, error = %e, "command failed");
                },
                Err(_) => {
                    tracing::warn!(%room_id, %user_id, command = name, "engine stopped before running command");
                },
            }
        });

        Ok(())
    }
}
