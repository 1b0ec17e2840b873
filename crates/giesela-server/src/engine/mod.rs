//! Playback engine seam and its execution context.
//!
//! The engine owns real audio transport state and runs on its own task. No
//! other component touches it directly: work is posted to an
//! [`EngineContext`], a message-passing queue the engine task drains one job
//! at a time. Posting never blocks; results come back on a `oneshot` channel
//! the caller may await or drop.

mod error;
mod memory;

use std::str::FromStr;

use async_trait::async_trait;
pub use error::{EngineError, StationParseError};
use giesela_proto::{Command, DEFAULT_COVER_URL};
pub use memory::{EngineCall, MemoryEngine};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    dispatcher::{self, Outcome},
    resolver::TrackGuess,
};

/// Transport state of a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Audio is flowing
    Playing,
    /// Entry loaded, playback held
    Paused,
    /// Nothing loaded
    Stopped,
}

/// A radio station known to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RadioStation {
    /// Display name
    pub name: String,
    /// Cover art URL
    pub cover_url: String,
    /// Stream URL
    pub stream_url: String,
}

impl FromStr for RadioStation {
    type Err = StationParseError;

    /// Parse `name=stream_url[,cover_url]`. Without a cover the default cover
    /// is used.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, rest) =
            s.split_once('=').ok_or_else(|| StationParseError::MissingSeparator(s.to_string()))?;
        let (stream_url, cover_url) = match rest.split_once(',') {
            Some((stream_url, cover_url)) => (stream_url, cover_url.trim()),
            None => (rest, DEFAULT_COVER_URL),
        };

        let (name, stream_url) = (name.trim(), stream_url.trim());
        if name.is_empty() || stream_url.is_empty() {
            return Err(StationParseError::Empty);
        }

        let cover_url = if cover_url.is_empty() { DEFAULT_COVER_URL } else { cover_url };
        Ok(Self {
            name: name.to_string(),
            cover_url: cover_url.to_string(),
            stream_url: stream_url.to_string(),
        })
    }
}

/// A live stream entry, optionally a radio station.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry {
    /// Stream title
    pub title: String,
    /// Stream URL
    pub url: String,
    /// Station data when the stream is a radio station
    pub station: Option<RadioStation>,
}

/// A finite track entry.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackEntry {
    /// Title as extracted from the source
    pub title: String,
    /// Source URL
    pub url: String,
    /// Length in seconds
    pub duration_secs: u64,
    /// Resolver guess, attached by the broadcaster before display
    pub metadata: Option<TrackGuess>,
}

/// What a player currently has loaded.
///
/// Closed set of two kinds; display fields are derived from the variant, not
/// from inspecting concrete types.
#[derive(Debug, Clone, PartialEq)]
pub enum CurrentEntry {
    /// Live stream or radio
    Stream(StreamEntry),
    /// Finite track
    Track(TrackEntry),
}

impl CurrentEntry {
    /// Source URL.
    pub fn url(&self) -> &str {
        match self {
            Self::Stream(s) => &s.url,
            Self::Track(t) => &t.url,
        }
    }

    /// Artist line for companion displays.
    pub fn display_artist(&self) -> String {
        match self {
            Self::Stream(StreamEntry { station: Some(_), .. }) => "RADIO".to_string(),
            Self::Stream(_) => "STREAM".to_string(),
            Self::Track(t) => match t.confident_guess() {
                Some(guess) => guess.artist.clone(),
                None => " ".to_string(),
            },
        }
    }

    /// Title line for companion displays.
    pub fn display_title(&self) -> String {
        match self {
            Self::Stream(StreamEntry { station: Some(station), .. }) => station.name.to_uppercase(),
            Self::Stream(s) => s.title.to_uppercase(),
            Self::Track(t) => match (&t.metadata, t.confident_guess()) {
                (_, Some(guess)) => guess.song_name.clone(),
                (Some(guess), None) => guess.query.to_uppercase(),
                (None, None) => t.title.to_uppercase(),
            },
        }
    }

    /// Cover art URL.
    pub fn cover_url(&self) -> &str {
        match self {
            Self::Stream(StreamEntry { station: Some(station), .. }) => &station.cover_url,
            Self::Stream(_) => DEFAULT_COVER_URL,
            Self::Track(t) => {
                t.confident_guess().map_or(DEFAULT_COVER_URL, |guess| guess.cover_url.as_str())
            },
        }
    }

    /// Length in seconds. Streams have none.
    pub fn duration_secs(&self) -> Option<u64> {
        match self {
            Self::Stream(_) => None,
            Self::Track(t) => Some(t.duration_secs),
        }
    }
}

impl TrackEntry {
    fn confident_guess(&self) -> Option<&TrackGuess> {
        self.metadata.as_ref().filter(|guess| guess.is_confident())
    }
}

/// Point-in-time player state for one room.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    /// Transport state
    pub status: TransportState,
    /// Volume fraction as held by the engine
    pub volume: f64,
    /// Elapsed seconds of the current entry
    pub progress: f64,
    /// Loaded entry
    pub current: Option<CurrentEntry>,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self { status: TransportState::Stopped, volume: 0.5, progress: 0.0, current: None }
    }
}

/// The playback engine, as seen from its own execution context.
///
/// Every method runs on the engine task, one call at a time. Implementations
/// own volume clamping and any other validation of command arguments.
#[async_trait]
pub trait PlaybackEngine: Send + 'static {
    /// Current state of the room's player. `None` if the room has no player.
    fn player(&self, room_id: &str) -> Option<PlayerState>;

    /// Bring a player into the room.
    async fn summon(&mut self, room_id: &str) -> Result<(), EngineError>;

    /// Pause playback.
    async fn pause(&mut self, room_id: &str) -> Result<(), EngineError>;

    /// Resume paused playback.
    async fn resume(&mut self, room_id: &str) -> Result<(), EngineError>;

    /// Skip the current entry.
    async fn skip(&mut self, room_id: &str) -> Result<(), EngineError>;

    /// Set volume. Values outside 0.0–1.0 are the engine's to clamp.
    async fn set_volume(&mut self, room_id: &str, volume: f64) -> Result<(), EngineError>;

    /// Queue a single track.
    ///
    /// Returns `EngineError::WrongEntryType` if the reference is not a single
    /// track.
    async fn enqueue(&mut self, room_id: &str, track: &str) -> Result<(), EngineError>;

    /// Queue every entry of a playlist.
    async fn import_playlist(&mut self, room_id: &str, playlist: &str) -> Result<(), EngineError>;

    /// Switch to a named radio station.
    async fn switch_radio(&mut self, room_id: &str, station: &str) -> Result<(), EngineError>;
}

enum EngineJob {
    Command {
        room_id: String,
        command: Command,
        reply: oneshot::Sender<Result<Outcome, EngineError>>,
    },
    PlayerState {
        room_id: String,
        reply: oneshot::Sender<Option<PlayerState>>,
    },
}

/// Handle for posting work into the engine's execution context.
///
/// Clones share one queue. Jobs posted through the same clone run in posting
/// order; there is no ordering across clones beyond the queue's arrival order.
#[derive(Debug, Clone)]
pub struct EngineContext {
    jobs: mpsc::UnboundedSender<EngineJob>,
}

impl EngineContext {
    /// Move `engine` onto its own task and return a context for it.
    ///
    /// The task runs until every context clone is dropped.
    pub fn spawn<E: PlaybackEngine>(engine: E) -> (Self, JoinHandle<()>) {
        let (jobs, queue) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_engine(engine, queue));
        (Self { jobs }, task)
    }

    /// Post a command. Never blocks.
    ///
    /// The returned receiver yields the outcome once the engine has run the
    /// command; dropping it discards the result.
    ///
    /// # Errors
    ///
    /// - `EngineError::Unavailable` if the engine task has stopped
    pub fn submit(
        &self,
        room_id: &str,
        command: Command,
    ) -> Result<oneshot::Receiver<Result<Outcome, EngineError>>, EngineError> {
        let (reply, outcome) = oneshot::channel();
        self.jobs
            .send(EngineJob::Command { room_id: room_id.to_string(), command, reply })
            .map_err(|_| EngineError::Unavailable)?;
        Ok(outcome)
    }

    /// Query a room's player state from inside the engine context.
    ///
    /// # Errors
    ///
    /// - `EngineError::Unavailable` if the engine task has stopped
    pub async fn player_state(&self, room_id: &str) -> Result<Option<PlayerState>, EngineError> {
        let (reply, state) = oneshot::channel();
        self.jobs
            .send(EngineJob::PlayerState { room_id: room_id.to_string(), reply })
            .map_err(|_| EngineError::Unavailable)?;
        state.await.map_err(|_| EngineError::Unavailable)
    }

    /// Whether the engine task has stopped.
    pub fn is_closed(&self) -> bool {
        self.jobs.is_closed()
    }
}

async fn run_engine<E: PlaybackEngine>(mut engine: E, mut queue: mpsc::UnboundedReceiver<EngineJob>) {
    tracing::debug!("engine context started");

    while let Some(job) = queue.recv().await {
        match job {
            EngineJob::Command { room_id, command, reply } => {
                let outcome = dispatcher::apply(&mut engine, &room_id, command).await;
                // Caller may have stopped waiting
                let _ = reply.send(outcome);
            },
            EngineJob::PlayerState { room_id, reply } => {
                let _ = reply.send(engine.player(&room_id));
            },
        }
    }

    tracing::debug!("engine context stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(metadata: Option<TrackGuess>) -> CurrentEntry {
        CurrentEntry::Track(TrackEntry {
            title: "Rick Astley - Never Gonna Give You Up".to_string(),
            url: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
            duration_secs: 213,
            metadata,
        })
    }

    fn guess(certainty: f64) -> TrackGuess {
        TrackGuess {
            query: "rick astley never gonna".to_string(),
            artist: "Rick Astley".to_string(),
            song_name: "Never Gonna Give You Up".to_string(),
            cover_url: "https://covers.example/rick.jpg".to_string(),
            certainty,
        }
    }

    #[test]
    fn radio_entry_displays_station() {
        let entry = CurrentEntry::Stream(StreamEntry {
            title: "whatever".to_string(),
            url: "https://radio.example/stream".to_string(),
            station: Some(RadioStation {
                name: "Chillhop".to_string(),
                cover_url: "https://radio.example/cover.png".to_string(),
                stream_url: "https://radio.example/stream".to_string(),
            }),
        });

        assert_eq!(entry.display_artist(), "RADIO");
        assert_eq!(entry.display_title(), "CHILLHOP");
        assert_eq!(entry.cover_url(), "https://radio.example/cover.png");
        assert_eq!(entry.duration_secs(), None);
    }

    #[test]
    fn plain_stream_displays_title() {
        let entry = CurrentEntry::Stream(StreamEntry {
            title: "Lofi beats".to_string(),
            url: "https://stream.example/live".to_string(),
            station: None,
        });

        assert_eq!(entry.display_artist(), "STREAM");
        assert_eq!(entry.display_title(), "LOFI BEATS");
        assert_eq!(entry.cover_url(), DEFAULT_COVER_URL);
    }

    #[test]
    fn confident_guess_wins() {
        let entry = track(Some(guess(0.9)));

        assert_eq!(entry.display_artist(), "Rick Astley");
        assert_eq!(entry.display_title(), "Never Gonna Give You Up");
        assert_eq!(entry.cover_url(), "https://covers.example/rick.jpg");
        assert_eq!(entry.duration_secs(), Some(213));
    }

    #[test]
    fn weak_guess_falls_back_to_query() {
        let entry = track(Some(guess(0.4)));

        assert_eq!(entry.display_artist(), " ");
        assert_eq!(entry.display_title(), "RICK ASTLEY NEVER GONNA");
        assert_eq!(entry.cover_url(), DEFAULT_COVER_URL);
    }

    #[test]
    fn missing_guess_falls_back_to_title() {
        let entry = track(None);
        assert_eq!(entry.display_title(), "RICK ASTLEY - NEVER GONNA GIVE YOU UP");
    }

    #[tokio::test]
    async fn context_reports_unavailable_after_engine_stops() {
        let (context, task) = EngineContext::spawn(MemoryEngine::new());
        task.abort();
        let _ = task.await;

        assert!(context.is_closed());
        assert_eq!(context.submit("room", Command::Skip).unwrap_err(), EngineError::Unavailable);
        assert_eq!(context.player_state("room").await.unwrap_err(), EngineError::Unavailable);
    }

    #[tokio::test]
    async fn state_query_observes_earlier_commands() {
        let (context, _task) = EngineContext::spawn(MemoryEngine::new());

        let summoned = context.submit("room", Command::Summon).unwrap();
        let volume = context.submit("room", Command::VolumeChange(0.7)).unwrap();
        drop(summoned);
        drop(volume);

        let state = context.player_state("room").await.unwrap().unwrap();
        assert!((state.volume - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn station_parses_with_and_without_cover() {
        let station: RadioStation = "Chillhop=https://radio.example/chill,https://radio.example/c.png".parse().unwrap();
        assert_eq!(station.name, "Chillhop");
        assert_eq!(station.stream_url, "https://radio.example/chill");
        assert_eq!(station.cover_url, "https://radio.example/c.png");

        let station: RadioStation = "Lofi=https://radio.example/lofi".parse().unwrap();
        assert_eq!(station.cover_url, DEFAULT_COVER_URL);
    }

    #[test]
    fn station_rejects_malformed_definitions() {
        assert!(matches!(
            "Chillhop".parse::<RadioStation>(),
            Err(StationParseError::MissingSeparator(_))
        ));
        assert_eq!("=https://radio.example".parse::<RadioStation>(), Err(StationParseError::Empty));
        assert_eq!("Chillhop=".parse::<RadioStation>(), Err(StationParseError::Empty));
    }
}
