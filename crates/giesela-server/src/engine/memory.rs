use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    CurrentEntry, EngineError, PlaybackEngine, PlayerState, RadioStation, StreamEntry, TrackEntry,
    TransportState,
};

/// A command call received by [`MemoryEngine`], in arrival order.
///
/// State queries are not recorded.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    /// `summon(room)`
    Summon(String),
    /// `pause(room)`
    Pause(String),
    /// `resume(room)`
    Resume(String),
    /// `skip(room)`
    Skip(String),
    /// `set_volume(room, volume)`
    SetVolume(String, f64),
    /// `enqueue(room, track)`
    Enqueue(String, String),
    /// `import_playlist(room, playlist)`
    ImportPlaylist(String, String),
    /// `switch_radio(room, station)`
    SwitchRadio(String, String),
}

/// In-memory playback engine for standalone runs and tests
///
/// Keeps one player per room and a log of every command call. All state is
/// behind `Arc<Mutex<>>`, so a clone kept outside the engine context observes
/// the same players and call log as the copy moved onto the engine task.
///
/// Behaviour:
/// - `summon` creates a stopped player at volume 0.5
/// - volume is clamped to 0.0–1.0
/// - references containing `list=` or `/playlist` are playlists: `enqueue`
///   rejects them with `WrongEntryType`, `import_playlist` accepts only them
/// - radio stations come from the table given to
///   [`MemoryEngine::with_stations`]
#[derive(Clone, Default)]
pub struct MemoryEngine {
    inner: Arc<Mutex<MemoryEngineInner>>,
}

#[derive(Default)]
struct MemoryEngineInner {
    players: HashMap<String, MemoryPlayer>,
    stations: Vec<RadioStation>,
    calls: Vec<EngineCall>,
}

#[derive(Default)]
struct MemoryPlayer {
    state: PlayerState,
    queue: VecDeque<CurrentEntry>,
}

impl MemoryPlayer {
    fn load(&mut self, entry: CurrentEntry) {
        if self.state.current.is_none() {
            self.state.current = Some(entry);
            self.state.status = TransportState::Playing;
            self.state.progress = 0.0;
        } else {
            self.queue.push_back(entry);
        }
    }
}

impl MemoryEngine {
    /// Create an engine with no players and no radio stations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine that knows the given radio stations.
    pub fn with_stations(stations: Vec<RadioStation>) -> Self {
        let engine = Self::new();
        engine.inner.lock().stations = stations;
        engine
    }

    /// Install or replace a room's player state directly.
    pub fn insert_player(&self, room_id: &str, state: PlayerState) {
        self.inner
            .lock()
            .players
            .insert(room_id.to_string(), MemoryPlayer { state, queue: VecDeque::new() });
    }

    /// Every command call so far.
    pub fn calls(&self) -> Vec<EngineCall> {
        self.inner.lock().calls.clone()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }

    /// Number of rooms with a player.
    pub fn player_count(&self) -> usize {
        self.inner.lock().players.len()
    }

    fn with_player<T>(
        &self,
        room_id: &str,
        call: EngineCall,
        f: impl FnOnce(&mut MemoryPlayer, &[RadioStation]) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut inner = self.inner.lock();
        inner.calls.push(call);

        let MemoryEngineInner { players, stations, .. } = &mut *inner;
        let player =
            players.get_mut(room_id).ok_or_else(|| EngineError::NoPlayer(room_id.to_string()))?;
        f(player, stations)
    }
}

fn is_playlist(reference: &str) -> bool {
    reference.contains("list=") || reference.contains("/playlist")
}

fn track_entry(reference: &str) -> CurrentEntry {
    CurrentEntry::Track(TrackEntry {
        title: reference.to_string(),
        url: reference.to_string(),
        duration_secs: 0,
        metadata: None,
    })
}

#[async_trait]
impl PlaybackEngine for MemoryEngine {
    fn player(&self, room_id: &str) -> Option<PlayerState> {
        self.inner.lock().players.get(room_id).map(|p| p.state.clone())
    }

    async fn summon(&mut self, room_id: &str) -> Result<(), EngineError> {
        let mut inner = self.inner.lock();
        inner.calls.push(EngineCall::Summon(room_id.to_string()));
        inner.players.entry(room_id.to_string()).or_default();
        Ok(())
    }

    async fn pause(&mut self, room_id: &str) -> Result<(), EngineError> {
        self.with_player(room_id, EngineCall::Pause(room_id.to_string()), |player, _| {
            if player.state.status == TransportState::Playing {
                player.state.status = TransportState::Paused;
            }
            Ok(())
        })
    }

    async fn resume(&mut self, room_id: &str) -> Result<(), EngineError> {
        self.with_player(room_id, EngineCall::Resume(room_id.to_string()), |player, _| {
            if player.state.status == TransportState::Paused {
                player.state.status = TransportState::Playing;
            }
            Ok(())
        })
    }

    async fn skip(&mut self, room_id: &str) -> Result<(), EngineError> {
        self.with_player(room_id, EngineCall::Skip(room_id.to_string()), |player, _| {
            player.state.current = player.queue.pop_front();
            player.state.progress = 0.0;
            player.state.status = if player.state.current.is_some() {
                TransportState::Playing
            } else {
                TransportState::Stopped
            };
            Ok(())
        })
    }

    async fn set_volume(&mut self, room_id: &str, volume: f64) -> Result<(), EngineError> {
        self.with_player(room_id, EngineCall::SetVolume(room_id.to_string(), volume), |player, _| {
            player.state.volume = volume.clamp(0.0, 1.0);
            Ok(())
        })
    }

    async fn enqueue(&mut self, room_id: &str, track: &str) -> Result<(), EngineError> {
        self.with_player(
            room_id,
            EngineCall::Enqueue(room_id.to_string(), track.to_string()),
            |player, _| {
                if is_playlist(track) {
                    return Err(EngineError::WrongEntryType(track.to_string()));
                }
                player.load(track_entry(track));
                Ok(())
            },
        )
    }

    async fn import_playlist(&mut self, room_id: &str, playlist: &str) -> Result<(), EngineError> {
        self.with_player(
            room_id,
            EngineCall::ImportPlaylist(room_id.to_string(), playlist.to_string()),
            |player, _| {
                if !is_playlist(playlist) {
                    return Err(EngineError::Rejected(format!("not a playlist: {playlist}")));
                }
                player.load(track_entry(playlist));
                Ok(())
            },
        )
    }

    async fn switch_radio(&mut self, room_id: &str, station: &str) -> Result<(), EngineError> {
        self.with_player(
            room_id,
            EngineCall::SwitchRadio(room_id.to_string(), station.to_string()),
            |player, stations| {
                let found = stations
                    .iter()
                    .find(|s| s.name.eq_ignore_ascii_case(station))
                    .ok_or_else(|| EngineError::UnknownStation(station.to_string()))?;

                player.queue.clear();
                player.state.current = Some(CurrentEntry::Stream(StreamEntry {
                    title: found.name.clone(),
                    url: found.stream_url.clone(),
                    station: Some(found.clone()),
                }));
                player.state.status = TransportState::Playing;
                player.state.progress = 0.0;
                Ok(())
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station() -> RadioStation {
        RadioStation {
            name: "Chillhop".to_string(),
            cover_url: "https://radio.example/chillhop.png".to_string(),
            stream_url: "https://radio.example/chillhop".to_string(),
        }
    }

    #[tokio::test]
    async fn commands_require_a_player() {
        let mut engine = MemoryEngine::new();
        let err = engine.skip("room").await.unwrap_err();

        assert_eq!(err, EngineError::NoPlayer("room".to_string()));
        // The attempt is still recorded
        assert_eq!(engine.calls(), vec![EngineCall::Skip("room".to_string())]);
    }

    #[tokio::test]
    async fn summon_creates_stopped_player() {
        let mut engine = MemoryEngine::new();
        engine.summon("room").await.unwrap();

        let state = engine.player("room").unwrap();
        assert_eq!(state.status, TransportState::Stopped);
        assert!(state.current.is_none());
    }

    #[tokio::test]
    async fn volume_is_clamped_by_engine() {
        let mut engine = MemoryEngine::new();
        engine.summon("room").await.unwrap();

        engine.set_volume("room", 1.7).await.unwrap();
        assert!((engine.player("room").unwrap().volume - 1.0).abs() < f64::EPSILON);

        engine.set_volume("room", -0.2).await.unwrap();
        assert!(engine.player("room").unwrap().volume.abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn playlists_are_rejected_by_enqueue() {
        let mut engine = MemoryEngine::new();
        engine.summon("room").await.unwrap();

        let url = "https://www.youtube.com/playlist?list=PL123";
        assert_eq!(
            engine.enqueue("room", url).await.unwrap_err(),
            EngineError::WrongEntryType(url.to_string())
        );
        engine.import_playlist("room", url).await.unwrap();
        assert_eq!(engine.player("room").unwrap().status, TransportState::Playing);
    }

    #[tokio::test]
    async fn skip_advances_queue() {
        let mut engine = MemoryEngine::new();
        engine.summon("room").await.unwrap();
        engine.enqueue("room", "https://youtu.be/first").await.unwrap();
        engine.enqueue("room", "https://youtu.be/second").await.unwrap();

        engine.skip("room").await.unwrap();
        let state = engine.player("room").unwrap();
        assert_eq!(state.current.unwrap().url(), "https://youtu.be/second");

        engine.skip("room").await.unwrap();
        assert_eq!(engine.player("room").unwrap().status, TransportState::Stopped);
    }

    #[tokio::test]
    async fn radio_switches_to_known_station() {
        let mut engine = MemoryEngine::with_stations(vec![station()]);
        engine.summon("room").await.unwrap();

        assert_eq!(
            engine.switch_radio("room", "Jazz").await.unwrap_err(),
            EngineError::UnknownStation("Jazz".to_string())
        );

        engine.switch_radio("room", "chillhop").await.unwrap();
        let current = engine.player("room").unwrap().current.unwrap();
        assert_eq!(current.display_artist(), "RADIO");
        assert_eq!(current.display_title(), "CHILLHOP");
    }

    #[tokio::test]
    async fn clones_share_state() {
        let observer = MemoryEngine::new();
        let mut engine = observer.clone();
        engine.summon("room").await.unwrap();

        assert_eq!(observer.player_count(), 1);
        assert_eq!(observer.calls().len(), 1);
    }
}
