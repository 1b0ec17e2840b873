use thiserror::Error;

/// Errors reported by the playback engine or its execution context.
///
/// None of these close a client connection. The dispatcher logs them and the
/// session keeps reading.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// No player exists for the room
    #[error("no player for room {0}")]
    NoPlayer(String),

    /// Track reference points at a different kind of entry (e.g. a playlist)
    #[error("wrong entry type for {0}")]
    WrongEntryType(String),

    /// Engine refused the operation
    #[error("rejected: {0}")]
    Rejected(String),

    /// Radio station name is not known to the engine
    #[error("unknown radio station: {0}")]
    UnknownStation(String),

    /// Engine context has shut down and accepts no more work
    #[error("engine context unavailable")]
    Unavailable,
}

/// A `name=stream_url[,cover_url]` station definition that does not parse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StationParseError {
    /// No `=` between name and stream URL
    #[error("expected name=stream_url[,cover_url], got {0:?}")]
    MissingSeparator(String),

    /// Name or stream URL is blank
    #[error("station name and stream url must not be empty")]
    Empty,
}

impl EngineError {
    /// Whether `PLAY` should retry the reference as a playlist import.
    pub fn is_wrong_entry_type(&self) -> bool {
        matches!(self, Self::WrongEntryType(_))
    }
}
