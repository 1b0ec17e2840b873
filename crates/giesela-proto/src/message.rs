//! Control-channel messages.
//!
//! Client messages are semicolon-delimited:
//!
//! ```text
//! VERB;ROOM_ID;USER_OR_TOKEN;ARG0[;ARG1...]
//! ```
//!
//! plus the bare keywords `ping`, `exit` and `sdown`. Server messages reuse
//! the same delimiter and are always sent inside a [`Frame`].

use std::fmt;

use crate::{
    Frame,
    errors::{ProtocolError, Result},
};

/// Room id sentinel marking a registration request.
pub const USER_IDENTIFICATION: &str = "USER_IDENTIFICATION";

/// Cover art shown when nothing better is known.
pub const DEFAULT_COVER_URL: &str = "http://i.imgur.com/nszu54A.jpg";

const FIELD_SEPARATOR: char = ';';
const MIN_FIELDS: usize = 3;

/// Playback command carried by a `COMMAND` message.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Bring the player into the caller's room
    Summon,
    /// Toggle between paused and playing
    PlayPause,
    /// Skip the current entry
    Skip,
    /// Set volume as a fraction, passed through unclamped
    VolumeChange(f64),
    /// Queue a track reference
    Play(String),
    /// Switch to a named radio station
    Radio(String),
}

impl Command {
    /// Wire name of the command.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Summon => "SUMMON",
            Self::PlayPause => "PLAY_PAUSE",
            Self::Skip => "SKIP",
            Self::VolumeChange(_) => "VOLUMECHANGE",
            Self::Play(_) => "PLAY",
            Self::Radio(_) => "RADIO",
        }
    }

    /// Parse a command from the argument fields of a `COMMAND` message.
    ///
    /// Returns `Ok(None)` for a sub-verb this server does not know.
    fn parse(args: &[&str]) -> Result<Option<Self>> {
        let Some(verb) = args.first() else {
            return Err(ProtocolError::MissingArgument("COMMAND"));
        };

        let command = match *verb {
            "SUMMON" => Self::Summon,
            "PLAY_PAUSE" => Self::PlayPause,
            "SKIP" => Self::Skip,
            "VOLUMECHANGE" => {
                let raw = required_arg(args, "VOLUMECHANGE")?;
                let volume = raw
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| ProtocolError::InvalidVolume(raw.to_string()))?;
                Self::VolumeChange(volume)
            },
            "PLAY" => Self::Play(required_arg(args, "PLAY")?.to_string()),
            "RADIO" => Self::Radio(required_arg(args, "RADIO")?.to_string()),
            _ => return Ok(None),
        };

        Ok(Some(command))
    }
}

fn required_arg<'a>(args: &[&'a str], name: &'static str) -> Result<&'a str> {
    args.get(1).copied().filter(|s| !s.is_empty()).ok_or(ProtocolError::MissingArgument(name))
}

/// A parsed client message.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Keepalive, answered with `pong`
    Ping,

    /// Client asked to disconnect (`exit`, `sdown`, or an empty read)
    Disconnect,

    /// `REQUEST;USER_IDENTIFICATION;<token>`: begin the registration
    /// handshake. The user field carries the token.
    Identify {
        /// Token the controlling client will present out of band
        token: String,
    },

    /// `REQUEST;<room>;<user>;SEND_INFORMATION`: immediate state snapshot
    SendInformation {
        /// Room to snapshot
        room_id: String,
        /// Requesting user
        user_id: String,
    },

    /// `COMMAND;<room>;<user>;<sub-verb>[;arg]`
    Command {
        /// Target room
        room_id: String,
        /// Issuing user
        user_id: String,
        /// Parsed command
        command: Command,
    },

    /// Well-formed envelope with a verb or argument this server ignores
    Unrecognized {
        /// First field as sent
        verb: String,
        /// Room field
        room_id: String,
        /// User field
        user_id: String,
        /// Remaining fields
        arguments: Vec<String>,
    },
}

impl ClientMessage {
    /// Parse one message body.
    ///
    /// Trailing line endings are ignored so line-oriented tools can talk to
    /// the server.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::MissingFields` for fewer than three fields
    /// - `ProtocolError::MissingArgument` / `ProtocolError::InvalidVolume` for
    ///   a `COMMAND` whose arguments are incomplete
    pub fn parse(body: &str) -> Result<Self> {
        let body = body.trim_end_matches(['\r', '\n']);

        match body {
            "ping" => return Ok(Self::Ping),
            "" | "exit" | "sdown" => return Ok(Self::Disconnect),
            _ => {},
        }

        let fields: Vec<&str> = body.split(FIELD_SEPARATOR).collect();
        let [verb, room_id, user_id, args @ ..] = fields.as_slice() else {
            return Err(ProtocolError::MissingFields { expected: MIN_FIELDS, actual: fields.len() });
        };

        let unrecognized = || Self::Unrecognized {
            verb: (*verb).to_string(),
            room_id: (*room_id).to_string(),
            user_id: (*user_id).to_string(),
            arguments: args.iter().map(|s| (*s).to_string()).collect(),
        };

        let message = match *verb {
            "REQUEST" if *room_id == USER_IDENTIFICATION => {
                Self::Identify { token: (*user_id).to_string() }
            },
            "REQUEST" if args.first() == Some(&"SEND_INFORMATION") => Self::SendInformation {
                room_id: (*room_id).to_string(),
                user_id: (*user_id).to_string(),
            },
            "COMMAND" => match Command::parse(args)? {
                Some(command) => Self::Command {
                    room_id: (*room_id).to_string(),
                    user_id: (*user_id).to_string(),
                    command,
                },
                None => unrecognized(),
            },
            _ => unrecognized(),
        };

        Ok(message)
    }

    /// Room and user this message binds its connection to.
    ///
    /// `None` for keywords and for anything addressed to the
    /// [`USER_IDENTIFICATION`] sentinel.
    pub fn binding(&self) -> Option<(&str, &str)> {
        let (room_id, user_id) = match self {
            Self::Ping | Self::Disconnect | Self::Identify { .. } => return None,
            Self::SendInformation { room_id, user_id }
            | Self::Command { room_id, user_id, .. }
            | Self::Unrecognized { room_id, user_id, .. } => (room_id, user_id),
        };

        (room_id != USER_IDENTIFICATION).then_some((room_id.as_str(), user_id.as_str()))
    }
}

/// Transport status reported in `INFORMATION` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayStatus {
    /// No player exists for the room
    Unconnected,
    /// Player exists but has nothing loaded
    Stopped,
    /// Current entry is playing
    Playing,
    /// Current entry is paused
    Paused,
}

impl PlayStatus {
    /// Wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unconnected => "UNCONNECTED",
            Self::Stopped => "STOPPED",
            Self::Playing => "PLAYING",
            Self::Paused => "PAUSED",
        }
    }
}

impl fmt::Display for PlayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a room's player, as sent in `INFORMATION`.
///
/// Numeric fields are kept pre-formatted so the placeholder values the
/// companion app expects (`".5"`, `"0"`) survive unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    /// Artist line
    pub artist: String,
    /// Title line
    pub title: String,
    /// Video id extracted from the entry URL, `" "` if unknown
    pub video_id: String,
    /// Transport status
    pub status: PlayStatus,
    /// Cover art URL
    pub cover_url: String,
    /// Elapsed seconds
    pub progress: String,
    /// Total seconds
    pub duration: String,
    /// Volume fraction
    pub volume: String,
}

impl RoomSnapshot {
    /// Snapshot for a room without a player.
    pub fn unconnected() -> Self {
        Self {
            artist: " ".to_string(),
            title: "NOT CONNECTED TO A CHANNEL".to_string(),
            video_id: " ".to_string(),
            status: PlayStatus::Unconnected,
            cover_url: DEFAULT_COVER_URL.to_string(),
            progress: "0".to_string(),
            duration: "0".to_string(),
            volume: ".5".to_string(),
        }
    }

    /// Snapshot for a player with nothing loaded.
    pub fn stopped(volume: f64) -> Self {
        Self {
            title: "NONE".to_string(),
            status: PlayStatus::Stopped,
            volume: format_decimal(volume),
            ..Self::unconnected()
        }
    }
}

/// Round to two decimals and format without trailing zeros.
pub fn format_decimal(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    format!("{rounded}")
}

/// A message sent from the server to a client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Keepalive reply
    Pong,
    /// Room playback state
    Information(RoomSnapshot),
    /// Free-form text for the user
    Message(String),
    /// Registration acknowledgement
    UserInformation {
        /// Room the connection was paired with
        room_id: String,
        /// User the connection was paired with
        user_id: String,
    },
}

impl ServerMessage {
    /// Wrap the message in a frame.
    pub fn to_frame(&self) -> Frame {
        Frame::from(self.to_string())
    }
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pong => f.write_str("pong"),
            Self::Information(s) => write!(
                f,
                "INFORMATION;{};{};{};{};{};{};{};{}",
                s.artist, s.title, s.video_id, s.status, s.cover_url, s.progress, s.duration, s.volume
            ),
            Self::Message(text) => write!(f, "MESSAGE;{text}"),
            Self::UserInformation { room_id, user_id } => {
                write!(f, "USERINFORMATION;{room_id};{user_id}")
            },
        }
    }
}
