//! Lobby Protocol Messages
//!
//! Entities shared with the coordinator and the events exchanged with it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::playback::OffsetUnit;

/// Incoming event names
pub mod events {
    pub const WELCOME: &str = "welcome";
    pub const LOBBY_CREATED: &str = "lobby_created";
    pub const LOBBY_JOINED: &str = "lobby_joined";
    pub const PARTICIPANT_JOINED: &str = "participant_joined";
    pub const PARTICIPANT_LEFT: &str = "participant_left";
    pub const QUEUE_UPDATED: &str = "queue_updated";
    pub const LOBBY_ERROR: &str = "lobby_error";

    /// Every event the session subscribes to
    pub const ALL: &[&str] = &[
        WELCOME,
        LOBBY_CREATED,
        LOBBY_JOINED,
        PARTICIPANT_JOINED,
        PARTICIPANT_LEFT,
        QUEUE_UPDATED,
        LOBBY_ERROR,
    ];
}

/// Outgoing intent names
pub mod intents {
    pub const CREATE_LOBBY: &str = "create_lobby";
    pub const JOIN_LOBBY: &str = "join_lobby";
    pub const ADD_TRACK: &str = "add_track";
    pub const REMOVE_TRACK: &str = "remove_track";
    pub const TRACK_FINISHED: &str = "track_finished";
}

/// Where a track is played from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Spotify,
    /// Video-style iframe embed
    #[default]
    Youtube,
    /// Audio widget embed
    Soundcloud,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::Spotify, Source::Youtube, Source::Soundcloud];

    /// Unit the backend expects for a start offset
    pub fn offset_unit(self) -> OffsetUnit {
        match self {
            Source::Youtube => OffsetUnit::Seconds,
            Source::Spotify | Source::Soundcloud => OffsetUnit::Milliseconds,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Source::Spotify => "spotify",
            Source::Youtube => "youtube",
            Source::Soundcloud => "soundcloud",
        }
    }
}

/// A queued track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// Source-specific identifier
    pub id: String,
    pub title: String,
    pub artist: String,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album_art: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    /// Direct stream locator, preferred over `uri` when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
    /// Epoch milliseconds at which this track became the queue head
    #[serde(rename = "startTime", default, skip_serializing_if = "Option::is_none")]
    pub anchor_ms: Option<u64>,
    /// Duration in whole seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

impl Track {
    pub fn source(&self) -> Source {
        self.source.unwrap_or_default()
    }

    /// Locator handed to the backend
    pub fn locator(&self) -> &str {
        self.stream_url.as_deref().unwrap_or(&self.uri)
    }
}

/// Capability role assigned by the coordinator.
///
/// Only a hint for the UI; the coordinator enforces permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "dj")]
    Elevated,
    #[serde(rename = "spectator")]
    Observer,
}

/// Participant in a lobby
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Connection-scoped id
    pub id: String,
    pub name: String,
    pub role: Role,
}

/// Just enough of a participant to remove it
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ParticipantRef {
    pub id: String,
}

/// Full lobby snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lobby {
    pub id: String,
    #[serde(rename = "users")]
    pub participants: Vec<Participant>,
    pub queue: Vec<Track>,
    /// Snapshot revision, when the coordinator provides one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
}

impl Lobby {
    /// Track everyone should be playing
    pub fn head(&self) -> Option<&Track> {
        self.queue.first()
    }

    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }
}

/// Replacement queue, optionally versioned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "QueuePayload")]
pub struct QueueSnapshot {
    pub queue: Vec<Track>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
}

/// A queue update is either a bare array or `{ queue, revision }`
#[derive(Deserialize)]
#[serde(untagged)]
enum QueuePayload {
    Bare(Vec<Track>),
    Versioned {
        queue: Vec<Track>,
        #[serde(default)]
        revision: Option<u64>,
    },
}

impl From<QueuePayload> for QueueSnapshot {
    fn from(payload: QueuePayload) -> Self {
        match payload {
            QueuePayload::Bare(queue) => Self { queue, revision: None },
            QueuePayload::Versioned { queue, revision } => Self { queue, revision },
        }
    }
}

#[derive(Deserialize)]
struct Welcome {
    id: String,
}

/// Events received from the coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum LobbyEvent {
    /// Connection-scoped id assigned to us
    Welcome { connection_id: String },
    LobbyCreated(Lobby),
    LobbyJoined(Lobby),
    ParticipantJoined(Participant),
    ParticipantLeft(ParticipantRef),
    QueueUpdated(QueueSnapshot),
    LobbyError(String),
}

impl LobbyEvent {
    /// Decode an event by name. Returns `Ok(None)` for names we don't know.
    pub fn decode(name: &str, data: Value) -> Result<Option<Self>, serde_json::Error> {
        let event = match name {
            events::WELCOME => {
                let welcome: Welcome = serde_json::from_value(data)?;
                LobbyEvent::Welcome {
                    connection_id: welcome.id,
                }
            }
            events::LOBBY_CREATED => LobbyEvent::LobbyCreated(serde_json::from_value(data)?),
            events::LOBBY_JOINED => LobbyEvent::LobbyJoined(serde_json::from_value(data)?),
            events::PARTICIPANT_JOINED => {
                LobbyEvent::ParticipantJoined(serde_json::from_value(data)?)
            }
            events::PARTICIPANT_LEFT => LobbyEvent::ParticipantLeft(serde_json::from_value(data)?),
            events::QUEUE_UPDATED => LobbyEvent::QueueUpdated(serde_json::from_value(data)?),
            events::LOBBY_ERROR => LobbyEvent::LobbyError(serde_json::from_value(data)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    pub fn name(&self) -> &'static str {
        match self {
            LobbyEvent::Welcome { .. } => events::WELCOME,
            LobbyEvent::LobbyCreated(_) => events::LOBBY_CREATED,
            LobbyEvent::LobbyJoined(_) => events::LOBBY_JOINED,
            LobbyEvent::ParticipantJoined(_) => events::PARTICIPANT_JOINED,
            LobbyEvent::ParticipantLeft(_) => events::PARTICIPANT_LEFT,
            LobbyEvent::QueueUpdated(_) => events::QUEUE_UPDATED,
            LobbyEvent::LobbyError(_) => events::LOBBY_ERROR,
        }
    }
}

/// State-changing requests sent to the coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    CreateLobby { name: String },
    JoinLobby { lobby_id: String, name: String },
    AddTrack(Track),
    RemoveTrack { track_id: String },
    TrackFinished,
}

impl Intent {
    pub fn name(&self) -> &'static str {
        match self {
            Intent::CreateLobby { .. } => intents::CREATE_LOBBY,
            Intent::JoinLobby { .. } => intents::JOIN_LOBBY,
            Intent::AddTrack(_) => intents::ADD_TRACK,
            Intent::RemoveTrack { .. } => intents::REMOVE_TRACK,
            Intent::TrackFinished => intents::TRACK_FINISHED,
        }
    }

    /// Wire payload. Multi-argument intents are sent as arrays.
    pub fn payload(&self) -> Result<Value, serde_json::Error> {
        Ok(match self {
            Intent::CreateLobby { name } => Value::String(name.clone()),
            Intent::JoinLobby { lobby_id, name } => {
                Value::Array(vec![Value::String(lobby_id.clone()), Value::String(name.clone())])
            }
            Intent::AddTrack(track) => serde_json::to_value(track)?,
            Intent::RemoveTrack { track_id } => Value::String(track_id.clone()),
            Intent::TrackFinished => Value::Null,
        })
    }

    /// Whether the intent only makes sense inside a lobby
    pub fn requires_lobby(&self) -> bool {
        matches!(
            self,
            Intent::AddTrack(_) | Intent::RemoveTrack { .. } | Intent::TrackFinished
        )
    }
}
