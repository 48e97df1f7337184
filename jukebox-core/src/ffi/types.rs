//! FFI types exposed via uniffi

use crate::backend::widget::{
    WidgetCommand as InternalWidgetCommand, WidgetEvent as InternalWidgetEvent,
};
use crate::playback::{OffsetUnit as InternalOffsetUnit, PlaybackView as InternalPlaybackView};
use crate::search::{
    SearchError as InternalSearchError, SearchOutcome, SearchSource as InternalSearchSource,
};
use crate::session::SessionError;
use crate::sync::{
    Lobby as InternalLobby, Participant as InternalParticipant, Role as InternalRole,
    Source as InternalSource, Track as InternalTrack,
};

/// Error types exposed via FFI
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum CoreError {
    #[error("Not connected to the coordinator")]
    NotConnected,

    #[error("Not in a lobby")]
    NotInLobby,

    #[error("Already in a lobby")]
    AlreadyInLobby,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Search error: {0}")]
    SearchError(String),
}

impl From<SessionError> for CoreError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotConnected => CoreError::NotConnected,
            SessionError::NotInLobby => CoreError::NotInLobby,
            SessionError::AlreadyInLobby => CoreError::AlreadyInLobby,
            SessionError::InvalidInput(msg) => CoreError::InvalidInput(msg),
            SessionError::Network(e) => CoreError::NetworkError(e.to_string()),
            SessionError::Closed => CoreError::NetworkError("Session closed".to_string()),
        }
    }
}

impl From<InternalSearchError> for CoreError {
    fn from(e: InternalSearchError) -> Self {
        match e {
            InternalSearchError::Http(e) => CoreError::NetworkError(e.to_string()),
            InternalSearchError::Api(msg) => CoreError::SearchError(msg),
        }
    }
}

/// Where a track is played from
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum Source {
    Spotify,
    Youtube,
    Soundcloud,
}

impl From<InternalSource> for Source {
    fn from(s: InternalSource) -> Self {
        match s {
            InternalSource::Spotify => Source::Spotify,
            InternalSource::Youtube => Source::Youtube,
            InternalSource::Soundcloud => Source::Soundcloud,
        }
    }
}

impl From<Source> for InternalSource {
    fn from(s: Source) -> Self {
        match s {
            Source::Spotify => InternalSource::Spotify,
            Source::Youtube => InternalSource::Youtube,
            Source::Soundcloud => InternalSource::Soundcloud,
        }
    }
}

/// UI hint only; the coordinator enforces permissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum Role {
    Elevated,
    Observer,
}

impl From<InternalRole> for Role {
    fn from(r: InternalRole) -> Self {
        match r {
            InternalRole::Elevated => Role::Elevated,
            InternalRole::Observer => Role::Observer,
        }
    }
}

/// Track exposed via FFI
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub uri: String,
    pub album_art: Option<String>,
    pub preview_url: Option<String>,
    pub source: Source,
    pub stream_url: Option<String>,
    /// Epoch milliseconds at which the track became the head
    pub start_time_ms: Option<u64>,
    pub duration_secs: Option<u64>,
}

impl From<&InternalTrack> for Track {
    fn from(t: &InternalTrack) -> Self {
        Self {
            id: t.id.clone(),
            title: t.title.clone(),
            artist: t.artist.clone(),
            uri: t.uri.clone(),
            album_art: t.album_art.clone(),
            preview_url: t.preview_url.clone(),
            source: t.source().into(),
            stream_url: t.stream_url.clone(),
            start_time_ms: t.anchor_ms,
            duration_secs: t.duration,
        }
    }
}

impl From<Track> for InternalTrack {
    fn from(t: Track) -> Self {
        Self {
            id: t.id,
            title: t.title,
            artist: t.artist,
            uri: t.uri,
            album_art: t.album_art,
            preview_url: t.preview_url,
            source: Some(t.source.into()),
            stream_url: t.stream_url,
            anchor_ms: t.start_time_ms,
            duration: t.duration_secs,
        }
    }
}

/// Participant exposed via FFI
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub role: Role,
}

impl From<&InternalParticipant> for Participant {
    fn from(p: &InternalParticipant) -> Self {
        Self {
            id: p.id.clone(),
            name: p.name.clone(),
            role: p.role.into(),
        }
    }
}

/// Lobby state exposed via FFI
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct LobbyState {
    pub lobby_id: String,
    pub participants: Vec<Participant>,
    /// Playback order; the first entry is playing
    pub queue: Vec<Track>,
    pub revision: Option<u64>,
}

impl From<&InternalLobby> for LobbyState {
    fn from(l: &InternalLobby) -> Self {
        Self {
            lobby_id: l.id.clone(),
            participants: l.participants.iter().map(Participant::from).collect(),
            queue: l.queue.iter().map(Track::from).collect(),
            revision: l.revision,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum OffsetUnit {
    Seconds,
    Milliseconds,
}

impl From<InternalOffsetUnit> for OffsetUnit {
    fn from(u: InternalOffsetUnit) -> Self {
        match u {
            InternalOffsetUnit::Seconds => OffsetUnit::Seconds,
            InternalOffsetUnit::Milliseconds => OffsetUnit::Milliseconds,
        }
    }
}

/// Local playback view exposed via FFI
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct PlaybackView {
    pub track_id: String,
    pub offset: u64,
    pub unit: OffsetUnit,
    /// Epoch milliseconds at which the local deadline fires
    pub deadline_ms: u64,
}

impl From<&InternalPlaybackView> for PlaybackView {
    fn from(v: &InternalPlaybackView) -> Self {
        Self {
            track_id: v.track_id.clone(),
            offset: v.offset.value,
            unit: v.offset.unit.into(),
            deadline_ms: v.deadline_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum SearchSource {
    Youtube,
    Soundcloud,
    All,
}

impl From<SearchSource> for InternalSearchSource {
    fn from(s: SearchSource) -> Self {
        match s {
            SearchSource::Youtube => InternalSearchSource::Youtube,
            SearchSource::Soundcloud => InternalSearchSource::Soundcloud,
            SearchSource::All => InternalSearchSource::All,
        }
    }
}

/// Search candidates and an optional warning for the user
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct SearchResults {
    pub tracks: Vec<Track>,
    pub warning: Option<String>,
}

impl From<SearchOutcome> for SearchResults {
    fn from(o: SearchOutcome) -> Self {
        Self {
            tracks: o.tracks.iter().map(Track::from).collect(),
            warning: o.warning,
        }
    }
}

/// Audio widget bind events
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Enum)]
pub enum WidgetEvent {
    Ready,
    Play,
    Finish,
    Error { message: String },
}

impl From<WidgetEvent> for InternalWidgetEvent {
    fn from(e: WidgetEvent) -> Self {
        match e {
            WidgetEvent::Ready => InternalWidgetEvent::Ready,
            WidgetEvent::Play => InternalWidgetEvent::Play,
            WidgetEvent::Finish => InternalWidgetEvent::Finish,
            WidgetEvent::Error { message } => InternalWidgetEvent::Error(message),
        }
    }
}

/// What the host should do with the audio widget
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Enum)]
pub enum WidgetCommand {
    Load { locator: String, auto_play: bool },
    SeekTo { position_ms: u64 },
    /// Report the track as finished via `report_backend_finished`
    Finished,
}

impl From<InternalWidgetCommand> for WidgetCommand {
    fn from(c: InternalWidgetCommand) -> Self {
        match c {
            InternalWidgetCommand::Load { locator, auto_play } => {
                WidgetCommand::Load { locator, auto_play }
            }
            InternalWidgetCommand::SeekTo { position_ms } => WidgetCommand::SeekTo { position_ms },
            InternalWidgetCommand::Finished => WidgetCommand::Finished,
        }
    }
}

/// Callback interface for session events
#[uniffi::export(callback_interface)]
pub trait SessionCallback: Send + Sync {
    fn on_lobby_changed(&self, lobby: Option<LobbyState>);
    fn on_playback_changed(&self, view: Option<PlaybackView>);
    /// Transient message for the user
    fn on_error(&self, message: String);
    fn on_connected(&self);
    fn on_disconnected(&self, message: String);
}

/// An embedded player implemented by the host
#[uniffi::export(callback_interface)]
pub trait PlayerBackend: Send + Sync {
    /// Failures should be reported through `report_backend_error`
    fn load_and_play(&self, locator: String, offset: u64, unit: OffsetUnit);
    fn stop(&self);
    /// Whether the player calls `report_backend_finished` on its own
    fn reports_completion(&self) -> bool;
    /// Whether playback must wait for `report_backend_ready`
    fn requires_readiness(&self) -> bool;
}
