//! Lobby Session
//!
//! The async façade over the engine. One loop task owns the engine, the
//! backend registry and the pending deadline, so state transitions never
//! overlap. Callers get synchronous intent methods and a stream of
//! [`SessionEvent`]s.

use parking_lot::RwLock;
use std::future::pending;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Sleep;
use tracing::{debug, info, warn};

use crate::backend::{broker, progress, video, BackendAdapter, BackendRegistry, Dispatch};
use crate::engine::{Effect, LobbyEngine};
use crate::network::{
    ConnectionConfig, ConnectionHandle, ConnectionManager, ConnectionStatus, NetworkError,
};
use crate::playback::{Clock, FinishSource, PlaybackView, SystemClock, DEFAULT_DURATION_SECONDS};
use crate::search::DEFAULT_SEARCH_URL;
use crate::sync::{events, Intent, Lobby, LobbyEvent, Participant, Source, Track};

/// Shown when an established connection drops
pub const DISCONNECTED_MESSAGE: &str = "Disconnected from coordinator. Reconnecting...";

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub coordinator_url: String,
    pub search_url: String,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub connect_timeout: Duration,
    /// Assumed for tracks without a duration
    pub default_track_duration_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let connection = ConnectionConfig::default();
        Self {
            coordinator_url: connection.url,
            search_url: DEFAULT_SEARCH_URL.to_string(),
            reconnect_attempts: connection.reconnect_attempts,
            reconnect_delay: connection.reconnect_delay,
            max_reconnect_delay: connection.max_reconnect_delay,
            connect_timeout: connection.connect_timeout,
            default_track_duration_secs: DEFAULT_DURATION_SECONDS,
        }
    }
}

impl SessionConfig {
    pub fn with_coordinator_url(mut self, url: impl Into<String>) -> Self {
        self.coordinator_url = url.into();
        self
    }

    pub fn with_search_url(mut self, url: impl Into<String>) -> Self {
        self.search_url = url.into();
        self
    }

    pub fn with_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_attempts = attempts;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_default_track_duration(mut self, secs: u64) -> Self {
        self.default_track_duration_secs = secs;
        self
    }

    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.coordinator_url.clone(),
            reconnect_attempts: self.reconnect_attempts,
            reconnect_delay: self.reconnect_delay,
            max_reconnect_delay: self.max_reconnect_delay,
            connect_timeout: self.connect_timeout,
        }
    }
}

/// Errors returned by session operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Not connected to the coordinator")]
    NotConnected,

    #[error("Not in a lobby")]
    NotInLobby,

    #[error("Already in a lobby")]
    AlreadyInLobby,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Network error: {0}")]
    Network(NetworkError),

    #[error("Session loop stopped")]
    Closed,
}

impl From<NetworkError> for SessionError {
    fn from(e: NetworkError) -> Self {
        match e {
            NetworkError::NotConnected => SessionError::NotConnected,
            other => SessionError::Network(other),
        }
    }
}

/// Events delivered to the session owner
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected,
    /// Transient connectivity message
    Disconnected { message: String },
    /// Reconnect attempts exhausted; only a new `connect` recovers
    ConnectionFailed { message: String },
    LobbyChanged(Option<Lobby>),
    PlaybackChanged(Option<PlaybackView>),
    /// Transient message (coordinator error, failed notify)
    Error(String),
}

/// Outbound path for intents
pub trait IntentSink: Send + Sync {
    fn send_intent(&self, intent: &Intent) -> Result<(), NetworkError>;
}

impl IntentSink for ConnectionHandle {
    fn send_intent(&self, intent: &Intent) -> Result<(), NetworkError> {
        ConnectionHandle::send_intent(self, intent)
    }
}

/// The current connection, replaced on every connect
#[derive(Default)]
struct Outbound {
    connection: RwLock<Option<ConnectionHandle>>,
}

impl Outbound {
    fn replace(&self, connection: Option<ConnectionHandle>) -> Option<ConnectionHandle> {
        std::mem::replace(&mut *self.connection.write(), connection)
    }

    fn is_connected(&self) -> bool {
        self.connection
            .read()
            .as_ref()
            .is_some_and(ConnectionHandle::is_connected)
    }
}

impl IntentSink for Outbound {
    fn send_intent(&self, intent: &Intent) -> Result<(), NetworkError> {
        match self.connection.read().as_ref() {
            Some(connection) => connection.send_intent(intent),
            None => Err(NetworkError::NotConnected),
        }
    }
}

/// Read-only mirror of the loop's state
#[derive(Debug, Clone, Default)]
struct Snapshot {
    lobby: Option<Lobby>,
    view: Option<PlaybackView>,
    local_participant: Option<Participant>,
}

impl Snapshot {
    fn of(engine: &LobbyEngine) -> Self {
        Self {
            lobby: engine.lobby().cloned(),
            view: engine.view().cloned(),
            local_participant: engine.local_participant().cloned(),
        }
    }
}

pub(crate) enum LoopCommand {
    /// Incoming event, tagged with the connection it arrived on
    Event {
        generation: u64,
        event: LobbyEvent,
    },
    Finished {
        track_id: Option<String>,
        source: FinishSource,
    },
    BackendReady(Source),
    SetBackend(Source, Arc<dyn BackendAdapter>),
    Teardown(oneshot::Sender<()>),
}

struct Deadline {
    track_id: String,
    sleep: Pin<Box<Sleep>>,
}

/// Owns every mutable piece of session state
struct SessionLoop {
    engine: LobbyEngine,
    registry: BackendRegistry,
    deadline: Option<Deadline>,
    sink: Arc<dyn IntentSink>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    shared: Arc<RwLock<Snapshot>>,
    /// Current connection; events from older ones are dropped
    generation: Arc<AtomicU64>,
    loop_tx: mpsc::WeakUnboundedSender<LoopCommand>,
}

impl SessionLoop {
    /// Spawn the loop. Must be called within a tokio runtime.
    fn spawn(
        engine: LobbyEngine,
        sink: Arc<dyn IntentSink>,
        events_tx: mpsc::UnboundedSender<SessionEvent>,
        shared: Arc<RwLock<Snapshot>>,
        generation: Arc<AtomicU64>,
    ) -> mpsc::UnboundedSender<LoopCommand> {
        let (loop_tx, loop_rx) = mpsc::unbounded_channel();
        let session_loop = SessionLoop {
            engine,
            registry: BackendRegistry::new(),
            deadline: None,
            sink,
            events_tx,
            shared,
            generation,
            loop_tx: loop_tx.downgrade(),
        };
        tokio::spawn(session_loop.run(loop_rx));
        loop_tx
    }

    async fn run(mut self, mut loop_rx: mpsc::UnboundedReceiver<LoopCommand>) {
        loop {
            tokio::select! {
                command = loop_rx.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                track_id = deadline_elapsed(&mut self.deadline) => {
                    self.deadline = None;
                    debug!("Local deadline reached for {}", track_id);
                    let effects = self.engine.finished(Some(&track_id), FinishSource::Deadline);
                    self.execute(effects);
                }
            }
            *self.shared.write() = Snapshot::of(&self.engine);
        }

        debug!("Session loop stopped");
        self.registry.stop();
    }

    fn handle(&mut self, command: LoopCommand) {
        match command {
            LoopCommand::Event { generation, event } => {
                if generation != self.generation.load(Ordering::Acquire) {
                    debug!("Dropping {} from a closed connection", event.name());
                    return;
                }
                let effects = self.engine.apply(&event);
                self.execute(effects);
            }
            LoopCommand::Finished { track_id, source } => {
                let effects = self.engine.finished(track_id.as_deref(), source);
                self.execute(effects);
            }
            LoopCommand::BackendReady(source) => {
                if self.registry.backend_ready(source) {
                    debug!("Started deferred {} playback", source.as_str());
                }
            }
            LoopCommand::SetBackend(source, adapter) => {
                info!("Registered {} backend", source.as_str());
                self.registry.set(source, adapter);
            }
            LoopCommand::Teardown(done) => {
                let effects = self.engine.teardown();
                self.execute(effects);
                let _ = done.send(());
            }
        }
    }

    fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::LobbyChanged(lobby) => self.publish(SessionEvent::LobbyChanged(lobby)),
                Effect::PlaybackChanged(view) => self.publish(SessionEvent::PlaybackChanged(view)),
                Effect::Play(instruction) => {
                    if let Dispatch::AwaitingReadiness(source) = self.registry.play(instruction) {
                        self.await_readiness(source);
                    }
                }
                Effect::Stop => self.registry.stop(),
                Effect::ScheduleDeadline { track_id, after } => {
                    info!("Deadline for {} in {}ms", track_id, after.as_millis());
                    self.deadline = Some(Deadline {
                        track_id,
                        sleep: Box::pin(tokio::time::sleep(after)),
                    });
                }
                Effect::CancelDeadline => {
                    if let Some(deadline) = self.deadline.take() {
                        debug!("Cancelled deadline for {}", deadline.track_id);
                    }
                }
                Effect::NotifyFinished { track_id, source } => {
                    match self.sink.send_intent(&Intent::TrackFinished) {
                        Ok(()) => info!("Notified coordinator that {} finished", track_id),
                        Err(e) => {
                            warn!("Could not notify that {} finished: {}", track_id, e);
                            self.engine.notify_failed(&track_id, source);
                            self.publish(SessionEvent::Error(e.to_string()));
                        }
                    }
                }
                Effect::Error(message) => self.publish(SessionEvent::Error(message)),
            }
        }
    }

    /// Refresh the mirror first so readers never lag behind an event
    fn publish(&self, event: SessionEvent) {
        *self.shared.write() = Snapshot::of(&self.engine);
        let _ = self.events_tx.send(event);
    }

    /// Retry the deferred instruction once the source's script is ready
    fn await_readiness(&self, source: Source) {
        let loop_tx = self.loop_tx.clone();
        tokio::spawn(async move {
            broker(source).wait_ready().await;
            if let Some(loop_tx) = loop_tx.upgrade() {
                let _ = loop_tx.send(LoopCommand::BackendReady(source));
            }
        });
    }
}

/// Resolves with the track id when the deadline fires; never if there is none
async fn deadline_elapsed(deadline: &mut Option<Deadline>) -> String {
    match deadline {
        Some(deadline) => {
            deadline.sleep.as_mut().await;
            deadline.track_id.clone()
        }
        None => pending().await,
    }
}

/// A participant's session with the coordinator
pub struct LobbySession {
    config: SessionConfig,
    loop_tx: mpsc::UnboundedSender<LoopCommand>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    outbound: Arc<Outbound>,
    shared: Arc<RwLock<Snapshot>>,
    generation: Arc<AtomicU64>,
}

impl LobbySession {
    /// Start the session loop. Must be called within a tokio runtime.
    pub fn start(config: SessionConfig) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        Self::start_with_clock(config, Arc::new(SystemClock))
    }

    pub fn start_with_clock(
        config: SessionConfig,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let outbound = Arc::new(Outbound::default());
        let shared = Arc::new(RwLock::new(Snapshot::default()));
        let generation = Arc::new(AtomicU64::new(0));

        let engine = LobbyEngine::new(clock, config.default_track_duration_secs);
        let loop_tx = SessionLoop::spawn(
            engine,
            outbound.clone(),
            events_tx.clone(),
            Arc::clone(&shared),
            Arc::clone(&generation),
        );

        let session = Self {
            config,
            loop_tx,
            events_tx,
            outbound,
            shared,
            generation,
        };
        (session, events_rx)
    }

    /// Open the coordinator connection, replacing any previous one
    pub fn connect(&self) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let mut manager = ConnectionManager::new(self.config.connection());
        for &name in events::ALL {
            let loop_tx = self.loop_tx.clone();
            manager.on(
                name,
                Arc::new(move |data| match LobbyEvent::decode(name, data) {
                    Ok(Some(event)) => {
                        let _ = loop_tx.send(LoopCommand::Event { generation, event });
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Ignoring malformed {} payload: {}", name, e),
                }),
            );
        }

        let connection = manager.start();
        tokio::spawn(forward_status(connection.watch_status(), self.events_tx.clone()));

        if let Some(previous) = self.outbound.replace(Some(connection)) {
            debug!("Closing previous coordinator connection");
            previous.close();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.outbound.is_connected()
    }

    pub fn create_lobby(&self, name: &str) -> Result<(), SessionError> {
        let name = non_blank(name, "name")?;
        if self.lobby().is_some() {
            return Err(SessionError::AlreadyInLobby);
        }
        self.send(Intent::CreateLobby { name })
    }

    /// Join `lobby_id`. Re-joining the current lobby is allowed.
    pub fn join_lobby(&self, lobby_id: &str, name: &str) -> Result<(), SessionError> {
        let lobby_id = non_blank(lobby_id, "lobby id")?;
        let name = non_blank(name, "name")?;
        if self.lobby().is_some_and(|lobby| lobby.id != lobby_id) {
            return Err(SessionError::AlreadyInLobby);
        }
        self.send(Intent::JoinLobby { lobby_id, name })
    }

    pub fn add_track(&self, track: Track) -> Result<(), SessionError> {
        self.send(Intent::AddTrack(track))
    }

    pub fn remove_track(&self, track_id: &str) -> Result<(), SessionError> {
        self.send(Intent::RemoveTrack {
            track_id: track_id.to_string(),
        })
    }

    /// Report the head as finished from the UI.
    ///
    /// Goes through the same guard as every other finished-signal.
    pub fn notify_track_finished(&self) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        self.require_lobby()?;
        self.finished(None, FinishSource::Manual)
    }

    /// A backend's explicit completion callback fired
    pub fn report_backend_finished(&self, track_id: &str) -> Result<(), SessionError> {
        self.finished(Some(track_id.to_string()), FinishSource::Backend)
    }

    /// Inspect a backend state message. Returns true if it meant "ended".
    pub fn report_backend_message(
        &self,
        source: Source,
        origin: &str,
        message: &str,
    ) -> Result<bool, SessionError> {
        if source != Source::Youtube || !video::is_ended_message(origin, message) {
            return Ok(false);
        }

        let head = self
            .lobby()
            .and_then(|lobby| lobby.head().filter(|t| t.source() == source).map(|t| t.id.clone()));
        match head {
            Some(track_id) => {
                self.finished(Some(track_id), FinishSource::StateMessage)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Inspect a backend's position report. Returns true if it meant "ended".
    ///
    /// Used by backends that expose position and duration but no completion
    /// callback.
    pub fn report_backend_position(
        &self,
        track_id: &str,
        position_ms: u64,
        duration_ms: u64,
        playing: bool,
    ) -> Result<bool, SessionError> {
        if !progress::is_near_end(position_ms, duration_ms, playing) {
            return Ok(false);
        }
        self.finished(Some(track_id.to_string()), FinishSource::StateMessage)?;
        Ok(true)
    }

    /// Backend failures are logged only; the deadline still advances the queue
    pub fn report_backend_error(&self, track_id: &str, message: &str) {
        warn!("Backend error while playing {}: {}", track_id, message);
    }

    pub fn set_backend(
        &self,
        source: Source,
        adapter: Arc<dyn BackendAdapter>,
    ) -> Result<(), SessionError> {
        self.command(LoopCommand::SetBackend(source, adapter))
    }

    /// Close the connection and return to the unjoined state
    pub async fn leave(&self) -> Result<(), SessionError> {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(connection) = self.outbound.replace(None) {
            connection.close();
        }

        let (done_tx, done_rx) = oneshot::channel();
        self.command(LoopCommand::Teardown(done_tx))?;
        done_rx.await.map_err(|_| SessionError::Closed)?;
        *self.shared.write() = Snapshot::default();
        info!("Left lobby");
        Ok(())
    }

    pub fn lobby(&self) -> Option<Lobby> {
        self.shared.read().lobby.clone()
    }

    pub fn view(&self) -> Option<PlaybackView> {
        self.shared.read().view.clone()
    }

    pub fn local_participant(&self) -> Option<Participant> {
        self.shared.read().local_participant.clone()
    }

    fn require_lobby(&self) -> Result<(), SessionError> {
        if self.shared.read().lobby.is_none() {
            return Err(SessionError::NotInLobby);
        }
        Ok(())
    }

    fn send(&self, intent: Intent) -> Result<(), SessionError> {
        if intent.requires_lobby() {
            self.require_lobby()?;
        }
        self.outbound.send_intent(&intent)?;
        Ok(())
    }

    fn finished(&self, track_id: Option<String>, source: FinishSource) -> Result<(), SessionError> {
        self.command(LoopCommand::Finished { track_id, source })
    }

    fn command(&self, command: LoopCommand) -> Result<(), SessionError> {
        self.loop_tx.send(command).map_err(|_| SessionError::Closed)
    }
}

fn non_blank(value: &str, what: &str) -> Result<String, SessionError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(SessionError::InvalidInput(format!("{what} must not be blank")));
    }
    Ok(value.to_string())
}

/// Turn connection status changes into user-facing events
async fn forward_status(
    mut status_rx: watch::Receiver<ConnectionStatus>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
) {
    let mut was_connected = false;
    while status_rx.changed().await.is_ok() {
        let status = status_rx.borrow_and_update().clone();
        let event = match status {
            ConnectionStatus::Connecting => continue,
            ConnectionStatus::Connected => {
                was_connected = true;
                SessionEvent::Connected
            }
            ConnectionStatus::Reconnecting { message, .. } => {
                let message = if was_connected {
                    DISCONNECTED_MESSAGE.to_string()
                } else {
                    message
                };
                was_connected = false;
                SessionEvent::Disconnected { message }
            }
            ConnectionStatus::Failed { message } => SessionEvent::ConnectionFailed { message },
            ConnectionStatus::Closed => break,
        };
        if events_tx.send(event).is_err() {
            break;
        }
    }
}
