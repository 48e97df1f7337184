//! Session implementation for FFI

use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

use crate::backend::{self, video, widget, BackendAdapter, BackendError, Completion};
use crate::playback::PlaybackOffset;
use crate::search::SearchClient;
use crate::session::{LobbySession, SessionConfig};

use super::handlers::handle_session_event;
use super::types::*;

static TRACING_INIT: Once = Once::new();

const LOG_DIRECTIVES: &[&str] = &[
    "jukebox_core=debug",
    "tungstenite=info",
    "tokio_tungstenite=info",
    "reqwest=off",
    "hyper=off",
    "hyper_util=off",
];

fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let filter = LOG_DIRECTIVES
            .iter()
            .filter_map(|d| d.parse::<Directive>().ok())
            .fold(EnvFilter::from_default_env(), EnvFilter::add_directive);

        let _ = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_target(false)
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}

/// Session settings exposed via FFI
#[derive(Debug, Clone, uniffi::Record)]
pub struct SessionSettings {
    pub coordinator_url: String,
    pub search_url: String,
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub default_track_duration_secs: u64,
}

impl From<SessionSettings> for SessionConfig {
    fn from(s: SessionSettings) -> Self {
        SessionConfig::default()
            .with_coordinator_url(s.coordinator_url)
            .with_search_url(s.search_url)
            .with_reconnect_attempts(s.reconnect_attempts)
            .with_reconnect_delay(Duration::from_millis(s.reconnect_delay_ms))
            .with_default_track_duration(s.default_track_duration_secs)
    }
}

/// Settings pointing at a coordinator on localhost
#[uniffi::export]
pub fn default_settings() -> SessionSettings {
    let config = SessionConfig::default();
    SessionSettings {
        coordinator_url: config.coordinator_url,
        search_url: config.search_url,
        reconnect_attempts: config.reconnect_attempts,
        reconnect_delay_ms: config.reconnect_delay.as_millis() as u64,
        default_track_duration_secs: config.default_track_duration_secs,
    }
}

/// Video embed URL starting at `start_secs`
#[uniffi::export]
pub fn video_embed_url(
    video_id: String,
    start_secs: u64,
    page_origin: String,
) -> Result<String, CoreError> {
    video::embed_url(&video_id, start_secs, &page_origin)
        .map(String::from)
        .map_err(|e| CoreError::InvalidInput(e.to_string()))
}

/// Audio widget player URL for a locator
#[uniffi::export]
pub fn audio_widget_url(locator: String) -> Result<String, CoreError> {
    widget::widget_url(&locator)
        .map(String::from)
        .map_err(|e| CoreError::InvalidInput(e.to_string()))
}

/// Adapts a host player to the backend boundary
struct FfiBackend {
    player: Box<dyn PlayerBackend>,
}

impl BackendAdapter for FfiBackend {
    fn load_and_play(&self, locator: &str, offset: PlaybackOffset) -> Result<(), BackendError> {
        self.player
            .load_and_play(locator.to_string(), offset.value, offset.unit.into());
        Ok(())
    }

    fn stop(&self) {
        self.player.stop();
    }

    fn completion(&self) -> Completion {
        if self.player.reports_completion() {
            Completion::Native
        } else {
            Completion::WallClockOnly
        }
    }

    fn requires_readiness(&self) -> bool {
        self.player.requires_readiness()
    }
}

/// Main session interface
#[derive(uniffi::Object)]
pub struct Session {
    runtime: Runtime,
    inner: LobbySession,
    search: SearchClient,
    callback: Arc<RwLock<Option<Arc<dyn SessionCallback>>>>,
}

#[uniffi::export]
impl Session {
    /// Create a new session
    #[uniffi::constructor]
    pub fn new(settings: SessionSettings) -> Result<Arc<Self>, CoreError> {
        init_tracing();
        info!("Initializing jukebox-core session");

        let runtime = Runtime::new().map_err(|e| CoreError::NetworkError(e.to_string()))?;
        let config = SessionConfig::from(settings);
        let search = SearchClient::new(config.search_url.clone())?;

        let (inner, mut events) = {
            let _guard = runtime.enter();
            LobbySession::start(config)
        };

        let callback: Arc<RwLock<Option<Arc<dyn SessionCallback>>>> = Arc::new(RwLock::new(None));
        let callback_clone = Arc::clone(&callback);
        runtime.spawn(async move {
            while let Some(event) = events.recv().await {
                handle_session_event(event, &callback_clone);
            }
        });

        Ok(Arc::new(Self {
            runtime,
            inner,
            search,
            callback,
        }))
    }

    /// Set the event callback
    pub fn set_callback(&self, callback: Box<dyn SessionCallback>) {
        *self.callback.write() = Some(Arc::from(callback));
    }

    /// Register the player for a source
    pub fn set_backend(
        &self,
        source: Source,
        backend: Box<dyn PlayerBackend>,
    ) -> Result<(), CoreError> {
        let adapter: Arc<dyn BackendAdapter> = Arc::new(FfiBackend { player: backend });
        self.inner.set_backend(source.into(), adapter)?;
        Ok(())
    }

    /// Connect to the coordinator
    pub fn connect(&self) {
        let _guard = self.runtime.enter();
        self.inner.connect();
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    pub fn create_lobby(&self, name: String) -> Result<(), CoreError> {
        self.inner.create_lobby(&name)?;
        Ok(())
    }

    pub fn join_lobby(&self, lobby_id: String, name: String) -> Result<(), CoreError> {
        self.inner.join_lobby(&lobby_id, &name)?;
        Ok(())
    }

    pub fn add_track(&self, track: Track) -> Result<(), CoreError> {
        self.inner.add_track(track.into())?;
        Ok(())
    }

    pub fn remove_track(&self, track_id: String) -> Result<(), CoreError> {
        self.inner.remove_track(&track_id)?;
        Ok(())
    }

    /// Report the head as finished (user action)
    pub fn notify_track_finished(&self) -> Result<(), CoreError> {
        self.inner.notify_track_finished()?;
        Ok(())
    }

    /// A player's own completion callback fired
    pub fn report_backend_finished(&self, track_id: String) -> Result<(), CoreError> {
        self.inner.report_backend_finished(&track_id)?;
        Ok(())
    }

    /// Forward a player state message; returns true if it meant "ended"
    pub fn report_backend_message(
        &self,
        source: Source,
        origin: String,
        message: String,
    ) -> Result<bool, CoreError> {
        Ok(self.inner.report_backend_message(source.into(), &origin, &message)?)
    }

    /// Forward a player's position; returns true if it counts as "ended"
    pub fn report_backend_position(
        &self,
        track_id: String,
        position_ms: u64,
        duration_ms: u64,
        playing: bool,
    ) -> Result<bool, CoreError> {
        Ok(self
            .inner
            .report_backend_position(&track_id, position_ms, duration_ms, playing)?)
    }

    pub fn report_backend_error(&self, track_id: String, message: String) {
        self.inner.report_backend_error(&track_id, &message);
    }

    /// Claim script initialization for a source. True for exactly one caller.
    pub fn begin_backend_init(&self, source: Source) -> bool {
        backend::broker(source.into()).begin_init()
    }

    /// The source's script finished loading
    pub fn report_backend_ready(&self, source: Source) {
        backend::broker(source.into()).mark_ready();
    }

    /// Leave the lobby and close the connection
    pub fn leave_lobby(&self) -> Result<(), CoreError> {
        self.runtime.block_on(self.inner.leave())?;
        Ok(())
    }

    pub fn get_lobby(&self) -> Option<LobbyState> {
        self.inner.lobby().as_ref().map(LobbyState::from)
    }

    pub fn local_participant(&self) -> Option<Participant> {
        self.inner.local_participant().as_ref().map(Participant::from)
    }

    pub fn playback_view(&self) -> Option<PlaybackView> {
        self.inner.view().as_ref().map(PlaybackView::from)
    }

    /// Search for tracks to add
    pub fn search(&self, query: String, source: SearchSource) -> Result<SearchResults, CoreError> {
        let result = self.runtime.block_on(self.search.search(&query, source.into()));
        match &result {
            Ok(outcome) => debug!("Search returned {} tracks", outcome.tracks.len()),
            Err(e) => warn!("Search failed: {}", e),
        }
        Ok(result?.into())
    }
}

/// Drives one audio widget instance for one track
#[derive(uniffi::Object)]
pub struct AudioWidget {
    driver: Mutex<widget::WidgetDriver>,
}

#[uniffi::export]
impl AudioWidget {
    #[uniffi::constructor]
    pub fn new(locator: String, offset_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            driver: Mutex::new(widget::WidgetDriver::new(locator, offset_ms)),
        })
    }

    /// Feed a bound widget event; returns what to do with the widget
    pub fn handle(&self, event: WidgetEvent) -> Option<WidgetCommand> {
        self.driver.lock().handle(event.into()).map(WidgetCommand::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::OffsetUnit as InternalOffsetUnit;

    #[derive(Default)]
    struct FakePlayer {
        loads: Arc<Mutex<Vec<(String, u64, OffsetUnit)>>>,
    }

    impl PlayerBackend for FakePlayer {
        fn load_and_play(&self, locator: String, offset: u64, unit: OffsetUnit) {
            self.loads.lock().push((locator, offset, unit));
        }
        fn stop(&self) {}
        fn reports_completion(&self) -> bool {
            true
        }
        fn requires_readiness(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_ffi_backend_forwards_offset() {
        let loads = Arc::new(Mutex::new(Vec::new()));
        let adapter = FfiBackend {
            player: Box::new(FakePlayer {
                loads: Arc::clone(&loads),
            }),
        };

        adapter
            .load_and_play(
                "https://soundcloud.com/a/b",
                PlaybackOffset {
                    value: 42_000,
                    unit: InternalOffsetUnit::Milliseconds,
                },
            )
            .unwrap();
        assert_eq!(adapter.completion(), Completion::Native);
        assert_eq!(
            loads.lock()[0],
            ("https://soundcloud.com/a/b".to_string(), 42_000, OffsetUnit::Milliseconds)
        );
    }

    #[test]
    fn test_session_without_connection() {
        let session = Session::new(default_settings()).unwrap();
        assert!(!session.is_connected());
        assert!(session.get_lobby().is_none());
        assert!(matches!(session.create_lobby("Ana".to_string()), Err(CoreError::NotConnected)));
        assert!(matches!(
            session.remove_track("a".to_string()),
            Err(CoreError::NotInLobby)
        ));
        assert!(matches!(
            session.join_lobby(" ".to_string(), "Ana".to_string()),
            Err(CoreError::InvalidInput(_))
        ));

        let results = session.search("ab".to_string(), SearchSource::All).unwrap();
        assert!(results.tracks.is_empty());
    }

    #[test]
    fn test_audio_widget_seeks_once() {
        let widget = AudioWidget::new("https://soundcloud.com/a/b".to_string(), 5_000);
        assert!(matches!(widget.handle(WidgetEvent::Ready), Some(WidgetCommand::Load { .. })));
        assert_eq!(
            widget.handle(WidgetEvent::Play),
            Some(WidgetCommand::SeekTo { position_ms: 5_000 })
        );
        assert_eq!(widget.handle(WidgetEvent::Play), None);
        assert_eq!(widget.handle(WidgetEvent::Finish), Some(WidgetCommand::Finished));
    }

    #[test]
    fn test_embed_urls() {
        let url = video_embed_url("abc".to_string(), 60, "http://localhost".to_string()).unwrap();
        assert!(url.starts_with("https://www.youtube.com/embed/abc?"));
        assert!(url.contains("start=60"));

        let url = audio_widget_url("https://soundcloud.com/a/b".to_string()).unwrap();
        assert!(url.starts_with("https://w.soundcloud.com/player/?url="));
    }
}
