//! Session event handlers

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

use crate::session::SessionEvent;

use super::types::{LobbyState, PlaybackView, SessionCallback};

/// Forward a session event to the registered callback, if any
pub fn handle_session_event(
    event: SessionEvent,
    callback: &Arc<RwLock<Option<Arc<dyn SessionCallback>>>>,
) {
    let Some(cb) = callback.read().clone() else {
        debug!("No callback registered, dropping {:?}", event);
        return;
    };

    match event {
        SessionEvent::Connected => cb.on_connected(),
        SessionEvent::Disconnected { message } | SessionEvent::ConnectionFailed { message } => {
            cb.on_disconnected(message)
        }
        SessionEvent::LobbyChanged(lobby) => {
            cb.on_lobby_changed(lobby.as_ref().map(LobbyState::from));
        }
        SessionEvent::PlaybackChanged(view) => {
            cb.on_playback_changed(view.as_ref().map(PlaybackView::from));
        }
        SessionEvent::Error(message) => cb.on_error(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingCallback {
        calls: Mutex<Vec<String>>,
    }

    impl SessionCallback for RecordingCallback {
        fn on_lobby_changed(&self, lobby: Option<LobbyState>) {
            self.calls.lock().push(format!("lobby:{:?}", lobby.map(|l| l.lobby_id)));
        }
        fn on_playback_changed(&self, view: Option<PlaybackView>) {
            self.calls.lock().push(format!("playback:{:?}", view.map(|v| v.track_id)));
        }
        fn on_error(&self, message: String) {
            self.calls.lock().push(format!("error:{message}"));
        }
        fn on_connected(&self) {
            self.calls.lock().push("connected".to_string());
        }
        fn on_disconnected(&self, message: String) {
            self.calls.lock().push(format!("disconnected:{message}"));
        }
    }

    #[test]
    fn test_events_reach_callback() {
        let recorder = Arc::new(RecordingCallback::default());
        let callback: Arc<RwLock<Option<Arc<dyn SessionCallback>>>> =
            Arc::new(RwLock::new(Some(recorder.clone())));

        handle_session_event(SessionEvent::Connected, &callback);
        handle_session_event(SessionEvent::LobbyChanged(None), &callback);
        handle_session_event(SessionEvent::Error("Lobby not found".to_string()), &callback);
        handle_session_event(
            SessionEvent::Disconnected {
                message: "Coordinator refused the connection".to_string(),
            },
            &callback,
        );
        handle_session_event(
            SessionEvent::ConnectionFailed {
                message: "Timed out connecting to the coordinator".to_string(),
            },
            &callback,
        );

        assert_eq!(
            *recorder.calls.lock(),
            vec![
                "connected".to_string(),
                "lobby:None".to_string(),
                "error:Lobby not found".to_string(),
                "disconnected:Coordinator refused the connection".to_string(),
                "disconnected:Timed out connecting to the coordinator".to_string(),
            ]
        );
    }

    #[test]
    fn test_no_callback_is_fine() {
        let callback: Arc<RwLock<Option<Arc<dyn SessionCallback>>>> = Arc::new(RwLock::new(None));
        handle_session_event(SessionEvent::Connected, &callback);
    }
}
