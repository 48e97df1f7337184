//! Lobby Engine
//!
//! Ties the reducer, the playback synchronizer and the finish guard together.
//! The engine never performs I/O: every input returns the effects the owning
//! event loop must carry out, in order.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::playback::{
    Clock, FinishGuard, FinishSource, HeadChange, PlayInstruction, PlaybackSynchronizer,
    PlaybackView,
};
use crate::sync::{reduce, side_message, Lobby, LobbyEvent, Participant};

/// Something the event loop must do
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    LobbyChanged(Option<Lobby>),
    PlaybackChanged(Option<PlaybackView>),
    /// Start the head on its backend
    Play(PlayInstruction),
    /// Stop the active backend
    Stop,
    ScheduleDeadline { track_id: String, after: Duration },
    CancelDeadline,
    /// Send the track-finished intent
    NotifyFinished {
        track_id: String,
        source: FinishSource,
    },
    /// Transient message for the user
    Error(String),
}

/// Single owner of the lobby model and the local playback view
pub struct LobbyEngine {
    lobby: Option<Lobby>,
    synchronizer: PlaybackSynchronizer,
    finish: FinishGuard,
    clock: Arc<dyn Clock>,
    /// Connection-scoped id announced by the coordinator
    local_id: Option<String>,
    /// Finished-signal whose notification failed, resent on the next lobby event
    retry: Option<(String, FinishSource)>,
}

impl LobbyEngine {
    pub fn new(clock: Arc<dyn Clock>, default_duration_secs: u64) -> Self {
        Self {
            lobby: None,
            synchronizer: PlaybackSynchronizer::with_default_duration(default_duration_secs),
            finish: FinishGuard::new(),
            clock,
            local_id: None,
            retry: None,
        }
    }

    pub fn lobby(&self) -> Option<&Lobby> {
        self.lobby.as_ref()
    }

    pub fn view(&self) -> Option<&PlaybackView> {
        self.synchronizer.view()
    }

    /// Our own entry in the lobby, once the coordinator told us who we are
    pub fn local_participant(&self) -> Option<&Participant> {
        let id = self.local_id.as_deref()?;
        self.lobby.as_ref()?.participant(id)
    }

    /// Apply an incoming event
    pub fn apply(&mut self, event: &LobbyEvent) -> Vec<Effect> {
        let mut effects = Vec::new();

        if let LobbyEvent::Welcome { connection_id } = event {
            info!("Coordinator assigned id {}", connection_id);
            self.local_id = Some(connection_id.clone());
            return effects;
        }

        if let Some(message) = side_message(event) {
            warn!("Coordinator error: {}", message);
            effects.push(Effect::Error(message.to_string()));
            return effects;
        }

        let previous = self.lobby.clone();
        self.lobby = reduce(self.lobby.take(), event);
        if self.lobby == previous {
            debug!("{} left the lobby unchanged", event.name());
        } else {
            debug!("Applied {}", event.name());
            effects.push(Effect::LobbyChanged(self.lobby.clone()));
        }

        self.observe_head(&mut effects);

        // Lobby events only arrive while we are in the lobby again
        if let Some((track_id, source)) = self.retry.take() {
            info!("Retrying {:?} finish for {}", source, track_id);
            effects.extend(self.finished(Some(&track_id), source));
        }
        effects
    }

    /// A finished-signal. `None` means "whatever is at the head".
    ///
    /// At most one notification goes out per head, and only while the queue
    /// is non-empty.
    pub fn finished(&mut self, track_id: Option<&str>, source: FinishSource) -> Vec<Effect> {
        let Some(head) = self.lobby.as_ref().and_then(Lobby::head) else {
            debug!("{:?} finish with an empty queue, ignoring", source);
            return Vec::new();
        };

        let head_id = head.id.clone();
        let track_id = track_id.unwrap_or(head_id.as_str());
        if !self.finish.signal(track_id, source) {
            return Vec::new();
        }
        self.retry = None;

        vec![
            Effect::CancelDeadline,
            Effect::NotifyFinished {
                track_id: track_id.to_string(),
                source,
            },
        ]
    }

    /// The track-finished notification for `track_id` did not go out.
    ///
    /// Re-arms the guard so a later signal for the same head is forwarded.
    pub fn notify_failed(&mut self, track_id: &str, source: FinishSource) {
        if self.finish.rearm(track_id) {
            self.retry = Some((track_id.to_string(), source));
        }
    }

    /// Return to the unjoined state
    pub fn teardown(&mut self) -> Vec<Effect> {
        info!("Tearing down lobby session");
        let had_lobby = self.lobby.take().is_some();
        let was_playing = self.synchronizer.view().is_some();
        self.synchronizer.reset();
        self.finish.reset();
        self.local_id = None;
        self.retry = None;

        let mut effects = vec![Effect::CancelDeadline, Effect::Stop];
        if had_lobby {
            effects.push(Effect::LobbyChanged(None));
        }
        if was_playing {
            effects.push(Effect::PlaybackChanged(None));
        }
        effects
    }

    fn observe_head(&mut self, effects: &mut Vec<Effect>) {
        let queue = self.lobby.as_ref().map(|l| l.queue.as_slice()).unwrap_or(&[]);

        match self.synchronizer.observe(queue, self.clock.now_ms()) {
            HeadChange::Unchanged => {}
            HeadChange::Stopped => {
                self.finish.track_changed(None);
                effects.push(Effect::CancelDeadline);
                effects.push(Effect::Stop);
                effects.push(Effect::PlaybackChanged(None));
            }
            HeadChange::Started {
                instruction,
                remaining,
            } => {
                let track_id = instruction.track.id.clone();
                self.finish.track_changed(Some(&track_id));
                effects.push(Effect::CancelDeadline);
                effects.push(Effect::Play(instruction));
                effects.push(Effect::ScheduleDeadline {
                    track_id,
                    after: remaining,
                });
                effects.push(Effect::PlaybackChanged(self.synchronizer.view().cloned()));
            }
        }
    }
}
