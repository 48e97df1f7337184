//! Backend Adapters
//!
//! Boundary to the embedded players that actually render content. Adapters
//! receive "play this locator at this offset" and may report completion back.
//! Native completion is only a latency optimization: the wall-clock deadline
//! always runs.

pub mod progress;
mod readiness;
pub mod video;
pub mod widget;

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::playback::{PlayInstruction, PlaybackOffset};
use crate::sync::Source;

pub use readiness::{broker, ReadinessBroker};

/// Errors reported by a backend
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Playback failed: {0}")]
    Playback(String),
}

/// How an adapter learns that a track ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The adapter reports completion itself
    Native,
    /// Only the wall-clock deadline can tell
    WallClockOnly,
}

/// An embedded player
pub trait BackendAdapter: Send + Sync {
    /// Load `locator` and start playing at `offset`
    fn load_and_play(&self, locator: &str, offset: PlaybackOffset) -> Result<(), BackendError>;

    /// Stop playback and detach listeners for the current track
    fn stop(&self);

    fn completion(&self) -> Completion {
        Completion::WallClockOnly
    }

    /// Whether the adapter needs its script loaded before it can play
    fn requires_readiness(&self) -> bool {
        false
    }
}

/// Outcome of dispatching a play instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Started,
    /// Deferred until the source's readiness broker fires
    AwaitingReadiness(Source),
    /// No adapter, or the adapter failed; only the deadline remains
    Unavailable,
}

/// One adapter per source, at most one of them active
#[derive(Default)]
pub struct BackendRegistry {
    adapters: HashMap<Source, Arc<dyn BackendAdapter>>,
    active: Option<Source>,
    pending: Option<PlayInstruction>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the adapter for a source
    pub fn set(&mut self, source: Source, adapter: Arc<dyn BackendAdapter>) {
        if self.adapters.insert(source, adapter).is_some() {
            debug!("Replaced {} backend", source.as_str());
        }
    }

    pub fn active(&self) -> Option<Source> {
        self.active
    }

    /// Stop whatever is playing and start the instruction on its source's adapter
    pub fn play(&mut self, instruction: PlayInstruction) -> Dispatch {
        self.stop();

        let source = instruction.track.source();
        let Some(adapter) = self.adapters.get(&source).cloned() else {
            warn!(
                "No {} backend registered, relying on wall-clock deadline for {}",
                source.as_str(),
                instruction.track.id
            );
            return Dispatch::Unavailable;
        };

        if adapter.requires_readiness() && !broker(source).is_ready() {
            debug!("{} backend not ready, deferring {}", source.as_str(), instruction.track.id);
            self.pending = Some(instruction);
            return Dispatch::AwaitingReadiness(source);
        }

        self.start(source, adapter.as_ref(), &instruction)
    }

    /// Play the deferred instruction once its source became ready.
    /// Returns true if something was started.
    pub fn backend_ready(&mut self, source: Source) -> bool {
        let matches = self
            .pending
            .as_ref()
            .is_some_and(|p| p.track.source() == source);
        if !matches {
            return false;
        }

        let Some(instruction) = self.pending.take() else {
            return false;
        };
        let Some(adapter) = self.adapters.get(&source).cloned() else {
            return false;
        };
        self.start(source, adapter.as_ref(), &instruction) == Dispatch::Started
    }

    /// Stop the active adapter and drop any deferred instruction
    pub fn stop(&mut self) {
        self.pending = None;
        if let Some(source) = self.active.take() {
            if let Some(adapter) = self.adapters.get(&source) {
                debug!("Stopping {} backend", source.as_str());
                adapter.stop();
            }
        }
    }

    fn start(
        &mut self,
        source: Source,
        adapter: &dyn BackendAdapter,
        instruction: &PlayInstruction,
    ) -> Dispatch {
        match adapter.load_and_play(instruction.locator(), instruction.offset) {
            Ok(()) => {
                self.active = Some(source);
                if adapter.completion() == Completion::WallClockOnly {
                    debug!("{} backend has no native completion signal", source.as_str());
                }
                info!(
                    "Playing {} on {} at {:?}",
                    instruction.track.id,
                    source.as_str(),
                    instruction.offset
                );
                Dispatch::Started
            }
            Err(e) => {
                warn!("{} backend failed to play {}: {}", source.as_str(), instruction.track.id, e);
                Dispatch::Unavailable
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::playback::OffsetUnit;
    use crate::sync::Track;
    use parking_lot::Mutex;

    /// Adapter that records what it was asked to do
    #[derive(Default)]
    pub(crate) struct RecordingBackend {
        pub loads: Mutex<Vec<(String, PlaybackOffset)>>,
        pub stops: Mutex<usize>,
        pub fail: bool,
        pub needs_script: bool,
    }

    impl BackendAdapter for RecordingBackend {
        fn load_and_play(&self, locator: &str, offset: PlaybackOffset) -> Result<(), BackendError> {
            if self.fail {
                return Err(BackendError::Playback("embed crashed".to_string()));
            }
            self.loads.lock().push((locator.to_string(), offset));
            Ok(())
        }

        fn stop(&self) {
            *self.stops.lock() += 1;
        }

        fn requires_readiness(&self) -> bool {
            self.needs_script
        }
    }

    fn instruction(id: &str, source: Source) -> PlayInstruction {
        PlayInstruction {
            track: Track {
                id: id.to_string(),
                title: "Title".to_string(),
                artist: "Artist".to_string(),
                uri: format!("locator:{id}"),
                album_art: None,
                preview_url: None,
                source: Some(source),
                stream_url: None,
                anchor_ms: None,
                duration: None,
            },
            offset: PlaybackOffset {
                value: 12,
                unit: OffsetUnit::Seconds,
            },
        }
    }

    #[test]
    fn test_play_routes_by_source_and_stops_previous() {
        let video = Arc::new(RecordingBackend::default());
        let audio = Arc::new(RecordingBackend::default());
        let mut registry = BackendRegistry::new();
        registry.set(Source::Youtube, video.clone());
        registry.set(Source::Spotify, audio.clone());

        assert_eq!(registry.play(instruction("a", Source::Youtube)), Dispatch::Started);
        assert_eq!(registry.active(), Some(Source::Youtube));
        assert_eq!(video.loads.lock().len(), 1);

        assert_eq!(registry.play(instruction("b", Source::Spotify)), Dispatch::Started);
        assert_eq!(*video.stops.lock(), 1);
        assert_eq!(audio.loads.lock()[0].0, "locator:b");
    }

    #[test]
    fn test_missing_or_failing_backend_is_swallowed() {
        let mut registry = BackendRegistry::new();
        assert_eq!(registry.play(instruction("a", Source::Youtube)), Dispatch::Unavailable);

        registry.set(
            Source::Youtube,
            Arc::new(RecordingBackend {
                fail: true,
                ..Default::default()
            }),
        );
        assert_eq!(registry.play(instruction("a", Source::Youtube)), Dispatch::Unavailable);
        assert_eq!(registry.active(), None);
    }

    #[test]
    fn test_deferred_until_ready() {
        // Spotify's broker is not touched by any other test
        let backend = Arc::new(RecordingBackend {
            needs_script: true,
            ..Default::default()
        });
        let mut registry = BackendRegistry::new();
        registry.set(Source::Spotify, backend.clone());

        assert_eq!(
            registry.play(instruction("a", Source::Spotify)),
            Dispatch::AwaitingReadiness(Source::Spotify)
        );
        assert!(backend.loads.lock().is_empty());
        assert!(!registry.backend_ready(Source::Youtube));

        broker(Source::Spotify).mark_ready();
        assert!(registry.backend_ready(Source::Spotify));
        assert_eq!(backend.loads.lock().len(), 1);
        assert!(!registry.backend_ready(Source::Spotify));
    }
}
