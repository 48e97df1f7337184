//! Log-only player
//!
//! The CLI has no embedded players. It records what it would play and relies
//! on the wall-clock deadline to advance the queue.

use jukebox_core::backend::{BackendAdapter, BackendError};
use jukebox_core::playback::{OffsetUnit, PlaybackOffset};
use jukebox_core::Source;
use tracing::info;

pub struct LoggingBackend {
    source: Source,
}

impl LoggingBackend {
    pub fn new(source: Source) -> Self {
        Self { source }
    }
}

impl BackendAdapter for LoggingBackend {
    fn load_and_play(&self, locator: &str, offset: PlaybackOffset) -> Result<(), BackendError> {
        let unit = match offset.unit {
            OffsetUnit::Seconds => "s",
            OffsetUnit::Milliseconds => "ms",
        };
        info!("[{}] play {} from {}{}", self.source.as_str(), locator, offset.value, unit);
        Ok(())
    }

    fn stop(&self) {
        info!("[{}] stop", self.source.as_str());
    }
}
