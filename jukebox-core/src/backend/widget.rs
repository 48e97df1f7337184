//! Audio widget driver
//!
//! The audio widget exposes bind-style callbacks (ready, play, finish,
//! error). It cannot be told to start at an offset: the locator is loaded
//! once the widget is ready, and the seek happens on the first play event.

use tracing::{debug, warn};
use url::Url;

const WIDGET_BASE_URL: &str = "https://w.soundcloud.com/player/";

/// Events bound on the widget
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WidgetEvent {
    Ready,
    Play,
    Finish,
    Error(String),
}

/// What the host should do with the widget in response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WidgetCommand {
    Load { locator: String, auto_play: bool },
    SeekTo { position_ms: u64 },
    /// Forward a finished-signal to the end-of-track coordinator
    Finished,
}

/// Per-track widget state machine
#[derive(Debug)]
pub struct WidgetDriver {
    locator: String,
    offset_ms: u64,
    loaded: bool,
    seek_pending: bool,
}

impl WidgetDriver {
    pub fn new(locator: impl Into<String>, offset_ms: u64) -> Self {
        Self {
            locator: locator.into(),
            offset_ms,
            loaded: false,
            seek_pending: false,
        }
    }

    pub fn handle(&mut self, event: WidgetEvent) -> Option<WidgetCommand> {
        match event {
            WidgetEvent::Ready => {
                if self.loaded {
                    return None;
                }
                self.loaded = true;
                self.seek_pending = self.offset_ms > 0;
                debug!("Widget ready, loading {}", self.locator);
                Some(WidgetCommand::Load {
                    locator: self.locator.clone(),
                    auto_play: true,
                })
            }
            WidgetEvent::Play => {
                if !self.seek_pending {
                    return None;
                }
                // Seek once, on the first play after load
                self.seek_pending = false;
                Some(WidgetCommand::SeekTo {
                    position_ms: self.offset_ms,
                })
            }
            WidgetEvent::Finish => Some(WidgetCommand::Finished),
            WidgetEvent::Error(message) => {
                warn!("Widget error for {}: {}", self.locator, message);
                None
            }
        }
    }
}

/// Build the widget player URL for a locator
pub fn widget_url(locator: &str) -> Result<Url, url::ParseError> {
    Url::parse_with_params(
        WIDGET_BASE_URL,
        &[
            ("url", locator),
            ("auto_play", "true"),
            ("hide_related", "false"),
            ("show_comments", "true"),
            ("show_user", "true"),
            ("show_reposts", "false"),
            ("visual", "true"),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_then_seek_once() {
        let mut driver = WidgetDriver::new("https://soundcloud.com/a/b", 61_500);

        assert_eq!(driver.handle(WidgetEvent::Play), None);
        assert_eq!(
            driver.handle(WidgetEvent::Ready),
            Some(WidgetCommand::Load {
                locator: "https://soundcloud.com/a/b".to_string(),
                auto_play: true
            })
        );
        assert_eq!(
            driver.handle(WidgetEvent::Play),
            Some(WidgetCommand::SeekTo { position_ms: 61_500 })
        );
        // Pausing and resuming must not seek again
        assert_eq!(driver.handle(WidgetEvent::Play), None);
        assert_eq!(driver.handle(WidgetEvent::Ready), None);
    }

    #[test]
    fn test_no_seek_from_start() {
        let mut driver = WidgetDriver::new("locator", 0);
        assert!(driver.handle(WidgetEvent::Ready).is_some());
        assert_eq!(driver.handle(WidgetEvent::Play), None);
    }

    #[test]
    fn test_finish_and_error() {
        let mut driver = WidgetDriver::new("locator", 0);
        assert_eq!(driver.handle(WidgetEvent::Finish), Some(WidgetCommand::Finished));
        assert_eq!(driver.handle(WidgetEvent::Error("403".to_string())), None);
    }

    #[test]
    fn test_widget_url_encodes_locator() {
        let url = widget_url("https://soundcloud.com/a/b?x=1").unwrap();
        assert!(url
            .query_pairs()
            .any(|(k, v)| k == "url" && v == "https://soundcloud.com/a/b?x=1"));
        assert!(url.as_str().contains("url=https%3A%2F%2Fsoundcloud.com"));
    }
}
