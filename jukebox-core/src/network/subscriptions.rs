//! Event subscription registry

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Handler invoked with an event's payload
pub type Handler = Arc<dyn Fn(Value) + Send + Sync>;

/// Maps event names to at most one handler each.
///
/// Subscribing again to the same name replaces the previous handler.
#[derive(Default)]
pub struct Subscriptions {
    handlers: HashMap<String, Handler>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event`. Returns true if a handler was replaced.
    pub fn on(&mut self, event: impl Into<String>, handler: Handler) -> bool {
        self.handlers.insert(event.into(), handler).is_some()
    }

    /// Drop every handler
    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    pub fn handler(&self, event: &str) -> Option<Handler> {
        self.handlers.get(event).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
