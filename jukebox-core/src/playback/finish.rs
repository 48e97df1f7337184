//! End-of-track deduplication
//!
//! The wall-clock deadline, the backend's own completion callback and a
//! passively inferred "ended" state can all fire for the same track. The
//! coordinator advances the shared queue on each notification, so at most one
//! may be sent per head.

use tracing::{debug, info};

/// Where a finished-signal came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishSource {
    /// Local wall-clock deadline
    Deadline,
    /// Explicit completion callback from a backend
    Backend,
    /// Inferred from a backend state message
    StateMessage,
    /// Requested by the user interface
    Manual,
}

/// Records which head was already reported as finished
#[derive(Debug, Default)]
pub struct FinishGuard {
    /// Head currently playing
    current: Option<String>,
    /// Head we already notified for
    notified: Option<String>,
}

impl FinishGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track the new head. A different head re-arms the guard.
    pub fn track_changed(&mut self, head: Option<&str>) {
        if self.current.as_deref() != head {
            self.current = head.map(str::to_string);
            self.notified = None;
        }
    }

    /// Returns true if this signal should be forwarded to the coordinator
    pub fn signal(&mut self, track_id: &str, source: FinishSource) -> bool {
        if self.current.as_deref() != Some(track_id) {
            debug!(
                "Ignoring {:?} finish for {} (current head: {:?})",
                source, track_id, self.current
            );
            return false;
        }

        if self.notified.as_deref() == Some(track_id) {
            debug!("Suppressing duplicate {:?} finish for {}", source, track_id);
            return false;
        }

        info!("Track {} finished ({:?})", track_id, source);
        self.notified = Some(track_id.to_string());
        true
    }

    /// Forget a notification that never reached the coordinator.
    ///
    /// Returns true if `track_id` is still the head and may be signalled again.
    pub fn rearm(&mut self, track_id: &str) -> bool {
        if self.notified.as_deref() != Some(track_id) {
            return false;
        }
        self.notified = None;
        let still_head = self.current.as_deref() == Some(track_id);
        if still_head {
            debug!("Re-armed finish guard for {}", track_id);
        }
        still_head
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.notified = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_notify_per_head() {
        let mut guard = FinishGuard::new();
        guard.track_changed(Some("a"));

        assert!(guard.signal("a", FinishSource::Backend));
        assert!(!guard.signal("a", FinishSource::Deadline));
        assert!(!guard.signal("a", FinishSource::StateMessage));
    }

    #[test]
    fn test_stale_signal_ignored() {
        let mut guard = FinishGuard::new();
        guard.track_changed(Some("b"));
        assert!(!guard.signal("a", FinishSource::Deadline));
        assert!(guard.signal("b", FinishSource::Deadline));
    }

    #[test]
    fn test_rearmed_on_head_change() {
        let mut guard = FinishGuard::new();
        guard.track_changed(Some("a"));
        assert!(guard.signal("a", FinishSource::Deadline));

        // Same head re-sent: still suppressed
        guard.track_changed(Some("a"));
        assert!(!guard.signal("a", FinishSource::Backend));

        guard.track_changed(Some("b"));
        assert!(guard.signal("b", FinishSource::Backend));
    }

    #[test]
    fn test_rearm_after_failed_send() {
        let mut guard = FinishGuard::new();
        guard.track_changed(Some("a"));
        assert!(guard.signal("a", FinishSource::Deadline));

        assert!(guard.rearm("a"));
        assert!(guard.signal("a", FinishSource::Manual));
        assert!(!guard.signal("a", FinishSource::Backend));

        // Nothing to re-arm for a track that was never signalled or is gone
        assert!(!guard.rearm("b"));
        guard.track_changed(Some("b"));
        assert!(!guard.rearm("a"));
    }

    #[test]
    fn test_no_head() {
        let mut guard = FinishGuard::new();
        assert!(!guard.signal("a", FinishSource::Manual));
        guard.track_changed(Some("a"));
        guard.reset();
        assert!(!guard.signal("a", FinishSource::Manual));
    }
}
