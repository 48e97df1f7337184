//! Playback position reconciliation
//!
//! Every participant joins at a different moment, but all of them share the
//! head track's anchor timestamp. The local start offset and the local
//! end-of-track deadline are both derived from `now - anchor`, never from what
//! a backend reports.

use std::time::Duration;
use tracing::{debug, info};

use crate::sync::Track;

/// Duration assumed for tracks the coordinator sent without one
pub const DEFAULT_DURATION_SECONDS: u64 = 240;

/// Unit a backend expects its start offset in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetUnit {
    /// Video-style embeds (whole seconds, truncated)
    Seconds,
    /// Audio widgets
    Milliseconds,
}

impl OffsetUnit {
    pub fn from_millis(self, ms: u64) -> u64 {
        match self {
            OffsetUnit::Seconds => ms / 1000,
            OffsetUnit::Milliseconds => ms,
        }
    }
}

/// A start offset in a backend's unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackOffset {
    pub value: u64,
    pub unit: OffsetUnit,
}

/// Offset and deadline computed for a track at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackPlan {
    /// Time since the anchor, never negative
    pub elapsed_ms: u64,
    /// Time until the local end-of-track deadline
    pub remaining_ms: u64,
    pub offset: PlaybackOffset,
}

impl PlaybackPlan {
    /// Compute the plan for `track` at `now_ms`.
    ///
    /// A missing or future anchor yields an elapsed time of zero.
    pub fn compute(track: &Track, now_ms: u64, default_duration_secs: u64) -> Self {
        let elapsed_ms = track
            .anchor_ms
            .map(|anchor| now_ms.saturating_sub(anchor))
            .unwrap_or(0);

        let duration_ms = track.duration.unwrap_or(default_duration_secs).saturating_mul(1000);
        let remaining_ms = duration_ms.saturating_sub(elapsed_ms);

        let unit = track.source().offset_unit();
        Self {
            elapsed_ms,
            remaining_ms,
            offset: PlaybackOffset {
                value: unit.from_millis(elapsed_ms),
                unit,
            },
        }
    }

    pub fn remaining(&self) -> Duration {
        Duration::from_millis(self.remaining_ms)
    }
}

/// Instruction for a backend adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayInstruction {
    pub track: Track,
    pub offset: PlaybackOffset,
}

impl PlayInstruction {
    pub fn locator(&self) -> &str {
        self.track.locator()
    }
}

/// What this client is playing locally. Derived, never authoritative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackView {
    pub track_id: String,
    pub offset: PlaybackOffset,
    /// Epoch milliseconds at which the local deadline fires
    pub deadline_ms: u64,
}

/// Result of observing the queue head
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadChange {
    /// Same head as before (or still empty): keep playing, keep the deadline
    Unchanged,
    /// Queue became empty
    Stopped,
    /// A new head: start it and schedule its deadline
    Started {
        instruction: PlayInstruction,
        remaining: Duration,
    },
}

/// Watches the queue head and recomputes the local playback view when its
/// identity changes
#[derive(Debug)]
pub struct PlaybackSynchronizer {
    /// Current local view (None = nothing playing)
    view: Option<PlaybackView>,
    /// Fallback for tracks without a duration
    default_duration_secs: u64,
}

impl PlaybackSynchronizer {
    pub fn new() -> Self {
        Self::with_default_duration(DEFAULT_DURATION_SECONDS)
    }

    pub fn with_default_duration(default_duration_secs: u64) -> Self {
        Self {
            view: None,
            default_duration_secs,
        }
    }

    /// Current local view
    pub fn view(&self) -> Option<&PlaybackView> {
        self.view.as_ref()
    }

    /// Id of the track being played locally
    pub fn current_track_id(&self) -> Option<&str> {
        self.view.as_ref().map(|v| v.track_id.as_str())
    }

    /// Observe the queue after a state change.
    ///
    /// Restarts are driven solely by a change of head identity, so a snapshot
    /// that re-sends the same head never restarts playback.
    pub fn observe(&mut self, queue: &[Track], now_ms: u64) -> HeadChange {
        let Some(head) = queue.first() else {
            if self.view.take().is_some() {
                info!("Queue is empty, stopping playback");
                return HeadChange::Stopped;
            }
            return HeadChange::Unchanged;
        };

        if self.current_track_id() == Some(head.id.as_str()) {
            debug!("Head {} unchanged, keeping playback", head.id);
            return HeadChange::Unchanged;
        }

        let plan = PlaybackPlan::compute(head, now_ms, self.default_duration_secs);
        info!(
            "New head {} ({}): elapsed={}ms, remaining={}ms, offset={:?}",
            head.id,
            head.title,
            plan.elapsed_ms,
            plan.remaining_ms,
            plan.offset
        );

        self.view = Some(PlaybackView {
            track_id: head.id.clone(),
            offset: plan.offset,
            deadline_ms: now_ms.saturating_add(plan.remaining_ms),
        });

        HeadChange::Started {
            instruction: PlayInstruction {
                track: head.clone(),
                offset: plan.offset,
            },
            remaining: plan.remaining(),
        }
    }

    /// Forget the local view (session teardown)
    pub fn reset(&mut self) {
        self.view = None;
    }
}

impl Default for PlaybackSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::Source;

    const NOW: u64 = 1_700_000_000_000;

    fn track(id: &str, source: Source, anchor_ms: Option<u64>, duration: Option<u64>) -> Track {
        Track {
            id: id.to_string(),
            title: format!("Title {id}"),
            artist: "Artist".to_string(),
            uri: format!("locator:{id}"),
            album_art: None,
            preview_url: None,
            source: Some(source),
            stream_url: None,
            anchor_ms,
            duration,
        }
    }

    #[test]
    fn test_future_anchor_clamps_to_zero() {
        let t = track("a", Source::Youtube, Some(NOW + 5_000), Some(180));
        let plan = PlaybackPlan::compute(&t, NOW, DEFAULT_DURATION_SECONDS);
        assert_eq!(plan.elapsed_ms, 0);
        assert_eq!(plan.offset.value, 0);
        assert_eq!(plan.remaining_ms, 180_000);

        let equal = track("b", Source::Soundcloud, Some(NOW), Some(180));
        assert_eq!(PlaybackPlan::compute(&equal, NOW, DEFAULT_DURATION_SECONDS).elapsed_ms, 0);
    }

    #[test]
    fn test_missing_anchor_and_duration() {
        let t = track("a", Source::Youtube, None, None);
        let plan = PlaybackPlan::compute(&t, NOW, DEFAULT_DURATION_SECONDS);
        assert_eq!(plan.elapsed_ms, 0);
        assert_eq!(plan.remaining_ms, DEFAULT_DURATION_SECONDS * 1000);
    }

    #[test]
    fn test_join_mid_track() {
        let video = track("v", Source::Youtube, Some(NOW - 60_000), Some(200));
        let plan = PlaybackPlan::compute(&video, NOW, DEFAULT_DURATION_SECONDS);
        assert_eq!(plan.offset, PlaybackOffset { value: 60, unit: OffsetUnit::Seconds });
        assert_eq!(plan.remaining_ms, 140_000);

        let audio = track("s", Source::Soundcloud, Some(NOW - 60_000), Some(200));
        let plan = PlaybackPlan::compute(&audio, NOW, DEFAULT_DURATION_SECONDS);
        assert_eq!(plan.offset, PlaybackOffset { value: 60_000, unit: OffsetUnit::Milliseconds });
        assert_eq!(plan.remaining_ms, 140_000);
    }

    #[test]
    fn test_deadline_convergence() {
        let t = track("a", Source::Youtube, Some(NOW - 170_000), Some(180));
        let plan = PlaybackPlan::compute(&t, NOW, DEFAULT_DURATION_SECONDS);
        assert_eq!(plan.remaining(), Duration::from_secs(10));

        let overdue = track("b", Source::Youtube, Some(NOW - 400_000), Some(180));
        assert_eq!(PlaybackPlan::compute(&overdue, NOW, DEFAULT_DURATION_SECONDS).remaining_ms, 0);
    }

    #[test]
    fn test_seconds_offset_truncates() {
        let t = track("a", Source::Youtube, Some(NOW - 59_999), Some(200));
        assert_eq!(PlaybackPlan::compute(&t, NOW, DEFAULT_DURATION_SECONDS).offset.value, 59);
    }

    #[test]
    fn test_empty_to_nonempty() {
        let mut sync = PlaybackSynchronizer::new();
        assert_eq!(sync.observe(&[], NOW), HeadChange::Unchanged);

        let head = track("a", Source::Soundcloud, Some(NOW - 1_500), Some(100));
        match sync.observe(&[head.clone()], NOW) {
            HeadChange::Started { instruction, remaining } => {
                assert_eq!(instruction.track, head);
                assert_eq!(instruction.offset.value, 1_500);
                assert_eq!(remaining, Duration::from_millis(98_500));
            }
            other => panic!("expected start, got {other:?}"),
        }

        let view = sync.view().unwrap();
        assert_eq!(view.track_id, "a");
        assert_eq!(view.deadline_ms, NOW + 98_500);
    }

    #[test]
    fn test_same_head_does_not_restart() {
        let mut sync = PlaybackSynchronizer::new();
        let head = track("a", Source::Youtube, Some(NOW), Some(100));
        assert!(matches!(sync.observe(&[head.clone()], NOW), HeadChange::Started { .. }));

        let before = sync.view().cloned();
        let with_more = [head, track("b", Source::Youtube, None, None)];
        assert_eq!(sync.observe(&with_more, NOW + 30_000), HeadChange::Unchanged);
        assert_eq!(sync.view().cloned(), before);
    }

    #[test]
    fn test_head_change_and_stop() {
        let mut sync = PlaybackSynchronizer::new();
        let a = track("a", Source::Youtube, Some(NOW), Some(100));
        let b = track("b", Source::Youtube, Some(NOW + 100_000), Some(100));

        sync.observe(&[a.clone(), b.clone()], NOW);
        assert!(matches!(sync.observe(&[b], NOW + 100_000), HeadChange::Started { .. }));
        assert_eq!(sync.current_track_id(), Some("b"));

        assert_eq!(sync.observe(&[], NOW + 150_000), HeadChange::Stopped);
        assert_eq!(sync.view(), None);
        assert_eq!(sync.observe(&[], NOW + 150_000), HeadChange::Unchanged);
    }
}
