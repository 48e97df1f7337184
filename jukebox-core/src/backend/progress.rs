//! Position-based completion
//!
//! Some players expose their position and duration but never say "ended".
//! Such a track counts as finished once it is playing within the last second.

/// How close to the end a playing track counts as finished
pub const END_THRESHOLD_MS: u64 = 1000;

/// Returns true if a player at `position_ms` of `duration_ms` has ended.
///
/// An unknown (zero) duration or a paused player never counts.
pub fn is_near_end(position_ms: u64, duration_ms: u64, playing: bool) -> bool {
    playing && duration_ms > 0 && position_ms >= duration_ms.saturating_sub(END_THRESHOLD_MS)
}
