//! Playback
//!
//! Derives local playback from the shared "track started at" anchor and
//! collapses finished-signals into a single notification per track.

mod clock;
mod finish;
mod synchronizer;

pub use clock::*;
pub use finish::*;
pub use synchronizer::*;
