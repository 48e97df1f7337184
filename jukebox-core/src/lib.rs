//! Jukebox - Core Library
//!
//! Keeps a participant's view of a shared lobby queue consistent with the
//! coordinator, and keeps local playback aligned to each track's shared
//! "started at" anchor across heterogeneous embedded players.

pub mod backend;
pub mod engine;
pub mod ffi;
pub mod network;
pub mod playback;
pub mod search;
pub mod session;
pub mod sync;

// Re-exports for convenience
pub use engine::{Effect, LobbyEngine};
pub use session::{LobbySession, SessionConfig, SessionError, SessionEvent};
pub use sync::{Lobby, LobbyEvent, Participant, Role, Source, Track};

// Setup uniffi scaffolding
uniffi::setup_scaffolding!();
