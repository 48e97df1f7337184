//! Lobby Sync
//!
//! The lobby model and the reducer that keeps it consistent with the coordinator.

mod protocol;
mod state;

pub use protocol::*;
pub use state::*;
