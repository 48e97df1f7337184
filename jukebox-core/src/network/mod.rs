//! Coordinator transport
//!
//! A single WebSocket connection carrying JSON frames of the form
//! `{"event": name, "data": payload}`.

mod connection;
mod subscriptions;

pub use connection::*;
pub use subscriptions::*;
