//! fxrelay Protocol Frames
//!
//! JSON text frames exchanged with the remote endpoint: heartbeats,
//! conversion requests/responses and error replies.

pub mod messages;

pub use messages::*;
