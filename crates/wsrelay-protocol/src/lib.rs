//! Wire types for the websocket agent transport.
//!
//! ```text
//! Agent <--[WS: Envelope JSON]--> wsrelay <--[HTTP POST /agent_message]--> Tasking backend (poll)
//!                                         <--[gRPC PushC2 stream]--------> Tasking backend (push)
//! ```
//!
//! The agent side only ever sees [`Envelope`]. The backend side is reached either
//! with a raw HTTP body (poll) or with the [`push`] stream messages.

pub mod envelope;
pub mod push;

pub use envelope::Envelope;
pub use push::{PushC2Client, PushC2MessageFromAgent, PushC2MessageFromMythic};

/// Profile name reported to the backend for every message relayed by this transport.
pub const PROFILE_NAME: &str = "websocket";
