//! Websocket transport bridge.
//!
//! Agents connect over a websocket and exchange JSON envelopes. Each connection
//! is bridged to the tasking backend in one of two modes, chosen from the
//! `Accept-Type` upgrade header:
//!
//! - **poll**: every envelope becomes one HTTP request to the backend and the
//!   response body is sent back as the reply envelope.
//! - **push**: the connection is spliced onto a long-lived gRPC stream, with one
//!   pump task per direction.

pub mod backend;
pub mod bridge;
pub mod config;
pub mod server;

pub use backend::{BackendError, PollBackend, PushBackend};
pub use bridge::{Session, SessionMode};
pub use config::{BackendSettings, InstanceConfig, ProfileConfig};
pub use server::ServerInstance;
