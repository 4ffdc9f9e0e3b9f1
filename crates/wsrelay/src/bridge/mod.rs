//! Per-connection bridging between agents and the backend.

pub mod codec;
pub mod dispatch;
pub mod poll;
pub mod push;

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::HeaderValue;
use uuid::Uuid;

use crate::backend::{PollBackend, PushBackend};

pub use codec::TransportError;
pub use dispatch::ACCEPT_TYPE_HEADER;

/// How a session reaches the backend. Decided once, at upgrade time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Poll,
    Push,
}

impl SessionMode {
    /// Absent or exactly `Poll` selects poll mode; anything else selects push.
    pub fn from_accept_type(value: Option<&HeaderValue>) -> Self {
        match value {
            None => Self::Poll,
            Some(value) if value.as_bytes() == b"Poll" => Self::Poll,
            Some(_) => Self::Push,
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Poll => f.write_str("poll"),
            Self::Push => f.write_str("push"),
        }
    }
}

/// One accepted agent connection.
#[derive(Debug, Clone)]
pub struct Session {
    /// Log correlation only.
    pub id: Uuid,
    pub mode: SessionMode,
    pub remote_addr: Option<SocketAddr>,
    /// Emit payload-level log lines.
    pub debug: bool,
}

impl Session {
    pub fn new(mode: SessionMode, remote_addr: Option<SocketAddr>, debug: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode,
            remote_addr,
            debug,
        }
    }

    /// Remote address as reported to the backend.
    pub fn remote_ip(&self) -> String {
        self.remote_addr
            .map(|addr| addr.to_string())
            .unwrap_or_default()
    }
}

/// Backends and flags shared by every session of one instance.
#[derive(Clone)]
pub struct Bridge {
    pub poll: Arc<dyn PollBackend>,
    pub push: Arc<dyn PushBackend>,
    pub debug: bool,
}

impl Bridge {
    pub fn new(poll: Arc<dyn PollBackend>, push: Arc<dyn PushBackend>, debug: bool) -> Self {
        Self { poll, push, debug }
    }
}
