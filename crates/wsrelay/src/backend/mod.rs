//! Seams to the tasking backend.
//!
//! Bridges talk to the backend only through [`PollBackend`] and
//! [`PushBackend`]. Production implementations are [`HttpPollBackend`] and
//! [`GrpcPushBackend`]; tests substitute in-process stubs.

pub mod connector;
pub mod poll;
pub mod push;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::{BoxStream, Stream};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use wsrelay_protocol::PushC2MessageFromAgent;

pub use connector::{BackendConnector, Dialer};
pub use poll::HttpPollBackend;
pub use push::{GrpcDialer, GrpcPushBackend};

/// Messages buffered between the upstream pump and the transport.
pub const OUTBOUND_BUFFER: usize = 64;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid backend endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("failed to connect to backend: {0}")]
    Connect(String),

    #[error("backend request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("backend returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("backend stream error: {0}")]
    Stream(#[from] tonic::Status),

    #[error("backend stream send side is closed")]
    Closed,
}

/// Request/reply access to the backend.
#[async_trait]
pub trait PollBackend: Send + Sync {
    /// Deliver one agent payload and return the backend's reply payload.
    async fn post_message(&self, payload: Bytes) -> Result<Bytes, BackendError>;
}

/// Streaming access to the backend.
#[async_trait]
pub trait PushBackend: Send + Sync {
    /// Open a new bidirectional stream that lives no longer than `scope`.
    async fn open_stream(&self, scope: CancellationToken) -> Result<BackendStream, BackendError>;
}

/// One open backend stream, owned by a single push session.
pub struct BackendStream {
    pub sender: StreamSender,
    pub receiver: BoxStream<'static, Result<Bytes, BackendError>>,
}

/// Send half of a [`BackendStream`].
#[derive(Debug, Clone)]
pub struct StreamSender {
    tx: mpsc::Sender<PushC2MessageFromAgent>,
    half_closed: CancellationToken,
}

impl StreamSender {
    pub async fn send(&self, message: PushC2MessageFromAgent) -> Result<(), BackendError> {
        if self.half_closed.is_cancelled() {
            return Err(BackendError::Closed);
        }
        tokio::select! {
            biased;
            _ = self.half_closed.cancelled() => Err(BackendError::Closed),
            sent = self.tx.send(message) => sent.map_err(|_| BackendError::Closed),
        }
    }

    /// Half-close the stream. Later sends fail; the receive side is untouched.
    pub fn close_send(&self) {
        self.half_closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.half_closed.is_cancelled() || self.tx.is_closed()
    }
}

/// Build the outbound half of a backend stream.
///
/// The returned stream ends when the sender is half-closed or when `scope` is
/// cancelled, whichever comes first.
pub fn outbound_channel(
    buffer: usize,
    scope: &CancellationToken,
) -> (
    StreamSender,
    impl Stream<Item = PushC2MessageFromAgent> + Send + 'static,
) {
    let (tx, rx) = mpsc::channel(buffer);
    let half_closed = scope.child_token();
    let outbound = ReceiverStream::new(rx).take_until(half_closed.clone().cancelled_owned());
    (StreamSender { tx, half_closed }, outbound)
}
