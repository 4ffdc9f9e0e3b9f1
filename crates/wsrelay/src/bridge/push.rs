//! Full-duplex bridge onto a backend stream.
//!
//! Each session runs two pumps sharing one cancellation scope:
//!
//! ```text
//!   agent ws ──read──> [agent_to_backend] ──send──> backend stream
//!   agent ws <─write── [backend_to_agent] <──recv── backend stream
//! ```
//!
//! Whichever pump stops first cancels the scope. The backend receive is
//! interruptible by the scope; the websocket read is not and ends only when the
//! agent or transport closes. The session waits for both pumps before closing
//! the websocket and releasing the stream.

use std::fmt;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{BoxStream, SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use wsrelay_protocol::{Envelope, PROFILE_NAME, PushC2MessageFromAgent};

use super::Session;
use super::codec::{read_envelope, write_envelope};
use crate::backend::{BackendError, BackendStream, PushBackend, StreamSender};

/// Why a pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpEnd {
    AgentClosed,
    AgentReadFailed,
    AgentWriteFailed,
    BackendSendFailed,
    BackendRecvFailed,
    BackendClosed,
    Cancelled,
}

impl fmt::Display for PumpEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::AgentClosed => "agent closed",
            Self::AgentReadFailed => "agent read failed",
            Self::AgentWriteFailed => "agent write failed",
            Self::BackendSendFailed => "backend send failed",
            Self::BackendRecvFailed => "backend receive failed",
            Self::BackendClosed => "backend closed stream",
            Self::Cancelled => "cancelled",
        };
        f.write_str(reason)
    }
}

type Receiver = BoxStream<'static, Result<bytes::Bytes, BackendError>>;

enum PumpExit {
    Upstream(PumpEnd),
    Downstream {
        end: PumpEnd,
        sink: SplitSink<WebSocket, Message>,
        receiver: Receiver,
    },
}

/// Serve a push session until both pumps have stopped.
pub async fn run(session: Session, mut socket: WebSocket, backend: Arc<dyn PushBackend>) {
    let scope = CancellationToken::new();

    let BackendStream { sender, receiver } = match backend.open_stream(scope.clone()).await {
        Ok(stream) => stream,
        Err(e) => {
            error!("Session {} failed to open backend stream: {}", session.id, e);
            if let Err(e) = SinkExt::close(&mut socket).await {
                debug!("Session {} close: {}", session.id, e);
            }
            return;
        }
    };
    info!("Session {} started in push mode", session.id);

    let (sink, source) = socket.split();
    let mut pumps = JoinSet::new();
    pumps.spawn(agent_to_backend(
        session.clone(),
        source,
        sender.clone(),
        scope.clone(),
    ));
    pumps.spawn(backend_to_agent(
        session.clone(),
        receiver,
        sink,
        sender,
        scope.clone(),
    ));

    let mut released = None;
    for _ in 0..2 {
        match pumps.join_next().await {
            Some(Ok(PumpExit::Upstream(end))) => {
                debug!("Session {} agent -> backend finished: {}", session.id, end);
            }
            Some(Ok(PumpExit::Downstream {
                end,
                sink,
                receiver,
            })) => {
                debug!("Session {} backend -> agent finished: {}", session.id, end);
                released = Some((sink, receiver));
            }
            Some(Err(e)) => {
                error!("Session {} pump task failed: {}", session.id, e);
                scope.cancel();
            }
            None => break,
        }
    }

    if let Some((mut sink, receiver)) = released {
        if let Err(e) = sink.close().await {
            debug!("Session {} close: {}", session.id, e);
        }
        drop(receiver);
    }
    info!("Session {} ended", session.id);
}

async fn agent_to_backend(
    session: Session,
    mut source: SplitStream<WebSocket>,
    sender: StreamSender,
    scope: CancellationToken,
) -> PumpExit {
    let end = loop {
        let envelope = match read_envelope(&mut source).await {
            Ok(envelope) => envelope,
            Err(e) if e.is_closed() => break PumpEnd::AgentClosed,
            Err(e) => {
                if session.debug {
                    debug!("Session {} read failed: {}", session.id, e);
                }
                break PumpEnd::AgentReadFailed;
            }
        };
        if session.debug {
            debug!("Session {} agent message: {:?}", session.id, envelope);
        }

        let message =
            PushC2MessageFromAgent::relay(PROFILE_NAME, session.remote_ip(), envelope.into_payload());
        if let Err(e) = sender.send(message).await {
            warn!("Session {} failed to send to backend: {}", session.id, e);
            sender.close_send();
            break PumpEnd::BackendSendFailed;
        }
    };

    scope.cancel();
    PumpExit::Upstream(end)
}

async fn backend_to_agent(
    session: Session,
    mut receiver: Receiver,
    mut sink: SplitSink<WebSocket, Message>,
    sender: StreamSender,
    scope: CancellationToken,
) -> PumpExit {
    let end = loop {
        let next = tokio::select! {
            _ = scope.cancelled() => break PumpEnd::Cancelled,
            next = receiver.next() => next,
        };
        let payload = match next {
            Some(Ok(payload)) => payload,
            Some(Err(e)) => {
                warn!("Session {} backend stream failed: {}", session.id, e);
                sender.close_send();
                break PumpEnd::BackendRecvFailed;
            }
            None => {
                sender.close_send();
                break PumpEnd::BackendClosed;
            }
        };

        let reply = Envelope::from_payload(&payload);
        if session.debug {
            debug!("Session {} agent reply: {:?}", session.id, reply);
        }
        if let Err(e) = write_envelope(&mut sink, &reply).await {
            if session.debug {
                debug!("Session {} write failed: {}", session.id, e);
            }
            break PumpEnd::AgentWriteFailed;
        }
    };

    scope.cancel();
    PumpExit::Downstream {
        end,
        sink,
        receiver,
    }
}
