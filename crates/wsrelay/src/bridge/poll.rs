//! Request/reply bridge: one backend round trip per agent envelope.

use std::sync::Arc;

use axum::extract::ws::WebSocket;
use bytes::Bytes;
use futures::SinkExt;
use log::{debug, info, warn};

use wsrelay_protocol::Envelope;

use super::Session;
use super::codec::{read_envelope, write_envelope};
use crate::backend::PollBackend;

/// Serve a poll session until the agent side fails or closes.
///
/// Backend failures are answered with an empty reply and never end the
/// session.
pub async fn run(session: Session, mut socket: WebSocket, backend: Arc<dyn PollBackend>) {
    info!("Session {} started in poll mode", session.id);

    loop {
        let envelope = match read_envelope(&mut socket).await {
            Ok(envelope) => envelope,
            Err(e) if e.is_closed() => {
                debug!("Session {} closed by agent", session.id);
                break;
            }
            Err(e) => {
                warn!("Session {} read failed: {}", session.id, e);
                break;
            }
        };
        if session.debug {
            debug!("Session {} agent message: {:?}", session.id, envelope);
        }

        let reply = match backend.post_message(Bytes::from(envelope.into_payload())).await {
            Ok(body) => Envelope::from_payload(&body),
            Err(e) => {
                warn!("Session {} backend request failed, sending empty reply: {}", session.id, e);
                Envelope::default()
            }
        };
        if session.debug {
            debug!("Session {} agent reply: {:?}", session.id, reply);
        }

        if let Err(e) = write_envelope(&mut socket, &reply).await {
            warn!("Session {} write failed: {}", session.id, e);
            break;
        }
    }

    if let Err(e) = SinkExt::close(&mut socket).await {
        debug!("Session {} close: {}", session.id, e);
    }
    info!("Session {} ended", session.id);
}
