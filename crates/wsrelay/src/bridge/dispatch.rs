//! Upgrade handling and session mode selection.

use std::net::SocketAddr;

use axum::extract::ws::WebSocket;
use axum::extract::{ConnectInfo, FromRequestParts, Request, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use log::{debug, info, warn};

use super::{Bridge, Session, SessionMode, poll, push};
use crate::server::error::ApiError;

/// Header an agent uses to pick its session mode.
pub const ACCEPT_TYPE_HEADER: &str = "Accept-Type";

/// Socket path handler.
///
/// Any origin is accepted. Non-upgrade requests get `400`.
pub async fn accept(State(bridge): State<Bridge>, request: Request) -> Response {
    let (mut parts, _body) = request.into_parts();

    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &bridge).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            debug!("Websocket upgrade rejected: {}", rejection.body_text());
            return ApiError::UpgradeFailed.into_response();
        }
    };

    let mode = SessionMode::from_accept_type(parts.headers.get(ACCEPT_TYPE_HEADER));
    let remote_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let session = Session::new(mode, remote_addr, bridge.debug);
    info!(
        "Session {} from {} upgrading in {} mode",
        session.id,
        session.remote_ip(),
        mode
    );

    // Envelope size is bounded by the backend, not the socket.
    let session_id = session.id;
    upgrade
        .max_frame_size(usize::MAX)
        .max_message_size(usize::MAX)
        .on_failed_upgrade(move |e| warn!("Session {} upgrade failed: {}", session_id, e))
        .on_upgrade(move |socket| run_session(bridge, session, socket))
}

async fn run_session(bridge: Bridge, session: Session, socket: WebSocket) {
    match session.mode {
        SessionMode::Poll => poll::run(session, socket, bridge.poll).await,
        SessionMode::Push => push::run(session, socket, bridge.push).await,
    }
}
