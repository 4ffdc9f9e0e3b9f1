//! Envelope framing over websocket messages.

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;

use wsrelay_protocol::Envelope;

/// Agent-side transport failure. Always ends the session.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    Socket(#[from] axum::Error),

    #[error("invalid envelope: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("connection closed by peer")]
    Closed,
}

impl TransportError {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Read the next envelope, skipping control frames.
pub async fn read_envelope<S>(stream: &mut S) -> Result<Envelope, TransportError>
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        match frame? {
            Message::Text(text) => return Ok(Envelope::from_json(text.as_str().as_bytes())?),
            Message::Binary(bytes) => return Ok(Envelope::from_json(&bytes)?),
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => return Err(TransportError::Closed),
        }
    }
    Err(TransportError::Closed)
}

/// Write one envelope as a JSON text frame.
pub async fn write_envelope<S>(sink: &mut S, envelope: &Envelope) -> Result<(), TransportError>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let json = envelope.to_json()?;
    sink.send(Message::Text(json.into())).await?;
    Ok(())
}
