//! The agent-facing message envelope.
//!
//! Every websocket frame exchanged with an agent carries exactly one envelope.
//! The `data` field is opaque agent protocol content and is relayed verbatim.

use serde::{Deserialize, Serialize};

/// A single agent message: `{"data": "<string>"}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub data: String,
}

impl Envelope {
    pub fn new(data: impl Into<String>) -> Self {
        Self { data: data.into() }
    }

    /// Build an envelope from raw backend bytes.
    ///
    /// Payloads are agent-encoded text in practice; invalid UTF-8 sequences are
    /// replaced rather than rejected so a reply is always deliverable.
    pub fn from_payload(payload: &[u8]) -> Self {
        Self {
            data: String::from_utf8_lossy(payload).into_owned(),
        }
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.data.into_bytes()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}
