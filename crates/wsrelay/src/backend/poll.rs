//! HTTP request/reply backend.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;

use wsrelay_protocol::PROFILE_NAME;

use super::{BackendError, PollBackend};
use crate::config::BackendSettings;

/// Header naming the profile that relayed the message.
pub const PROFILE_HEADER: &str = "Mythic";

/// Posts each agent payload to the backend's `/agent_message` endpoint.
#[derive(Debug, Clone)]
pub struct HttpPollBackend {
    client: reqwest::Client,
    url: String,
}

impl HttpPollBackend {
    pub fn new(settings: &BackendSettings) -> Result<Self, BackendError> {
        let mut builder = reqwest::Client::builder().danger_accept_invalid_certs(true);
        if let Some(timeout) = settings.request_timeout() {
            builder = builder.timeout(timeout);
        }
        Ok(Self::with_client(builder.build()?, settings.agent_message_url()))
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PollBackend for HttpPollBackend {
    async fn post_message(&self, payload: Bytes) -> Result<Bytes, BackendError> {
        let response = self
            .client
            .post(&self.url)
            .header(PROFILE_HEADER, PROFILE_NAME)
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(BackendError::Status(status));
        }
        Ok(response.bytes().await?)
    }
}
