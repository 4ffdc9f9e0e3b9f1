//! gRPC streaming backend.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use log::debug;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint};

use wsrelay_protocol::PushC2Client;

use super::{
    BackendConnector, BackendError, BackendStream, Dialer, OUTBOUND_BUFFER, PushBackend,
    outbound_channel,
};

/// Dials the backend's gRPC endpoint.
#[derive(Debug, Clone)]
pub struct GrpcDialer {
    endpoint: String,
}

impl GrpcDialer {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Dialer for GrpcDialer {
    type Connection = Channel;

    async fn dial(&self) -> Result<Channel, BackendError> {
        let endpoint = Endpoint::from_shared(self.endpoint.clone()).map_err(|e| {
            BackendError::InvalidEndpoint {
                endpoint: self.endpoint.clone(),
                reason: e.to_string(),
            }
        })?;
        endpoint
            .connect()
            .await
            .map_err(|e| BackendError::Connect(format!("{}: {}", self.endpoint, e)))
    }
}

/// Push backend over the shared gRPC channel.
#[derive(Clone)]
pub struct GrpcPushBackend {
    connector: Arc<BackendConnector<GrpcDialer>>,
}

impl GrpcPushBackend {
    pub fn new(connector: Arc<BackendConnector<GrpcDialer>>) -> Self {
        Self { connector }
    }

    /// Wrap the shared channel in a fresh client.
    pub async fn new_client(&self) -> Result<PushC2Client, BackendError> {
        let channel = self.connector.get_connection().await?;
        Ok(PushC2Client::new(channel)
            .max_decoding_message_size(usize::MAX)
            .max_encoding_message_size(usize::MAX))
    }
}

#[async_trait]
impl PushBackend for GrpcPushBackend {
    async fn open_stream(&self, scope: CancellationToken) -> Result<BackendStream, BackendError> {
        let mut client = self.new_client().await?;
        let (sender, outbound) = outbound_channel(OUTBOUND_BUFFER, &scope);

        // The call is issued on first poll of the receiver. Response headers may
        // not arrive until the backend has something to say, so opening must not
        // wait on them.
        let receiver = stream::once(async move { client.start_push_c2_streaming(outbound).await })
            .flat_map(|opened| match opened {
                Ok(response) => {
                    debug!("Backend push stream opened");
                    response
                        .into_inner()
                        .map(|item| {
                            item.map(|message| Bytes::from(message.message))
                                .map_err(BackendError::from)
                        })
                        .boxed()
                }
                Err(status) => stream::iter([Err(BackendError::from(status))]).boxed(),
            })
            .boxed();

        Ok(BackendStream { sender, receiver })
    }
}
