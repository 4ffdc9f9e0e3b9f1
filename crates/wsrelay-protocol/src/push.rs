//! Push-mode stream messages and the gRPC client for the tasking backend.
//!
//! The backend exposes a single bidirectional streaming RPC,
//! `pushC2.PushC2/StartPushC2Streaming`. Agent traffic flows out as
//! [`PushC2MessageFromAgent`], tasking flows back as [`PushC2MessageFromMythic`].
//! The messages are declared with `prost` derives so no build-time codegen step
//! is needed.

use tonic::codec::Streaming;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::Channel;
use tonic::{GrpcMethod, IntoStreamingRequest, Response, Status};

const SERVICE: &str = "pushC2.PushC2";
const START_STREAMING: &str = "StartPushC2Streaming";
const START_STREAMING_PATH: &str = "/pushC2.PushC2/StartPushC2Streaming";

/// One agent message relayed to the backend.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PushC2MessageFromAgent {
    #[prost(string, tag = "1")]
    pub c2_profile_name: String,
    #[prost(string, tag = "2")]
    pub remote_ip: String,
    /// Decoded agent message. Left empty; the backend decodes `base64_message`.
    #[prost(bytes = "vec", tag = "3")]
    pub message: Vec<u8>,
    /// The envelope `data` exactly as the agent sent it.
    #[prost(bytes = "vec", tag = "4")]
    pub base64_message: Vec<u8>,
    #[prost(int64, tag = "5")]
    pub tasking_size: i64,
}

impl PushC2MessageFromAgent {
    pub fn relay(profile: &str, remote_ip: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            c2_profile_name: profile.to_string(),
            remote_ip: remote_ip.into(),
            message: Vec::new(),
            base64_message: payload,
            tasking_size: 0,
        }
    }
}

/// One tasking message pushed by the backend.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PushC2MessageFromMythic {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(string, tag = "2")]
    pub error: String,
    #[prost(bytes = "vec", tag = "3")]
    pub message: Vec<u8>,
    #[prost(int64, tag = "4")]
    pub tracking_id: i64,
}

/// Client handle for the push streaming service.
///
/// Cheap to create and clone; all handles built from the same [`Channel`]
/// share its underlying HTTP/2 connection.
#[derive(Debug, Clone)]
pub struct PushC2Client {
    inner: tonic::client::Grpc<Channel>,
}

impl PushC2Client {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    /// Limit the size of a single decoded backend message.
    pub fn max_decoding_message_size(mut self, limit: usize) -> Self {
        self.inner = self.inner.max_decoding_message_size(limit);
        self
    }

    /// Limit the size of a single encoded agent message.
    pub fn max_encoding_message_size(mut self, limit: usize) -> Self {
        self.inner = self.inner.max_encoding_message_size(limit);
        self
    }

    /// Open a new bidirectional stream.
    ///
    /// The request stream is polled by the transport until it ends; ending it
    /// half-closes the call. Dropping the returned [`Streaming`] cancels it.
    pub async fn start_push_c2_streaming(
        &mut self,
        request: impl IntoStreamingRequest<Message = PushC2MessageFromAgent>,
    ) -> Result<Response<Streaming<PushC2MessageFromMythic>>, Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| Status::unknown(format!("Service was not ready: {e}")))?;

        let codec = tonic_prost::ProstCodec::default();
        let path = PathAndQuery::from_static(START_STREAMING_PATH);
        let mut req = request.into_streaming_request();
        req.extensions_mut()
            .insert(GrpcMethod::new(SERVICE, START_STREAMING));
        self.inner.streaming(req, path, codec).await
    }
}
