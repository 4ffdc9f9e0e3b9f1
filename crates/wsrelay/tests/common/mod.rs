//! Test utilities and common setup.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use wsrelay::backend::{
    BackendError, BackendStream, PollBackend, PushBackend, outbound_channel,
};
use wsrelay::config::InstanceConfig;
use wsrelay::server::ServerInstance;
use wsrelay::server::files::{PayloadProxy, proxy_client};
use wsrelay_protocol::{Envelope, PushC2MessageFromAgent};

pub const SOCKET_PATH: &str = "/socket";
pub const WAIT: Duration = Duration::from_secs(5);

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Replies with whatever it was sent.
#[derive(Default)]
pub struct EchoPoll {
    pub calls: AtomicUsize,
}

#[async_trait]
impl PollBackend for EchoPoll {
    async fn post_message(&self, payload: Bytes) -> Result<Bytes, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(payload)
    }
}

/// Replies with the length of what it was sent.
pub struct LengthPoll;

#[async_trait]
impl PollBackend for LengthPoll {
    async fn post_message(&self, payload: Bytes) -> Result<Bytes, BackendError> {
        Ok(Bytes::from(payload.len().to_string()))
    }
}

/// Always fails the way a `500` from the backend does.
#[derive(Default)]
pub struct FailingPoll {
    pub calls: AtomicUsize,
}

#[async_trait]
impl PollBackend for FailingPoll {
    async fn post_message(&self, _payload: Bytes) -> Result<Bytes, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(BackendError::Status(reqwest::StatusCode::INTERNAL_SERVER_ERROR))
    }
}

/// Backend side of one stub push stream.
pub struct StubStream {
    /// Messages the session sent to the backend, ending when it half-closes.
    pub from_agent: BoxStream<'static, PushC2MessageFromAgent>,
    /// Payloads to deliver to the agent. `closed()` resolves once the session
    /// has released the stream.
    pub to_agent: mpsc::Sender<Result<Bytes, BackendError>>,
}

impl StubStream {
    pub async fn next_from_agent(&mut self) -> Option<PushC2MessageFromAgent> {
        tokio::time::timeout(WAIT, self.from_agent.next())
            .await
            .expect("timed out waiting for agent message")
    }

    pub async fn reply(&self, data: &str) {
        self.to_agent
            .send(Ok(Bytes::copy_from_slice(data.as_bytes())))
            .await
            .expect("session dropped the stream");
    }
}

/// Hands every opened stream to the test.
pub struct StubPush {
    opened: mpsc::UnboundedSender<StubStream>,
    pub opens: AtomicUsize,
}

impl StubPush {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<StubStream>) {
        let (opened, rx) = mpsc::unbounded_channel();
        let stub = Arc::new(Self {
            opened,
            opens: AtomicUsize::new(0),
        });
        (stub, rx)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushBackend for StubPush {
    async fn open_stream(&self, scope: CancellationToken) -> Result<BackendStream, BackendError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let (sender, outbound) = outbound_channel(16, &scope);
        let (to_agent, rx) = mpsc::channel(16);
        let _ = self.opened.send(StubStream {
            from_agent: outbound.boxed(),
            to_agent,
        });
        Ok(BackendStream {
            sender,
            receiver: ReceiverStream::new(rx).boxed(),
        })
    }
}

/// Push backend whose dial always fails.
pub struct UnreachablePush;

#[async_trait]
impl PushBackend for UnreachablePush {
    async fn open_stream(&self, _scope: CancellationToken) -> Result<BackendStream, BackendError> {
        Err(BackendError::Connect("connection refused".to_string()))
    }
}

pub async fn next_stream(opened: &mut mpsc::UnboundedReceiver<StubStream>) -> StubStream {
    tokio::time::timeout(WAIT, opened.recv())
        .await
        .expect("timed out waiting for push stream")
        .expect("push backend dropped")
}

pub fn test_instance() -> InstanceConfig {
    InstanceConfig {
        bind_address: "127.0.0.1:0".to_string(),
        websocket_uri: SOCKET_PATH.trim_start_matches('/').to_string(),
        ..Default::default()
    }
}

pub fn test_server(
    config: InstanceConfig,
    poll: Arc<dyn PollBackend>,
    push: Arc<dyn PushBackend>,
    backend_base_url: &str,
) -> ServerInstance {
    let payloads = PayloadProxy::new(proxy_client(), backend_base_url);
    ServerInstance::new(config, poll, push, payloads).unwrap()
}

/// Serve `instance` on an ephemeral loopback port.
pub async fn spawn_server(instance: ServerInstance) -> SocketAddr {
    let app = instance
        .router()
        .into_make_service_with_connect_info::<SocketAddr>();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Serve an arbitrary router on an ephemeral loopback port.
pub async fn spawn_router(app: axum::Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub async fn connect(addr: SocketAddr, accept_type: Option<&str>) -> WsClient {
    let mut request = format!("ws://{addr}{SOCKET_PATH}")
        .into_client_request()
        .unwrap();
    if let Some(value) = accept_type {
        request
            .headers_mut()
            .insert("Accept-Type", HeaderValue::from_str(value).unwrap());
    }
    let (ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    ws
}

pub async fn send_data(ws: &mut WsClient, data: &str) {
    let json = Envelope::new(data).to_json().unwrap();
    ws.send(Message::text(json)).await.unwrap();
}

/// Next envelope from the server, failing on close or timeout.
pub async fn recv_data(ws: &mut WsClient) -> String {
    loop {
        let frame = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for reply")
            .expect("connection ended")
            .expect("websocket error");
        match frame {
            Message::Text(text) => {
                return Envelope::from_json(text.as_str().as_bytes()).unwrap().data;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Wait for the server to close the connection.
pub async fn expect_closed(ws: &mut WsClient) {
    let closed = tokio::time::timeout(WAIT, async {
        loop {
            match ws.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "server did not close the connection");
}
