//! One HTTP(S) listener per configured instance.

pub mod error;
pub mod files;
pub mod tls;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use axum::{
    Router,
    extract::{Request, State},
    http::Uri,
    routing::{any, get_service},
};
use log::info;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeFile;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::backend::{PollBackend, PushBackend};
use crate::bridge::{Bridge, dispatch};
use crate::config::{InstanceConfig, normalize_path};

use self::error::ApiError;
use self::files::PayloadProxy;

/// Time given to open connections once shutdown starts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A configured listener and everything its routes need.
pub struct ServerInstance {
    config: InstanceConfig,
    bridge: Bridge,
    payloads: PayloadProxy,
}

impl ServerInstance {
    /// Validate `config` and wire it to the given backends.
    pub fn new(
        config: InstanceConfig,
        poll: Arc<dyn PollBackend>,
        push: Arc<dyn PushBackend>,
        payloads: PayloadProxy,
    ) -> Result<Self> {
        validate_routes(&config)?;
        let bridge = Bridge::new(poll, push, config.debug);
        Ok(Self {
            config,
            bridge,
            payloads,
        })
    }

    pub fn router(&self) -> Router {
        let socket = Router::new()
            .route(&self.config.socket_path(), any(dispatch::accept))
            .with_state(self.bridge.clone());

        let mut files = Router::new();
        for (path, payload_id) in &self.config.payloads {
            let payload_id = payload_id.clone();
            info!("Hosting payload {} at {}", payload_id, normalize_path(path));
            files = files.route(
                &normalize_path(path),
                any(move |State(proxy): State<PayloadProxy>, req: Request| {
                    let payload_id = payload_id.clone();
                    async move { proxy.serve(&payload_id, req).await }
                }),
            );
        }
        let page = get_service(ServeFile::new(&self.config.default_page)).fallback(not_found);
        let files = files
            .route("/", page.clone())
            .route("/index.html", page)
            .with_state(self.payloads.clone());

        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::DEBUG))
            .on_response(DefaultOnResponse::new().level(Level::DEBUG));

        socket
            .merge(files)
            .fallback(not_found)
            .layer(trace_layer)
    }

    /// Serve until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let addr = resolve_bind_address(&self.config.bind_address).await?;
        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        if self.config.use_ssl {
            let cert = self.config.cert_path();
            let key = self.config.key_path();
            let tls = tls::load_or_generate(&cert, &key, &self.config.bind_address).await?;

            let handle = axum_server::Handle::new();
            let signal = handle.clone();
            tokio::spawn(async move {
                shutdown.cancelled().await;
                signal.graceful_shutdown(Some(SHUTDOWN_GRACE));
            });

            info!("Listening on https://{} (socket {})", addr, self.config.socket_path());
            axum_server::bind_rustls(addr, tls)
                .handle(handle)
                .serve(app)
                .await
                .with_context(|| format!("serving TLS on {addr}"))
        } else {
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("binding to {addr}"))?;

            info!("Listening on http://{} (socket {})", addr, self.config.socket_path());
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
                .with_context(|| format!("serving on {addr}"))
        }
    }
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::not_found(uri.path())
}

/// Reject configurations whose routes would overlap or be read as captures.
fn validate_routes(config: &InstanceConfig) -> Result<()> {
    let mut seen: HashSet<String> = ["/".to_string(), "/index.html".to_string()].into();
    let socket = config.socket_path();
    check_literal_path(&socket)?;
    if !seen.insert(socket.clone()) {
        bail!("websocket path {socket} collides with the default page");
    }
    for path in config.payloads.keys() {
        let path = normalize_path(path);
        check_literal_path(&path)?;
        if !seen.insert(path.clone()) {
            bail!("payload path {path} collides with another route");
        }
    }
    Ok(())
}

/// Routes are served verbatim, so router capture syntax is refused.
fn check_literal_path(path: &str) -> Result<()> {
    if path.contains(['{', '}']) {
        bail!("route {path} contains a brace");
    }
    if let Some(segment) = path
        .split('/')
        .find(|segment| segment.starts_with([':', '*']))
    {
        bail!("route {path} has segment {segment} starting with ':' or '*'");
    }
    Ok(())
}

/// Accepts `host:port`, `:port` and resolvable names.
async fn resolve_bind_address(bind: &str) -> Result<SocketAddr> {
    let bind = if bind.starts_with(':') {
        format!("0.0.0.0{bind}")
    } else {
        bind.to_string()
    };
    tokio::net::lookup_host(&bind)
        .await
        .with_context(|| format!("resolving bind address {bind}"))?
        .next()
        .with_context(|| format!("bind address {bind} resolved to nothing"))
}
