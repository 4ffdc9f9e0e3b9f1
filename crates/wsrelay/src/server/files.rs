//! Default page and payload download proxy.

use std::time::Duration;

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderValue, Uri, header},
    response::{IntoResponse, Response},
};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use log::{debug, info};

use super::error::ApiError;

/// Connect timeout for payload downloads.
pub const PROXY_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Backend path prefix payloads are downloaded from.
pub const DOWNLOAD_PREFIX: &str = "direct/download";

pub type ProxyClient = Client<HttpConnector, Body>;

pub fn proxy_client() -> ProxyClient {
    let mut connector = HttpConnector::new();
    connector.set_connect_timeout(Some(PROXY_CONNECT_TIMEOUT));
    Client::builder(TokioExecutor::new()).build(connector)
}

/// Reverse proxy for configured payload paths.
#[derive(Clone)]
pub struct PayloadProxy {
    client: ProxyClient,
    backend_base_url: String,
}

impl PayloadProxy {
    pub fn new(client: ProxyClient, backend_base_url: impl Into<String>) -> Self {
        Self {
            client,
            backend_base_url: backend_base_url.into(),
        }
    }

    /// Forward `req` to the backend download for `payload_id`.
    pub async fn serve(&self, payload_id: &str, req: Request) -> Response {
        info!("Serving payload {} for {}", payload_id, req.uri().path());
        let target_path = format!("{}/{}", DOWNLOAD_PREFIX, payload_id);
        match proxy_request(self.client.clone(), req, &self.backend_base_url, &target_path).await {
            Ok(response) => response,
            Err(e) => e.into_response(),
        }
    }
}

/// Send `req` to `target_base_url/target_path`, keeping method, headers,
/// body and query.
pub async fn proxy_request(
    client: ProxyClient,
    mut req: Request,
    target_base_url: &str,
    target_path: &str,
) -> Result<Response, ApiError> {
    let query = req.uri().query().unwrap_or("");
    let mut target_uri = format!(
        "{}/{}",
        target_base_url.trim_end_matches('/'),
        target_path.trim_start_matches('/')
    );
    if !query.is_empty() {
        target_uri.push('?');
        target_uri.push_str(query);
    }

    debug!("Proxying request to {}", target_uri);

    let uri: Uri = target_uri
        .parse()
        .map_err(|e| ApiError::internal(format!("invalid target URI {target_uri}: {e}")))?;
    *req.uri_mut() = uri;

    if let Some(authority) = req.uri().authority() {
        let value = HeaderValue::from_str(authority.as_str()).map_err(|e| {
            ApiError::internal(format!("invalid Host header {}: {e}", authority.as_str()))
        })?;
        req.headers_mut().insert(header::HOST, value);
    }

    let response = client
        .request(req)
        .await
        .map_err(|e| ApiError::bad_gateway(format!("payload download failed: {e}")))?;

    let (parts, body) = response.into_parts();
    Ok(Response::from_parts(parts, Body::new(body)))
}
