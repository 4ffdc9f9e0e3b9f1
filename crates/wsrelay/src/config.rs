//! Instance and backend configuration.
//!
//! The instance file is the JSON document written by the profile container:
//!
//! ```json
//! {"instances": [{"bindaddress": "0.0.0.0:8081", "websocketuri": "socket",
//!   "usessl": false, "defaultpage": "index.html", "debug": false,
//!   "payloads": {"/dl/agent.bin": "<payload-uuid>"}}]}
//! ```
//!
//! Backend location comes from `MYTHIC_SERVER_*` environment variables.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use ::config::{Config, Environment};
use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "MYTHIC_SERVER";

pub const DEFAULT_BACKEND_HOST: &str = "127.0.0.1";
pub const DEFAULT_BACKEND_PORT: u16 = 17443;
pub const DEFAULT_BACKEND_GRPC_PORT: u16 = 17444;

const DEFAULT_CERT_FILE: &str = "cert.pem";
const DEFAULT_KEY_FILE: &str = "key.pem";

/// Top-level instance file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
}

impl ProfileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read(path).with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn from_json(raw: &[u8]) -> Result<Self> {
        let config: Self = serde_json::from_slice(raw)?;
        if config.instances.is_empty() {
            bail!("no instances configured");
        }
        Ok(config)
    }

    /// True when any instance asks for debug logging.
    pub fn any_debug(&self) -> bool {
        self.instances.iter().any(|i| i.debug)
    }
}

/// One listener.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    #[serde(rename = "bindaddress")]
    pub bind_address: String,
    /// Path of the websocket endpoint, with or without a leading slash.
    #[serde(rename = "websocketuri")]
    pub websocket_uri: String,
    #[serde(rename = "sslkey")]
    pub ssl_key: String,
    #[serde(rename = "sslcert")]
    pub ssl_cert: String,
    #[serde(rename = "usessl")]
    pub use_ssl: bool,
    #[serde(rename = "defaultpage")]
    pub default_page: String,
    /// Accepted for compatibility. Logs always go to stderr.
    #[serde(rename = "logfile")]
    pub log_file: String,
    pub debug: bool,
    /// Served URL path to payload identifier.
    pub payloads: HashMap<String, String>,
}

impl InstanceConfig {
    pub fn socket_path(&self) -> String {
        normalize_path(&self.websocket_uri)
    }

    pub fn cert_path(&self) -> PathBuf {
        or_default(&self.ssl_cert, DEFAULT_CERT_FILE)
    }

    pub fn key_path(&self) -> PathBuf {
        or_default(&self.ssl_key, DEFAULT_KEY_FILE)
    }
}

fn or_default(path: &str, fallback: &str) -> PathBuf {
    if path.is_empty() {
        PathBuf::from(fallback)
    } else {
        PathBuf::from(path)
    }
}

/// Route form of a configured path: exactly one leading slash.
pub fn normalize_path(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}

/// Where the tasking backend lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendSettings {
    pub host: String,
    pub port: u16,
    pub grpc_port: u16,
    /// HTTP request timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_BACKEND_HOST.to_string(),
            port: DEFAULT_BACKEND_PORT,
            grpc_port: DEFAULT_BACKEND_GRPC_PORT,
            timeout: None,
        }
    }
}

impl BackendSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_environment(Environment::with_prefix(ENV_PREFIX))
    }

    fn from_environment(env: Environment) -> Result<Self> {
        let built = Config::builder()
            .set_default("host", DEFAULT_BACKEND_HOST)?
            .set_default("port", i64::from(DEFAULT_BACKEND_PORT))?
            .set_default("grpc_port", i64::from(DEFAULT_BACKEND_GRPC_PORT))?
            .add_source(env.try_parsing(true))
            .build()
            .context("reading backend settings")?;
        built
            .try_deserialize()
            .context("invalid MYTHIC_SERVER_* settings")
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn agent_message_url(&self) -> String {
        format!("{}/agent_message", self.base_url())
    }

    pub fn grpc_endpoint(&self) -> String {
        format!("http://{}:{}", self.host, self.grpc_port)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.timeout.filter(|s| *s > 0).map(Duration::from_secs)
    }
}
