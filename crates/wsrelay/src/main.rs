use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, ValueEnum};
use log::{debug, error, info};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use wsrelay::backend::{
    BackendConnector, GrpcDialer, GrpcPushBackend, HttpPollBackend, PollBackend, PushBackend,
};
use wsrelay::config::{BackendSettings, ProfileConfig};
use wsrelay::server::ServerInstance;
use wsrelay::server::files::{PayloadProxy, proxy_client};

mod logging;

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common)?;
    ctx.init_logging();

    // Only ring is compiled in; fails only if a provider is already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();
    debug!("backend settings: {:?}", ctx.backend);

    async_main(ctx)
}

#[tokio::main]
async fn async_main(ctx: RuntimeContext) -> Result<()> {
    handle_serve(ctx).await
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Websocket transport bridge between C2 agents and the tasking backend."
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Instance configuration file
    #[arg(long, value_name = "PATH", env = "WSRELAY_CONFIG", default_value = "config.json")]
    config: PathBuf,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
    /// Enable debug logging (equivalent to -v)
    #[arg(long)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long)]
    trace: bool,
    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
    /// Disable ANSI colors in output
    #[arg(long = "no-color", conflicts_with = "color")]
    no_color: bool,
    /// Control color output (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorOption::Auto)]
    color: ColorOption,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorOption {
    Auto,
    Always,
    Never,
}

struct RuntimeContext {
    common: CommonOpts,
    profile: ProfileConfig,
    backend: BackendSettings,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let profile = ProfileConfig::load(&common.config)?;
        let backend = BackendSettings::from_env()?;
        Ok(Self {
            common,
            profile,
            backend,
        })
    }

    fn init_logging(&self) {
        let level = logging::effective_log_level(&self.common, self.profile.any_debug());
        logging::init_logging(&self.common, level);
    }
}

async fn handle_serve(ctx: RuntimeContext) -> Result<()> {
    let RuntimeContext {
        profile, backend, ..
    } = ctx;

    // One backend connection for the whole process, dialed on first push session.
    let connector = Arc::new(BackendConnector::new(GrpcDialer::new(
        backend.grpc_endpoint(),
    )));
    let push: Arc<dyn PushBackend> = Arc::new(GrpcPushBackend::new(connector));
    let poll: Arc<dyn PollBackend> =
        Arc::new(HttpPollBackend::new(&backend).context("building backend HTTP client")?);
    let payloads = PayloadProxy::new(proxy_client(), backend.base_url());

    info!(
        "Backend at {} (grpc {})",
        backend.agent_message_url(),
        backend.grpc_endpoint()
    );

    let shutdown = CancellationToken::new();
    let mut servers = JoinSet::new();
    for config in profile.instances {
        let bind = config.bind_address.clone();
        let instance = ServerInstance::new(config, poll.clone(), push.clone(), payloads.clone())
            .with_context(|| format!("configuring instance on {bind}"))?;
        servers.spawn(instance.run(shutdown.clone()));
    }

    let signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, stopping listeners...");
        signal.cancel();
    });

    let mut result = Ok(());
    while let Some(joined) = servers.join_next().await {
        let outcome = joined
            .context("listener task panicked")
            .and_then(|served| served);
        if let Err(e) = outcome {
            error!("Listener stopped: {e:#}");
            shutdown.cancel();
            if result.is_ok() {
                result = Err(e);
            }
        }
    }

    info!("Shutdown complete");
    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
