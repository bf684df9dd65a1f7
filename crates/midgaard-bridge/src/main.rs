//! midgaard bridge
//!
//! Bridges Matrix rooms to a MUD: one line-server session per room.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use midgaard_bridge::Bridge;
use midgaard_bridge::transport::TcpLineConnector;
use midgaard_core::config::{ConfigOverrides, load_config};
use midgaard_core::tracing_init::{default_filter, init_tracing};
use midgaard_matrix::MatrixClient;

#[derive(Parser, Debug)]
#[command(name = "midgaard-bridge")]
#[command(version, about = "midgaard bridge - Matrix rooms to a MUD, one session per room")]
struct Args {
    /// Path to a TOML settings file.
    #[arg(short, long, env = "MIDGAARD_CONFIG")]
    config: Option<PathBuf>,

    /// Matrix homeserver URL.
    #[arg(short = 's', long, env = "MIDGAARD_HOMESERVER")]
    homeserver: Option<String>,

    /// Matrix user id of the bridge account.
    #[arg(short, long, env = "MIDGAARD_USER")]
    user: Option<String>,

    /// Matrix access token.
    #[arg(short, long, env = "MIDGAARD_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// MUD address as host:port.
    #[arg(short = 'H', long, env = "MIDGAARD_HOST")]
    host: Option<String>,

    /// Command prefix required in group rooms.
    #[arg(long, env = "MIDGAARD_PREFIX")]
    prefix: Option<char>,

    /// Ignore chat messages older than this many seconds.
    #[arg(long, env = "MIDGAARD_FRESHNESS_SECS")]
    freshness_secs: Option<u64>,

    /// Default log level when RUST_LOG is unset.
    #[arg(long, env = "MIDGAARD_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "MIDGAARD_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            homeserver_url: self.homeserver.clone(),
            user_id: self.user.clone(),
            access_token: self.token.clone(),
            mud_host: self.host.clone(),
            command_prefix: self.prefix,
            freshness_window_secs: self.freshness_secs,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&default_filter(&args.log_level), args.log_json);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting midgaard-bridge");

    let mut config = load_config(args.config.as_deref())?;
    config.apply(args.overrides());
    config.validate()?;

    let chat = match MatrixClient::connect(&config.matrix, config.sync.clone()).await {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!(error = %e, homeserver = %config.matrix.homeserver_url, "Failed to connect to homeserver");
            return Err(e.into());
        }
    };
    let connector = Arc::new(TcpLineConnector::default());

    let bridge = Bridge::new(chat, connector, &config);
    info!(mud_host = %config.mud.host, prefix = %config.bridge.command_prefix, "Bridge configured");

    let cancel = CancellationToken::new();
    let mut run = tokio::spawn(bridge.run(cancel.clone()));

    let finished = tokio::select! {
        () = shutdown_signal() => None,
        joined = &mut run => Some(joined),
    };
    cancel.cancel();
    let result = match finished {
        Some(joined) => joined,
        None => run.await,
    }?;

    if let Err(e) = result {
        error!(error = %e, "Bridge stopped with an error");
        return Err(e.into());
    }
    info!("Shutdown complete");
    Ok(())
}

/// Resolve on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}
