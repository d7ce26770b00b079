//! Ward Daemon - HTTP surface for the resilience context
//!
//! The Ward daemon provides:
//! - Signal ingestion over HTTP
//! - Health, error and breaker inspection
//! - Breaker and ledger administration

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use ward_daemon::error::{DaemonError, DaemonResult};
use ward_daemon::{DaemonConfig, Server};
use ward_types::DeploymentProfile;

/// Ward Daemon CLI
#[derive(Parser)]
#[command(name = "wardd")]
#[command(about = "Ward Daemon - failure classification and health service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "WARD_CONFIG")]
    config: Option<String>,

    /// Listen address
    #[arg(short, long, env = "WARD_LISTEN_ADDR")]
    listen: Option<String>,

    /// Deployment profile
    #[arg(short, long, env = "WARD_PROFILE")]
    profile: Option<String>,

    /// Resilience TOML configuration (overrides the profile defaults)
    #[arg(short, long, env = "WARD_RESILIENCE_CONFIG")]
    resilience: Option<String>,

    /// Log level
    #[arg(long, env = "WARD_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "WARD_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cli.log_level.clone().into());

    if cli.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    // Load configuration
    let mut config = DaemonConfig::load(cli.config.as_deref())
        .map_err(|e| DaemonError::Config(e.to_string()))?;

    // Override with CLI args
    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen
            .parse()
            .map_err(|e| DaemonError::Config(format!("Invalid listen address: {}", e)))?;
    }
    if let Some(profile) = &cli.profile {
        config.profile = profile
            .parse::<DeploymentProfile>()
            .map_err(|e| DaemonError::Config(e.to_string()))?;
    }
    if cli.resilience.is_some() {
        config.resilience_file = cli.resilience.clone();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        profile = %config.profile,
        listen = %config.server.listen_addr,
        "Starting ward daemon"
    );

    let server = Server::new(config)?;
    server.run().await
}
