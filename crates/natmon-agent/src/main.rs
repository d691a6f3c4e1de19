//! NatMon Agent - Main Entry Point
//!
//! Reads `allocation_id,subnet_id,route_table_id` rows from stdin (or
//! `--routes`), claims the route of this host's subnet, then watches every
//! configured route table until stopped.

use anyhow::Context;
use clap::Parser;
use natmon_agent::{Ec2Gateway, IcmpProber, ImdsMetadata};
use natmon_core::{ConfigError, FailoverController, HostIdentity, MonitorSettings, RouteConfigSet};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "nat-monitor")]
#[command(version)]
#[command(about = "NAT instance failover monitor", long_about = None)]
struct Cli {
    /// Route config file; stdin when absent
    #[arg(long, env = "NATMON_ROUTES")]
    routes: Option<String>,

    /// JSON settings file
    #[arg(long, env = "NATMON_CONFIG")]
    config: Option<String>,

    /// Monitor only; leave the elastic IP and this subnet's route untouched at startup
    #[arg(long)]
    skip_setup: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("NatMon v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();

    let configs = read_routes(cli.routes.as_deref())
        .await
        .context("failed to load route configs")?;
    let settings = load_settings(cli.config.as_deref())?;

    let identity = HostIdentity::resolve(&ImdsMetadata::new())
        .await
        .context("failed to resolve instance identity")?;
    let host_config = identity
        .host_config(&configs)
        .context("no route config for this host")?
        .clone();
    tracing::info!(
        instance_id = identity.instance_id(),
        az = identity.availability_zone(),
        route_table = %host_config.route_table_id,
        "Host identity resolved"
    );

    let gateway = Arc::new(Ec2Gateway::connect(identity.region()).await);
    let controller = FailoverController::new(
        Arc::new(identity),
        gateway,
        Arc::new(IcmpProber::new()),
        configs,
        settings,
    );

    if cli.skip_setup {
        tracing::info!("Skipping NAT setup");
    } else {
        controller
            .setup_nat(&host_config)
            .await
            .context("NAT setup failed")?;
    }

    controller.run(shutdown_signal()).await;
    Ok(())
}

async fn read_routes(path: Option<&str>) -> anyhow::Result<RouteConfigSet> {
    let input = match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path))?,
        None => {
            let mut input = String::new();
            tokio::io::stdin().read_to_string(&mut input).await?;
            input
        }
    };
    Ok(RouteConfigSet::parse(&input)?)
}

fn load_settings(path: Option<&str>) -> anyhow::Result<MonitorSettings> {
    let Some(path) = path else {
        return Ok(MonitorSettings::default());
    };
    match MonitorSettings::load(path) {
        Ok(settings) => Ok(settings),
        Err(ConfigError::Io { reason, .. }) => {
            tracing::warn!(path, %reason, "Settings not found, using defaults");
            Ok(MonitorSettings::default())
        }
        Err(e) => Err(e).context("invalid settings"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
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
    tracing::info!("Shutdown signal received");
}
