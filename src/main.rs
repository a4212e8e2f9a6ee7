//! Gantry - capacity-driven autoscaler for runner scale sets

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gantry::config::{self, Config};
use gantry::controller::{AllocatorStrategy, KubeClusterState, Reconciler};

/// Gantry - sizes runner scale sets against free cluster capacity
#[derive(Parser, Debug)]
#[command(name = "gantry", version, about, long_about = None)]
struct Cli {
    /// Calculate changes without applying them to the cluster
    #[arg(long)]
    dry_run: bool,

    /// Reconcile interval (e.g. "30s", "5m"; bare numbers are seconds)
    #[arg(long, default_value = "30s", value_parser = config::parse_duration)]
    reconcile_interval: Duration,

    /// Allocation strategy
    #[arg(long, value_enum, default_value_t = AllocatorStrategy::FairShare)]
    allocator: AllocatorStrategy,

    /// Percentage of otherwise-available CPU withheld as reserve
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u8).range(0..=100))]
    cpu_buffer_percent: u8,

    /// Percentage of otherwise-available memory withheld as reserve
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u8).range(0..=100))]
    memory_buffer_percent: u8,

    /// Namespace to watch for runner sets (repeatable; all namespaces when omitted)
    #[arg(long = "namespace")]
    namespaces: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config {
        cpu_buffer_percent: cli.cpu_buffer_percent,
        memory_buffer_percent: cli.memory_buffer_percent,
        reconcile_interval: cli.reconcile_interval,
        namespaces: cli.namespaces,
        dry_run: cli.dry_run,
        allocator: cli.allocator,
    };

    info!("gantry controller starting");
    if config.dry_run {
        warn!("DRY-RUN MODE ENABLED: changes will be calculated but not applied to the cluster");
    }

    // In-cluster config in production, kubeconfig for local development
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create Kubernetes client: {e}"))?;

    info!(
        cpu_buffer_percent = config.cpu_buffer_percent,
        memory_buffer_percent = config.memory_buffer_percent,
        reconcile_interval = ?config.reconcile_interval,
        namespaces = ?config.namespaces,
        dry_run = config.dry_run,
        allocator = %config.allocator,
        "controller configuration loaded"
    );

    let state = Arc::new(KubeClusterState::new(client));
    let reconciler = Reconciler::new(state, config);

    // SIGINT/SIGTERM cancel the loop; a tick in flight finishes first
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_cancel.cancel();
    });

    reconciler.run(cancel).await?;

    info!("controller stopped gracefully");
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let ctrl_c = tokio::signal::ctrl_c();
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(err) => {
            error!(error = %err, "failed to install SIGTERM handler");
            let _ = ctrl_c.await;
        }
    }
}
