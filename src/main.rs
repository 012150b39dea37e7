use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gatekeeper::config::{GatekeeperConfig, LoggingConfig};
use gatekeeper::http::{load_server_config, HttpServer};
use gatekeeper::ratelimit::{Registry, Sweeper};

/// Per-client, per-route request admission control.
#[derive(Debug, Parser)]
#[command(name = "gatekeeper", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the configuration
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut config = GatekeeperConfig::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen;
    }
    if cli.log_json {
        config.logging.json = true;
    }

    init_tracing(&config.logging);

    info!("Starting Gatekeeper admission control");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    match dotenv {
        Ok(path) => info!(path = %path.display(), "Loaded environment file"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(error = %e, "Failed to load environment file"),
    }

    let rules = config.rate_limiting.rule_set();
    info!(
        listen_addr = %config.server.listen_addr,
        rules = rules.len(),
        tls = config.server.tls.is_some(),
        "Configuration loaded"
    );

    let registry = Arc::new(Registry::with_eviction(rules, config.rate_limiting.eviction));
    info!("Registry initialized");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut sweeper_rx = shutdown_rx.clone();
    let sweeper = Sweeper::new(registry.clone()).spawn(async move {
        let _ = sweeper_rx.changed().await;
    });

    let mut server = HttpServer::bind(config.server.listen_addr, registry.clone()).await?;
    if let Some(tls) = &config.server.tls {
        server = server.with_tls(load_server_config(tls)?);
    }

    let mut server_rx = shutdown_rx;
    let mut serving = tokio::spawn(server.serve_with_shutdown(async move {
        let _ = server_rx.changed().await;
    }));

    let stopped_early = tokio::select! {
        result = &mut serving => Some(result),
        _ = shutdown_signal() => None,
    };
    let _ = shutdown_tx.send(true);

    let served = match stopped_early {
        Some(result) => {
            warn!("HTTP server stopped before shutdown was requested");
            result
        }
        None => serving.await,
    };
    sweeper.await?;
    served??;

    info!(remaining = registry.len(), "Gatekeeper stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
