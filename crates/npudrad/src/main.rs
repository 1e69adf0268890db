//! npudrad — the NPU dynamic resource allocation node agent.
//!
//! # Usage
//!
//! ```text
//! NODE_NAME=node-a npudrad run --config /etc/npudra/npudra.toml --port 8080
//! npudrad default-config > npudra.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use npudra_core::DriverConfig;
use tokio::sync::watch;
use tracing::{error, info};

use npudrad::{api, bootstrap, reconcile};

#[derive(Parser)]
#[command(name = "npudrad", about = "NPU dynamic resource allocation node agent")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the node agent.
    Run {
        /// Path to the agent configuration file.
        #[arg(long, default_value = "/etc/npudra/npudra.toml")]
        config: PathBuf,

        /// Node this agent runs on; overrides the config file.
        #[arg(long, env = "NODE_NAME")]
        node_name: Option<String>,

        /// Port the claim API listens on.
        #[arg(long, default_value = "8080")]
        port: u16,
    },
    /// Print the default configuration as TOML.
    DefaultConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,npudrad=debug,npudra=debug")
            }),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            node_name,
            port,
        } => {
            let mut config = DriverConfig::from_file(&config)?;
            if let Some(node_name) = node_name {
                config.node_name = node_name;
            }
            run(config, port).await
        }
        Command::DefaultConfig => {
            print!("{}", DriverConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}

async fn run(config: DriverConfig, port: u16) -> anyhow::Result<()> {
    info!(node = %config.node_name, driver = %config.driver_name, "NPU node agent starting");

    // ── Initialize subsystems ──────────────────────────────────

    let agent = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || bootstrap::build(&config)).await??
    };
    let state = agent.state().clone();
    let router = api::build_router(agent.driver.clone());

    // ── Device classes ─────────────────────────────────────────

    // On first start publication runs alongside serving; on restart it
    // completes before the API comes up.
    let first_start = state.is_first_start();
    let publish = tokio::task::spawn_blocking(move || {
        agent.publish_device_classes();
    });
    let publish_handle = if first_start {
        Some(publish)
    } else {
        publish.await?;
        None
    };

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let reconcile_handle = tokio::spawn(reconcile::run(
        state,
        Duration::from_secs(config.reconcile_interval_secs),
        shutdown_rx,
    ));

    // ── Start API server ───────────────────────────────────────

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "claim API starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for background tasks.
    let _ = reconcile_handle.await;
    if let Some(handle) = publish_handle {
        let _ = handle.await;
    }

    info!("NPU node agent stopped");
    Ok(())
}
