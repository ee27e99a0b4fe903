//! MeshGate CLI - fast-path packet filter for the mesh data plane
//!
//! Loads a `.conf` file, binds the mesh UDP port, and forwards only
//! authenticated datagrams to the decryption service. Unless `--no-api`
//! is given, a loopback REST API lets the handshake service provision
//! sessions.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::{fmt, EnvFilter};

use meshgate::daemon::DEFAULT_HTTP_PORT;
use meshgate::{gate_from_config, ControlApi, FilterServer, MeshGateConfig, MeshGateError};

/// MeshGate - mesh packet authentication filter
#[derive(Parser, Debug)]
#[command(name = "meshgate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to MeshGate configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Loopback port for the control REST API
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT, conflicts_with = "no_api")]
    http_port: u16,

    /// Path to write the auth token file (default: /var/run/meshgate/auth-token)
    #[arg(long, conflicts_with = "no_api")]
    token_path: Option<PathBuf>,

    /// Do not start the control API; sessions come only from the config file
    #[arg(long)]
    no_api: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Set up logging
    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run(args).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e.user_message());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(args: Args) -> Result<(), MeshGateError> {
    tracing::info!("Loading configuration from: {}", args.config.display());
    let config = MeshGateConfig::from_file(&args.config)?;

    let gate = gate_from_config(&config)?;
    tracing::info!(
        "Installed {} static session(s) of {} capacity",
        gate.sessions().len(),
        gate.sessions().capacity()
    );

    let server = FilterServer::new(config.filter, gate.clone()).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let api = if args.no_api {
        tracing::info!("Control API disabled");
        None
    } else {
        let api = ControlApi::with_new_token(gate, args.token_path)?;
        let rx = shutdown_rx.clone();
        let port = args.http_port;
        Some(tokio::spawn(async move { api.run(port, rx).await }))
    };

    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(true);
    });

    tracing::info!("MeshGate filter starting...");
    server.run(shutdown_rx).await?;

    if let Some(handle) = api {
        match handle.await {
            Ok(result) => result?,
            Err(e) => tracing::warn!("Control API task failed: {}", e),
        }
    }

    let snap = server.gate().stats().snapshot();
    tracing::info!(
        "Final counters: {} admitted, {} dropped",
        snap.admitted,
        snap.dropped()
    );
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
