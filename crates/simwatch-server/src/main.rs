// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Simwatch Server - Simulation Session Watchdog
//!
//! An HTTP server responsible for:
//! - Receiving game states and target months from the authority
//! - Driving every admitted session through setup, simulation and report
//! - Keeping session credentials fresh and verifying session ownership

use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::{error, info, warn};

use simwatch_core::PhaseMachine;
use simwatch_server::config::{Config, SERVER_ID_FILE};
use simwatch_server::runtime::WatchdogRuntime;

#[derive(Parser, Debug)]
#[command(name = "simwatch-server", version, about)]
struct Cli {
    /// Listen port, overrides SIMWATCH_PORT
    #[arg(long)]
    port: Option<u16>,

    /// Write the phase machine as a Graphviz graph to this file and exit
    #[arg(long, value_name = "FILE")]
    dotfile: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "simwatch_server=info,simwatch_core=info".into()),
        )
        .init();

    if let Some(path) = cli.dotfile {
        std::fs::write(&path, PhaseMachine::to_dot())?;
        info!(path = %path.display(), "Phase machine graph written");
        return Ok(());
    }

    // Load .env files if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }
    if dotenvy::from_filename(SERVER_ID_FILE).is_err() {
        info!("No {} file loaded", SERVER_ID_FILE);
    }

    let mut config = Config::from_env(Path::new(SERVER_ID_FILE))?;
    if let Some(port) = cli.port {
        config = config.with_port(port);
    }

    info!(
        bind_addr = %config.bind_addr,
        server_id = %config.server_id,
        simulations = config.simulations.len(),
        tick_rate_ms = config.session.tick_rate.as_millis() as u64,
        "Starting Simwatch Server"
    );

    let runtime = WatchdogRuntime::builder()
        .config(&config)
        .build()?
        .start()
        .await?;

    info!(addr = %runtime.bind_addr(), "Watchdog ready");

    let fatal = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutdown signal received");
            None
        }
        message = runtime.fatal_error() => Some(message),
    };

    runtime.shutdown().await?;

    if let Some(message) = fatal {
        error!(error = %message, "Simwatch Server stopped by fatal error");
        std::process::exit(1);
    }

    info!("Simwatch Server shut down");
    Ok(())
}
