// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable watchdog runtime.
//!
//! [`WatchdogRuntime`] assembles the session registry, the tick loop and the
//! HTTP API, and runs them on the current tokio runtime.
//!
//! ```rust,ignore
//! use simwatch_server::config::{Config, SERVER_ID_FILE};
//! use simwatch_server::runtime::WatchdogRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env(std::path::Path::new(SERVER_ID_FILE))?;
//!
//!     let runtime = WatchdogRuntime::builder()
//!         .config(&config)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use simwatch_core::{
    AuthorityConnector, CapabilitySet, SessionConfig, SessionRegistry, SimulationHooks, TickLoop,
};
use tokio::net::TcpListener;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::api::{AppState, router};
use crate::authority::HttpConnector;
use crate::config::Config;
use crate::payload::{ExtractionHooks, accept_config_files};

/// Builder for a [`WatchdogRuntime`].
pub struct WatchdogRuntimeBuilder {
    bind_addr: SocketAddr,
    session: SessionConfig,
    simulations: CapabilitySet,
    accept_config_files: Option<Vec<String>>,
    server_id: Option<String>,
    hooks: Option<Arc<dyn SimulationHooks>>,
    connector: Option<Arc<dyn AuthorityConnector>>,
}

impl Default for WatchdogRuntimeBuilder {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            session: SessionConfig::default(),
            simulations: CapabilitySet::new(),
            accept_config_files: None,
            server_id: None,
            hooks: None,
            connector: None,
        }
    }
}

impl WatchdogRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every setting from a loaded [`Config`].
    ///
    /// Installs [`ExtractionHooks`] for the configured layer tags unless
    /// hooks were set explicitly.
    pub fn config(mut self, config: &Config) -> Self {
        self.bind_addr = config.bind_addr;
        self.session = config.session.clone();
        self.simulations = config.simulations.clone();
        self.accept_config_files = config.accept_config_files.clone();
        self.server_id = Some(config.server_id.clone());
        if self.hooks.is_none() {
            self.hooks = Some(Arc::new(ExtractionHooks::new(config.layer_tags.clone())));
        }
        self
    }

    /// Set the HTTP listen address.
    ///
    /// Default: `0.0.0.0:5000`
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the session timing.
    pub fn session_config(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// Set the simulations this process offers (required, non-empty).
    pub fn simulations(mut self, simulations: CapabilitySet) -> Self {
        self.simulations = simulations;
        self
    }

    /// Only admit games using one of these config files.
    pub fn accept_config_files(mut self, names: Vec<String>) -> Self {
        self.accept_config_files = Some(names);
        self
    }

    /// Set the identity sent to the authority.
    pub fn server_id(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = Some(server_id.into());
        self
    }

    /// Set the payload hooks (required unless [`config`](Self::config) was used).
    pub fn hooks(mut self, hooks: Arc<dyn SimulationHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Replace the HTTP authority connector.
    pub fn connector(mut self, connector: Arc<dyn AuthorityConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Validate the settings and assemble the registry.
    pub fn build(self) -> Result<WatchdogRuntimeConfig> {
        if self.simulations.is_empty() {
            anyhow::bail!("at least one simulation must be offered");
        }
        let hooks = self
            .hooks
            .ok_or_else(|| anyhow::anyhow!("hooks are required"))?;
        let connector = match self.connector {
            Some(connector) => connector,
            None => {
                let server_id = self
                    .server_id
                    .ok_or_else(|| anyhow::anyhow!("server_id is required"))?;
                Arc::new(HttpConnector::new(server_id, self.session.request_timeout)?)
            }
        };

        let mut registry = SessionRegistry::new(self.simulations, connector, hooks, self.session);
        if let Some(names) = self.accept_config_files {
            registry = registry.with_acceptance_policy(accept_config_files(names));
        }

        Ok(WatchdogRuntimeConfig {
            registry: Arc::new(registry),
            bind_addr: self.bind_addr,
        })
    }
}

/// A validated runtime, ready to start.
pub struct WatchdogRuntimeConfig {
    registry: Arc<SessionRegistry>,
    bind_addr: SocketAddr,
}

impl WatchdogRuntimeConfig {
    /// Bind the listener and spawn the tick loop and HTTP server.
    pub async fn start(self) -> Result<WatchdogRuntime> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        let bind_addr = listener.local_addr()?;

        let ticker = TickLoop::new(self.registry.clone());
        let tick_shutdown = ticker.shutdown_handle();
        let (fatal_tx, fatal_rx) = watch::channel(None);

        let tick_handle = tokio::spawn(async move {
            if let Err(e) = ticker.run().await {
                let _ = fatal_tx.send(Some(e.to_string()));
            }
        });

        let (server_shutdown_tx, server_shutdown_rx) = watch::channel(false);
        let app = router(AppState {
            registry: self.registry.clone(),
        });
        let server_handle = tokio::spawn(serve(listener, app, server_shutdown_rx));

        info!(
            bind_addr = %bind_addr,
            simulations = self.registry.offered().len(),
            "WatchdogRuntime started"
        );

        Ok(WatchdogRuntime {
            server_handle,
            tick_handle,
            server_shutdown_tx,
            tick_shutdown,
            fatal_rx,
            registry: self.registry,
            bind_addr,
        })
    }
}

/// A running watchdog.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct WatchdogRuntime {
    server_handle: JoinHandle<Result<()>>,
    tick_handle: JoinHandle<()>,
    server_shutdown_tx: watch::Sender<bool>,
    tick_shutdown: Arc<Notify>,
    fatal_rx: watch::Receiver<Option<String>>,
    registry: Arc<SessionRegistry>,
    bind_addr: SocketAddr,
}

impl WatchdogRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> WatchdogRuntimeBuilder {
        WatchdogRuntimeBuilder::new()
    }

    /// Address the HTTP API is listening on.
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// The session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Resolves with the message of the fatal error that stopped the tick loop.
    ///
    /// Never resolves if the loop stops cleanly.
    pub async fn fatal_error(&self) -> String {
        let mut rx = self.fatal_rx.clone();
        let message = match rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        match message {
            Some(message) => message,
            None => std::future::pending().await,
        }
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        !self.server_handle.is_finished() && !self.tick_handle.is_finished()
    }

    /// Gracefully shut down the HTTP server and the tick loop.
    pub async fn shutdown(self) -> Result<()> {
        info!("WatchdogRuntime shutting down...");

        let _ = self.server_shutdown_tx.send(true);
        self.tick_shutdown.notify_one();

        if let Err(e) = self.tick_handle.await {
            error!("Tick loop task panicked: {}", e);
        }

        match self.server_handle.await {
            Ok(Ok(())) => {
                info!("WatchdogRuntime shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("WatchdogRuntime server error during shutdown: {}", e);
                Err(e)
            }
            Err(e) => {
                error!("WatchdogRuntime server task panicked: {}", e);
                Err(anyhow::anyhow!("server task panicked: {}", e))
            }
        }
    }
}

async fn serve(
    listener: TcpListener,
    app: Router,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        })
        .await?;
    Ok(())
}
