// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The single fixed-rate tick source driving every session.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::error::Result;
use crate::registry::SessionRegistry;

/// Background worker ticking a [`SessionRegistry`].
pub struct TickLoop {
    registry: Arc<SessionRegistry>,
    tick_rate: Duration,
    shutdown: Arc<Notify>,
}

impl TickLoop {
    /// Create a tick loop running at the registry's configured rate.
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        let tick_rate = registry.config().tick_rate;
        Self {
            registry,
            tick_rate,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run until shutdown is signalled or a session reports a fatal error.
    ///
    /// Missed ticks are delayed rather than bunched up; each tick passes the
    /// actually elapsed time to the sessions.
    pub async fn run(&self) -> Result<()> {
        info!(tick_rate_ms = self.tick_rate.as_millis() as u64, "Tick loop started");

        let mut interval = tokio::time::interval(self.tick_rate);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick of an interval completes immediately
        interval.tick().await;
        let mut last = Instant::now();

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Tick loop received shutdown signal");
                    break;
                }

                _ = interval.tick() => {
                    let now = Instant::now();
                    let elapsed = now - last;
                    last = now;

                    match self.registry.tick(elapsed) {
                        Ok(report) => {
                            if report.fired > 0 || !report.evicted.is_empty() {
                                debug!(
                                    sessions = report.ticked,
                                    fired = report.fired,
                                    evicted = report.evicted.len(),
                                    "Tick"
                                );
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Tick loop stopped by fatal error");
                            return Err(e);
                        }
                    }
                }
            }
        }

        info!("Tick loop stopped");
        Ok(())
    }
}
