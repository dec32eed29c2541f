// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-session credential and ownership monitoring.
//!
//! Every session carries two countdowns that run regardless of its phase:
//!
//! - **Ownership check**: asks the authority which token currently owns the
//!   game. A different token means this session was superseded.
//! - **Credential renewal**: exchanges the refresh credential for a new pair
//!   before the access credential runs out.
//!
//! Calls are spawned with their own timeout and observed on a later tick, so
//! a slow authority never blocks the tick loop. At most one call of each kind
//! is in flight per session.
//!
//! An authority that definitively refuses a call evicts the session at once.
//! Transient failures (timeouts, transport errors, unexpected statuses) are
//! counted, and the session is evicted once `monitor_failure_limit`
//! consecutive failures of one kind have been observed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use crate::client::{self, AuthorityClient, AuthorityError};
use crate::config::SessionConfig;
use crate::error::EvictionReason;
use crate::types::{Credentials, SessionToken};

type Pending<T> = Option<oneshot::Receiver<client::Result<T>>>;

/// Monitor state of one session.
#[derive(Debug)]
pub struct SessionMonitor {
    ownership_countdown: Duration,
    renewal_countdown: Duration,
    ownership_check: Pending<SessionToken>,
    renewal: Pending<Credentials>,
    ownership_failures: u32,
    renewal_failures: u32,
    last_owner: Option<SessionToken>,
}

impl SessionMonitor {
    /// Create a monitor with both countdowns armed.
    pub fn new(config: &SessionConfig, credentials: &Credentials, now: DateTime<Utc>) -> Self {
        Self {
            ownership_countdown: config.ownership_check_interval,
            renewal_countdown: renewal_delay(config, credentials, now),
            ownership_check: None,
            renewal: None,
            ownership_failures: 0,
            renewal_failures: 0,
            last_owner: None,
        }
    }

    /// Owner reported by the last successful ownership check.
    pub fn last_owner(&self) -> Option<&SessionToken> {
        self.last_owner.as_ref()
    }

    /// Whether an ownership check is in flight.
    pub fn ownership_check_in_flight(&self) -> bool {
        self.ownership_check.is_some()
    }

    /// Whether a renewal is in flight.
    pub fn renewal_in_flight(&self) -> bool {
        self.renewal.is_some()
    }

    /// Time left until the next renewal is spawned.
    pub fn renewal_countdown(&self) -> Duration {
        self.renewal_countdown
    }

    /// Time left until the next ownership check is spawned.
    pub fn ownership_countdown(&self) -> Duration {
        self.ownership_countdown
    }

    /// Re-arm the renewal countdown after credentials were replaced externally.
    pub fn credentials_replaced(
        &mut self,
        config: &SessionConfig,
        credentials: &Credentials,
        now: DateTime<Utc>,
    ) {
        self.renewal_countdown = renewal_delay(config, credentials, now);
        self.renewal_failures = 0;
    }

    /// Collect completed calls.
    ///
    /// Returns renewed credentials, if a renewal succeeded, or the reason the
    /// session has to be evicted.
    pub fn poll(
        &mut self,
        token: &SessionToken,
        config: &SessionConfig,
    ) -> Result<Option<Credentials>, EvictionReason> {
        if let Some(result) = take_completed(&mut self.ownership_check) {
            match result {
                Ok(owner) if owner == *token => {
                    debug!(session = %token, "Ownership confirmed");
                    self.ownership_failures = 0;
                    self.last_owner = Some(owner);
                }
                Ok(owner) => {
                    info!(session = %token, %owner, "Session superseded by another token");
                    return Err(EvictionReason::Superseded { owner });
                }
                Err(e) if e.is_definitive() => {
                    return Err(EvictionReason::OwnershipUnverifiable(e.to_string()));
                }
                Err(e) => {
                    self.ownership_failures += 1;
                    warn!(
                        session = %token,
                        error = %e,
                        failures = self.ownership_failures,
                        "Ownership check failed"
                    );
                    if self.ownership_failures >= config.monitor_failure_limit {
                        return Err(EvictionReason::OwnershipUnverifiable(e.to_string()));
                    }
                }
            }
        }

        let mut renewed = None;
        if let Some(result) = take_completed(&mut self.renewal) {
            match result {
                Ok(credentials) => {
                    debug!(
                        session = %token,
                        valid_until = %credentials.access.valid_until,
                        "Credentials renewed"
                    );
                    self.renewal_failures = 0;
                    renewed = Some(credentials);
                }
                Err(e) if e.is_definitive() => {
                    return Err(EvictionReason::CredentialsRejected(e.to_string()));
                }
                Err(e) => {
                    self.renewal_failures += 1;
                    warn!(
                        session = %token,
                        error = %e,
                        failures = self.renewal_failures,
                        "Credential renewal failed"
                    );
                    if self.renewal_failures >= config.monitor_failure_limit {
                        return Err(EvictionReason::CredentialsUnrenewable(e.to_string()));
                    }
                }
            }
        }

        Ok(renewed)
    }

    /// Advance both countdowns by `elapsed` and spawn the calls that are due.
    ///
    /// Renewed credentials must have been applied (and
    /// [`credentials_replaced`](Self::credentials_replaced) called) before
    /// this runs so the renewal countdown reflects their expiry.
    pub fn advance(
        &mut self,
        elapsed: Duration,
        now: DateTime<Utc>,
        config: &SessionConfig,
        client: &Arc<dyn AuthorityClient>,
        credentials: &Credentials,
    ) {
        let (ownership_due, overshoot) = count_down(&mut self.ownership_countdown, elapsed);
        if ownership_due {
            self.ownership_countdown = config.ownership_check_interval.saturating_sub(overshoot);
            if self.ownership_check.is_none() {
                let client = client.clone();
                let access = credentials.access.clone();
                self.ownership_check = Some(spawn_call(config.request_timeout, async move {
                    client.fetch_owner_token(&access).await
                }));
            }
        }

        let (renewal_due, overshoot) = count_down(&mut self.renewal_countdown, elapsed);
        if renewal_due {
            self.renewal_countdown = renewal_delay(config, credentials, now).saturating_sub(overshoot);
            if self.renewal.is_none() {
                let client = client.clone();
                let refresh = credentials.refresh.clone();
                self.renewal = Some(spawn_call(config.request_timeout, async move {
                    client.renew_credentials(&refresh).await
                }));
            }
        }
    }
}

/// Time until the next renewal: the renewal interval, or less if the access
/// credential would otherwise come within `renewal_margin` of its expiry.
///
/// Never shorter than [`min_renewal_delay`], so short-lived access tokens
/// do not trigger a renewal on every tick.
pub fn renewal_delay(config: &SessionConfig, credentials: &Credentials, now: DateTime<Utc>) -> Duration {
    let until_margin = (credentials.access.valid_until - now)
        .to_std()
        .unwrap_or(Duration::ZERO)
        .saturating_sub(config.renewal_margin);
    config
        .credential_renewal_interval
        .min(until_margin)
        .max(min_renewal_delay(config))
}

/// Lower bound of [`renewal_delay`]: half the renewal margin, at least one tick.
pub fn min_renewal_delay(config: &SessionConfig) -> Duration {
    (config.renewal_margin / 2)
        .max(config.tick_rate)
        .min(config.credential_renewal_interval)
}

/// Subtract `elapsed`; returns whether the countdown ran out and by how much.
fn count_down(countdown: &mut Duration, elapsed: Duration) -> (bool, Duration) {
    if elapsed >= *countdown {
        let overshoot = elapsed - *countdown;
        *countdown = Duration::ZERO;
        (true, overshoot)
    } else {
        *countdown -= elapsed;
        (false, Duration::ZERO)
    }
}

fn spawn_call<T, F>(timeout: Duration, call: F) -> oneshot::Receiver<client::Result<T>>
where
    T: Send + 'static,
    F: std::future::Future<Output = client::Result<T>> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let result = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(AuthorityError::Timeout),
        };
        // receiver is gone when the session was evicted meanwhile
        let _ = tx.send(result);
    });
    rx
}

fn take_completed<T>(pending: &mut Pending<T>) -> Option<client::Result<T>> {
    let rx = pending.as_mut()?;
    match rx.try_recv() {
        Ok(result) => {
            *pending = None;
            Some(result)
        }
        Err(TryRecvError::Empty) => None,
        Err(TryRecvError::Closed) => {
            *pending = None;
            Some(Err(AuthorityError::Transport(
                "monitor call was dropped before completing".to_string(),
            )))
        }
    }
}
