// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Timing configuration shared by every session.

use std::time::Duration;

/// Configuration for session ticking and monitoring.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Period of the tick loop.
    pub tick_rate: Duration,
    /// How often each session verifies it is still the authoritative one.
    pub ownership_check_interval: Duration,
    /// How often credentials are renewed.
    ///
    /// Must be shorter than the access token lifetime.
    pub credential_renewal_interval: Duration,
    /// Renew this long before the access token's `valid_until` at the latest.
    pub renewal_margin: Duration,
    /// Timeout applied to each ownership check and renewal call.
    pub request_timeout: Duration,
    /// Consecutive transient monitor failures tolerated before eviction.
    pub monitor_failure_limit: u32,
    /// How long an ended session waits for a new game before eviction.
    pub ended_linger: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_rate: Duration::from_secs(1),
            ownership_check_interval: Duration::from_secs(60),
            credential_renewal_interval: Duration::from_secs(900),
            renewal_margin: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            monitor_failure_limit: 2,
            ended_linger: Duration::from_secs(60),
        }
    }
}

impl SessionConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tick period.
    pub fn with_tick_rate(mut self, rate: Duration) -> Self {
        self.tick_rate = rate;
        self
    }

    /// Set the ownership check interval.
    pub fn with_ownership_check_interval(mut self, interval: Duration) -> Self {
        self.ownership_check_interval = interval;
        self
    }

    /// Set the credential renewal interval.
    pub fn with_credential_renewal_interval(mut self, interval: Duration) -> Self {
        self.credential_renewal_interval = interval;
        self
    }

    /// Set the renewal margin before access token expiry.
    pub fn with_renewal_margin(mut self, margin: Duration) -> Self {
        self.renewal_margin = margin;
        self
    }

    /// Set the per-call timeout for monitor calls.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the number of consecutive transient failures tolerated.
    ///
    /// Values below 1 are treated as 1.
    pub fn with_monitor_failure_limit(mut self, limit: u32) -> Self {
        self.monitor_failure_limit = limit.max(1);
        self
    }

    /// Set how long an ended session lingers.
    pub fn with_ended_linger(mut self, linger: Duration) -> Self {
        self.ended_linger = linger;
        self
    }
}
