// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pluggable phase-entry hooks.
//!
//! Entering `Setup`, `Simulation` or `Report` runs the matching hook on a
//! spawned task. The session only advances once the hook succeeds; how a
//! failure is handled depends on its [`HookFailure`] kind.
//!
//! [`SimulationHooks::on_tick`] and [`SimulationHooks::session_closed`] are
//! called synchronously from the tick loop and must return quickly.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::capability::CapabilitySet;
use crate::client::{AuthorityClient, AuthorityError, Fields};
use crate::error::EvictionReason;
use crate::session::SessionSnapshot;
use crate::types::{Credentials, GameSessionInfo, Kpi, SessionToken};

/// How a hook failure affects its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookFailure {
    /// The session stays in its phase until the authority re-sends its state.
    Retryable,
    /// The session is evicted.
    SessionReset,
    /// The process stops.
    Fatal,
}

/// Error reported by a hook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HookError {
    /// Failure classification.
    pub kind: HookFailure,
    /// Human readable description.
    pub message: String,
}

impl HookError {
    /// A failure the phase can recover from.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            kind: HookFailure::Retryable,
            message: message.into(),
        }
    }

    /// A failure that invalidates the session.
    pub fn reset(message: impl Into<String>) -> Self {
        Self {
            kind: HookFailure::SessionReset,
            message: message.into(),
        }
    }

    /// A failure that must stop the process.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: HookFailure::Fatal,
            message: message.into(),
        }
    }
}

impl From<AuthorityError> for HookError {
    fn from(err: AuthorityError) -> Self {
        HookError::retryable(err.to_string())
    }
}

/// What a hook gets to work with.
#[derive(Clone)]
pub struct PhaseContext {
    /// Session the phase belongs to.
    pub token: SessionToken,
    /// Game description received on first contact.
    pub info: GameSessionInfo,
    /// Month being set up (the setup month), simulated or reported.
    pub month: i32,
    /// Credentials at the time the phase was entered.
    pub credentials: Credentials,
    /// Client bound to the session's authority.
    pub client: Arc<dyn AuthorityClient>,
}

impl PhaseContext {
    /// Call an authority endpoint with the session's access token.
    pub async fn call(&self, endpoint: &str, fields: &Fields) -> Result<Value, AuthorityError> {
        self.client
            .call(&self.credentials.access, endpoint, fields)
            .await
    }
}

impl std::fmt::Debug for PhaseContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseContext")
            .field("token", &self.token)
            .field("month", &self.month)
            .finish_non_exhaustive()
    }
}

/// The domain payload plugged into every session.
///
/// All methods have no-op defaults.
#[async_trait]
pub trait SimulationHooks: Send + Sync {
    /// Simulations a session registers for the given game.
    ///
    /// Defaults to everything the process offers.
    fn definitions(&self, info: &GameSessionInfo, offered: &CapabilitySet) -> CapabilitySet {
        let _ = info;
        offered.clone()
    }

    /// Prepare the payload after capabilities were registered.
    async fn setup(&self, ctx: &PhaseContext) -> Result<(), HookError> {
        let _ = ctx;
        Ok(())
    }

    /// Run the payload for `ctx.month`.
    async fn simulate(&self, ctx: &PhaseContext) -> Result<(), HookError> {
        let _ = ctx;
        Ok(())
    }

    /// KPIs for `ctx.month`; submitted to the authority afterwards.
    async fn report(&self, ctx: &PhaseContext) -> Result<Vec<Kpi>, HookError> {
        let _ = ctx;
        Ok(Vec::new())
    }

    /// Called once per tick for every live session, before its progress is
    /// reconciled. Must not block.
    fn on_tick(&self, elapsed: Duration, snapshot: &SessionSnapshot) {
        let _ = (elapsed, snapshot);
    }

    /// Called after a session was removed from the registry.
    ///
    /// Release anything held for `token` here.
    fn session_closed(&self, token: &SessionToken, reason: &EvictionReason) {
        let _ = (token, reason);
    }
}

/// Hooks that do nothing and always succeed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl SimulationHooks for NoopHooks {}
