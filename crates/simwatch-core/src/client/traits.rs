// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Authority client trait definitions.
//!
//! Defines the abstract interface sessions use to call out to the authority.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::capability::SimulationDefinition;
use crate::types::{ApiToken, Credentials, Kpi, SessionToken};

/// Errors from authority calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum AuthorityError {
    /// The authority answered and refused the call.
    #[error("Authority refused the request: {0}")]
    Refused(String),

    /// The call did not complete within the request timeout.
    #[error("Request timed out")]
    Timeout,

    /// The authority could not be reached.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The authority answered with an unexpected HTTP status.
    #[error("Unexpected status {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// The response could not be decoded.
    #[error("Invalid response: {0}")]
    Decode(String),

    /// The authority base address is unusable.
    #[error("Invalid authority address: {0}")]
    InvalidAddress(String),
}

impl AuthorityError {
    /// Whether the authority definitively refused the call.
    ///
    /// Definitive refusals are not retried; everything else counts as a
    /// transient, call-level failure.
    pub fn is_definitive(&self) -> bool {
        matches!(self, AuthorityError::Refused(_))
    }
}

/// Result type for authority calls.
pub type Result<T> = std::result::Result<T, AuthorityError>;

/// Form fields sent with a call.
pub type Fields = BTreeMap<String, String>;

/// Outbound calls a session makes to the authority.
///
/// Each call receives the credential it needs, so implementations hold no
/// per-session mutable state.
#[async_trait]
pub trait AuthorityClient: Send + Sync {
    /// Replace the simulations registered for this session.
    async fn register_capabilities(
        &self,
        access: &ApiToken,
        definitions: &[SimulationDefinition],
    ) -> Result<()>;

    /// Exchange the refresh credential for a new credential pair.
    async fn renew_credentials(&self, refresh: &ApiToken) -> Result<Credentials>;

    /// Token of the session the authority currently recognises as owner.
    async fn fetch_owner_token(&self, access: &ApiToken) -> Result<SessionToken>;

    /// Submit the month's KPIs and mark the month as finished.
    async fn submit_kpis(&self, access: &ApiToken, kpis: &[Kpi]) -> Result<()>;

    /// Generic call used by payload hooks; returns the response payload.
    async fn call(&self, access: &ApiToken, endpoint: &str, fields: &Fields) -> Result<Value>;
}

/// Creates a client bound to one authority address.
pub trait AuthorityConnector: Send + Sync {
    /// Connect to the authority API at `api_base`.
    fn connect(&self, api_base: &str) -> Result<Arc<dyn AuthorityClient>>;
}
