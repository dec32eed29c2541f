// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock authority for testing.
//!
//! Answers every call in memory. Results can be scripted per call kind;
//! unscripted calls succeed. Every call is recorded for later inspection.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use super::traits::*;
use crate::capability::SimulationDefinition;
use crate::types::{ApiToken, Credentials, Kpi, SessionToken};

/// A call received by the mock.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    /// `register_capabilities`.
    RegisterCapabilities(Vec<SimulationDefinition>),
    /// `renew_credentials`, with the refresh token presented.
    RenewCredentials(String),
    /// `fetch_owner_token`, with the access token presented.
    FetchOwner(String),
    /// `submit_kpis`.
    SubmitKpis(Vec<Kpi>),
    /// `call`, with the endpoint.
    Call(String),
}

/// In-memory authority.
#[derive(Default)]
pub struct MockAuthorityClient {
    owner: Mutex<Option<SessionToken>>,
    renewals: Mutex<VecDeque<Result<Credentials>>>,
    owner_replies: Mutex<VecDeque<Result<SessionToken>>>,
    registrations: Mutex<VecDeque<Result<()>>>,
    submissions: Mutex<VecDeque<Result<()>>>,
    payloads: Mutex<HashMap<String, Value>>,
    calls: Mutex<Vec<MockCall>>,
    issued: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockAuthorityClient {
    /// Create a mock with no owner configured.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock that reports `owner` as the owning session.
    pub fn with_owner(owner: impl Into<SessionToken>) -> Self {
        let mock = Self::new();
        mock.set_owner(owner);
        mock
    }

    /// Change the owner reported by `fetch_owner_token`.
    pub fn set_owner(&self, owner: impl Into<SessionToken>) {
        *lock(&self.owner) = Some(owner.into());
    }

    /// Queue the result of the next renewal.
    pub fn push_renewal(&self, result: Result<Credentials>) {
        lock(&self.renewals).push_back(result);
    }

    /// Queue the result of the next ownership query.
    pub fn push_owner_reply(&self, result: Result<SessionToken>) {
        lock(&self.owner_replies).push_back(result);
    }

    /// Queue the result of the next capability registration.
    pub fn push_registration(&self, result: Result<()>) {
        lock(&self.registrations).push_back(result);
    }

    /// Queue the result of the next KPI submission.
    pub fn push_submission(&self, result: Result<()>) {
        lock(&self.submissions).push_back(result);
    }

    /// Payload returned by `call` for `endpoint`.
    pub fn set_payload(&self, endpoint: impl Into<String>, payload: Value) {
        lock(&self.payloads).insert(endpoint.into(), payload);
    }

    /// Every call received so far.
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.calls).clone()
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&MockCall) -> bool) -> usize {
        lock(&self.calls).iter().filter(|call| predicate(call)).count()
    }

    /// KPI batches submitted so far.
    pub fn submitted_kpis(&self) -> Vec<Vec<Kpi>> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                MockCall::SubmitKpis(kpis) => Some(kpis.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: MockCall) {
        lock(&self.calls).push(call);
    }

    fn fresh_credentials(&self) -> Credentials {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        Credentials::new(
            ApiToken::new(format!("access-{}", n), now + chrono::Duration::hours(1)),
            ApiToken::new(format!("refresh-{}", n), now + chrono::Duration::hours(24)),
        )
    }
}

#[async_trait]
impl AuthorityClient for MockAuthorityClient {
    async fn register_capabilities(
        &self,
        _access: &ApiToken,
        definitions: &[SimulationDefinition],
    ) -> Result<()> {
        self.record(MockCall::RegisterCapabilities(definitions.to_vec()));
        lock(&self.registrations).pop_front().unwrap_or(Ok(()))
    }

    async fn renew_credentials(&self, refresh: &ApiToken) -> Result<Credentials> {
        self.record(MockCall::RenewCredentials(refresh.token.clone()));
        let scripted = lock(&self.renewals).pop_front();
        scripted.unwrap_or_else(|| Ok(self.fresh_credentials()))
    }

    async fn fetch_owner_token(&self, access: &ApiToken) -> Result<SessionToken> {
        self.record(MockCall::FetchOwner(access.token.clone()));
        if let Some(reply) = lock(&self.owner_replies).pop_front() {
            return reply;
        }
        lock(&self.owner)
            .clone()
            .ok_or_else(|| AuthorityError::Transport("no owner configured".to_string()))
    }

    async fn submit_kpis(&self, _access: &ApiToken, kpis: &[Kpi]) -> Result<()> {
        self.record(MockCall::SubmitKpis(kpis.to_vec()));
        lock(&self.submissions).pop_front().unwrap_or(Ok(()))
    }

    async fn call(&self, _access: &ApiToken, endpoint: &str, _fields: &Fields) -> Result<Value> {
        self.record(MockCall::Call(endpoint.to_string()));
        Ok(lock(&self.payloads)
            .get(endpoint)
            .cloned()
            .unwrap_or(Value::Null))
    }
}

/// Connector handing out one shared [`MockAuthorityClient`].
pub struct MockConnector {
    client: Arc<MockAuthorityClient>,
    connected: Mutex<Vec<String>>,
    /// If true, every connection attempt fails.
    pub fail: bool,
}

impl MockConnector {
    /// Create a connector around `client`.
    pub fn new(client: Arc<MockAuthorityClient>) -> Self {
        Self {
            client,
            connected: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// Create a connector that refuses every address.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Arc::new(MockAuthorityClient::new()))
        }
    }

    /// The shared client.
    pub fn client(&self) -> &Arc<MockAuthorityClient> {
        &self.client
    }

    /// Addresses connected to so far.
    pub fn connected(&self) -> Vec<String> {
        lock(&self.connected).clone()
    }
}

impl AuthorityConnector for MockConnector {
    fn connect(&self, api_base: &str) -> Result<Arc<dyn AuthorityClient>> {
        if self.fail {
            return Err(AuthorityError::InvalidAddress(api_base.to_string()));
        }
        lock(&self.connected).push(api_base.to_string());
        Ok(self.client.clone())
    }
}
