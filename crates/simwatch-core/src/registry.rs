// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Registry of active sessions.
//!
//! The registry admits new sessions, routes inbound requests to them by
//! token and ticks all of them. Sessions that report eviction during a tick
//! are removed and reported to the hooks; a fatal error stops the tick and is
//! handed to the caller.
//!
//! Each session sits behind its own mutex in a sharded map, so request
//! handlers and the tick loop only contend on the session they touch.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info, warn};

use crate::capability::{CapabilitySet, Requirements};
use crate::client::AuthorityConnector;
use crate::config::SessionConfig;
use crate::error::{Error, EvictionReason, RequestRejected, Result};
use crate::hooks::SimulationHooks;
use crate::session::{SessionParams, SessionSnapshot, SimulationSession};
use crate::types::{Credentials, GameSessionInfo, GameState, SessionToken};

/// Predicate deciding whether a new game is taken on.
pub type AcceptancePolicy = Box<dyn Fn(&GameSessionInfo) -> bool + Send + Sync>;

/// A full state update sent by the authority.
#[derive(Debug, Clone)]
pub struct StateUpdate {
    pub token: SessionToken,
    pub game_state: GameState,
    pub month: i32,
    /// Base address of the authority API for this session.
    pub api_base: String,
    pub credentials: Credentials,
    /// Simulations the game needs, with their minimum versions.
    pub required: Requirements,
    /// Present on first contact; required to admit a new session.
    pub session_info: Option<GameSessionInfo>,
}

/// What happened during one registry tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Sessions ticked.
    pub ticked: usize,
    /// Sessions that fired a trigger.
    pub fired: usize,
    /// Sessions removed, with the reason.
    pub evicted: Vec<(SessionToken, EvictionReason)>,
}

type SharedSession = Arc<Mutex<SimulationSession>>;

/// All sessions served by this process.
pub struct SessionRegistry {
    sessions: DashMap<SessionToken, SharedSession>,
    offered: CapabilitySet,
    connector: Arc<dyn AuthorityConnector>,
    hooks: Arc<dyn SimulationHooks>,
    policies: Vec<AcceptancePolicy>,
    config: SessionConfig,
}

impl SessionRegistry {
    /// Create an empty registry offering `offered`.
    pub fn new(
        offered: CapabilitySet,
        connector: Arc<dyn AuthorityConnector>,
        hooks: Arc<dyn SimulationHooks>,
        config: SessionConfig,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            offered,
            connector,
            hooks,
            policies: Vec::new(),
            config,
        }
    }

    /// Add an acceptance policy.
    ///
    /// A new game is admitted only if every policy accepts it.
    pub fn with_acceptance_policy<F>(mut self, policy: F) -> Self
    where
        F: Fn(&GameSessionInfo) -> bool + Send + Sync + 'static,
    {
        self.policies.push(Box::new(policy));
        self
    }

    /// Capabilities offered by this process.
    pub fn offered(&self) -> &CapabilitySet {
        &self.offered
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, token: &SessionToken) -> bool {
        self.sessions.contains_key(token)
    }

    /// Whether every acceptance policy takes on `info`.
    pub fn accepts(&self, info: &GameSessionInfo) -> bool {
        self.policies.iter().all(|policy| policy(info))
    }

    /// Store a new target month for a known session.
    pub fn set_progress(&self, token: &SessionToken, month: i32) -> std::result::Result<(), RequestRejected> {
        let session = self.get(token)?;
        let mut session = lock(&session).ok_or_else(|| RequestRejected::UnknownSession(token.clone()))?;
        session.set_target_month(month);
        Ok(())
    }

    /// Apply a state update, admitting the session if it is new.
    pub fn update_state(&self, update: StateUpdate) -> std::result::Result<(), RequestRejected> {
        if let Ok(session) = self.get(&update.token) {
            return self.update_known(&session, update);
        }

        let token = update.token.clone();
        let Some(info) = update.session_info.clone() else {
            return Err(RequestRejected::UnknownSession(token));
        };
        self.offered.check(&update.required)?;
        if update.game_state == GameState::End {
            return Err(RequestRejected::AlreadyEnded(token));
        }
        if !self.accepts(&info) {
            info!(session = %token, game = %info.name, "Game session declined by acceptance policy");
            return Err(RequestRejected::NotAccepted(token));
        }

        let capabilities = self.hooks.definitions(&info, &self.offered);
        capabilities.check(&update.required)?;
        let client = self.connector.connect(&update.api_base).map_err(|e| {
            RequestRejected::Invalid(format!(
                "Invalid game session api '{}': {}",
                update.api_base, e
            ))
        })?;

        match self.sessions.entry(token.clone()) {
            Entry::Occupied(entry) => {
                // admitted concurrently by another request
                let session = entry.get().clone();
                drop(entry);
                self.update_known(&session, update)
            }
            Entry::Vacant(entry) => {
                info!(
                    session = %token,
                    game = %info.name,
                    region = %info.region,
                    game_state = %update.game_state,
                    month = update.month,
                    simulations = capabilities.len(),
                    "Session admitted"
                );
                let params = SessionParams {
                    token,
                    info,
                    client,
                    hooks: self.hooks.clone(),
                    capabilities,
                    credentials: update.credentials,
                    game_state: update.game_state,
                    month: update.month,
                };
                let session = SimulationSession::new(params, self.config.clone(), Utc::now());
                entry.insert(Arc::new(Mutex::new(session)));
                Ok(())
            }
        }
    }

    /// Tick every session once.
    pub fn tick(&self, elapsed: Duration) -> Result<TickReport> {
        self.tick_at(elapsed, Utc::now())
    }

    /// Tick every session once, using `now` as the wall-clock time.
    pub fn tick_at(&self, elapsed: Duration, now: DateTime<Utc>) -> Result<TickReport> {
        let sessions: Vec<(SessionToken, SharedSession)> = self
            .sessions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut report = TickReport::default();
        for (token, session) in sessions {
            let outcome = match lock(&session) {
                Some(mut session) => session.tick(elapsed, now),
                None => Err(Error::SessionReset {
                    token: token.clone(),
                    reason: EvictionReason::Poisoned,
                }),
            };
            report.ticked += 1;

            match outcome {
                Ok(Some(_)) => report.fired += 1,
                Ok(None) => {}
                Err(Error::SessionReset { token, reason }) => {
                    info!(session = %token, %reason, "Session evicted");
                    self.sessions.remove(&token);
                    self.hooks.session_closed(&token, &reason);
                    report.evicted.push((token, reason));
                }
                Err(e) => return Err(e),
            }
        }

        if !report.evicted.is_empty() {
            debug!(remaining = self.sessions.len(), "Sessions remaining after eviction");
        }
        Ok(report)
    }

    /// Snapshot of one session.
    pub fn snapshot(&self, token: &SessionToken) -> Option<SessionSnapshot> {
        let session = self.get(token).ok()?;
        let guard = lock(&session)?;
        Some(guard.snapshot())
    }

    /// Snapshots of all sessions, ordered by token.
    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        let sessions: Vec<SharedSession> = self.sessions.iter().map(|e| e.value().clone()).collect();
        let mut snapshots: Vec<SessionSnapshot> = sessions
            .iter()
            .filter_map(|session| lock(session).map(|s| s.snapshot()))
            .collect();
        snapshots.sort_by(|a, b| a.token.as_str().cmp(b.token.as_str()));
        snapshots
    }

    fn get(&self, token: &SessionToken) -> std::result::Result<SharedSession, RequestRejected> {
        self.sessions
            .get(token)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RequestRejected::UnknownSession(token.clone()))
    }

    fn update_known(
        &self,
        session: &SharedSession,
        update: StateUpdate,
    ) -> std::result::Result<(), RequestRejected> {
        let mut session =
            lock(session).ok_or_else(|| RequestRejected::UnknownSession(update.token.clone()))?;
        session.check_capabilities(&update.required)?;
        session.apply_state(update.game_state, update.month, update.credentials, Utc::now());
        Ok(())
    }
}

/// Lock a session; `None` if a panic poisoned it.
fn lock(session: &SharedSession) -> Option<MutexGuard<'_, SimulationSession>> {
    match session.lock() {
        Ok(guard) => Some(guard),
        Err(_) => {
            warn!("Session lock poisoned");
            None
        }
    }
}
