// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared helpers for simwatch-core integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use simwatch_core::client::{MockAuthorityClient, MockConnector};
use simwatch_core::{
    ApiToken, CapabilitySet, Credentials, EvictionReason, GameSessionInfo, GameState, HookError,
    Kpi, Phase, PhaseContext, Requirements, SessionConfig, SessionRegistry, SessionSnapshot, SessionToken,
    SimulationDefinition, SimulationHooks, StateUpdate, TickReport,
};
use tokio::sync::Notify;

pub const TOKEN: &str = "game-session-1";

/// Hooks recording every phase they run.
#[derive(Default)]
pub struct RecordingHooks {
    runs: Mutex<Vec<(Phase, i32)>>,
    access_tokens: Mutex<Vec<String>>,
    failures: Mutex<HashMap<Phase, VecDeque<HookError>>>,
    selected: Mutex<Option<Vec<String>>>,
    hold_simulation: AtomicBool,
    release: Notify,
    ticks: Mutex<Vec<(Duration, Phase, i32)>>,
    closed: Mutex<Vec<(SessionToken, EvictionReason)>>,
}

impl RecordingHooks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next run of `phase` with `error`.
    pub fn fail_next(&self, phase: Phase, error: HookError) {
        self.failures
            .lock()
            .unwrap()
            .entry(phase)
            .or_default()
            .push_back(error);
    }

    /// Register only the named simulations.
    pub fn select(&self, names: &[&str]) {
        *self.selected.lock().unwrap() = Some(names.iter().map(|n| n.to_string()).collect());
    }

    /// Keep simulation hooks running until [`release`](Self::release).
    pub fn hold_simulation(&self) {
        self.hold_simulation.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.hold_simulation.store(false, Ordering::SeqCst);
        self.release.notify_one();
    }

    pub fn runs(&self) -> Vec<(Phase, i32)> {
        self.runs.lock().unwrap().clone()
    }

    pub fn months_run(&self, phase: Phase) -> Vec<i32> {
        self.runs()
            .into_iter()
            .filter(|(p, _)| *p == phase)
            .map(|(_, month)| month)
            .collect()
    }

    pub fn access_tokens(&self) -> Vec<String> {
        self.access_tokens.lock().unwrap().clone()
    }

    /// Elapsed time, phase and current month seen by each tick callback.
    pub fn ticks(&self) -> Vec<(Duration, Phase, i32)> {
        self.ticks.lock().unwrap().clone()
    }

    pub fn closed(&self) -> Vec<(SessionToken, EvictionReason)> {
        self.closed.lock().unwrap().clone()
    }

    fn record(&self, phase: Phase, ctx: &PhaseContext) -> Result<(), HookError> {
        self.runs.lock().unwrap().push((phase, ctx.month));
        self.access_tokens
            .lock()
            .unwrap()
            .push(ctx.credentials.access.token.clone());
        match self
            .failures
            .lock()
            .unwrap()
            .get_mut(&phase)
            .and_then(|queue| queue.pop_front())
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SimulationHooks for RecordingHooks {
    fn definitions(&self, _info: &GameSessionInfo, offered: &CapabilitySet) -> CapabilitySet {
        match self.selected.lock().unwrap().as_ref() {
            Some(names) => offered
                .definitions()
                .into_iter()
                .filter(|d| names.contains(&d.name))
                .collect(),
            None => offered.clone(),
        }
    }

    async fn setup(&self, ctx: &PhaseContext) -> Result<(), HookError> {
        self.record(Phase::Setup, ctx)
    }

    async fn simulate(&self, ctx: &PhaseContext) -> Result<(), HookError> {
        if self.hold_simulation.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        self.record(Phase::Simulation, ctx)
    }

    async fn report(&self, ctx: &PhaseContext) -> Result<Vec<Kpi>, HookError> {
        self.record(Phase::Report, ctx)?;
        Ok(vec![
            Kpi::external("Sand extracted", 1.5, "Mm3", ctx.month),
            Kpi::external("Extraction areas", 3.0, "areas", ctx.month),
        ])
    }

    fn on_tick(&self, elapsed: Duration, snapshot: &SessionSnapshot) {
        self.ticks
            .lock()
            .unwrap()
            .push((elapsed, snapshot.phase, snapshot.current_month));
    }

    fn session_closed(&self, token: &SessionToken, reason: &EvictionReason) {
        self.closed
            .lock()
            .unwrap()
            .push((token.clone(), reason.clone()));
    }
}

/// A registry wired to mocks.
pub struct Harness {
    pub registry: SessionRegistry,
    pub authority: Arc<MockAuthorityClient>,
    pub hooks: Arc<RecordingHooks>,
}

pub fn offered() -> CapabilitySet {
    CapabilitySet::new()
        .with(SimulationDefinition::parse("Foo", "1.5.0").unwrap())
        .with(SimulationDefinition::parse("SandExtraction", "1.0.0").unwrap())
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        let authority = Arc::new(MockAuthorityClient::with_owner(TOKEN));
        let hooks = RecordingHooks::new();
        let registry = SessionRegistry::new(
            offered(),
            Arc::new(MockConnector::new(authority.clone())),
            hooks.clone(),
            config,
        );
        Self {
            registry,
            authority,
            hooks,
        }
    }

    /// Admit the default session in `game_state` at `month`.
    pub fn admit(&self, game_state: GameState, month: i32) {
        self.registry
            .update_state(update(game_state, month, Some(GameSessionInfo::default())))
            .unwrap();
    }

    /// Send a state update for the known default session.
    pub fn send_state(&self, game_state: GameState, month: i32) {
        self.registry
            .update_state(update(game_state, month, None))
            .unwrap();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.registry
            .snapshot(&SessionToken::new(TOKEN))
            .expect("session is registered")
    }

    /// Let spawned calls finish, then tick once with one second elapsed.
    pub async fn tick(&self) -> TickReport {
        settle().await;
        self.registry.tick(Duration::from_secs(1)).unwrap()
    }

    /// Tick until `done` holds, at most `limit` times.
    pub async fn tick_until(&self, limit: usize, done: impl Fn(&SessionSnapshot) -> bool) {
        for _ in 0..limit {
            if done(&self.snapshot()) {
                return;
            }
            self.tick().await;
        }
        assert!(done(&self.snapshot()), "condition not reached: {:?}", self.snapshot());
    }

    /// Drive the default session from admission to the quiescent phase after setup.
    pub async fn through_setup(&self) {
        self.admit(GameState::Setup, -1);
        self.tick_until(10, |s| s.phase == Phase::AwaitingNextMonth && !s.busy)
            .await;
    }
}

pub fn credentials() -> Credentials {
    let now = Utc::now();
    Credentials::new(
        ApiToken::new("access-0", now + chrono::Duration::hours(1)),
        ApiToken::new("refresh-0", now + chrono::Duration::hours(24)),
    )
}

pub fn update(game_state: GameState, month: i32, info: Option<GameSessionInfo>) -> StateUpdate {
    StateUpdate {
        token: SessionToken::new(TOKEN),
        game_state,
        month,
        api_base: "http://authority.test/".to_string(),
        credentials: credentials(),
        required: Requirements::new(),
        session_info: info,
    }
}

/// Give spawned tasks a chance to run to completion.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
