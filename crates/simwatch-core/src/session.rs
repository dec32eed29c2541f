// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! One simulation session.
//!
//! A [`SimulationSession`] pairs a [`PhaseMachine`] with the progress the
//! authority asked for and the progress the session has confirmed. Each call
//! to [`SimulationSession::tick`]:
//!
//! 1. collects finished monitor calls and applies renewed credentials
//! 2. advances the ownership and renewal countdowns, spawning due calls
//! 3. hands a snapshot to [`SimulationHooks::on_tick`]
//! 4. collects a finished phase hook and fires its completion trigger
//! 5. re-dispatches a stalled hook if the authority asked again
//! 6. counts down the end-of-life linger
//! 7. reconciles requested and confirmed progress
//!
//! At most one trigger fires per tick. Nothing here awaits; hooks and monitor
//! calls run on spawned tasks and report back through oneshot channels.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use crate::capability::{CapabilityMismatch, CapabilitySet, Requirements, SimulationDefinition};
use crate::client::AuthorityClient;
use crate::config::SessionConfig;
use crate::error::{Error, EvictionReason, Result};
use crate::hooks::{HookError, HookFailure, PhaseContext, SimulationHooks};
use crate::monitor::SessionMonitor;
use crate::reconcile::{ReconcileInput, Step, reconcile};
use crate::state_machine::{Phase, PhaseMachine, Trigger};
use crate::types::{Credentials, GameSessionInfo, GameState, Kpi, SETUP_MONTH, SessionToken};

/// Read-only view of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub token: SessionToken,
    pub phase: Phase,
    pub current_month: i32,
    pub target_month: i32,
    pub current_game_state: Option<GameState>,
    pub target_game_state: GameState,
    /// A phase hook is running.
    pub busy: bool,
    /// The last phase hook failed and waits for the authority to re-send its state.
    pub stalled: bool,
    pub simulations: Vec<SimulationDefinition>,
    /// Owner last confirmed by the authority.
    pub owner: Option<SessionToken>,
}

struct PhaseTask {
    phase: Phase,
    month: i32,
    rx: oneshot::Receiver<PhaseOutcome>,
}

struct PhaseOutcome {
    result: std::result::Result<(), HookError>,
    /// KPIs the authority did not accept; submitted again on retry.
    unsent: Option<Vec<Kpi>>,
}

impl PhaseOutcome {
    fn done() -> Self {
        Self {
            result: Ok(()),
            unsent: None,
        }
    }

    fn failed(error: HookError) -> Self {
        Self {
            result: Err(error),
            unsent: None,
        }
    }
}

impl From<std::result::Result<(), HookError>> for PhaseOutcome {
    fn from(result: std::result::Result<(), HookError>) -> Self {
        Self { result, unsent: None }
    }
}

/// State and behaviour of one session.
pub struct SimulationSession {
    token: SessionToken,
    info: GameSessionInfo,
    client: Arc<dyn AuthorityClient>,
    hooks: Arc<dyn SimulationHooks>,
    capabilities: CapabilitySet,
    config: SessionConfig,
    machine: PhaseMachine,
    current_month: i32,
    target_month: i32,
    current_game_state: Option<GameState>,
    target_game_state: GameState,
    credentials: Credentials,
    monitor: SessionMonitor,
    phase_task: Option<PhaseTask>,
    stalled: Option<HookError>,
    retry_requested: bool,
    unsent_kpis: Option<(i32, Vec<Kpi>)>,
    linger: Option<Duration>,
}

/// Everything needed to start a session.
pub struct SessionParams {
    pub token: SessionToken,
    pub info: GameSessionInfo,
    pub client: Arc<dyn AuthorityClient>,
    pub hooks: Arc<dyn SimulationHooks>,
    pub capabilities: CapabilitySet,
    pub credentials: Credentials,
    pub game_state: GameState,
    pub month: i32,
}

impl SimulationSession {
    /// Create a session in [`Phase::AwaitingSetup`].
    ///
    /// Nothing fires until the first tick.
    pub fn new(params: SessionParams, config: SessionConfig, now: DateTime<Utc>) -> Self {
        let monitor = SessionMonitor::new(&config, &params.credentials, now);
        Self {
            token: params.token,
            info: params.info,
            client: params.client,
            hooks: params.hooks,
            capabilities: params.capabilities,
            config,
            machine: PhaseMachine::new(),
            current_month: SETUP_MONTH,
            target_month: params.month,
            current_game_state: None,
            target_game_state: params.game_state,
            credentials: params.credentials,
            monitor,
            phase_task: None,
            stalled: None,
            retry_requested: false,
            unsent_kpis: None,
            linger: None,
        }
    }

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    pub fn phase(&self) -> Phase {
        self.machine.phase()
    }

    pub fn current_month(&self) -> i32 {
        self.current_month
    }

    pub fn target_month(&self) -> i32 {
        self.target_month
    }

    pub fn info(&self) -> &GameSessionInfo {
        &self.info
    }

    /// Current credential pair.
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Capabilities this session registers with the authority.
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// Check requirements against this session's capabilities.
    pub fn check_capabilities(&self, required: &Requirements) -> std::result::Result<(), CapabilityMismatch> {
        self.capabilities.check(required)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            token: self.token.clone(),
            phase: self.machine.phase(),
            current_month: self.current_month,
            target_month: self.target_month,
            current_game_state: self.current_game_state,
            target_game_state: self.target_game_state,
            busy: self.phase_task.is_some(),
            stalled: self.stalled.is_some(),
            simulations: self.capabilities.definitions(),
            owner: self.monitor.last_owner().cloned(),
        }
    }

    /// Store a new target month; applied at the next quiescent point.
    pub fn set_target_month(&mut self, month: i32) {
        debug!(session = %self.token, month, "Target month changed");
        self.target_month = month;
    }

    /// Store new targets and credentials sent by the authority.
    ///
    /// A stalled phase hook is re-dispatched on the next tick.
    pub fn apply_state(
        &mut self,
        game_state: GameState,
        month: i32,
        credentials: Credentials,
        now: DateTime<Utc>,
    ) {
        info!(
            session = %self.token,
            %game_state,
            month,
            "Session state changed"
        );
        self.target_game_state = game_state;
        self.target_month = month;
        if credentials != self.credentials {
            self.credentials = credentials;
            self.monitor
                .credentials_replaced(&self.config, &self.credentials, now);
        }
        if self.stalled.is_some() {
            self.retry_requested = true;
        }
    }

    /// Run one tick.
    ///
    /// Returns the trigger fired this tick, if any. Eviction is reported as
    /// [`Error::SessionReset`]; an error that must stop the process as
    /// [`Error::Fatal`].
    pub fn tick(&mut self, elapsed: Duration, now: DateTime<Utc>) -> Result<Option<Trigger>> {
        match self.monitor.poll(&self.token, &self.config) {
            Ok(Some(credentials)) => {
                self.credentials = credentials;
                self.monitor
                    .credentials_replaced(&self.config, &self.credentials, now);
            }
            Ok(None) => {}
            Err(reason) => return Err(self.evicted(reason)),
        }

        if self.credentials.refresh.is_expired(now) {
            return Err(self.evicted(EvictionReason::CredentialsExpired));
        }

        self.monitor
            .advance(elapsed, now, &self.config, &self.client, &self.credentials);

        self.hooks.on_tick(elapsed, &self.snapshot());

        if let Some(trigger) = self.poll_phase_task()? {
            return Ok(Some(trigger));
        }

        if self.retry_due() {
            let phase = self.machine.phase();
            info!(session = %self.token, %phase, "Retrying phase hook");
            self.stalled = None;
            self.retry_requested = false;
            self.dispatch(phase);
        }

        if let Some(left) = self.linger {
            let left = left.saturating_sub(elapsed);
            if left.is_zero() && self.target_game_state != GameState::Setup {
                return Err(self.evicted(EvictionReason::Ended));
            }
            self.linger = Some(left);
        }

        let input = ReconcileInput {
            phase: self.machine.phase(),
            hook_in_flight: self.phase_task.is_some(),
            current_game_state: self.current_game_state,
            target_game_state: self.target_game_state,
            current_month: self.current_month,
            target_month: self.target_month,
        };
        let Some(step) = reconcile(&input) else {
            return Ok(None);
        };

        match step {
            Step::StartSetup => {
                self.current_month = SETUP_MONTH;
                self.current_game_state = Some(self.target_game_state);
            }
            Step::EndGame => {
                self.current_game_state = Some(GameState::End);
            }
            Step::AdvanceMonth { month } => {
                info!(session = %self.token, month, target = self.target_month, "Month updated");
                self.current_month = month;
            }
        }
        let trigger = step.trigger();
        self.fire(trigger);
        Ok(Some(trigger))
    }

    fn fire(&mut self, trigger: Trigger) {
        let Some(entered) = self.machine.fire(trigger).entered() else {
            return;
        };
        info!(session = %self.token, phase = %entered, %trigger, "Entered phase");
        match trigger {
            Trigger::SetupGame => self.linger = None,
            Trigger::EndGame => {
                self.stalled = None;
                self.retry_requested = false;
                self.unsent_kpis = None;
                self.linger = Some(self.config.ended_linger);
            }
            _ => {}
        }
        if entered.has_entry_hook() {
            self.dispatch(entered);
        }
    }

    fn retry_due(&self) -> bool {
        if self.stalled.is_none() || !self.retry_requested || self.phase_task.is_some() {
            return false;
        }
        // an ended game abandons the failed setup instead
        !(self.machine.phase() == Phase::Setup && self.target_game_state == GameState::End)
    }

    fn dispatch(&mut self, phase: Phase) {
        let ctx = PhaseContext {
            token: self.token.clone(),
            info: self.info.clone(),
            month: self.current_month,
            credentials: self.credentials.clone(),
            client: self.client.clone(),
        };
        let hooks = self.hooks.clone();
        let definitions = self.capabilities.definitions();
        let unsent = match self.unsent_kpis.take() {
            Some((month, kpis)) if phase == Phase::Report && month == self.current_month => Some(kpis),
            _ => None,
        };
        let (tx, rx) = oneshot::channel();
        debug!(
            session = %self.token,
            %phase,
            month = self.current_month,
            resubmit = unsent.is_some(),
            "Dispatching phase hook"
        );
        tokio::spawn(async move {
            let outcome = run_phase(phase, hooks.as_ref(), &ctx, &definitions, unsent).await;
            let _ = tx.send(outcome);
        });
        self.phase_task = Some(PhaseTask {
            phase,
            month: self.current_month,
            rx,
        });
    }

    fn poll_phase_task(&mut self) -> Result<Option<Trigger>> {
        let Some(task) = self.phase_task.as_mut() else {
            return Ok(None);
        };
        let outcome = match task.rx.try_recv() {
            Ok(outcome) => outcome,
            Err(TryRecvError::Empty) => return Ok(None),
            Err(TryRecvError::Closed) => {
                PhaseOutcome::failed(HookError::reset("phase hook ended without reporting"))
            }
        };
        let (phase, month) = (task.phase, task.month);
        self.phase_task = None;
        if let Some(kpis) = outcome.unsent {
            self.unsent_kpis = Some((month, kpis));
        }

        match outcome.result {
            Ok(()) => {
                let Some(trigger) = phase.completion_trigger() else {
                    return Ok(None);
                };
                if self.machine.phase() != phase {
                    debug!(session = %self.token, %phase, "Dropping completion of a phase already left");
                    return Ok(None);
                }
                self.fire(trigger);
                Ok(Some(trigger))
            }
            Err(e) => match e.kind {
                HookFailure::Retryable => {
                    warn!(
                        session = %self.token,
                        %phase,
                        error = %e,
                        "Phase hook failed, waiting for the authority to re-send state"
                    );
                    self.stalled = Some(e);
                    self.retry_requested = false;
                    Ok(None)
                }
                HookFailure::SessionReset => Err(self.evicted(EvictionReason::PhaseFailed(e.message))),
                HookFailure::Fatal => Err(Error::Fatal(format!(
                    "session '{}' {} hook failed: {}",
                    self.token, phase, e.message
                ))),
            },
        }
    }

    fn evicted(&self, reason: EvictionReason) -> Error {
        Error::SessionReset {
            token: self.token.clone(),
            reason,
        }
    }
}

async fn run_phase(
    phase: Phase,
    hooks: &dyn SimulationHooks,
    ctx: &PhaseContext,
    definitions: &[SimulationDefinition],
    unsent: Option<Vec<Kpi>>,
) -> PhaseOutcome {
    match phase {
        Phase::Setup => {
            let registered = ctx
                .client
                .register_capabilities(&ctx.credentials.access, definitions)
                .await;
            match registered {
                Ok(()) => hooks.setup(ctx).await.into(),
                Err(e) => PhaseOutcome::failed(e.into()),
            }
        }
        Phase::Simulation => hooks.simulate(ctx).await.into(),
        Phase::Report => {
            let kpis = match unsent {
                Some(kpis) => kpis,
                None => match hooks.report(ctx).await {
                    Ok(kpis) => kpis,
                    Err(e) => return PhaseOutcome::failed(e),
                },
            };
            match ctx.client.submit_kpis(&ctx.credentials.access, &kpis).await {
                Ok(()) => PhaseOutcome::done(),
                Err(e) => PhaseOutcome {
                    result: Err(e.into()),
                    unsent: Some(kpis),
                },
            }
        }
        Phase::AwaitingSetup | Phase::AwaitingNextMonth => PhaseOutcome::done(),
    }
}

impl std::fmt::Debug for SimulationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationSession")
            .field("token", &self.token)
            .field("phase", &self.machine.phase())
            .field("current_month", &self.current_month)
            .field("target_month", &self.target_month)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockAuthorityClient;
    use crate::hooks::NoopHooks;
    use crate::types::ApiToken;

    fn session(game_state: GameState, month: i32) -> (SimulationSession, Arc<MockAuthorityClient>) {
        let now = Utc::now();
        let mock = Arc::new(MockAuthorityClient::with_owner("tok"));
        let params = SessionParams {
            token: SessionToken::new("tok"),
            info: GameSessionInfo::default(),
            client: mock.clone(),
            hooks: Arc::new(NoopHooks),
            capabilities: CapabilitySet::new(),
            credentials: Credentials::new(
                ApiToken::new("a", now + chrono::Duration::hours(1)),
                ApiToken::new("r", now + chrono::Duration::hours(24)),
            ),
            game_state,
            month,
        };
        (SimulationSession::new(params, SessionConfig::default(), now), mock)
    }

    #[tokio::test]
    async fn test_first_tick_starts_setup() {
        let (mut session, _) = session(GameState::Setup, SETUP_MONTH);
        let fired = session.tick(Duration::from_secs(1), Utc::now()).unwrap();
        assert_eq!(fired, Some(Trigger::SetupGame));
        assert_eq!(session.phase(), Phase::Setup);
        assert!(session.snapshot().busy);
    }

    #[tokio::test]
    async fn test_refresh_expiry_evicts() {
        let (mut session, _) = session(GameState::Setup, SETUP_MONTH);
        let later = Utc::now() + chrono::Duration::hours(25);
        let err = session.tick(Duration::from_secs(1), later).unwrap_err();
        assert!(matches!(
            err,
            Error::SessionReset {
                reason: EvictionReason::CredentialsExpired,
                ..
            }
        ));
    }

    #[test]
    fn test_apply_state_replaces_targets() {
        let (mut session, _) = session(GameState::Setup, SETUP_MONTH);
        let credentials = session.credentials().clone();
        session.apply_state(GameState::Play, 4, credentials, Utc::now());
        let snapshot = session.snapshot();
        assert_eq!(snapshot.target_game_state, GameState::Play);
        assert_eq!(snapshot.target_month, 4);
        assert_eq!(snapshot.current_month, SETUP_MONTH);
        assert!(!snapshot.stalled);
    }
}
