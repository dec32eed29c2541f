// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reconciliation between requested and confirmed progress.
//!
//! [`reconcile`] looks at one session and decides which single trigger, if
//! any, moves it towards what the authority asked for. Game state changes
//! always win over month progression, and months are never skipped.

use crate::state_machine::{Phase, PhaseMachine, Trigger};
use crate::types::GameState;

/// What the reconciler sees of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileInput {
    pub phase: Phase,
    /// Whether a phase hook is currently running.
    pub hook_in_flight: bool,
    /// Last game state the session applied, `None` before the first setup.
    pub current_game_state: Option<GameState>,
    pub target_game_state: GameState,
    pub current_month: i32,
    pub target_month: i32,
}

/// A step the session should take this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Reset to the setup month, record the target state as applied and fire `SetupGame`.
    StartSetup,
    /// Record the end as applied and fire `EndGame`.
    EndGame,
    /// Move to `month` (exactly one past the current month) and fire `MonthUpdated`.
    AdvanceMonth {
        /// The month entered.
        month: i32,
    },
}

impl Step {
    /// Trigger the step fires.
    pub fn trigger(&self) -> Trigger {
        match self {
            Step::StartSetup => Trigger::SetupGame,
            Step::EndGame => Trigger::EndGame,
            Step::AdvanceMonth { .. } => Trigger::MonthUpdated,
        }
    }
}

/// Decide the next step for a session.
pub fn reconcile(input: &ReconcileInput) -> Option<Step> {
    let can_setup = PhaseMachine::destination(input.phase, Trigger::SetupGame).is_some();

    if input.target_game_state == GameState::Setup {
        if input.current_game_state != Some(GameState::Setup) && can_setup {
            return Some(Step::StartSetup);
        }
        if !can_setup {
            // mid-phase; a reset now would cut the running phase short
            return None;
        }
    }

    // joined a game that is already past setup
    if input.phase == Phase::AwaitingSetup
        && input.current_game_state.is_none()
        && input.target_game_state.is_active()
    {
        return Some(Step::StartSetup);
    }

    // a failed setup may be abandoned when the game ends
    if input.phase == Phase::Setup
        && !input.hook_in_flight
        && input.target_game_state == GameState::End
        && input.current_game_state != Some(GameState::End)
    {
        return Some(Step::EndGame);
    }

    if !input.phase.is_quiescent() {
        return None;
    }

    if input.target_game_state == GameState::End {
        if input.current_game_state != Some(GameState::End) {
            return Some(Step::EndGame);
        }
        return None;
    }

    if input.target_month > input.current_month {
        return Some(Step::AdvanceMonth {
            month: input.current_month + 1,
        });
    }

    None
}
