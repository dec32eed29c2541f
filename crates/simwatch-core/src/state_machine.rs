// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-session phase state machine.
//!
//! # Transitions
//!
//! ```text
//!          ┌───────────────┐
//!   ┌─────►│ AwaitingSetup │◄────────────────────────┐
//!   │      └───────┬───────┘                         │
//!   │              │ SetupGame                       │
//!   │ EndGame      ▼                                 │
//!   │      ┌───────────────┐                         │
//!   └──────│     Setup     │◄──────────┐             │ EndGame
//!          └───────┬───────┘           │ SetupGame   │
//!                  │ FinishedSetup     │             │
//!                  ▼                   │             │
//!          ┌───────────────────┐───────┘             │
//!   ┌─────►│ AwaitingNextMonth │─────────────────────┘
//!   │      └─────────┬─────────┘
//!   │                │ MonthUpdated
//!   │                ▼
//!   │      ┌───────────────┐  FinishedSimulation  ┌────────┐
//!   │      │  Simulation   │─────────────────────►│ Report │
//!   │      └───────────────┘                      └───┬────┘
//!   └─────────────────────────────────────────────────┘
//!                        FinishedReport
//! ```
//!
//! The machine itself is pure: [`PhaseMachine::fire`] reports what happened
//! and the owning session runs the phase-entry work.

use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

/// Session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    /// Waiting for the authority to start a game.
    AwaitingSetup,
    /// Registering capabilities and preparing the payload.
    Setup,
    /// Quiescent: waiting for the next month or a game state change.
    AwaitingNextMonth,
    /// Running the payload for the current month.
    Simulation,
    /// Reporting the month's results.
    Report,
}

impl Phase {
    /// All phases in lifecycle order.
    pub const ALL: [Phase; 5] = [
        Phase::AwaitingSetup,
        Phase::Setup,
        Phase::AwaitingNextMonth,
        Phase::Simulation,
        Phase::Report,
    ];

    /// The single phase in which target changes are applied.
    pub fn is_quiescent(&self) -> bool {
        matches!(self, Phase::AwaitingNextMonth)
    }

    /// Whether entering this phase runs an asynchronous hook.
    pub fn has_entry_hook(&self) -> bool {
        matches!(self, Phase::Setup | Phase::Simulation | Phase::Report)
    }

    /// Trigger fired when this phase's hook completes successfully.
    pub fn completion_trigger(&self) -> Option<Trigger> {
        match self {
            Phase::Setup => Some(Trigger::FinishedSetup),
            Phase::Simulation => Some(Trigger::FinishedSimulation),
            Phase::Report => Some(Trigger::FinishedReport),
            Phase::AwaitingSetup | Phase::AwaitingNextMonth => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Events that move the machine between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Trigger {
    /// The authority started (or restarted) a game.
    SetupGame,
    /// The setup hook completed.
    FinishedSetup,
    /// A new month is due.
    MonthUpdated,
    /// The simulation hook completed.
    FinishedSimulation,
    /// The report hook completed.
    FinishedReport,
    /// The authority ended the game.
    EndGame,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

const TRANSITIONS: &[(Phase, Trigger, Phase)] = &[
    (Phase::AwaitingSetup, Trigger::SetupGame, Phase::Setup),
    (Phase::Setup, Trigger::FinishedSetup, Phase::AwaitingNextMonth),
    (Phase::Setup, Trigger::EndGame, Phase::AwaitingSetup),
    // a new game may arrive without the previous one ever ending
    (Phase::AwaitingNextMonth, Trigger::SetupGame, Phase::Setup),
    (Phase::AwaitingNextMonth, Trigger::MonthUpdated, Phase::Simulation),
    (Phase::AwaitingNextMonth, Trigger::EndGame, Phase::AwaitingSetup),
    (Phase::Simulation, Trigger::FinishedSimulation, Phase::Report),
    (Phase::Report, Trigger::FinishedReport, Phase::AwaitingNextMonth),
];

/// Result of firing a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fired {
    /// The trigger was permitted and the machine moved.
    Transitioned {
        /// Phase before the transition.
        from: Phase,
        /// Phase after the transition.
        to: Phase,
        /// Trigger that caused it.
        trigger: Trigger,
    },
    /// The trigger is not permitted in the current phase and was dropped.
    Ignored {
        /// Phase the machine stayed in.
        phase: Phase,
        /// Trigger that was dropped.
        trigger: Trigger,
    },
}

impl Fired {
    /// Phase entered, if the machine moved.
    pub fn entered(&self) -> Option<Phase> {
        match self {
            Fired::Transitioned { to, .. } => Some(*to),
            Fired::Ignored { .. } => None,
        }
    }
}

/// Five-state machine driving one session.
#[derive(Debug, Clone)]
pub struct PhaseMachine {
    phase: Phase,
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseMachine {
    /// Create a machine in [`Phase::AwaitingSetup`].
    pub fn new() -> Self {
        Self {
            phase: Phase::AwaitingSetup,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Destination of `trigger` from `phase`, if permitted.
    pub fn destination(phase: Phase, trigger: Trigger) -> Option<Phase> {
        TRANSITIONS
            .iter()
            .find(|(from, t, _)| *from == phase && *t == trigger)
            .map(|(_, _, to)| *to)
    }

    /// Whether `trigger` is permitted right now.
    pub fn can_fire(&self, trigger: Trigger) -> bool {
        Self::destination(self.phase, trigger).is_some()
    }

    /// Fire a trigger.
    ///
    /// Triggers not permitted in the current phase are logged and ignored;
    /// they are authority messages that arrived late or twice.
    pub fn fire(&mut self, trigger: Trigger) -> Fired {
        match Self::destination(self.phase, trigger) {
            Some(to) => {
                let from = self.phase;
                self.phase = to;
                debug!(%from, %to, %trigger, "Phase transition");
                Fired::Transitioned { from, to, trigger }
            }
            None => {
                warn!(
                    phase = %self.phase,
                    %trigger,
                    "Trigger is not permitted in current phase, ignoring"
                );
                Fired::Ignored {
                    phase: self.phase,
                    trigger,
                }
            }
        }
    }

    /// Render the transition table as a Graphviz DOT digraph.
    pub fn to_dot() -> String {
        let mut dot = String::from("digraph {\n  compound=true;\n  node [shape=Mrecord]\n  rankdir=\"LR\"\n");
        for phase in Phase::ALL {
            dot.push_str(&format!("  \"{}\" [label=\"{}\"];\n", phase, phase));
        }
        for (from, trigger, to) in TRANSITIONS {
            dot.push_str(&format!(
                "  \"{}\" -> \"{}\" [style=\"solid\", label=\"{}\"];\n",
                from, to, trigger
            ));
        }
        dot.push_str(&format!(
            "  init [label=\"\", shape=point];\n  init -> \"{}\"[style = \"solid\"]\n}}\n",
            Phase::AwaitingSetup
        ));
        dot
    }
}
