// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Simwatch Core - Simulation Session Lifecycle
//!
//! This crate drives simulation sessions on behalf of a remote authority.
//! The authority announces game states and target months; every session
//! walks a small phase machine towards them, one month at a time, while
//! keeping its credentials fresh and checking that it still owns the game.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                Inbound requests (simwatch-server)                 │
//! │              SetProgress / UpdateState / Ping                     │
//! └──────────────────────────────────────────────────────────────────┘
//!                                 │
//!                                 ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        SessionRegistry                            │
//! │   acceptance policies · capability check · routing by token       │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────┐       │
//! │  │   Session A    │  │   Session B    │  │      ...       │       │
//! │  │ PhaseMachine   │  │ PhaseMachine   │  │                │       │
//! │  │ SessionMonitor │  │ SessionMonitor │  │                │       │
//! │  └────────────────┘  └────────────────┘  └────────────────┘       │
//! └──────────────────────────────────────────────────────────────────┘
//!        ▲ tick(elapsed)                 │ spawned calls
//!        │                               ▼
//! ┌──────────────┐            ┌───────────────────────────────┐
//! │   TickLoop   │            │ AuthorityClient / Hooks tasks │
//! └──────────────┘            └───────────────────────────────┘
//! ```
//!
//! # Phases
//!
//! See [`state_machine`] for the transition table. Entering `Setup`,
//! `Simulation` or `Report` runs a [`SimulationHooks`] method on a spawned
//! task; its completion fires the matching `Finished*` trigger on a later
//! tick.
//!
//! # Reconciliation
//!
//! | Order | Condition | Effect |
//! |-------|-----------|--------|
//! | 1 | target is `Setup`, not yet applied, `SetupGame` permitted | month reset to setup month, `SetupGame` |
//! | 2 | target is `Setup` but mid-phase | nothing |
//! | 3 | joined an active game before any setup | `SetupGame` |
//! | 4 | setup stalled or done, target is `End` | `EndGame` |
//! | 5 | not quiescent | nothing |
//! | 6 | target is `End`, not yet applied | `EndGame` |
//! | 7 | target month ahead | month + 1, `MonthUpdated` |
//!
//! # Modules
//!
//! - [`capability`]: Versioned simulation definitions and requirement checks
//! - [`client`]: Authority client trait and in-memory mock
//! - [`config`]: Timing configuration
//! - [`error`]: Error taxonomy
//! - [`hooks`]: Pluggable phase-entry payload
//! - [`monitor`]: Ownership and credential monitoring
//! - [`reconcile`]: Requested vs confirmed progress
//! - [`registry`]: Session admission, routing and ticking
//! - [`session`]: One session
//! - [`state_machine`]: Phase transition table
//! - [`ticker`]: The tick source
//! - [`types`]: Shared domain types

pub mod capability;
pub mod client;
pub mod config;
pub mod error;
pub mod hooks;
pub mod monitor;
pub mod reconcile;
pub mod registry;
pub mod session;
pub mod state_machine;
pub mod ticker;
pub mod types;

pub use capability::{
    CapabilityMismatch, CapabilitySet, CapabilityVersion, Requirements, SimulationDefinition,
    parse_requirements,
};
pub use client::{AuthorityClient, AuthorityConnector, AuthorityError};
pub use config::SessionConfig;
pub use error::{Error, EvictionReason, RejectionKind, RequestRejected, Result};
pub use hooks::{HookError, HookFailure, NoopHooks, PhaseContext, SimulationHooks};
pub use registry::{AcceptancePolicy, SessionRegistry, StateUpdate, TickReport};
pub use session::SessionSnapshot;
pub use state_machine::{Phase, PhaseMachine, Trigger};
pub use ticker::TickLoop;
pub use types::{ApiToken, Credentials, GameSessionInfo, GameState, Kpi, SETUP_MONTH, SessionToken};
