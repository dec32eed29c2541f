// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Simwatch Server - HTTP watchdog for simulation sessions
//!
//! Wires [`simwatch_core`] to the outside world: an axum API the authority
//! pushes game states to, a reqwest client for calls back to the authority,
//! and the sand extraction payload.
//!
//! # Modules
//!
//! - [`api`]: Inbound routes and request types
//! - [`authority`]: HTTP implementation of the authority client
//! - [`config`]: Environment configuration
//! - [`error`]: HTTP error responses
//! - [`payload`]: Sand extraction hooks and acceptance policy
//! - [`runtime`]: Embeddable runtime
//! - [`wire`]: Lenient wire formats

pub mod api;
pub mod authority;
pub mod config;
pub mod error;
pub mod payload;
pub mod runtime;
pub mod wire;

pub use api::{AppState, router};
pub use authority::{HttpAuthorityClient, HttpConnector};
pub use config::{Config, ConfigError};
pub use error::{ApiError, ApiResponse};
pub use runtime::WatchdogRuntime;
