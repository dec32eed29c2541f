// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Inbound watchdog API.
//!
//! | Route | Body | Effect |
//! |-------|------|--------|
//! | `POST /Watchdog/Ping` | any | liveness check |
//! | `POST /Watchdog/SetMonth` | [`SetMonthRequest`] | store a session's target month |
//! | `POST /Watchdog/UpdateState` | [`UpdateStateRequest`] | admit or update a session |
//!
//! Every response carries `{ "success": bool, "message": string }`.
//! Malformed input is answered with 400, requests the watchdog refuses with
//! 405.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use simwatch_core::{
    GameSessionInfo, GameState, RequestRejected, SessionRegistry, SessionToken, StateUpdate,
    parse_requirements,
};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::{ApiError, ApiResponse};
use crate::wire::parse_token;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
}

/// Body of `SetMonth`.
#[derive(Debug, Clone, Deserialize)]
pub struct SetMonthRequest {
    pub game_session_token: String,
    pub month: i32,
}

/// Body of `UpdateState`.
///
/// Tokens and required simulations arrive as JSON documents embedded in
/// string fields.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStateRequest {
    pub game_session_api: String,
    pub game_session_token: String,
    pub game_state: String,
    #[serde(default)]
    pub required_simulations: String,
    pub api_access_token: String,
    pub api_access_renew_token: String,
    pub month: i32,
    #[serde(default)]
    pub game_session_info: Option<GameSessionInfo>,
}

impl TryFrom<UpdateStateRequest> for StateUpdate {
    type Error = RequestRejected;

    fn try_from(request: UpdateStateRequest) -> Result<Self, Self::Error> {
        if request.game_session_token.trim().is_empty() {
            return Err(RequestRejected::Invalid("Missing game session token".to_string()));
        }

        let access = parse_token(&request.api_access_token);
        let refresh = parse_token(&request.api_access_renew_token);
        let (Ok(access), Ok(refresh)) = (access, refresh) else {
            return Err(RequestRejected::Invalid(
                "Invalid JSON format for API tokens".to_string(),
            ));
        };

        let game_state: GameState = request.game_state.parse()?;

        let raw_required: BTreeMap<String, String> = if request.required_simulations.trim().is_empty() {
            BTreeMap::new()
        } else {
            serde_json::from_str(&request.required_simulations).map_err(|e| {
                RequestRejected::Invalid(format!("Invalid JSON format for required simulations: {}", e))
            })?
        };
        let required = parse_requirements(&raw_required)?;

        Ok(StateUpdate {
            token: SessionToken::new(request.game_session_token),
            game_state,
            month: request.month,
            api_base: request.game_session_api,
            credentials: simwatch_core::Credentials::new(access, refresh),
            required,
            session_info: request.game_session_info,
        })
    }
}

/// Build the watchdog router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/Watchdog/Ping", post(ping))
        .route("/Watchdog/SetMonth", post(set_month))
        .route("/Watchdog/UpdateState", post(update_state))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn ping() -> Json<ApiResponse> {
    ApiResponse::ok("Pong")
}

async fn set_month(
    State(state): State<AppState>,
    body: Result<Json<SetMonthRequest>, JsonRejection>,
) -> Result<Json<ApiResponse>, ApiError> {
    let Json(request) = body?;
    let token = SessionToken::new(request.game_session_token);

    state
        .registry
        .set_progress(&token, request.month)
        .inspect_err(|e| warn!(session = %token, error = %e, "SetMonth rejected"))?;

    info!(session = %token, month = request.month, "Target month set");
    Ok(ApiResponse::ok("Month set successfully"))
}

async fn update_state(
    State(state): State<AppState>,
    body: Result<Json<UpdateStateRequest>, JsonRejection>,
) -> Result<Json<ApiResponse>, ApiError> {
    let Json(request) = body?;
    let update = StateUpdate::try_from(request)
        .inspect_err(|e| warn!(error = %e, "UpdateState request malformed"))?;
    let token = update.token.clone();

    state
        .registry
        .update_state(update)
        .inspect_err(|e| warn!(session = %token, error = %e, "UpdateState rejected"))?;

    Ok(ApiResponse::ok("State updated successfully"))
}
