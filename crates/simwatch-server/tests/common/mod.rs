// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared helpers for simwatch-server integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use simwatch_core::client::{MockAuthorityClient, MockConnector};
use simwatch_core::{
    CapabilitySet, NoopHooks, SessionConfig, SessionRegistry, SimulationDefinition,
};
use simwatch_server::api::{AppState, router};
use tower::ServiceExt;

pub const TOKEN: &str = "game-session-1";

pub fn offered() -> CapabilitySet {
    CapabilitySet::new()
        .with(SimulationDefinition::parse("SandExtraction", "1.0.0").unwrap())
        .with(SimulationDefinition::parse("Foo", "2.0").unwrap())
}

pub struct TestApp {
    pub registry: Arc<SessionRegistry>,
    pub authority: Arc<MockAuthorityClient>,
    pub router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        Self::from_registry(|registry| registry)
    }

    /// Build an app whose registry is adjusted by `customize`.
    pub fn from_registry(customize: impl FnOnce(SessionRegistry) -> SessionRegistry) -> Self {
        let authority = Arc::new(MockAuthorityClient::with_owner(TOKEN));
        let registry = customize(SessionRegistry::new(
            offered(),
            Arc::new(MockConnector::new(authority.clone())),
            Arc::new(NoopHooks),
            SessionConfig::default(),
        ));
        let registry = Arc::new(registry);
        let router = router(AppState {
            registry: registry.clone(),
        });
        Self {
            registry,
            authority,
            router,
        }
    }

    /// POST a raw body and return status and decoded JSON response.
    pub async fn post_raw(&self, uri: &str, body: String) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.post_raw(uri, body.to_string()).await
    }
}

/// JSON-encoded token as the authority embeds it in request fields.
pub fn token_field(token: &str, hours: i64) -> String {
    json!({
        "token": token,
        "valid_until": (Utc::now() + Duration::hours(hours)).format("%Y-%m-%dT%H:%M:%S").to_string(),
    })
    .to_string()
}

/// An `UpdateState` body for the default session.
pub fn update_body(game_state: &str, month: i32, with_info: bool) -> Value {
    let mut body = json!({
        "game_session_api": "http://authority.test/",
        "game_session_token": TOKEN,
        "game_state": game_state,
        "required_simulations": r#"{"SandExtraction":"1.0"}"#,
        "api_access_token": token_field("access-0", 1),
        "api_access_renew_token": token_field("refresh-0", 24),
        "month": month,
    });
    if with_info {
        body["game_session_info"] = json!({
            "id": 1,
            "name": "Test game",
            "config_file_name": "North_OR_ELSE",
        });
    }
    body
}
