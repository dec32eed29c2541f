// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Router tests for the watchdog API.

mod common;

use axum::http::StatusCode;
use serde_json::json;
use simwatch_core::{GameState, SessionToken};
use simwatch_server::payload::accept_config_files;

use common::*;

#[tokio::test]
async fn test_ping() {
    let app = TestApp::new();
    let (status, body) = app.post_raw("/Watchdog/Ping", String::new()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true, "message": "Pong" }));
}

#[tokio::test]
async fn test_update_state_admits_new_session() {
    let app = TestApp::new();
    let (status, body) = app
        .post("/Watchdog/UpdateState", update_body("Setup", -1, true))
        .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "State updated successfully");

    let snapshot = app.registry.snapshot(&SessionToken::new(TOKEN)).unwrap();
    assert_eq!(snapshot.target_game_state, GameState::Setup);
}

#[tokio::test]
async fn test_set_month_for_known_session() {
    let app = TestApp::new();
    app.post("/Watchdog/UpdateState", update_body("Setup", -1, true))
        .await;

    let (status, body) = app
        .post(
            "/Watchdog/SetMonth",
            json!({ "game_session_token": TOKEN, "month": 4 }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Month set successfully");
    let snapshot = app.registry.snapshot(&SessionToken::new(TOKEN)).unwrap();
    assert_eq!(snapshot.target_month, 4);
}

#[tokio::test]
async fn test_set_month_for_unknown_session_is_not_allowed() {
    let app = TestApp::new();
    let (status, body) = app
        .post(
            "/Watchdog/SetMonth",
            json!({ "game_session_token": "nobody", "month": 1 }),
        )
        .await;

    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("nobody"));
}

#[tokio::test]
async fn test_unknown_session_without_info_is_not_allowed() {
    let app = TestApp::new();
    let (status, _) = app
        .post("/Watchdog/UpdateState", update_body("Play", 2, false))
        .await;

    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert!(app.registry.is_empty());
}

#[tokio::test]
async fn test_malformed_token_is_bad_request() {
    let app = TestApp::new();
    let mut body = update_body("Setup", -1, true);
    body["api_access_token"] = json!("not a token");

    let (status, body) = app.post("/Watchdog/UpdateState", body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("API tokens"));
}

#[tokio::test]
async fn test_unknown_game_state_is_bad_request() {
    let app = TestApp::new();
    let (status, body) = app
        .post("/Watchdog/UpdateState", update_body("Running", 0, true))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("Running"));
}

#[tokio::test]
async fn test_invalid_json_is_bad_request() {
    let app = TestApp::new();
    let (status, body) = app
        .post_raw("/Watchdog/SetMonth", "{ month: ".to_string())
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_unmet_requirements_are_not_allowed() {
    let app = TestApp::new();
    let mut body = update_body("Setup", -1, true);
    body["required_simulations"] = json!(r#"{"Shipping":"1.0"}"#);

    let (status, body) = app.post("/Watchdog/UpdateState", body).await;

    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert!(body["message"].as_str().unwrap().contains("Shipping"));
    assert!(app.registry.is_empty());
}

#[tokio::test]
async fn test_empty_requirements_are_accepted() {
    let app = TestApp::new();
    let mut body = update_body("Setup", -1, true);
    body["required_simulations"] = json!("");

    let (status, _) = app.post("/Watchdog/UpdateState", body).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_acceptance_policy_refusal_is_not_allowed() {
    let app = TestApp::from_registry(|registry| {
        registry.with_acceptance_policy(accept_config_files(vec!["Baltic".to_string()]))
    });

    let (status, _) = app
        .post("/Watchdog/UpdateState", update_body("Setup", -1, true))
        .await;

    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert!(app.registry.is_empty());
}

#[tokio::test]
async fn test_new_session_in_end_state_is_not_allowed() {
    let app = TestApp::new();
    let (status, _) = app
        .post("/Watchdog/UpdateState", update_body("End", 3, true))
        .await;

    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}
