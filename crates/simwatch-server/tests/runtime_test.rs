// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end tests of the assembled watchdog.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use simwatch_core::client::{MockAuthorityClient, MockCall, MockConnector};
use simwatch_core::{
    HookError, NoopHooks, Phase, PhaseContext, SessionConfig, SessionToken, SimulationHooks,
};
use simwatch_server::runtime::WatchdogRuntime;

use common::*;

struct FatalSetup;

#[async_trait]
impl SimulationHooks for FatalSetup {
    async fn setup(&self, _ctx: &PhaseContext) -> Result<(), HookError> {
        Err(HookError::fatal("raster model missing"))
    }
}

async fn start(hooks: Arc<dyn SimulationHooks>) -> (WatchdogRuntime, Arc<MockAuthorityClient>) {
    let authority = Arc::new(MockAuthorityClient::with_owner(TOKEN));
    let runtime = WatchdogRuntime::builder()
        .bind_addr("127.0.0.1:0".parse().unwrap())
        .session_config(SessionConfig::default().with_tick_rate(Duration::from_millis(10)))
        .simulations(offered())
        .hooks(hooks)
        .connector(Arc::new(MockConnector::new(authority.clone())))
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();
    (runtime, authority)
}

async fn post_update(runtime: &WatchdogRuntime, body: serde_json::Value) -> reqwest::StatusCode {
    reqwest::Client::new()
        .post(format!("http://{}/Watchdog/UpdateState", runtime.bind_addr()))
        .json(&body)
        .send()
        .await
        .unwrap()
        .status()
}

#[tokio::test]
async fn test_late_join_catches_up_over_http() {
    let (runtime, authority) = start(Arc::new(NoopHooks)).await;
    assert!(runtime.is_running());

    let status = post_update(&runtime, update_body("Play", 2, true)).await;
    assert_eq!(status, reqwest::StatusCode::OK);

    let token = SessionToken::new(TOKEN);
    let caught_up = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(snapshot) = runtime.registry().snapshot(&token)
                && snapshot.current_month == 2
                && snapshot.phase == Phase::AwaitingNextMonth
                && !snapshot.busy
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(caught_up.is_ok(), "{:?}", runtime.registry().snapshot(&token));

    assert_eq!(
        authority.count(|c| matches!(c, MockCall::RegisterCapabilities(_))),
        1
    );
    assert_eq!(authority.count(|c| matches!(c, MockCall::SubmitKpis(_))), 3);

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_fatal_hook_error_is_surfaced() {
    let (runtime, _authority) = start(Arc::new(FatalSetup)).await;

    let status = post_update(&runtime, update_body("Setup", -1, true)).await;
    assert_eq!(status, reqwest::StatusCode::OK);

    let message = tokio::time::timeout(Duration::from_secs(5), runtime.fatal_error())
        .await
        .expect("fatal error reported");
    assert!(message.contains("raster model missing"), "{}", message);

    runtime.shutdown().await.unwrap();
}
