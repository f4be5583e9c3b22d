//! Common test utilities for reset hook integration tests
//!
//! This module provides:
//! - A wiremock server standing in for Secret Manager, Compute Engine and Slack
//! - Request signing helpers
//! - An app builder wiring the real HTTP adapters into the router

#![allow(dead_code)]

use axum::{body::Body, http::Request, response::Response, Router};
use base64::Engine;
use reset_hook_core::{verification::compute_signature, Timestamp};
use reset_hook_service::{
    build_pipeline,
    gcp::{ComputeEngineClient, SecretManagerStore, StaticTokenProvider},
    slack::SlackWebhookPoster,
    create_router, AppState, HandlerSettings, ServiceConfig,
};
use std::{sync::Arc, time::Duration};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

pub const SIGNING_SECRET: &str = "8f742231b10e8888abcd99yyyzzz85a5";
pub const PROJECT_ID: &str = "proj-1";
pub const ZONE: &str = "asia-northeast1-b";
pub const INSTANCE: &str = "minecraft";
pub const SECRET_ID: &str = "slack-signing-secret";
pub const WEBHOOK_PATH: &str = "/services/T000/B000/XXXX";
pub const FIXTURE_TEMPLATE: &str =
    "{{ .UserName }} reset {{ .ProjectID }}/{{ .Zone }}/{{ .InstanceName }} from #{{ .ChannelName }}";

pub const SECRET_ACCESS_PATH: &str =
    "/v1/projects/proj-1/secrets/slack-signing-secret/versions/latest:access";
pub const RESET_PATH: &str =
    "/compute/v1/projects/proj-1/zones/asia-northeast1-b/instances/minecraft/reset";

// ============================================================================
// Backend mocks
// ============================================================================

/// Mount a Secret Manager response serving [`SIGNING_SECRET`].
pub async fn mount_secret(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(SECRET_ACCESS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": "projects/123/secrets/slack-signing-secret/versions/1",
            "payload": {
                "data": base64::engine::general_purpose::STANDARD.encode(SIGNING_SECRET)
            }
        })))
        .mount(server)
        .await;
}

/// Mount the reset endpoint, expecting exactly `times` calls.
pub async fn mount_reset(server: &MockServer, times: u64) {
    Mock::given(method("POST"))
        .and(path(RESET_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "kind": "compute#operation",
            "name": "operation-reset-1",
            "status": "RUNNING"
        })))
        .expect(times)
        .mount(server)
        .await;
}

/// Mount the audit webhook returning `status`.
pub async fn mount_webhook(server: &MockServer, status: u16) {
    Mock::given(method("POST"))
        .and(path(WEBHOOK_PATH))
        .respond_with(ResponseTemplate::new(status).set_body_string(if status == 200 {
            "ok"
        } else {
            "no_service"
        }))
        .mount(server)
        .await;
}

/// Bodies posted to the audit webhook so far.
pub async fn webhook_posts(server: &MockServer) -> Vec<serde_json::Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == WEBHOOK_PATH)
        .filter_map(|r| serde_json::from_slice(&r.body).ok())
        .collect()
}

// ============================================================================
// App builder
// ============================================================================

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
}

impl TestApp {
    /// Wait until every spawned pipeline task has finished.
    pub async fn settle(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.state.in_flight().wait_idle())
            .await
            .expect("pipeline tasks should finish");
    }
}

pub fn settings(server: &MockServer, notify: bool) -> HandlerSettings {
    HandlerSettings {
        target_project_id: Some(PROJECT_ID.to_string()),
        target_zone: ZONE.to_string(),
        target_instance_name: INSTANCE.to_string(),
        signing_secret_id: SECRET_ID.to_string(),
        notify_text_template: notify.then(|| FIXTURE_TEMPLATE.to_string()),
        notify_webhook_url: notify.then(|| format!("{}{}", server.uri(), WEBHOOK_PATH)),
    }
}

/// Build the router with the production adapters pointed at `server`.
pub fn build_app(server: &MockServer, config: ServiceConfig, settings: HandlerSettings) -> TestApp {
    let mut config = config;
    config.gcp.secret_manager_url = server.uri();
    config.gcp.compute_url = server.uri();

    let http = reqwest::Client::new();
    let tokens = Arc::new(StaticTokenProvider::new("integration-token"));
    let pipeline = build_pipeline(
        &config,
        &settings,
        PROJECT_ID,
        Arc::new(SecretManagerStore::new(
            http.clone(),
            config.gcp.secret_manager_url.clone(),
            tokens.clone(),
        )),
        Arc::new(ComputeEngineClient::new(
            http.clone(),
            config.gcp.compute_url.clone(),
            tokens,
        )),
        Arc::new(SlackWebhookPoster::new(http)),
    )
    .expect("pipeline should build");

    let state = AppState::new(config, Arc::new(pipeline));
    TestApp {
        router: create_router(state.clone()),
        state,
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Build a request signed with [`SIGNING_SECRET`] at `timestamp`.
pub fn signed_request_at(body: &str, timestamp: i64) -> Request<Body> {
    let ts = timestamp.to_string();
    let signature = compute_signature(SIGNING_SECRET.as_bytes(), &ts, body.as_bytes())
        .expect("signature should compute");
    Request::builder()
        .method("POST")
        .uri("/")
        .header("content-type", "application/x-www-form-urlencoded")
        .header("x-slack-signature", signature)
        .header("x-slack-request-timestamp", ts)
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Build a request signed now.
pub fn signed_request(body: &str) -> Request<Body> {
    signed_request_at(body, Timestamp::now().unix_seconds())
}

pub async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
