//! Wearable sync and webhook integration tests.

mod common;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use common::{webhook_signature, with_header, TestHarness};
use fittrack_core::UserId;
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn workouts() -> Value {
    let started = Utc::now() - Duration::hours(2);
    json!({
        "workouts": [
            { "id": "w-1", "type": "run", "duration_minutes": 32.5, "started_at": started },
            { "id": "w-2", "type": "ride", "duration_minutes": 60, "started_at": started },
            { "id": "w-3", "type": "glitch", "duration_minutes": 0, "started_at": started }
        ]
    })
}

async fn mock_workouts(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1/workouts"))
        .and(header("authorization", "Bearer provider-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(workouts()))
        .mount(server)
        .await;
}

// ============================================================================
// Pull sync
// ============================================================================

#[tokio::test]
async fn sync_imports_new_workouts_once() {
    let mock = MockServer::start().await;
    mock_workouts(&mock).await;
    let harness = TestHarness::with_mock(&mock.uri());

    let request = json!({ "provider": "garmin", "access_token": "provider-token" });

    let first = harness
        .as_user(harness.server.post("/v1/wearables/sync"))
        .json(&request)
        .await;
    first.assert_status_ok();
    let first: Value = first.json();
    assert_eq!(first["fetched"], 3);
    assert_eq!(first["imported"], 2);
    assert_eq!(first["duplicates"], 0);
    assert_eq!(first["skipped"], 1);

    let second: Value = harness
        .as_user(harness.server.post("/v1/wearables/sync"))
        .json(&request)
        .await
        .json();
    assert_eq!(second["imported"], 0);
    assert_eq!(second["duplicates"], 2);

    let activities: Value = harness
        .as_user(harness.server.get("/v1/activities"))
        .await
        .json();
    let activities = activities["activities"].as_array().unwrap();
    assert_eq!(activities.len(), 2);
    assert!(activities.iter().all(|a| a["source"] == "garmin"));
}

#[tokio::test]
async fn sync_forwards_since_parameter() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/workouts"))
        .and(query_param("since", "2026-01-01T00:00:00+00:00"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "workouts": [] })))
        .expect(1)
        .mount(&mock)
        .await;
    let harness = TestHarness::with_mock(&mock.uri());

    let response = harness
        .as_user(harness.server.post("/v1/wearables/sync"))
        .json(&json!({
            "provider": "garmin",
            "access_token": "provider-token",
            "since": "2026-01-01T00:00:00Z"
        }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["fetched"], 0);
}

#[tokio::test]
async fn sync_provider_error_is_bad_gateway() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/workouts"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock)
        .await;
    let harness = TestHarness::with_mock(&mock.uri());

    harness
        .as_user(harness.server.post("/v1/wearables/sync"))
        .json(&json!({ "provider": "garmin", "access_token": "expired" }))
        .await
        .assert_status(StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn sync_without_provider_api_is_bad_gateway() {
    let harness = TestHarness::new();

    harness
        .as_user(harness.server.post("/v1/wearables/sync"))
        .json(&json!({ "provider": "garmin", "access_token": "provider-token" }))
        .await
        .assert_status(StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn sync_rejects_invalid_provider_name() {
    let harness = TestHarness::new();

    harness
        .as_user(harness.server.post("/v1/wearables/sync"))
        .json(&json!({ "provider": "../etc", "access_token": "provider-token" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

// ============================================================================
// Webhook
// ============================================================================

fn webhook_body(user_id: UserId) -> Vec<u8> {
    let mut payload = workouts();
    payload["user_id"] = json!(user_id.to_string());
    payload["provider"] = json!("fitbit");
    serde_json::to_vec(&payload).unwrap()
}

#[tokio::test]
async fn signed_webhook_ingests_workouts() {
    let harness = TestHarness::new();
    let body = webhook_body(harness.test_user_id);

    let response = with_header(
        harness.server.post("/webhooks/wearables"),
        "x-wearable-signature",
        &webhook_signature(&body),
    )
    .bytes(body.clone().into())
    .content_type("application/json")
    .await;

    response.assert_status_ok();
    let counts: Value = response.json();
    assert_eq!(counts["imported"], 2);
    assert_eq!(counts["skipped"], 1);

    let replay: Value = with_header(
        harness.server.post("/webhooks/wearables"),
        "x-wearable-signature",
        &webhook_signature(&body),
    )
    .bytes(body.into())
    .content_type("application/json")
    .await
    .json();
    assert_eq!(replay["imported"], 0);
    assert_eq!(replay["duplicates"], 2);
}

#[tokio::test]
async fn webhook_with_bad_signature_is_rejected() {
    let harness = TestHarness::new();
    let body = webhook_body(harness.test_user_id);

    let response = with_header(
        harness.server.post("/webhooks/wearables"),
        "x-wearable-signature",
        "sha256=deadbeef",
    )
    .bytes(body.into())
    .content_type("application/json")
    .await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn webhook_without_signature_is_rejected() {
    let harness = TestHarness::new();
    let body = webhook_body(harness.test_user_id);

    harness
        .server
        .post("/webhooks/wearables")
        .bytes(body.into())
        .content_type("application/json")
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn webhook_signature_covers_the_whole_body() {
    let harness = TestHarness::new();
    let body = webhook_body(harness.test_user_id);
    let signature = webhook_signature(&body);
    let tampered = webhook_body(UserId::generate());

    with_header(
        harness.server.post("/webhooks/wearables"),
        "x-wearable-signature",
        &signature,
    )
    .bytes(tampered.into())
    .content_type("application/json")
    .await
    .assert_status_unauthorized();
}
