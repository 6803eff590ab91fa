//! Session and CSRF integration tests.

mod common;

use axum::http::StatusCode;
use common::{with_header, TestHarness};
use serde_json::Value;

async fn issue(harness: &TestHarness) -> Value {
    let response = harness.as_user(harness.server.post("/v1/sessions")).await;
    response.assert_status(StatusCode::CREATED);
    response.json()
}

fn token(session: &Value, field: &str) -> String {
    session[field].as_str().unwrap().to_string()
}

#[tokio::test]
async fn issue_session_returns_tokens_once() {
    let harness = TestHarness::new();

    let session = issue(&harness).await;

    assert_eq!(token(&session, "session_token").len(), 64);
    assert_eq!(token(&session, "csrf_token").len(), 64);
    assert!(session["expires_at"].is_string());
}

#[tokio::test]
async fn issue_session_requires_jwt() {
    let harness = TestHarness::new();

    harness
        .server
        .post("/v1/sessions")
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn session_token_authenticates_safe_requests() {
    let harness = TestHarness::new();
    harness.create_account().await;
    let session = issue(&harness).await;

    let response = with_header(
        harness.server.get("/v1/tokens/balance"),
        "x-session-token",
        &token(&session, "session_token"),
    )
    .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["user_id"], harness.test_user_id.to_string());
}

#[tokio::test]
async fn session_cookie_authenticates() {
    let harness = TestHarness::new();
    let session = issue(&harness).await;

    let response = with_header(
        harness.server.get("/v1/sessions/current"),
        "cookie",
        &format!("theme=dark; fittrack_session={}", token(&session, "session_token")),
    )
    .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["session_id"], session["session_id"]);
}

#[tokio::test]
async fn non_safe_session_request_requires_csrf() {
    let harness = TestHarness::new();
    let session = issue(&harness).await;
    let session_token = token(&session, "session_token");

    let missing = with_header(
        harness.server.post("/v1/tokens/account"),
        "x-session-token",
        &session_token,
    )
    .await;
    missing.assert_status(StatusCode::FORBIDDEN);
    let body: Value = missing.json();
    assert_eq!(body["error"]["code"], "csrf_rejected");

    let wrong = with_header(
        with_header(
            harness.server.post("/v1/tokens/account"),
            "x-session-token",
            &session_token,
        ),
        "x-csrf-token",
        "not-the-token",
    )
    .await;
    wrong.assert_status(StatusCode::FORBIDDEN);

    let ok = with_header(
        with_header(
            harness.server.post("/v1/tokens/account"),
            "x-session-token",
            &session_token,
        ),
        "x-csrf-token",
        &token(&session, "csrf_token"),
    )
    .await;
    ok.assert_status(StatusCode::CREATED);
}

#[tokio::test]
async fn rotated_csrf_replaces_the_old_token() {
    let harness = TestHarness::new();
    let session = issue(&harness).await;
    let session_token = token(&session, "session_token");
    let old_csrf = token(&session, "csrf_token");

    let rotated = with_header(
        with_header(
            harness.server.post("/v1/sessions/current/csrf"),
            "x-session-token",
            &session_token,
        ),
        "x-csrf-token",
        &old_csrf,
    )
    .await;
    rotated.assert_status_ok();
    let new_csrf = token(&rotated.json::<Value>(), "csrf_token");
    assert_ne!(new_csrf, old_csrf);

    for (csrf, expected) in [
        (old_csrf.as_str(), StatusCode::FORBIDDEN),
        (new_csrf.as_str(), StatusCode::CREATED),
    ] {
        with_header(
            with_header(
                harness.server.post("/v1/tokens/account"),
                "x-session-token",
                &session_token,
            ),
            "x-csrf-token",
            csrf,
        )
        .await
        .assert_status(expected);
    }
}

#[tokio::test]
async fn revoked_session_stops_working() {
    let harness = TestHarness::new();
    let session = issue(&harness).await;
    let session_token = token(&session, "session_token");

    with_header(
        with_header(
            harness.server.delete("/v1/sessions/current"),
            "x-session-token",
            &session_token,
        ),
        "x-csrf-token",
        &token(&session, "csrf_token"),
    )
    .await
    .assert_status(StatusCode::NO_CONTENT);

    with_header(
        harness.server.get("/v1/sessions/current"),
        "x-session-token",
        &session_token,
    )
    .await
    .assert_status_unauthorized();
}

#[tokio::test]
async fn revoke_all_sessions_signs_out_everywhere() {
    let harness = TestHarness::new();
    let first = issue(&harness).await;
    let second = issue(&harness).await;

    let response = harness.as_user(harness.server.delete("/v1/sessions")).await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["revoked"], 2);

    for session in [first, second] {
        with_header(
            harness.server.get("/v1/sessions/current"),
            "x-session-token",
            &token(&session, "session_token"),
        )
        .await
        .assert_status_unauthorized();
    }
}

#[tokio::test]
async fn unknown_session_token_is_rejected() {
    let harness = TestHarness::new();

    with_header(
        harness.server.get("/v1/sessions/current"),
        "x-session-token",
        "0123456789abcdef",
    )
    .await
    .assert_status_unauthorized();
}
