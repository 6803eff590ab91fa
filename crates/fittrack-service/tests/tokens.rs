//! Token account, ledger and service endpoint integration tests.

mod common;

use axum::http::StatusCode;
use chrono::Utc;
use common::TestHarness;
use fittrack_core::{period_key, Plan, TokenBalance, UserId};
use fittrack_store::Store;
use serde_json::{json, Value};

// ============================================================================
// Account and balance
// ============================================================================

#[tokio::test]
async fn create_account_grants_free_allowance() {
    let harness = TestHarness::new();

    let body = harness.create_account().await;

    assert_eq!(body["plan"], "free");
    assert_eq!(body["balance"], 20);
    assert_eq!(body["monthly_allowance"], 20);
    assert_eq!(body["lifetime_granted"], 20);
    assert!(body["last_reset_period"].is_string());
}

#[tokio::test]
async fn create_account_twice_returns_existing_account() {
    let harness = TestHarness::new();
    harness.create_account().await;

    let response = harness
        .as_user(harness.server.post("/v1/tokens/account"))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["balance"], 20);
}

#[tokio::test]
async fn create_account_retry_applies_missing_signup_grant() {
    let harness = TestHarness::new();
    // A row left behind by a signup whose grant never landed.
    let now = Utc::now();
    let mut orphan = TokenBalance::new(harness.test_user_id, Plan::Free, now);
    orphan.last_reset_period = Some(period_key(now));
    harness.store.create_balance(&orphan).await.unwrap();

    let response = harness
        .as_user(harness.server.post("/v1/tokens/account"))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["balance"], 20);

    let ledger: Value = harness
        .as_user(harness.server.get("/v1/tokens/ledger"))
        .await
        .json();
    let entries = ledger["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["kind"], "grant");

    // Later calls only replay the grant.
    harness
        .as_user(harness.server.post("/v1/tokens/account"))
        .await
        .assert_status_ok();
    assert_eq!(harness.balance().await, 20);
}

#[tokio::test]
async fn get_balance_without_account_fails() {
    let harness = TestHarness::new();

    let response = harness.as_user(harness.server.get("/v1/tokens/balance")).await;

    response.assert_status_not_found();
}

#[tokio::test]
async fn get_balance_without_auth_fails() {
    let harness = TestHarness::new();

    let response = harness.server.get("/v1/tokens/balance").await;

    response.assert_status_unauthorized();
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "unauthorized");
}

#[tokio::test]
async fn forged_jwt_is_rejected() {
    let harness = TestHarness::new();

    let forged = jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &json!({ "sub": harness.test_user_id.to_string(), "exp": 4_000_000_000_i64 }),
        &jsonwebtoken::EncodingKey::from_secret(b"some-other-secret"),
    )
    .unwrap();

    let response = common::with_header(
        harness.server.get("/v1/tokens/balance"),
        "authorization",
        &format!("Bearer {forged}"),
    )
    .await;

    response.assert_status_unauthorized();
}

// ============================================================================
// Ledger
// ============================================================================

#[tokio::test]
async fn ledger_lists_signup_grant() {
    let harness = TestHarness::new();
    harness.create_account().await;

    let response = harness.as_user(harness.server.get("/v1/tokens/ledger")).await;

    response.assert_status_ok();
    let body: Value = response.json();
    let entries = body["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["kind"], "grant");
    assert_eq!(entries[0]["delta"], 20);
    assert_eq!(entries[0]["balance_after"], 20);
    assert_eq!(body["has_more"], false);
}

#[tokio::test]
async fn ledger_paginates_newest_first() {
    let harness = TestHarness::new();
    harness.create_account().await;
    harness.grant(5).await;

    let response = harness
        .as_user(harness.server.get("/v1/tokens/ledger?limit=1&offset=0"))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    let entries = body["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["delta"], 5);
    assert_eq!(entries[0]["balance_after"], 25);
    assert_eq!(body["has_more"], true);
}

// ============================================================================
// Check and consume
// ============================================================================

#[tokio::test]
async fn check_prices_built_in_features() {
    let harness = TestHarness::new();
    harness.create_account().await;

    let response = TestHarness::as_service(harness.server.post("/v1/tokens/check"))
        .json(&json!({
            "user_id": harness.test_user_id.to_string(),
            "feature": "recipe_details"
        }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["sufficient"], true);
    assert_eq!(body["required"], 2);
    assert_eq!(body["balance"], 20);
}

#[tokio::test]
async fn check_custom_feature_requires_amount() {
    let harness = TestHarness::new();
    harness.create_account().await;

    let response = TestHarness::as_service(harness.server.post("/v1/tokens/check"))
        .json(&json!({
            "user_id": harness.test_user_id.to_string(),
            "feature": "meal_scan"
        }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn check_unknown_user_is_not_found() {
    let harness = TestHarness::new();

    let response = TestHarness::as_service(harness.server.post("/v1/tokens/check"))
        .json(&json!({ "user_id": UserId::generate().to_string(), "amount": 1 }))
        .await;

    response.assert_status_not_found();
}

#[tokio::test]
async fn consume_debits_once_per_idempotency_key() {
    let harness = TestHarness::new();
    harness.create_account().await;

    let request = json!({
        "idempotency_key": "req-1",
        "user_id": harness.test_user_id.to_string(),
        "feature": "transcription"
    });

    let first = TestHarness::as_service(harness.server.post("/v1/tokens/consume"))
        .json(&request)
        .await;
    first.assert_status_ok();
    let first: Value = first.json();
    assert_eq!(first["balance"], 19);
    assert_eq!(first["replayed"], false);
    assert_eq!(first["entry"]["kind"], "consumption");
    assert_eq!(first["entry"]["delta"], -1);

    let second = TestHarness::as_service(harness.server.post("/v1/tokens/consume"))
        .json(&request)
        .await;
    second.assert_status_ok();
    let second: Value = second.json();
    assert_eq!(second["replayed"], true);
    assert_eq!(second["entry"]["id"], first["entry"]["id"]);

    assert_eq!(harness.balance().await, 19);
}

#[tokio::test]
async fn consume_more_than_balance_is_payment_required() {
    let harness = TestHarness::new();
    harness.create_account().await;

    let response = TestHarness::as_service(harness.server.post("/v1/tokens/consume"))
        .json(&json!({
            "idempotency_key": "big",
            "user_id": harness.test_user_id.to_string(),
            "feature": "meal_scan",
            "amount": 21
        }))
        .await;

    response.assert_status(StatusCode::PAYMENT_REQUIRED);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "insufficient_tokens");
    assert_eq!(body["error"]["details"]["balance"], 20);
    assert_eq!(body["error"]["details"]["required"], 21);

    assert_eq!(harness.balance().await, 20);
}

#[tokio::test]
async fn consume_rejects_non_positive_amount() {
    let harness = TestHarness::new();
    harness.create_account().await;

    let response = TestHarness::as_service(harness.server.post("/v1/tokens/consume"))
        .json(&json!({
            "idempotency_key": "zero",
            "user_id": harness.test_user_id.to_string(),
            "feature": "transcription",
            "amount": 0
        }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn consume_key_reused_by_another_user_conflicts() {
    let harness = TestHarness::new();
    harness.create_account().await;

    let other = UserId::generate();
    TestHarness::as_other(harness.server.post("/v1/tokens/account"), other)
        .await
        .assert_status(StatusCode::CREATED);

    for (user, expected) in [
        (harness.test_user_id, StatusCode::OK),
        (other, StatusCode::CONFLICT),
    ] {
        TestHarness::as_service(harness.server.post("/v1/tokens/consume"))
            .json(&json!({
                "idempotency_key": "shared-key",
                "user_id": user.to_string(),
                "feature": "transcription"
            }))
            .await
            .assert_status(expected);
    }
}

#[tokio::test]
async fn consume_requires_service_key() {
    let harness = TestHarness::new();
    harness.create_account().await;

    let response = harness
        .as_user(harness.server.post("/v1/tokens/consume"))
        .json(&json!({
            "idempotency_key": "req-1",
            "user_id": harness.test_user_id.to_string(),
            "feature": "transcription"
        }))
        .await;

    response.assert_status_unauthorized();
}

// ============================================================================
// Admin: grant and plan
// ============================================================================

#[tokio::test]
async fn grant_requires_admin_key() {
    let harness = TestHarness::new();
    harness.create_account().await;

    let response = TestHarness::as_service(harness.server.post("/v1/tokens/grant"))
        .json(&json!({
            "user_id": harness.test_user_id.to_string(),
            "amount": 5,
            "reason": "nope"
        }))
        .await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn grant_adds_tokens() {
    let harness = TestHarness::new();
    harness.create_account().await;

    harness.grant(30).await;

    assert_eq!(harness.balance().await, 50);
}

#[tokio::test]
async fn set_plan_changes_allowance_not_balance() {
    let harness = TestHarness::new();
    harness.create_account().await;

    let response = TestHarness::as_admin(harness.server.post("/v1/tokens/plan"))
        .json(&json!({ "user_id": harness.test_user_id.to_string(), "plan": "premium" }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["plan"], "premium");
    assert_eq!(body["monthly_allowance"], 200);
    assert_eq!(body["balance"], 20);
}

// ============================================================================
// Monthly reset
// ============================================================================

#[tokio::test]
async fn monthly_reset_restores_allowance_without_rollover() {
    let harness = TestHarness::new();
    harness.create_account().await;
    harness.grant(30).await;

    let response = TestHarness::as_service(harness.server.post("/v1/tokens/monthly-reset"))
        .json(&json!({ "period": "2099-01" }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["period"], "2099-01");
    assert_eq!(body["reset"], 1);
    assert_eq!(body["failed"], 0);

    assert_eq!(harness.balance().await, 20);
}

#[tokio::test]
async fn monthly_reset_is_safe_to_rerun() {
    let harness = TestHarness::new();
    harness.create_account().await;

    for expected_reset in [1, 0] {
        let body: Value = TestHarness::as_service(harness.server.post("/v1/tokens/monthly-reset"))
            .json(&json!({ "period": "2099-02" }))
            .await
            .json();
        assert_eq!(body["reset"], expected_reset);
    }

    let ledger: Value = harness
        .as_user(harness.server.get("/v1/tokens/ledger"))
        .await
        .json();
    let resets = ledger["entries"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|e| e["kind"] == "monthly_reset")
        .count();
    assert_eq!(resets, 1);
}

#[tokio::test]
async fn monthly_reset_skips_current_period_for_new_accounts() {
    let harness = TestHarness::new();
    harness.create_account().await;

    let response = TestHarness::as_service(harness.server.post("/v1/tokens/monthly-reset")).await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["reset"], 0);
    assert_eq!(body["skipped"], 1);
}

#[tokio::test]
async fn monthly_reset_rejects_malformed_period() {
    let harness = TestHarness::new();

    let response = TestHarness::as_service(harness.server.post("/v1/tokens/monthly-reset"))
        .json(&json!({ "period": "January" }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}
