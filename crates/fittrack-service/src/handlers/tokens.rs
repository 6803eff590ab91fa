//! Token balance and ledger handlers.
//!
//! Metered callers follow check → external call → consume. The consume step
//! is the store's atomic conditional debit, so a balance that drained in
//! between still cannot go negative.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use fittrack_core::{
    parse_period, period_key, Feature, LedgerEntry, LedgerOutcome, LedgerRequest, Plan,
    TokenBalance, UserId,
};
use fittrack_store::StoreError;

use super::{check_idempotency_key, parse_user_id, PageQuery, MAX_PAGE_SIZE};
use crate::auth::{AdminAuth, AuthUser, ServiceAuth};
use crate::error::ApiError;
use crate::state::AppState;

// ============================================================================
// Constants
// ============================================================================

/// Balances processed concurrently by the monthly reset.
const MONTHLY_RESET_PARALLELISM: usize = 8;

/// Balances loaded per page by the monthly reset.
const MONTHLY_RESET_PAGE_SIZE: usize = 500;

// ============================================================================
// Shared helpers
// ============================================================================

/// Map a feature name to a [`Feature`].
#[must_use]
pub fn parse_feature(name: &str) -> Feature {
    match name {
        "transcription" => Feature::Transcription,
        "recipe_details" => Feature::RecipeDetails,
        other => Feature::Custom(other.to_string()),
    }
}

/// Load a user's balance and require it to cover `required` tokens.
pub(crate) async fn require_balance(
    state: &AppState,
    user_id: &UserId,
    required: i64,
) -> Result<TokenBalance, ApiError> {
    let balance = state
        .store
        .get_balance(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Token account not found".into()))?;

    if !balance.has_sufficient(required) {
        return Err(ApiError::InsufficientTokens {
            balance: balance.balance,
            required,
        });
    }
    Ok(balance)
}

/// Like [`require_balance`], but a key this user was already charged for
/// passes without a cost check; the consume step will only replay it.
pub(crate) async fn require_balance_unless_charged(
    state: &AppState,
    user_id: &UserId,
    required: i64,
    idempotency_key: &str,
) -> Result<(), ApiError> {
    match state.store.get_entry_by_key(idempotency_key).await? {
        Some(entry) if entry.user_id == *user_id => {
            tracing::debug!(user_id = %user_id, idempotency_key, "Request already charged");
            Ok(())
        }
        Some(_) => Err(ApiError::Conflict(format!(
            "idempotency key already used: {idempotency_key}"
        ))),
        None => require_balance(state, user_id, required).await.map(|_| ()),
    }
}

/// Atomically debit `amount` tokens for `feature`.
pub(crate) async fn consume(
    state: &AppState,
    user_id: UserId,
    feature: &Feature,
    amount: i64,
    idempotency_key: String,
) -> Result<LedgerOutcome, ApiError> {
    let request = LedgerRequest::consume(idempotency_key, user_id, feature, amount);
    let outcome = state.store.apply_ledger(&request).await?;

    tracing::info!(
        user_id = %user_id,
        feature = %feature.as_str(),
        amount,
        balance = outcome.balance_after(),
        replayed = outcome.replayed,
        "Tokens consumed"
    );
    Ok(outcome)
}

/// Ledger entry in API format.
#[derive(Debug, Serialize)]
pub struct LedgerEntryResponse {
    /// Entry ID.
    pub id: String,
    /// Entry kind.
    pub kind: String,
    /// Signed change in tokens.
    pub delta: i64,
    /// Balance after this entry.
    pub balance_after: i64,
    /// Description.
    pub description: String,
    /// Metadata.
    pub metadata: serde_json::Value,
    /// Timestamp.
    pub created_at: String,
}

impl From<&LedgerEntry> for LedgerEntryResponse {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            id: entry.id.to_string(),
            kind: entry.kind.to_string(),
            delta: entry.delta,
            balance_after: entry.balance_after,
            description: entry.description.clone(),
            metadata: entry.metadata.clone(),
            created_at: entry.created_at.to_rfc3339(),
        }
    }
}

/// Result of a ledger write.
#[derive(Debug, Serialize)]
pub struct LedgerWriteResponse {
    /// Balance after the (original) write.
    pub balance: i64,
    /// Whether the idempotency key had already been applied.
    pub replayed: bool,
    /// The recorded entry.
    pub entry: LedgerEntryResponse,
}

impl From<&LedgerOutcome> for LedgerWriteResponse {
    fn from(outcome: &LedgerOutcome) -> Self {
        Self {
            balance: outcome.balance_after(),
            replayed: outcome.replayed,
            entry: LedgerEntryResponse::from(&outcome.entry),
        }
    }
}

// ============================================================================
// Account and balance
// ============================================================================

/// Balance response.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    /// User ID.
    pub user_id: String,
    /// Current plan.
    pub plan: Plan,
    /// Spendable tokens.
    pub balance: i64,
    /// Monthly allowance of the plan.
    pub monthly_allowance: i64,
    /// Tokens ever consumed.
    pub lifetime_consumed: i64,
    /// Tokens ever granted.
    pub lifetime_granted: i64,
    /// Last reset period (`YYYY-MM`).
    pub last_reset_period: Option<String>,
}

impl BalanceResponse {
    fn new(balance: &TokenBalance, state: &AppState) -> Self {
        Self {
            user_id: balance.user_id.to_string(),
            plan: balance.plan,
            balance: balance.balance,
            monthly_allowance: state.config.pricing.monthly_allowance(balance.plan),
            lifetime_consumed: balance.lifetime_consumed,
            lifetime_granted: balance.lifetime_granted,
            last_reset_period: balance.last_reset_period.clone(),
        }
    }
}

/// Create the caller's token account on first contact.
///
/// The free allowance is granted immediately and the current month counts as
/// already reset. Calling again returns the existing account with 200.
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<(StatusCode, Json<BalanceResponse>), ApiError> {
    let now = Utc::now();
    let mut balance = TokenBalance::new(auth.user_id, Plan::Free, now);
    balance.last_reset_period = Some(period_key(now));

    let created = match state.store.create_balance(&balance).await {
        Ok(()) => true,
        Err(StoreError::AlreadyExists { .. }) => false,
        Err(e) => return Err(e.into()),
    };

    // Applied on every call so an account whose grant failed gets it on
    // retry; once recorded the key only replays.
    let allowance = state.config.pricing.monthly_allowance(Plan::Free);
    if allowance > 0 {
        let request = LedgerRequest::grant(
            format!("signup:{}", auth.user_id),
            auth.user_id,
            allowance,
            "Welcome allowance",
        );
        let outcome = state.store.apply_ledger(&request).await?;
        if !created && !outcome.replayed {
            tracing::warn!(user_id = %auth.user_id, "Signup grant recovered on retry");
        }
    }

    let balance = state
        .store
        .get_balance(&auth.user_id)
        .await?
        .ok_or_else(|| ApiError::Internal("balance vanished after signup".into()))?;

    let status = if created {
        tracing::info!(user_id = %auth.user_id, balance = balance.balance, "Token account created");
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((status, Json(BalanceResponse::new(&balance, &state))))
}

/// Get the caller's balance.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance = state
        .store
        .get_balance(&auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Token account not found".into()))?;

    Ok(Json(BalanceResponse::new(&balance, &state)))
}

/// Ledger page response.
#[derive(Debug, Serialize)]
pub struct LedgerResponse {
    /// Entries, newest first.
    pub entries: Vec<LedgerEntryResponse>,
    /// Whether there are more entries.
    pub has_more: bool,
}

/// List the caller's ledger.
pub async fn list_ledger(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<LedgerResponse>, ApiError> {
    state
        .store
        .get_balance(&auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Token account not found".into()))?;

    // Fetch one more than requested to determine has_more
    let limit = query.limit.min(MAX_PAGE_SIZE);
    let entries = state
        .store
        .list_entries(&auth.user_id, limit + 1, query.offset)
        .await?;

    let has_more = entries.len() > limit;
    let entries = entries
        .iter()
        .take(limit)
        .map(LedgerEntryResponse::from)
        .collect();

    Ok(Json(LedgerResponse { entries, has_more }))
}

// ============================================================================
// Service endpoints: check and consume
// ============================================================================

/// Balance check request.
#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    /// User to check.
    pub user_id: String,
    /// Feature name; built-in features are priced by the service.
    #[serde(default)]
    pub feature: Option<String>,
    /// Explicit amount (required for custom features).
    #[serde(default)]
    pub amount: Option<i64>,
}

/// Balance check response.
#[derive(Debug, Serialize)]
pub struct CheckResponse {
    /// Whether the balance covers `required`.
    pub sufficient: bool,
    /// Current balance.
    pub balance: i64,
    /// Tokens required.
    pub required: i64,
}

fn resolve_amount(
    state: &AppState,
    feature: Option<&str>,
    amount: Option<i64>,
) -> Result<(Feature, i64), ApiError> {
    let feature = feature.map_or_else(|| Feature::Custom("unspecified".into()), parse_feature);
    let amount = amount
        .or_else(|| state.config.pricing.cost_of(&feature))
        .ok_or_else(|| ApiError::BadRequest("amount is required for custom features".into()))?;
    if amount <= 0 {
        return Err(ApiError::BadRequest("amount must be positive".into()));
    }
    Ok((feature, amount))
}

/// Check whether a user can afford a feature.
pub async fn check_balance(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Json(body): Json<CheckRequest>,
) -> Result<Json<CheckResponse>, ApiError> {
    let user_id = parse_user_id(&body.user_id)?;
    let (_, required) = resolve_amount(&state, body.feature.as_deref(), body.amount)?;

    let balance = state
        .store
        .get_balance(&user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Token account not found".into()))?;

    Ok(Json(CheckResponse {
        sufficient: balance.has_sufficient(required),
        balance: balance.balance,
        required,
    }))
}

/// Consume request.
#[derive(Debug, Deserialize)]
pub struct ConsumeRequest {
    /// Unique key; replays return the original entry.
    pub idempotency_key: String,
    /// User being charged.
    pub user_id: String,
    /// Feature name.
    pub feature: String,
    /// Explicit amount (defaults to the feature price).
    #[serde(default)]
    pub amount: Option<i64>,
}

/// Atomically consume tokens on behalf of a service.
pub async fn consume_tokens(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<ConsumeRequest>,
) -> Result<Json<LedgerWriteResponse>, ApiError> {
    let user_id = parse_user_id(&body.user_id)?;
    let key = check_idempotency_key(&body.idempotency_key)?;
    let (feature, amount) = resolve_amount(&state, Some(&body.feature), body.amount)?;

    tracing::debug!(
        service = %auth.service_name,
        user_id = %user_id,
        feature = %feature.as_str(),
        "Processing consume request"
    );

    let outcome = consume(&state, user_id, &feature, amount, key).await?;
    Ok(Json(LedgerWriteResponse::from(&outcome)))
}

// ============================================================================
// Admin endpoints: grant and plan
// ============================================================================

/// Grant request.
#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    /// User receiving the tokens.
    pub user_id: String,
    /// Tokens to add.
    pub amount: i64,
    /// Reason shown in the ledger.
    pub reason: String,
    /// Optional idempotency key (a fresh one when absent).
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Grant tokens to a user.
pub async fn grant_tokens(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Json(body): Json<GrantRequest>,
) -> Result<Json<LedgerWriteResponse>, ApiError> {
    let user_id = parse_user_id(&body.user_id)?;
    if body.amount <= 0 {
        return Err(ApiError::BadRequest("amount must be positive".into()));
    }
    let key = match &body.idempotency_key {
        Some(key) => check_idempotency_key(key)?,
        None => format!("grant:{}", uuid::Uuid::new_v4()),
    };

    let request = LedgerRequest::grant(key, user_id, body.amount, body.reason.trim());
    let outcome = state.store.apply_ledger(&request).await?;

    tracing::info!(
        admin_id = %auth.admin_id,
        user_id = %user_id,
        amount = body.amount,
        balance = outcome.balance_after(),
        replayed = outcome.replayed,
        "Tokens granted"
    );

    Ok(Json(LedgerWriteResponse::from(&outcome)))
}

/// Plan change request.
#[derive(Debug, Deserialize)]
pub struct SetPlanRequest {
    /// User to change.
    pub user_id: String,
    /// New plan.
    pub plan: Plan,
}

/// Change a user's plan. The new allowance applies from the next reset.
pub async fn set_plan(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Json(body): Json<SetPlanRequest>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let user_id = parse_user_id(&body.user_id)?;
    let balance = state.store.set_plan(&user_id, body.plan).await?;

    tracing::info!(admin_id = %auth.admin_id, user_id = %user_id, plan = %body.plan, "Plan changed");

    Ok(Json(BalanceResponse::new(&balance, &state)))
}

// ============================================================================
// Monthly reset
// ============================================================================

/// Monthly reset request.
#[derive(Debug, Default, Deserialize)]
pub struct MonthlyResetRequest {
    /// `YYYY-MM` period to reset for (default: the current UTC month).
    #[serde(default)]
    pub period: Option<String>,
}

/// Monthly reset summary.
#[derive(Debug, Serialize)]
pub struct MonthlyResetResponse {
    /// Period reset for.
    pub period: String,
    /// Balances reset now.
    pub reset: usize,
    /// Balances already reset for this period.
    pub skipped: usize,
    /// Balances whose reset failed.
    pub failed: usize,
}

enum ResetResult {
    Reset,
    Skipped,
    Failed,
}

async fn reset_one(state: &AppState, balance: TokenBalance, period: &str) -> ResetResult {
    if !balance.needs_reset(period) {
        return ResetResult::Skipped;
    }

    let allowance = state.config.pricing.monthly_allowance(balance.plan);
    let request = LedgerRequest::monthly_reset(balance.user_id, allowance, period);
    match state.store.apply_ledger(&request).await {
        Ok(outcome) if outcome.replayed => ResetResult::Skipped,
        Ok(_) => ResetResult::Reset,
        Err(e) => {
            tracing::warn!(user_id = %balance.user_id, error = %e, "Monthly reset failed");
            ResetResult::Failed
        }
    }
}

/// Reset every balance to its plan allowance for a period.
///
/// Unused tokens do not roll over. Safe to re-run: each user's reset is keyed
/// by user and period.
pub async fn monthly_reset(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    body: Option<Json<MonthlyResetRequest>>,
) -> Result<Json<MonthlyResetResponse>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let period = match body.period {
        Some(p) => parse_period(&p)?,
        None => period_key(Utc::now()),
    };

    tracing::info!(service = %auth.service_name, period = %period, "Starting monthly reset");

    let mut summary = MonthlyResetResponse {
        period: period.clone(),
        reset: 0,
        skipped: 0,
        failed: 0,
    };

    let mut offset = 0;
    loop {
        let page = state
            .store
            .list_balances(MONTHLY_RESET_PAGE_SIZE, offset)
            .await?;
        let page_len = page.len();

        let results: Vec<ResetResult> = stream::iter(page)
            .map(|balance| reset_one(&state, balance, &period))
            .buffer_unordered(MONTHLY_RESET_PARALLELISM)
            .collect()
            .await;

        for result in results {
            match result {
                ResetResult::Reset => summary.reset += 1,
                ResetResult::Skipped => summary.skipped += 1,
                ResetResult::Failed => summary.failed += 1,
            }
        }

        if page_len < MONTHLY_RESET_PAGE_SIZE {
            break;
        }
        offset += page_len;
    }

    tracing::info!(
        period = %summary.period,
        reset = summary.reset,
        skipped = summary.skipped,
        failed = summary.failed,
        "Monthly reset finished"
    );

    Ok(Json(summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_names() {
        assert_eq!(parse_feature("transcription"), Feature::Transcription);
        assert_eq!(parse_feature("recipe_details"), Feature::RecipeDetails);
        assert_eq!(
            parse_feature("meal_plan"),
            Feature::Custom("meal_plan".into())
        );
    }
}
