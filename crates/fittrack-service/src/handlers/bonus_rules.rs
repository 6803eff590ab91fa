//! Admin handlers for bonus rules.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use fittrack_core::{BonusMetric, BonusPeriod, BonusRule, BonusRuleId};

use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Longest accepted rule name.
const MAX_RULE_NAME_LEN: usize = 100;

/// Create rule request.
#[derive(Debug, Deserialize)]
pub struct CreateRuleRequest {
    /// Display name.
    pub name: String,
    /// Payout period.
    pub period: BonusPeriod,
    /// Measured quantity.
    pub metric: BonusMetric,
    /// Value the metric must reach.
    pub threshold: f64,
    /// Tokens credited on award.
    #[serde(default)]
    pub reward_tokens: i64,
    /// XP added on award.
    #[serde(default)]
    pub reward_xp: i64,
}

/// Rule list response.
#[derive(Debug, Serialize)]
pub struct RulesResponse {
    /// Rules, oldest first.
    pub rules: Vec<BonusRule>,
}

/// Create a bonus rule.
pub async fn create_rule(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Json(body): Json<CreateRuleRequest>,
) -> Result<(StatusCode, Json<BonusRule>), ApiError> {
    let name = body.name.trim();
    if name.is_empty() || name.len() > MAX_RULE_NAME_LEN {
        return Err(ApiError::BadRequest(format!(
            "name must be 1-{MAX_RULE_NAME_LEN} characters"
        )));
    }

    let rule = BonusRule {
        id: BonusRuleId::generate(),
        name: name.to_string(),
        period: body.period,
        metric: body.metric,
        threshold: body.threshold,
        reward_tokens: body.reward_tokens,
        reward_xp: body.reward_xp,
        active: true,
        created_at: Utc::now(),
    };
    rule.validate()?;
    state.store.put_bonus_rule(&rule).await?;

    tracing::info!(admin_id = %auth.admin_id, rule_id = %rule.id, name = %rule.name, "Bonus rule created");

    Ok((StatusCode::CREATED, Json(rule)))
}

/// List all bonus rules.
pub async fn list_rules(
    State(state): State<Arc<AppState>>,
    _auth: AdminAuth,
) -> Result<Json<RulesResponse>, ApiError> {
    let rules = state.store.list_bonus_rules().await?;
    Ok(Json(RulesResponse { rules }))
}

/// Deactivate a rule. Past awards stay as history.
pub async fn deactivate_rule(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Path(rule_id): Path<String>,
) -> Result<Json<BonusRule>, ApiError> {
    let rule_id: BonusRuleId = rule_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid rule ID".into()))?;
    let rule = state.store.set_bonus_rule_active(&rule_id, false).await?;

    tracing::info!(admin_id = %auth.admin_id, rule_id = %rule_id, "Bonus rule deactivated");

    Ok(Json(rule))
}
