//! Gamification handlers: XP summary, bonus evaluation and award history.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fittrack_core::{
    activity_stats, due_awards, level_for_xp, total_xp, ActivityStats, BonusAward, LevelProgress,
    UserId,
};

use super::tokens::LedgerEntryResponse;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Default statistics window in days.
const DEFAULT_STATS_DAYS: u32 = 30;

/// Award in API format.
#[derive(Debug, Serialize)]
pub struct AwardResponse {
    /// Award ID.
    pub id: String,
    /// Rule ID.
    pub rule_id: String,
    /// Rule name at award time.
    pub rule_name: String,
    /// First day of the awarded period.
    pub period_start: String,
    /// Tokens credited.
    pub reward_tokens: i64,
    /// XP added.
    pub reward_xp: i64,
    /// When it was awarded.
    pub awarded_at: String,
}

impl From<&BonusAward> for AwardResponse {
    fn from(award: &BonusAward) -> Self {
        Self {
            id: award.id.to_string(),
            rule_id: award.rule_id.to_string(),
            rule_name: award.rule_name.clone(),
            period_start: award.period_start.to_string(),
            reward_tokens: award.reward_tokens,
            reward_xp: award.reward_xp,
            awarded_at: award.awarded_at.to_rfc3339(),
        }
    }
}

/// Summary query parameters.
#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    /// Statistics window in days (default: 30).
    #[serde(default)]
    pub days: Option<u32>,
}

/// Gamification summary.
#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    /// Level and XP progress.
    pub level: LevelProgress,
    /// Window statistics.
    pub stats: ActivityStats,
    /// Number of awards ever received.
    pub awards_count: usize,
}

/// XP, level and statistics for the caller.
pub async fn summary(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<SummaryResponse>, ApiError> {
    let now = Utc::now();
    let activities = state
        .store
        .list_activities(&auth.user_id, DateTime::<Utc>::UNIX_EPOCH)
        .await?;
    let awards = state.store.list_awards(&auth.user_id).await?;

    let level = level_for_xp(total_xp(&activities, &awards));
    let stats = activity_stats(&activities, now, query.days.unwrap_or(DEFAULT_STATS_DAYS));

    Ok(Json(SummaryResponse {
        level,
        stats,
        awards_count: awards.len(),
    }))
}

/// A newly granted award.
#[derive(Debug, Serialize)]
pub struct GrantedAward {
    /// The award.
    pub award: AwardResponse,
    /// Ledger credit for its tokens, if any.
    pub ledger_entry: Option<LedgerEntryResponse>,
}

/// Evaluation result.
#[derive(Debug, Serialize)]
pub struct EvaluateResponse {
    /// Awards granted by this evaluation.
    pub awarded: Vec<GrantedAward>,
    /// Active rules evaluated.
    pub rules_evaluated: usize,
    /// Due awards that could not be recorded.
    pub failed: usize,
}

/// Evaluate every active bonus rule for `user_id` at `now` and record the
/// awards that are due.
pub(crate) async fn evaluate_bonuses(
    state: &AppState,
    user_id: UserId,
    now: DateTime<Utc>,
) -> Result<EvaluateResponse, ApiError> {
    let rules: Vec<_> = state
        .store
        .list_bonus_rules()
        .await?
        .into_iter()
        .filter(|r| r.active)
        .collect();

    let Some(since) = rules.iter().map(|r| r.period.window(now).0).min() else {
        return Ok(EvaluateResponse {
            awarded: Vec::new(),
            rules_evaluated: 0,
            failed: 0,
        });
    };

    let activities = state.store.list_activities(&user_id, since).await?;
    let existing = state.store.list_awards(&user_id).await?;

    let mut awarded = Vec::new();
    let mut failed = 0;
    for award in due_awards(user_id, &rules, &activities, &existing, now) {
        let outcome = match state.store.record_award(&award).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    rule = %award.rule_name,
                    error = %e,
                    "Failed to record bonus award"
                );
                failed += 1;
                continue;
            }
        };
        if outcome.replayed {
            continue;
        }
        tracing::info!(
            user_id = %user_id,
            rule = %outcome.award.rule_name,
            period_start = %outcome.award.period_start,
            reward_tokens = outcome.award.reward_tokens,
            "Bonus awarded"
        );
        awarded.push(GrantedAward {
            award: AwardResponse::from(&outcome.award),
            ledger_entry: outcome.entry.as_ref().map(LedgerEntryResponse::from),
        });
    }

    Ok(EvaluateResponse {
        awarded,
        rules_evaluated: rules.len(),
        failed,
    })
}

/// Evaluate bonus rules for the caller.
pub async fn evaluate(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<EvaluateResponse>, ApiError> {
    let result = evaluate_bonuses(&state, auth.user_id, Utc::now()).await?;
    Ok(Json(result))
}

/// Award history response.
#[derive(Debug, Serialize)]
pub struct AwardsResponse {
    /// Awards, newest first.
    pub awards: Vec<AwardResponse>,
}

/// List the caller's awards.
pub async fn list_awards(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<AwardsResponse>, ApiError> {
    let awards = state.store.list_awards(&auth.user_id).await?;
    Ok(Json(AwardsResponse {
        awards: awards.iter().map(AwardResponse::from).collect(),
    }))
}
