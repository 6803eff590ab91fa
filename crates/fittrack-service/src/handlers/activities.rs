//! Activity logging handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use fittrack_core::{xp_for_activity, Activity, ActivityKind};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// How far in the future a manual `recorded_at` may lie (clock skew).
const MAX_FUTURE_SKEW_MINUTES: i64 = 10;

/// Largest accepted activity value, in the kind's unit.
const MAX_ACTIVITY_VALUE: f64 = 100_000.0;

/// Default listing window in days.
const DEFAULT_LIST_DAYS: u32 = 30;

/// Longest listing window in days.
const MAX_LIST_DAYS: u32 = 366;

/// Activity in API format.
#[derive(Debug, Serialize)]
pub struct ActivityResponse {
    /// Activity ID.
    pub id: String,
    /// Kind.
    pub kind: ActivityKind,
    /// Value.
    pub value: f64,
    /// Unit of `value`.
    pub unit: &'static str,
    /// `manual` or provider name.
    pub source: String,
    /// When the activity happened.
    pub recorded_at: String,
    /// XP the activity earns.
    pub xp: i64,
}

impl From<&Activity> for ActivityResponse {
    fn from(activity: &Activity) -> Self {
        Self {
            id: activity.id.to_string(),
            kind: activity.kind,
            value: activity.value,
            unit: activity.kind.unit(),
            source: activity.source.clone(),
            recorded_at: activity.recorded_at.to_rfc3339(),
            xp: xp_for_activity(activity),
        }
    }
}

/// Log activity request.
#[derive(Debug, Deserialize)]
pub struct LogActivityRequest {
    /// Kind.
    pub kind: ActivityKind,
    /// Value in the kind's unit.
    pub value: f64,
    /// When it happened (default: now).
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
}

/// Log a manual activity.
pub async fn log_activity(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<LogActivityRequest>,
) -> Result<(StatusCode, Json<ActivityResponse>), ApiError> {
    if !body.value.is_finite() || body.value <= 0.0 || body.value > MAX_ACTIVITY_VALUE {
        return Err(ApiError::BadRequest(format!(
            "value must be a positive number up to {MAX_ACTIVITY_VALUE}"
        )));
    }

    let now = Utc::now();
    let recorded_at = body.recorded_at.unwrap_or(now);
    if recorded_at > now + Duration::minutes(MAX_FUTURE_SKEW_MINUTES) {
        return Err(ApiError::BadRequest(
            "recorded_at must not be in the future".into(),
        ));
    }

    let activity = Activity::manual(auth.user_id, body.kind, body.value, recorded_at);
    state.store.insert_activity(&activity).await?;

    tracing::debug!(
        user_id = %auth.user_id,
        kind = %activity.kind,
        value = activity.value,
        "Activity logged"
    );

    Ok((StatusCode::CREATED, Json(ActivityResponse::from(&activity))))
}

/// List activities query parameters.
#[derive(Debug, Deserialize)]
pub struct ListActivitiesQuery {
    /// Days to look back (default: 30).
    #[serde(default)]
    pub days: Option<u32>,
    /// Only this kind.
    #[serde(default)]
    pub kind: Option<ActivityKind>,
}

/// List activities response.
#[derive(Debug, Serialize)]
pub struct ListActivitiesResponse {
    /// Activities, newest first.
    pub activities: Vec<ActivityResponse>,
}

/// List the caller's recent activities.
pub async fn list_activities(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListActivitiesQuery>,
) -> Result<Json<ListActivitiesResponse>, ApiError> {
    let days = query.days.unwrap_or(DEFAULT_LIST_DAYS).clamp(1, MAX_LIST_DAYS);
    let since = Utc::now() - Duration::days(i64::from(days));

    let rows = state.store.list_activities(&auth.user_id, since).await?;
    let activities = rows
        .iter()
        .rev()
        .filter(|a| query.kind.map_or(true, |k| a.kind == k))
        .map(ActivityResponse::from)
        .collect();

    Ok(Json(ListActivitiesResponse { activities }))
}
