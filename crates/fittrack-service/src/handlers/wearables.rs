//! Wearable sync and webhook handlers.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fittrack_core::UserId;

use super::parse_user_id;
use crate::auth::AuthUser;
use crate::crypto::verify_signature;
use crate::error::ApiError;
use crate::state::AppState;
use crate::wearables::WearableWorkout;

/// Signature header on provider webhooks.
pub const SIGNATURE_HEADER: &str = "x-wearable-signature";

/// Longest accepted provider name.
const MAX_PROVIDER_LEN: usize = 50;

/// Import counts.
#[derive(Debug, Default, Serialize)]
pub struct ImportResponse {
    /// Workouts received from the provider.
    pub fetched: usize,
    /// New activity rows.
    pub imported: usize,
    /// Workouts already imported earlier.
    pub duplicates: usize,
    /// Workouts dropped (implausible or failed to store).
    pub skipped: usize,
}

fn check_provider(provider: &str) -> Result<&str, ApiError> {
    let provider = provider.trim();
    let valid = !provider.is_empty()
        && provider.len() <= MAX_PROVIDER_LEN
        && provider
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(provider)
    } else {
        Err(ApiError::BadRequest("Invalid provider".into()))
    }
}

/// Insert workouts as activity rows. Store failures on single items are
/// logged and counted as skipped.
async fn ingest(
    state: &AppState,
    user_id: UserId,
    provider: &str,
    workouts: &[WearableWorkout],
) -> ImportResponse {
    let mut counts = ImportResponse {
        fetched: workouts.len(),
        ..ImportResponse::default()
    };

    for workout in workouts {
        let Some(activity) = workout.to_activity(user_id, provider) else {
            tracing::debug!(provider, workout_id = %workout.id, "Skipping implausible workout");
            counts.skipped += 1;
            continue;
        };
        match state.store.insert_activity(&activity).await {
            Ok(true) => counts.imported += 1,
            Ok(false) => counts.duplicates += 1,
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    provider,
                    workout_id = %workout.id,
                    error = %e,
                    "Failed to store workout"
                );
                counts.skipped += 1;
            }
        }
    }

    counts
}

// ============================================================================
// Pull sync
// ============================================================================

/// Sync request.
#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    /// Provider name, used as the activity source.
    pub provider: String,
    /// The user's provider access token. Not stored.
    pub access_token: String,
    /// Only workouts since this instant.
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

/// Pull workouts from the provider API and import the new ones.
pub async fn sync(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<SyncRequest>,
) -> Result<Json<ImportResponse>, ApiError> {
    let provider = check_provider(&body.provider)?;
    if body.access_token.trim().is_empty() {
        return Err(ApiError::BadRequest("access_token is required".into()));
    }

    let client = state
        .wearables
        .as_deref()
        .ok_or_else(|| ApiError::ExternalService("Wearable provider not configured".into()))?;

    let workouts = client
        .fetch_workouts(body.access_token.trim(), body.since)
        .await
        .map_err(|e| {
            tracing::warn!(user_id = %auth.user_id, provider, error = %e, "Wearable fetch failed");
            ApiError::ExternalService("Wearable provider request failed".into())
        })?;

    let counts = ingest(&state, auth.user_id, provider, &workouts).await;

    tracing::info!(
        user_id = %auth.user_id,
        provider,
        fetched = counts.fetched,
        imported = counts.imported,
        duplicates = counts.duplicates,
        "Wearable sync complete"
    );

    Ok(Json(counts))
}

// ============================================================================
// Webhook
// ============================================================================

/// Provider webhook payload.
#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    /// Target user.
    pub user_id: String,
    /// Provider name.
    pub provider: String,
    /// Pushed workouts.
    #[serde(default)]
    pub workouts: Vec<WearableWorkout>,
}

/// Ingest a signed provider webhook.
///
/// The signature covers the raw body, so the payload is parsed only after
/// verification.
pub async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ImportResponse>, ApiError> {
    let secret = state
        .config
        .wearable_webhook_secret
        .as_deref()
        .ok_or(ApiError::Unauthorized)?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    if !verify_signature(secret, &body, signature) {
        tracing::warn!("Invalid wearable webhook signature");
        return Err(ApiError::Unauthorized);
    }

    let payload: WebhookPayload = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid webhook payload: {e}")))?;
    let user_id = parse_user_id(&payload.user_id)?;
    let provider = check_provider(&payload.provider)?;

    let counts = ingest(&state, user_id, provider, &payload.workouts).await;

    tracing::info!(
        user_id = %user_id,
        provider,
        imported = counts.imported,
        duplicates = counts.duplicates,
        skipped = counts.skipped,
        "Wearable webhook processed"
    );

    Ok(Json(counts))
}
