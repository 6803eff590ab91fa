//! Metered AI handlers: audio transcription and recipe details.
//!
//! Each call checks the balance, calls OpenAI, then consumes tokens
//! atomically. A failed upstream call charges nothing; a debit that fails
//! after the call discards the result. A retried idempotency key skips the
//! balance check and is charged only once.

use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use fittrack_core::{recipe_cache_key, Feature, LedgerOutcome, RecipeDetails};

use super::request_idempotency_key;
use super::tokens::{consume, require_balance, require_balance_unless_charged};
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::openai::{AudioUpload, OpenAiClient, RecipePrompt};
use crate::state::AppState;

/// Longest accepted recipe name.
const MAX_RECIPE_NAME_LEN: usize = 200;

/// Longest accepted dietary notes.
const MAX_DIETARY_NOTES_LEN: usize = 500;

/// Servings used when the request does not say.
const DEFAULT_SERVINGS: u32 = 2;

/// Most servings a recipe can be generated for.
const MAX_SERVINGS: u32 = 24;

fn openai(state: &AppState) -> Result<&OpenAiClient, ApiError> {
    state
        .openai
        .as_deref()
        .ok_or_else(|| ApiError::ExternalService("OpenAI not configured".into()))
}

/// Tokens this request charged; a replay charged nothing now.
fn tokens_charged(outcome: &LedgerOutcome) -> i64 {
    if outcome.replayed {
        0
    } else {
        -outcome.entry.delta
    }
}

// ============================================================================
// Transcription
// ============================================================================

/// Transcription response.
#[derive(Debug, Serialize)]
pub struct TranscriptionResponse {
    /// Transcribed text.
    pub text: String,
    /// Detected or requested language.
    pub language: Option<String>,
    /// Audio duration in seconds.
    pub duration_seconds: Option<f64>,
    /// Tokens charged by this request.
    pub tokens_charged: i64,
    /// Balance after the charge.
    pub balance: i64,
    /// Whether the idempotency key had already been charged.
    pub replayed: bool,
}

/// Transcribe an uploaded audio file (`file` field, optional `language`).
pub async fn transcribe(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<TranscriptionResponse>, ApiError> {
    let key = request_idempotency_key(&headers, "transcription", auth.user_id)?;

    let mut audio = None;
    let mut language = None;
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or("audio.webm").to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await?;
                audio = Some(AudioUpload {
                    bytes: bytes.to_vec(),
                    file_name,
                    content_type,
                });
            }
            Some("language") => {
                let text = field.text().await?;
                let text = text.trim();
                if !text.is_empty() {
                    language = Some(text.to_string());
                }
            }
            _ => {}
        }
    }

    let audio = audio.ok_or_else(|| ApiError::BadRequest("missing `file` field".into()))?;
    if audio.bytes.is_empty() {
        return Err(ApiError::BadRequest("audio file is empty".into()));
    }

    let cost = state.config.pricing.transcription_cost;
    require_balance_unless_charged(&state, &auth.user_id, cost, &key).await?;
    let client = openai(&state)?;

    let size = audio.bytes.len();
    let transcription = client
        .transcribe(audio, language.as_deref())
        .await
        .map_err(|e| {
            tracing::warn!(user_id = %auth.user_id, error = %e, "Transcription failed");
            ApiError::ExternalService("Transcription failed".into())
        })?;

    let outcome = consume(&state, auth.user_id, &Feature::Transcription, cost, key).await?;

    tracing::info!(user_id = %auth.user_id, bytes = size, "Audio transcribed");

    Ok(Json(TranscriptionResponse {
        text: transcription.text,
        language: transcription.language.or(language),
        duration_seconds: transcription.duration_seconds,
        tokens_charged: tokens_charged(&outcome),
        balance: outcome.balance_after(),
        replayed: outcome.replayed,
    }))
}

// ============================================================================
// Recipe details
// ============================================================================

/// Recipe details request.
#[derive(Debug, Deserialize)]
pub struct RecipeRequest {
    /// Dish name.
    pub recipe_name: String,
    /// Number of servings (default: 2).
    #[serde(default)]
    pub servings: Option<u32>,
    /// Dietary constraints.
    #[serde(default)]
    pub dietary_notes: Option<String>,
}

/// Recipe details response.
#[derive(Debug, Serialize)]
pub struct RecipeResponse {
    /// Generated or cached recipe.
    pub recipe: RecipeDetails,
    /// Whether the recipe came from the cache.
    pub cached: bool,
    /// Tokens charged by this request.
    pub tokens_charged: i64,
    /// Balance after the charge.
    pub balance: i64,
}

/// Generate (or fetch cached) recipe ingredients, steps and nutrition.
pub async fn recipe_details(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(body): Json<RecipeRequest>,
) -> Result<Json<RecipeResponse>, ApiError> {
    let recipe_name = body.recipe_name.trim();
    if recipe_name.is_empty() || recipe_name.len() > MAX_RECIPE_NAME_LEN {
        return Err(ApiError::BadRequest(format!(
            "recipe_name must be 1-{MAX_RECIPE_NAME_LEN} characters"
        )));
    }
    let servings = body.servings.unwrap_or(DEFAULT_SERVINGS);
    if servings == 0 || servings > MAX_SERVINGS {
        return Err(ApiError::BadRequest(format!(
            "servings must be between 1 and {MAX_SERVINGS}"
        )));
    }
    let dietary_notes = body
        .dietary_notes
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());
    if dietary_notes.is_some_and(|n| n.len() > MAX_DIETARY_NOTES_LEN) {
        return Err(ApiError::BadRequest(format!(
            "dietary_notes must be at most {MAX_DIETARY_NOTES_LEN} characters"
        )));
    }

    let cache_key = recipe_cache_key(recipe_name, servings, dietary_notes);

    let cached = match state.store.get_cached_recipe(&cache_key).await {
        Ok(cached) => cached,
        Err(e) => {
            tracing::warn!(cache_key = %cache_key, error = %e, "Recipe cache read failed");
            None
        }
    };
    if let Some(recipe) = cached {
        let balance = require_balance(&state, &auth.user_id, 0).await?;
        tracing::debug!(user_id = %auth.user_id, cache_key = %cache_key, "Recipe cache hit");
        return Ok(Json(RecipeResponse {
            recipe,
            cached: true,
            tokens_charged: 0,
            balance: balance.balance,
        }));
    }

    let key = request_idempotency_key(&headers, "recipe_details", auth.user_id)?;
    let cost = state.config.pricing.recipe_details_cost;
    require_balance_unless_charged(&state, &auth.user_id, cost, &key).await?;
    let client = openai(&state)?;

    let prompt = RecipePrompt {
        recipe_name,
        servings,
        dietary_notes,
    };
    let recipe = client.recipe_details(&prompt).await.map_err(|e| {
        tracing::warn!(user_id = %auth.user_id, error = %e, "Recipe generation failed");
        ApiError::ExternalService("Recipe generation failed".into())
    })?;

    let outcome = consume(&state, auth.user_id, &Feature::RecipeDetails, cost, key).await?;

    if let Err(e) = state.store.put_cached_recipe(&cache_key, &recipe).await {
        tracing::warn!(cache_key = %cache_key, error = %e, "Recipe cache write failed");
    }

    Ok(Json(RecipeResponse {
        recipe,
        cached: false,
        tokens_charged: tokens_charged(&outcome),
        balance: outcome.balance_after(),
    }))
}
