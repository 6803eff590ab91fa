//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{
    activities, ai, bonus_rules, gamification, health, sessions, tokens, wearables,
};
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent requests for token endpoints.
/// Service callers check and consume on every metered request.
const TOKENS_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Maximum concurrent requests for AI endpoints, each holding an upstream call.
const AI_MAX_CONCURRENT_REQUESTS: usize = 20;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Sessions
/// - `POST /v1/sessions` - Exchange a JWT for a session (JWT bearer)
/// - `DELETE /v1/sessions` - Revoke all of the caller's sessions
/// - `GET /v1/sessions/current` - Describe the current session
/// - `DELETE /v1/sessions/current` - Sign out
/// - `POST /v1/sessions/current/csrf` - Rotate the CSRF token
///
/// ## Tokens
/// - `POST /v1/tokens/account` - Create the caller's balance
/// - `GET /v1/tokens/balance` - Current balance
/// - `GET /v1/tokens/ledger` - Ledger history
/// - `POST /v1/tokens/check` - Balance check (service key)
/// - `POST /v1/tokens/consume` - Atomic debit (service key)
/// - `POST /v1/tokens/monthly-reset` - Monthly allowance reset (service key)
/// - `POST /v1/tokens/grant` - Admin credit (admin key)
/// - `POST /v1/tokens/plan` - Change plan (admin key)
///
/// ## AI (metered)
/// - `POST /v1/ai/transcribe` - Audio transcription
/// - `POST /v1/ai/recipe-details` - Recipe ingredients, steps and nutrition
///
/// ## Gamification
/// - `POST /v1/activities`, `GET /v1/activities`
/// - `GET /v1/gamification/summary`
/// - `POST /v1/gamification/evaluate`
/// - `GET /v1/gamification/awards`
/// - `POST /v1/bonus-rules`, `GET /v1/bonus-rules`,
///   `DELETE /v1/bonus-rules/:id` (admin key)
///
/// ## Wearables
/// - `POST /v1/wearables/sync` - Pull workouts from the provider
/// - `POST /webhooks/wearables` - Signed provider webhook
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let token_routes = Router::new()
        .route("/account", post(tokens::create_account))
        .route("/balance", get(tokens::get_balance))
        .route("/ledger", get(tokens::list_ledger))
        .route("/check", post(tokens::check_balance))
        .route("/consume", post(tokens::consume_tokens))
        .route("/grant", post(tokens::grant_tokens))
        .route("/plan", post(tokens::set_plan))
        .route("/monthly-reset", post(tokens::monthly_reset))
        .layer(ConcurrencyLimitLayer::new(TOKENS_MAX_CONCURRENT_REQUESTS));

    let ai_routes = Router::new()
        .route("/transcribe", post(ai::transcribe))
        .route("/recipe-details", post(ai::recipe_details))
        .layer(ConcurrencyLimitLayer::new(AI_MAX_CONCURRENT_REQUESTS));

    let api_routes = Router::new()
        // Sessions
        .route(
            "/sessions",
            post(sessions::issue_session).delete(sessions::revoke_all_sessions),
        )
        .route(
            "/sessions/current",
            get(sessions::get_current_session).delete(sessions::revoke_current_session),
        )
        .route("/sessions/current/csrf", post(sessions::rotate_csrf))
        // Activities and gamification
        .route(
            "/activities",
            post(activities::log_activity).get(activities::list_activities),
        )
        .route("/gamification/summary", get(gamification::summary))
        .route("/gamification/evaluate", post(gamification::evaluate))
        .route("/gamification/awards", get(gamification::list_awards))
        .route(
            "/bonus-rules",
            post(bonus_rules::create_rule).get(bonus_rules::list_rules),
        )
        .route("/bonus-rules/:id", delete(bonus_rules::deactivate_rule))
        // Wearables
        .route("/wearables/sync", post(wearables::sync))
        // Groups with their own concurrency limits
        .nest("/tokens", token_routes)
        .nest("/ai", ai_routes)
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        // API v1 routes (rate limited)
        .nest("/v1", api_routes)
        // Webhooks (no rate limit - controlled by the provider)
        .route("/webhooks/wearables", post(wearables::webhook))
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // MAX_BODY_BYTES is the only body limit; axum's 2 MB extractor cap is off
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let cors = if origins.iter().any(|o| o == "*") {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new().allow_origin(origins)
    };
    cors.allow_methods(Any).allow_headers(Any)
}
