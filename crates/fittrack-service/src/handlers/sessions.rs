//! Session handlers.
//!
//! A JWT holder exchanges the bearer token for a server-side session. The
//! session token and CSRF token are returned once; only their SHA-256 hashes
//! are stored.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{AppendHeaders, IntoResponse};
use axum::Json;
use chrono::{Duration, Utc};
use serde::Serialize;

use fittrack_core::{Session, SessionId};

use crate::auth::{AuthUser, BearerAuth, SessionAuth, SESSION_COOKIE};
use crate::crypto::{random_token, sha256_hex};
use crate::error::ApiError;
use crate::state::AppState;

/// Longest stored user agent.
const MAX_USER_AGENT_LEN: usize = 256;

/// Newly issued session. The tokens are not retrievable later.
#[derive(Debug, Serialize)]
pub struct IssuedSessionResponse {
    /// Session ID.
    pub session_id: String,
    /// Session token (also set as the session cookie).
    pub session_token: String,
    /// CSRF token to send in `x-csrf-token` on non-safe requests.
    pub csrf_token: String,
    /// Expiry.
    pub expires_at: String,
}

/// Session details.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    /// Session ID.
    pub session_id: String,
    /// Owner.
    pub user_id: String,
    /// User agent seen at issuance.
    pub user_agent: Option<String>,
    /// Issued at.
    pub created_at: String,
    /// Expiry.
    pub expires_at: String,
}

impl From<&Session> for SessionResponse {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id.to_string(),
            user_id: session.user_id.to_string(),
            user_agent: session.user_agent.clone(),
            created_at: session.created_at.to_rfc3339(),
            expires_at: session.expires_at.to_rfc3339(),
        }
    }
}

fn session_cookie(token: &str, max_age_seconds: i64) -> String {
    format!(
        "{SESSION_COOKIE}={token}; Path=/; HttpOnly; Secure; SameSite=Lax; Max-Age={max_age_seconds}"
    )
}

/// Issue a session for a JWT-authenticated user.
pub async fn issue_session(
    State(state): State<Arc<AppState>>,
    auth: BearerAuth,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let now = Utc::now();
    let ttl = Duration::hours(state.config.session_ttl_hours.max(1));

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|ua| ua.chars().take(MAX_USER_AGENT_LEN).collect::<String>());

    let session_token = random_token();
    let csrf_token = random_token();
    let session = Session {
        id: SessionId::generate(),
        user_id: auth.user_id,
        token_hash: sha256_hex(&session_token),
        csrf_hash: sha256_hex(&csrf_token),
        user_agent,
        created_at: now,
        expires_at: now + ttl,
        revoked_at: None,
    };
    state.store.put_session(&session).await?;

    tracing::info!(
        user_id = %auth.user_id,
        session_id = %session.id,
        expires_at = %session.expires_at,
        "Session issued"
    );

    let cookie = session_cookie(&session_token, ttl.num_seconds());
    let body = IssuedSessionResponse {
        session_id: session.id.to_string(),
        session_token,
        csrf_token,
        expires_at: session.expires_at.to_rfc3339(),
    };

    Ok((
        StatusCode::CREATED,
        AppendHeaders([(header::SET_COOKIE, cookie)]),
        Json(body),
    ))
}

/// Describe the current session.
pub async fn get_current_session(auth: SessionAuth) -> Json<SessionResponse> {
    Json(SessionResponse::from(&auth.session))
}

/// Revoke the current session (sign out).
pub async fn revoke_current_session(
    State(state): State<Arc<AppState>>,
    auth: SessionAuth,
) -> Result<impl IntoResponse, ApiError> {
    state
        .store
        .revoke_session(&auth.session.id, Utc::now())
        .await?;

    tracing::info!(session_id = %auth.session.id, "Session revoked");

    Ok((
        StatusCode::NO_CONTENT,
        AppendHeaders([(header::SET_COOKIE, session_cookie("", 0))]),
    ))
}

/// Rotated CSRF token.
#[derive(Debug, Serialize)]
pub struct CsrfResponse {
    /// The new CSRF token; the previous one stops working.
    pub csrf_token: String,
}

/// Replace the current session's CSRF token.
pub async fn rotate_csrf(
    State(state): State<Arc<AppState>>,
    auth: SessionAuth,
) -> Result<Json<CsrfResponse>, ApiError> {
    let csrf_token = random_token();
    state
        .store
        .update_csrf_hash(&auth.session.id, &sha256_hex(&csrf_token))
        .await?;

    tracing::debug!(session_id = %auth.session.id, "CSRF token rotated");

    Ok(Json(CsrfResponse { csrf_token }))
}

/// Revocation summary.
#[derive(Debug, Serialize)]
pub struct RevokeAllResponse {
    /// Sessions revoked.
    pub revoked: u64,
}

/// Revoke every session of the caller.
pub async fn revoke_all_sessions(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<RevokeAllResponse>, ApiError> {
    let revoked = state
        .store
        .revoke_user_sessions(&auth.user_id, Utc::now())
        .await?;

    tracing::info!(user_id = %auth.user_id, revoked, "All sessions revoked");

    Ok(Json(RevokeAllResponse { revoked }))
}

/// Delete expired and revoked sessions. Run periodically from `main`.
pub async fn purge_expired_sessions(state: &AppState) {
    match state.store.purge_sessions(Utc::now()).await {
        Ok(0) => {}
        Ok(purged) => tracing::info!(purged, "Purged expired sessions"),
        Err(e) => tracing::warn!(error = %e, "Session purge failed"),
    }
}
