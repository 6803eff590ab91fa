//! Authentication extractors.
//!
//! This module provides extractors for:
//! - `BearerAuth` - End-user authentication via HS256 JWT only
//! - `SessionAuth` - Server-side session token (+ CSRF on non-safe methods)
//! - `AuthUser` - Either of the above
//! - `ServiceAuth` - Service-to-service authentication via API key
//! - `AdminAuth` - Admin authentication for privileged endpoints

use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, Method};
use chrono::Utc;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use fittrack_core::{Session, SessionId, UserId};

use crate::crypto::{constant_time_eq, sha256_hex};
use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the session token.
pub const SESSION_HEADER: &str = "x-session-token";

/// Cookie carrying the session token.
pub const SESSION_COOKIE: &str = "fittrack_session";

/// Header carrying the CSRF token.
pub const CSRF_HEADER: &str = "x-csrf-token";

/// JWT claims issued by the auth backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user ID).
    pub sub: String,
    /// Expiration time.
    pub exp: i64,
    /// Issued at.
    #[serde(default)]
    pub iat: Option<i64>,
    /// Audience (string or array).
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
}

/// How a request was authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// JWT bearer token.
    Bearer,
    /// Server-side session.
    Session(SessionId),
}

/// An authenticated end user.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The user ID.
    pub user_id: UserId,
    /// How the user was authenticated.
    pub method: AuthMethod,
}

/// A user authenticated with a JWT bearer token.
#[derive(Debug, Clone)]
pub struct BearerAuth {
    /// The user ID.
    pub user_id: UserId,
}

/// A request authenticated with an active session.
#[derive(Debug, Clone)]
pub struct SessionAuth {
    /// The validated session.
    pub session: Session,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for BearerAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(ApiError::Unauthorized)?;
        let user_id = validate_bearer(token, state)?;
        Ok(Self { user_id })
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for SessionAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = session_token(parts).ok_or(ApiError::Unauthorized)?;
        let session = validate_session(&token, state).await?;
        if !is_safe_method(&parts.method) {
            validate_csrf(&session, parts)?;
        }
        Ok(Self { session })
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if let Some(token) = bearer_token(parts) {
            let user_id = validate_bearer(token, state)?;
            return Ok(Self {
                user_id,
                method: AuthMethod::Bearer,
            });
        }

        let SessionAuth { session } = SessionAuth::from_request_parts(parts, state).await?;
        Ok(Self {
            user_id: session.user_id,
            method: AuthMethod::Session(session.id),
        })
    }
}

/// Service authentication via API key.
///
/// Used by the cron caller (monthly reset) and other backend services.
#[derive(Debug, Clone)]
pub struct ServiceAuth {
    /// The service name or identifier.
    pub service_name: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for ServiceAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let api_key = header_str(parts, "x-api-key").ok_or(ApiError::Unauthorized)?;

        let expected_key = state
            .config
            .service_api_key
            .as_ref()
            .ok_or(ApiError::Unauthorized)?;

        if !constant_time_eq(api_key, expected_key) {
            return Err(ApiError::Unauthorized);
        }

        let service_name = header_str(parts, "x-service-name")
            .unwrap_or("unknown")
            .to_string();

        Ok(Self { service_name })
    }
}

/// Admin authentication via the `X-Admin-Key` header.
#[derive(Debug, Clone)]
pub struct AdminAuth {
    /// Admin identifier (for audit logging).
    pub admin_id: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let admin_key = header_str(parts, "x-admin-key").ok_or(ApiError::Unauthorized)?;

        let expected_key = state
            .config
            .admin_api_key
            .as_ref()
            .ok_or(ApiError::Unauthorized)?;

        if !constant_time_eq(admin_key, expected_key) {
            return Err(ApiError::Unauthorized);
        }

        let admin_id = header_str(parts, "x-admin-id")
            .unwrap_or("admin")
            .to_string();

        tracing::info!(admin_id = %admin_id, "Admin authenticated");

        Ok(Self { admin_id })
    }
}

// ============================================================================
// Validation
// ============================================================================

fn header_str<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    header_str(parts, header::AUTHORIZATION.as_str())?.strip_prefix("Bearer ")
}

/// Session token from the `x-session-token` header or the session cookie.
fn session_token(parts: &Parts) -> Option<String> {
    if let Some(token) = header_str(parts, SESSION_HEADER) {
        return Some(token.trim().to_string());
    }

    parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}

fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Validate a bearer token and return its user.
fn validate_bearer(token: &str, state: &AppState) -> Result<UserId, ApiError> {
    // Allow test tokens in testing only.
    // Gated behind #[cfg(test)] or the "test-auth" feature so it is never
    // active in production builds.
    #[cfg(any(test, feature = "test-auth"))]
    if let Some(user_id_str) = token.strip_prefix("test-token:") {
        return user_id_str
            .parse::<UserId>()
            .map_err(|_| ApiError::Unauthorized);
    }

    let claims = validate_jwt(token, state)?;
    claims
        .sub
        .parse::<UserId>()
        .map_err(|_| ApiError::Unauthorized)
}

/// Validate an HS256 JWT signed with the shared auth secret.
fn validate_jwt(token: &str, state: &AppState) -> Result<JwtClaims, ApiError> {
    let secret = state.config.auth_jwt_secret.as_ref().ok_or_else(|| {
        tracing::warn!("JWT presented but AUTH_JWT_SECRET is not configured");
        ApiError::Unauthorized
    })?;

    let mut validation = Validation::new(Algorithm::HS256);
    match &state.config.auth_audience {
        Some(audience) => validation.set_audience(&[audience]),
        None => validation.validate_aud = false,
    }

    let token_data = decode::<JwtClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| {
        tracing::debug!(error = %e, "JWT validation failed");
        ApiError::Unauthorized
    })?;

    Ok(token_data.claims)
}

/// Look up a session by token; it must exist, be unrevoked and unexpired.
pub async fn validate_session(token: &str, state: &AppState) -> Result<Session, ApiError> {
    if token.is_empty() {
        return Err(ApiError::Unauthorized);
    }

    let session = state
        .store
        .get_session_by_token_hash(&sha256_hex(token))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    if !session.is_active(Utc::now()) {
        tracing::debug!(session_id = %session.id, "Rejected inactive session");
        return Err(ApiError::Unauthorized);
    }

    Ok(session)
}

/// The `x-csrf-token` header must hash to the session's CSRF hash.
fn validate_csrf(session: &Session, parts: &Parts) -> Result<(), ApiError> {
    let provided = header_str(parts, CSRF_HEADER).ok_or(ApiError::CsrfRejected)?;
    if constant_time_eq(&sha256_hex(provided), &session.csrf_hash) {
        Ok(())
    } else {
        tracing::debug!(session_id = %session.id, "CSRF token mismatch");
        Err(ApiError::CsrfRejected)
    }
}
