//! API handlers.

use axum::http::HeaderMap;
use serde::Deserialize;

use fittrack_core::UserId;

use crate::error::ApiError;

pub mod activities;
pub mod ai;
pub mod bonus_rules;
pub mod gamification;
pub mod health;
pub mod sessions;
pub mod tokens;
pub mod wearables;

/// Header a caller may use to make a metered request at-most-once.
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

/// Longest accepted idempotency key.
const MAX_IDEMPOTENCY_KEY_LEN: usize = 200;

/// Largest page a list endpoint returns.
pub const MAX_PAGE_SIZE: usize = 100;

/// Pagination query parameters.
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    /// Maximum number of items to return (default: 50, at most 100).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

/// Parse a user ID from a request body field.
pub(crate) fn parse_user_id(raw: &str) -> Result<UserId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest("Invalid user ID".into()))
}

/// Validate a caller-supplied idempotency key.
pub(crate) fn check_idempotency_key(key: &str) -> Result<String, ApiError> {
    let key = key.trim();
    if key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(ApiError::BadRequest(format!(
            "idempotency key must be 1-{MAX_IDEMPOTENCY_KEY_LEN} characters"
        )));
    }
    Ok(key.to_string())
}

/// Idempotency key for a metered request, scoped to `scope` and the user.
///
/// A missing header yields a fresh key, so the request is charged once.
pub(crate) fn request_idempotency_key(
    headers: &HeaderMap,
    scope: &str,
    user_id: UserId,
) -> Result<String, ApiError> {
    match headers.get(IDEMPOTENCY_HEADER) {
        Some(value) => {
            let raw = value
                .to_str()
                .map_err(|_| ApiError::BadRequest("idempotency key must be ASCII".into()))?;
            let key = check_idempotency_key(raw)?;
            Ok(format!("{scope}:{user_id}:{key}"))
        }
        None => Ok(format!("{scope}:{user_id}:{}", uuid::Uuid::new_v4())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn header_key_is_scoped_to_user() {
        let user = UserId::generate();
        let mut headers = HeaderMap::new();
        headers.insert(IDEMPOTENCY_HEADER, HeaderValue::from_static("abc"));
        let key = request_idempotency_key(&headers, "transcribe", user).unwrap();
        assert_eq!(key, format!("transcribe:{user}:abc"));
    }

    #[test]
    fn missing_header_yields_fresh_keys() {
        let user = UserId::generate();
        let headers = HeaderMap::new();
        let a = request_idempotency_key(&headers, "recipe", user).unwrap();
        let b = request_idempotency_key(&headers, "recipe", user).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn blank_keys_are_rejected() {
        assert!(check_idempotency_key("   ").is_err());
        assert!(check_idempotency_key(&"k".repeat(201)).is_err());
    }
}
