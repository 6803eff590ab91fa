//! Server-side sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{SessionId, UserId};

/// A browser session issued after JWT sign-in.
///
/// Only SHA-256 hashes of the session and CSRF tokens are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Session identifier.
    pub id: SessionId,
    /// Owner.
    pub user_id: UserId,
    /// Hex SHA-256 of the session token.
    pub token_hash: String,
    /// Hex SHA-256 of the current CSRF token.
    pub csrf_hash: String,
    /// User agent seen at issuance.
    pub user_agent: Option<String>,
    /// When the session was issued.
    pub created_at: DateTime<Utc>,
    /// Hard expiry.
    pub expires_at: DateTime<Utc>,
    /// Set once the session is revoked.
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Whether `now` is past the expiry.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Neither revoked nor expired.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && !self.is_expired(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(expires_in: Duration) -> Session {
        let now = Utc::now();
        Session {
            id: SessionId::generate(),
            user_id: UserId::generate(),
            token_hash: "t".into(),
            csrf_hash: "c".into(),
            user_agent: None,
            created_at: now,
            expires_at: now + expires_in,
            revoked_at: None,
        }
    }

    #[test]
    fn fresh_session_is_active() {
        assert!(session(Duration::hours(1)).is_active(Utc::now()));
    }

    #[test]
    fn expired_session_is_inactive() {
        let s = session(Duration::seconds(-1));
        assert!(s.is_expired(Utc::now()));
        assert!(!s.is_active(Utc::now()));
    }

    #[test]
    fn revoked_session_is_inactive() {
        let mut s = session(Duration::hours(1));
        s.revoked_at = Some(Utc::now());
        assert!(!s.is_active(Utc::now()));
    }
}
