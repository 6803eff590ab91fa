//! Storage layer for fittrack.
//!
//! The [`Store`] trait is the only way balances change. Each ledger write is
//! one atomic unit that checks the idempotency key, applies the mutation to
//! the balance row and appends the ledger entry.
//!
//! Two backends are provided:
//!
//! - [`PgStore`]: PostgreSQL through `sqlx`; ledger writes run in a
//!   transaction holding a row lock on the balance.
//! - [`MemoryStore`]: a process-local store behind a single write lock, used
//!   by tests and local development.
//!
//! # Example
//!
//! ```no_run
//! use chrono::Utc;
//! use fittrack_core::{Feature, LedgerRequest, Plan, TokenBalance, UserId};
//! use fittrack_store::{MemoryStore, Store};
//!
//! # async fn demo() -> fittrack_store::Result<()> {
//! let store = MemoryStore::new();
//! let user_id = UserId::generate();
//! store.create_balance(&TokenBalance::new(user_id, Plan::Free, Utc::now())).await?;
//! store.apply_ledger(&LedgerRequest::grant("signup", user_id, 20, "welcome")).await?;
//!
//! let outcome = store
//!     .apply_ledger(&LedgerRequest::consume("req-1", user_id, &Feature::Transcription, 1))
//!     .await?;
//! assert_eq!(outcome.balance_after(), 19);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod pg;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use pg::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use fittrack_core::{
    Activity, BonusAward, BonusRule, BonusRuleId, LedgerEntry, LedgerOutcome, LedgerRequest, Plan,
    RecipeDetails, Session, SessionId, TokenBalance, UserId,
};

/// Result of recording a bonus award.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwardOutcome {
    /// The stored award (the original one when replayed).
    pub award: BonusAward,
    /// Ledger credit for the reward tokens, if the award carries any.
    pub entry: Option<LedgerEntry>,
    /// `true` when the award already existed and nothing changed.
    pub replayed: bool,
}

/// The storage trait defining all database operations.
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Balances
    // =========================================================================

    /// Insert a new balance row.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the user already has one.
    async fn create_balance(&self, balance: &TokenBalance) -> Result<()>;

    /// Get a user's balance row.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_balance(&self, user_id: &UserId) -> Result<Option<TokenBalance>>;

    /// List balance rows ordered by user id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_balances(&self, limit: usize, offset: usize) -> Result<Vec<TokenBalance>>;

    /// Change the plan of a balance row. The balance itself is untouched.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the user has no balance row.
    async fn set_plan(&self, user_id: &UserId, plan: Plan) -> Result<TokenBalance>;

    // =========================================================================
    // Ledger
    // =========================================================================

    /// Apply a ledger request atomically and at most once per idempotency key.
    ///
    /// A replayed key returns the original entry with `replayed = true`.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the user has no balance row.
    /// - `StoreError::InsufficientTokens` if a debit exceeds the balance.
    /// - `StoreError::IdempotencyConflict` if the key belongs to another user.
    /// - `StoreError::InvalidRequest` for invalid amounts.
    async fn apply_ledger(&self, request: &LedgerRequest) -> Result<LedgerOutcome>;

    /// Look up the entry written for an idempotency key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_entry_by_key(&self, idempotency_key: &str) -> Result<Option<LedgerEntry>>;

    /// List a user's ledger entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_entries(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>>;

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Insert a session.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` on a token hash collision.
    async fn put_session(&self, session: &Session) -> Result<()>;

    /// Find a session by the hash of its token.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_session_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>>;

    /// Replace a session's CSRF token hash.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the session does not exist.
    async fn update_csrf_hash(&self, session_id: &SessionId, csrf_hash: &str) -> Result<()>;

    /// Revoke one session.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the session does not exist.
    async fn revoke_session(&self, session_id: &SessionId, at: DateTime<Utc>) -> Result<()>;

    /// Revoke every active session of a user; returns how many were revoked.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn revoke_user_sessions(&self, user_id: &UserId, at: DateTime<Utc>) -> Result<u64>;

    /// Delete expired and revoked sessions; returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn purge_sessions(&self, now: DateTime<Utc>) -> Result<u64>;

    // =========================================================================
    // Activities
    // =========================================================================

    /// Insert an activity. Returns `false` when a row with the same user and
    /// `external_id` already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_activity(&self, activity: &Activity) -> Result<bool>;

    /// List a user's activities recorded at or after `since`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_activities(&self, user_id: &UserId, since: DateTime<Utc>)
        -> Result<Vec<Activity>>;

    // =========================================================================
    // Bonus rules and awards
    // =========================================================================

    /// Insert or replace a bonus rule.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn put_bonus_rule(&self, rule: &BonusRule) -> Result<()>;

    /// List all bonus rules, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_bonus_rules(&self) -> Result<Vec<BonusRule>>;

    /// Activate or deactivate a rule.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the rule does not exist.
    async fn set_bonus_rule_active(&self, rule_id: &BonusRuleId, active: bool)
        -> Result<BonusRule>;

    /// Record an award and credit its reward tokens in one atomic unit.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if tokens are due and the user has no balance.
    async fn record_award(&self, award: &BonusAward) -> Result<AwardOutcome>;

    /// List a user's awards, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_awards(&self, user_id: &UserId) -> Result<Vec<BonusAward>>;

    // =========================================================================
    // Recipe cache
    // =========================================================================

    /// Fetch cached recipe details.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_cached_recipe(&self, cache_key: &str) -> Result<Option<RecipeDetails>>;

    /// Insert or replace cached recipe details.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn put_cached_recipe(&self, cache_key: &str, details: &RecipeDetails) -> Result<()>;
}

/// Turn an entry found under the request's key into a replay outcome.
pub(crate) fn replay(existing: LedgerEntry, request: &LedgerRequest) -> Result<LedgerOutcome> {
    if existing.user_id != request.user_id {
        return Err(StoreError::IdempotencyConflict {
            key: request.idempotency_key.clone(),
        });
    }
    tracing::debug!(
        idempotency_key = %request.idempotency_key,
        entry_id = %existing.id,
        "Ledger request replayed"
    );
    Ok(LedgerOutcome {
        entry: existing,
        replayed: true,
    })
}

/// Ledger request crediting an award's reward tokens, if it has any.
pub(crate) fn award_credit(award: &BonusAward) -> Option<LedgerRequest> {
    (award.reward_tokens > 0).then(|| {
        LedgerRequest::bonus_award(
            &award.award_key(),
            award.user_id,
            award.reward_tokens,
            &award.rule_name,
        )
    })
}
