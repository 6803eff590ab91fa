//! Ledger requests and entries.
//!
//! Every balance change is described by a [`LedgerRequest`] carrying an
//! idempotency key and recorded as an immutable [`LedgerEntry`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::pricing::Feature;
use crate::{EntryId, UserId};

/// Why a balance changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Tokens spent on a metered feature.
    Consumption,
    /// Tokens granted by an admin or at sign-up.
    Grant,
    /// Balance reset to the plan allowance for a new month.
    MonthlyReset,
    /// Tokens earned through a bonus rule.
    BonusAward,
}

impl EntryKind {
    /// Stable text form used in storage and JSON.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Consumption => "consumption",
            Self::Grant => "grant",
            Self::MonthlyReset => "monthly_reset",
            Self::BonusAward => "bonus_award",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "consumption" => Ok(Self::Consumption),
            "grant" => Ok(Self::Grant),
            "monthly_reset" => Ok(Self::MonthlyReset),
            "bonus_award" => Ok(Self::BonusAward),
            other => Err(LedgerError::UnknownVariant {
                kind: "entry kind",
                value: other.to_string(),
            }),
        }
    }
}

/// How a request changes the balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mutation {
    /// Subtract tokens if the balance covers them.
    Debit(i64),
    /// Add tokens.
    Credit(i64),
    /// Replace the balance with the plan allowance for `period`.
    ResetTo {
        /// New balance.
        allowance: i64,
        /// `YYYY-MM` period being reset.
        period: String,
    },
}

/// A request to change one user's balance exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRequest {
    /// Replaying a request with the same key is a no-op.
    pub idempotency_key: String,
    /// Whose balance changes.
    pub user_id: UserId,
    /// Recorded entry kind.
    pub kind: EntryKind,
    /// The change itself.
    pub mutation: Mutation,
    /// Human readable description.
    pub description: String,
    /// Extra context (feature, rule, period...).
    pub metadata: serde_json::Value,
}

impl LedgerRequest {
    /// Spend tokens on a feature.
    #[must_use]
    pub fn consume(
        idempotency_key: impl Into<String>,
        user_id: UserId,
        feature: &Feature,
        amount: i64,
    ) -> Self {
        Self {
            idempotency_key: idempotency_key.into(),
            user_id,
            kind: EntryKind::Consumption,
            mutation: Mutation::Debit(amount),
            description: format!("{} ({amount} tokens)", feature.as_str()),
            metadata: serde_json::json!({ "feature": feature.as_str() }),
        }
    }

    /// Grant tokens.
    #[must_use]
    pub fn grant(
        idempotency_key: impl Into<String>,
        user_id: UserId,
        amount: i64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            idempotency_key: idempotency_key.into(),
            user_id,
            kind: EntryKind::Grant,
            mutation: Mutation::Credit(amount),
            description: reason.into(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Reset to the plan allowance. The key is derived from user and period,
    /// so running the reset twice in one month changes nothing.
    #[must_use]
    pub fn monthly_reset(user_id: UserId, allowance: i64, period: &str) -> Self {
        Self {
            idempotency_key: format!("monthly-reset:{user_id}:{period}"),
            user_id,
            kind: EntryKind::MonthlyReset,
            mutation: Mutation::ResetTo {
                allowance,
                period: period.to_string(),
            },
            description: format!("Monthly token reset for {period}"),
            metadata: serde_json::json!({ "period": period }),
        }
    }

    /// Credit the tokens of a bonus award.
    #[must_use]
    pub fn bonus_award(award_key: &str, user_id: UserId, tokens: i64, rule_name: &str) -> Self {
        Self {
            idempotency_key: award_key.to_string(),
            user_id,
            kind: EntryKind::BonusAward,
            mutation: Mutation::Credit(tokens),
            description: format!("Bonus: {rule_name}"),
            metadata: serde_json::json!({ "rule": rule_name }),
        }
    }
}

/// Immutable record of one balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Time-ordered identifier.
    pub id: EntryId,
    /// Whose balance changed.
    pub user_id: UserId,
    /// Idempotency key of the request that produced this entry.
    pub idempotency_key: String,
    /// Kind of change.
    pub kind: EntryKind,
    /// Signed change in tokens.
    pub delta: i64,
    /// Balance right after the change.
    pub balance_after: i64,
    /// Description copied from the request.
    pub description: String,
    /// Metadata copied from the request.
    pub metadata: serde_json::Value,
    /// When the change was applied.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub(crate) fn from_request(
        request: &LedgerRequest,
        delta: i64,
        balance_after: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EntryId::generate(),
            user_id: request.user_id,
            idempotency_key: request.idempotency_key.clone(),
            kind: request.kind,
            delta,
            balance_after,
            description: request.description.clone(),
            metadata: request.metadata.clone(),
            created_at: now,
        }
    }
}

/// Result of applying a ledger request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerOutcome {
    /// The entry that records the change.
    pub entry: LedgerEntry,
    /// `true` when the key had already been applied and nothing changed now.
    pub replayed: bool,
}

impl LedgerOutcome {
    /// Balance after the (original) change.
    #[must_use]
    pub const fn balance_after(&self) -> i64 {
        self.entry.balance_after
    }
}

/// Monthly period key (`YYYY-MM`) for a timestamp.
#[must_use]
pub fn period_key(at: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", at.year(), at.month())
}

/// Validate a `YYYY-MM` period key.
///
/// # Errors
///
/// Returns [`LedgerError::InvalidAmount`] when the text is not a valid month.
pub fn parse_period(text: &str) -> Result<String, LedgerError> {
    let invalid = || LedgerError::InvalidAmount(format!("invalid period: {text}"));
    let (year, month) = text.split_once('-').ok_or_else(invalid)?;
    if year.len() != 4 || month.len() != 2 {
        return Err(invalid());
    }
    let year: i32 = year.parse().map_err(|_| invalid())?;
    let month: u32 = month.parse().map_err(|_| invalid())?;
    if !(1..=12).contains(&month) {
        return Err(invalid());
    }
    Ok(format!("{year:04}-{month:02}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn reset_key_is_stable_per_user_and_period() {
        let user = UserId::generate();
        let a = LedgerRequest::monthly_reset(user, 20, "2026-10");
        let b = LedgerRequest::monthly_reset(user, 200, "2026-10");
        let c = LedgerRequest::monthly_reset(user, 20, "2026-11");
        assert_eq!(a.idempotency_key, b.idempotency_key);
        assert_ne!(a.idempotency_key, c.idempotency_key);
    }

    #[test]
    fn consume_records_feature() {
        let req = LedgerRequest::consume("k", UserId::generate(), &Feature::Transcription, 1);
        assert_eq!(req.metadata["feature"], "transcription");
        assert_eq!(req.mutation, Mutation::Debit(1));
    }

    #[test]
    fn period_key_pads_month() {
        let at = Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap();
        assert_eq!(period_key(at), "2026-03");
    }

    #[test]
    fn parse_period_validates() {
        assert_eq!(parse_period("2026-10").unwrap(), "2026-10");
        assert!(parse_period("2026-13").is_err());
        assert!(parse_period("2026-1").is_err());
        assert!(parse_period("october").is_err());
    }

    #[test]
    fn entry_kind_text_roundtrip() {
        for kind in [
            EntryKind::Consumption,
            EntryKind::Grant,
            EntryKind::MonthlyReset,
            EntryKind::BonusAward,
        ] {
            assert_eq!(kind.as_str().parse::<EntryKind>().unwrap(), kind);
        }
    }
}
