//! Token balances.
//!
//! A [`TokenBalance`] is the single row of integer tokens a user owns. It is
//! only ever changed through [`TokenBalance::apply`], which enforces the
//! non-negative invariant and produces the matching [`LedgerEntry`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::ledger::{LedgerEntry, LedgerRequest, Mutation};
use crate::pricing::Plan;
use crate::UserId;

/// Integer tokens owned by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBalance {
    /// Owner.
    pub user_id: UserId,

    /// Plan that decides the monthly allowance.
    pub plan: Plan,

    /// Spendable tokens. Never negative.
    pub balance: i64,

    /// Tokens ever debited.
    pub lifetime_consumed: i64,

    /// Tokens ever credited (grants, resets, bonuses).
    pub lifetime_granted: i64,

    /// Last `YYYY-MM` period the monthly reset was applied for.
    pub last_reset_period: Option<String>,

    /// When the row was created.
    pub created_at: DateTime<Utc>,

    /// When the row was last changed.
    pub updated_at: DateTime<Utc>,
}

impl TokenBalance {
    /// Create an empty balance on the given plan.
    #[must_use]
    pub fn new(user_id: UserId, plan: Plan, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            plan,
            balance: 0,
            lifetime_consumed: 0,
            lifetime_granted: 0,
            last_reset_period: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the balance covers `required` tokens.
    #[must_use]
    pub const fn has_sufficient(&self, required: i64) -> bool {
        self.balance >= required
    }

    /// Whether the monthly reset still has to run for `period`.
    #[must_use]
    pub fn needs_reset(&self, period: &str) -> bool {
        self.last_reset_period.as_deref() != Some(period)
    }

    /// Apply a ledger request in place and return the entry describing it.
    ///
    /// On error the balance is left untouched.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::UserMismatch`] if the request targets another user.
    /// - [`LedgerError::InvalidAmount`] for non-positive debits/credits,
    ///   negative reset targets or overflow.
    /// - [`LedgerError::InsufficientTokens`] if a debit exceeds the balance.
    pub fn apply(&mut self, request: &LedgerRequest, now: DateTime<Utc>) -> Result<LedgerEntry> {
        if request.user_id != self.user_id {
            return Err(LedgerError::UserMismatch {
                request_user: request.user_id.to_string(),
                balance_user: self.user_id.to_string(),
            });
        }

        let delta = match &request.mutation {
            Mutation::Debit(amount) => {
                let amount = positive(*amount)?;
                if !self.has_sufficient(amount) {
                    return Err(LedgerError::InsufficientTokens {
                        balance: self.balance,
                        required: amount,
                    });
                }
                self.balance -= amount;
                self.lifetime_consumed += amount;
                -amount
            }
            Mutation::Credit(amount) => {
                let amount = positive(*amount)?;
                self.balance = self
                    .balance
                    .checked_add(amount)
                    .ok_or_else(|| LedgerError::InvalidAmount("balance overflow".into()))?;
                self.lifetime_granted += amount;
                amount
            }
            Mutation::ResetTo { allowance, period } => {
                if *allowance < 0 {
                    return Err(LedgerError::InvalidAmount(format!(
                        "reset allowance must not be negative, got {allowance}"
                    )));
                }
                let delta = allowance - self.balance;
                self.balance = *allowance;
                if delta > 0 {
                    self.lifetime_granted += delta;
                }
                self.last_reset_period = Some(period.clone());
                delta
            }
        };

        self.updated_at = now;
        Ok(LedgerEntry::from_request(request, delta, self.balance, now))
    }
}

fn positive(amount: i64) -> Result<i64> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount(format!(
            "amount must be positive, got {amount}"
        )));
    }
    Ok(amount)
}
