//! Error types for fittrack domain operations.

use crate::ids::IdError;

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors raised by ledger and gamification rules.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// The balance cannot cover the requested debit.
    #[error("insufficient tokens: balance={balance}, required={required}")]
    InsufficientTokens {
        /// Current balance.
        balance: i64,
        /// Tokens the operation needs.
        required: i64,
    },

    /// A token amount was zero, negative or otherwise unusable.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// A mutation was presented for a different user than the balance row.
    #[error("ledger request for {request_user} applied to balance of {balance_user}")]
    UserMismatch {
        /// User on the request.
        request_user: String,
        /// User owning the balance row.
        balance_user: String,
    },

    /// An enum value stored or received as text was not recognized.
    #[error("unknown {kind}: {value}")]
    UnknownVariant {
        /// Which enum was being parsed.
        kind: &'static str,
        /// The offending text.
        value: String,
    },

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}
