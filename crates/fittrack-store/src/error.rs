//! Error types for fittrack storage.

use fittrack_core::LedgerError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Stored data could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// Record already exists.
    #[error("{entity} already exists: {id}")]
    AlreadyExists {
        /// Kind of record.
        entity: &'static str,
        /// Identifier that collided.
        id: String,
    },

    /// The balance cannot cover the debit.
    #[error("insufficient tokens: balance={balance}, required={required}")]
    InsufficientTokens {
        /// Current balance.
        balance: i64,
        /// Required amount.
        required: i64,
    },

    /// An idempotency key was reused for a different user.
    #[error("idempotency key reused for another user: {key}")]
    IdempotencyConflict {
        /// The reused key.
        key: String,
    },

    /// The request violates a ledger rule other than funds.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<LedgerError> for StoreError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientTokens { balance, required } => {
                Self::InsufficientTokens { balance, required }
            }
            LedgerError::UnknownVariant { .. } | LedgerError::InvalidId(_) => {
                Self::Serialization(err.to_string())
            }
            LedgerError::InvalidAmount(_) | LedgerError::UserMismatch { .. } => {
                Self::InvalidRequest(err.to_string())
            }
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Serialization(err.to_string())
            }
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Whether a `sqlx` error is a unique-constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
