//! Error taxonomy for ledger operations.

use service_core::error::AppError;
use thiserror::Error;

/// Postgres SQLSTATE codes that mean "someone else holds the customer".
const LOCK_NOT_AVAILABLE: &str = "55P03";
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
/// Raised when `statement_timeout` cancels a query.
const QUERY_CANCELED: &str = "57014";

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Caller input rejected; nothing was written.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A write would break `0 <= paid_amount <= total` or the status rule.
    /// The unit of work is rolled back.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// Statement timeout or lost connection. The unit of work was rolled back.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Store error: {0}")]
    Store(anyhow::Error),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Whether the whole operation may be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict(_) | Self::StoreUnavailable(_))
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::InvariantViolation(_) => "invariant_violation",
            Self::ConcurrencyConflict(_) => "concurrency_conflict",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::Store(_) => "store",
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        let code = match &err {
            sqlx::Error::Database(db_err) => db_err.code().map(|c| c.into_owned()),
            _ => None,
        };

        match code.as_deref() {
            Some(LOCK_NOT_AVAILABLE | SERIALIZATION_FAILURE | DEADLOCK_DETECTED) => {
                Self::ConcurrencyConflict(err.to_string())
            }
            Some(QUERY_CANCELED) => Self::StoreUnavailable(err.to_string()),
            _ => match err {
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                    Self::StoreUnavailable(err.to_string())
                }
                sqlx::Error::RowNotFound => Self::NotFound("row not found".to_string()),
                other => Self::Store(anyhow::Error::new(other)),
            },
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            LedgerError::NotFound(msg) => AppError::NotFound(anyhow::anyhow!(msg)),
            LedgerError::ConcurrencyConflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            LedgerError::StoreUnavailable(msg) => {
                AppError::ServiceUnavailable(anyhow::anyhow!(msg))
            }
            LedgerError::InvariantViolation(msg) => {
                AppError::InternalError(anyhow::anyhow!("invariant violation: {}", msg))
            }
            LedgerError::Store(e) => AppError::DatabaseError(e),
        }
    }
}
