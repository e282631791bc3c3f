//! Ledger error types.

use std::time::Duration;

use simplebank_common::AccountId;
use thiserror::Error;

/// Boxed underlying failure from a store backend.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Kind of ledger record an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    /// An account row.
    Account,
    /// A transfer row.
    Transfer,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Entity::Account => write!(f, "Account"),
            Entity::Transfer => write!(f, "Transfer"),
        }
    }
}

/// Errors surfaced by the ledger store and the transfer engine.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: Entity, id: i64 },

    /// Underlying storage or transaction failure.
    #[error("Store error: {0}")]
    Store(#[source] BoxError),

    /// Rolling back a failed unit of work failed as well. The outcome of the
    /// transaction is unknown.
    #[error("Rollback failed: {rollback}; original error: {cause}")]
    Rollback {
        cause: Box<LedgerError>,
        #[source]
        rollback: Box<LedgerError>,
    },

    /// A balance update would leave the signed 64-bit range.
    #[error("Balance of account {0} out of range")]
    BalanceOutOfRange(AccountId),

    /// The caller's deadline expired; the transaction was abandoned.
    #[error("Deadline of {0:?} exceeded, transaction abandoned")]
    DeadlineExceeded(Duration),
}

impl LedgerError {
    /// Wrap any backend error as a store error.
    pub fn store(err: impl Into<BoxError>) -> Self {
        LedgerError::Store(err.into())
    }

    /// Account-not-found shorthand.
    pub fn account_not_found(id: impl Into<i64>) -> Self {
        LedgerError::NotFound {
            entity: Entity::Account,
            id: id.into(),
        }
    }

    /// Check if this error leaves the ledger in an unknown state.
    ///
    /// Callers must reconcile out-of-band instead of retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LedgerError::Rollback { .. })
    }

    /// Check if this error means a referenced record is missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, LedgerError::NotFound { .. })
    }

    /// Get error code for callers mapping to client responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::NotFound { .. } => "NOT_FOUND",
            LedgerError::Store(_) => "STORE_ERROR",
            LedgerError::Rollback { .. } => "ROLLBACK_ERROR",
            LedgerError::BalanceOutOfRange(_) => "BALANCE_OUT_OF_RANGE",
            LedgerError::DeadlineExceeded(_) => "DEADLINE_EXCEEDED",
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::Store(Box::new(err))
    }
}

/// Result type alias for ledger operations.
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_rollback_error_keeps_both_failures() {
        let err = LedgerError::Rollback {
            cause: Box::new(LedgerError::account_not_found(9)),
            rollback: Box::new(LedgerError::store("connection reset")),
        };

        assert!(err.is_fatal());
        assert_eq!(err.error_code(), "ROLLBACK_ERROR");
        let message = err.to_string();
        assert!(message.contains("Account not found: 9"));
        assert!(message.contains("connection reset"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(LedgerError::account_not_found(1).error_code(), "NOT_FOUND");
        assert_eq!(LedgerError::store("boom").error_code(), "STORE_ERROR");
        assert!(!LedgerError::store("boom").is_fatal());
        assert!(LedgerError::account_not_found(1).is_not_found());
    }
}
