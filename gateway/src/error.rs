//! Gateway error types.

use simplebank_common::AccountId;
use simplebank_ledger::LedgerError;
use thiserror::Error;

/// Errors returned to callers of the transfer service.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Credential missing, unknown or revoked.
    #[error("Unauthenticated")]
    Unauthenticated,

    /// Username outside the accepted format.
    #[error("Invalid owner name: {0:?}")]
    InvalidOwner(String),

    /// Caller does not own the account.
    #[error("Account {account_id} does not belong to the caller")]
    NotOwner { account_id: AccountId },

    /// Caller tried to send money to one of their own accounts.
    #[error("Transfers between accounts of the same owner are not allowed")]
    SelfTransfer,

    /// Source and destination are the same account.
    #[error("Source and destination account are the same")]
    SameAccount,

    /// Amount below the minimum of one minor unit.
    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),

    /// Currency outside the supported set.
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    /// Account currency differs from the request currency.
    #[error("Account {account_id} currency mismatch: {actual} vs {expected}")]
    CurrencyMismatch {
        account_id: AccountId,
        expected: String,
        actual: String,
    },

    /// Referenced account does not exist.
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Page parameters out of range.
    #[error("Invalid page: page_id must be >= 1 and page_size between 5 and 10")]
    InvalidPage,

    /// Failure inside the ledger.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl GatewayError {
    /// Get error code for client responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::Unauthenticated => "UNAUTHENTICATED",
            GatewayError::InvalidOwner(_) => "INVALID_OWNER",
            GatewayError::NotOwner { .. } => "NOT_OWNER",
            GatewayError::SelfTransfer => "SELF_TRANSFER",
            GatewayError::SameAccount => "SAME_ACCOUNT",
            GatewayError::InvalidAmount(_) => "INVALID_AMOUNT",
            GatewayError::UnsupportedCurrency(_) => "UNSUPPORTED_CURRENCY",
            GatewayError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            GatewayError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            GatewayError::InvalidPage => "INVALID_PAGE",
            GatewayError::Ledger(e) => e.error_code(),
        }
    }

    /// Check if the caller can fix this error by changing the request.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, GatewayError::Ledger(_))
    }
}

/// Result type for gateway operations.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;
