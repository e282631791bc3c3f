//! Error types shared across crates.

use thiserror::Error;

/// Errors raised while handling currency codes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CurrencyError {
    /// Currency code is not one the bank operates in.
    #[error("Unsupported currency: {0}")]
    Unsupported(String),
}
