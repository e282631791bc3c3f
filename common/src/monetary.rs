//! Monetary types.
//!
//! Amounts are signed integers in minor currency units (cents). Only the
//! currency code is modelled as a type.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CurrencyError;

/// Amount in minor currency units. Negative values are debits.
pub type MinorUnits = i64;

/// Currency codes the bank accepts.
pub const SUPPORTED_CURRENCIES: [&str; 3] = ["USD", "EUR", "BRL"];

/// ISO 4217 currency code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    /// Create a currency from its code without checking it is supported.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().to_uppercase())
    }

    /// Parse a currency code, rejecting codes the bank does not support.
    pub fn parse(code: &str) -> Result<Self, CurrencyError> {
        if Self::is_supported(code) {
            Ok(Self(code.to_string()))
        } else {
            Err(CurrencyError::Unsupported(code.to_string()))
        }
    }

    /// US Dollar.
    pub fn usd() -> Self {
        Self("USD".to_string())
    }

    /// Euro.
    pub fn eur() -> Self {
        Self("EUR".to_string())
    }

    /// Brazilian Real.
    pub fn brl() -> Self {
        Self("BRL".to_string())
    }

    /// Get the currency code.
    pub fn code(&self) -> &str {
        &self.0
    }

    /// Check whether a code is one of the supported currencies.
    ///
    /// Matching is exact: lowercase codes are not accepted.
    pub fn is_supported(code: &str) -> bool {
        SUPPORTED_CURRENCIES.contains(&code)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Currency {
    type Err = CurrencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
