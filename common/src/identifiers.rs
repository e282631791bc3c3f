//! Identifier types for ledger records.
//!
//! All ledger identifiers are database-assigned `BIGSERIAL` values. The
//! newtypes keep account, entry and transfer ids from being mixed up.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a ledger account.
///
/// Ordering is significant: row locks are always taken in ascending
/// `AccountId` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(i64);

impl AccountId {
    /// Create an account ID from its raw value.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw value.
    pub const fn get(&self) -> i64 {
        self.0
    }

    /// Check the id is in the range the store hands out.
    pub fn is_valid(&self) -> bool {
        self.0 >= 1
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for AccountId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<AccountId> for i64 {
    fn from(id: AccountId) -> Self {
        id.0
    }
}

/// Unique identifier for a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(i64);

impl EntryId {
    /// Create an entry ID from its raw value.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw value.
    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a transfer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(i64);

impl TransferId {
    /// Create a transfer ID from its raw value.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw value.
    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of an account owner (the authenticated username).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Owner(String);

impl Owner {
    /// Create a new owner.
    pub fn new(owner: impl Into<String>) -> Self {
        Self(owner.into())
    }

    /// Get the owner as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check the name is a usable username: 1 to 64 ASCII letters, digits
    /// or underscores.
    pub fn is_valid(&self) -> bool {
        (1..=64).contains(&self.0.len())
            && self.0.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Owner {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Owner {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl PartialEq<str> for Owner {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}
