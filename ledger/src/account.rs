//! Account definitions for ledger.

use serde::{Deserialize, Serialize};
use simplebank_common::{AccountId, Currency, MinorUnits, Owner, Timestamp};

/// A ledger account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account identifier.
    pub id: AccountId,
    /// Owning user.
    pub owner: Owner,
    /// Current balance in minor units.
    pub balance: MinorUnits,
    /// Account currency. Fixed at creation.
    pub currency: Currency,
    /// When the account was created.
    pub created_at: Timestamp,
}

impl Account {
    /// Check if the account belongs to `owner`.
    pub fn is_owned_by(&self, owner: &Owner) -> bool {
        &self.owner == owner
    }

    /// Balance after applying `delta`, or `None` on overflow.
    pub fn balance_after(&self, delta: MinorUnits) -> Option<MinorUnits> {
        self.balance.checked_add(delta)
    }
}

/// Parameters for opening an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    /// Owning user.
    pub owner: Owner,
    /// Account currency.
    pub currency: Currency,
    /// Opening balance in minor units.
    pub balance: MinorUnits,
}

impl NewAccount {
    /// Create opening parameters.
    pub fn new(owner: impl Into<Owner>, currency: Currency, balance: MinorUnits) -> Self {
        Self {
            owner: owner.into(),
            currency,
            balance,
        }
    }

    /// Opening parameters for an empty account.
    pub fn empty(owner: impl Into<Owner>, currency: Currency) -> Self {
        Self::new(owner, currency, 0)
    }
}
