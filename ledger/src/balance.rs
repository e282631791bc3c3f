//! Account balance reconciliation.

use serde::{Deserialize, Serialize};
use simplebank_common::{AccountId, MinorUnits};

use crate::account::Account;
use crate::journal::Entry;

/// Result of checking an account balance against its ledger entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceCheck {
    /// Account checked.
    pub account_id: AccountId,
    /// Balance stored on the account row.
    pub balance: MinorUnits,
    /// Sum of every entry recorded against the account.
    pub ledger_total: i128,
    /// Number of entries summed.
    pub entry_count: usize,
}

impl BalanceCheck {
    /// Build a check from an account and all of its entries.
    ///
    /// Entries of other accounts are ignored.
    pub fn new(account: &Account, entries: &[Entry]) -> Self {
        let (ledger_total, entry_count) = entries
            .iter()
            .filter(|e| e.account_id == account.id)
            .fold((0i128, 0usize), |(total, count), e| {
                (total + i128::from(e.amount), count + 1)
            });

        Self {
            account_id: account.id,
            balance: account.balance,
            ledger_total,
            entry_count,
        }
    }

    /// Check the double-entry invariant: balance equals the sum of entries.
    pub fn is_consistent(&self) -> bool {
        i128::from(self.balance) == self.ledger_total
    }

    /// Amount by which the stored balance exceeds the ledger.
    pub fn drift(&self) -> i128 {
        i128::from(self.balance) - self.ledger_total
    }
}
