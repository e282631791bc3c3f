//! Transfer records and the result of a completed transfer.

use serde::{Deserialize, Serialize};
use simplebank_common::{AccountId, MinorUnits, Timestamp, TransferId};

use crate::account::Account;
use crate::journal::{Entry, JournalBatch};

/// Immutable record of one completed money movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// Unique transfer ID.
    pub id: TransferId,
    /// Debited account.
    pub from_account_id: AccountId,
    /// Credited account.
    pub to_account_id: AccountId,
    /// Amount moved, always positive.
    pub amount: MinorUnits,
    /// When the transfer was committed.
    pub created_at: Timestamp,
}

impl Transfer {
    /// Check if the transfer touches `account_id` on either side.
    pub fn involves(&self, account_id: AccountId) -> bool {
        self.from_account_id == account_id || self.to_account_id == account_id
    }
}

/// Everything one transfer wrote, as returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    /// The transfer record.
    pub transfer: Transfer,
    /// Debited account after the update.
    pub from_account: Account,
    /// Credited account after the update.
    pub to_account: Account,
    /// Debit entry (`-amount`).
    pub from_entry: Entry,
    /// Credit entry (`+amount`).
    pub to_entry: Entry,
}

impl TransferResult {
    /// The two entries as a batch.
    pub fn journal(&self) -> JournalBatch {
        [self.from_entry.clone(), self.to_entry.clone()]
            .into_iter()
            .collect()
    }
}

/// Two accounts in the order their row locks must be taken.
///
/// Locks are always acquired in ascending id order regardless of which side
/// is debited, so two transfers over the same pair can never wait on each
/// other in a cycle.
pub fn lock_order(from: AccountId, to: AccountId) -> [AccountId; 2] {
    if from < to {
        [from, to]
    } else {
        [to, from]
    }
}
