//! Journal entry types for double-entry bookkeeping.

use serde::{Deserialize, Serialize};
use simplebank_common::{AccountId, EntryId, MinorUnits, Timestamp};

/// Type of journal entry, derived from the sign of its amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    /// Money leaving the account (negative amount).
    Debit,
    /// Money arriving in the account (positive amount).
    Credit,
}

/// A single, immutable line in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Unique entry ID.
    pub id: EntryId,
    /// Account affected.
    pub account_id: AccountId,
    /// Signed amount in minor units.
    pub amount: MinorUnits,
    /// When this entry was created.
    pub created_at: Timestamp,
}

impl Entry {
    /// Get the entry type.
    pub fn entry_type(&self) -> EntryType {
        if self.amount < 0 {
            EntryType::Debit
        } else {
            EntryType::Credit
        }
    }

}

/// A set of entries that must net to zero, such as the two legs of a transfer.
#[derive(Debug, Clone, Default)]
pub struct JournalBatch {
    /// Entries in the batch.
    pub entries: Vec<Entry>,
}

impl JournalBatch {
    /// Verify the batch is balanced (debits == credits).
    pub fn is_balanced(&self) -> bool {
        self.net() == Some(0)
    }

    /// Sum of all amounts, `None` on overflow.
    pub fn net(&self) -> Option<MinorUnits> {
        self.entries
            .iter()
            .try_fold(0i64, |acc, e| acc.checked_add(e.amount))
    }
}

impl FromIterator<Entry> for JournalBatch {
    fn from_iter<I: IntoIterator<Item = Entry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
