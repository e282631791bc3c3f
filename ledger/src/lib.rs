//! SimpleBank Ledger
//!
//! Double-entry ledger store with scoped transactions, and the transfer
//! engine that moves money between accounts on top of it.

pub mod account;
pub mod balance;
pub mod engine;
pub mod error;
pub mod journal;
pub mod memory;
pub mod postgres;
pub mod store;
pub mod transfer;

pub use account::{Account, NewAccount};
pub use balance::BalanceCheck;
pub use engine::TransferEngine;
pub use error::{Entity, LedgerError, LedgerResult};
pub use journal::{Entry, EntryType, JournalBatch};
pub use memory::{FaultInjector, MemoryLedgerStore, MemoryStoreError, StoreOp};
pub use postgres::{PgLedgerStore, PgLedgerTx};
pub use store::{run_in_transaction, LedgerStore, LedgerTx};
pub use transfer::{lock_order, Transfer, TransferResult};
