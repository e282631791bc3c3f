//! Ledger store traits and the scoped transaction primitive.
//!
//! A [`LedgerStore`] owns all persisted state. Mutation only happens through a
//! [`LedgerTx`], the transaction-scoped handle handed to a unit of work by
//! [`run_in_transaction`]. There is no store-wide connection a unit of work
//! could write through.

use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{error, warn};

use simplebank_common::{AccountId, MinorUnits, Owner, TransferId};

use crate::account::{Account, NewAccount};
use crate::error::{LedgerError, LedgerResult};
use crate::journal::Entry;
use crate::transfer::Transfer;

/// Transaction-scoped query handle.
///
/// Dropping a handle without calling [`commit`](LedgerTx::commit) discards
/// every write it made and releases every row lock it holds.
#[async_trait]
pub trait LedgerTx: Send {
    /// Read an account without locking it.
    async fn get_account(&mut self, id: AccountId) -> LedgerResult<Account>;

    /// Lock an account row exclusively and re-read it.
    ///
    /// Blocks while another transaction holds the lock. Fails with
    /// [`LedgerError::NotFound`] when the account does not exist.
    async fn get_account_for_update(&mut self, id: AccountId) -> LedgerResult<Account>;

    /// Persist a new balance and return the updated account.
    async fn update_account_balance(
        &mut self,
        id: AccountId,
        balance: MinorUnits,
    ) -> LedgerResult<Account>;

    /// Insert a new account.
    async fn create_account(&mut self, account: NewAccount) -> LedgerResult<Account>;

    /// Append a ledger entry.
    async fn create_entry(&mut self, account_id: AccountId, amount: MinorUnits)
        -> LedgerResult<Entry>;

    /// Insert a transfer record.
    async fn create_transfer(
        &mut self,
        from: AccountId,
        to: AccountId,
        amount: MinorUnits,
    ) -> LedgerResult<Transfer>;

    /// All entries of an account visible to this transaction, oldest first.
    async fn list_entries(&mut self, account_id: AccountId) -> LedgerResult<Vec<Entry>>;

    /// Make every write durable and visible, then release all locks.
    async fn commit(self) -> LedgerResult<()>;

    /// Discard every write and release all locks.
    async fn rollback(self) -> LedgerResult<()>;
}

/// Durable storage for accounts, entries and transfers.
///
/// Reads on the store itself only ever observe committed state.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    /// Transaction handle type.
    type Tx: LedgerTx + 'static;

    /// Begin a new transaction.
    async fn begin(&self) -> LedgerResult<Self::Tx>;

    /// Get a committed account.
    async fn get_account(&self, id: AccountId) -> LedgerResult<Account>;

    /// List an owner's accounts ordered by id.
    async fn list_accounts(&self, owner: &Owner, limit: i64, offset: i64)
        -> LedgerResult<Vec<Account>>;

    /// All committed entries of an account, oldest first.
    async fn list_entries(&self, account_id: AccountId) -> LedgerResult<Vec<Entry>>;

    /// Get a committed transfer.
    async fn get_transfer(&self, id: TransferId) -> LedgerResult<Transfer>;

    /// Committed transfers touching an account on either side, oldest first.
    async fn list_transfers(&self, account_id: AccountId) -> LedgerResult<Vec<Transfer>>;
}

/// Run `work` inside one transaction.
///
/// * `work` fails: the transaction is rolled back and the error returned. If
///   the rollback fails too, both errors come back as
///   [`LedgerError::Rollback`].
/// * `work` succeeds: the transaction is committed; a commit failure is
///   returned instead of the value.
/// * `work` panics: the transaction is rolled back, then the panic resumes.
///
/// Cancelling the returned future drops the handle, which rolls back.
pub async fn run_in_transaction<S, T, F>(store: &S, work: F) -> LedgerResult<T>
where
    S: LedgerStore + ?Sized,
    T: Send,
    F: for<'t> FnOnce(&'t mut S::Tx) -> BoxFuture<'t, LedgerResult<T>> + Send,
{
    let mut tx = store.begin().await?;

    let outcome = AssertUnwindSafe(async { work(&mut tx).await })
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(value)) => {
            tx.commit().await?;
            Ok(value)
        }
        Ok(Err(cause)) => match tx.rollback().await {
            Ok(()) => Err(cause),
            Err(rollback) => {
                error!(
                    error = %cause,
                    rollback_error = %rollback,
                    "Rollback failed, transaction outcome unknown"
                );
                Err(LedgerError::Rollback {
                    cause: Box::new(cause),
                    rollback: Box::new(rollback),
                })
            }
        },
        Err(panic) => {
            if let Err(rollback) = tx.rollback().await {
                error!(rollback_error = %rollback, "Rollback after panic failed");
            } else {
                warn!("Unit of work panicked, transaction rolled back");
            }
            std::panic::resume_unwind(panic)
        }
    }
}
