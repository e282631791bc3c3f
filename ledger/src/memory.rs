//! In-process ledger store.
//!
//! Committed tables live behind a single `RwLock`. Every account row has its
//! own async mutex standing in for a database row lock; a transaction keeps
//! the owned guards until it commits, rolls back or is dropped. Writes are
//! buffered per transaction and applied to the tables in one step on commit,
//! so readers never observe a partially applied transaction.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::{Mutex as RowMutex, OwnedMutexGuard};
use tracing::{debug, trace};

use simplebank_common::{AccountId, EntryId, MinorUnits, Owner, Timestamp, TransferId};

use crate::account::{Account, NewAccount};
use crate::error::{Entity, LedgerError, LedgerResult};
use crate::journal::Entry;
use crate::store::{LedgerStore, LedgerTx};
use crate::transfer::Transfer;

/// Store operations a fault can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Begin,
    GetAccountForUpdate,
    UpdateAccountBalance,
    CreateAccount,
    CreateEntry,
    CreateTransfer,
    Commit,
    Rollback,
}

/// Failures raised by the in-memory backend.
#[derive(Error, Debug)]
pub enum MemoryStoreError {
    /// A fault armed through [`FaultInjector`] fired.
    #[error("Injected fault on {0:?}")]
    Injected(StoreOp),

    /// Insert references an account that does not exist.
    #[error("Insert on \"{table}\" violates foreign key: account {account_id} does not exist")]
    ForeignKeyViolation {
        table: &'static str,
        account_id: AccountId,
    },

    /// Waiting for a row lock took longer than the configured limit.
    #[error("Timed out waiting for lock on account {0}")]
    LockTimeout(AccountId),
}

/// Fails chosen store operations on demand.
///
/// Arming `fail_nth(op, n)` makes the n-th call of `op` from now on fail with
/// [`MemoryStoreError::Injected`]. Each armed fault fires once.
#[derive(Debug, Default)]
pub struct FaultInjector {
    armed: Mutex<HashMap<StoreOp, usize>>,
}

impl FaultInjector {
    /// Fail the `nth` upcoming call of `op` (1 = the next call).
    pub fn fail_nth(&self, op: StoreOp, nth: usize) {
        self.armed.lock().insert(op, nth.max(1));
    }

    /// Fail the next call of `op`.
    pub fn fail_next(&self, op: StoreOp) {
        self.fail_nth(op, 1);
    }

    fn check(&self, op: StoreOp) -> LedgerResult<()> {
        let mut armed = self.armed.lock();
        let Some(remaining) = armed.get_mut(&op) else {
            return Ok(());
        };

        *remaining -= 1;
        if *remaining == 0 {
            armed.remove(&op);
            debug!(?op, "Injected store fault");
            return Err(LedgerError::store(MemoryStoreError::Injected(op)));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    entries: BTreeMap<EntryId, Entry>,
    transfers: BTreeMap<TransferId, Transfer>,
}

#[derive(Debug)]
struct Shared {
    tables: RwLock<Tables>,
    row_locks: DashMap<AccountId, Arc<RowMutex<()>>>,
    account_seq: AtomicI64,
    entry_seq: AtomicI64,
    transfer_seq: AtomicI64,
    lock_timeout: Option<Duration>,
    faults: FaultInjector,
}

impl Shared {
    fn committed_account(&self, id: AccountId) -> Option<Account> {
        self.tables.read().accounts.get(&id).cloned()
    }

    fn row_lock(&self, id: AccountId) -> Arc<RowMutex<()>> {
        self.row_locks.entry(id).or_default().clone()
    }
}

/// Ledger store held entirely in memory.
///
/// Cloning is cheap and every clone shares the same tables.
#[derive(Debug, Clone)]
pub struct MemoryLedgerStore {
    shared: Arc<Shared>,
}

impl MemoryLedgerStore {
    /// Create an empty store. Lock waits are unbounded.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create an empty store whose row-lock waits fail after `limit`.
    pub fn with_lock_timeout(limit: Duration) -> Self {
        Self::build(Some(limit))
    }

    fn build(lock_timeout: Option<Duration>) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                row_locks: DashMap::new(),
                account_seq: AtomicI64::new(1),
                entry_seq: AtomicI64::new(1),
                transfer_seq: AtomicI64::new(1),
                lock_timeout,
                faults: FaultInjector::default(),
            }),
        }
    }

    /// Fault injection controls.
    pub fn faults(&self) -> &FaultInjector {
        &self.shared.faults
    }

    /// Number of account rows currently locked by open transactions.
    pub fn locked_rows(&self) -> usize {
        self.shared
            .row_locks
            .iter()
            .filter(|row| row.value().try_lock().is_err())
            .count()
    }

    /// Number of committed entries and transfers.
    pub fn record_counts(&self) -> (usize, usize) {
        let tables = self.shared.tables.read();
        (tables.entries.len(), tables.transfers.len())
    }
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    type Tx = MemoryLedgerTx;

    async fn begin(&self) -> LedgerResult<MemoryLedgerTx> {
        self.shared.faults.check(StoreOp::Begin)?;
        Ok(MemoryLedgerTx {
            shared: self.shared.clone(),
            started_at: simplebank_common::now(),
            accounts: BTreeMap::new(),
            entries: Vec::new(),
            transfers: Vec::new(),
            held: HashMap::new(),
        })
    }

    async fn get_account(&self, id: AccountId) -> LedgerResult<Account> {
        self.shared
            .committed_account(id)
            .ok_or_else(|| LedgerError::account_not_found(id))
    }

    async fn list_accounts(
        &self,
        owner: &Owner,
        limit: i64,
        offset: i64,
    ) -> LedgerResult<Vec<Account>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        let offset = usize::try_from(offset).unwrap_or(0);
        let tables = self.shared.tables.read();
        Ok(tables
            .accounts
            .values()
            .filter(|a| a.is_owned_by(owner))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_entries(&self, account_id: AccountId) -> LedgerResult<Vec<Entry>> {
        let tables = self.shared.tables.read();
        Ok(tables
            .entries
            .values()
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn get_transfer(&self, id: TransferId) -> LedgerResult<Transfer> {
        self.shared
            .tables
            .read()
            .transfers
            .get(&id)
            .cloned()
            .ok_or(LedgerError::NotFound {
                entity: Entity::Transfer,
                id: id.get(),
            })
    }

    async fn list_transfers(&self, account_id: AccountId) -> LedgerResult<Vec<Transfer>> {
        let tables = self.shared.tables.read();
        Ok(tables
            .transfers
            .values()
            .filter(|t| t.involves(account_id))
            .cloned()
            .collect())
    }
}

/// Transaction handle for [`MemoryLedgerStore`].
///
/// Holds its write buffer and the row-lock guards it acquired. Dropping it
/// discards the buffer and releases the guards.
#[derive(Debug)]
pub struct MemoryLedgerTx {
    shared: Arc<Shared>,
    started_at: Timestamp,
    accounts: BTreeMap<AccountId, Account>,
    entries: Vec<Entry>,
    transfers: Vec<Transfer>,
    held: HashMap<AccountId, OwnedMutexGuard<()>>,
}

impl MemoryLedgerTx {
    /// Account as this transaction sees it: own writes first, then committed state.
    fn visible_account(&self, id: AccountId) -> Option<Account> {
        self.accounts
            .get(&id)
            .cloned()
            .or_else(|| self.shared.committed_account(id))
    }

    fn require_account(&self, id: AccountId) -> LedgerResult<Account> {
        self.visible_account(id)
            .ok_or_else(|| LedgerError::account_not_found(id))
    }

    fn require_reference(&self, table: &'static str, account_id: AccountId) -> LedgerResult<()> {
        if self.visible_account(account_id).is_some() {
            Ok(())
        } else {
            Err(LedgerError::store(MemoryStoreError::ForeignKeyViolation {
                table,
                account_id,
            }))
        }
    }

    async fn lock_row(&mut self, id: AccountId) -> LedgerResult<()> {
        if self.held.contains_key(&id) {
            return Ok(());
        }

        let row = self.shared.row_lock(id);
        let guard = match self.shared.lock_timeout {
            Some(limit) => tokio::time::timeout(limit, row.lock_owned())
                .await
                .map_err(|_| LedgerError::store(MemoryStoreError::LockTimeout(id)))?,
            None => row.lock_owned().await,
        };

        trace!(account_id = %id, "Row lock acquired");
        self.held.insert(id, guard);
        Ok(())
    }
}

#[async_trait]
impl LedgerTx for MemoryLedgerTx {
    async fn get_account(&mut self, id: AccountId) -> LedgerResult<Account> {
        self.require_account(id)
    }

    async fn get_account_for_update(&mut self, id: AccountId) -> LedgerResult<Account> {
        self.shared.faults.check(StoreOp::GetAccountForUpdate)?;
        // Missing rows are reported without waiting, like SELECT ... FOR UPDATE.
        self.require_account(id)?;
        self.lock_row(id).await?;
        self.require_account(id)
    }

    async fn update_account_balance(
        &mut self,
        id: AccountId,
        balance: MinorUnits,
    ) -> LedgerResult<Account> {
        self.shared.faults.check(StoreOp::UpdateAccountBalance)?;
        self.require_account(id)?;
        self.lock_row(id).await?;

        let mut account = self.require_account(id)?;
        account.balance = balance;
        self.accounts.insert(id, account.clone());
        Ok(account)
    }

    async fn create_account(&mut self, account: NewAccount) -> LedgerResult<Account> {
        self.shared.faults.check(StoreOp::CreateAccount)?;

        let id = AccountId::new(self.shared.account_seq.fetch_add(1, Ordering::SeqCst));
        let account = Account {
            id,
            owner: account.owner,
            balance: account.balance,
            currency: account.currency,
            created_at: self.started_at,
        };
        self.accounts.insert(id, account.clone());
        Ok(account)
    }

    async fn create_entry(
        &mut self,
        account_id: AccountId,
        amount: MinorUnits,
    ) -> LedgerResult<Entry> {
        self.shared.faults.check(StoreOp::CreateEntry)?;
        self.require_reference("entries", account_id)?;

        let entry = Entry {
            id: EntryId::new(self.shared.entry_seq.fetch_add(1, Ordering::SeqCst)),
            account_id,
            amount,
            created_at: self.started_at,
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    async fn create_transfer(
        &mut self,
        from: AccountId,
        to: AccountId,
        amount: MinorUnits,
    ) -> LedgerResult<Transfer> {
        self.shared.faults.check(StoreOp::CreateTransfer)?;
        self.require_reference("transfers", from)?;
        self.require_reference("transfers", to)?;

        let transfer = Transfer {
            id: TransferId::new(self.shared.transfer_seq.fetch_add(1, Ordering::SeqCst)),
            from_account_id: from,
            to_account_id: to,
            amount,
            created_at: self.started_at,
        };
        self.transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn list_entries(&mut self, account_id: AccountId) -> LedgerResult<Vec<Entry>> {
        let mut entries: Vec<Entry> = {
            let tables = self.shared.tables.read();
            tables
                .entries
                .values()
                .filter(|e| e.account_id == account_id)
                .cloned()
                .collect()
        };
        entries.extend(
            self.entries
                .iter()
                .filter(|e| e.account_id == account_id)
                .cloned(),
        );
        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    async fn commit(mut self) -> LedgerResult<()> {
        self.shared.faults.check(StoreOp::Commit)?;

        let accounts = std::mem::take(&mut self.accounts);
        let entries = std::mem::take(&mut self.entries);
        let transfers = std::mem::take(&mut self.transfers);
        {
            let mut tables = self.shared.tables.write();
            tables.accounts.extend(accounts);
            tables.entries.extend(entries.into_iter().map(|e| (e.id, e)));
            tables
                .transfers
                .extend(transfers.into_iter().map(|t| (t.id, t)));
        }

        trace!(locks = self.held.len(), "Transaction committed");
        // Row locks are released only after the writes are visible.
        drop(self);
        Ok(())
    }

    async fn rollback(self) -> LedgerResult<()> {
        self.shared.faults.check(StoreOp::Rollback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simplebank_common::Currency;

    async fn seeded_store(balances: &[i64]) -> (MemoryLedgerStore, Vec<AccountId>) {
        let store = MemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        let mut ids = Vec::new();
        for (i, balance) in balances.iter().enumerate() {
            let account = tx
                .create_account(NewAccount::new(
                    format!("owner_{i}"),
                    Currency::brl(),
                    *balance,
                ))
                .await
                .unwrap();
            ids.push(account.id);
        }
        tx.commit().await.unwrap();
        (store, ids)
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let (store, ids) = seeded_store(&[100]).await;

        let mut tx = store.begin().await.unwrap();
        tx.update_account_balance(ids[0], 5).await.unwrap();
        tx.create_entry(ids[0], -95).await.unwrap();

        // The transaction sees its own write, other readers do not.
        assert_eq!(tx.get_account(ids[0]).await.unwrap().balance, 5);
        assert_eq!(store.get_account(ids[0]).await.unwrap().balance, 100);
        assert!(store.list_entries(ids[0]).await.unwrap().is_empty());

        tx.commit().await.unwrap();
        assert_eq!(store.get_account(ids[0]).await.unwrap().balance, 5);
        assert_eq!(store.list_entries(ids[0]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_writes_and_releases_locks() {
        let (store, ids) = seeded_store(&[100]).await;

        {
            let mut tx = store.begin().await.unwrap();
            tx.get_account_for_update(ids[0]).await.unwrap();
            tx.update_account_balance(ids[0], 0).await.unwrap();
            assert_eq!(store.locked_rows(), 1);
        }

        assert_eq!(store.locked_rows(), 0);
        assert_eq!(store.get_account(ids[0]).await.unwrap().balance, 100);
    }

    #[tokio::test]
    async fn test_lock_for_update_blocks_second_locker() {
        let (store, ids) = seeded_store(&[100]).await;

        let mut holder = store.begin().await.unwrap();
        holder.get_account_for_update(ids[0]).await.unwrap();
        holder.update_account_balance(ids[0], 60).await.unwrap();

        let contender_store = store.clone();
        let id = ids[0];
        let contender = tokio::spawn(async move {
            let mut tx = contender_store.begin().await.unwrap();
            let account = tx.get_account_for_update(id).await.unwrap();
            tx.rollback().await.unwrap();
            account.balance
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        holder.commit().await.unwrap();
        // The contender re-reads after the holder's commit.
        assert_eq!(contender.await.unwrap(), 60);
    }

    #[tokio::test]
    async fn test_lock_for_update_missing_account() {
        let (store, _) = seeded_store(&[]).await;
        let mut tx = store.begin().await.unwrap();

        let err = tx
            .get_account_for_update(AccountId::new(404))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::NotFound {
                entity: Entity::Account,
                id: 404
            }
        ));
        assert_eq!(store.locked_rows(), 0);
    }

    #[tokio::test]
    async fn test_entry_requires_existing_account() {
        let (store, _) = seeded_store(&[]).await;
        let mut tx = store.begin().await.unwrap();

        let err = tx.create_entry(AccountId::new(3), 10).await.unwrap_err();
        assert!(matches!(err, LedgerError::Store(_)));
        assert!(err.to_string().contains("foreign key"));
    }

    #[tokio::test]
    async fn test_lock_timeout() {
        let store = MemoryLedgerStore::with_lock_timeout(Duration::from_millis(20));
        let mut tx = store.begin().await.unwrap();
        let id = tx
            .create_account(NewAccount::empty("alice", Currency::usd()))
            .await
            .unwrap()
            .id;
        tx.commit().await.unwrap();

        let mut holder = store.begin().await.unwrap();
        holder.get_account_for_update(id).await.unwrap();

        let mut waiter = store.begin().await.unwrap();
        let err = waiter.get_account_for_update(id).await.unwrap_err();
        assert!(err.to_string().contains("Timed out waiting for lock"));
    }

    #[tokio::test]
    async fn test_fault_fires_once_on_nth_call() {
        let (store, ids) = seeded_store(&[10, 10]).await;
        store.faults().fail_nth(StoreOp::CreateEntry, 2);

        let mut tx = store.begin().await.unwrap();
        assert!(tx.create_entry(ids[0], -1).await.is_ok());
        assert!(tx.create_entry(ids[1], 1).await.is_err());
        assert!(tx.create_entry(ids[1], 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_list_accounts_paginates_by_owner() {
        let store = MemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        for _ in 0..4 {
            tx.create_account(NewAccount::empty("alice", Currency::usd()))
                .await
                .unwrap();
        }
        tx.create_account(NewAccount::empty("bob", Currency::usd()))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let alice = Owner::new("alice");
        let page = store.list_accounts(&alice, 2, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        assert!(page.iter().all(|a| a.is_owned_by(&alice)));
        assert_eq!(page[0].id, AccountId::new(3));
    }
}
