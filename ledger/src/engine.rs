//! Transfer engine: one money movement as one atomic transaction.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use simplebank_common::{AccountId, MinorUnits};

use crate::account::{Account, NewAccount};
use crate::balance::BalanceCheck;
use crate::error::{LedgerError, LedgerResult};
use crate::store::{run_in_transaction, LedgerStore, LedgerTx};
use crate::transfer::{lock_order, TransferResult};

/// Moves money between accounts.
///
/// The engine keeps no state between calls; every invocation runs in its own
/// store transaction. It trusts its inputs: authorization, currency matching
/// and amount checks belong to the caller.
pub struct TransferEngine<S: LedgerStore> {
    store: Arc<S>,
}

impl<S: LedgerStore> TransferEngine<S> {
    /// Create an engine over a store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Store the engine writes to.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Move `amount` from one account to another.
    ///
    /// Writes the transfer record, the debit and credit entries and both
    /// balance updates in one transaction. Both account rows are locked in
    /// ascending id order whatever the direction of the transfer. Any failure
    /// rolls everything back and is returned as is; nothing is retried.
    ///
    /// # Panics
    ///
    /// Panics if `amount <= 0` or `from == to`. Callers validate both before
    /// calling.
    #[instrument(skip(self), fields(transfer_id))]
    pub async fn execute(
        &self,
        from: AccountId,
        to: AccountId,
        amount: MinorUnits,
    ) -> LedgerResult<TransferResult> {
        assert!(amount > 0, "transfer amount must be positive, got {amount}");
        assert_ne!(from, to, "transfer must move money between two accounts");

        let result = run_in_transaction(self.store.as_ref(), move |tx| {
            Box::pin(async move {
                let transfer = tx.create_transfer(from, to, amount).await?;
                let from_entry = tx.create_entry(from, -amount).await?;
                let to_entry = tx.create_entry(to, amount).await?;

                let delta = |id: AccountId| if id == from { -amount } else { amount };
                let [first, second] = lock_order(from, to);
                let first_account = apply_delta(tx, first, delta(first)).await?;
                let second_account = apply_delta(tx, second, delta(second)).await?;

                let (from_account, to_account) = if first == from {
                    (first_account, second_account)
                } else {
                    (second_account, first_account)
                };

                Ok::<_, LedgerError>(TransferResult {
                    transfer,
                    from_account,
                    to_account,
                    from_entry,
                    to_entry,
                })
            })
        })
        .await?;

        tracing::Span::current().record("transfer_id", result.transfer.id.get());
        info!(
            transfer_id = %result.transfer.id,
            from_balance = result.from_account.balance,
            to_balance = result.to_account.balance,
            "Transfer committed"
        );

        Ok(result)
    }

    /// [`execute`](Self::execute) bounded by a deadline.
    ///
    /// When the deadline passes the in-flight transaction is dropped, which
    /// rolls it back and releases its row locks.
    pub async fn execute_with_timeout(
        &self,
        from: AccountId,
        to: AccountId,
        amount: MinorUnits,
        deadline: Duration,
    ) -> LedgerResult<TransferResult> {
        match tokio::time::timeout(deadline, self.execute(from, to, amount)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%from, %to, amount, ?deadline, "Transfer deadline exceeded");
                Err(LedgerError::DeadlineExceeded(deadline))
            }
        }
    }

    /// Open an account. A non-zero opening balance is recorded as an entry
    /// in the same transaction.
    #[instrument(skip(self, account), fields(owner = %account.owner, currency = %account.currency))]
    pub async fn open_account(&self, account: NewAccount) -> LedgerResult<Account> {
        let account = run_in_transaction(self.store.as_ref(), move |tx| {
            Box::pin(async move {
                let opening_balance = account.balance;
                let created = tx.create_account(account).await?;
                if opening_balance != 0 {
                    tx.create_entry(created.id, opening_balance).await?;
                }
                Ok::<_, LedgerError>(created)
            })
        })
        .await?;

        info!(account_id = %account.id, balance = account.balance, "Account opened");
        Ok(account)
    }

    /// Compare an account's balance with the sum of its entries.
    ///
    /// The account row is locked while the entries are summed, so no transfer
    /// can commit in between.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, account_id: AccountId) -> LedgerResult<BalanceCheck> {
        let check = run_in_transaction(self.store.as_ref(), move |tx| {
            Box::pin(async move {
                let account = tx.get_account_for_update(account_id).await?;
                let entries = tx.list_entries(account_id).await?;
                Ok::<_, LedgerError>(BalanceCheck::new(&account, &entries))
            })
        })
        .await?;

        if !check.is_consistent() {
            warn!(
                %account_id,
                balance = check.balance,
                drift = %check.drift(),
                "Balance does not match ledger"
            );
        }
        Ok(check)
    }
}

impl<S: LedgerStore> Clone for TransferEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

/// Lock an account, add `delta` to its balance and persist it.
async fn apply_delta<T: LedgerTx>(
    tx: &mut T,
    id: AccountId,
    delta: MinorUnits,
) -> LedgerResult<Account> {
    let account = tx.get_account_for_update(id).await?;
    let balance = account
        .balance_after(delta)
        .ok_or(LedgerError::BalanceOutOfRange(id))?;
    tx.update_account_balance(id, balance).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::EntryType;
    use crate::memory::{MemoryLedgerStore, StoreOp};
    use proptest::prelude::*;
    use simplebank_common::{Currency, TransferId};

    fn new_engine() -> TransferEngine<MemoryLedgerStore> {
        TransferEngine::new(Arc::new(MemoryLedgerStore::new()))
    }

    async fn open(engine: &TransferEngine<MemoryLedgerStore>, owner: &str, balance: i64) -> Account {
        engine
            .open_account(NewAccount::new(owner, Currency::brl(), balance))
            .await
            .unwrap()
    }

    async fn balance_of(engine: &TransferEngine<MemoryLedgerStore>, id: AccountId) -> i64 {
        engine.store().get_account(id).await.unwrap().balance
    }

    #[tokio::test]
    async fn test_transfer_moves_money() {
        let engine = new_engine();
        let a = open(&engine, "alice", 100).await;
        let b = open(&engine, "bob", 50).await;

        let result = engine.execute(a.id, b.id, 30).await.unwrap();

        assert_eq!(result.from_account.balance, 70);
        assert_eq!(result.to_account.balance, 80);
        assert_eq!(result.from_entry.amount, -30);
        assert_eq!(result.to_entry.amount, 30);
        assert_eq!(result.transfer.amount, 30);
        assert_eq!(result.transfer.from_account_id, a.id);
        assert_eq!(result.transfer.to_account_id, b.id);
        assert_eq!(result.from_entry.account_id, a.id);
        assert_eq!(result.to_entry.account_id, b.id);
        assert!(result.journal().is_balanced());

        assert_eq!(balance_of(&engine, a.id).await, 70);
        assert_eq!(balance_of(&engine, b.id).await, 80);

        let stored = engine.store().get_transfer(result.transfer.id).await.unwrap();
        assert_eq!(stored, result.transfer);
    }

    #[tokio::test]
    async fn test_unknown_transfer_not_found() {
        let engine = new_engine();
        let err = engine
            .store()
            .get_transfer(TransferId::new(404))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Transfer not found: 404");
    }

    #[tokio::test]
    async fn test_transfer_from_higher_to_lower_id() {
        let engine = new_engine();
        let a = open(&engine, "alice", 100).await;
        let b = open(&engine, "bob", 50).await;
        assert!(a.id < b.id);

        let result = engine.execute(b.id, a.id, 20).await.unwrap();

        // Roles are kept even though the locks were taken the other way round.
        assert_eq!(result.from_account.id, b.id);
        assert_eq!(result.from_account.balance, 30);
        assert_eq!(result.to_account.id, a.id);
        assert_eq!(result.to_account.balance, 120);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_opposite_transfers_serialize() {
        let engine = new_engine();
        let a = open(&engine, "alice", 100).await;
        let b = open(&engine, "bob", 50).await;

        let forward = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.execute(a.id, b.id, 30).await })
        };
        let backward = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.execute(b.id, a.id, 10).await })
        };

        forward.await.unwrap().unwrap();
        backward.await.unwrap().unwrap();

        assert_eq!(balance_of(&engine, a.id).await, 80);
        assert_eq!(balance_of(&engine, b.id).await, 70);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_alternating_transfers_do_not_deadlock() {
        let engine = new_engine();
        let a = open(&engine, "alice", 10_000).await;
        let b = open(&engine, "bob", 10_000).await;

        let n = 50;
        let mut handles = Vec::with_capacity(n);
        for i in 0..n {
            let engine = engine.clone();
            let amount = (i as i64 % 7) + 1;
            let (from, to) = if i % 2 == 0 { (a.id, b.id) } else { (b.id, a.id) };
            handles.push(tokio::spawn(async move {
                engine
                    .execute_with_timeout(from, to, amount, Duration::from_secs(5))
                    .await
                    .map(|_| (from, amount))
            }));
        }

        let mut expected_a = 10_000;
        for handle in handles {
            let (from, amount) = handle.await.unwrap().unwrap();
            if from == a.id {
                expected_a -= amount;
            } else {
                expected_a += amount;
            }
        }

        assert_eq!(balance_of(&engine, a.id).await, expected_a);
        assert_eq!(balance_of(&engine, b.id).await, 20_000 - expected_a);
        assert_eq!(engine.store().locked_rows(), 0);

        let (entries, transfers) = engine.store().record_counts();
        // Two opening entries plus two per transfer.
        assert_eq!(entries, 2 + 2 * n);
        assert_eq!(transfers, n);
    }

    #[tokio::test]
    async fn test_locks_taken_in_ascending_order() {
        let engine = new_engine();
        let low = open(&engine, "alice", 100).await;
        let high = open(&engine, "bob", 100).await;

        // Hold the higher row so the engine has to wait on it.
        let mut holder = engine.store().begin().await.unwrap();
        holder.get_account_for_update(high.id).await.unwrap();

        let pending = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.execute(high.id, low.id, 10).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The engine already holds the lower row while it waits for the higher.
        assert!(!pending.is_finished());
        assert_eq!(engine.store().locked_rows(), 2);

        holder.rollback().await.unwrap();
        let result = pending.await.unwrap().unwrap();
        assert_eq!(result.from_account.balance, 90);
        assert_eq!(result.to_account.balance, 110);
    }

    #[tokio::test]
    async fn test_failure_at_any_step_leaves_no_trace() {
        let faults = [
            (StoreOp::CreateTransfer, 1),
            (StoreOp::CreateEntry, 1),
            (StoreOp::CreateEntry, 2),
            (StoreOp::GetAccountForUpdate, 1),
            (StoreOp::UpdateAccountBalance, 1),
            (StoreOp::GetAccountForUpdate, 2),
            (StoreOp::UpdateAccountBalance, 2),
            (StoreOp::Commit, 1),
        ];

        for (op, nth) in faults {
            let engine = new_engine();
            let a = open(&engine, "alice", 100).await;
            let b = open(&engine, "bob", 50).await;
            let before = engine.store().record_counts();

            engine.store().faults().fail_nth(op, nth);
            let err = engine.execute(a.id, b.id, 30).await.unwrap_err();

            assert!(matches!(err, LedgerError::Store(_)), "{op:?}#{nth}: {err}");
            assert_eq!(engine.store().record_counts(), before, "{op:?}#{nth}");
            assert_eq!(balance_of(&engine, a.id).await, 100, "{op:?}#{nth}");
            assert_eq!(balance_of(&engine, b.id).await, 50, "{op:?}#{nth}");
            assert!(engine.store().list_transfers(a.id).await.unwrap().is_empty());
            assert_eq!(engine.store().locked_rows(), 0, "{op:?}#{nth}");
        }
    }

    #[tokio::test]
    async fn test_rollback_failure_reports_both_errors() {
        let engine = new_engine();
        let a = open(&engine, "alice", 100).await;
        let b = open(&engine, "bob", 50).await;

        engine.store().faults().fail_nth(StoreOp::CreateEntry, 2);
        engine.store().faults().fail_next(StoreOp::Rollback);

        let err = engine.execute(a.id, b.id, 30).await.unwrap_err();
        assert!(err.is_fatal());
        match err {
            LedgerError::Rollback { cause, rollback } => {
                assert!(cause.to_string().contains("CreateEntry"));
                assert!(rollback.to_string().contains("Rollback"));
            }
            other => panic!("expected rollback error, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_account_aborts_transfer() {
        let engine = new_engine();
        let a = open(&engine, "alice", 100).await;
        let missing = AccountId::new(999);

        let err = engine.execute(a.id, missing, 30).await.unwrap_err();
        assert!(matches!(err, LedgerError::Store(_)));
        assert_eq!(balance_of(&engine, a.id).await, 100);
        assert_eq!(engine.store().record_counts(), (1, 0));
    }

    #[tokio::test]
    async fn test_balance_overflow_is_rejected() {
        let engine = new_engine();
        let a = open(&engine, "alice", 100).await;
        let b = open(&engine, "bob", i64::MAX).await;

        let err = engine.execute(a.id, b.id, 1).await.unwrap_err();
        assert!(matches!(err, LedgerError::BalanceOutOfRange(id) if id == b.id));
        assert_eq!(balance_of(&engine, a.id).await, 100);
        assert_eq!(balance_of(&engine, b.id).await, i64::MAX);
    }

    #[tokio::test]
    async fn test_deadline_abandons_transaction() {
        let engine = new_engine();
        let a = open(&engine, "alice", 100).await;
        let b = open(&engine, "bob", 50).await;
        let before = engine.store().record_counts();

        let mut holder = engine.store().begin().await.unwrap();
        holder.get_account_for_update(b.id).await.unwrap();

        let err = engine
            .execute_with_timeout(a.id, b.id, 30, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::DeadlineExceeded(_)));

        // Only the holder's lock remains.
        assert_eq!(engine.store().locked_rows(), 1);
        holder.rollback().await.unwrap();
        assert_eq!(engine.store().locked_rows(), 0);

        assert_eq!(engine.store().record_counts(), before);
        assert_eq!(balance_of(&engine, a.id).await, 100);
        assert_eq!(balance_of(&engine, b.id).await, 50);
    }

    #[tokio::test]
    async fn test_repeated_reads_are_stable() {
        let engine = new_engine();
        let a = open(&engine, "alice", 100).await;

        let first = engine.store().get_account(a.id).await.unwrap();
        for _ in 0..5 {
            assert_eq!(engine.store().get_account(a.id).await.unwrap(), first);
        }
    }

    #[tokio::test]
    async fn test_entries_pair_with_transfer() {
        let engine = new_engine();
        let a = open(&engine, "alice", 500).await;
        let b = open(&engine, "bob", 500).await;

        engine.execute(a.id, b.id, 40).await.unwrap();
        engine.execute(b.id, a.id, 15).await.unwrap();
        engine.execute(a.id, b.id, 5).await.unwrap();

        for transfer in engine.store().list_transfers(a.id).await.unwrap() {
            let at_transfer = |entries: Vec<crate::journal::Entry>| -> Vec<_> {
                entries
                    .into_iter()
                    .filter(|e| e.created_at == transfer.created_at)
                    .collect()
            };

            let debits = at_transfer(
                engine
                    .store()
                    .list_entries(transfer.from_account_id)
                    .await
                    .unwrap(),
            );
            let credits = at_transfer(
                engine
                    .store()
                    .list_entries(transfer.to_account_id)
                    .await
                    .unwrap(),
            );

            assert_eq!(debits.len(), 1);
            assert_eq!(debits[0].amount, -transfer.amount);
            assert_eq!(debits[0].entry_type(), EntryType::Debit);
            assert_eq!(credits.len(), 1);
            assert_eq!(credits[0].amount, transfer.amount);
            assert_eq!(credits[0].entry_type(), EntryType::Credit);
        }
    }

    #[tokio::test]
    async fn test_open_account_records_opening_entry() {
        let engine = new_engine();
        let funded = open(&engine, "alice", 250).await;
        let empty = open(&engine, "bob", 0).await;

        let entries = engine.store().list_entries(funded.id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].amount, 250);
        assert!(engine.store().list_entries(empty.id).await.unwrap().is_empty());

        assert!(engine.reconcile(funded.id).await.unwrap().is_consistent());
        assert!(engine.reconcile(empty.id).await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_reconcile_missing_account() {
        let engine = new_engine();
        let err = engine.reconcile(AccountId::new(12)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    #[should_panic(expected = "transfer amount must be positive")]
    async fn test_non_positive_amount_is_a_programming_error() {
        let engine = new_engine();
        let a = open(&engine, "alice", 100).await;
        let b = open(&engine, "bob", 50).await;
        let _ = engine.execute(a.id, b.id, 0).await;
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_transfers_conserve_money(
            moves in prop::collection::vec((0usize..3, 0usize..3, 1i64..500), 1..40)
        ) {
            tokio_test::block_on(async {
                let engine = new_engine();
                let mut ids = Vec::new();
                for owner in ["alice", "bob", "carol"] {
                    ids.push(open(&engine, owner, 1_000).await.id);
                }

                let mut expected = [1_000i64; 3];
                for (from, to, amount) in moves {
                    if from == to {
                        continue;
                    }
                    let result = engine.execute(ids[from], ids[to], amount).await.unwrap();
                    expected[from] -= amount;
                    expected[to] += amount;
                    assert_eq!(result.from_entry.amount + result.to_entry.amount, 0);
                }

                let mut total = 0;
                for (i, id) in ids.iter().enumerate() {
                    let balance = balance_of(&engine, *id).await;
                    assert_eq!(balance, expected[i]);
                    assert!(engine.reconcile(*id).await.unwrap().is_consistent());
                    total += balance;
                }
                assert_eq!(total, 3_000);
            });
        }
    }
}
