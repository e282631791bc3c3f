//! PostgreSQL ledger store.
//!
//! Expects the tables from `sql/schema.sql`. Locked reads use
//! `FOR NO KEY UPDATE`: it excludes other lockers and writers of the row but
//! not the `KEY SHARE` lock a foreign-key check takes when an entry for the
//! same account is inserted, so entry inserts never queue behind a balance
//! lock.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use tracing::{info, instrument};

use simplebank_common::{
    constants, duration_ms, AccountId, Currency, EntryId, MinorUnits, Owner, TransferId,
};

use crate::account::{Account, NewAccount};
use crate::error::{Entity, LedgerError, LedgerResult};
use crate::journal::Entry;
use crate::store::{LedgerStore, LedgerTx};
use crate::transfer::Transfer;

const ACCOUNT_COLUMNS: &str = "id, owner, balance, currency, created_at";

#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    id: i64,
    owner: String,
    balance: i64,
    currency: String,
    created_at: DateTime<Utc>,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Self {
            id: AccountId::new(row.id),
            owner: Owner::new(row.owner),
            balance: row.balance,
            currency: Currency::new(row.currency),
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EntryRow {
    id: i64,
    account_id: i64,
    amount: i64,
    created_at: DateTime<Utc>,
}

impl From<EntryRow> for Entry {
    fn from(row: EntryRow) -> Self {
        Self {
            id: EntryId::new(row.id),
            account_id: AccountId::new(row.account_id),
            amount: row.amount,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TransferRow {
    id: i64,
    from_account_id: i64,
    to_account_id: i64,
    amount: i64,
    created_at: DateTime<Utc>,
}

impl From<TransferRow> for Transfer {
    fn from(row: TransferRow) -> Self {
        Self {
            id: TransferId::new(row.id),
            from_account_id: AccountId::new(row.from_account_id),
            to_account_id: AccountId::new(row.to_account_id),
            amount: row.amount,
            created_at: row.created_at,
        }
    }
}

/// Table definitions for the ledger.
pub const SCHEMA: &str = include_str!("../sql/schema.sql");

/// Ledger store backed by a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
    lock_timeout: Option<Duration>,
}

impl PgLedgerStore {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: None,
        }
    }

    /// Connect a new pool.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> LedgerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(constants::connection_acquire_timeout())
            .connect(database_url)
            .await?;

        info!(max_connections, "Connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    /// Bound how long a statement in any transaction waits for a row lock.
    pub fn with_lock_timeout(mut self, limit: Duration) -> Self {
        self.lock_timeout = Some(limit);
        self
    }

    /// Underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the ledger tables if they do not exist yet.
    pub async fn apply_schema(&self) -> LedgerResult<()> {
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    type Tx = PgLedgerTx;

    async fn begin(&self) -> LedgerResult<PgLedgerTx> {
        let mut tx = self.pool.begin().await?;

        if let Some(limit) = self.lock_timeout {
            // SET does not take bind parameters; the value is a plain integer.
            let statement = format!("SET LOCAL lock_timeout = '{}ms'", duration_ms(limit));
            sqlx::query(&statement).execute(&mut *tx).await?;
        }

        Ok(PgLedgerTx { tx })
    }

    async fn get_account(&self, id: AccountId) -> LedgerResult<Account> {
        sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
        ))
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?
        .map(Account::from)
        .ok_or_else(|| LedgerError::account_not_found(id))
    }

    async fn list_accounts(
        &self,
        owner: &Owner,
        limit: i64,
        offset: i64,
    ) -> LedgerResult<Vec<Account>> {
        let rows = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE owner = $1 ORDER BY id LIMIT $2 OFFSET $3"
        ))
        .bind(owner.as_str())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Account::from).collect())
    }

    async fn list_entries(&self, account_id: AccountId) -> LedgerResult<Vec<Entry>> {
        let rows = sqlx::query_as::<_, EntryRow>(
            "SELECT id, account_id, amount, created_at FROM entries WHERE account_id = $1 ORDER BY id",
        )
        .bind(account_id.get())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Entry::from).collect())
    }

    async fn get_transfer(&self, id: TransferId) -> LedgerResult<Transfer> {
        sqlx::query_as::<_, TransferRow>(
            "SELECT id, from_account_id, to_account_id, amount, created_at FROM transfers WHERE id = $1",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?
        .map(Transfer::from)
        .ok_or(LedgerError::NotFound {
            entity: Entity::Transfer,
            id: id.get(),
        })
    }

    async fn list_transfers(&self, account_id: AccountId) -> LedgerResult<Vec<Transfer>> {
        let rows = sqlx::query_as::<_, TransferRow>(
            "SELECT id, from_account_id, to_account_id, amount, created_at FROM transfers \
             WHERE from_account_id = $1 OR to_account_id = $1 ORDER BY id",
        )
        .bind(account_id.get())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Transfer::from).collect())
    }
}

/// Transaction handle for [`PgLedgerStore`].
///
/// Dropping it without commit hands the connection back to the pool with a
/// rollback queued.
#[derive(Debug)]
pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn get_account(&mut self, id: AccountId) -> LedgerResult<Account> {
        sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
        ))
        .bind(id.get())
        .fetch_optional(&mut *self.tx)
        .await?
        .map(Account::from)
        .ok_or_else(|| LedgerError::account_not_found(id))
    }

    async fn get_account_for_update(&mut self, id: AccountId) -> LedgerResult<Account> {
        sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 FOR NO KEY UPDATE"
        ))
        .bind(id.get())
        .fetch_optional(&mut *self.tx)
        .await?
        .map(Account::from)
        .ok_or_else(|| LedgerError::account_not_found(id))
    }

    async fn update_account_balance(
        &mut self,
        id: AccountId,
        balance: MinorUnits,
    ) -> LedgerResult<Account> {
        sqlx::query_as::<_, AccountRow>(&format!(
            "UPDATE accounts SET balance = $2 WHERE id = $1 RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(id.get())
        .bind(balance)
        .fetch_optional(&mut *self.tx)
        .await?
        .map(Account::from)
        .ok_or_else(|| LedgerError::account_not_found(id))
    }

    async fn create_account(&mut self, account: NewAccount) -> LedgerResult<Account> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "INSERT INTO accounts (owner, balance, currency) VALUES ($1, $2, $3) \
             RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(account.owner.as_str())
        .bind(account.balance)
        .bind(account.currency.code())
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(row.into())
    }

    async fn create_entry(
        &mut self,
        account_id: AccountId,
        amount: MinorUnits,
    ) -> LedgerResult<Entry> {
        let row = sqlx::query_as::<_, EntryRow>(
            "INSERT INTO entries (account_id, amount) VALUES ($1, $2) \
             RETURNING id, account_id, amount, created_at",
        )
        .bind(account_id.get())
        .bind(amount)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(row.into())
    }

    async fn create_transfer(
        &mut self,
        from: AccountId,
        to: AccountId,
        amount: MinorUnits,
    ) -> LedgerResult<Transfer> {
        let row = sqlx::query_as::<_, TransferRow>(
            "INSERT INTO transfers (from_account_id, to_account_id, amount) VALUES ($1, $2, $3) \
             RETURNING id, from_account_id, to_account_id, amount, created_at",
        )
        .bind(from.get())
        .bind(to.get())
        .bind(amount)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(row.into())
    }

    async fn list_entries(&mut self, account_id: AccountId) -> LedgerResult<Vec<Entry>> {
        let rows = sqlx::query_as::<_, EntryRow>(
            "SELECT id, account_id, amount, created_at FROM entries WHERE account_id = $1 ORDER BY id",
        )
        .bind(account_id.get())
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows.into_iter().map(Entry::from).collect())
    }

    async fn commit(self) -> LedgerResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> LedgerResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
