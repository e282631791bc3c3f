//! Transfer request validation.

use std::sync::Arc;

use tracing::debug;

use simplebank_common::{AccountId, Currency, MinorUnits, Owner};
use simplebank_ledger::{Account, LedgerError, LedgerStore};

use crate::auth::Identity;
use crate::error::{GatewayError, GatewayResult};

/// Which side of a transfer an account is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    From,
    To,
}

/// Checks a transfer request against committed account state before it
/// reaches the engine.
///
/// The checks read without locks. An account cannot change owner or currency
/// once created, so the result stays valid until the engine runs.
pub struct TransferValidator<S: LedgerStore> {
    store: Arc<S>,
}

impl<S: LedgerStore> TransferValidator<S> {
    /// Create a validator reading from `store`.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Validate a request made by `caller`.
    ///
    /// Checks, in order: the amount is at least one minor unit, the two
    /// accounts differ, the currency is supported, then each account exists
    /// and carries the request currency. The source must belong to the
    /// caller; the destination must not.
    pub async fn validate(
        &self,
        caller: &Identity,
        from: AccountId,
        to: AccountId,
        currency: &str,
        amount: MinorUnits,
    ) -> GatewayResult<()> {
        if amount < 1 {
            return Err(GatewayError::InvalidAmount(amount));
        }
        if from == to {
            return Err(GatewayError::SameAccount);
        }
        let currency = Currency::parse(currency)
            .map_err(|_| GatewayError::UnsupportedCurrency(currency.to_string()))?;

        self.check_account(&caller.owner, from, &currency, Side::From)
            .await?;
        self.check_account(&caller.owner, to, &currency, Side::To)
            .await?;

        debug!(%from, %to, amount, %currency, "Transfer request valid");
        Ok(())
    }

    async fn check_account(
        &self,
        caller: &Owner,
        id: AccountId,
        currency: &Currency,
        side: Side,
    ) -> GatewayResult<Account> {
        let account = self.load(id).await?;

        match side {
            Side::From if !account.is_owned_by(caller) => {
                return Err(GatewayError::NotOwner { account_id: id });
            }
            Side::To if account.is_owned_by(caller) => {
                return Err(GatewayError::SelfTransfer);
            }
            _ => {}
        }

        if &account.currency != currency {
            return Err(GatewayError::CurrencyMismatch {
                account_id: id,
                expected: currency.to_string(),
                actual: account.currency.to_string(),
            });
        }

        Ok(account)
    }

    /// Load an account, mapping a missing row to a client error.
    ///
    /// Ids the store never hands out are refused without a read.
    pub async fn load(&self, id: AccountId) -> GatewayResult<Account> {
        if !id.is_valid() {
            return Err(GatewayError::AccountNotFound(id));
        }
        match self.store.get_account(id).await {
            Ok(account) => Ok(account),
            Err(LedgerError::NotFound { .. }) => Err(GatewayError::AccountNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }
}
