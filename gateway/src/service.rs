//! Transfer service: the entry point callers use.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use simplebank_common::{AccountId, Currency, MinorUnits};
use simplebank_ledger::{Account, LedgerError, LedgerStore, NewAccount, TransferEngine, TransferResult};

use crate::auth::Authorizer;
use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::metrics::{Metrics, SharedMetrics};
use crate::validator::TransferValidator;

/// Smallest accepted page size.
const MIN_PAGE_SIZE: i32 = 5;
/// Largest accepted page size.
const MAX_PAGE_SIZE: i32 = 10;

/// Request to move money between two accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTransferRequest {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub currency: String,
    pub amount: MinorUnits,
}

/// One page of the caller's accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListAccountsRequest {
    /// 1-based page number.
    pub page_id: i32,
    /// Accounts per page.
    pub page_size: i32,
}

impl ListAccountsRequest {
    fn limit_offset(&self) -> GatewayResult<(i64, i64)> {
        if self.page_id < 1 || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(GatewayError::InvalidPage);
        }
        let limit = i64::from(self.page_size);
        Ok((limit, (i64::from(self.page_id) - 1) * limit))
    }
}

/// Authorizes, validates and executes caller requests against the ledger.
pub struct TransferService<S: LedgerStore> {
    engine: TransferEngine<S>,
    validator: TransferValidator<S>,
    authorizer: Arc<dyn Authorizer>,
    metrics: SharedMetrics,
    transfer_timeout: Duration,
}

impl<S: LedgerStore> TransferService<S> {
    /// Create a service over a store.
    pub fn new(store: Arc<S>, authorizer: Arc<dyn Authorizer>, config: &GatewayConfig) -> Self {
        Self {
            engine: TransferEngine::new(store.clone()),
            validator: TransferValidator::new(store),
            authorizer,
            metrics: Arc::new(Metrics::new()),
            transfer_timeout: config.transfer_timeout,
        }
    }

    /// Underlying transfer engine.
    pub fn engine(&self) -> &TransferEngine<S> {
        &self.engine
    }

    /// Service metrics.
    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    /// Move money on behalf of the caller holding `credential`.
    #[instrument(
        skip(self, credential, request),
        fields(from = %request.from_account_id, to = %request.to_account_id, amount = request.amount)
    )]
    pub async fn create_transfer(
        &self,
        credential: &str,
        request: CreateTransferRequest,
    ) -> GatewayResult<TransferResult> {
        self.metrics.transfer_received();

        if let Err(e) = self.admit(credential, &request).await {
            self.metrics.transfer_rejected();
            warn!(error = %e, code = e.error_code(), "Transfer rejected");
            return Err(e);
        }

        self.metrics.transfer_started();
        let outcome = self
            .engine
            .execute_with_timeout(
                request.from_account_id,
                request.to_account_id,
                request.amount,
                self.transfer_timeout,
            )
            .await;

        match outcome {
            Ok(result) => {
                self.metrics.transfer_success();
                Ok(result)
            }
            Err(e) => {
                match &e {
                    LedgerError::DeadlineExceeded(_) => self.metrics.timeout(),
                    e if e.is_fatal() => {
                        self.metrics.rollback_failure();
                        error!(error = %e, "Transfer outcome unknown, reconciliation required");
                    }
                    _ => self.metrics.transfer_failed(),
                }
                warn!(error = %e, code = e.error_code(), "Transfer failed");
                Err(e.into())
            }
        }
    }

    async fn admit(&self, credential: &str, request: &CreateTransferRequest) -> GatewayResult<()> {
        let caller = self.authorizer.authorize(credential).await?;
        self.validator
            .validate(
                &caller,
                request.from_account_id,
                request.to_account_id,
                &request.currency,
                request.amount,
            )
            .await
    }

    /// Open an empty account in `currency` for the caller.
    #[instrument(skip(self, credential))]
    pub async fn open_account(&self, credential: &str, currency: &str) -> GatewayResult<Account> {
        let caller = self.authorizer.authorize(credential).await?;
        let currency = Currency::parse(currency)
            .map_err(|_| GatewayError::UnsupportedCurrency(currency.to_string()))?;

        let account = self
            .engine
            .open_account(NewAccount::empty(caller.owner, currency))
            .await?;
        info!(account_id = %account.id, "Account opened for caller");
        Ok(account)
    }

    /// Get one of the caller's accounts.
    #[instrument(skip(self, credential))]
    pub async fn get_account(&self, credential: &str, id: AccountId) -> GatewayResult<Account> {
        let caller = self.authorizer.authorize(credential).await?;
        let account = self.validator.load(id).await?;
        if !account.is_owned_by(&caller.owner) {
            return Err(GatewayError::NotOwner { account_id: id });
        }
        Ok(account)
    }

    /// List the caller's accounts, one page at a time.
    #[instrument(skip(self, credential))]
    pub async fn list_accounts(
        &self,
        credential: &str,
        page: ListAccountsRequest,
    ) -> GatewayResult<Vec<Account>> {
        let caller = self.authorizer.authorize(credential).await?;
        let (limit, offset) = page.limit_offset()?;
        Ok(self
            .engine
            .store()
            .list_accounts(&caller.owner, limit, offset)
            .await?)
    }
}
