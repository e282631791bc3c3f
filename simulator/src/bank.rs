//! Simulated bank customers.

use std::sync::Arc;

use tracing::info;

use simplebank_common::{AccountId, Currency, MinorUnits, Owner};
use simplebank_gateway::{TokenRegistry, TransferService};
use simplebank_ledger::{LedgerStore, NewAccount};

/// A customer with one funded account and a live access token.
#[derive(Debug, Clone)]
pub struct SimulatedCustomer {
    /// Customer name.
    pub owner: Owner,
    /// Access token issued by the registry.
    pub token: String,
    /// The customer's account.
    pub account: AccountId,
}

/// Creates funded customers.
pub struct CustomerFactory;

impl CustomerFactory {
    /// Open `count` accounts in `currency`, each funded with
    /// `opening_balance`, and issue a token for every owner.
    pub async fn create_customers<S: LedgerStore>(
        service: &TransferService<S>,
        registry: &Arc<TokenRegistry>,
        count: usize,
        currency: &Currency,
        opening_balance: MinorUnits,
    ) -> anyhow::Result<Vec<SimulatedCustomer>> {
        // Run ids keep owners unique when several runs share one database.
        let run_id: u32 = rand::random();
        let mut customers = Vec::with_capacity(count);

        for i in 0..count {
            let owner = Owner::new(format!("customer_{run_id:08x}_{}", i + 1));
            let account = service
                .engine()
                .open_account(NewAccount::new(owner.clone(), currency.clone(), opening_balance))
                .await?;
            let token = registry.issue(owner.clone())?;

            customers.push(SimulatedCustomer {
                owner,
                token,
                account: account.id,
            });
        }

        info!(count, %currency, opening_balance, "Customers funded");
        Ok(customers)
    }
}
