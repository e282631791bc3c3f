//! Simulation controller.

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use simplebank_common::{AccountId, Currency, MinorUnits};
use simplebank_gateway::{
    CreateTransferRequest, GatewayConfig, GatewayError, MetricsSnapshot, TokenRegistry,
    TransferService,
};
use simplebank_ledger::{LedgerError, LedgerStore};

use crate::bank::{CustomerFactory, SimulatedCustomer};
use crate::metrics::{MetricsSummary, SimulationMetrics};
use crate::scenario::Scenario;

/// Parameters of one simulation run.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Customers to open.
    pub customers: usize,
    /// Transfers to run.
    pub transfers: usize,
    /// Transfers in flight at once.
    pub concurrency: usize,
    /// Opening balance of every customer account.
    pub opening_balance: MinorUnits,
    /// Largest transfer amount.
    pub max_amount: MinorUnits,
    /// Currency of every account.
    pub currency: Currency,
    /// Random seed for reproducibility.
    pub seed: Option<u64>,
}

/// Ledger checks run after the transfers.
#[derive(Debug, Clone, Serialize)]
pub struct Verification {
    /// Sum of opening balances.
    pub expected_total: i128,
    /// Sum of balances after the run.
    pub actual_total: i128,
    /// Accounts whose balance differs from the sum of their entries.
    pub inconsistent_accounts: Vec<AccountId>,
}

impl Verification {
    /// Check money was conserved and every account reconciles.
    pub fn passed(&self) -> bool {
        self.expected_total == self.actual_total && self.inconsistent_accounts.is_empty()
    }
}

/// Everything a run produced, printed as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub scenario: Scenario,
    pub customers: usize,
    pub concurrency: usize,
    pub elapsed_ms: u64,
    pub metrics: MetricsSummary,
    pub gateway: MetricsSnapshot,
    pub verification: Verification,
}

/// Outcome of a single transfer.
enum Outcome {
    Committed(u64),
    Rejected,
    Failed { timed_out: bool },
}

/// Controls the simulation.
pub struct SimulationController<S: LedgerStore> {
    config: SimulationConfig,
    service: Arc<TransferService<S>>,
    registry: Arc<TokenRegistry>,
    customers: Vec<SimulatedCustomer>,
    rng: StdRng,
    metrics: Arc<RwLock<SimulationMetrics>>,
}

impl<S: LedgerStore> SimulationController<S> {
    /// Create a controller over a store.
    pub fn new(store: Arc<S>, config: SimulationConfig, gateway: &GatewayConfig) -> Self {
        let rng = match config.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        let registry = Arc::new(TokenRegistry::new());
        let service = Arc::new(TransferService::new(store, registry.clone(), gateway));

        Self {
            config,
            service,
            registry,
            customers: Vec::new(),
            rng,
            metrics: Arc::new(RwLock::new(SimulationMetrics::new())),
        }
    }

    /// Open and fund the customer accounts.
    pub async fn initialize(&mut self) -> anyhow::Result<()> {
        info!(customers = self.config.customers, "Initializing simulation");

        self.customers = CustomerFactory::create_customers(
            &self.service,
            &self.registry,
            self.config.customers,
            &self.config.currency,
            self.config.opening_balance,
        )
        .await?;

        Ok(())
    }

    /// Run a scenario to completion, then verify the ledger.
    pub async fn run_scenario(&mut self, scenario: Scenario) -> anyhow::Result<SimulationReport> {
        if self.customers.len() < scenario.min_customers() {
            anyhow::bail!(
                "Scenario {:?} needs at least {} customers, have {}",
                scenario,
                scenario.min_customers(),
                self.customers.len()
            );
        }

        let plan = scenario.plan(
            &mut self.rng,
            self.customers.len(),
            self.config.transfers,
            self.config.max_amount,
        );
        info!(?scenario, transfers = plan.len(), concurrency = self.config.concurrency, "Running scenario");

        let start = Instant::now();
        let currency = self.config.currency.code().to_string();

        let outcomes = stream::iter(plan)
            .map(|planned| {
                let service = self.service.clone();
                let from = &self.customers[planned.from];
                let to = &self.customers[planned.to];
                let token = from.token.clone();
                let request = CreateTransferRequest {
                    from_account_id: from.account,
                    to_account_id: to.account,
                    currency: currency.clone(),
                    amount: planned.amount,
                };
                async move { Self::transfer(&service, &token, request).await }
            })
            .buffer_unordered(self.config.concurrency.max(1));

        futures::pin_mut!(outcomes);
        while let Some(outcome) = outcomes.next().await {
            let mut metrics = self.metrics.write().await;
            match outcome {
                Outcome::Committed(latency_ms) => metrics.record_success(latency_ms),
                Outcome::Rejected => metrics.record_rejection(),
                Outcome::Failed { timed_out } => metrics.record_failure(timed_out),
            }
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let verification = self.verify().await?;
        let metrics = self.metrics.read().await.summary(elapsed_ms);

        Ok(SimulationReport {
            scenario,
            customers: self.customers.len(),
            concurrency: self.config.concurrency,
            elapsed_ms,
            metrics,
            gateway: self.service.metrics().snapshot(),
            verification,
        })
    }

    async fn transfer(
        service: &TransferService<S>,
        token: &str,
        request: CreateTransferRequest,
    ) -> Outcome {
        let started = Instant::now();
        match service.create_transfer(token, request).await {
            Ok(result) => {
                debug!(transfer_id = %result.transfer.id, "Transfer committed");
                Outcome::Committed(started.elapsed().as_millis() as u64)
            }
            Err(e) if e.is_client_error() => Outcome::Rejected,
            Err(e) => Outcome::Failed {
                timed_out: matches!(e, GatewayError::Ledger(LedgerError::DeadlineExceeded(_))),
            },
        }
    }

    /// Check conservation across all customers and reconcile every account.
    pub async fn verify(&self) -> anyhow::Result<Verification> {
        let engine = self.service.engine();
        let expected_total =
            i128::from(self.config.opening_balance) * self.customers.len() as i128;
        let mut actual_total = 0i128;
        let mut inconsistent_accounts = Vec::new();

        for customer in &self.customers {
            let check = engine.reconcile(customer.account).await?;
            actual_total += i128::from(check.balance);
            if !check.is_consistent() {
                inconsistent_accounts.push(customer.account);
            }
        }

        let verification = Verification {
            expected_total,
            actual_total,
            inconsistent_accounts,
        };
        if verification.passed() {
            info!(total = %actual_total, "Ledger verified");
        } else {
            warn!(?verification, "Ledger verification failed");
        }
        Ok(verification)
    }

    /// Get simulation metrics.
    pub async fn metrics(&self) -> SimulationMetrics {
        self.metrics.read().await.clone()
    }
}
