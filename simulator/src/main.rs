//! SimpleBank Simulator
//!
//! Funds a set of customers, fires concurrent transfers at the ledger and
//! checks afterwards that no money was created or lost.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use simplebank_common::Currency;
use simplebank_gateway::{GatewayConfig, LogFormat};
use simplebank_ledger::{LedgerStore, MemoryLedgerStore, PgLedgerStore};

mod bank;
mod controller;
mod metrics;
mod scenario;

use controller::{SimulationConfig, SimulationController, SimulationReport};
use scenario::Scenario;

/// SimpleBank Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "Concurrent transfer simulator for the SimpleBank ledger")]
struct Args {
    /// Number of customers to fund
    #[arg(short, long, default_value = "10")]
    customers: usize,

    /// Number of transfers to run
    #[arg(short, long, default_value = "1000")]
    transfers: usize,

    /// Transfers in flight at once
    #[arg(long, default_value = "16")]
    concurrency: usize,

    /// Scenario to run: ping-pong, ring or random
    #[arg(short, long, default_value = "random")]
    scenario: String,

    /// Opening balance per customer, in minor units
    #[arg(long, default_value = "100000")]
    opening_balance: i64,

    /// Largest transfer amount, in minor units
    #[arg(long, default_value = "1000")]
    max_amount: i64,

    /// Account currency
    #[arg(long, default_value = "BRL")]
    currency: String,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// PostgreSQL URL; overrides DATABASE_URL. The in-memory store is used
    /// when neither is set.
    #[arg(long)]
    database_url: Option<String>,
}

fn init_logging(config: &GatewayConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let json = config.log_format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = GatewayConfig::from_env();
    if let Some(url) = args.database_url.clone() {
        config.database.url = Some(url);
    }
    init_logging(&config);

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let scenario = Scenario::load(&args.scenario)?;
    let simulation = SimulationConfig {
        customers: args.customers,
        transfers: args.transfers,
        concurrency: args.concurrency,
        opening_balance: args.opening_balance,
        max_amount: args.max_amount,
        currency: Currency::parse(&args.currency)?,
        seed: args.seed,
    };

    info!(?scenario, customers = args.customers, transfers = args.transfers, "Starting SimpleBank Simulator");

    let report = match config.database.url.clone() {
        Some(url) => {
            let store = PgLedgerStore::connect(&url, config.database.max_connections)
                .await?
                .with_lock_timeout(config.database.lock_timeout);
            store.apply_schema().await?;
            info!("Using PostgreSQL ledger store");
            simulate(Arc::new(store), scenario, simulation, &config).await?
        }
        None => {
            let store = Arc::new(MemoryLedgerStore::with_lock_timeout(
                config.database.lock_timeout,
            ));
            info!("Using in-memory ledger store");
            let report = simulate(store.clone(), scenario, simulation, &config).await?;
            if store.locked_rows() != 0 {
                anyhow::bail!("{} row locks still held after the run", store.locked_rows());
            }
            report
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.verification.passed() {
        anyhow::bail!("Ledger verification failed");
    }

    info!(
        successful = report.metrics.successful,
        failed = report.metrics.failed,
        p99_latency_ms = report.metrics.p99_latency_ms,
        "Simulation complete"
    );
    Ok(())
}

async fn simulate<S: LedgerStore>(
    store: Arc<S>,
    scenario: Scenario,
    simulation: SimulationConfig,
    config: &GatewayConfig,
) -> anyhow::Result<SimulationReport> {
    let mut controller = SimulationController::new(store, simulation, config);
    controller.initialize().await?;
    let report = controller.run_scenario(scenario).await?;

    let metrics = controller.metrics().await;
    info!(
        success_rate = metrics.success_rate(),
        average_latency_ms = metrics.average_latency_ms(),
        "Run finished"
    );
    Ok(report)
}
