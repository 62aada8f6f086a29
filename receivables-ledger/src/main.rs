//! `ledger-maintenance`: admin tooling for the receivables ledger.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use receivables_ledger::config::LedgerConfig;
use receivables_ledger::models::{ReceivablesSort, SortOrder};
use receivables_ledger::services::metrics::{get_metrics, init_metrics};
use receivables_ledger::Ledger;
use serde::Serialize;
use service_core::observability::init_tracing;
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "ledger-maintenance",
    about = "Recompute, verify and report customer receivables",
    version
)]
struct Cli {
    #[arg(long, global = true, action = ArgAction::SetTrue, help = "Render output as pretty JSON")]
    json: bool,
    #[arg(long, global = true, action = ArgAction::SetTrue, help = "Run database migrations first")]
    migrate: bool,
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Print Prometheus metrics to stderr when done"
    )]
    metrics: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild one customer's balance and settlements from history.
    Recompute {
        #[arg(long)]
        customer: Uuid,
    },
    /// Rebuild every customer, batch by batch.
    RecomputeAll {
        /// Continue after this customer id (printed by an interrupted run).
        #[arg(long)]
        resume_after: Option<Uuid>,
    },
    /// Show drift between stored and recomputed state without writing.
    Verify {
        #[arg(long)]
        customer: Uuid,
    },
    /// List customers with an outstanding balance.
    Receivables {
        #[arg(long, value_enum, default_value_t = SortArg::Balance)]
        sort: SortArg,
        #[arg(long, action = ArgAction::SetTrue)]
        asc: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SortArg {
    Balance,
    Name,
    Code,
}

impl From<SortArg> for ReceivablesSort {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Balance => ReceivablesSort::Balance,
            SortArg::Name => ReceivablesSort::Name,
            SortArg::Code => ReceivablesSort::Code,
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = LedgerConfig::load().context("failed to load configuration")?;
    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )
    .context("failed to initialise tracing")?;
    init_metrics();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        max_connections = config.database.max_connections,
        lock_timeout_ms = config.locking.lock_timeout_ms,
        "Starting ledger-maintenance"
    );

    let (ledger, db) = Ledger::connect(&config)
        .await
        .context("failed to connect to database")?;
    if cli.migrate {
        db.run_migrations().await?;
    }

    match cli.command {
        Commands::Recompute { customer } => {
            let outcome = ledger.reconciliation().recompute_customer(customer).await?;
            if cli.json {
                print_json(&outcome)?;
            } else {
                println!(
                    "Customer {}: balance {} -> {}, {} transaction(s) updated",
                    customer,
                    outcome.balance_before,
                    outcome.balance_after,
                    outcome.transactions_updated.len()
                );
            }
        }
        Commands::RecomputeAll { resume_after } => {
            let summary = ledger.reconciliation().recompute_all(resume_after).await?;
            if cli.json {
                print_json(&summary)?;
            } else {
                println!(
                    "Processed {} customer(s), repaired {}, {} failure(s)",
                    summary.customers_processed,
                    summary.customers_changed,
                    summary.failures.len()
                );
                for failure in &summary.failures {
                    println!(
                        "  {} failed (retryable: {}): {}",
                        failure.customer_id, failure.retryable, failure.error
                    );
                }
                if let Some(last) = summary.last_customer_id {
                    println!("Last customer: {}", last);
                }
            }
        }
        Commands::Verify { customer } => {
            let report = ledger.reconciliation().verify_customer(customer).await?;
            if cli.json {
                print_json(&report)?;
            } else if report.is_clean() {
                println!("Customer {} is consistent (balance {})", customer, report.stored_balance);
            } else {
                println!(
                    "Customer {} drifted: stored {}, expected {}",
                    customer, report.stored_balance, report.expected_balance
                );
                for change in &report.transaction_drift {
                    println!(
                        "  {} paid {} -> {} ({:?} -> {})",
                        change.code,
                        change.paid_before,
                        change.paid_after,
                        change.status_before,
                        change.status_after
                    );
                }
            }
        }
        Commands::Receivables { sort, asc } => {
            let order = if asc { SortOrder::Asc } else { SortOrder::Desc };
            let report = ledger.reports().receivables(sort.into(), order).await?;
            if cli.json {
                print_json(&report)?;
            } else {
                for row in &report.customers {
                    println!(
                        "{:<12} {:<32} {:>14} open debts: {}",
                        row.customer.code, row.customer.name, row.customer.balance, row.open_debts
                    );
                }
                println!(
                    "{} customer(s), total {}, average {}, highest {}",
                    report.stats.total_customers,
                    report.stats.total_receivable,
                    report.stats.average_receivable,
                    report.stats.highest_receivable
                );
            }
        }
    }

    if cli.metrics {
        eprint!("{}", get_metrics());
    }

    Ok(())
}
