pub mod allocation;
pub mod audit;
pub mod database;
pub mod memory;
pub mod metrics;
pub mod poster;
pub mod reconciliation;
pub mod reports;
pub mod retry;
pub mod store;

pub use allocation::{plan_fifo, plan_recompute, AllocationEngine, AllocationPlan};
pub use audit::{AuditSink, BalanceChange, BalanceChangeReason, TracingAuditSink};
pub use database::Database;
pub use memory::MemoryLedgerStore;
pub use poster::TransactionPoster;
pub use reconciliation::ReconciliationJob;
pub use reports::LedgerReports;
pub use retry::{retry_ledger_op, RetryConfig};
pub use store::{LedgerStore, LedgerUnit};
