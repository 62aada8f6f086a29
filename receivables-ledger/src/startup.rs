//! Wiring of the ledger components over a shared store.

use crate::config::{LedgerConfig, ReconciliationConfig};
use crate::error::LedgerError;
use crate::models::{Customer, NewCustomer};
use crate::services::{
    AllocationEngine, AuditSink, Database, LedgerReports, LedgerStore, ReconciliationJob,
    RetryConfig, TracingAuditSink, TransactionPoster,
};
use std::sync::Arc;
use tracing::{info, instrument};

/// Ledger engine: every component shares one store and one audit sink.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    poster: TransactionPoster,
    allocation: AllocationEngine,
    reconciliation: ReconciliationJob,
    reports: LedgerReports,
}

impl Ledger {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        audit: Arc<dyn AuditSink>,
        reconciliation: ReconciliationConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            poster: TransactionPoster::new(store.clone(), audit.clone()),
            allocation: AllocationEngine::new(store.clone(), audit.clone()),
            reconciliation: ReconciliationJob::new(store.clone(), audit, reconciliation, retry),
            reports: LedgerReports::new(store.clone()),
            store,
        }
    }

    /// Connect to PostgreSQL and build the engine with tracing-based audit.
    ///
    /// The returned [`Database`] handle is for maintenance (migrations,
    /// health checks); it shares the engine's pool.
    #[instrument(skip(config), fields(service = %config.service_name))]
    pub async fn connect(config: &LedgerConfig) -> Result<(Self, Database), LedgerError> {
        let db = Database::new(&config.database, config.locking.clone()).await?;
        let ledger = Self::new(
            Arc::new(db.clone()),
            Arc::new(TracingAuditSink),
            config.reconciliation.clone(),
            RetryConfig::from(&config.retry),
        );
        info!("Ledger engine ready");
        Ok((ledger, db))
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn poster(&self) -> &TransactionPoster {
        &self.poster
    }

    pub fn allocation(&self) -> &AllocationEngine {
        &self.allocation
    }

    pub fn reconciliation(&self) -> &ReconciliationJob {
        &self.reconciliation
    }

    pub fn reports(&self) -> &LedgerReports {
        &self.reports
    }

    /// Register a customer with a zero balance.
    pub async fn create_customer(&self, input: NewCustomer) -> Result<Customer, LedgerError> {
        if input.code.trim().is_empty() || input.name.trim().is_empty() {
            return Err(LedgerError::validation("customer code and name are required"));
        }
        self.store.create_customer(&input).await
    }
}
