//! Common test utilities for receivables-ledger integration tests.
#![allow(dead_code)]

use chrono::NaiveDate;
use receivables_ledger::config::ReconciliationConfig;
use receivables_ledger::models::{
    Customer, NewCustomer, PostOutcome, TransactionDraft, TransactionType,
};
use receivables_ledger::services::{
    AuditSink, BalanceChange, LedgerStore, MemoryLedgerStore, RetryConfig,
};
use receivables_ledger::Ledger;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,receivables_ledger=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Audit sink that keeps every record for assertions.
#[derive(Default)]
pub struct RecordingAuditSink {
    records: Mutex<Vec<BalanceChange>>,
}

impl RecordingAuditSink {
    pub fn records(&self) -> Vec<BalanceChange> {
        self.records.lock().unwrap().clone()
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, change: &BalanceChange) {
        self.records.lock().unwrap().push(change.clone());
    }
}

pub struct TestLedger {
    pub ledger: Ledger,
    pub store: MemoryLedgerStore,
    pub audit: Arc<RecordingAuditSink>,
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 2,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        add_jitter: false,
    }
}

/// Build a ledger over a fresh in-memory store.
pub fn spawn_ledger() -> TestLedger {
    spawn_ledger_with(MemoryLedgerStore::new(), ReconciliationConfig::default())
}

pub fn spawn_ledger_with(store: MemoryLedgerStore, settings: ReconciliationConfig) -> TestLedger {
    init_tracing();
    let audit = Arc::new(RecordingAuditSink::default());
    let ledger = Ledger::new(
        Arc::new(store.clone()),
        audit.clone(),
        settings,
        fast_retry(),
    );
    TestLedger {
        ledger,
        store,
        audit,
    }
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

/// Register a customer with a unique code.
pub async fn create_customer(ledger: &Ledger) -> Customer {
    let suffix = Uuid::new_v4().simple().to_string();
    ledger
        .create_customer(NewCustomer::new(
            format!("C-{}", &suffix[..8]),
            format!("Customer {}", &suffix[..8]),
        ))
        .await
        .expect("Failed to create customer")
}

pub async fn post_sale(
    ledger: &Ledger,
    customer_id: Uuid,
    on: NaiveDate,
    total: Decimal,
) -> PostOutcome {
    ledger
        .poster()
        .post_create(TransactionDraft::sale(customer_id, on, total))
        .await
        .expect("Failed to post sale")
}

pub async fn post_payment(
    ledger: &Ledger,
    customer_id: Uuid,
    on: NaiveDate,
    amount: Decimal,
) -> PostOutcome {
    ledger
        .poster()
        .post_create(TransactionDraft::payment(customer_id, on, amount))
        .await
        .expect("Failed to post payment")
}

pub async fn balance_of(ledger: &Ledger, customer_id: Uuid) -> Decimal {
    ledger
        .store()
        .get_customer(customer_id)
        .await
        .unwrap()
        .expect("customer exists")
        .balance
}

/// Stored balance equals debt totals minus payment totals, and every debt
/// satisfies `0 <= paid <= total` with a matching status.
pub async fn assert_ledger_consistent(ledger: &Ledger, customer_id: Uuid) {
    let transactions = ledger
        .store()
        .list_customer_transactions(customer_id)
        .await
        .unwrap();

    let mut expected = Decimal::ZERO;
    for tx in &transactions {
        match tx.transaction_type {
            TransactionType::Sale | TransactionType::Treatment => {
                expected += tx.total;
                tx.check_settlement()
                    .unwrap_or_else(|e| panic!("{} breaks settlement rules: {}", tx.code, e));
            }
            TransactionType::CustomerPayment => expected -= tx.total,
            _ => {}
        }
    }

    assert_eq!(
        balance_of(ledger, customer_id).await,
        expected,
        "balance must equal debts minus payments"
    );
}
