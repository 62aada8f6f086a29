//! Prometheus metrics for the receivables ledger.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Posted transactions by type and outcome.
pub static TRANSACTIONS_POSTED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "receivables_transactions_posted_total",
        "Total number of transactions posted or deleted",
        &["operation", "transaction_type", "status"]
    )
    .expect("Failed to register transactions_posted")
});

/// Payment allocations by outcome.
pub static ALLOCATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "receivables_allocations_total",
        "Total number of FIFO payment allocations",
        &["status"]
    )
    .expect("Failed to register allocations_total")
});

/// Sum of payment amounts applied to debts.
pub static ALLOCATED_AMOUNT: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "receivables_allocated_amount_total",
        "Total payment amount allocated to debts",
        &["source"] // payment, reconciliation
    )
    .expect("Failed to register allocated_amount")
});

/// Customers found with stored state differing from history.
pub static DRIFT_DETECTED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "receivables_drift_detected_total",
        "Total number of customers found with balance or settlement drift",
        &["kind"] // balance, settlement
    )
    .expect("Failed to register drift_detected")
});

/// Per-customer recomputes; `changed` means stored state was repaired.
pub static RECOMPUTES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "receivables_recomputes_total",
        "Total number of customer balance recomputes",
        &["result"] // unchanged, changed, error
    )
    .expect("Failed to register recomputes_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "receivables_errors_total",
        "Total number of errors by kind",
        &["error_kind"]
    )
    .expect("Failed to register errors_total")
});

/// Ledger operation duration.
pub static OPERATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "receivables_operation_duration_seconds",
        "Ledger operation duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register operation_duration")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "receivables_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Count an error by its kind.
pub fn record_error(err: &crate::error::LedgerError) {
    ERRORS_TOTAL.with_label_values(&[err.kind()]).inc();
}

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&TRANSACTIONS_POSTED);
    Lazy::force(&ALLOCATIONS_TOTAL);
    Lazy::force(&ALLOCATED_AMOUNT);
    Lazy::force(&DRIFT_DETECTED);
    Lazy::force(&RECOMPUTES_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&OPERATION_DURATION);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
