//! Balance reconciliation: rebuild a customer's balance and every debt's
//! settlement from transaction history alone.
//!
//! Recomputing is idempotent, so a full run can be interrupted and resumed
//! from the last completed batch.

use crate::config::ReconciliationConfig;
use crate::error::LedgerError;
use crate::models::{
    DriftReport, RecomputeFailure, RecomputeOutcome, RecomputeSummary, Transaction,
    TransactionType,
};
use crate::services::allocation::{apply_plan, plan_recompute, AllocationPlan};
use crate::services::audit::{AuditSink, BalanceChange, BalanceChangeReason};
use crate::services::metrics::{
    record_error, ALLOCATED_AMOUNT, DRIFT_DETECTED, OPERATION_DURATION, RECOMPUTES_TOTAL,
};
use crate::services::retry::{retry_ledger_op, RetryConfig};
use crate::services::store::{LedgerStore, LedgerUnit};
use futures::stream::{self, StreamExt};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Ground truth for one customer as read inside a unit of work.
struct Assessment {
    total_debt: Decimal,
    total_paid: Decimal,
    debts: Vec<Transaction>,
    plan: AllocationPlan,
}

impl Assessment {
    fn expected_balance(&self) -> Decimal {
        self.total_debt - self.total_paid
    }
}

async fn assess(unit: &mut dyn LedgerUnit) -> Result<Assessment, LedgerError> {
    let total_debt = unit.sum_totals(&TransactionType::DEBT_TYPES).await?;
    let total_paid = unit
        .sum_totals(&[TransactionType::CustomerPayment])
        .await?;
    let debts = unit.find_debts().await?;
    let plan = plan_recompute(&debts, total_paid);
    Ok(Assessment {
        total_debt,
        total_paid,
        debts,
        plan,
    })
}

/// Recompute inside an open unit of work; the caller commits.
pub(crate) async fn recompute_in(
    unit: &mut dyn LedgerUnit,
) -> Result<RecomputeOutcome, LedgerError> {
    let customer_id = unit.customer().customer_id;
    let balance_before = unit.customer().balance;

    let assessment = assess(unit).await?;
    apply_plan(unit, &assessment.debts, &assessment.plan).await?;

    let balance_after = assessment.expected_balance();
    if balance_after != balance_before {
        unit.set_balance(balance_after).await?;
    }

    Ok(RecomputeOutcome {
        customer_id,
        total_debt: assessment.total_debt,
        total_paid: assessment.total_paid,
        unallocated: assessment.plan.remaining,
        balance_before,
        balance_after,
        transactions_updated: assessment.plan.changes,
    })
}

/// Canonical repair job for customer balances and debt settlements.
#[derive(Clone)]
pub struct ReconciliationJob {
    store: Arc<dyn LedgerStore>,
    audit: Arc<dyn AuditSink>,
    settings: ReconciliationConfig,
    retry: RetryConfig,
}

impl ReconciliationJob {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        audit: Arc<dyn AuditSink>,
        settings: ReconciliationConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            audit,
            settings,
            retry,
        }
    }

    /// Recompute one customer from scratch and persist the result atomically.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn recompute_customer(
        &self,
        customer_id: Uuid,
    ) -> Result<RecomputeOutcome, LedgerError> {
        let timer = OPERATION_DURATION
            .with_label_values(&["recompute_customer"])
            .start_timer();

        let result = async {
            let mut unit = self.store.begin(customer_id).await?;
            let outcome = recompute_in(unit.as_mut()).await?;
            unit.commit().await?;
            Ok::<_, LedgerError>(outcome)
        }
        .await;
        timer.observe_duration();

        match &result {
            Ok(outcome) if outcome.changed() => {
                RECOMPUTES_TOTAL.with_label_values(&["changed"]).inc();
                ALLOCATED_AMOUNT
                    .with_label_values(&["reconciliation"])
                    .inc_by(
                        outcome
                            .transactions_updated
                            .iter()
                            .map(|c| c.amount_applied())
                            .sum::<Decimal>()
                            .abs()
                            .to_f64()
                            .unwrap_or_default(),
                    );
                warn!(
                    balance_before = %outcome.balance_before,
                    balance_after = %outcome.balance_after,
                    transactions_updated = outcome.transactions_updated.len(),
                    "Recompute repaired drifted ledger state"
                );
                self.audit.record(&BalanceChange::new(
                    customer_id,
                    None,
                    outcome.balance_before,
                    outcome.balance_after,
                    BalanceChangeReason::Reconciled,
                    outcome.transactions_updated.len(),
                ));
            }
            Ok(_) => {
                RECOMPUTES_TOTAL.with_label_values(&["unchanged"]).inc();
                info!("Recompute found ledger state consistent");
            }
            Err(err) => {
                RECOMPUTES_TOTAL.with_label_values(&["error"]).inc();
                record_error(err);
            }
        }
        result
    }

    /// Report what [`recompute_customer`](Self::recompute_customer) would
    /// change, without writing anything.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn verify_customer(&self, customer_id: Uuid) -> Result<DriftReport, LedgerError> {
        // The unit is only used for a consistent locked read and is
        // dropped uncommitted.
        let mut unit = self.store.begin(customer_id).await?;
        let stored_balance = unit.customer().balance;
        let assessment = assess(unit.as_mut()).await?;
        drop(unit);

        let report = DriftReport {
            customer_id,
            stored_balance,
            expected_balance: assessment.expected_balance(),
            total_debt: assessment.total_debt,
            total_paid: assessment.total_paid,
            transaction_drift: assessment.plan.changes,
        };

        if report.balance_drift() != Decimal::ZERO {
            DRIFT_DETECTED.with_label_values(&["balance"]).inc();
        }
        if !report.transaction_drift.is_empty() {
            DRIFT_DETECTED.with_label_values(&["settlement"]).inc();
        }
        if !report.is_clean() {
            warn!(
                stored_balance = %report.stored_balance,
                expected_balance = %report.expected_balance,
                transaction_drift = report.transaction_drift.len(),
                "Ledger drift detected"
            );
        }
        Ok(report)
    }

    /// Recompute every customer, in id order, a batch at a time.
    ///
    /// Pass the `last_customer_id` of an interrupted run as `resume_after`
    /// to skip batches already done. Per-customer failures are collected
    /// rather than aborting the run.
    #[instrument(skip(self))]
    pub async fn recompute_all(
        &self,
        resume_after: Option<Uuid>,
    ) -> Result<RecomputeSummary, LedgerError> {
        let batch_size = self.settings.batch_size.max(1);
        let concurrency = self.settings.concurrency.max(1);
        let mut summary = RecomputeSummary {
            last_customer_id: resume_after,
            ..Default::default()
        };

        info!(
            batch_size,
            concurrency,
            resume_after = ?resume_after,
            "Starting full recompute"
        );

        loop {
            let ids = match self
                .store
                .customer_ids_after(summary.last_customer_id, batch_size)
                .await
            {
                Ok(ids) => ids,
                Err(err) => {
                    warn!(
                        last_customer_id = ?summary.last_customer_id,
                        error = %err,
                        "Full recompute interrupted; resume from last_customer_id"
                    );
                    return Err(err);
                }
            };
            if ids.is_empty() {
                break;
            }

            let results: Vec<(Uuid, Result<RecomputeOutcome, LedgerError>)> =
                stream::iter(ids.iter().copied())
                    .map(|customer_id| async move {
                        let result = retry_ledger_op(&self.retry, "recompute_customer", || {
                            self.recompute_customer(customer_id)
                        })
                        .await;
                        (customer_id, result)
                    })
                    .buffer_unordered(concurrency)
                    .collect()
                    .await;

            for (customer_id, result) in results {
                summary.customers_processed += 1;
                match result {
                    Ok(outcome) if outcome.changed() => summary.customers_changed += 1,
                    Ok(_) => {}
                    Err(err) => summary.failures.push(RecomputeFailure {
                        customer_id,
                        retryable: err.is_retryable(),
                        error: err.to_string(),
                    }),
                }
            }

            summary.last_customer_id = ids.last().copied();
            info!(
                batch = ids.len(),
                customers_processed = summary.customers_processed,
                last_customer_id = ?summary.last_customer_id,
                "Recompute batch completed"
            );

            if ids.len() < batch_size as usize {
                break;
            }
        }

        info!(
            customers_processed = summary.customers_processed,
            customers_changed = summary.customers_changed,
            failures = summary.failures.len(),
            "Full recompute finished"
        );
        Ok(summary)
    }
}
