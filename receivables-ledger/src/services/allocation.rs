//! FIFO payment allocation.
//!
//! The planners are pure: given debts and an amount they decide every
//! settlement change. [`AllocationEngine`] applies a plan through a
//! [`LedgerUnit`] after checking each change against the settlement rules.

use crate::error::LedgerError;
use crate::models::{
    check_settlement_values, AllocationOutcome, SettlementChange, SettlementStatus, Transaction,
};
use crate::services::audit::{AuditSink, BalanceChange, BalanceChangeReason};
use crate::services::metrics::{
    record_error, ALLOCATED_AMOUNT, ALLOCATIONS_TOTAL, OPERATION_DURATION,
};
use crate::services::store::{LedgerStore, LedgerUnit};
use crate::utils::money::ensure_positive_amount;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Settlement changes decided for one amount.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationPlan {
    /// In FIFO order.
    pub changes: Vec<SettlementChange>,
    pub allocated: Decimal,
    pub remaining: Decimal,
}

fn fifo_sorted(debts: &[Transaction]) -> Vec<&Transaction> {
    let mut sorted: Vec<&Transaction> = debts.iter().collect();
    sorted.sort_by_key(|d| d.fifo_key());
    sorted
}

/// Distribute `amount` over `debts`, oldest first, never paying a debt past
/// its total. Debts with nothing outstanding are skipped. A non-positive
/// amount yields an empty plan.
pub fn plan_fifo(debts: &[Transaction], amount: Decimal) -> AllocationPlan {
    let mut remaining = amount.max(Decimal::ZERO);
    let mut changes = Vec::new();

    for debt in fifo_sorted(debts) {
        if remaining <= Decimal::ZERO {
            break;
        }
        let owed = debt.outstanding();
        if owed <= Decimal::ZERO {
            continue;
        }

        let applied = remaining.min(owed);
        let paid_after = debt.paid_amount + applied;
        remaining -= applied;

        changes.push(SettlementChange {
            transaction_id: debt.transaction_id,
            code: debt.code.clone(),
            date: debt.date,
            total: debt.total,
            paid_before: debt.paid_amount,
            paid_after,
            status_before: debt.status,
            status_after: SettlementStatus::derive(paid_after, debt.total),
        });
    }

    let remaining = if amount > Decimal::ZERO {
        remaining
    } else {
        amount
    };

    AllocationPlan {
        changes,
        allocated: amount - remaining,
        remaining,
    }
}

/// Re-derive every debt's settlement from a clean slate by allocating
/// `total_paid` FIFO, and return only the rows whose stored values differ.
pub fn plan_recompute(debts: &[Transaction], total_paid: Decimal) -> AllocationPlan {
    let reset: Vec<Transaction> = debts
        .iter()
        .map(|d| Transaction {
            paid_amount: Decimal::ZERO,
            status: Some(SettlementStatus::Pending),
            ..d.clone()
        })
        .collect();

    let fresh = plan_fifo(&reset, total_paid);
    let target: HashMap<Uuid, Decimal> = fresh
        .changes
        .iter()
        .map(|c| (c.transaction_id, c.paid_after))
        .collect();

    let changes = fifo_sorted(debts)
        .into_iter()
        .filter_map(|debt| {
            let paid_after = target
                .get(&debt.transaction_id)
                .copied()
                .unwrap_or(Decimal::ZERO);
            let status_after = SettlementStatus::derive(paid_after, debt.total);
            if debt.paid_amount == paid_after && debt.status == Some(status_after) {
                return None;
            }
            Some(SettlementChange {
                transaction_id: debt.transaction_id,
                code: debt.code.clone(),
                date: debt.date,
                total: debt.total,
                paid_before: debt.paid_amount,
                paid_after,
                status_before: debt.status,
                status_after,
            })
        })
        .collect();

    AllocationPlan {
        changes,
        allocated: fresh.allocated,
        remaining: fresh.remaining,
    }
}

/// Check and write each change of a plan. Any violation aborts the unit.
pub(crate) async fn apply_plan(
    unit: &mut dyn LedgerUnit,
    debts: &[Transaction],
    plan: &AllocationPlan,
) -> Result<(), LedgerError> {
    let by_id: HashMap<Uuid, &Transaction> =
        debts.iter().map(|d| (d.transaction_id, d)).collect();

    for change in &plan.changes {
        let debt = by_id.get(&change.transaction_id).ok_or_else(|| {
            LedgerError::InvariantViolation(format!(
                "planned settlement for unknown transaction {}",
                change.transaction_id
            ))
        })?;
        check_settlement_values(debt, change.paid_after, Some(change.status_after))?;
        unit.update_settlement(change.transaction_id, change.paid_after, change.status_after)
            .await?;
    }
    Ok(())
}

/// Allocate `amount` inside an open unit of work. Does not touch the balance.
pub(crate) async fn allocate_in(
    unit: &mut dyn LedgerUnit,
    amount: Decimal,
) -> Result<AllocationOutcome, LedgerError> {
    ensure_positive_amount(amount, "payment amount")?;

    let customer_id = unit.customer().customer_id;
    let debts = unit.find_open_debts().await?;
    for debt in &debts {
        debt.check_settlement()?;
    }

    let plan = plan_fifo(&debts, amount);
    apply_plan(unit, &debts, &plan).await?;

    debug!(
        customer_id = %customer_id,
        open_debts = debts.len(),
        allocated = %plan.allocated,
        remaining = %plan.remaining,
        "Payment allocated"
    );

    Ok(AllocationOutcome {
        customer_id,
        allocated_amount: plan.allocated,
        remaining_unallocated: plan.remaining,
        updated_count: plan.changes.len(),
        settlements: plan.changes,
    })
}

/// Applies payment amounts to a customer's open debts, oldest first.
#[derive(Clone)]
pub struct AllocationEngine {
    store: Arc<dyn LedgerStore>,
    audit: Arc<dyn AuditSink>,
}

impl AllocationEngine {
    pub fn new(store: Arc<dyn LedgerStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    /// Settle open debts with `amount` in one atomic unit.
    ///
    /// Only debts' paid amounts and statuses change; the payment itself and
    /// the balance are the caller's concern (see `TransactionPoster`).
    #[instrument(skip(self), fields(customer_id = %customer_id, amount = %amount))]
    pub async fn allocate(
        &self,
        customer_id: Uuid,
        amount: Decimal,
    ) -> Result<AllocationOutcome, LedgerError> {
        let timer = OPERATION_DURATION
            .with_label_values(&["allocate"])
            .start_timer();

        let result = self.allocate_committed(customer_id, amount).await;
        timer.observe_duration();

        match &result {
            Ok(outcome) => {
                ALLOCATIONS_TOTAL.with_label_values(&["ok"]).inc();
                ALLOCATED_AMOUNT
                    .with_label_values(&["payment"])
                    .inc_by(outcome.allocated_amount.to_f64().unwrap_or_default());
                info!(
                    allocated = %outcome.allocated_amount,
                    remaining = %outcome.remaining_unallocated,
                    updated_count = outcome.updated_count,
                    "Allocation committed"
                );
            }
            Err(err) => {
                ALLOCATIONS_TOTAL.with_label_values(&["error"]).inc();
                record_error(err);
            }
        }
        result
    }

    async fn allocate_committed(
        &self,
        customer_id: Uuid,
        amount: Decimal,
    ) -> Result<AllocationOutcome, LedgerError> {
        ensure_positive_amount(amount, "payment amount")?;

        let mut unit = self.store.begin(customer_id).await?;
        let balance = unit.customer().balance;
        let outcome = allocate_in(unit.as_mut(), amount).await?;
        unit.commit().await?;

        self.audit.record(&BalanceChange::new(
            customer_id,
            None,
            balance,
            balance,
            BalanceChangeReason::PaymentAllocated,
            outcome.updated_count,
        ));
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransactionType;
    use chrono::{NaiveDate, Utc};
    use rust_decimal_macros::dec;

    fn debt(day: u32, seq: i64, total: Decimal, paid: Decimal) -> Transaction {
        Transaction {
            transaction_id: Uuid::new_v4(),
            code: format!("SAL-{:06}", seq),
            transaction_type: TransactionType::Sale,
            customer_id: None,
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            seq,
            subtotal: total,
            vat_total: Decimal::ZERO,
            discount: Decimal::ZERO,
            total,
            paid_amount: paid,
            status: Some(SettlementStatus::derive(paid, total)),
            notes: None,
            source_transaction_id: None,
            created_utc: Utc::now(),
        }
    }

    #[test]
    fn same_date_breaks_ties_by_creation_order() {
        let later = debt(5, 2, dec!(40), dec!(0));
        let earlier = debt(5, 1, dec!(40), dec!(0));
        let plan = plan_fifo(&[later.clone(), earlier.clone()], dec!(50));

        assert_eq!(plan.changes[0].transaction_id, earlier.transaction_id);
        assert_eq!(plan.changes[0].status_after, SettlementStatus::Paid);
        assert_eq!(plan.changes[1].transaction_id, later.transaction_id);
        assert_eq!(plan.changes[1].paid_after, dec!(10));
    }

    #[test]
    fn partial_debt_receives_only_its_remainder() {
        let d = debt(1, 1, dec!(100), dec!(70));
        let plan = plan_fifo(&[d], dec!(50));

        assert_eq!(plan.changes[0].paid_after, dec!(100));
        assert_eq!(plan.changes[0].amount_applied(), dec!(30));
        assert_eq!(plan.remaining, dec!(20));
    }

    #[test]
    fn non_positive_amount_is_a_no_op() {
        let d = debt(1, 1, dec!(100), dec!(0));
        let plan = plan_fifo(&[d], dec!(0));
        assert!(plan.changes.is_empty());
        assert_eq!(plan.allocated, dec!(0));
    }

    #[test]
    fn recompute_only_reports_drifted_rows() {
        let d1 = debt(1, 1, dec!(100), dec!(100));
        // Stored as unpaid, but history says 20 of it is covered.
        let d2 = debt(2, 2, dec!(50), dec!(0));
        let plan = plan_recompute(&[d1, d2.clone()], dec!(120));

        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.changes[0].transaction_id, d2.transaction_id);
        assert_eq!(plan.changes[0].paid_after, dec!(20));
        assert_eq!(plan.changes[0].status_after, SettlementStatus::Partial);
    }

    #[test]
    fn recompute_can_lower_paid_amounts() {
        let d = debt(1, 1, dec!(100), dec!(100));
        let plan = plan_recompute(&[d], dec!(40));

        assert_eq!(plan.changes[0].paid_before, dec!(100));
        assert_eq!(plan.changes[0].paid_after, dec!(40));
        assert_eq!(plan.changes[0].status_after, SettlementStatus::Partial);
    }
}
