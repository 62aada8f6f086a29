//! Results returned by posting, allocation and reconciliation.

use super::transaction::{SettlementStatus, Transaction};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A debt's paid amount/status moving from one value to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementChange {
    pub transaction_id: Uuid,
    pub code: String,
    pub date: NaiveDate,
    pub total: Decimal,
    pub paid_before: Decimal,
    pub paid_after: Decimal,
    pub status_before: Option<SettlementStatus>,
    pub status_after: SettlementStatus,
}

impl SettlementChange {
    /// Signed change of the paid amount.
    pub fn amount_applied(&self) -> Decimal {
        self.paid_after - self.paid_before
    }
}

/// Result of distributing one payment across open debts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationOutcome {
    pub customer_id: Uuid,
    pub allocated_amount: Decimal,
    /// Overpayment; carried only by the customer balance.
    pub remaining_unallocated: Decimal,
    pub updated_count: usize,
    /// Settled debts in FIFO order.
    pub settlements: Vec<SettlementChange>,
}

/// Result of `post_create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostOutcome {
    pub transaction: Transaction,
    /// Payment recorded for an amount paid at the point of sale.
    pub companion_payment: Option<Transaction>,
    pub allocation: Option<AllocationOutcome>,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
}

/// Result of `post_delete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub transaction: Transaction,
    /// Point-of-sale payments removed together with a deleted debt.
    pub companion_payments: Vec<Transaction>,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    /// Settlement re-derivation run in the same unit of work. May touch
    /// debts unrelated to the deleted row.
    pub recompute: RecomputeOutcome,
}

/// Result of recomputing one customer from transaction history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecomputeOutcome {
    pub customer_id: Uuid,
    pub total_debt: Decimal,
    pub total_paid: Decimal,
    pub unallocated: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    /// Only rows whose stored values differed.
    pub transactions_updated: Vec<SettlementChange>,
}

impl RecomputeOutcome {
    pub fn changed(&self) -> bool {
        self.balance_before != self.balance_after || !self.transactions_updated.is_empty()
    }
}

/// What a recompute would change, computed without writing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub customer_id: Uuid,
    pub stored_balance: Decimal,
    pub expected_balance: Decimal,
    pub total_debt: Decimal,
    pub total_paid: Decimal,
    pub transaction_drift: Vec<SettlementChange>,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.stored_balance == self.expected_balance && self.transaction_drift.is_empty()
    }

    pub fn balance_drift(&self) -> Decimal {
        self.stored_balance - self.expected_balance
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecomputeFailure {
    pub customer_id: Uuid,
    pub error: String,
    pub retryable: bool,
}

/// Progress of a batched recompute over all customers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecomputeSummary {
    pub customers_processed: usize,
    pub customers_changed: usize,
    pub failures: Vec<RecomputeFailure>,
    /// Resume point: last customer id of the last completed batch.
    pub last_customer_id: Option<Uuid>,
}
