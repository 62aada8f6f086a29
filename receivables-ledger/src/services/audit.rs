//! Audit hook for balance-affecting mutations.
//!
//! Sinks are called after a unit of work commits and cannot influence it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceChangeReason {
    DebtPosted,
    PaymentPosted,
    PaymentAllocated,
    TransactionDeleted,
    Reconciled,
}

impl BalanceChangeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DebtPosted => "debt_posted",
            Self::PaymentPosted => "payment_posted",
            Self::PaymentAllocated => "payment_allocated",
            Self::TransactionDeleted => "transaction_deleted",
            Self::Reconciled => "reconciled",
        }
    }
}

impl fmt::Display for BalanceChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One committed mutation of a customer's ledger state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceChange {
    pub customer_id: Uuid,
    /// Transaction that triggered the change, if any.
    pub transaction_id: Option<Uuid>,
    pub old_balance: Decimal,
    pub new_balance: Decimal,
    pub reason: BalanceChangeReason,
    /// Debts whose paid amount or status changed.
    pub settlements_updated: usize,
    pub recorded_utc: DateTime<Utc>,
}

impl BalanceChange {
    pub fn new(
        customer_id: Uuid,
        transaction_id: Option<Uuid>,
        old_balance: Decimal,
        new_balance: Decimal,
        reason: BalanceChangeReason,
        settlements_updated: usize,
    ) -> Self {
        Self {
            customer_id,
            transaction_id,
            old_balance,
            new_balance,
            reason,
            settlements_updated,
            recorded_utc: Utc::now(),
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, change: &BalanceChange);
}

/// Writes audit records to the `audit` tracing target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, change: &BalanceChange) {
        info!(
            target: "audit",
            customer_id = %change.customer_id,
            transaction_id = ?change.transaction_id,
            old_balance = %change.old_balance,
            new_balance = %change.new_balance,
            reason = %change.reason,
            settlements_updated = change.settlements_updated,
            "Balance change committed"
        );
    }
}
