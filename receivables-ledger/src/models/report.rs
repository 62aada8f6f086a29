//! Statement and receivables read models.

use super::customer::Customer;
use super::transaction::{SettlementStatus, TransactionType};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Statement line with running balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementLine {
    pub transaction_id: Uuid,
    pub code: String,
    pub date: NaiveDate,
    pub transaction_type: TransactionType,
    pub debit: Decimal,
    pub credit: Decimal,
    pub running_balance: Decimal,
    pub status: Option<SettlementStatus>,
}

/// Customer statement for an optional date window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub customer_id: Uuid,
    pub customer_code: String,
    pub customer_name: String,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub opening_balance: Decimal,
    pub closing_balance: Decimal,
    pub lines: Vec<StatementLine>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceivablesSort {
    #[default]
    Balance,
    Name,
    Code,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Customer owing money, with the number of debts still open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceivableCustomer {
    pub customer: Customer,
    pub open_debts: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceivablesStats {
    pub total_customers: usize,
    pub total_receivable: Decimal,
    pub average_receivable: Decimal,
    pub highest_receivable: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceivablesReport {
    pub customers: Vec<ReceivableCustomer>,
    pub stats: ReceivablesStats,
}
