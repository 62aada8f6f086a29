//! Customer model carrying the denormalized receivable balance.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Customer account.
///
/// `balance` is positive when the customer owes the clinic and negative when
/// the clinic holds an overpayment. It must always equal the sum of SALE and
/// TREATMENT totals minus the sum of CUSTOMER_PAYMENT totals.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Customer {
    pub customer_id: Uuid,
    pub code: String,
    pub name: String,
    pub balance: Decimal,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Customer {
    pub fn is_settled(&self) -> bool {
        self.balance.is_zero()
    }

    /// Customer has paid more than they owe.
    pub fn is_creditor(&self) -> bool {
        self.balance < Decimal::ZERO
    }
}

/// Input for registering a customer with the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCustomer {
    pub code: String,
    pub name: String,
}

impl NewCustomer {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
        }
    }
}
