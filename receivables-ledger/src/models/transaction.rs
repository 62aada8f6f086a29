//! Ledger transaction model.

use crate::error::LedgerError;
use crate::utils::money::{
    ensure_money_scale, ensure_positive_amount, line_amount, percentage_of, QUANTITY_SCALE,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Transaction types known to the back office.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Sale,
    Treatment,
    Purchase,
    CustomerPayment,
    SupplierPayment,
    Refund,
}

impl TransactionType {
    /// Types that create a receivable.
    pub const DEBT_TYPES: [TransactionType; 2] = [Self::Sale, Self::Treatment];

    pub const ALL: [TransactionType; 6] = [
        Self::Sale,
        Self::Treatment,
        Self::Purchase,
        Self::CustomerPayment,
        Self::SupplierPayment,
        Self::Refund,
    ];

    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sale => "SALE",
            Self::Treatment => "TREATMENT",
            Self::Purchase => "PURCHASE",
            Self::CustomerPayment => "CUSTOMER_PAYMENT",
            Self::SupplierPayment => "SUPPLIER_PAYMENT",
            Self::Refund => "REFUND",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }

    /// Prefix of the human-readable transaction code.
    pub fn code_prefix(&self) -> &'static str {
        match self {
            Self::Sale => "SAL",
            Self::Treatment => "TRT",
            Self::Purchase => "PUR",
            Self::CustomerPayment => "PAY",
            Self::SupplierPayment => "SPY",
            Self::Refund => "REF",
        }
    }

    pub fn is_debt(&self) -> bool {
        matches!(self, Self::Sale | Self::Treatment)
    }

    pub fn is_customer_payment(&self) -> bool {
        matches!(self, Self::CustomerPayment)
    }

    /// Whether this type moves the customer balance at all.
    pub fn affects_receivables(&self) -> bool {
        self.is_debt() || self.is_customer_payment()
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Format `PREFIX-000042`.
pub fn format_transaction_code(transaction_type: TransactionType, sequence: i64) -> String {
    format!("{}-{:06}", transaction_type.code_prefix(), sequence)
}

/// Settlement state of a debt transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementStatus {
    Pending,
    Partial,
    Paid,
}

impl SettlementStatus {
    /// PAID when fully covered, PENDING when nothing is paid, PARTIAL otherwise.
    pub fn derive(paid_amount: Decimal, total: Decimal) -> Self {
        if paid_amount >= total {
            Self::Paid
        } else if paid_amount.is_zero() {
            Self::Pending
        } else {
            Self::Partial
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Partial => "PARTIAL",
            Self::Paid => "PAID",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(Self::Pending),
            "PARTIAL" => Some(Self::Partial),
            "PAID" => Some(Self::Paid),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Paid)
    }
}

impl std::fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Single ledger transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: Uuid,
    pub code: String,
    pub transaction_type: TransactionType,
    pub customer_id: Option<Uuid>,
    /// Business date; FIFO ordering key.
    pub date: NaiveDate,
    /// Creation order; FIFO tie-breaker.
    pub seq: i64,
    pub subtotal: Decimal,
    pub vat_total: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub paid_amount: Decimal,
    /// `None` for payments, which are not debts.
    pub status: Option<SettlementStatus>,
    pub notes: Option<String>,
    /// Debt a point-of-sale payment was taken for.
    pub source_transaction_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}

impl Transaction {
    pub fn is_debt(&self) -> bool {
        self.transaction_type.is_debt()
    }

    /// Amount still owed on a debt.
    pub fn outstanding(&self) -> Decimal {
        self.total - self.paid_amount
    }

    pub fn is_open_debt(&self) -> bool {
        self.is_debt() && self.status.map(|s| s.is_open()).unwrap_or(false)
    }

    /// FIFO sort key: business date, then creation order.
    pub fn fifo_key(&self) -> (NaiveDate, i64) {
        (self.date, self.seq)
    }

    /// Check `0 <= paid_amount <= total` and that the status matches.
    pub fn check_settlement(&self) -> Result<(), LedgerError> {
        check_settlement_values(self, self.paid_amount, self.status)
    }
}

/// Validate a prospective `(paid_amount, status)` pair for `tx`.
pub fn check_settlement_values(
    tx: &Transaction,
    paid_amount: Decimal,
    status: Option<SettlementStatus>,
) -> Result<(), LedgerError> {
    if !tx.is_debt() {
        return Ok(());
    }
    if paid_amount < Decimal::ZERO || paid_amount > tx.total {
        tracing::error!(
            transaction_id = %tx.transaction_id,
            customer_id = ?tx.customer_id,
            paid_amount = %paid_amount,
            total = %tx.total,
            "Paid amount out of range"
        );
        return Err(LedgerError::InvariantViolation(format!(
            "transaction {} paid amount {} outside 0..={}",
            tx.code, paid_amount, tx.total
        )));
    }
    let expected = SettlementStatus::derive(paid_amount, tx.total);
    if status != Some(expected) {
        tracing::error!(
            transaction_id = %tx.transaction_id,
            customer_id = ?tx.customer_id,
            paid_amount = %paid_amount,
            total = %tx.total,
            status = ?status,
            expected = %expected,
            "Status inconsistent with paid amount"
        );
        return Err(LedgerError::InvariantViolation(format!(
            "transaction {} status {:?} does not match paid amount {} of {}",
            tx.code, status, paid_amount, tx.total
        )));
    }
    Ok(())
}

/// Stored line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionItem {
    pub item_id: Uuid,
    pub transaction_id: Uuid,
    pub product_id: Option<Uuid>,
    pub description: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    /// Percent, e.g. `18` for 18%.
    pub vat_rate: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
}

/// Line item as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTransactionItem {
    pub product_id: Option<Uuid>,
    pub description: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub vat_rate: Decimal,
    pub discount: Decimal,
}

/// Priced components of a line item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemPricing {
    /// Quantity × unit price, less the line discount.
    pub net: Decimal,
    pub vat: Decimal,
    pub total: Decimal,
}

impl NewTransactionItem {
    pub fn new(quantity: Decimal, unit_price: Decimal, vat_rate: Decimal) -> Self {
        Self {
            product_id: None,
            description: None,
            quantity,
            unit_price,
            vat_rate,
            discount: Decimal::ZERO,
        }
    }

    pub fn with_discount(mut self, discount: Decimal) -> Self {
        self.discount = discount;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn price(&self) -> ItemPricing {
        let net = line_amount(self.quantity, self.unit_price) - self.discount;
        let vat = percentage_of(net, self.vat_rate);
        ItemPricing {
            net,
            vat,
            total: net + vat,
        }
    }

    fn validate(&self, index: usize) -> Result<(), LedgerError> {
        if self.quantity <= Decimal::ZERO {
            return Err(LedgerError::validation(format!(
                "item {} quantity must be positive",
                index
            )));
        }
        if self.unit_price < Decimal::ZERO || self.discount < Decimal::ZERO {
            return Err(LedgerError::validation(format!(
                "item {} price and discount must not be negative",
                index
            )));
        }
        if self.vat_rate < Decimal::ZERO || self.vat_rate > Decimal::ONE_HUNDRED {
            return Err(LedgerError::validation(format!(
                "item {} VAT rate must be between 0 and 100",
                index
            )));
        }
        ensure_quantity_scale(self.quantity, index)?;
        ensure_money_scale(self.unit_price, "unit price")?;
        ensure_money_scale(self.discount, "item discount")?;
        if self.price().net < Decimal::ZERO {
            return Err(LedgerError::validation(format!(
                "item {} discount exceeds line amount",
                index
            )));
        }
        Ok(())
    }
}

/// Quantities are stored with three decimals; anything finer would be
/// rounded by the store after the line was priced.
fn ensure_quantity_scale(quantity: Decimal, index: usize) -> Result<(), LedgerError> {
    if quantity.normalize().scale() > QUANTITY_SCALE {
        return Err(LedgerError::validation(format!(
            "item {} quantity must have at most {} decimal places, got {}",
            index, QUANTITY_SCALE, quantity
        )));
    }
    Ok(())
}

/// Input for posting a new transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionDraft {
    pub transaction_type: TransactionType,
    pub customer_id: Uuid,
    pub date: NaiveDate,
    pub subtotal: Decimal,
    pub vat_total: Decimal,
    /// Header-level discount, applied after VAT.
    pub discount: Decimal,
    pub total: Decimal,
    /// Amount paid at the point of sale (debts only).
    pub paid_amount: Decimal,
    pub items: Vec<NewTransactionItem>,
    pub notes: Option<String>,
    /// Set on the payment recorded for a debt's point-of-sale amount.
    pub source_transaction_id: Option<Uuid>,
}

impl TransactionDraft {
    /// A draft with no line items, whose total is taken as-is.
    pub fn new(
        transaction_type: TransactionType,
        customer_id: Uuid,
        date: NaiveDate,
        total: Decimal,
    ) -> Self {
        Self {
            transaction_type,
            customer_id,
            date,
            subtotal: total,
            vat_total: Decimal::ZERO,
            discount: Decimal::ZERO,
            total,
            paid_amount: Decimal::ZERO,
            items: Vec::new(),
            notes: None,
            source_transaction_id: None,
        }
    }

    pub fn sale(customer_id: Uuid, date: NaiveDate, total: Decimal) -> Self {
        Self::new(TransactionType::Sale, customer_id, date, total)
    }

    pub fn treatment(customer_id: Uuid, date: NaiveDate, total: Decimal) -> Self {
        Self::new(TransactionType::Treatment, customer_id, date, total)
    }

    pub fn payment(customer_id: Uuid, date: NaiveDate, amount: Decimal) -> Self {
        Self::new(TransactionType::CustomerPayment, customer_id, date, amount)
    }

    /// Price line items and derive the header totals from them.
    pub fn priced(
        transaction_type: TransactionType,
        customer_id: Uuid,
        date: NaiveDate,
        items: Vec<NewTransactionItem>,
        discount: Decimal,
    ) -> Self {
        let (subtotal, vat_total) = items.iter().map(NewTransactionItem::price).fold(
            (Decimal::ZERO, Decimal::ZERO),
            |(net, vat), p| (net + p.net, vat + p.vat),
        );
        Self {
            transaction_type,
            customer_id,
            date,
            subtotal,
            vat_total,
            discount,
            total: subtotal + vat_total - discount,
            paid_amount: Decimal::ZERO,
            items,
            notes: None,
            source_transaction_id: None,
        }
    }

    pub fn with_paid_amount(mut self, paid_amount: Decimal) -> Self {
        self.paid_amount = paid_amount;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Mark a payment as taken at the point of sale for `debt_id`.
    pub fn paying_for(mut self, debt_id: Uuid) -> Self {
        self.source_transaction_id = Some(debt_id);
        self
    }

    /// Creation-time checks. Item consistency is only enforced here.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if !self.transaction_type.affects_receivables() {
            return Err(LedgerError::validation(format!(
                "transaction type {} is not handled by the receivables ledger",
                self.transaction_type
            )));
        }

        ensure_positive_amount(self.total, "total")?;
        ensure_money_scale(self.subtotal, "subtotal")?;
        ensure_money_scale(self.vat_total, "VAT total")?;
        ensure_money_scale(self.discount, "discount")?;
        ensure_money_scale(self.paid_amount, "paid amount")?;

        if self.discount < Decimal::ZERO {
            return Err(LedgerError::validation("discount must not be negative"));
        }

        if self.transaction_type.is_customer_payment() {
            if !self.paid_amount.is_zero() {
                return Err(LedgerError::validation(
                    "paid amount only applies to sales and treatments",
                ));
            }
            if !self.items.is_empty() {
                return Err(LedgerError::validation("payments cannot carry line items"));
            }
        } else if self.source_transaction_id.is_some() {
            return Err(LedgerError::validation(
                "only payments can reference a source transaction",
            ));
        } else if self.paid_amount < Decimal::ZERO || self.paid_amount > self.total {
            return Err(LedgerError::validation(format!(
                "paid amount {} must be between 0 and total {}",
                self.paid_amount, self.total
            )));
        }

        if self.subtotal + self.vat_total - self.discount != self.total {
            return Err(LedgerError::validation(format!(
                "total {} does not equal subtotal {} + VAT {} - discount {}",
                self.total, self.subtotal, self.vat_total, self.discount
            )));
        }

        if !self.items.is_empty() {
            for (i, item) in self.items.iter().enumerate() {
                item.validate(i)?;
            }
            let items_total: Decimal = self.items.iter().map(|i| i.price().total).sum();
            if items_total != self.subtotal + self.vat_total {
                return Err(LedgerError::validation(format!(
                    "line items total {} does not match subtotal {} + VAT {}",
                    items_total, self.subtotal, self.vat_total
                )));
            }
        }

        Ok(())
    }
}
