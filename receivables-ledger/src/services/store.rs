//! Storage seam for the ledger engine.
//!
//! Every state change goes through a [`LedgerUnit`]: one atomic unit of work
//! scoped to a single customer whose row is locked for the unit's lifetime.
//! Dropping a unit without calling [`LedgerUnit::commit`] rolls it back.

use crate::error::LedgerError;
use crate::models::{
    Customer, NewCustomer, ReceivableCustomer, SettlementStatus, Transaction, TransactionDraft,
    TransactionItem, TransactionType,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Transaction-capable store shared by all workers.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a unit of work holding the customer's lock.
    ///
    /// Fails with `NotFound` for an unknown customer and with
    /// `ConcurrencyConflict` if the lock is not acquired in time.
    async fn begin(&self, customer_id: Uuid) -> Result<Box<dyn LedgerUnit>, LedgerError>;

    async fn create_customer(&self, input: &NewCustomer) -> Result<Customer, LedgerError>;

    async fn get_customer(&self, customer_id: Uuid) -> Result<Option<Customer>, LedgerError>;

    async fn get_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<Transaction>, LedgerError>;

    async fn get_transaction_items(
        &self,
        transaction_id: Uuid,
    ) -> Result<Vec<TransactionItem>, LedgerError>;

    /// All of a customer's transactions in FIFO order (date, then creation).
    async fn list_customer_transactions(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<Transaction>, LedgerError>;

    /// Customer ids in ascending order, strictly after `after`.
    async fn customer_ids_after(
        &self,
        after: Option<Uuid>,
        limit: u32,
    ) -> Result<Vec<Uuid>, LedgerError>;

    /// Customers with a positive balance and their open debt counts.
    async fn list_receivables(&self) -> Result<Vec<ReceivableCustomer>, LedgerError>;
}

/// One atomic, customer-scoped unit of work.
#[async_trait]
pub trait LedgerUnit: Send {
    /// The locked customer row, reflecting writes made in this unit.
    fn customer(&self) -> &Customer;

    /// A transaction of the locked customer.
    async fn get_transaction(
        &mut self,
        transaction_id: Uuid,
    ) -> Result<Option<Transaction>, LedgerError>;

    /// SALE/TREATMENT rows with status PENDING or PARTIAL, in FIFO order.
    async fn find_open_debts(&mut self) -> Result<Vec<Transaction>, LedgerError>;

    /// Every SALE/TREATMENT row, in FIFO order.
    async fn find_debts(&mut self) -> Result<Vec<Transaction>, LedgerError>;

    /// Payments recorded at the point of sale for `debt_id`.
    async fn find_point_of_sale_payments(
        &mut self,
        debt_id: Uuid,
    ) -> Result<Vec<Transaction>, LedgerError>;

    /// Sum of `total` over the customer's transactions of the given types.
    async fn sum_totals(&mut self, types: &[TransactionType]) -> Result<Decimal, LedgerError>;

    /// Insert a transaction and its items exactly as drafted, assigning id,
    /// code and creation order.
    async fn insert_transaction(
        &mut self,
        draft: &TransactionDraft,
        status: Option<SettlementStatus>,
    ) -> Result<Transaction, LedgerError>;

    async fn delete_transaction(&mut self, transaction_id: Uuid) -> Result<(), LedgerError>;

    async fn update_settlement(
        &mut self,
        transaction_id: Uuid,
        paid_amount: Decimal,
        status: SettlementStatus,
    ) -> Result<(), LedgerError>;

    async fn set_balance(&mut self, balance: Decimal) -> Result<(), LedgerError>;

    async fn commit(self: Box<Self>) -> Result<(), LedgerError>;
}
