//! Domain models for the receivables ledger.

mod customer;
mod outcome;
mod report;
mod transaction;

pub use customer::{Customer, NewCustomer};
pub use outcome::{
    AllocationOutcome, DeleteOutcome, DriftReport, PostOutcome, RecomputeFailure,
    RecomputeOutcome, RecomputeSummary, SettlementChange,
};
pub use report::{
    ReceivableCustomer, ReceivablesReport, ReceivablesSort, ReceivablesStats, SortOrder,
    Statement, StatementLine,
};
pub use transaction::{
    check_settlement_values, format_transaction_code, ItemPricing, NewTransactionItem,
    SettlementStatus, Transaction, TransactionDraft, TransactionItem, TransactionType,
};
