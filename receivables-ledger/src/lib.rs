//! Receivables Ledger - customer balances, FIFO payment allocation and
//! balance reconciliation for the clinic back office.

pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod startup;
pub mod utils;

pub use error::LedgerError;
pub use startup::Ledger;
