//! Read-only views: customer statements and the receivables report.

use crate::error::LedgerError;
use crate::models::{
    ReceivableCustomer, ReceivablesReport, ReceivablesSort, ReceivablesStats, SortOrder,
    Statement, StatementLine,
};
use crate::services::store::LedgerStore;
use crate::utils::money::round_money;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

#[derive(Clone)]
pub struct LedgerReports {
    store: Arc<dyn LedgerStore>,
}

impl LedgerReports {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Chronological statement with a running balance.
    ///
    /// Transactions before `from` are folded into the opening balance;
    /// transactions after `to` are left out.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn customer_statement(
        &self,
        customer_id: Uuid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Statement, LedgerError> {
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(LedgerError::validation(format!(
                    "statement window starts {} after it ends {}",
                    from, to
                )));
            }
        }

        let customer = self
            .store
            .get_customer(customer_id)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("customer {}", customer_id)))?;
        let transactions = self.store.list_customer_transactions(customer_id).await?;

        let mut opening_balance = Decimal::ZERO;
        let mut running = Decimal::ZERO;
        let mut lines = Vec::new();

        for tx in transactions
            .into_iter()
            .filter(|t| t.transaction_type.affects_receivables())
        {
            if to.is_some_and(|to| tx.date > to) {
                break;
            }

            let (debit, credit) = if tx.is_debt() {
                (tx.total, Decimal::ZERO)
            } else {
                (Decimal::ZERO, tx.total)
            };
            running += debit - credit;

            if from.is_some_and(|from| tx.date < from) {
                opening_balance = running;
                continue;
            }

            lines.push(StatementLine {
                transaction_id: tx.transaction_id,
                code: tx.code,
                date: tx.date,
                transaction_type: tx.transaction_type,
                debit,
                credit,
                running_balance: running,
                status: tx.status,
            });
        }

        Ok(Statement {
            customer_id,
            customer_code: customer.code,
            customer_name: customer.name,
            from,
            to,
            opening_balance,
            closing_balance: running,
            lines,
        })
    }

    /// Customers who owe money, sorted, with summary statistics.
    #[instrument(skip(self))]
    pub async fn receivables(
        &self,
        sort: ReceivablesSort,
        order: SortOrder,
    ) -> Result<ReceivablesReport, LedgerError> {
        let mut customers = self.store.list_receivables().await?;
        sort_receivables(&mut customers, sort, order);
        let stats = receivables_stats(&customers);
        Ok(ReceivablesReport { customers, stats })
    }
}

fn sort_receivables(customers: &mut [ReceivableCustomer], sort: ReceivablesSort, order: SortOrder) {
    customers.sort_by(|a, b| {
        let ordering = match sort {
            ReceivablesSort::Balance => a.customer.balance.cmp(&b.customer.balance),
            ReceivablesSort::Name => a.customer.name.cmp(&b.customer.name),
            ReceivablesSort::Code => a.customer.code.cmp(&b.customer.code),
        };
        match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
}

fn receivables_stats(customers: &[ReceivableCustomer]) -> ReceivablesStats {
    let total_receivable: Decimal = customers.iter().map(|c| c.customer.balance).sum();
    let highest_receivable = customers
        .iter()
        .map(|c| c.customer.balance)
        .max()
        .unwrap_or(Decimal::ZERO);
    let average_receivable = if customers.is_empty() {
        Decimal::ZERO
    } else {
        round_money(total_receivable / Decimal::from(customers.len()))
    };

    ReceivablesStats {
        total_customers: customers.len(),
        total_receivable,
        average_receivable,
        highest_receivable,
    }
}
