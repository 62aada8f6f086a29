//! Posting and deleting transactions together with their balance effect.
//!
//! Balances follow the gross model: a debt adds its full total and a
//! payment subtracts its full total, so that the balance always equals
//! debt totals minus payment totals.

use crate::error::LedgerError;
use crate::models::{
    DeleteOutcome, PostOutcome, SettlementStatus, Transaction, TransactionDraft,
};
use crate::services::allocation::allocate_in;
use crate::services::audit::{AuditSink, BalanceChange, BalanceChangeReason};
use crate::services::metrics::{record_error, OPERATION_DURATION, TRANSACTIONS_POSTED};
use crate::services::reconciliation::recompute_in;
use crate::services::store::LedgerStore;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct TransactionPoster {
    store: Arc<dyn LedgerStore>,
    audit: Arc<dyn AuditSink>,
}

impl TransactionPoster {
    pub fn new(store: Arc<dyn LedgerStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    /// Create a SALE, TREATMENT or CUSTOMER_PAYMENT and apply its balance
    /// delta in one unit of work.
    ///
    /// A payment is allocated FIFO to open debts. A debt drafted with a
    /// paid amount is recorded unpaid plus a companion payment for that
    /// amount, which is then allocated like any other payment.
    #[instrument(
        skip(self, draft),
        fields(
            customer_id = %draft.customer_id,
            transaction_type = %draft.transaction_type,
            total = %draft.total
        )
    )]
    pub async fn post_create(&self, draft: TransactionDraft) -> Result<PostOutcome, LedgerError> {
        let timer = OPERATION_DURATION
            .with_label_values(&["post_create"])
            .start_timer();
        let transaction_type = draft.transaction_type;

        let result = self.create_committed(draft).await;
        timer.observe_duration();

        match &result {
            Ok(outcome) => {
                TRANSACTIONS_POSTED
                    .with_label_values(&["create", transaction_type.as_str(), "ok"])
                    .inc();
                if let Some(payment) = &outcome.companion_payment {
                    TRANSACTIONS_POSTED
                        .with_label_values(&["create", payment.transaction_type.as_str(), "ok"])
                        .inc();
                }
                info!(
                    transaction_id = %outcome.transaction.transaction_id,
                    code = %outcome.transaction.code,
                    balance_before = %outcome.balance_before,
                    balance_after = %outcome.balance_after,
                    "Transaction posted"
                );

                let reason = if transaction_type.is_customer_payment() {
                    BalanceChangeReason::PaymentPosted
                } else {
                    BalanceChangeReason::DebtPosted
                };
                self.audit.record(&BalanceChange::new(
                    outcome.transaction.customer_id.unwrap_or_default(),
                    Some(outcome.transaction.transaction_id),
                    outcome.balance_before,
                    outcome.balance_after,
                    reason,
                    outcome
                        .allocation
                        .as_ref()
                        .map(|a| a.updated_count)
                        .unwrap_or(0),
                ));
            }
            Err(err) => {
                TRANSACTIONS_POSTED
                    .with_label_values(&["create", transaction_type.as_str(), "error"])
                    .inc();
                record_error(err);
            }
        }
        result
    }

    async fn create_committed(&self, draft: TransactionDraft) -> Result<PostOutcome, LedgerError> {
        draft.validate()?;

        let mut unit = self.store.begin(draft.customer_id).await?;
        let balance_before = unit.customer().balance;

        let (transaction, companion_payment, allocation, balance_after) =
            if draft.transaction_type.is_customer_payment() {
                let payment = unit.insert_transaction(&draft, None).await?;
                let allocation = allocate_in(unit.as_mut(), payment.total).await?;
                (
                    payment.clone(),
                    None,
                    Some(allocation),
                    balance_before - payment.total,
                )
            } else {
                let paid_at_sale = draft.paid_amount;
                let debt_draft = TransactionDraft {
                    paid_amount: Decimal::ZERO,
                    ..draft
                };
                let debt = unit
                    .insert_transaction(&debt_draft, Some(SettlementStatus::Pending))
                    .await?;
                let mut balance = balance_before + debt.total;

                if paid_at_sale > Decimal::ZERO {
                    let payment_draft =
                        TransactionDraft::payment(debt_draft.customer_id, debt.date, paid_at_sale)
                            .with_notes(format!("Paid at point of sale for {}", debt.code))
                            .paying_for(debt.transaction_id);
                    let payment = unit.insert_transaction(&payment_draft, None).await?;
                    let allocation = allocate_in(unit.as_mut(), payment.total).await?;
                    balance -= payment.total;

                    // Allocation may have settled the new debt; return it as stored.
                    let debt = unit
                        .get_transaction(debt.transaction_id)
                        .await?
                        .ok_or_else(|| {
                            LedgerError::not_found(format!("transaction {}", debt.transaction_id))
                        })?;
                    (debt, Some(payment), Some(allocation), balance)
                } else {
                    (debt, None, None, balance)
                }
            };

        unit.set_balance(balance_after).await?;
        unit.commit().await?;

        Ok(PostOutcome {
            transaction,
            companion_payment,
            allocation,
            balance_before,
            balance_after,
        })
    }

    /// Delete a SALE, TREATMENT or CUSTOMER_PAYMENT, reverse its balance
    /// delta and re-derive settlements in the same unit of work.
    ///
    /// Removing a payment cannot be unwound debt by debt, and removing a
    /// debt frees the payments allocated to it, so both end in a recompute.
    /// Deleting a debt also deletes the payment taken for it at the point
    /// of sale, so cancelling a sale paid at the till leaves no credit.
    #[instrument(skip(self), fields(transaction_id = %transaction_id))]
    pub async fn post_delete(&self, transaction_id: Uuid) -> Result<DeleteOutcome, LedgerError> {
        let timer = OPERATION_DURATION
            .with_label_values(&["post_delete"])
            .start_timer();

        let result = self.delete_committed(transaction_id).await;
        timer.observe_duration();

        match &result {
            Ok(outcome) => {
                let tx = &outcome.transaction;
                TRANSACTIONS_POSTED
                    .with_label_values(&["delete", tx.transaction_type.as_str(), "ok"])
                    .inc();
                for payment in &outcome.companion_payments {
                    TRANSACTIONS_POSTED
                        .with_label_values(&["delete", payment.transaction_type.as_str(), "ok"])
                        .inc();
                }
                info!(
                    code = %tx.code,
                    companion_payments = outcome.companion_payments.len(),
                    balance_before = %outcome.balance_before,
                    balance_after = %outcome.balance_after,
                    settlements_updated = outcome.recompute.transactions_updated.len(),
                    "Transaction deleted"
                );
                self.audit.record(&BalanceChange::new(
                    tx.customer_id.unwrap_or_default(),
                    Some(tx.transaction_id),
                    outcome.balance_before,
                    outcome.balance_after,
                    BalanceChangeReason::TransactionDeleted,
                    outcome.recompute.transactions_updated.len(),
                ));
            }
            Err(err) => {
                TRANSACTIONS_POSTED
                    .with_label_values(&["delete", "unknown", "error"])
                    .inc();
                record_error(err);
            }
        }
        result
    }

    async fn delete_committed(&self, transaction_id: Uuid) -> Result<DeleteOutcome, LedgerError> {
        let located = self
            .store
            .get_transaction(transaction_id)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("transaction {}", transaction_id)))?;
        ensure_receivable(&located)?;
        let customer_id = located.customer_id.ok_or_else(|| {
            LedgerError::validation(format!("transaction {} has no customer", located.code))
        })?;

        let mut unit = self.store.begin(customer_id).await?;
        // Re-read under the lock; it may have been deleted meanwhile.
        let transaction = unit
            .get_transaction(transaction_id)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("transaction {}", transaction_id)))?;

        let balance_before = unit.customer().balance;
        let mut reversed = if transaction.transaction_type.is_customer_payment() {
            balance_before + transaction.total
        } else {
            balance_before - transaction.total
        };

        let companion_payments = if transaction.is_debt() {
            unit.find_point_of_sale_payments(transaction_id).await?
        } else {
            Vec::new()
        };
        for payment in &companion_payments {
            unit.delete_transaction(payment.transaction_id).await?;
            reversed += payment.total;
        }

        unit.delete_transaction(transaction_id).await?;
        unit.set_balance(reversed).await?;
        let recompute = recompute_in(unit.as_mut()).await?;

        if recompute.balance_after != reversed {
            warn!(
                customer_id = %customer_id,
                reversed_balance = %reversed,
                recomputed_balance = %recompute.balance_after,
                "Stored balance had drifted before delete; recompute corrected it"
            );
        }

        let balance_after = recompute.balance_after;
        unit.commit().await?;

        Ok(DeleteOutcome {
            transaction,
            companion_payments,
            balance_before,
            balance_after,
            recompute,
        })
    }
}

fn ensure_receivable(tx: &Transaction) -> Result<(), LedgerError> {
    if tx.transaction_type.affects_receivables() {
        return Ok(());
    }
    Err(LedgerError::validation(format!(
        "transaction type {} is not handled by the receivables ledger",
        tx.transaction_type
    )))
}
