//! Transaction posting and deletion tests.

mod common;

use common::{
    assert_ledger_consistent, balance_of, create_customer, date, post_payment, post_sale,
    spawn_ledger,
};
use receivables_ledger::models::{
    NewTransactionItem, SettlementStatus, TransactionDraft, TransactionType,
};
use receivables_ledger::services::{BalanceChangeReason, LedgerStore};
use receivables_ledger::LedgerError;
use rust_decimal_macros::dec;
use uuid::Uuid;

#[tokio::test]
async fn sale_and_payment_lifecycle() {
    let t = spawn_ledger();
    let c = create_customer(&t.ledger).await.customer_id;
    let store = t.ledger.store();

    let first = post_sale(&t.ledger, c, date(2024, 3, 1), dec!(1000)).await;
    assert_eq!(first.transaction.status, Some(SettlementStatus::Pending));
    assert_eq!(first.balance_after, dec!(1000));

    let second = post_sale(&t.ledger, c, date(2024, 3, 2), dec!(500)).await;
    assert_eq!(second.balance_after, dec!(1500));

    let payment = post_payment(&t.ledger, c, date(2024, 3, 3), dec!(600)).await;
    assert_eq!(payment.balance_after, dec!(900));

    let s1 = store
        .get_transaction(first.transaction.transaction_id)
        .await
        .unwrap()
        .unwrap();
    let s2 = store
        .get_transaction(second.transaction.transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(s1.paid_amount, dec!(600));
    assert_eq!(s1.status, Some(SettlementStatus::Partial));
    assert_eq!(s2.paid_amount, dec!(0));
    assert_eq!(s2.status, Some(SettlementStatus::Pending));

    let payment = post_payment(&t.ledger, c, date(2024, 3, 4), dec!(900)).await;
    assert_eq!(payment.balance_after, dec!(0));

    let s1 = store
        .get_transaction(first.transaction.transaction_id)
        .await
        .unwrap()
        .unwrap();
    let s2 = store
        .get_transaction(second.transaction.transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!((s1.paid_amount, s1.status), (dec!(1000), Some(SettlementStatus::Paid)));
    assert_eq!((s2.paid_amount, s2.status), (dec!(500), Some(SettlementStatus::Paid)));

    assert_ledger_consistent(&t.ledger, c).await;
}

#[tokio::test]
async fn codes_are_sequential_per_type() {
    let t = spawn_ledger();
    let c = create_customer(&t.ledger).await.customer_id;

    let s1 = post_sale(&t.ledger, c, date(2024, 1, 1), dec!(10)).await;
    let p1 = post_payment(&t.ledger, c, date(2024, 1, 1), dec!(5)).await;
    let s2 = post_sale(&t.ledger, c, date(2024, 1, 1), dec!(10)).await;
    let t1 = t
        .ledger
        .poster()
        .post_create(TransactionDraft::treatment(c, date(2024, 1, 1), dec!(20)))
        .await
        .unwrap();

    assert_eq!(s1.transaction.code, "SAL-000001");
    assert_eq!(s2.transaction.code, "SAL-000002");
    assert_eq!(p1.transaction.code, "PAY-000001");
    assert_eq!(t1.transaction.code, "TRT-000001");
    assert!(s1.transaction.seq < s2.transaction.seq);
}

#[tokio::test]
async fn priced_treatment_keeps_its_items() {
    let t = spawn_ledger();
    let c = create_customer(&t.ledger).await.customer_id;

    let draft = TransactionDraft::priced(
        TransactionType::Treatment,
        c,
        date(2024, 4, 10),
        vec![
            NewTransactionItem::new(dec!(2), dec!(50.00), dec!(18)).with_description("Consultation"),
            NewTransactionItem::new(dec!(1), dec!(30.00), dec!(8)).with_discount(dec!(5.00)),
        ],
        dec!(10.00),
    );
    let outcome = t.ledger.poster().post_create(draft).await.unwrap();

    assert_eq!(outcome.transaction.subtotal, dec!(125.00));
    assert_eq!(outcome.transaction.vat_total, dec!(20.00));
    assert_eq!(outcome.transaction.total, dec!(135.00));
    assert_eq!(outcome.balance_after, dec!(135.00));

    let items = t
        .ledger
        .store()
        .get_transaction_items(outcome.transaction.transaction_id)
        .await
        .unwrap();
    assert_eq!(items.len(), 2);
    let mut totals: Vec<_> = items.iter().map(|i| i.total).collect();
    totals.sort();
    assert_eq!(totals, vec![dec!(27.00), dec!(118.00)]);
}

#[tokio::test]
async fn inconsistent_header_is_rejected() {
    let t = spawn_ledger();
    let c = create_customer(&t.ledger).await.customer_id;

    let mut draft = TransactionDraft::sale(c, date(2024, 1, 1), dec!(100));
    draft.total = dec!(90);

    let result = t.ledger.poster().post_create(draft).await;
    assert!(matches!(result, Err(LedgerError::Validation(_))));
    assert_eq!(balance_of(&t.ledger, c).await, dec!(0));
}

#[tokio::test]
async fn point_of_sale_payment_is_recorded_as_payment() {
    let t = spawn_ledger();
    let c = create_customer(&t.ledger).await.customer_id;

    let outcome = t
        .ledger
        .poster()
        .post_create(
            TransactionDraft::sale(c, date(2024, 1, 1), dec!(200)).with_paid_amount(dec!(80)),
        )
        .await
        .unwrap();

    assert_eq!(outcome.transaction.paid_amount, dec!(80));
    assert_eq!(outcome.transaction.status, Some(SettlementStatus::Partial));
    let payment = outcome.companion_payment.unwrap();
    assert_eq!(payment.transaction_type, TransactionType::CustomerPayment);
    assert_eq!(payment.total, dec!(80));
    assert_eq!(outcome.balance_after, dec!(120));

    // Paid in full at the till, but the older open sale absorbs the
    // payment first, exactly as a recompute would allocate it.
    let later = t
        .ledger
        .poster()
        .post_create(
            TransactionDraft::sale(c, date(2024, 1, 2), dec!(50)).with_paid_amount(dec!(50)),
        )
        .await
        .unwrap();
    assert_eq!(later.transaction.status, Some(SettlementStatus::Pending));
    assert_eq!(later.balance_after, dec!(120));

    let first = t
        .ledger
        .store()
        .get_transaction(outcome.transaction.transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.paid_amount, dec!(130));

    assert_ledger_consistent(&t.ledger, c).await;
    let report = t.ledger.reconciliation().verify_customer(c).await.unwrap();
    assert!(report.is_clean());
}

#[tokio::test]
async fn paid_amount_above_total_is_rejected() {
    let t = spawn_ledger();
    let c = create_customer(&t.ledger).await.customer_id;

    let result = t
        .ledger
        .poster()
        .post_create(
            TransactionDraft::sale(c, date(2024, 1, 1), dec!(100)).with_paid_amount(dec!(100.01)),
        )
        .await;
    assert!(matches!(result, Err(LedgerError::Validation(_))));
}

#[tokio::test]
async fn non_receivable_types_are_rejected() {
    let t = spawn_ledger();
    let c = create_customer(&t.ledger).await.customer_id;

    for transaction_type in [
        TransactionType::Purchase,
        TransactionType::SupplierPayment,
        TransactionType::Refund,
    ] {
        let result = t
            .ledger
            .poster()
            .post_create(TransactionDraft::new(
                transaction_type,
                c,
                date(2024, 1, 1),
                dec!(10),
            ))
            .await;
        assert!(matches!(result, Err(LedgerError::Validation(_))));
    }
}

#[tokio::test]
async fn posting_for_unknown_customer_fails() {
    let t = spawn_ledger();
    let result = t
        .ledger
        .poster()
        .post_create(TransactionDraft::sale(Uuid::new_v4(), date(2024, 1, 1), dec!(10)))
        .await;
    assert!(matches!(result, Err(LedgerError::NotFound(_))));
}

#[tokio::test]
async fn deleting_payment_reopens_debts() {
    let t = spawn_ledger();
    let c = create_customer(&t.ledger).await.customer_id;

    let sale = post_sale(&t.ledger, c, date(2024, 1, 1), dec!(100)).await;
    let p1 = post_payment(&t.ledger, c, date(2024, 1, 2), dec!(70)).await;
    post_payment(&t.ledger, c, date(2024, 1, 3), dec!(30)).await;
    assert_eq!(balance_of(&t.ledger, c).await, dec!(0));

    let outcome = t
        .ledger
        .poster()
        .post_delete(p1.transaction.transaction_id)
        .await
        .unwrap();

    assert_eq!(outcome.balance_before, dec!(0));
    assert_eq!(outcome.balance_after, dec!(70));
    assert_eq!(outcome.recompute.transactions_updated.len(), 1);

    let sale = t
        .ledger
        .store()
        .get_transaction(sale.transaction.transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sale.paid_amount, dec!(30));
    assert_eq!(sale.status, Some(SettlementStatus::Partial));
    assert!(t
        .ledger
        .store()
        .get_transaction(p1.transaction.transaction_id)
        .await
        .unwrap()
        .is_none());

    assert_ledger_consistent(&t.ledger, c).await;
}

#[tokio::test]
async fn deleting_debt_moves_its_payments_to_later_debts() {
    let t = spawn_ledger();
    let c = create_customer(&t.ledger).await.customer_id;

    let old = post_sale(&t.ledger, c, date(2024, 1, 1), dec!(100)).await;
    let newer = post_sale(&t.ledger, c, date(2024, 1, 5), dec!(100)).await;
    post_payment(&t.ledger, c, date(2024, 1, 6), dec!(100)).await;

    let outcome = t
        .ledger
        .poster()
        .post_delete(old.transaction.transaction_id)
        .await
        .unwrap();
    assert_eq!(outcome.balance_after, dec!(0));

    let newer = t
        .ledger
        .store()
        .get_transaction(newer.transaction.transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(newer.status, Some(SettlementStatus::Paid));
    assert_ledger_consistent(&t.ledger, c).await;
}

#[tokio::test]
async fn deleting_sale_paid_at_till_removes_its_payment() {
    let t = spawn_ledger();
    let c = create_customer(&t.ledger).await.customer_id;

    let sale = t
        .ledger
        .poster()
        .post_create(
            TransactionDraft::sale(c, date(2024, 1, 1), dec!(100)).with_paid_amount(dec!(100)),
        )
        .await
        .unwrap();
    let payment = sale.companion_payment.clone().unwrap();
    assert_eq!(payment.source_transaction_id, Some(sale.transaction.transaction_id));
    assert_eq!(balance_of(&t.ledger, c).await, dec!(0));

    let outcome = t
        .ledger
        .poster()
        .post_delete(sale.transaction.transaction_id)
        .await
        .unwrap();
    assert_eq!(outcome.companion_payments.len(), 1);
    assert_eq!(outcome.companion_payments[0].transaction_id, payment.transaction_id);
    assert_eq!(outcome.balance_after, dec!(0));

    assert_eq!(balance_of(&t.ledger, c).await, dec!(0));
    assert!(t
        .ledger
        .store()
        .list_customer_transactions(c)
        .await
        .unwrap()
        .is_empty());

    // No leftover credit settles an unrelated later sale.
    let later = post_sale(&t.ledger, c, date(2024, 2, 1), dec!(100)).await;
    t.ledger.reconciliation().recompute_customer(c).await.unwrap();
    let later = t
        .ledger
        .store()
        .get_transaction(later.transaction.transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(later.status, Some(SettlementStatus::Pending));
    assert_eq!(balance_of(&t.ledger, c).await, dec!(100));
}

#[tokio::test]
async fn deleting_sale_paid_at_till_reopens_older_debt_it_settled() {
    let t = spawn_ledger();
    let c = create_customer(&t.ledger).await.customer_id;

    let older = post_sale(&t.ledger, c, date(2024, 1, 1), dec!(60)).await;
    // 60 of the till payment goes to the older sale, 40 to this one.
    let sale = t
        .ledger
        .poster()
        .post_create(
            TransactionDraft::sale(c, date(2024, 1, 2), dec!(100)).with_paid_amount(dec!(100)),
        )
        .await
        .unwrap();
    assert_eq!(sale.transaction.paid_amount, dec!(40));

    let outcome = t
        .ledger
        .poster()
        .post_delete(sale.transaction.transaction_id)
        .await
        .unwrap();
    assert_eq!(outcome.balance_before, dec!(60));
    assert_eq!(outcome.balance_after, dec!(60));

    let older = t
        .ledger
        .store()
        .get_transaction(older.transaction.transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(older.paid_amount, dec!(0));
    assert_eq!(older.status, Some(SettlementStatus::Pending));

    let remaining = t.ledger.store().list_customer_transactions(c).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_ledger_consistent(&t.ledger, c).await;
}

#[tokio::test]
async fn deleting_till_payment_alone_keeps_the_sale() {
    let t = spawn_ledger();
    let c = create_customer(&t.ledger).await.customer_id;

    let sale = t
        .ledger
        .poster()
        .post_create(
            TransactionDraft::sale(c, date(2024, 1, 1), dec!(100)).with_paid_amount(dec!(30)),
        )
        .await
        .unwrap();
    let payment = sale.companion_payment.unwrap();

    let outcome = t
        .ledger
        .poster()
        .post_delete(payment.transaction_id)
        .await
        .unwrap();
    assert!(outcome.companion_payments.is_empty());
    assert_eq!(outcome.balance_after, dec!(100));

    let sale = t
        .ledger
        .store()
        .get_transaction(sale.transaction.transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sale.status, Some(SettlementStatus::Pending));
    assert_ledger_consistent(&t.ledger, c).await;
}

#[tokio::test]
async fn deleting_missing_transaction_is_not_found() {
    let t = spawn_ledger();
    let result = t.ledger.poster().post_delete(Uuid::new_v4()).await;
    assert!(matches!(result, Err(LedgerError::NotFound(_))));
}

#[tokio::test]
async fn every_committed_mutation_is_audited() {
    let t = spawn_ledger();
    let c = create_customer(&t.ledger).await.customer_id;

    let sale = post_sale(&t.ledger, c, date(2024, 1, 1), dec!(40)).await;
    post_payment(&t.ledger, c, date(2024, 1, 2), dec!(10)).await;
    t.ledger
        .poster()
        .post_delete(sale.transaction.transaction_id)
        .await
        .unwrap();

    let records = t.audit.records();
    let reasons: Vec<_> = records.iter().map(|r| r.reason).collect();
    assert_eq!(
        reasons,
        vec![
            BalanceChangeReason::DebtPosted,
            BalanceChangeReason::PaymentPosted,
            BalanceChangeReason::TransactionDeleted,
        ]
    );
    assert_eq!(records[1].old_balance, dec!(40));
    assert_eq!(records[1].new_balance, dec!(30));
    assert_eq!(records[2].new_balance, dec!(-10));
    assert!(records.iter().all(|r| r.customer_id == c));
}

#[tokio::test]
async fn mixed_sequence_keeps_balance_invariant() {
    let t = spawn_ledger();
    let c = create_customer(&t.ledger).await.customer_id;

    let a = post_sale(&t.ledger, c, date(2024, 2, 1), dec!(250.50)).await;
    post_payment(&t.ledger, c, date(2024, 2, 2), dec!(100)).await;
    let b = t
        .ledger
        .poster()
        .post_create(TransactionDraft::treatment(c, date(2024, 1, 15), dec!(80.25)))
        .await
        .unwrap();
    let p = post_payment(&t.ledger, c, date(2024, 2, 3), dec!(300)).await;
    assert_ledger_consistent(&t.ledger, c).await;

    t.ledger.poster().post_delete(b.transaction.transaction_id).await.unwrap();
    assert_ledger_consistent(&t.ledger, c).await;

    t.ledger.poster().post_delete(p.transaction.transaction_id).await.unwrap();
    assert_ledger_consistent(&t.ledger, c).await;

    t.ledger.poster().post_delete(a.transaction.transaction_id).await.unwrap();
    assert_ledger_consistent(&t.ledger, c).await;
    assert_eq!(balance_of(&t.ledger, c).await, dec!(-100));
}
