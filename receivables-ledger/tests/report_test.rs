//! Statement and receivables report tests.

mod common;

use common::{create_customer, date, post_payment, post_sale, spawn_ledger};
use receivables_ledger::models::{
    NewCustomer, ReceivablesSort, SettlementStatus, SortOrder, TransactionType,
};
use receivables_ledger::LedgerError;
use rust_decimal_macros::dec;

#[tokio::test]
async fn statement_runs_balance_in_fifo_order() {
    let t = spawn_ledger();
    let customer = create_customer(&t.ledger).await;
    let c = customer.customer_id;

    post_sale(&t.ledger, c, date(2024, 1, 10), dec!(100)).await;
    post_payment(&t.ledger, c, date(2024, 1, 5), dec!(30)).await;
    post_sale(&t.ledger, c, date(2024, 1, 20), dec!(45.50)).await;

    let statement = t
        .ledger
        .reports()
        .customer_statement(c, None, None)
        .await
        .unwrap();

    assert_eq!(statement.customer_code, customer.code);
    assert_eq!(statement.opening_balance, dec!(0));
    assert_eq!(statement.lines.len(), 3);

    let first = &statement.lines[0];
    assert_eq!(first.transaction_type, TransactionType::CustomerPayment);
    assert_eq!(first.credit, dec!(30));
    assert_eq!(first.running_balance, dec!(-30));
    assert_eq!(first.status, None);

    assert_eq!(statement.lines[1].debit, dec!(100));
    assert_eq!(statement.lines[1].running_balance, dec!(70));
    assert_eq!(statement.lines[2].running_balance, dec!(115.50));
    assert_eq!(statement.lines[2].status, Some(SettlementStatus::Pending));
    assert_eq!(statement.closing_balance, dec!(115.50));
}

#[tokio::test]
async fn statement_window_carries_opening_balance() {
    let t = spawn_ledger();
    let c = create_customer(&t.ledger).await.customer_id;

    post_sale(&t.ledger, c, date(2024, 1, 1), dec!(200)).await;
    post_payment(&t.ledger, c, date(2024, 1, 15), dec!(50)).await;
    post_sale(&t.ledger, c, date(2024, 2, 1), dec!(10)).await;
    post_sale(&t.ledger, c, date(2024, 3, 1), dec!(99)).await;

    let statement = t
        .ledger
        .reports()
        .customer_statement(c, Some(date(2024, 1, 10)), Some(date(2024, 2, 28)))
        .await
        .unwrap();

    assert_eq!(statement.opening_balance, dec!(200));
    assert_eq!(statement.lines.len(), 2);
    assert_eq!(statement.closing_balance, dec!(160));
}

#[tokio::test]
async fn statement_rejects_inverted_window() {
    let t = spawn_ledger();
    let c = create_customer(&t.ledger).await.customer_id;

    let result = t
        .ledger
        .reports()
        .customer_statement(c, Some(date(2024, 2, 1)), Some(date(2024, 1, 1)))
        .await;
    assert!(matches!(result, Err(LedgerError::Validation(_))));
}

#[tokio::test]
async fn receivables_lists_debtors_with_stats() {
    let t = spawn_ledger();
    let alice = t
        .ledger
        .create_customer(NewCustomer::new("C-002", "Alice"))
        .await
        .unwrap();
    let bob = t
        .ledger
        .create_customer(NewCustomer::new("C-001", "Bob"))
        .await
        .unwrap();
    let carol = t
        .ledger
        .create_customer(NewCustomer::new("C-003", "Carol"))
        .await
        .unwrap();

    post_sale(&t.ledger, alice.customer_id, date(2024, 1, 1), dec!(100)).await;
    post_sale(&t.ledger, alice.customer_id, date(2024, 1, 2), dec!(50)).await;
    post_payment(&t.ledger, alice.customer_id, date(2024, 1, 3), dec!(100)).await;
    post_sale(&t.ledger, bob.customer_id, date(2024, 1, 1), dec!(75.25)).await;
    // Carol is in credit and must not appear.
    post_payment(&t.ledger, carol.customer_id, date(2024, 1, 1), dec!(20)).await;

    let report = t
        .ledger
        .reports()
        .receivables(ReceivablesSort::Balance, SortOrder::Desc)
        .await
        .unwrap();

    assert_eq!(report.customers.len(), 2);
    assert_eq!(report.customers[0].customer.name, "Bob");
    assert_eq!(report.customers[0].open_debts, 1);
    assert_eq!(report.customers[1].customer.name, "Alice");
    assert_eq!(report.customers[1].customer.balance, dec!(50));
    assert_eq!(report.customers[1].open_debts, 1);

    assert_eq!(report.stats.total_customers, 2);
    assert_eq!(report.stats.total_receivable, dec!(125.25));
    assert_eq!(report.stats.average_receivable, dec!(62.63));
    assert_eq!(report.stats.highest_receivable, dec!(75.25));

    let by_code = t
        .ledger
        .reports()
        .receivables(ReceivablesSort::Code, SortOrder::Asc)
        .await
        .unwrap();
    let codes: Vec<_> = by_code
        .customers
        .iter()
        .map(|r| r.customer.code.as_str())
        .collect();
    assert_eq!(codes, vec!["C-001", "C-002"]);
}

#[tokio::test]
async fn duplicate_customer_code_is_rejected() {
    let t = spawn_ledger();
    t.ledger
        .create_customer(NewCustomer::new("C-100", "First"))
        .await
        .unwrap();
    let result = t
        .ledger
        .create_customer(NewCustomer::new("C-100", "Second"))
        .await;
    assert!(matches!(result, Err(LedgerError::Validation(_))));
}
