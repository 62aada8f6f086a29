//! PostgreSQL ledger store.

use crate::config::{DatabaseConfig, LockingConfig};
use crate::error::LedgerError;
use crate::models::{
    format_transaction_code, Customer, NewCustomer, ReceivableCustomer, SettlementStatus,
    Transaction, TransactionDraft, TransactionItem, TransactionType,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{LedgerStore, LedgerUnit};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres};
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

const TRANSACTION_COLUMNS: &str = "transaction_id, code, transaction_type, customer_id, \
     transaction_date, seq, subtotal, vat_total, discount, total, paid_amount, status, notes, \
     source_transaction_id, created_utc";

const CUSTOMER_COLUMNS: &str = "customer_id, code, name, balance, created_utc, updated_utc";

#[derive(Debug, FromRow)]
struct TransactionRow {
    transaction_id: Uuid,
    code: String,
    transaction_type: String,
    customer_id: Option<Uuid>,
    transaction_date: NaiveDate,
    seq: i64,
    subtotal: Decimal,
    vat_total: Decimal,
    discount: Decimal,
    total: Decimal,
    paid_amount: Decimal,
    status: Option<String>,
    notes: Option<String>,
    source_transaction_id: Option<Uuid>,
    created_utc: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = LedgerError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let transaction_type = TransactionType::parse(&row.transaction_type).ok_or_else(|| {
            LedgerError::Store(anyhow::anyhow!(
                "Unknown transaction type '{}' on {}",
                row.transaction_type,
                row.transaction_id
            ))
        })?;
        let status = match row.status.as_deref() {
            None => None,
            Some(s) => Some(SettlementStatus::parse(s).ok_or_else(|| {
                LedgerError::Store(anyhow::anyhow!(
                    "Unknown settlement status '{}' on {}",
                    s,
                    row.transaction_id
                ))
            })?),
        };

        Ok(Transaction {
            transaction_id: row.transaction_id,
            code: row.code,
            transaction_type,
            customer_id: row.customer_id,
            date: row.transaction_date,
            seq: row.seq,
            subtotal: row.subtotal,
            vat_total: row.vat_total,
            discount: row.discount,
            total: row.total,
            paid_amount: row.paid_amount,
            status,
            notes: row.notes,
            source_transaction_id: row.source_transaction_id,
            created_utc: row.created_utc,
        })
    }
}

fn into_transactions(rows: Vec<TransactionRow>) -> Result<Vec<Transaction>, LedgerError> {
    rows.into_iter().map(Transaction::try_from).collect()
}

#[derive(Debug, FromRow)]
struct ReceivableRow {
    #[sqlx(flatten)]
    customer: Customer,
    open_debts: i64,
}

fn debt_type_names() -> Vec<&'static str> {
    TransactionType::DEBT_TYPES.iter().map(|t| t.as_str()).collect()
}

fn type_names(types: &[TransactionType]) -> Vec<&'static str> {
    types.iter().map(|t| t.as_str()).collect()
}

fn code_sequence_name(transaction_type: TransactionType) -> String {
    format!(
        "transaction_code_seq_{}",
        transaction_type.as_str().to_lowercase()
    )
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    locking: LockingConfig,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(config), fields(service = "receivables-ledger"))]
    pub async fn new(config: &DatabaseConfig, locking: LockingConfig) -> Result<Self, LedgerError> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .idle_timeout(Duration::from_secs(600))
            .connect(&config.url)
            .await
            .map_err(|e| LedgerError::Store(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool, locking })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), LedgerError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), LedgerError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::Store(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for Database {
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    async fn begin(&self, customer_id: Uuid) -> Result<Box<dyn LedgerUnit>, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["lock_customer"])
            .start_timer();

        let mut tx = self.pool.begin().await?;

        // Bound both the wait for the customer lock and every statement of
        // the unit; either expiring rolls the whole unit back.
        sqlx::query("SELECT set_config('lock_timeout', $1, true), set_config('statement_timeout', $2, true)")
            .bind(format!("{}ms", self.locking.lock_timeout_ms))
            .bind(format!("{}ms", self.locking.statement_timeout_ms))
            .execute(&mut *tx)
            .await?;

        let customer = sqlx::query_as::<_, Customer>(&format!(
            "SELECT {} FROM customers WHERE customer_id = $1 FOR UPDATE",
            CUSTOMER_COLUMNS
        ))
        .bind(customer_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| LedgerError::not_found(format!("customer {}", customer_id)))?;

        timer.observe_duration();
        debug!("Customer row locked");

        Ok(Box::new(PgUnit { tx, customer }))
    }

    #[instrument(skip(self, input), fields(code = %input.code))]
    async fn create_customer(&self, input: &NewCustomer) -> Result<Customer, LedgerError> {
        let customer = sqlx::query_as::<_, Customer>(&format!(
            "INSERT INTO customers (customer_id, code, name) VALUES ($1, $2, $3) RETURNING {}",
            CUSTOMER_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&input.code)
        .bind(&input.name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                LedgerError::validation(format!("customer code '{}' already exists", input.code))
            }
            other => other.into(),
        })?;

        info!(customer_id = %customer.customer_id, "Customer registered");
        Ok(customer)
    }

    #[instrument(skip(self))]
    async fn get_customer(&self, customer_id: Uuid) -> Result<Option<Customer>, LedgerError> {
        let customer = sqlx::query_as::<_, Customer>(&format!(
            "SELECT {} FROM customers WHERE customer_id = $1",
            CUSTOMER_COLUMNS
        ))
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(customer)
    }

    #[instrument(skip(self))]
    async fn get_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<Transaction>, LedgerError> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions WHERE transaction_id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Transaction::try_from)
        .transpose()
    }

    #[instrument(skip(self))]
    async fn get_transaction_items(
        &self,
        transaction_id: Uuid,
    ) -> Result<Vec<TransactionItem>, LedgerError> {
        let items = sqlx::query_as::<_, TransactionItemRow>(
            r#"
            SELECT item_id, transaction_id, product_id, description, quantity, unit_price, vat_rate, discount, total
            FROM transaction_items
            WHERE transaction_id = $1
            ORDER BY position
            "#,
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items.into_iter().map(TransactionItem::from).collect())
    }

    #[instrument(skip(self))]
    async fn list_customer_transactions(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_customer_transactions"])
            .start_timer();

        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions WHERE customer_id = $1 ORDER BY transaction_date, seq",
            TRANSACTION_COLUMNS
        ))
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        into_transactions(rows)
    }

    #[instrument(skip(self))]
    async fn customer_ids_after(
        &self,
        after: Option<Uuid>,
        limit: u32,
    ) -> Result<Vec<Uuid>, LedgerError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT customer_id
            FROM customers
            WHERE ($1::uuid IS NULL OR customer_id > $1)
            ORDER BY customer_id
            LIMIT $2
            "#,
        )
        .bind(after)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    #[instrument(skip(self))]
    async fn list_receivables(&self) -> Result<Vec<ReceivableCustomer>, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_receivables"])
            .start_timer();

        let rows = sqlx::query_as::<_, ReceivableRow>(
            r#"
            SELECT c.customer_id, c.code, c.name, c.balance, c.created_utc, c.updated_utc,
                   (
                       SELECT COUNT(*)
                       FROM transactions t
                       WHERE t.customer_id = c.customer_id
                         AND t.transaction_type = ANY($1)
                         AND t.status IN ('PENDING', 'PARTIAL')
                   ) AS open_debts
            FROM customers c
            WHERE c.balance > 0
            "#,
        )
        .bind(debt_type_names())
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();

        Ok(rows
            .into_iter()
            .map(|r| ReceivableCustomer {
                customer: r.customer,
                open_debts: r.open_debts,
            })
            .collect())
    }
}

#[derive(Debug, FromRow)]
struct TransactionItemRow {
    item_id: Uuid,
    transaction_id: Uuid,
    product_id: Option<Uuid>,
    description: Option<String>,
    quantity: Decimal,
    unit_price: Decimal,
    vat_rate: Decimal,
    discount: Decimal,
    total: Decimal,
}

impl From<TransactionItemRow> for TransactionItem {
    fn from(row: TransactionItemRow) -> Self {
        TransactionItem {
            item_id: row.item_id,
            transaction_id: row.transaction_id,
            product_id: row.product_id,
            description: row.description,
            quantity: row.quantity,
            unit_price: row.unit_price,
            vat_rate: row.vat_rate,
            discount: row.discount,
            total: row.total,
        }
    }
}

/// Unit of work over one Postgres transaction holding `FOR UPDATE` on the
/// customer row. Rolled back by sqlx when dropped uncommitted.
struct PgUnit {
    tx: sqlx::Transaction<'static, Postgres>,
    customer: Customer,
}

impl PgUnit {
    fn customer_id(&self) -> Uuid {
        self.customer.customer_id
    }
}

#[async_trait]
impl LedgerUnit for PgUnit {
    fn customer(&self) -> &Customer {
        &self.customer
    }

    async fn get_transaction(
        &mut self,
        transaction_id: Uuid,
    ) -> Result<Option<Transaction>, LedgerError> {
        let customer_id = self.customer_id();
        sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions WHERE transaction_id = $1 AND customer_id = $2",
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .bind(customer_id)
        .fetch_optional(&mut *self.tx)
        .await?
        .map(Transaction::try_from)
        .transpose()
    }

    async fn find_open_debts(&mut self) -> Result<Vec<Transaction>, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_open_debts"])
            .start_timer();

        let customer_id = self.customer_id();
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            SELECT {}
            FROM transactions
            WHERE customer_id = $1
              AND transaction_type = ANY($2)
              AND status IN ('PENDING', 'PARTIAL')
            ORDER BY transaction_date, seq
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(customer_id)
        .bind(debt_type_names())
        .fetch_all(&mut *self.tx)
        .await?;

        timer.observe_duration();
        into_transactions(rows)
    }

    async fn find_debts(&mut self) -> Result<Vec<Transaction>, LedgerError> {
        let customer_id = self.customer_id();
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            SELECT {}
            FROM transactions
            WHERE customer_id = $1 AND transaction_type = ANY($2)
            ORDER BY transaction_date, seq
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(customer_id)
        .bind(debt_type_names())
        .fetch_all(&mut *self.tx)
        .await?;
        into_transactions(rows)
    }

    async fn find_point_of_sale_payments(
        &mut self,
        debt_id: Uuid,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let customer_id = self.customer_id();
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            SELECT {}
            FROM transactions
            WHERE customer_id = $1 AND source_transaction_id = $2
            ORDER BY transaction_date, seq
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(customer_id)
        .bind(debt_id)
        .fetch_all(&mut *self.tx)
        .await?;
        into_transactions(rows)
    }

    async fn sum_totals(&mut self, types: &[TransactionType]) -> Result<Decimal, LedgerError> {
        let customer_id = self.customer_id();
        let sum: Option<Decimal> = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(total), 0)
            FROM transactions
            WHERE customer_id = $1 AND transaction_type = ANY($2)
            "#,
        )
        .bind(customer_id)
        .bind(type_names(types))
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(sum.unwrap_or(Decimal::ZERO))
    }

    async fn insert_transaction(
        &mut self,
        draft: &TransactionDraft,
        status: Option<SettlementStatus>,
    ) -> Result<Transaction, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_transaction"])
            .start_timer();

        let customer_id = self.customer_id();
        let code_seq: i64 = sqlx::query_scalar("SELECT nextval($1::regclass)")
            .bind(code_sequence_name(draft.transaction_type))
            .fetch_one(&mut *self.tx)
            .await?;

        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            INSERT INTO transactions (transaction_id, code, transaction_type, customer_id, transaction_date,
                                      subtotal, vat_total, discount, total, paid_amount, status, notes,
                                      source_transaction_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(format_transaction_code(draft.transaction_type, code_seq))
        .bind(draft.transaction_type.as_str())
        .bind(customer_id)
        .bind(draft.date)
        .bind(draft.subtotal)
        .bind(draft.vat_total)
        .bind(draft.discount)
        .bind(draft.total)
        .bind(draft.paid_amount)
        .bind(status.map(|s| s.as_str()))
        .bind(&draft.notes)
        .bind(draft.source_transaction_id)
        .fetch_one(&mut *self.tx)
        .await?;

        let tx = Transaction::try_from(row)?;

        for (position, item) in draft.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO transaction_items (item_id, transaction_id, position, product_id, description,
                                               quantity, unit_price, vat_rate, discount, total)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(tx.transaction_id)
            .bind(position as i32)
            .bind(item.product_id)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.vat_rate)
            .bind(item.discount)
            .bind(item.price().total)
            .execute(&mut *self.tx)
            .await?;
        }

        timer.observe_duration();
        Ok(tx)
    }

    async fn delete_transaction(&mut self, transaction_id: Uuid) -> Result<(), LedgerError> {
        let customer_id = self.customer_id();
        let result =
            sqlx::query("DELETE FROM transactions WHERE transaction_id = $1 AND customer_id = $2")
                .bind(transaction_id)
                .bind(customer_id)
                .execute(&mut *self.tx)
                .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::not_found(format!(
                "transaction {}",
                transaction_id
            )));
        }
        Ok(())
    }

    async fn update_settlement(
        &mut self,
        transaction_id: Uuid,
        paid_amount: Decimal,
        status: SettlementStatus,
    ) -> Result<(), LedgerError> {
        let customer_id = self.customer_id();
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET paid_amount = $3, status = $4
            WHERE transaction_id = $1 AND customer_id = $2
            "#,
        )
        .bind(transaction_id)
        .bind(customer_id)
        .bind(paid_amount)
        .bind(status.as_str())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::not_found(format!(
                "transaction {}",
                transaction_id
            )));
        }
        Ok(())
    }

    async fn set_balance(&mut self, balance: Decimal) -> Result<(), LedgerError> {
        let customer_id = self.customer_id();
        let updated_utc: DateTime<Utc> = sqlx::query_scalar(
            "UPDATE customers SET balance = $2, updated_utc = NOW() WHERE customer_id = $1 RETURNING updated_utc",
        )
        .bind(customer_id)
        .bind(balance)
        .fetch_one(&mut *self.tx)
        .await?;

        self.customer.balance = balance;
        self.customer.updated_utc = updated_utc;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx.commit().await?;
        Ok(())
    }
}
