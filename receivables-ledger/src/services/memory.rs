//! In-process ledger store.
//!
//! Serializes work per customer with an async mutex per customer id and
//! stages every write inside the unit until `commit`. Used by tests and by
//! embedders that keep the ledger in memory. A customer's mutex only lives
//! in the lock table while some unit holds or awaits it.

use crate::error::LedgerError;
use crate::models::{
    format_transaction_code, Customer, NewCustomer, ReceivableCustomer, SettlementStatus,
    Transaction, TransactionDraft, TransactionItem, TransactionType,
};
use crate::services::store::{LedgerStore, LedgerUnit};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, instrument};
use uuid::Uuid;

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct MemoryState {
    customers: HashMap<Uuid, Customer>,
    transactions: HashMap<Uuid, Transaction>,
    items: HashMap<Uuid, Vec<TransactionItem>>,
    next_seq: i64,
    code_sequences: HashMap<TransactionType, i64>,
}

impl MemoryState {
    fn customer_transactions(&self, customer_id: Uuid) -> Vec<Transaction> {
        let mut txs: Vec<Transaction> = self
            .transactions
            .values()
            .filter(|t| t.customer_id == Some(customer_id))
            .cloned()
            .collect();
        txs.sort_by_key(Transaction::fifo_key);
        txs
    }
}

/// Ledger store held entirely in memory.
#[derive(Clone)]
pub struct MemoryLedgerStore {
    state: Arc<Mutex<MemoryState>>,
    locks: Arc<LockTable>,
    lock_timeout: Duration,
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            locks: Arc::new(DashMap::new()),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// How long `begin` waits for a customer held by another unit.
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, LedgerError> {
        lock_state(&self.state)
    }

    /// Raw balance write that bypasses the engine, like a manual data edit.
    pub fn force_balance(&self, customer_id: Uuid, balance: Decimal) -> Result<(), LedgerError> {
        let mut state = self.state()?;
        let customer = state
            .customers
            .get_mut(&customer_id)
            .ok_or_else(|| LedgerError::not_found(format!("customer {}", customer_id)))?;
        customer.balance = balance;
        Ok(())
    }

    /// Raw settlement write that bypasses the engine, like a manual data edit.
    pub fn force_settlement(
        &self,
        transaction_id: Uuid,
        paid_amount: Decimal,
        status: Option<SettlementStatus>,
    ) -> Result<(), LedgerError> {
        let mut state = self.state()?;
        let tx = state
            .transactions
            .get_mut(&transaction_id)
            .ok_or_else(|| LedgerError::not_found(format!("transaction {}", transaction_id)))?;
        tx.paid_amount = paid_amount;
        tx.status = status;
        Ok(())
    }
}

type LockTable = DashMap<Uuid, Arc<AsyncMutex<()>>>;

/// Held customer lock; prunes its table entry on release when no other
/// unit is waiting for it.
struct CustomerLock {
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockTable>,
    customer_id: Uuid,
}

impl Drop for CustomerLock {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters clone the Arc under the shard lock, so a count of one
        // means only the table still refers to this mutex.
        self.locks
            .remove_if(&self.customer_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

fn lock_state(state: &Mutex<MemoryState>) -> Result<MutexGuard<'_, MemoryState>, LedgerError> {
    state
        .lock()
        .map_err(|_| LedgerError::Store(anyhow::anyhow!("memory store mutex poisoned")))
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    async fn begin(&self, customer_id: Uuid) -> Result<Box<dyn LedgerUnit>, LedgerError> {
        if !self.state()?.customers.contains_key(&customer_id) {
            return Err(LedgerError::not_found(format!("customer {}", customer_id)));
        }

        let lock = self
            .locks
            .entry(customer_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();

        let guard = tokio::time::timeout(self.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| {
                LedgerError::ConcurrencyConflict(format!(
                    "customer {} is locked by another operation",
                    customer_id
                ))
            })?;
        let guard = CustomerLock {
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
            customer_id,
        };

        // Snapshot after acquiring the lock so no other unit can race us.
        let (customer, transactions) = {
            let state = self.state()?;
            let customer = state
                .customers
                .get(&customer_id)
                .cloned()
                .ok_or_else(|| LedgerError::not_found(format!("customer {}", customer_id)))?;
            let transactions = state
                .customer_transactions(customer_id)
                .into_iter()
                .map(|t| (t.transaction_id, t))
                .collect();
            (customer, transactions)
        };

        debug!("Customer lock acquired");

        Ok(Box::new(MemoryUnit {
            _guard: guard,
            state: Arc::clone(&self.state),
            customer,
            transactions,
            new_items: HashMap::new(),
            deleted: HashSet::new(),
        }))
    }

    async fn create_customer(&self, input: &NewCustomer) -> Result<Customer, LedgerError> {
        let mut state = self.state()?;
        if state.customers.values().any(|c| c.code == input.code) {
            return Err(LedgerError::validation(format!(
                "customer code '{}' already exists",
                input.code
            )));
        }

        let now = Utc::now();
        let customer = Customer {
            customer_id: Uuid::new_v4(),
            code: input.code.clone(),
            name: input.name.clone(),
            balance: Decimal::ZERO,
            created_utc: now,
            updated_utc: now,
        };
        state.customers.insert(customer.customer_id, customer.clone());
        Ok(customer)
    }

    async fn get_customer(&self, customer_id: Uuid) -> Result<Option<Customer>, LedgerError> {
        Ok(self.state()?.customers.get(&customer_id).cloned())
    }

    async fn get_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<Transaction>, LedgerError> {
        Ok(self.state()?.transactions.get(&transaction_id).cloned())
    }

    async fn get_transaction_items(
        &self,
        transaction_id: Uuid,
    ) -> Result<Vec<TransactionItem>, LedgerError> {
        Ok(self
            .state()?
            .items
            .get(&transaction_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_customer_transactions(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<Transaction>, LedgerError> {
        Ok(self.state()?.customer_transactions(customer_id))
    }

    async fn customer_ids_after(
        &self,
        after: Option<Uuid>,
        limit: u32,
    ) -> Result<Vec<Uuid>, LedgerError> {
        let state = self.state()?;
        let mut ids: Vec<Uuid> = state
            .customers
            .keys()
            .copied()
            .filter(|id| after.map_or(true, |cursor| *id > cursor))
            .collect();
        ids.sort();
        ids.truncate(limit as usize);
        Ok(ids)
    }

    async fn list_receivables(&self) -> Result<Vec<ReceivableCustomer>, LedgerError> {
        let state = self.state()?;
        let mut open_debts: HashMap<Uuid, i64> = HashMap::new();
        for tx in state.transactions.values().filter(|t| t.is_open_debt()) {
            if let Some(customer_id) = tx.customer_id {
                *open_debts.entry(customer_id).or_default() += 1;
            }
        }

        Ok(state
            .customers
            .values()
            .filter(|c| c.balance > Decimal::ZERO)
            .map(|c| ReceivableCustomer {
                customer: c.clone(),
                open_debts: open_debts.get(&c.customer_id).copied().unwrap_or(0),
            })
            .collect())
    }
}

struct MemoryUnit {
    _guard: CustomerLock,
    state: Arc<Mutex<MemoryState>>,
    customer: Customer,
    transactions: HashMap<Uuid, Transaction>,
    new_items: HashMap<Uuid, Vec<TransactionItem>>,
    deleted: HashSet<Uuid>,
}

impl MemoryUnit {
    fn sorted(&self, filter: impl Fn(&Transaction) -> bool) -> Vec<Transaction> {
        let mut txs: Vec<Transaction> = self
            .transactions
            .values()
            .filter(|t| filter(t))
            .cloned()
            .collect();
        txs.sort_by_key(Transaction::fifo_key);
        txs
    }

    fn existing_mut(&mut self, transaction_id: Uuid) -> Result<&mut Transaction, LedgerError> {
        self.transactions
            .get_mut(&transaction_id)
            .ok_or_else(|| LedgerError::not_found(format!("transaction {}", transaction_id)))
    }
}

#[async_trait]
impl LedgerUnit for MemoryUnit {
    fn customer(&self) -> &Customer {
        &self.customer
    }

    async fn get_transaction(
        &mut self,
        transaction_id: Uuid,
    ) -> Result<Option<Transaction>, LedgerError> {
        Ok(self.transactions.get(&transaction_id).cloned())
    }

    async fn find_open_debts(&mut self) -> Result<Vec<Transaction>, LedgerError> {
        Ok(self.sorted(Transaction::is_open_debt))
    }

    async fn find_debts(&mut self) -> Result<Vec<Transaction>, LedgerError> {
        Ok(self.sorted(Transaction::is_debt))
    }

    async fn find_point_of_sale_payments(
        &mut self,
        debt_id: Uuid,
    ) -> Result<Vec<Transaction>, LedgerError> {
        Ok(self.sorted(|t| t.source_transaction_id == Some(debt_id)))
    }

    async fn sum_totals(&mut self, types: &[TransactionType]) -> Result<Decimal, LedgerError> {
        Ok(self
            .transactions
            .values()
            .filter(|t| types.contains(&t.transaction_type))
            .map(|t| t.total)
            .sum())
    }

    async fn insert_transaction(
        &mut self,
        draft: &TransactionDraft,
        status: Option<SettlementStatus>,
    ) -> Result<Transaction, LedgerError> {
        let (seq, code_seq) = {
            let mut state = lock_state(&self.state)?;
            state.next_seq += 1;
            let next_seq = state.next_seq;
            let code_seq = state
                .code_sequences
                .entry(draft.transaction_type)
                .or_insert(0);
            *code_seq += 1;
            (next_seq, *code_seq)
        };

        let tx = Transaction {
            transaction_id: Uuid::new_v4(),
            code: format_transaction_code(draft.transaction_type, code_seq),
            transaction_type: draft.transaction_type,
            customer_id: Some(self.customer.customer_id),
            date: draft.date,
            seq,
            subtotal: draft.subtotal,
            vat_total: draft.vat_total,
            discount: draft.discount,
            total: draft.total,
            paid_amount: draft.paid_amount,
            status,
            notes: draft.notes.clone(),
            source_transaction_id: draft.source_transaction_id,
            created_utc: Utc::now(),
        };

        let items = draft
            .items
            .iter()
            .map(|item| TransactionItem {
                item_id: Uuid::new_v4(),
                transaction_id: tx.transaction_id,
                product_id: item.product_id,
                description: item.description.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                vat_rate: item.vat_rate,
                discount: item.discount,
                total: item.price().total,
            })
            .collect();

        self.new_items.insert(tx.transaction_id, items);
        self.transactions.insert(tx.transaction_id, tx.clone());
        Ok(tx)
    }

    async fn delete_transaction(&mut self, transaction_id: Uuid) -> Result<(), LedgerError> {
        self.transactions
            .remove(&transaction_id)
            .ok_or_else(|| LedgerError::not_found(format!("transaction {}", transaction_id)))?;
        self.new_items.remove(&transaction_id);
        self.deleted.insert(transaction_id);
        Ok(())
    }

    async fn update_settlement(
        &mut self,
        transaction_id: Uuid,
        paid_amount: Decimal,
        status: SettlementStatus,
    ) -> Result<(), LedgerError> {
        let tx = self.existing_mut(transaction_id)?;
        tx.paid_amount = paid_amount;
        tx.status = Some(status);
        Ok(())
    }

    async fn set_balance(&mut self, balance: Decimal) -> Result<(), LedgerError> {
        self.customer.balance = balance;
        self.customer.updated_utc = Utc::now();
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        let unit = *self;
        let mut state = lock_state(&unit.state)?;

        for id in &unit.deleted {
            state.transactions.remove(id);
            state.items.remove(id);
        }
        state.items.extend(unit.new_items);
        state.transactions.extend(unit.transactions);
        state
            .customers
            .insert(unit.customer.customer_id, unit.customer);

        // `unit._guard` drops after this, releasing the customer lock.
        Ok(())
    }
}
