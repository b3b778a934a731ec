use super::{LedgerStore, StoreTx};
use crate::errors::{EngineError, Result};
use crate::models::{
    check_storable, HistoryQuery, HistorySort, NewOperation, NewReservation, Operation,
    OperationType, ProductRevenue, Reservation,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
struct LedgerState {
    accounts: BTreeMap<i64, Decimal>,
    reservations: BTreeMap<i64, Reservation>,
    operations: Vec<Operation>,
    last_reservation_id: i64,
    last_operation_id: i64,
}

/// Store kept in process memory.
///
/// A transaction holds the whole state lock, so transactions are fully
/// serialised. Writes go to a staged copy that replaces the state on commit.
/// Amounts and balances are held to the same `NUMERIC(14, 2)` limits as the
/// Postgres schema.
#[derive(Debug, Clone)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<LedgerState>>,
    // successful operation appends left before an injected failure; negative disables
    append_budget: Arc<AtomicI64>,
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        InMemoryLedgerStore {
            state: Arc::new(Mutex::new(LedgerState::default())),
            append_budget: Arc::new(AtomicI64::new(-1)),
        }
    }
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `successful` operation appends through, then fail every later one
    pub fn fail_appends_after(&self, successful: i64) {
        self.append_budget.store(successful, Ordering::SeqCst);
    }

    pub fn clear_faults(&self) {
        self.append_budget.store(-1, Ordering::SeqCst);
    }

    /// All ledger rows for a user in insertion order
    pub async fn operations_for(&self, user_id: i64) -> Vec<Operation> {
        let state = self.state.lock().await;
        state
            .operations
            .iter()
            .filter(|op| op.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn operation_count(&self) -> usize {
        self.state.lock().await.operations.len()
    }

    pub async fn held_reservations(&self) -> Vec<Reservation> {
        self.state.lock().await.reservations.values().cloned().collect()
    }

    pub async fn balances(&self) -> BTreeMap<i64, Decimal> {
        self.state.lock().await.accounts.clone()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(InMemoryStoreTx {
            guard,
            staged,
            append_budget: self.append_budget.clone(),
        }))
    }

    async fn create_account(&self, user_id: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.accounts.contains_key(&user_id) {
            return Err(EngineError::AccountAlreadyExists(user_id));
        }
        state.accounts.insert(user_id, Decimal::ZERO);
        Ok(())
    }

    async fn balance(&self, user_id: i64) -> Result<Option<Decimal>> {
        Ok(self.state.lock().await.accounts.get(&user_id).copied())
    }

    async fn reservation(&self, reservation_id: i64) -> Result<Option<Reservation>> {
        Ok(self
            .state
            .lock()
            .await
            .reservations
            .get(&reservation_id)
            .cloned())
    }

    async fn history(&self, query: &HistoryQuery) -> Result<Vec<Operation>> {
        let state = self.state.lock().await;
        let mut rows: Vec<Operation> = state
            .operations
            .iter()
            .filter(|op| op.user_id == query.user_id)
            .cloned()
            .collect();

        match query.sort {
            HistorySort::CreatedAt => {
                rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)))
            }
            HistorySort::Amount => rows.sort_by(|a, b| (b.amount, b.id).cmp(&(a.amount, a.id))),
            HistorySort::Type => {
                rows.sort_by(|a, b| (b.kind.as_str(), b.id).cmp(&(a.kind.as_str(), a.id)))
            }
        }

        Ok(rows
            .into_iter()
            .skip(query.offset.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .collect())
    }

    async fn product_revenue(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ProductRevenue>> {
        let state = self.state.lock().await;
        let mut totals: BTreeMap<i64, Decimal> = BTreeMap::new();

        for op in &state.operations {
            if op.kind != OperationType::Revenue || op.created_at < from || op.created_at >= to {
                continue;
            }
            if let Some(product_id) = op.product_id {
                *totals.entry(product_id).or_insert(Decimal::ZERO) += op.amount;
            }
        }

        Ok(totals
            .into_iter()
            .map(|(product_id, amount)| ProductRevenue { product_id, amount })
            .collect())
    }
}

pub struct InMemoryStoreTx {
    guard: OwnedMutexGuard<LedgerState>,
    staged: LedgerState,
    append_budget: Arc<AtomicI64>,
}

impl InMemoryStoreTx {
    fn consume_append(&self) -> Result<()> {
        let budget = self.append_budget.load(Ordering::SeqCst);
        if budget < 0 {
            return Ok(());
        }
        if budget == 0 {
            return Err(EngineError::Internal(
                "injected operation insert failure".to_string(),
            ));
        }
        self.append_budget.store(budget - 1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl StoreTx for InMemoryStoreTx {
    async fn balance_for_update(&mut self, user_id: i64) -> Result<Option<Decimal>> {
        Ok(self.staged.accounts.get(&user_id).copied())
    }

    async fn credit(&mut self, user_id: i64, amount: Decimal) -> Result<Option<Decimal>> {
        check_storable(amount)?;
        let balance = match self.staged.accounts.get_mut(&user_id) {
            Some(balance) => balance,
            None => return Ok(None),
        };

        let credited = *balance + amount;
        check_storable(credited)?;
        *balance = credited;
        Ok(Some(credited))
    }

    async fn debit(&mut self, user_id: i64, amount: Decimal) -> Result<Option<Decimal>> {
        check_storable(amount)?;
        match self.staged.accounts.get_mut(&user_id) {
            Some(balance) if *balance >= amount => {
                *balance -= amount;
                Ok(Some(*balance))
            }
            _ => Ok(None),
        }
    }

    async fn insert_reservation(&mut self, reservation: &NewReservation) -> Result<Reservation> {
        check_storable(reservation.amount)?;
        if reservation.amount <= Decimal::ZERO {
            return Err(EngineError::Validation(format!(
                "reservation amount must be > 0, got {}",
                reservation.amount
            )));
        }
        if !self.staged.accounts.contains_key(&reservation.user_id) {
            return Err(EngineError::AccountNotFound(reservation.user_id));
        }

        self.staged.last_reservation_id += 1;
        let created = Reservation {
            id: self.staged.last_reservation_id,
            user_id: reservation.user_id,
            product_id: reservation.product_id,
            order_id: reservation.order_id,
            amount: reservation.amount,
            created_at: Utc::now(),
        };
        self.staged.reservations.insert(created.id, created.clone());
        Ok(created)
    }

    async fn take_reservation(&mut self, reservation_id: i64) -> Result<Option<Reservation>> {
        Ok(self.staged.reservations.remove(&reservation_id))
    }

    async fn append_operation(&mut self, operation: &NewOperation) -> Result<()> {
        self.consume_append()?;
        check_storable(operation.amount)?;

        if !self.staged.accounts.contains_key(&operation.user_id) {
            return Err(EngineError::AccountNotFound(operation.user_id));
        }

        self.staged.last_operation_id += 1;
        self.staged.operations.push(Operation {
            id: self.staged.last_operation_id,
            user_id: operation.user_id,
            product_id: operation.product_id,
            order_id: operation.order_id,
            amount: operation.amount,
            kind: operation.kind,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let InMemoryStoreTx {
            mut guard, staged, ..
        } = *self;
        *guard = staged;
        Ok(())
    }
}
