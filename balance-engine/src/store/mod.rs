//! Durable ledger storage
//!
//! Every multi-step mutation runs inside one [`StoreTx`]. A transaction that
//! is dropped without [`StoreTx::commit`] is rolled back, so an early return
//! through `?` or a cancelled request future never leaves a partial write.

pub mod memory;
pub mod postgres;

use crate::errors::Result;
use crate::models::{HistoryQuery, NewOperation, NewReservation, Operation, ProductRevenue, Reservation};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

pub use self::memory::InMemoryLedgerStore;
pub use self::postgres::PgLedgerStore;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a transaction
    async fn begin(&self) -> Result<Box<dyn StoreTx>>;

    /// Insert a zero-balance account; `AccountAlreadyExists` on duplicates
    async fn create_account(&self, user_id: i64) -> Result<()>;

    async fn balance(&self, user_id: i64) -> Result<Option<Decimal>>;

    async fn reservation(&self, reservation_id: i64) -> Result<Option<Reservation>>;

    async fn history(&self, query: &HistoryQuery) -> Result<Vec<Operation>>;

    /// Revenue summed per product for operations in `[from, to)`, ordered by product
    async fn product_revenue(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ProductRevenue>>;
}

/// One open store transaction
#[async_trait]
pub trait StoreTx: Send {
    /// Current balance, locking the account row until the transaction ends
    async fn balance_for_update(&mut self, user_id: i64) -> Result<Option<Decimal>>;

    /// Add to a balance; `None` when the account does not exist
    async fn credit(&mut self, user_id: i64, amount: Decimal) -> Result<Option<Decimal>>;

    /// Subtract from a balance only if it covers `amount`.
    ///
    /// `None` when the account is missing or short of funds.
    async fn debit(&mut self, user_id: i64, amount: Decimal) -> Result<Option<Decimal>>;

    async fn insert_reservation(&mut self, reservation: &NewReservation) -> Result<Reservation>;

    /// Delete a held reservation, returning it
    async fn take_reservation(&mut self, reservation_id: i64) -> Result<Option<Reservation>>;

    async fn append_operation(&mut self, operation: &NewOperation) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}
