use super::{LedgerStore, StoreTx};
use crate::errors::{EngineError, Result};
use crate::models::{
    HistoryQuery, NewOperation, NewReservation, Operation, OperationType, ProductRevenue,
    Reservation,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, Transaction};
use std::time::Duration;
use tracing::{error, info};

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const CHECK_VIOLATION: &str = "23514";
const NUMERIC_VALUE_OUT_OF_RANGE: &str = "22003";

const RESERVATION_COLUMNS: &str = "id, user_id, product_id, order_id, amount, created_at";

/// Maps constraint violations onto domain errors for the given user
fn classify(err: sqlx::Error, user_id: i64) -> EngineError {
    if let sqlx::Error::Database(db_err) = &err {
        match db_err.code().as_deref() {
            Some(UNIQUE_VIOLATION) => return EngineError::AccountAlreadyExists(user_id),
            Some(FOREIGN_KEY_VIOLATION) => return EngineError::AccountNotFound(user_id),
            Some(CHECK_VIOLATION) | Some(NUMERIC_VALUE_OUT_OF_RANGE) => {
                return EngineError::Validation(format!(
                    "amount rejected by the ledger schema: {}",
                    db_err.message()
                ))
            }
            _ => {}
        }
    }
    EngineError::Database(err)
}

#[derive(Debug, FromRow)]
struct OperationRow {
    id: i64,
    user_id: i64,
    product_id: Option<i64>,
    order_id: Option<i64>,
    amount: Decimal,
    kind: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<OperationRow> for Operation {
    type Error = EngineError;

    fn try_from(row: OperationRow) -> Result<Self> {
        Ok(Operation {
            id: row.id,
            user_id: row.user_id,
            product_id: row.product_id,
            order_id: row.order_id,
            amount: row.amount,
            kind: row.kind.parse::<OperationType>()?,
            created_at: row.created_at,
        })
    }
}

pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        Ok(PgLedgerStore { pool })
    }

    /// Apply pending schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| EngineError::Database(e.into()))?;

        info!("Database migrations applied");
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to open transaction: {}", e);
            EngineError::Database(e)
        })?;
        Ok(Box::new(PgStoreTx { tx }))
    }

    async fn create_account(&self, user_id: i64) -> Result<()> {
        sqlx::query("INSERT INTO account (user_id) VALUES ($1)")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| classify(e, user_id))?;

        Ok(())
    }

    async fn balance(&self, user_id: i64) -> Result<Option<Decimal>> {
        let balance = sqlx::query_scalar::<_, Decimal>(
            "SELECT balance FROM account WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(balance)
    }

    async fn reservation(&self, reservation_id: i64) -> Result<Option<Reservation>> {
        let sql = format!("SELECT {} FROM reservation WHERE id = $1", RESERVATION_COLUMNS);
        let reservation = sqlx::query_as::<_, Reservation>(&sql)
            .bind(reservation_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(reservation)
    }

    async fn history(&self, query: &HistoryQuery) -> Result<Vec<Operation>> {
        // ORDER BY comes from a closed set of literals, never from input
        let sql = format!(
            r#"
            SELECT id, user_id, product_id, order_id, amount, type AS kind, created_at
            FROM operation
            WHERE user_id = $1
            ORDER BY {}
            OFFSET $2
            LIMIT $3
            "#,
            query.sort.order_by()
        );

        let rows = sqlx::query_as::<_, OperationRow>(&sql)
            .bind(query.user_id)
            .bind(query.offset)
            .bind(query.limit)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Operation::try_from).collect()
    }

    async fn product_revenue(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ProductRevenue>> {
        let rows = sqlx::query_as::<_, (i64, Decimal)>(
            r#"
            SELECT product_id, SUM(amount)
            FROM operation
            WHERE type = $1
              AND product_id IS NOT NULL
              AND created_at >= $2
              AND created_at < $3
            GROUP BY product_id
            ORDER BY product_id
            "#,
        )
        .bind(OperationType::Revenue.as_str())
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(product_id, amount)| ProductRevenue { product_id, amount })
            .collect())
    }
}

pub struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn balance_for_update(&mut self, user_id: i64) -> Result<Option<Decimal>> {
        let balance = sqlx::query_scalar::<_, Decimal>(
            "SELECT balance FROM account WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(balance)
    }

    async fn credit(&mut self, user_id: i64, amount: Decimal) -> Result<Option<Decimal>> {
        let balance = sqlx::query_scalar::<_, Decimal>(
            r#"
            UPDATE account
            SET balance = balance + $1
            WHERE user_id = $2
            RETURNING balance
            "#,
        )
        .bind(amount)
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| classify(e, user_id))?;

        Ok(balance)
    }

    async fn debit(&mut self, user_id: i64, amount: Decimal) -> Result<Option<Decimal>> {
        let balance = sqlx::query_scalar::<_, Decimal>(
            r#"
            UPDATE account
            SET balance = balance - $1
            WHERE user_id = $2 AND balance >= $1
            RETURNING balance
            "#,
        )
        .bind(amount)
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| classify(e, user_id))?;

        Ok(balance)
    }

    async fn insert_reservation(&mut self, reservation: &NewReservation) -> Result<Reservation> {
        let sql = format!(
            r#"
            INSERT INTO reservation (user_id, product_id, order_id, amount)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            RESERVATION_COLUMNS
        );

        let created = sqlx::query_as::<_, Reservation>(&sql)
            .bind(reservation.user_id)
            .bind(reservation.product_id)
            .bind(reservation.order_id)
            .bind(reservation.amount)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| classify(e, reservation.user_id))?;

        Ok(created)
    }

    async fn take_reservation(&mut self, reservation_id: i64) -> Result<Option<Reservation>> {
        let sql = format!(
            "DELETE FROM reservation WHERE id = $1 RETURNING {}",
            RESERVATION_COLUMNS
        );

        let reservation = sqlx::query_as::<_, Reservation>(&sql)
            .bind(reservation_id)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(reservation)
    }

    async fn append_operation(&mut self, operation: &NewOperation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO operation (user_id, product_id, order_id, amount, type)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(operation.user_id)
        .bind(operation.product_id)
        .bind(operation.order_id)
        .bind(operation.amount)
        .bind(operation.kind.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| classify(e, operation.user_id))?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
