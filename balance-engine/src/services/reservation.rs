use super::{debit_checked, ensure_amount, ensure_funds, log_failure, publish};
use crate::cache::BalanceSnapshots;
use crate::errors::{EngineError, Result};
use crate::metrics;
use crate::models::{NewOperation, NewReservation, Notification, OperationType, Reservation};
use crate::notifier::Notifier;
use crate::store::LedgerStore;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

/// Hold/confirm/release lifecycle for funds reserved against an order.
///
/// A hold debits the account immediately. Cancelling credits it back;
/// confirming (revenue) consumes the held funds and leaves the balance alone.
pub struct ReservationService {
    store: Arc<dyn LedgerStore>,
    snapshots: BalanceSnapshots,
    notifier: Arc<dyn Notifier>,
}

impl ReservationService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        snapshots: BalanceSnapshots,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        ReservationService {
            store,
            snapshots,
            notifier,
        }
    }

    /// Hold `amount` of the user's funds, returning the reservation id
    pub async fn create_reservation(
        &self,
        user_id: i64,
        product_id: i64,
        order_id: i64,
        amount: Decimal,
    ) -> Result<i64> {
        ensure_amount(amount)?;

        let hold = NewReservation {
            user_id,
            product_id,
            order_id,
            amount,
        };
        let (reservation, balance) = self
            .commit_hold(&hold)
            .await
            .map_err(|e| log_failure("create_reservation", e))?;

        self.snapshots.refresh(user_id, balance).await;
        metrics::record_operation(OperationType::Reservation.as_str());
        info!(
            "Reserved {} for user {} (reservation {}, product {}, order {})",
            amount, user_id, reservation.id, product_id, order_id
        );

        publish(
            self.notifier.as_ref(),
            OperationType::Reservation,
            &Notification::reservation(&reservation),
        )
        .await?;

        Ok(reservation.id)
    }

    /// Release a hold back to the account
    pub async fn cancel_reservation(&self, reservation_id: i64) -> Result<Reservation> {
        let (reservation, balance) = self
            .commit_release(reservation_id)
            .await
            .map_err(|e| log_failure("cancel_reservation", e))?;

        self.snapshots.refresh(reservation.user_id, balance).await;
        metrics::record_operation(OperationType::DeReservation.as_str());
        info!(
            "Cancelled reservation {} returning {} to user {}",
            reservation.id, reservation.amount, reservation.user_id
        );

        publish(
            self.notifier.as_ref(),
            OperationType::DeReservation,
            &Notification::reservation(&reservation),
        )
        .await?;

        Ok(reservation)
    }

    /// Confirm a hold as revenue. The balance is not touched.
    pub async fn revenue_reservation(&self, reservation_id: i64) -> Result<Reservation> {
        let reservation = self
            .commit_revenue(reservation_id)
            .await
            .map_err(|e| log_failure("revenue_reservation", e))?;

        metrics::record_operation(OperationType::Revenue.as_str());
        info!(
            "Confirmed reservation {} as revenue of {} for product {}",
            reservation.id, reservation.amount, reservation.product_id
        );

        publish(
            self.notifier.as_ref(),
            OperationType::Revenue,
            &Notification::reservation(&reservation),
        )
        .await?;

        Ok(reservation)
    }

    /// A held reservation; NotFound once it has been cancelled or confirmed
    pub async fn get_reservation(&self, reservation_id: i64) -> Result<Reservation> {
        self.store
            .reservation(reservation_id)
            .await
            .map_err(|e| log_failure("get_reservation", e))?
            .ok_or(EngineError::ReservationNotFound(reservation_id))
    }

    async fn commit_hold(&self, hold: &NewReservation) -> Result<(Reservation, Decimal)> {
        let cached = self.snapshots.lookup(hold.user_id).await;
        let mut tx = self.store.begin().await?;

        ensure_funds(tx.as_mut(), cached, hold.user_id, hold.amount).await?;
        let balance = debit_checked(tx.as_mut(), hold.user_id, hold.amount).await?;
        let reservation = tx.insert_reservation(hold).await?;
        tx.append_operation(&NewOperation::reservation(
            hold.user_id,
            hold.product_id,
            hold.order_id,
            hold.amount,
            OperationType::Reservation,
        ))
        .await?;

        tx.commit().await?;
        Ok((reservation, balance))
    }

    async fn commit_release(&self, reservation_id: i64) -> Result<(Reservation, Decimal)> {
        let mut tx = self.store.begin().await?;

        let reservation = tx
            .take_reservation(reservation_id)
            .await?
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        let balance = tx
            .credit(reservation.user_id, reservation.amount)
            .await?
            .ok_or(EngineError::AccountNotFound(reservation.user_id))?;
        tx.append_operation(&NewOperation::reservation(
            reservation.user_id,
            reservation.product_id,
            reservation.order_id,
            reservation.amount,
            OperationType::DeReservation,
        ))
        .await?;

        tx.commit().await?;
        Ok((reservation, balance))
    }

    async fn commit_revenue(&self, reservation_id: i64) -> Result<Reservation> {
        let mut tx = self.store.begin().await?;

        let reservation = tx
            .take_reservation(reservation_id)
            .await?
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        tx.append_operation(&NewOperation::reservation(
            reservation.user_id,
            reservation.product_id,
            reservation.order_id,
            reservation.amount,
            OperationType::Revenue,
        ))
        .await?;

        tx.commit().await?;
        Ok(reservation)
    }
}
