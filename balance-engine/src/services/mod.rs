//! Ledger & reservation engine
//!
//! Each mutating call runs one store transaction, then refreshes the balance
//! cache and publishes a notification once that transaction has committed.
//! The cache may let a debit skip its explicit balance read, but the debit
//! itself is always conditional on the stored balance.

pub mod account;
pub mod operation;
pub mod reservation;

use crate::cache::{BalanceCache, BalanceSnapshots};
use crate::errors::{EngineError, ErrorKind, Result};
use crate::metrics;
use crate::models::{check_storable, Notification, OperationType};
use crate::notifier::Notifier;
use crate::store::{LedgerStore, StoreTx};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

pub use self::account::AccountService;
pub use self::operation::OperationService;
pub use self::reservation::ReservationService;

/// Lifetime of a cached balance snapshot (3 days)
pub const DEFAULT_BALANCE_TTL: Duration = Duration::from_secs(72 * 60 * 60);

/// Largest history page returned when the caller asks for more or for none
pub const DEFAULT_HISTORY_LIMIT: i64 = 20;

/// Collaborators handed to the engine at construction
pub struct ServicesDependencies {
    pub store: Arc<dyn LedgerStore>,
    pub cache: Arc<dyn BalanceCache>,
    pub notifier: Arc<dyn Notifier>,
    pub balance_ttl: Duration,
    pub history_page_limit: i64,
}

pub struct Services {
    pub account: AccountService,
    pub reservation: ReservationService,
    pub operation: OperationService,
}

impl Services {
    pub fn new(deps: ServicesDependencies) -> Self {
        let snapshots = BalanceSnapshots::new(deps.cache, deps.balance_ttl);

        Services {
            account: AccountService::new(
                deps.store.clone(),
                snapshots.clone(),
                deps.notifier.clone(),
            ),
            reservation: ReservationService::new(
                deps.store.clone(),
                snapshots,
                deps.notifier,
            ),
            operation: OperationService::new(deps.store, deps.history_page_limit),
        }
    }
}

/// Amounts must be positive and fit the money columns
pub(crate) fn ensure_amount(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(EngineError::Validation(format!(
            "amount must be > 0, got {}",
            amount
        )));
    }
    check_storable(amount)
}

fn insufficient(required: Decimal, available: Decimal) -> EngineError {
    metrics::record_rejection("insufficient_balance");
    EngineError::InsufficientBalance {
        required,
        available,
    }
}

/// Pre-debit funds check.
///
/// A cached balance that covers the amount skips the explicit read. A short
/// or missing snapshot is never trusted for rejection: the locked stored
/// balance decides.
pub(crate) async fn ensure_funds(
    tx: &mut dyn StoreTx,
    cached: Option<Decimal>,
    user_id: i64,
    amount: Decimal,
) -> Result<()> {
    match cached {
        Some(balance) if balance >= amount => return Ok(()),
        Some(balance) => debug!(
            "Cached balance {} for user {} is below {}, re-reading",
            balance, user_id, amount
        ),
        None => {}
    }

    let available = tx
        .balance_for_update(user_id)
        .await?
        .ok_or(EngineError::AccountNotFound(user_id))?;

    if available < amount {
        return Err(insufficient(amount, available));
    }
    Ok(())
}

/// Debit that fails with `InsufficientBalance` or `AccountNotFound` instead of
/// ever taking a balance below zero
pub(crate) async fn debit_checked(
    tx: &mut dyn StoreTx,
    user_id: i64,
    amount: Decimal,
) -> Result<Decimal> {
    if let Some(balance) = tx.debit(user_id, amount).await? {
        return Ok(balance);
    }

    match tx.balance_for_update(user_id).await? {
        Some(available) => Err(insufficient(amount, available)),
        None => Err(EngineError::AccountNotFound(user_id)),
    }
}

/// Logs transient failures; domain errors pass through silently
pub(crate) fn log_failure(context: &str, err: EngineError) -> EngineError {
    if err.kind() == ErrorKind::TransientFailure {
        error!("{} failed: {}", context, err);
    }
    err
}

/// Post-commit notification; the ledger change stands even if this fails
pub(crate) async fn publish(
    notifier: &dyn Notifier,
    kind: OperationType,
    message: &Notification,
) -> Result<()> {
    notifier.publish(kind, message).await.map_err(|e| {
        error!(
            "Committed {} for user {} but notification failed: {}",
            kind, message.user_id, e
        );
        e
    })
}
