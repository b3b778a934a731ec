use super::{debit_checked, ensure_amount, ensure_funds, log_failure, publish};
use crate::cache::BalanceSnapshots;
use crate::errors::{EngineError, Result};
use crate::metrics;
use crate::models::{NewOperation, Notification, OperationType, TransferReceipt};
use crate::notifier::Notifier;
use crate::store::LedgerStore;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info};

pub struct AccountService {
    store: Arc<dyn LedgerStore>,
    snapshots: BalanceSnapshots,
    notifier: Arc<dyn Notifier>,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        snapshots: BalanceSnapshots,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        AccountService {
            store,
            snapshots,
            notifier,
        }
    }

    /// Open a zero-balance account
    pub async fn create_account(&self, user_id: i64) -> Result<()> {
        match self.store.create_account(user_id).await {
            Ok(()) => {
                info!("Created account for user {}", user_id);
                Ok(())
            }
            Err(e @ EngineError::AccountAlreadyExists(_)) => Err(e),
            Err(e) => {
                error!("Failed to create account for user {}: {}", user_id, e);
                Err(e)
            }
        }
    }

    /// Cache-first balance read
    pub async fn get_balance(&self, user_id: i64) -> Result<Decimal> {
        if let Some(balance) = self.snapshots.lookup(user_id).await {
            return Ok(balance);
        }

        let balance = self
            .store
            .balance(user_id)
            .await
            .map_err(|e| log_failure("get_balance", e))?
            .ok_or(EngineError::AccountNotFound(user_id))?;

        self.snapshots.refresh(user_id, balance).await;
        Ok(balance)
    }

    /// Credit an account, returning the new balance
    pub async fn deposit(&self, user_id: i64, amount: Decimal) -> Result<Decimal> {
        ensure_amount(amount)?;

        let balance = self
            .commit_deposit(user_id, amount)
            .await
            .map_err(|e| log_failure("deposit", e))?;

        self.snapshots.refresh(user_id, balance).await;
        metrics::record_operation(OperationType::Deposit.as_str());
        info!("Deposited {} to user {} (balance {})", amount, user_id, balance);

        publish(
            self.notifier.as_ref(),
            OperationType::Deposit,
            &Notification::balance(user_id, amount),
        )
        .await?;

        Ok(balance)
    }

    /// Debit an account, returning the new balance
    pub async fn withdraw(&self, user_id: i64, amount: Decimal) -> Result<Decimal> {
        ensure_amount(amount)?;

        let balance = self
            .commit_withdraw(user_id, amount)
            .await
            .map_err(|e| log_failure("withdraw", e))?;

        self.snapshots.refresh(user_id, balance).await;
        metrics::record_operation(OperationType::Withdraw.as_str());
        info!("Withdrew {} from user {} (balance {})", amount, user_id, balance);

        publish(
            self.notifier.as_ref(),
            OperationType::Withdraw,
            &Notification::balance(user_id, amount),
        )
        .await?;

        Ok(balance)
    }

    /// Move funds between two accounts in one transaction.
    ///
    /// Only the receiver is notified.
    pub async fn transfer(&self, from: i64, to: i64, amount: Decimal) -> Result<TransferReceipt> {
        ensure_amount(amount)?;

        let receipt = self
            .commit_transfer(from, to, amount)
            .await
            .map_err(|e| log_failure("transfer", e))?;

        self.snapshots.refresh(from, receipt.from_balance).await;
        self.snapshots.refresh(to, receipt.to_balance).await;
        metrics::record_operation(OperationType::OutgoingTransfer.as_str());
        metrics::record_operation(OperationType::IncomingTransfer.as_str());
        info!("Transferred {} from user {} to user {}", amount, from, to);

        publish(
            self.notifier.as_ref(),
            OperationType::IncomingTransfer,
            &Notification::balance(to, amount),
        )
        .await?;

        Ok(receipt)
    }

    async fn commit_deposit(&self, user_id: i64, amount: Decimal) -> Result<Decimal> {
        let mut tx = self.store.begin().await?;

        let balance = tx
            .credit(user_id, amount)
            .await?
            .ok_or(EngineError::AccountNotFound(user_id))?;
        tx.append_operation(&NewOperation::balance(user_id, amount, OperationType::Deposit))
            .await?;

        tx.commit().await?;
        Ok(balance)
    }

    async fn commit_withdraw(&self, user_id: i64, amount: Decimal) -> Result<Decimal> {
        let cached = self.snapshots.lookup(user_id).await;
        let mut tx = self.store.begin().await?;

        ensure_funds(tx.as_mut(), cached, user_id, amount).await?;
        let balance = debit_checked(tx.as_mut(), user_id, amount).await?;
        tx.append_operation(&NewOperation::balance(user_id, amount, OperationType::Withdraw))
            .await?;

        tx.commit().await?;
        Ok(balance)
    }

    async fn commit_transfer(&self, from: i64, to: i64, amount: Decimal) -> Result<TransferReceipt> {
        let mut tx = self.store.begin().await?;

        // Lock both rows in user order so opposite transfers cannot deadlock
        let (low, high) = if from <= to { (from, to) } else { (to, from) };
        let low_balance = tx.balance_for_update(low).await?;
        let high_balance = if high == low {
            low_balance
        } else {
            tx.balance_for_update(high).await?
        };
        let (sender, receiver) = if from <= to {
            (low_balance, high_balance)
        } else {
            (high_balance, low_balance)
        };

        sender.ok_or(EngineError::AccountNotFound(from))?;
        receiver.ok_or(EngineError::AccountNotFound(to))?;

        let from_balance = debit_checked(tx.as_mut(), from, amount).await?;
        let to_balance = tx
            .credit(to, amount)
            .await?
            .ok_or(EngineError::AccountNotFound(to))?;

        tx.append_operation(&NewOperation::balance(
            from,
            amount,
            OperationType::OutgoingTransfer,
        ))
        .await?;
        tx.append_operation(&NewOperation::balance(
            to,
            amount,
            OperationType::IncomingTransfer,
        ))
        .await?;

        tx.commit().await?;

        Ok(TransferReceipt {
            // a self-transfer nets out to the credited balance
            from_balance: if from == to { to_balance } else { from_balance },
            to_balance,
        })
    }
}
