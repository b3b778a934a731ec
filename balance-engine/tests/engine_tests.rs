//! Integration tests for the ledger & reservation engine
//!
//! Runs the full service stack against the in-memory store, cache and
//! notifier.

mod common;

use balance_engine::cache::{balance_key, BalanceCache};
use balance_engine::models::{HistorySort, Notification, OperationType};
use balance_engine::store::LedgerStore;
use balance_engine::EngineError;
use chrono::Datelike;
use common::TestEnvironment;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;

fn kinds(ops: &[balance_engine::models::Operation]) -> Vec<OperationType> {
    ops.iter().map(|op| op.kind).collect()
}

/// Year and month of the user's latest revenue row
async fn revenue_month(env: &TestEnvironment, user_id: i64) -> (i32, u32) {
    let ops = env.store.operations_for(user_id).await;
    let revenue = ops
        .iter()
        .rev()
        .find(|op| op.kind == OperationType::Revenue)
        .expect("a revenue row was written");
    (revenue.created_at.year(), revenue.created_at.month())
}

#[tokio::test]
async fn test_account_and_reservation_walkthrough() {
    let env = TestEnvironment::new();
    let account = &env.services.account;
    let reservation = &env.services.reservation;

    // 1. open and fund
    account.create_account(7).await.unwrap();
    assert_eq!(account.get_balance(7).await.unwrap(), dec!(0));
    assert_eq!(account.deposit(7, dec!(100)).await.unwrap(), dec!(100));
    let ops = env.store.operations_for(7).await;
    assert_eq!(kinds(&ops), vec![OperationType::Deposit]);
    assert_eq!(ops[0].amount, dec!(100));

    // 2. overdraw
    let err = account.withdraw(7, dec!(150)).await.unwrap_err();
    assert!(matches!(err, EngineError::InsufficientBalance { .. }));
    assert_eq!(account.get_balance(7).await.unwrap(), dec!(100));

    // 3. hold
    let id = reservation
        .create_reservation(7, 3, 9, dec!(40))
        .await
        .unwrap();
    assert_eq!(account.get_balance(7).await.unwrap(), dec!(60));
    let ops = env.store.operations_for(7).await;
    assert_eq!(ops.last().map(|op| op.kind), Some(OperationType::Reservation));
    assert_eq!(ops.last().map(|op| op.amount), Some(dec!(40)));

    // 4. release
    reservation.cancel_reservation(id).await.unwrap();
    assert_eq!(account.get_balance(7).await.unwrap(), dec!(100));
    assert!(matches!(
        reservation.get_reservation(id).await,
        Err(EngineError::ReservationNotFound(_))
    ));
    let ops = env.store.operations_for(7).await;
    assert_eq!(ops.last().map(|op| op.kind), Some(OperationType::DeReservation));

    // 5. hold again and confirm
    let id = reservation
        .create_reservation(7, 3, 9, dec!(40))
        .await
        .unwrap();
    reservation.revenue_reservation(id).await.unwrap();
    assert_eq!(account.get_balance(7).await.unwrap(), dec!(60));

    let (year, month) = revenue_month(&env, 7).await;
    let report = env
        .services
        .operation
        .create_report(year, month)
        .await
        .unwrap();
    assert_eq!(report.lines.len(), 1);
    assert_eq!(report.lines[0].product_id, 3);
    assert_eq!(report.lines[0].amount, dec!(40));

    // 6. transfer to nobody
    let before = env.store.operation_count().await;
    let err = account.transfer(7, 99, dec!(60)).await.unwrap_err();
    assert!(matches!(err, EngineError::AccountNotFound(99)));
    assert_eq!(account.get_balance(7).await.unwrap(), dec!(60));
    assert_eq!(env.store.operation_count().await, before);
}

#[tokio::test]
async fn test_transfer_moves_funds_and_notifies_receiver() {
    let env = TestEnvironment::new();
    let account = &env.services.account;
    account.create_account(1).await.unwrap();
    account.create_account(2).await.unwrap();
    account.deposit(1, dec!(50)).await.unwrap();

    let receipt = account.transfer(1, 2, dec!(20)).await.unwrap();
    assert_eq!(receipt.from_balance, dec!(30));
    assert_eq!(receipt.to_balance, dec!(20));

    assert_eq!(
        kinds(&env.store.operations_for(1).await),
        vec![OperationType::Deposit, OperationType::OutgoingTransfer]
    );
    assert_eq!(
        kinds(&env.store.operations_for(2).await),
        vec![OperationType::IncomingTransfer]
    );

    assert_eq!(
        env.notifier.sent_of(OperationType::IncomingTransfer),
        vec![Notification::balance(2, dec!(20))]
    );
    assert!(env.notifier.sent_of(OperationType::OutgoingTransfer).is_empty());

    // both snapshots were refreshed
    assert_eq!(
        env.cache.get(&balance_key(1)).await.unwrap().as_deref(),
        Some("30")
    );
    assert_eq!(
        env.cache.get(&balance_key(2)).await.unwrap().as_deref(),
        Some("20")
    );
}

#[tokio::test]
async fn test_transfer_from_missing_sender() {
    let env = TestEnvironment::new();
    env.services.account.create_account(2).await.unwrap();

    let err = env
        .services
        .account
        .transfer(1, 2, dec!(5))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AccountNotFound(1)));
    assert_eq!(env.store.operation_count().await, 0);
}

#[tokio::test]
async fn test_transfer_rolls_back_when_second_ledger_row_fails() {
    let env = TestEnvironment::new();
    let account = &env.services.account;
    account.create_account(1).await.unwrap();
    account.create_account(2).await.unwrap();
    account.deposit(1, dec!(50)).await.unwrap();

    env.store.fail_appends_after(1);
    assert!(account.transfer(1, 2, dec!(20)).await.is_err());
    env.store.clear_faults();

    assert_eq!(env.store.balance(1).await.unwrap(), Some(dec!(50)));
    assert_eq!(env.store.balance(2).await.unwrap(), Some(dec!(0)));
    assert_eq!(env.store.operation_count().await, 1);
}

#[tokio::test]
async fn test_get_balance_is_stable_across_hit_and_miss() {
    let env = TestEnvironment::new();
    let account = &env.services.account;
    account.create_account(7).await.unwrap();
    account.deposit(7, dec!(12.34)).await.unwrap();

    env.cache.evict(&balance_key(7));
    let miss = account.get_balance(7).await.unwrap();
    let hit = account.get_balance(7).await.unwrap();
    assert_eq!(miss, hit);
    assert_eq!(hit, dec!(12.34));
}

#[tokio::test]
async fn test_engine_runs_without_cache() {
    let env = TestEnvironment::new();
    let account = &env.services.account;
    account.create_account(7).await.unwrap();
    env.cache.set_unavailable(true);

    assert_eq!(account.deposit(7, dec!(10)).await.unwrap(), dec!(10));
    assert_eq!(account.withdraw(7, dec!(4)).await.unwrap(), dec!(6));
    assert_eq!(account.get_balance(7).await.unwrap(), dec!(6));

    let err = account.withdraw(7, dec!(7)).await.unwrap_err();
    assert!(matches!(err, EngineError::InsufficientBalance { .. }));
}

#[tokio::test]
async fn test_stale_cache_never_decides_a_debit() {
    let env = TestEnvironment::new();
    let account = &env.services.account;
    let reservation = &env.services.reservation;
    account.create_account(7).await.unwrap();
    account.deposit(7, dec!(100)).await.unwrap();

    // snapshot too low: the hold still goes through
    env.cache
        .set(&balance_key(7), "1", Duration::from_secs(60))
        .await
        .unwrap();
    reservation
        .create_reservation(7, 3, 9, dec!(80))
        .await
        .unwrap();

    // snapshot too high: the store still refuses
    env.cache
        .set(&balance_key(7), "1000", Duration::from_secs(60))
        .await
        .unwrap();
    let err = reservation
        .create_reservation(7, 3, 10, dec!(80))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientBalance { .. }));
    assert_eq!(env.store.balance(7).await.unwrap(), Some(dec!(20)));
}

#[tokio::test]
async fn test_notification_failure_surfaces_after_commit() {
    let env = TestEnvironment::new();
    let account = &env.services.account;
    account.create_account(7).await.unwrap();
    env.notifier.set_failing(true);

    let err = account.deposit(7, dec!(10)).await.unwrap_err();
    assert!(matches!(err, EngineError::Nats(_)));

    // the ledger change stands and the snapshot was refreshed
    assert_eq!(env.store.balance(7).await.unwrap(), Some(dec!(10)));
    assert_eq!(
        env.cache.get(&balance_key(7)).await.unwrap().as_deref(),
        Some("10")
    );
    assert_eq!(env.store.operations_for(7).await.len(), 1);
}

#[tokio::test]
async fn test_non_positive_amounts_rejected() {
    let env = TestEnvironment::new();
    let account = &env.services.account;
    account.create_account(7).await.unwrap();

    for amount in [Decimal::ZERO, dec!(-5)] {
        assert!(matches!(
            account.deposit(7, amount).await,
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            env.services.reservation.create_reservation(7, 1, 1, amount).await,
            Err(EngineError::Validation(_))
        ));
    }
    assert_eq!(env.store.operation_count().await, 0);
}

#[tokio::test]
async fn test_history_paging_and_sorting() {
    let env = TestEnvironment::new();
    let account = &env.services.account;
    let history = &env.services.operation;
    account.create_account(7).await.unwrap();

    for amount in [dec!(5), dec!(30), dec!(10)] {
        account.deposit(7, amount).await.unwrap();
    }
    account.withdraw(7, dec!(1)).await.unwrap();

    let newest_first = history
        .get_history(7, HistorySort::CreatedAt, 0, 0)
        .await
        .unwrap();
    assert_eq!(newest_first.len(), 4);
    assert_eq!(newest_first[0].kind, OperationType::Withdraw);

    let by_amount = history
        .get_history(7, HistorySort::Amount, 0, 2)
        .await
        .unwrap();
    let amounts: Vec<Decimal> = by_amount.iter().map(|op| op.amount).collect();
    assert_eq!(amounts, vec![dec!(30), dec!(10)]);

    let by_type = history
        .get_history(7, HistorySort::Type, 0, 1)
        .await
        .unwrap();
    assert_eq!(by_type[0].kind, OperationType::Withdraw);

    let page = history
        .get_history(7, HistorySort::Amount, 3, 10)
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].amount, dec!(1));
}

#[tokio::test]
async fn test_history_limit_is_clamped() {
    let env = TestEnvironment::new();
    let account = &env.services.account;
    account.create_account(7).await.unwrap();
    for _ in 0..25 {
        account.deposit(7, dec!(1)).await.unwrap();
    }

    let page = env
        .services
        .operation
        .get_history(7, HistorySort::CreatedAt, -3, 500)
        .await
        .unwrap();
    assert_eq!(page.len(), 20);
}

#[tokio::test]
async fn test_report_groups_revenue_by_product() {
    let env = TestEnvironment::new();
    let account = &env.services.account;
    let reservation = &env.services.reservation;
    account.create_account(7).await.unwrap();
    account.deposit(7, dec!(100)).await.unwrap();

    for (product, amount) in [(11, dec!(12.50)), (3, dec!(20)), (3, dec!(20))] {
        let id = reservation
            .create_reservation(7, product, 1, amount)
            .await
            .unwrap();
        reservation.revenue_reservation(id).await.unwrap();
    }
    // a cancelled hold is not revenue
    let id = reservation
        .create_reservation(7, 3, 2, dec!(5))
        .await
        .unwrap();
    reservation.cancel_reservation(id).await.unwrap();

    let (year, month) = revenue_month(&env, 7).await;
    let report = env
        .services
        .operation
        .create_report(year, month)
        .await
        .unwrap();

    let csv = String::from_utf8(report.to_csv().unwrap()).unwrap();
    assert_eq!(csv, "3;40\n11;12.50\n");
    assert_eq!(report.total(), dec!(52.50));

    assert!(matches!(
        env.services.operation.create_report(year, 13).await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn test_concurrent_withdrawals_never_overdraw() {
    let env = std::sync::Arc::new(TestEnvironment::new());
    env.services.account.create_account(7).await.unwrap();
    env.services.account.deposit(7, dec!(100)).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let env = env.clone();
        handles.push(tokio::spawn(async move {
            env.services.account.withdraw(7, dec!(30)).await.is_ok()
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        if handle.await.unwrap() {
            succeeded += 1;
        }
    }

    assert_eq!(succeeded, 3);
    assert_eq!(env.store.balance(7).await.unwrap(), Some(dec!(10)));
}

#[tokio::test]
async fn test_concurrent_holds_never_overdraw() {
    let env = std::sync::Arc::new(TestEnvironment::new());
    env.services.account.create_account(7).await.unwrap();
    env.services.account.deposit(7, dec!(100)).await.unwrap();

    let mut handles = Vec::new();
    for order in 0..10 {
        let env = env.clone();
        handles.push(tokio::spawn(async move {
            env.services
                .reservation
                .create_reservation(7, 3, order, dec!(30))
                .await
        }));
    }

    let mut held = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => held += 1,
            Err(e) => assert!(matches!(e, EngineError::InsufficientBalance { .. })),
        }
    }

    assert_eq!(held, 3);
    assert_eq!(env.store.balance(7).await.unwrap(), Some(dec!(10)));
    assert_eq!(env.store.held_reservations().await.len(), 3);
    let reservation_rows = env
        .store
        .operations_for(7)
        .await
        .into_iter()
        .filter(|op| op.kind == OperationType::Reservation)
        .count();
    assert_eq!(reservation_rows, 3);
}

#[tokio::test]
async fn test_reservation_notification_failure_keeps_committed_change() {
    let env = TestEnvironment::new();
    let reservation = &env.services.reservation;
    env.services.account.create_account(7).await.unwrap();
    env.services.account.deposit(7, dec!(100)).await.unwrap();

    let cancelled = reservation
        .create_reservation(7, 3, 9, dec!(40))
        .await
        .unwrap();
    env.notifier.set_failing(true);

    let err = reservation.cancel_reservation(cancelled).await.unwrap_err();
    assert!(matches!(err, EngineError::Nats(_)));
    assert!(matches!(
        reservation.get_reservation(cancelled).await,
        Err(EngineError::ReservationNotFound(_))
    ));
    assert_eq!(env.store.balance(7).await.unwrap(), Some(dec!(100)));

    // the hold itself commits even though its notification fails
    let err = reservation
        .create_reservation(7, 3, 10, dec!(40))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Nats(_)));
    let held = env.store.held_reservations().await;
    assert_eq!(held.len(), 1);

    let err = reservation.revenue_reservation(held[0].id).await.unwrap_err();
    assert!(matches!(err, EngineError::Nats(_)));
    assert!(env.store.held_reservations().await.is_empty());
    assert_eq!(env.store.balance(7).await.unwrap(), Some(dec!(60)));

    assert_eq!(
        kinds(&env.store.operations_for(7).await),
        vec![
            OperationType::Deposit,
            OperationType::Reservation,
            OperationType::DeReservation,
            OperationType::Reservation,
            OperationType::Revenue,
        ]
    );
}

#[tokio::test]
async fn test_amounts_beyond_money_columns_rejected() {
    let env = TestEnvironment::new();
    let account = &env.services.account;
    account.create_account(7).await.unwrap();

    assert!(matches!(
        account.deposit(7, dec!(0.005)).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        account.deposit(7, dec!(10000000000000)).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        env.services
            .reservation
            .create_reservation(7, 3, 9, dec!(0.004))
            .await,
        Err(EngineError::Validation(_))
    ));
    assert_eq!(env.store.operation_count().await, 0);
    assert!(env.notifier.sent().is_empty());

    // a balance cannot be pushed past the column either
    account.deposit(7, dec!(999999999999.99)).await.unwrap();
    assert!(matches!(
        account.deposit(7, dec!(0.01)).await,
        Err(EngineError::Validation(_))
    ));
    assert_eq!(
        env.store.balance(7).await.unwrap(),
        Some(dec!(999999999999.99))
    );
    assert_eq!(env.store.operation_count().await, 1);
}
