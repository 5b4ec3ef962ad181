mod common;

use common::{Harness, config, rate, round};
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sale_ledger::application::tx::TxGuard;
use sale_ledger::domain::money::Amount;
use sale_ledger::domain::wallet::{WALLET_SYS_ICO, WALLET_SYS_INCOME, WalletKey};
use sale_ledger::error::SaleError;
use std::time::Duration;

fn amount(value: Decimal) -> Amount {
    Amount::new(value).unwrap()
}

fn sale_config() -> sale_ledger::config::SaleConfig {
    config(
        vec![
            round("Round 1", dec!(1), dec!(100), 4),
            round("Round 2", dec!(2), dec!(100), 4),
        ],
        vec![rate("USD", dec!(1))],
        dec!(200),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_subscriptions_never_overdraw() {
    let h = Harness::start(sale_config()).await;
    let user = WalletKey::user("u1", "IND");
    h.fund(&user, dec!(100)).await;

    let mut handles = Vec::new();
    for i in 0..50 {
        let wallets = h.runtime.wallets.clone();
        handles.push(tokio::spawn(async move {
            wallets
                .subscribe("u1", amount(dec!(3)), "IND", &format!("plan-{i}"))
                .await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(SaleError::InsufficientBalance) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(succeeded, 33);
    assert_eq!(h.balance(&user).await, dec!(1));
    assert_eq!(
        h.balance(&WalletKey::system(WALLET_SYS_INCOME, "IND")).await,
        dec!(99)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_purchases_respect_sub_round_capacity() {
    let h = Harness::start(sale_config()).await;
    let payments: Vec<Decimal> = {
        let mut rng = rand::thread_rng();
        (0..24)
            .map(|_| Decimal::from(rng.gen_range(1..=15u32)))
            .collect()
    };

    let mut handles = Vec::new();
    for (i, paid) in payments.into_iter().enumerate() {
        let wallets = h.runtime.wallets.clone();
        let user = format!("u{}", i % 6);
        handles.push(tokio::spawn(async move {
            wallets
                .buy_tokens(&user, amount(paid), "USD", "order", None)
                .await
        }));
    }
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) | Err(SaleError::RoundExhausted) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    let state = h.state().await;
    for sub in state.sub_rounds.values() {
        assert!(sub.bought <= sub.total, "sub-round oversold: {sub:?}");
        if sub.closed {
            assert_eq!(sub.bought, sub.total);
        }
    }
    // Closed sub-rounds always come before the open one.
    let open: Vec<_> = state.sub_rounds.values().map(|s| s.closed).collect();
    assert!(open.windows(2).all(|w| w[0] || !w[1]));

    let sold: Decimal = state.histories.iter().map(|r| r.tokens).sum();
    let held: Decimal = state
        .wallets
        .values()
        .filter(|w| w.key.symbol == "IND" && w.key.owner.starts_with('u'))
        .map(|w| w.balance.0)
        .sum();
    assert_eq!(held, sold);
    assert_eq!(
        h.balance(&WalletKey::system(WALLET_SYS_ICO, "IND")).await,
        dec!(200) - sold
    );
}

#[tokio::test]
async fn test_dropped_transaction_leaves_no_trace() {
    let h = Harness::start(sale_config()).await;
    let before = h.state().await;

    let mut tx = TxGuard::begin(&h.store).await.unwrap();
    let key = WalletKey::user("ghost", "IND");
    tx.uow().unwrap().create_wallet(&key).await.unwrap();
    tx.uow()
        .unwrap()
        .increase_balance(&key, amount(dec!(5)))
        .await
        .unwrap();
    drop(tx);

    assert_eq!(h.state().await, before);
}

#[tokio::test]
async fn test_failed_work_is_rolled_back_by_finish() {
    let h = Harness::start(sale_config()).await;
    let before = h.state().await;

    let mut tx = TxGuard::begin(&h.store).await.unwrap();
    let key = WalletKey::user("ghost", "IND");
    let result = async {
        let uow = tx.uow()?;
        uow.create_wallet(&key).await?;
        uow.decrease_balance(&key, amount(dec!(1))).await?;
        Err::<(), _>(SaleError::InsufficientBalance)
    }
    .await;
    let err = tx.finish(result).await.unwrap_err();

    assert!(matches!(err, SaleError::InsufficientBalance));
    assert_eq!(h.state().await, before);
}

#[tokio::test]
async fn test_panicking_task_releases_its_transaction() {
    let h = Harness::start(sale_config()).await;
    let before = h.state().await;

    let store = h.store.clone();
    let task = tokio::spawn(async move {
        let mut tx = TxGuard::begin(&store).await.unwrap();
        let key = WalletKey::system(WALLET_SYS_ICO, "IND");
        tx.uow()
            .unwrap()
            .increase_balance(&key, amount(dec!(1000)))
            .await
            .unwrap();
        panic!("boom");
    });
    assert!(task.await.unwrap_err().is_panic());

    assert_eq!(h.state().await, before);
    // The store is usable again.
    h.runtime
        .wallets
        .buy_tokens("u1", amount(dec!(1)), "USD", "order", None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_dropped_lock_guard_is_released() {
    let h = Harness::start(sale_config()).await;
    let key = h.runtime.config.lock.key.clone();

    let guard = h.runtime.coordinator.acquire().await.unwrap();
    assert!(guard.token().is_some());
    assert!(h.lock.is_held(&key).await);
    drop(guard);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!h.lock.is_held(&key).await);
}

#[tokio::test]
async fn test_purchase_is_refused_while_the_lock_is_held() {
    let mut cfg = sale_config();
    cfg.lock.attempts = 3;
    cfg.lock.retry_delay_ms = 1;
    let h = Harness::start(cfg).await;

    let guard = h.runtime.coordinator.acquire().await.unwrap();
    let reply = h
        .runtime
        .service
        .buy_tokens("u1", dec!(10), "USD", "order", None)
        .await
        .unwrap();
    assert!(!reply.is_ok());
    assert_eq!(reply.msg_key, "ERROR_LOCK");
    assert!(h.state().await.histories.is_empty());

    guard.release().await;
    let reply = h
        .runtime
        .service
        .buy_tokens("u1", dec!(10), "USD", "order", None)
        .await
        .unwrap();
    assert!(reply.is_ok());
}

#[tokio::test]
async fn test_slow_request_hits_the_deadline() {
    let mut cfg = sale_config();
    cfg.request_timeout_ms = 50;
    cfg.lock.attempts = 1_000;
    cfg.lock.retry_delay_ms = 5;
    let h = Harness::start(cfg).await;

    let guard = h.runtime.coordinator.acquire().await.unwrap();
    let reply = h
        .runtime
        .service
        .buy_tokens("u1", dec!(10), "USD", "order", None)
        .await
        .unwrap();
    assert_eq!(reply.msg_key, "ERROR_DEADLINE_EXCEEDED");
    assert!(reply.data.is_none());
    assert!(h.state().await.histories.is_empty());
    guard.release().await;

    // Nothing was left open by the abandoned request.
    let reply = h
        .runtime
        .service
        .buy_tokens("u1", dec!(10), "USD", "order", None)
        .await
        .unwrap();
    assert!(reply.is_ok());
}

#[tokio::test]
async fn test_empty_user_is_unauthorized() {
    let h = Harness::start(sale_config()).await;
    let reply = h
        .runtime
        .service
        .subscribe(" ", dec!(1), "IND", "plan")
        .await
        .unwrap();
    assert_eq!(reply.msg_key, "ERROR_UNAUTHORIZED");

    let reply = h.runtime.service.get_coupon("missing").await.unwrap();
    assert_eq!(reply.msg_key, "ERROR_NOT_FOUND");
}
