//! Wallet ledger integration tests.

mod common;

use common::TestContext;
use giftcard_service::models::{
    TransactionFilter, TransactionMeta, TransactionStatus, TransactionType, WalletStatus,
};
use giftcard_service::services::ServiceError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

#[tokio::test]
async fn create_wallet_starts_empty_and_active() {
    let ctx = TestContext::new();
    let business = ctx.business().await;

    let wallet = ctx
        .services
        .wallets
        .get_wallet(business.wallet.wallet_id)
        .await
        .unwrap();

    assert_eq!(wallet.balance, Decimal::ZERO);
    assert_eq!(wallet.pending_balance, Decimal::ZERO);
    assert_eq!(wallet.currency, "USD");
    assert_eq!(wallet.status, WalletStatus::Active);
    assert!(!wallet.is_verified);
}

#[tokio::test]
async fn one_wallet_per_business() {
    let ctx = TestContext::new();
    let business = ctx.business().await;

    let err = ctx
        .services
        .wallets
        .create_wallet(business.business_id, Uuid::new_v4(), "USD")
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::Conflict(_)));
}

#[tokio::test]
async fn invalid_currency_is_rejected() {
    let ctx = TestContext::new();

    let err = ctx
        .services
        .wallets
        .create_wallet(Uuid::new_v4(), Uuid::new_v4(), "US")
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::InvalidInput(_)));
}

#[tokio::test]
async fn credit_then_debit_moves_balance_and_totals() {
    let ctx = TestContext::new();
    let wallet_id = ctx.business().await.wallet.wallet_id;
    let wallets = &ctx.services.wallets;

    wallets
        .process_transaction(
            wallet_id,
            dec!(100.00),
            TransactionType::Credit,
            TransactionMeta::new("sale-1", "Card sale"),
        )
        .await
        .unwrap();
    let debit = wallets
        .process_transaction(
            wallet_id,
            dec!(30.50),
            TransactionType::Debit,
            TransactionMeta::default(),
        )
        .await
        .unwrap();

    assert_eq!(debit.status, TransactionStatus::Completed);

    let wallet = wallets.get_wallet(wallet_id).await.unwrap();
    assert_eq!(wallet.balance, dec!(69.50));
    assert_eq!(wallet.total_income, dec!(100.00));
    assert_eq!(wallet.total_expenses, dec!(30.50));
    assert_eq!(wallet.version, 2);
}

#[tokio::test]
async fn debit_beyond_balance_fails_without_side_effects() {
    let ctx = TestContext::new();
    let wallet_id = ctx.business().await.wallet.wallet_id;
    let wallets = &ctx.services.wallets;

    wallets
        .process_transaction(wallet_id, dec!(20), TransactionType::Credit, TransactionMeta::default())
        .await
        .unwrap();

    let err = wallets
        .process_transaction(wallet_id, dec!(20.01), TransactionType::Debit, TransactionMeta::default())
        .await
        .unwrap_err();

    match err {
        ServiceError::InsufficientFunds {
            requested,
            available,
        } => {
            assert_eq!(requested, dec!(20.01));
            assert_eq!(available, dec!(20));
        }
        other => panic!("expected InsufficientFunds, got {other:?}"),
    }

    let wallet = wallets.get_wallet(wallet_id).await.unwrap();
    assert_eq!(wallet.balance, dec!(20));

    let history = wallets
        .get_transaction_history(wallet_id, &TransactionFilter::default())
        .await
        .unwrap();
    assert_eq!(history.total_count, 1);
}

#[tokio::test]
async fn refund_draws_the_balance_down() {
    let ctx = TestContext::new();
    let wallet_id = ctx.business().await.wallet.wallet_id;
    let wallets = &ctx.services.wallets;

    wallets
        .process_transaction(wallet_id, dec!(50), TransactionType::Credit, TransactionMeta::default())
        .await
        .unwrap();
    wallets
        .process_transaction(wallet_id, dec!(15), TransactionType::Refund, TransactionMeta::default())
        .await
        .unwrap();

    let wallet = wallets.get_wallet(wallet_id).await.unwrap();
    assert_eq!(wallet.balance, dec!(35));
    assert_eq!(wallet.total_expenses, dec!(15));
}

#[tokio::test]
async fn amounts_must_be_positive_with_two_decimals() {
    let ctx = TestContext::new();
    let wallet_id = ctx.business().await.wallet.wallet_id;

    for amount in [dec!(0), dec!(-5), dec!(1.005)] {
        let err = ctx
            .services
            .wallets
            .process_transaction(wallet_id, amount, TransactionType::Credit, TransactionMeta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)), "{amount}");
    }
}

#[tokio::test]
async fn amounts_beyond_the_ledger_range_are_rejected() {
    let ctx = TestContext::new();
    let wallet_id = ctx.business().await.wallet.wallet_id;

    let err = ctx
        .services
        .wallets
        .process_transaction(
            wallet_id,
            dec!(1000000000000.00),
            TransactionType::Credit,
            TransactionMeta::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(_)));

    ctx.services
        .wallets
        .process_transaction(
            wallet_id,
            dec!(999999999999.99),
            TransactionType::Credit,
            TransactionMeta::default(),
        )
        .await
        .unwrap();
    let wallet = ctx.services.wallets.get_wallet(wallet_id).await.unwrap();
    assert_eq!(wallet.balance, dec!(999999999999.99));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_debits_never_overdraw() {
    let ctx = TestContext::new();
    let wallet_id = ctx.business().await.wallet.wallet_id;
    let wallets = ctx.services.wallets.clone();

    wallets
        .process_transaction(wallet_id, dec!(50), TransactionType::Credit, TransactionMeta::default())
        .await
        .unwrap();

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let wallets = wallets.clone();
            tokio::spawn(async move {
                wallets
                    .process_transaction(
                        wallet_id,
                        dec!(10),
                        TransactionType::Debit,
                        TransactionMeta::default(),
                    )
                    .await
            })
        })
        .collect();

    let mut succeeded = 0;
    for result in futures::future::join_all(handles).await {
        match result.unwrap() {
            Ok(_) => succeeded += 1,
            Err(ServiceError::InsufficientFunds { .. }) | Err(ServiceError::Conflict(_)) => {}
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }

    let wallet = wallets.get_wallet(wallet_id).await.unwrap();
    assert!(succeeded <= 5);
    assert!(wallet.balance >= Decimal::ZERO);
    assert_eq!(wallet.balance, dec!(50) - Decimal::from(succeeded) * dec!(10));
    assert_eq!(wallet.total_expenses, Decimal::from(succeeded) * dec!(10));
}

#[tokio::test]
async fn pending_credit_settles_into_balance() {
    let ctx = TestContext::new();
    let wallet_id = ctx.business().await.wallet.wallet_id;
    let wallets = &ctx.services.wallets;

    let pending = wallets
        .record_pending(wallet_id, dec!(25), TransactionType::Credit, TransactionMeta::default())
        .await
        .unwrap();
    assert_eq!(pending.status, TransactionStatus::Pending);

    let wallet = wallets.get_wallet(wallet_id).await.unwrap();
    assert_eq!(wallet.balance, Decimal::ZERO);
    assert_eq!(wallet.pending_balance, dec!(25));

    let completed = wallets
        .complete_pending(pending.transaction_id, Some("ch_1".to_string()))
        .await
        .unwrap();
    assert_eq!(completed.status, TransactionStatus::Completed);
    assert_eq!(completed.reference_id.as_deref(), Some("ch_1"));

    let wallet = wallets.get_wallet(wallet_id).await.unwrap();
    assert_eq!(wallet.balance, dec!(25));
    assert_eq!(wallet.pending_balance, Decimal::ZERO);
    assert_eq!(wallet.total_income, dec!(25));
}

#[tokio::test]
async fn cancelled_pending_credit_leaves_balance_untouched() {
    let ctx = TestContext::new();
    let wallet_id = ctx.business().await.wallet.wallet_id;
    let wallets = &ctx.services.wallets;

    let pending = wallets
        .record_pending(wallet_id, dec!(25), TransactionType::Credit, TransactionMeta::default())
        .await
        .unwrap();
    wallets.cancel_pending(pending.transaction_id).await.unwrap();

    let wallet = wallets.get_wallet(wallet_id).await.unwrap();
    assert_eq!(wallet.balance, Decimal::ZERO);
    assert_eq!(wallet.pending_balance, Decimal::ZERO);

    // Settled entries are final.
    let err = wallets
        .complete_pending(pending.transaction_id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));
}

#[tokio::test]
async fn only_credits_can_be_pending() {
    let ctx = TestContext::new();
    let wallet_id = ctx.business().await.wallet.wallet_id;

    let err = ctx
        .services
        .wallets
        .record_pending(wallet_id, dec!(5), TransactionType::Debit, TransactionMeta::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::InvalidInput(_)));
}

#[tokio::test]
async fn suspended_wallet_rejects_transactions_until_reactivated() {
    let ctx = TestContext::new();
    let wallet_id = ctx.business().await.wallet.wallet_id;
    let wallets = &ctx.services.wallets;

    let suspended = wallets.suspend(wallet_id).await.unwrap();
    assert_eq!(suspended.status, WalletStatus::Suspended);

    let err = wallets
        .process_transaction(wallet_id, dec!(10), TransactionType::Credit, TransactionMeta::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));

    wallets.reactivate(wallet_id).await.unwrap();
    wallets
        .process_transaction(wallet_id, dec!(10), TransactionType::Credit, TransactionMeta::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn wallet_with_pending_credit_cannot_close() {
    let ctx = TestContext::new();
    let wallet_id = ctx.business().await.wallet.wallet_id;
    let wallets = &ctx.services.wallets;

    let pending = wallets
        .record_pending(wallet_id, dec!(10), TransactionType::Credit, TransactionMeta::default())
        .await
        .unwrap();

    let err = wallets.close(wallet_id).await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));

    wallets.fail_pending(pending.transaction_id).await.unwrap();
    let closed = wallets.close(wallet_id).await.unwrap();
    assert_eq!(closed.status, WalletStatus::Closed);

    let err = wallets.reactivate(wallet_id).await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));
}

#[tokio::test]
async fn history_is_newest_first_and_filterable() {
    let ctx = TestContext::new();
    let wallet_id = ctx.business().await.wallet.wallet_id;
    let wallets = &ctx.services.wallets;

    for amount in [dec!(10), dec!(20), dec!(30)] {
        wallets
            .process_transaction(wallet_id, amount, TransactionType::Credit, TransactionMeta::default())
            .await
            .unwrap();
    }
    wallets
        .process_transaction(wallet_id, dec!(5), TransactionType::Debit, TransactionMeta::default())
        .await
        .unwrap();

    let all = wallets
        .get_transaction_history(wallet_id, &TransactionFilter::default())
        .await
        .unwrap();
    assert_eq!(all.total_count, 4);
    assert!(all
        .transactions
        .windows(2)
        .all(|w| w[0].created_utc >= w[1].created_utc));

    let credits = wallets
        .get_transaction_history(
            wallet_id,
            &TransactionFilter {
                transaction_type: Some(TransactionType::Credit),
                limit: 2,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(credits.total_count, 3);
    assert_eq!(credits.transactions.len(), 2);
    assert!(credits
        .transactions
        .iter()
        .all(|t| t.transaction_type == TransactionType::Credit));
}

#[tokio::test]
async fn unknown_wallet_is_not_found() {
    let ctx = TestContext::new();

    let err = ctx
        .services
        .wallets
        .get_transaction_history(Uuid::new_v4(), &TransactionFilter::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::NotFound(_)));
}
