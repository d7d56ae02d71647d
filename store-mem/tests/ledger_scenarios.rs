//! End-to-end ledger behavior over the in-memory store.

mod util;

use common::ids::{IdempotencyKey, UserId};
use ledger::{
    entries, AccountType, CreateTransactionRequest, LedgerError, TxnStatus,
    TxnType,
};
use util::{amt, Harness};

fn deposit_request(
    harness_user: UserId,
    user_account: common::ids::AccountId,
    buffer_account: common::ids::AccountId,
    amount: &str,
    key: &str,
) -> CreateTransactionRequest {
    CreateTransactionRequest {
        user_id: Some(harness_user),
        txn_type: TxnType::Deposit,
        reference: None,
        idempotency_key: IdempotencyKey::new(key),
        description: None,
        metadata: serde_json::Value::Null,
        entries: entries::deposit(user_account, buffer_account, amt(amount)),
    }
}

#[tokio::test]
async fn balanced_deposit_moves_funds() {
    let harness = Harness::new().await;
    let user = UserId::generate();
    harness
        .seed_system_balance(AccountType::SystemBufferUsdc, amt("1000.00"))
        .await;

    let user_account = harness
        .ledger
        .get_or_create_user_account(user, AccountType::UsdcBalance)
        .await
        .unwrap();
    let buffer = harness
        .ledger
        .get_system_account(AccountType::SystemBufferUsdc)
        .await
        .unwrap();

    let txn = harness
        .ledger
        .create_transaction(deposit_request(
            user,
            user_account.id,
            buffer.id,
            "50.00",
            "dep-1",
        ))
        .await
        .unwrap();

    assert_eq!(txn.status, TxnStatus::Completed);
    assert_eq!(txn.entries.len(), 2);
    assert_eq!(
        harness.user_balance(user, AccountType::UsdcBalance).await,
        amt("50.00")
    );
    assert_eq!(
        harness.system_balance(AccountType::SystemBufferUsdc).await,
        amt("950.00")
    );
}

#[tokio::test]
async fn idempotent_replay_returns_same_transaction() {
    let harness = Harness::new().await;
    let user = UserId::generate();
    harness
        .seed_system_balance(AccountType::SystemBufferUsdc, amt("1000"))
        .await;

    let user_account = harness
        .ledger
        .get_or_create_user_account(user, AccountType::UsdcBalance)
        .await
        .unwrap();
    let buffer = harness
        .ledger
        .get_system_account(AccountType::SystemBufferUsdc)
        .await
        .unwrap();

    let first = harness
        .ledger
        .create_transaction(deposit_request(
            user,
            user_account.id,
            buffer.id,
            "50.00",
            "dep-same",
        ))
        .await
        .unwrap();
    let second = harness
        .ledger
        .create_transaction(deposit_request(
            user,
            user_account.id,
            buffer.id,
            "50.00",
            "dep-same",
        ))
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(harness.store.transaction_count(), 1);
    // Balances applied exactly once.
    assert_eq!(
        harness.user_balance(user, AccountType::UsdcBalance).await,
        amt("50.00")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_same_key_commits_once() {
    let harness = Harness::new().await;
    let user = UserId::generate();
    harness
        .seed_system_balance(AccountType::SystemBufferUsdc, amt("1000"))
        .await;

    let user_account = harness
        .ledger
        .get_or_create_user_account(user, AccountType::UsdcBalance)
        .await
        .unwrap();
    let buffer = harness
        .ledger
        .get_system_account(AccountType::SystemBufferUsdc)
        .await
        .unwrap();

    let make = |harness: &Harness| {
        let ledger = harness.ledger.clone();
        let req = deposit_request(
            user,
            user_account.id,
            buffer.id,
            "50.00",
            "dep-race",
        );
        async move { ledger.create_transaction(req).await }
    };

    let (a, b, c) = tokio::join!(make(&harness), make(&harness), make(&harness));
    let a = a.unwrap();
    let b = b.unwrap();
    let c = c.unwrap();

    assert_eq!(a.id, b.id);
    assert_eq!(b.id, c.id);
    assert_eq!(harness.store.transaction_count(), 1);
    assert_eq!(
        harness.user_balance(user, AccountType::UsdcBalance).await,
        amt("50.00")
    );
}

#[tokio::test]
async fn insufficient_balance_aborts_whole_transaction() {
    let harness = Harness::new().await;
    let user = UserId::generate();
    // Buffer has only 10; a 50 deposit must fail entirely.
    harness
        .seed_system_balance(AccountType::SystemBufferUsdc, amt("10"))
        .await;

    let user_account = harness
        .ledger
        .get_or_create_user_account(user, AccountType::UsdcBalance)
        .await
        .unwrap();
    let buffer = harness
        .ledger
        .get_system_account(AccountType::SystemBufferUsdc)
        .await
        .unwrap();

    let err = harness
        .ledger
        .create_transaction(deposit_request(
            user,
            user_account.id,
            buffer.id,
            "50.00",
            "dep-too-big",
        ))
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
    assert_eq!(harness.store.transaction_count(), 0);
    assert_eq!(
        harness.user_balance(user, AccountType::UsdcBalance).await,
        amt("0")
    );
    assert_eq!(
        harness.system_balance(AccountType::SystemBufferUsdc).await,
        amt("10")
    );
}

#[tokio::test]
async fn deposit_then_reversal_restores_balances() {
    let harness = Harness::new().await;
    let user = UserId::generate();
    harness
        .seed_system_balance(AccountType::SystemBufferUsdc, amt("1000"))
        .await;

    let user_account = harness
        .ledger
        .get_or_create_user_account(user, AccountType::UsdcBalance)
        .await
        .unwrap();
    let buffer = harness
        .ledger
        .get_system_account(AccountType::SystemBufferUsdc)
        .await
        .unwrap();

    let txn = harness
        .ledger
        .create_transaction(deposit_request(
            user,
            user_account.id,
            buffer.id,
            "50.00",
            "dep-rev",
        ))
        .await
        .unwrap();

    let reversal = harness
        .ledger
        .reverse_transaction(txn.id, "test rollback")
        .await
        .unwrap();
    assert_eq!(reversal.txn_type, TxnType::Reversal);

    // Balances identical to the pre-deposit state.
    assert_eq!(
        harness.user_balance(user, AccountType::UsdcBalance).await,
        amt("0")
    );
    assert_eq!(
        harness.system_balance(AccountType::SystemBufferUsdc).await,
        amt("1000")
    );

    // The original is now marked reversed and cannot be reversed again.
    let original = harness
        .ledger
        .get_transaction(txn.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(original.status, TxnStatus::Reversed);
    let err = harness
        .ledger
        .reverse_transaction(txn.id, "again")
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotReversible { .. }));
}

#[tokio::test]
async fn reserve_and_release_roundtrip() {
    let harness = Harness::new().await;
    let user = UserId::generate();
    harness
        .seed_system_balance(AccountType::SystemBufferUsdc, amt("1000"))
        .await;

    let user_account = harness
        .ledger
        .get_or_create_user_account(user, AccountType::UsdcBalance)
        .await
        .unwrap();
    let buffer = harness
        .ledger
        .get_system_account(AccountType::SystemBufferUsdc)
        .await
        .unwrap();
    harness
        .ledger
        .create_transaction(deposit_request(
            user,
            user_account.id,
            buffer.id,
            "100.00",
            "dep-seed",
        ))
        .await
        .unwrap();

    harness
        .ledger
        .reserve_for_investment(
            user,
            amt("60.00"),
            IdempotencyKey::new("reserve-1"),
        )
        .await
        .unwrap();
    assert_eq!(
        harness.user_balance(user, AccountType::UsdcBalance).await,
        amt("40.00")
    );
    assert_eq!(
        harness
            .user_balance(user, AccountType::PendingInvestment)
            .await,
        amt("60.00")
    );

    // Over-reserving fails fast with the friendly error.
    let err = harness
        .ledger
        .reserve_for_investment(
            user,
            amt("1000.00"),
            IdempotencyKey::new("reserve-2"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientBalance { .. }));

    harness
        .ledger
        .release_reservation(
            user,
            amt("60.00"),
            IdempotencyKey::new("release-1"),
        )
        .await
        .unwrap();
    assert_eq!(
        harness.user_balance(user, AccountType::UsdcBalance).await,
        amt("100.00")
    );
    assert_eq!(
        harness
            .user_balance(user, AccountType::PendingInvestment)
            .await,
        amt("0")
    );
}

#[tokio::test]
async fn transaction_history_pages_newest_first() {
    let harness = Harness::new().await;
    let user = UserId::generate();
    harness
        .seed_system_balance(AccountType::SystemBufferUsdc, amt("1000"))
        .await;

    let user_account = harness
        .ledger
        .get_or_create_user_account(user, AccountType::UsdcBalance)
        .await
        .unwrap();
    let buffer = harness
        .ledger
        .get_system_account(AccountType::SystemBufferUsdc)
        .await
        .unwrap();

    for index in 0..5 {
        harness
            .ledger
            .create_transaction(deposit_request(
                user,
                user_account.id,
                buffer.id,
                "10.00",
                &format!("dep-hist-{index}"),
            ))
            .await
            .unwrap();
    }

    let page = harness
        .ledger
        .get_transaction_history(user, 2, 0)
        .await
        .unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(
        page[0].idempotency_key,
        IdempotencyKey::new("dep-hist-4")
    );

    let rest = harness
        .ledger
        .get_transaction_history(user, 10, 2)
        .await
        .unwrap();
    assert_eq!(rest.len(), 3);
}
