//! Withdrawal execution through the on-chain engine and the custodian.

mod util;

use chain::{
    ChainError, ChainName, ChainStore, DepositRequest, TxHash, Withdrawal,
    WithdrawalStatus,
};
use common::{ids::UserId, time::TimestampMs};
use ledger::AccountType;
use util::{amt, usdc, Harness};

/// Seeds the user with an on-chain deposit so their ledger balance is real.
async fn fund_user(harness: &Harness, user: UserId, amount: &str) {
    harness
        .seed_system_balance(AccountType::SystemBufferUsdc, amt("10000.00"))
        .await;
    harness.add_wallet(user, "base", "cw-1", "0xabc").await;
    harness
        .chain
        .process_deposit(DepositRequest {
            user_id: user,
            custodian_wallet_id: "cw-1".to_owned(),
            chain: ChainName::new("base"),
            tx_hash: TxHash::new("0xFUND"),
            token: usdc(),
            amount: amt(amount),
            from_address: "0xfeed".to_owned(),
        })
        .await
        .unwrap();
}

async fn new_withdrawal(
    harness: &Harness,
    user: UserId,
    amount: &str,
) -> Withdrawal {
    let withdrawal = Withdrawal::new(
        user,
        amt(amount),
        ChainName::new("base"),
        "0xdest".to_owned(),
        TimestampMs::now(),
    );
    harness.store.insert_withdrawal(withdrawal.clone()).await.unwrap();
    withdrawal
}

#[tokio::test]
async fn withdrawal_executes_end_to_end() {
    let harness = Harness::new().await;
    let user = UserId::generate();
    fund_user(&harness, user, "100.00").await;

    let withdrawal = new_withdrawal(&harness, user, "60.00").await;
    let executed = harness
        .chain
        .execute_withdrawal(withdrawal.id)
        .await
        .unwrap();

    assert_eq!(executed.status, WithdrawalStatus::Completed);
    assert!(executed.provider_transfer_id.is_some());
    // The custodian id is not an on-chain hash.
    assert!(executed.tx_hash.is_none());

    assert_eq!(
        harness.user_balance(user, AccountType::UsdcBalance).await,
        amt("40.00")
    );
    // 10000 - 100 deposit + 60 withdrawal returned.
    assert_eq!(
        harness.system_balance(AccountType::SystemBufferUsdc).await,
        amt("9960.00")
    );

    let transfer = harness.custodian.last_transfer().unwrap();
    assert_eq!(transfer.destination_address, "0xdest");
    assert_eq!(transfer.amounts, vec![amt("60.00")]);
    assert_eq!(transfer.idempotency_key, withdrawal.id);
}

#[tokio::test]
async fn insufficient_balance_fails_without_ledger_entries() {
    let harness = Harness::new().await;
    let user = UserId::generate();
    fund_user(&harness, user, "20.00").await;
    let transactions_before = harness.store.transaction_count();

    let withdrawal = new_withdrawal(&harness, user, "25.00").await;
    let err = harness
        .chain
        .execute_withdrawal(withdrawal.id)
        .await
        .unwrap_err();

    assert!(matches!(err, ChainError::InsufficientBalance { .. }));
    // No ledger transaction was created.
    assert_eq!(harness.store.transaction_count(), transactions_before);
    // The withdrawal row is failed; balances unchanged.
    let row = harness
        .store
        .get_withdrawal(withdrawal.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, WithdrawalStatus::Failed);
    assert!(row.error.is_some());
    assert_eq!(
        harness.user_balance(user, AccountType::UsdcBalance).await,
        amt("20.00")
    );
    assert_eq!(harness.custodian.transfer_count(), 0);
}

#[tokio::test]
async fn exact_balance_withdrawal_succeeds() {
    let harness = Harness::new().await;
    let user = UserId::generate();
    fund_user(&harness, user, "100.00").await;

    let withdrawal = new_withdrawal(&harness, user, "100.00").await;
    harness.chain.execute_withdrawal(withdrawal.id).await.unwrap();
    assert_eq!(
        harness.user_balance(user, AccountType::UsdcBalance).await,
        amt("0")
    );
}

#[tokio::test]
async fn resubmitting_completed_withdrawal_is_noop() {
    let harness = Harness::new().await;
    let user = UserId::generate();
    fund_user(&harness, user, "100.00").await;

    let withdrawal = new_withdrawal(&harness, user, "30.00").await;
    harness.chain.execute_withdrawal(withdrawal.id).await.unwrap();
    let transfers_after_first = harness.custodian.transfer_count();

    let again = harness
        .chain
        .execute_withdrawal(withdrawal.id)
        .await
        .unwrap();
    assert_eq!(again.status, WithdrawalStatus::Completed);
    assert_eq!(harness.custodian.transfer_count(), transfers_after_first);
    assert_eq!(
        harness.user_balance(user, AccountType::UsdcBalance).await,
        amt("70.00")
    );
}

#[tokio::test]
async fn custodian_failure_after_debit_leaves_ledger_for_operator() {
    let harness = Harness::new().await;
    let user = UserId::generate();
    fund_user(&harness, user, "100.00").await;
    harness.custodian.fail_transfers(true);

    let withdrawal = new_withdrawal(&harness, user, "30.00").await;
    let err = harness
        .chain
        .execute_withdrawal(withdrawal.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::Custodian(_)));

    let row = harness
        .store
        .get_withdrawal(withdrawal.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, WithdrawalStatus::Failed);

    // The ledger debit deliberately stays: reversal is an operator action
    // once the custodian's true state is known.
    assert_eq!(
        harness.user_balance(user, AccountType::UsdcBalance).await,
        amt("70.00")
    );
}

#[tokio::test]
async fn missing_destination_wallet_is_fatal() {
    let harness = Harness::new().await;
    let user = UserId::generate();
    fund_user(&harness, user, "100.00").await;

    // The user has a wallet on "base" but withdraws to "polygon".
    let withdrawal = Withdrawal::new(
        user,
        amt("10.00"),
        ChainName::new("polygon"),
        "0xdest".to_owned(),
        TimestampMs::now(),
    );
    harness.store.insert_withdrawal(withdrawal.clone()).await.unwrap();

    let err = harness
        .chain
        .execute_withdrawal(withdrawal.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::WalletNotFound { .. }));

    let row = harness
        .store
        .get_withdrawal(withdrawal.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, WithdrawalStatus::Failed);
}
