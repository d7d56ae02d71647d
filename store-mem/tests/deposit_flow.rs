//! Deposit processing through the on-chain engine, the smart-allocation
//! split, and the funding-event queue.

mod util;

use std::{sync::Arc, time::Duration};

use chain::{
    ChainConfig, ChainError, ChainName, DepositRequest, DepositStatus,
    FundingEventStatus, FundingQueueStore, MetricsRecorder, NewFundingEvent,
    TxHash,
};
use common::{ids::UserId, time::TimestampMs};
use ledger::AccountType;
use rust_decimal_macros::dec;
use util::{amt, usdc, Harness};

fn deposit_request(
    user: UserId,
    custodian_wallet_id: &str,
    tx_hash: &str,
    amount: &str,
) -> DepositRequest {
    DepositRequest {
        user_id: user,
        custodian_wallet_id: custodian_wallet_id.to_owned(),
        chain: ChainName::new("base"),
        tx_hash: TxHash::new(tx_hash),
        token: usdc(),
        amount: amt(amount),
        from_address: "0xfeed".to_owned(),
    }
}

#[tokio::test]
async fn deposit_confirms_and_posts_ledger_pair() {
    let harness = Harness::new().await;
    let user = UserId::generate();
    harness
        .seed_system_balance(AccountType::SystemBufferUsdc, amt("1000.00"))
        .await;
    harness.add_wallet(user, "base", "cw-1", "0xabc").await;

    let deposit = harness
        .chain
        .process_deposit(deposit_request(user, "cw-1", "0xAAA", "50.00"))
        .await
        .unwrap();

    assert_eq!(deposit.status, DepositStatus::Confirmed);
    assert_eq!(
        harness.user_balance(user, AccountType::UsdcBalance).await,
        amt("50.00")
    );
    assert_eq!(
        harness.system_balance(AccountType::SystemBufferUsdc).await,
        amt("950.00")
    );
    assert_eq!(harness.store.transaction_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_deposit_processing_is_idempotent() {
    let harness = Harness::new().await;
    let user = UserId::generate();
    harness
        .seed_system_balance(AccountType::SystemBufferUsdc, amt("1000.00"))
        .await;
    harness.add_wallet(user, "base", "cw-1", "0xabc").await;

    let run = |harness: &Harness| {
        let engine = harness.chain.clone();
        let req = deposit_request(user, "cw-1", "0xAAA", "50.00");
        async move { engine.process_deposit(req).await }
    };

    let (a, b, c) = tokio::join!(run(&harness), run(&harness), run(&harness));
    a.unwrap();
    b.unwrap();
    c.unwrap();

    // Exactly one deposit row and one ledger transaction.
    use chain::ChainStore;
    let deposit = harness
        .store
        .find_deposit_by_tx_hash(&TxHash::new("0xAAA"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(deposit.amount, amt("50.00"));
    assert_eq!(harness.store.transaction_count(), 1);
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
async fn minimum_deposit_boundary() {
    let config = ChainConfig {
        min_deposit_amount: amt("10.00"),
        ..ChainConfig::default()
    };
    let harness = Harness::with_chain_config(config).await;
    let user = UserId::generate();
    harness
        .seed_system_balance(AccountType::SystemBufferUsdc, amt("1000"))
        .await;
    harness.add_wallet(user, "base", "cw-1", "0xabc").await;

    // Exactly at the minimum succeeds.
    harness
        .chain
        .process_deposit(deposit_request(user, "cw-1", "0xAT", "10.00"))
        .await
        .unwrap();

    // One cent below fails permanently.
    let err = harness
        .chain
        .process_deposit(deposit_request(user, "cw-1", "0xBELOW", "9.99"))
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::DepositBelowMinimum { .. }));
    assert_eq!(err.class(), chain::ErrorClass::Permanent);
}

#[tokio::test]
async fn wallet_mismatch_is_permanent() {
    let harness = Harness::new().await;
    let owner = UserId::generate();
    let impostor = UserId::generate();
    harness
        .seed_system_balance(AccountType::SystemBufferUsdc, amt("1000"))
        .await;
    harness.add_wallet(owner, "base", "cw-1", "0xabc").await;

    let err = harness
        .chain
        .process_deposit(deposit_request(impostor, "cw-1", "0xBAD", "50.00"))
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::WalletMismatch { .. }));
    assert_eq!(err.class(), chain::ErrorClass::Permanent);
}

#[tokio::test]
async fn smart_allocation_splits_seventy_thirty() {
    let harness = Harness::new().await;
    let user = UserId::generate();
    harness
        .seed_system_balance(AccountType::SystemBufferUsdc, amt("1000.00"))
        .await;
    harness.add_wallet(user, "base", "cw-1", "0xabc").await;
    harness
        .allocation
        .set_mode(user, dec!(0.30), dec!(0.70))
        .await
        .unwrap();

    let deposit = harness
        .chain
        .process_deposit(deposit_request(user, "cw-1", "0xALLOC", "100.00"))
        .await
        .unwrap();
    assert_eq!(deposit.status, DepositStatus::Confirmed);

    assert_eq!(
        harness
            .user_balance(user, AccountType::SpendingBalance)
            .await,
        amt("30.00")
    );
    assert_eq!(
        harness.user_balance(user, AccountType::StashBalance).await,
        amt("70.00")
    );
    assert_eq!(
        harness.system_balance(AccountType::SystemBufferUsdc).await,
        amt("900.00")
    );
    // The plain usdc_balance is untouched by an allocated deposit.
    assert_eq!(
        harness.user_balance(user, AccountType::UsdcBalance).await,
        amt("0")
    );

    // One allocation event with the right legs, and a weekly rollup.
    use allocation::AllocationStore;
    let events = harness.store.list_events(user, 10, 0).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].spending_amount, amt("30.00"));
    assert_eq!(events[0].stash_amount, amt("70.00"));
    assert_eq!(events[0].total, amt("100.00"));

    let week = allocation::week_start(TimestampMs::now());
    let summary = harness
        .store
        .get_weekly_summary(user, week)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.total_allocated, amt("100.00"));
    assert_eq!(summary.deposit_count, 1);
}

#[tokio::test]
async fn paused_allocation_falls_back_to_legacy_posting() {
    let harness = Harness::new().await;
    let user = UserId::generate();
    harness
        .seed_system_balance(AccountType::SystemBufferUsdc, amt("1000"))
        .await;
    harness.add_wallet(user, "base", "cw-1", "0xabc").await;
    harness
        .allocation
        .set_mode(user, dec!(0.50), dec!(0.50))
        .await
        .unwrap();
    harness.allocation.pause_mode(user).await.unwrap();

    harness
        .chain
        .process_deposit(deposit_request(user, "cw-1", "0xPAUSED", "40.00"))
        .await
        .unwrap();

    assert_eq!(
        harness.user_balance(user, AccountType::UsdcBalance).await,
        amt("40.00")
    );
    assert_eq!(
        harness
            .user_balance(user, AccountType::SpendingBalance)
            .await,
        amt("0")
    );
}

#[tokio::test]
async fn duplicate_funding_events_absorbed() {
    let harness = Harness::new().await;
    let user = UserId::generate();
    harness
        .seed_system_balance(AccountType::SystemBufferUsdc, amt("1000"))
        .await;
    harness.add_wallet(user, "base", "cw-1", "0xabc").await;

    let new_event = || NewFundingEvent {
        tx_hash: TxHash::new("0xQUEUED"),
        chain: ChainName::new("base"),
        token: usdc(),
        amount: amt("25.00"),
        to_address: "0xabc".to_owned(),
        webhook_payload: serde_json::json!({ "from_address": "0xfeed" }),
    };

    let first = harness.store.enqueue(new_event(), 5).await.unwrap();
    assert!(first.is_some());
    // Second webhook delivery for the same event is a no-op.
    let second = harness.store.enqueue(new_event(), 5).await.unwrap();
    assert!(second.is_none());

    // One claimable job.
    let now = TimestampMs::now();
    let batch = harness.store.claim_batch(10, now).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].status, FundingEventStatus::Processing);

    // Claimed jobs are invisible to other claimers.
    let batch2 = harness.store.claim_batch(10, now).await.unwrap();
    assert!(batch2.is_empty());
}

#[tokio::test(start_paused = true)]
async fn worker_processes_queue_end_to_end() {
    let harness = Harness::new().await;
    let user = UserId::generate();
    harness
        .seed_system_balance(AccountType::SystemBufferUsdc, amt("1000"))
        .await;
    harness.add_wallet(user, "base", "cw-1", "0xabc").await;

    harness
        .store
        .enqueue(
            NewFundingEvent {
                tx_hash: TxHash::new("0xWORKED"),
                chain: ChainName::new("base"),
                token: usdc(),
                amount: amt("75.00"),
                to_address: "0xabc".to_owned(),
                webhook_payload: serde_json::json!({
                    "from_address": "0xfeed",
                }),
            },
            5,
        )
        .await
        .unwrap();

    let metrics = Arc::new(MetricsRecorder::new(Duration::from_secs(3600)));
    let shutdown = common::shutdown::ShutdownSignal::new();
    let workers = chain::spawn_funding_workers(
        harness.chain.clone(),
        harness.store.clone(),
        harness.store.clone(),
        metrics.clone(),
        chain::WorkerConfig {
            worker_count: 2,
            poll_interval: Duration::from_millis(100),
            ..chain::WorkerConfig::default()
        },
        shutdown.clone(),
    );

    // Let the workers poll a few times.
    tokio::time::sleep(Duration::from_secs(1)).await;
    shutdown.signal();
    for worker in workers {
        worker.await.unwrap();
    }

    let event = harness
        .store
        .get(&TxHash::new("0xWORKED"), &ChainName::new("base"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.status, FundingEventStatus::Completed);
    assert_eq!(event.attempt_count, 1);
    assert_eq!(event.processing_logs.len(), 1);

    assert_eq!(
        harness.user_balance(user, AccountType::UsdcBalance).await,
        amt("75.00")
    );
    let snapshot = metrics.snapshot(0);
    assert_eq!(snapshot.total_processed, 1);
}

#[tokio::test(start_paused = true)]
async fn unknown_address_goes_to_dlq() {
    let harness = Harness::new().await;
    harness
        .seed_system_balance(AccountType::SystemBufferUsdc, amt("1000"))
        .await;
    // No wallet registered for this address.

    harness
        .store
        .enqueue(
            NewFundingEvent {
                tx_hash: TxHash::new("0xNOWALLET"),
                chain: ChainName::new("base"),
                token: usdc(),
                amount: amt("75.00"),
                to_address: "0xunknown".to_owned(),
                webhook_payload: serde_json::Value::Null,
            },
            5,
        )
        .await
        .unwrap();

    let metrics = Arc::new(MetricsRecorder::new(Duration::from_secs(3600)));
    let shutdown = common::shutdown::ShutdownSignal::new();
    let workers = chain::spawn_funding_workers(
        harness.chain.clone(),
        harness.store.clone(),
        harness.store.clone(),
        metrics.clone(),
        chain::WorkerConfig {
            worker_count: 1,
            poll_interval: Duration::from_millis(100),
            ..chain::WorkerConfig::default()
        },
        shutdown.clone(),
    );

    tokio::time::sleep(Duration::from_secs(1)).await;
    shutdown.signal();
    for worker in workers {
        worker.await.unwrap();
    }

    let event = harness
        .store
        .get(&TxHash::new("0xNOWALLET"), &ChainName::new("base"))
        .await
        .unwrap()
        .unwrap();
    // Permanent failure: dead-lettered on the first attempt.
    assert_eq!(event.status, FundingEventStatus::Dlq);
    assert_eq!(event.attempt_count, 1);
    assert!(event.moved_to_dlq_at.is_some());
    assert_eq!(event.error_type, Some(chain::ErrorClass::Permanent));

    let dlq = harness.store.list_dlq(10).await.unwrap();
    assert_eq!(dlq.len(), 1);
    assert_eq!(metrics.snapshot(0).total_dlq, 1);
}
