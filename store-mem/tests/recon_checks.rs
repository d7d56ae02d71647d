//! Reconciliation over a populated in-memory system.

mod util;

use std::{sync::Arc, time::Duration};

use chain::{ChainName, ChainStore, DepositRequest, DepositStatus, TxHash};
use common::{amount::Amount, ids::UserId, time::TimestampMs};
use ledger::AccountType;
use recon::{
    CheckType, ReconConfig, ReconService, ReconStore, ReportStatus, Severity,
};
use treasury::TreasuryStore;
use util::{amt, usdc, Harness};

fn recon_service(
    harness: &Harness,
    config: ReconConfig,
) -> ReconService<
    store_mem::MemStore,
    chain::ChainEngine<
        store_mem::MemStore,
        store_mem::MemStore,
        store_mem::MemStore,
        chain::custodian::mock::MockCustodian,
    >,
> {
    ReconService::new(harness.store.clone(), harness.chain.clone(), config)
}

/// Runs a healthy deposit + withdrawal day, then expects all checks green.
#[tokio::test]
async fn clean_books_reconcile_green() {
    let chain_config = chain::ChainConfig {
        buffer_alert_threshold: amt("100.00"),
        ..chain::ChainConfig::default()
    };
    let harness = Harness::with_chain_config(chain_config).await;
    let user = UserId::generate();
    harness
        .seed_system_balance(AccountType::SystemBufferUsdc, amt("1000.00"))
        .await;
    let wallet = harness.add_wallet(user, "base", "cw-1", "0xabc").await;
    // Custodian truth mirrors the seeded ledger buffer plus the deposit.
    harness.custodian.set_balance(
        &wallet.custodian_wallet_id,
        usdc(),
        amt("950.00"),
    );

    harness
        .chain
        .process_deposit(DepositRequest {
            user_id: user,
            custodian_wallet_id: "cw-1".to_owned(),
            chain: ChainName::new("base"),
            tx_hash: TxHash::new("0xGREEN"),
            token: usdc(),
            amount: amt("50.00"),
            from_address: "0xfeed".to_owned(),
        })
        .await
        .unwrap();

    let config = ReconConfig {
        stuck_deposit_threshold: Duration::from_secs(3600),
        ..ReconConfig::default()
    };
    let report = recon_service(&harness, config).run().await.unwrap();

    assert_eq!(report.status, ReportStatus::Completed);
    assert_eq!(report.total_checks, 8);
    assert_eq!(report.passed, 8);
    assert_eq!(report.failed, 0);
    assert_eq!(report.exceptions_count, 0);
}

#[tokio::test]
async fn stuck_pending_deposit_reported_as_warning() {
    let harness = Harness::new().await;
    let user = UserId::generate();
    harness
        .seed_system_balance(AccountType::SystemBufferUsdc, amt("1000.00"))
        .await;
    let wallet = harness.add_wallet(user, "base", "cw-1", "0xabc").await;
    harness.custodian.set_balance(
        &wallet.custodian_wallet_id,
        usdc(),
        amt("1000.00"),
    );

    // A deposit row stuck in pending, inserted directly (as if the engine
    // crashed before posting).
    let deposit = chain::Deposit {
        id: common::ids::DepositId::generate(),
        user_id: user,
        chain: ChainName::new("base"),
        tx_hash: TxHash::new("0xSTUCK"),
        token: usdc(),
        amount: amt("25.00"),
        status: DepositStatus::Pending,
        created_at: TimestampMs::now()
            .saturating_sub(Duration::from_secs(7200)),
        updated_at: TimestampMs::now(),
    };
    harness.store.insert_deposit(deposit).await.unwrap();

    let config = ReconConfig {
        stuck_deposit_threshold: Duration::from_secs(3600),
        ..ReconConfig::default()
    };
    let report = recon_service(&harness, config).run().await.unwrap();

    // The run completes; stuck deposits are warnings, not balance errors.
    assert_eq!(report.status, ReportStatus::Completed);
    assert_eq!(report.failed, 1);
    assert_eq!(report.exceptions_count, 1);

    let exceptions = harness
        .store
        .list_unresolved_exceptions(10)
        .await
        .unwrap();
    assert_eq!(exceptions.len(), 1);
    let exception = &exceptions[0];
    assert_eq!(exception.severity, Severity::Warning);
    assert_eq!(exception.check_type, CheckType::StuckDeposits);
    assert_eq!(exception.affected_user, Some(user));

    // Operator resolves it.
    harness
        .store
        .resolve_exception(
            exception.id,
            "ops@example.com".to_owned(),
            "manually re-driven".to_owned(),
            TimestampMs::now(),
        )
        .await
        .unwrap();
    assert!(harness
        .store
        .list_unresolved_exceptions(10)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn completed_job_without_ledger_txn_is_critical() {
    let harness = Harness::new().await;
    harness
        .seed_system_balance(AccountType::SystemBufferUsdc, amt("1000"))
        .await;
    harness
        .seed_system_balance(AccountType::SystemBufferFiat, amt("1000"))
        .await;

    // A conversion job forced into completed without its ledger link, as if
    // a bug ate the posting.
    let usdc_buffer = harness
        .ledger
        .get_system_account(AccountType::SystemBufferUsdc)
        .await
        .unwrap();
    let fiat_buffer = harness
        .ledger
        .get_system_account(AccountType::SystemBufferFiat)
        .await
        .unwrap();
    let now = TimestampMs::now();
    let mut job = treasury::ConversionJob::new(
        treasury::ConversionDirection::UsdToUsdc,
        Amount::from_u64(100),
        treasury::TriggerReason::Manual,
        fiat_buffer.id,
        usdc_buffer.id,
        common::ids::IdempotencyKey::new("orphan-job"),
        now,
        3,
        now,
    );
    job.status = treasury::JobStatus::Completed;
    harness.store.insert_job(job.clone()).await.unwrap();
    harness.store.update_job(&job).await.unwrap();

    let report = recon_service(&harness, ReconConfig::default())
        .run()
        .await
        .unwrap();
    assert_eq!(report.status, ReportStatus::Completed);

    let exceptions = harness
        .store
        .list_unresolved_exceptions(10)
        .await
        .unwrap();
    let critical = exceptions
        .iter()
        .find(|exception| {
            exception.check_type == CheckType::ConversionCompletion
        })
        .expect("conversion completion exception");
    assert_eq!(critical.severity, Severity::Critical);
    assert!(critical
        .affected_entity
        .as_deref()
        .unwrap()
        .contains(&job.id.to_string()));
}

#[tokio::test]
async fn buffer_discrepancy_flagged() {
    let harness = Harness::new().await;
    let user = UserId::generate();
    harness
        .seed_system_balance(AccountType::SystemBufferUsdc, amt("1000.00"))
        .await;
    let wallet = harness.add_wallet(user, "base", "cw-1", "0xabc").await;
    // Custodian holds less than the ledger thinks.
    harness.custodian.set_balance(
        &wallet.custodian_wallet_id,
        usdc(),
        amt("400.00"),
    );

    let report = recon_service(&harness, ReconConfig::default())
        .run()
        .await
        .unwrap();
    assert_eq!(report.status, ReportStatus::Completed);

    let exceptions = harness
        .store
        .list_unresolved_exceptions(10)
        .await
        .unwrap();
    let discrepancy = exceptions
        .iter()
        .find(|exception| {
            exception.check_type == CheckType::BufferDiscrepancy
        })
        .expect("buffer discrepancy exception");
    // 400 is below the default 1000 alert threshold: critical.
    assert_eq!(discrepancy.severity, Severity::Critical);
}

/// The ledger-balance identity holds across an entire mixed day, including
/// a conversion (whose legs are excluded per currency).
#[tokio::test]
async fn ledger_identity_survives_mixed_flows() {
    let (harness, adapter) = {
        let harness = Harness::new().await;
        harness
            .seed_system_balance(AccountType::SystemBufferUsdc, amt("4000"))
            .await;
        harness
            .seed_system_balance(
                AccountType::SystemBufferFiat,
                amt("50000"),
            )
            .await;
        harness
            .add_threshold(
                AccountType::SystemBufferUsdc,
                5_000,
                10_000,
                20_000,
            )
            .await;
        harness
            .add_provider("mock-primary", 1, Amount::from_u64(1_000_000))
            .await;
        (harness, Arc::new(treasury::adapters::MockAdapter::new()))
    };
    let user = UserId::generate();
    let wallet = harness.add_wallet(user, "base", "cw-1", "0xabc").await;

    // Deposit.
    harness
        .chain
        .process_deposit(DepositRequest {
            user_id: user,
            custodian_wallet_id: "cw-1".to_owned(),
            chain: ChainName::new("base"),
            tx_hash: TxHash::new("0xMIX"),
            token: usdc(),
            amount: amt("500.00"),
            from_address: "0xfeed".to_owned(),
        })
        .await
        .unwrap();

    // Conversion via the treasury.
    let engine =
        harness.treasury(adapter.clone(), treasury::TreasuryConfig::default());
    engine.run_settlement_cycle().await.unwrap();
    let job = harness
        .store
        .list_jobs_by_status(treasury::JobStatus::ProviderSubmitted)
        .await
        .unwrap()
        .remove(0);
    adapter.complete(job.provider_tx_id.as_deref().unwrap(), None);
    engine.run_monitor_pass().await.unwrap();

    // Custodian truth mirrors the final on-chain position.
    let buffer_balance =
        harness.system_balance(AccountType::SystemBufferUsdc).await;
    harness.custodian.set_balance(
        &wallet.custodian_wallet_id,
        usdc(),
        buffer_balance,
    );

    let report = recon_service(&harness, ReconConfig::default())
        .run()
        .await
        .unwrap();
    assert_eq!(report.status, ReportStatus::Completed);
    assert_eq!(report.passed, 8, "all checks green: {report:?}");
}
