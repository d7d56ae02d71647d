//! Treasury settlement cycles, conversion jobs, and the scheduler.

mod util;

use std::{sync::Arc, time::Duration};

use common::{amount::Amount, shutdown::ShutdownSignal, time::TimestampMs};
use ledger::{AccountType, ReferenceKind, TxnType};
use rust_decimal_macros::dec;
use treasury::{
    adapters::MockAdapter, BufferHealth, ConversionDirection, JobStatus,
    TreasuryConfig, TreasuryScheduler, TreasuryStore, TriggerReason,
};
use util::{amt, Harness};

/// S5-shaped setup: USDC buffer below target, fiat buffer well funded.
async fn replenishment_harness() -> (Harness, Arc<MockAdapter>) {
    let harness = Harness::new().await;
    harness
        .seed_system_balance(AccountType::SystemBufferUsdc, amt("4000"))
        .await;
    harness
        .seed_system_balance(AccountType::SystemBufferFiat, amt("50000"))
        .await;
    harness
        .add_threshold(AccountType::SystemBufferUsdc, 5_000, 10_000, 20_000)
        .await;
    harness
        .add_provider("mock-primary", 1, Amount::from_u64(1_000_000))
        .await;
    (harness, Arc::new(MockAdapter::new()))
}

#[tokio::test]
async fn buffer_replenishment_plans_and_submits() {
    let (harness, adapter) = replenishment_harness().await;
    let engine = harness.treasury(adapter.clone(), TreasuryConfig::default());

    let report = engine.run_settlement_cycle().await.unwrap();

    // 4000 < min 5000: the buffer is critical and a job was planned for
    // target - current = 6000, then submitted within the same cycle.
    assert_eq!(report.buffers.len(), 1);
    assert_eq!(report.buffers[0].health, BufferHealth::CriticalLow);
    assert_eq!(report.jobs_planned, 1);
    assert_eq!(report.jobs_submitted, 1);

    let jobs = harness
        .store
        .list_jobs_by_status(JobStatus::ProviderSubmitted)
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];
    assert_eq!(job.direction, ConversionDirection::UsdToUsdc);
    assert_eq!(job.amount, amt("6000"));
    assert_eq!(job.trigger_reason, TriggerReason::Emergency);
    assert!(job.provider_tx_id.is_some());
    assert!(job.submitted_at.is_some());

    // A second cycle doesn't plan a duplicate while this one is open.
    let report = engine.run_settlement_cycle().await.unwrap();
    assert_eq!(report.jobs_planned, 0);
}

#[tokio::test]
async fn completed_conversion_posts_ledger_pair() {
    let (harness, adapter) = replenishment_harness().await;
    let engine = harness.treasury(adapter.clone(), TreasuryConfig::default());

    engine.run_settlement_cycle().await.unwrap();
    let job = harness
        .store
        .list_jobs_by_status(JobStatus::ProviderSubmitted)
        .await
        .unwrap()
        .remove(0);

    // Provider finishes the conversion 1:1.
    adapter.complete(job.provider_tx_id.as_deref().unwrap(), None);
    let report = engine.run_monitor_pass().await.unwrap();
    assert_eq!(report.completed, 1);

    let job = harness.store.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    let ledger_txn_id = job.ledger_transaction_id.expect("linked");

    // Ledger: USDC buffer back to target, fiat buffer drained by 6000.
    assert_eq!(
        harness.system_balance(AccountType::SystemBufferUsdc).await,
        amt("10000")
    );
    assert_eq!(
        harness.system_balance(AccountType::SystemBufferFiat).await,
        amt("44000")
    );

    let txn = harness
        .ledger
        .get_transaction(ledger_txn_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(txn.txn_type, TxnType::Conversion);
    let reference = txn.reference.unwrap();
    assert_eq!(reference.kind, ReferenceKind::ConversionJob);
    assert_eq!(reference.id, job.id.to_string());

    // Re-driving the monitor is harmless.
    let report = engine.run_monitor_pass().await.unwrap();
    assert_eq!(report.completed, 0);
}

#[tokio::test]
async fn divergent_destination_amount_is_honored() {
    let (harness, adapter) = replenishment_harness().await;
    let engine = harness.treasury(adapter.clone(), TreasuryConfig::default());

    engine.run_settlement_cycle().await.unwrap();
    let job = harness
        .store
        .list_jobs_by_status(JobStatus::ProviderSubmitted)
        .await
        .unwrap()
        .remove(0);

    // The provider fills slightly short of 1:1.
    adapter.complete(
        job.provider_tx_id.as_deref().unwrap(),
        Some(amt("5994")),
    );
    engine.run_monitor_pass().await.unwrap();

    assert_eq!(
        harness.system_balance(AccountType::SystemBufferUsdc).await,
        amt("9994")
    );
    assert_eq!(
        harness.system_balance(AccountType::SystemBufferFiat).await,
        amt("44000")
    );
}

#[tokio::test]
async fn provider_failure_requeues_until_exhausted() {
    let (harness, adapter) = replenishment_harness().await;
    let config = TreasuryConfig {
        max_retries: 1,
        // Keep the lone provider selectable across its scripted failures.
        provider_failure_threshold: dec!(1),
        ..TreasuryConfig::default()
    };
    let engine = harness.treasury(adapter.clone(), config);

    engine.run_settlement_cycle().await.unwrap();
    let job = harness
        .store
        .list_jobs_by_status(JobStatus::ProviderSubmitted)
        .await
        .unwrap()
        .remove(0);

    // Provider reports failure; one retry remains.
    adapter.fail(job.provider_tx_id.as_deref().unwrap(), "liquidity gap");
    let report = engine.run_monitor_pass().await.unwrap();
    assert_eq!(report.retried, 1);

    let job = harness.store.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.retry_count, 1);
    assert!(job.provider_tx_id.is_none());

    // Second submission also fails at the provider: retries exhausted.
    let mut requeued = job;
    requeued.scheduled_at = TimestampMs::now();
    harness.store.update_job(&requeued).await.unwrap();
    engine.run_settlement_cycle().await.unwrap();
    let job = harness
        .store
        .get_job(requeued.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, JobStatus::ProviderSubmitted);

    adapter.fail(job.provider_tx_id.as_deref().unwrap(), "still broken");
    engine.run_monitor_pass().await.unwrap();
    let job = harness.store.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.failed_at.is_some());
    assert!(job.error_message.is_some());
}

#[tokio::test]
async fn stale_job_recheck_retries_with_fresh_provider() {
    let (harness, adapter) = replenishment_harness().await;
    let config = TreasuryConfig {
        conversion_timeout: Duration::from_secs(10 * 60),
        ..TreasuryConfig::default()
    };
    let engine = harness.treasury(adapter.clone(), config);

    engine.run_settlement_cycle().await.unwrap();
    let mut job = harness
        .store
        .list_jobs_by_status(JobStatus::ProviderSubmitted)
        .await
        .unwrap()
        .remove(0);

    // Backdate the submission past the conversion timeout (11 minutes).
    let eleven_minutes_ago =
        TimestampMs::now().saturating_sub(Duration::from_secs(11 * 60));
    job.submitted_at = Some(eleven_minutes_ago);
    harness.store.update_job(&job).await.unwrap();

    // The status re-check fails; retries remain, so the job re-queues.
    adapter.fail_status_checks(true);
    let report = engine.run_settlement_cycle().await.unwrap();
    assert_eq!(report.stale_checked, 1);

    let requeued = harness.store.get_job(job.id).await.unwrap().unwrap();
    // Re-queued as pending with the retry counted and provider linkage
    // cleared; the next execution may pick a different provider.
    assert!(
        requeued.status == JobStatus::Pending
            || requeued.status == JobStatus::ProviderSubmitted
    );
    assert_eq!(requeued.retry_count, 1);
}

#[tokio::test]
async fn no_available_provider_leaves_job_pending() {
    let harness = Harness::new().await;
    harness
        .seed_system_balance(AccountType::SystemBufferUsdc, amt("4000"))
        .await;
    harness
        .seed_system_balance(AccountType::SystemBufferFiat, amt("50000"))
        .await;
    harness
        .add_threshold(AccountType::SystemBufferUsdc, 5_000, 10_000, 20_000)
        .await;
    // The only provider cannot cover the 6000 conversion today.
    harness
        .add_provider("tiny", 1, Amount::from_u64(100))
        .await;

    let adapter = Arc::new(MockAdapter::new());
    let engine = harness.treasury(adapter, TreasuryConfig::default());
    let report = engine.run_settlement_cycle().await.unwrap();

    assert_eq!(report.jobs_planned, 1);
    assert_eq!(report.jobs_submitted, 0);
    assert_eq!(report.jobs_failed, 0);
    let pending = harness
        .store
        .list_jobs_by_status(JobStatus::Pending)
        .await
        .unwrap();
    // Still pending; selection is retried next cycle without burning a
    // retry.
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].retry_count, 0);
}

#[tokio::test]
async fn broker_operational_replenishes_from_usdc_buffer() {
    let harness = Harness::new().await;
    harness
        .seed_system_balance(AccountType::SystemBufferUsdc, amt("50000"))
        .await;
    harness
        .add_threshold(AccountType::BrokerOperational, 1_000, 5_000, 50_000)
        .await;
    harness
        .add_provider("mock-primary", 1, Amount::from_u64(1_000_000))
        .await;

    let adapter = Arc::new(MockAdapter::new());
    let engine = harness.treasury(adapter.clone(), TreasuryConfig::default());
    engine.run_settlement_cycle().await.unwrap();

    let job = harness
        .store
        .list_jobs_by_status(JobStatus::ProviderSubmitted)
        .await
        .unwrap()
        .remove(0);
    assert_eq!(job.direction, ConversionDirection::UsdcToUsd);
    assert_eq!(job.amount, amt("5000"));

    adapter.complete(job.provider_tx_id.as_deref().unwrap(), None);
    engine.run_monitor_pass().await.unwrap();

    assert_eq!(
        harness.system_balance(AccountType::BrokerOperational).await,
        amt("5000")
    );
    assert_eq!(
        harness.system_balance(AccountType::SystemBufferUsdc).await,
        amt("45000")
    );
}

#[tokio::test]
async fn source_capped_replenishment() {
    let harness = Harness::new().await;
    // Fiat buffer can only give 2000 of the 6000 needed.
    harness
        .seed_system_balance(AccountType::SystemBufferUsdc, amt("4000"))
        .await;
    harness
        .seed_system_balance(AccountType::SystemBufferFiat, amt("2000"))
        .await;
    harness
        .add_threshold(AccountType::SystemBufferUsdc, 5_000, 10_000, 20_000)
        .await;
    harness
        .add_provider("mock-primary", 1, Amount::from_u64(1_000_000))
        .await;

    let adapter = Arc::new(MockAdapter::new());
    let engine = harness.treasury(adapter, TreasuryConfig::default());
    engine.run_settlement_cycle().await.unwrap();

    let job = harness
        .store
        .list_jobs_by_status(JobStatus::ProviderSubmitted)
        .await
        .unwrap()
        .remove(0);
    assert_eq!(job.amount, amt("2000"));
}

#[tokio::test(start_paused = true)]
async fn scheduler_runs_and_stops_cleanly() {
    let (harness, adapter) = replenishment_harness().await;
    let config = TreasuryConfig {
        scheduler_interval: Duration::from_secs(60),
        health_check_interval: Duration::from_secs(30),
        ..TreasuryConfig::default()
    };
    let engine = harness.treasury(adapter.clone(), config);

    let shutdown = ShutdownSignal::new();
    let scheduler = TreasuryScheduler::start(engine, shutdown);

    // The first settlement tick fires immediately and submits the job.
    tokio::time::sleep(Duration::from_secs(1)).await;
    let submitted = harness
        .store
        .list_jobs_by_status(JobStatus::ProviderSubmitted)
        .await
        .unwrap();
    assert_eq!(submitted.len(), 1);

    // Provider completes; the monitor tick posts the ledger pair.
    adapter.complete(
        submitted[0].provider_tx_id.as_deref().unwrap(),
        None,
    );
    tokio::time::sleep(Duration::from_secs(31)).await;
    let job = harness
        .store
        .get_job(submitted[0].id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn trigger_immediate_cycle_runs_out_of_band() {
    let (harness, adapter) = replenishment_harness().await;
    let config = TreasuryConfig {
        // A long cadence so only the trigger can explain the cycle.
        scheduler_interval: Duration::from_secs(3600),
        ..TreasuryConfig::default()
    };
    let engine = harness.treasury(adapter, config);

    let shutdown = ShutdownSignal::new();
    let scheduler = TreasuryScheduler::start(engine, shutdown);

    // Let the first immediate tick drain.
    tokio::time::sleep(Duration::from_secs(1)).await;
    let before = harness
        .store
        .list_jobs_by_status(JobStatus::ProviderSubmitted)
        .await
        .unwrap()
        .len();
    assert_eq!(before, 1);

    scheduler.stop().await;
}
