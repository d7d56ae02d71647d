use std::{sync::Arc, time::Duration};

use allocation::{AllocationService, AllocationStore};
use anyhow::Context;
use chain::{
    ChainConfig, ChainEngine, ChainStore, FundingQueueStore,
    HttpCustodianClient, MetricsRecorder, WorkerConfig,
};
use common::{
    push::LogNotifier,
    secrets::{EnvSecretStore, SecretStore},
    shutdown::ShutdownSignal,
    task::{self, Task},
};
use ledger::{LedgerService, LedgerStore};
use recon::{ReconConfig, ReconService, ReconStore};
use secrecy::Secret;
use store_mem::MemStore;
use store_postgres::PgStore;
use tracing::{error, info, warn};
use treasury::{
    build_adapters, AdapterConfig, AdapterSettings, TreasuryConfig,
    TreasuryEngine, TreasuryScheduler, TreasuryStore,
};

use crate::cli::{Args, StoreBackend};

/// How long shutdown waits for the non-scheduler tasks to drain.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
/// Queue metrics get logged this often.
const METRICS_LOG_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Rolling window for queue metrics.
const METRICS_WINDOW: Duration = Duration::from_secs(60 * 60);

pub async fn run(args: Args) -> anyhow::Result<()> {
    match args.store {
        StoreBackend::Mem => {
            warn!("Running on the in-memory store; state dies with the process");
            run_with_store(Arc::new(MemStore::new()), args).await
        }
        StoreBackend::Postgres => {
            let url = std::env::var("DATABASE_URL")
                .context("DATABASE_URL must be set for --store postgres")?;
            let store = connect_with_backoff(&url).await?;
            run_with_store(Arc::new(store), args).await
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

/// Postgres races the node on boot in most deployments; retry with backoff
/// before giving up.
async fn connect_with_backoff(url: &str) -> anyhow::Result<PgStore> {
    const ATTEMPTS: u32 = 8;
    const FLOOR: Duration = Duration::from_millis(250);
    const CEILING: Duration = Duration::from_secs(16);

    let mut last_err = None;
    for attempt in 1..=ATTEMPTS {
        match PgStore::connect(url).await {
            Ok(store) => return Ok(store),
            Err(e) => {
                warn!("Postgres connect attempt {attempt}/{ATTEMPTS} failed: {e:#}");
                last_err = Some(e);
                let wait =
                    common::backoff::wait_for_attempt(attempt, FLOOR, CEILING);
                tokio::time::sleep(wait).await;
            }
        }
    }
    Err(last_err.expect("at least one attempt ran"))
        .context("Could not connect to postgres")
}

async fn run_with_store<S>(store: Arc<S>, args: Args) -> anyhow::Result<()>
where
    S: LedgerStore
        + ChainStore
        + FundingQueueStore
        + AllocationStore
        + TreasuryStore
        + ReconStore,
{
    let secrets = EnvSecretStore;
    let http = reqwest::Client::new();

    // Ledger first; everything else posts through it.
    let ledger = LedgerService::new(store.clone());
    ledger
        .ensure_system_accounts()
        .await
        .context("Could not seed system accounts")?;

    let allocation = AllocationService::new(ledger.clone(), store.clone());

    let custodian = Arc::new(HttpCustodianClient::new(
        http.clone(),
        env_or("CUSTODIAN_API_URL", "http://localhost:8787"),
        secrets
            .get("CUSTODIAN_API_KEY")
            .unwrap_or_else(|| Secret::new(String::new())),
    ));

    let chain_config = ChainConfig {
        buffer_check_interval: Duration::from_secs(
            args.buffer_check_interval_secs,
        ),
        ..ChainConfig::default()
    };
    let chain_engine = ChainEngine::new(
        ledger.clone(),
        allocation.clone(),
        store.clone(),
        custodian,
        Arc::new(LogNotifier),
        chain_config.clone(),
    );

    // Provider adapters are registered once, from whatever credentials are
    // configured; a provider without credentials simply isn't available.
    let adapter_config = AdapterConfig {
        due: secrets.get("DUE_API_KEY").map(|api_key| AdapterSettings {
            base_url: env_or("DUE_API_URL", "https://api.due.network"),
            api_key,
        }),
        zero_hash: secrets.get("ZERO_HASH_API_KEY").map(|api_key| {
            AdapterSettings {
                base_url: env_or(
                    "ZERO_HASH_API_URL",
                    "https://api.zerohash.com",
                ),
                api_key,
            }
        }),
    };
    let adapters = build_adapters(http, adapter_config);
    if adapters.is_empty() {
        warn!(
            "No conversion provider credentials configured; replenishment \
             jobs will queue until a provider is available"
        );
    }

    let treasury_config = TreasuryConfig {
        scheduler_interval: Duration::from_secs(args.scheduler_interval_secs),
        health_check_interval: Duration::from_secs(
            args.monitor_interval_secs,
        ),
        enable_auto_rebalance: !args.no_auto_rebalance,
        ..TreasuryConfig::default()
    };
    let treasury_engine = TreasuryEngine::new(
        ledger.clone(),
        store.clone(),
        adapters,
        treasury_config,
    );

    let shutdown = ShutdownSignal::new();
    let scheduler =
        TreasuryScheduler::start(treasury_engine, shutdown.clone());

    let metrics = Arc::new(MetricsRecorder::new(METRICS_WINDOW));
    let mut tasks = chain::spawn_funding_workers(
        chain_engine.clone(),
        store.clone(),
        store.clone(),
        metrics.clone(),
        WorkerConfig {
            worker_count: args.funding_workers,
            ..WorkerConfig::default()
        },
        shutdown.clone(),
    );

    tasks.push(spawn_buffer_observer(
        chain_engine.clone(),
        chain_config.buffer_check_interval,
        shutdown.clone(),
    ));
    tasks.push(spawn_recon_loop(
        ReconService::new(
            store.clone(),
            chain_engine.clone(),
            ReconConfig::default(),
        ),
        Duration::from_secs(args.recon_interval_secs),
        shutdown.clone(),
    ));
    tasks.push(spawn_metrics_reporter(
        store.clone(),
        metrics,
        shutdown.clone(),
    ));

    info!("Financial core is up");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("Shutdown signal received");
    shutdown.signal();

    scheduler.stop().await;
    task::join_tasks_and_shutdown("node", tasks, shutdown, SHUTDOWN_TIMEOUT)
        .await;
    Ok(())
}

/// Periodically compares the ledger buffer against custodian holdings.
fn spawn_buffer_observer<L, S, A, C>(
    engine: ChainEngine<L, S, A, C>,
    interval: Duration,
    shutdown: ShutdownSignal,
) -> Task<()>
where
    L: LedgerStore,
    S: ChainStore,
    A: AllocationStore,
    C: chain::CustodianApi,
{
    Task::spawn("buffer observer", async move {
        let mut timer = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = timer.tick() => {
                    match engine.check_system_buffer_level().await {
                        Ok(status) if status.is_healthy => {}
                        Ok(status) => warn!(
                            "Buffer unhealthy: ledger {}, custodian {}",
                            status.ledger_balance, status.actual_balance
                        ),
                        Err(e) => error!("Buffer check failed: {e:#}"),
                    }
                }
                () = shutdown.wait() => {
                    info!("Buffer observer shutting down");
                    break;
                }
            }
        }
    })
}

/// Periodically runs the reconciliation checks.
fn spawn_recon_loop<R, P>(
    service: ReconService<R, P>,
    interval: Duration,
    shutdown: ShutdownSignal,
) -> Task<()>
where
    R: ReconStore,
    P: recon::BufferProbe,
{
    Task::spawn("reconciliation", async move {
        let mut timer = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = timer.tick() => {
                    match service.run().await {
                        Ok(report) if report.failed == 0 => info!(
                            "Reconciliation green: {}/{} checks",
                            report.passed, report.total_checks
                        ),
                        Ok(report) => warn!(
                            "Reconciliation found problems: {}/{} passed, \
                             {} exceptions",
                            report.passed,
                            report.total_checks,
                            report.exceptions_count
                        ),
                        Err(e) => error!("Reconciliation failed: {e:#}"),
                    }
                }
                () = shutdown.wait() => {
                    info!("Reconciliation loop shutting down");
                    break;
                }
            }
        }
    })
}

/// Periodically logs funding-queue health.
fn spawn_metrics_reporter<Q: FundingQueueStore>(
    queue: Arc<Q>,
    metrics: Arc<MetricsRecorder>,
    shutdown: ShutdownSignal,
) -> Task<()> {
    Task::spawn("queue metrics", async move {
        let mut timer = tokio::time::interval(METRICS_LOG_INTERVAL);
        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let pending = match queue.count_pending().await {
                        Ok(pending) => pending,
                        Err(e) => {
                            warn!("Could not count pending jobs: {e:#}");
                            continue;
                        }
                    };
                    let snapshot = metrics.snapshot(pending);
                    info!(
                        "Funding queue: {} pending, {} processed, \
                         {} failed, {} dlq (avg latency {:?})",
                        snapshot.pending_count,
                        snapshot.total_processed,
                        snapshot.total_failed,
                        snapshot.total_dlq,
                        snapshot.avg_latency,
                    );
                }
                () = shutdown.wait() => break,
            }
        }
    })
}
