//! The funding-event worker pool.
//!
//! Each worker claims disjoint batches from the queue, resolves the deposit
//! address to a managed wallet, and drives the on-chain engine. Failures
//! are classified: permanent ones dead-letter immediately, transient ones
//! retry with jittered exponential backoff until `max_attempts`.

use std::{sync::Arc, time::Duration};

use common::{
    backoff, shutdown::ShutdownSignal, task::Task, time::TimestampMs,
};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    custodian::CustodianApi,
    deposit::DepositRequest,
    engine::ChainEngine,
    error::{ChainError, ErrorClass},
    queue::{FundingEvent, MetricsRecorder},
    store::{ChainStore, FundingQueueStore},
};
use allocation::AllocationStore;
use ledger::LedgerStore;

/// Funding-event worker pool options.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub worker_count: usize,
    /// How often an idle worker polls the queue.
    pub poll_interval: Duration,
    /// Jobs claimed per poll.
    pub batch_size: usize,
    /// Attempts before a transiently-failing job is dead-lettered.
    pub max_attempts: u32,
    /// Base wait for the first retry.
    pub retry_initial: Duration,
    /// Retry wait ceiling.
    pub retry_max: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            poll_interval: Duration::from_secs(5),
            batch_size: 10,
            max_attempts: 5,
            retry_initial: Duration::from_secs(30),
            retry_max: Duration::from_secs(15 * 60),
        }
    }
}

/// Spawns the worker pool. Each worker runs until shutdown.
pub fn spawn_funding_workers<L, S, A, C, Q>(
    engine: ChainEngine<L, S, A, C>,
    chain_store: Arc<S>,
    queue: Arc<Q>,
    metrics: Arc<MetricsRecorder>,
    config: WorkerConfig,
    shutdown: ShutdownSignal,
) -> Vec<Task<()>>
where
    L: LedgerStore,
    S: ChainStore,
    A: AllocationStore,
    C: CustodianApi,
    Q: FundingQueueStore,
{
    (0..config.worker_count)
        .map(|index| {
            let worker = Worker {
                engine: engine.clone(),
                chain_store: chain_store.clone(),
                queue: queue.clone(),
                metrics: metrics.clone(),
                config: config.clone(),
            };
            let shutdown = shutdown.clone();
            Task::spawn(format!("funding worker {index}"), async move {
                worker.run(shutdown).await
            })
        })
        .collect()
}

struct Worker<L, S, A, C, Q> {
    engine: ChainEngine<L, S, A, C>,
    chain_store: Arc<S>,
    queue: Arc<Q>,
    metrics: Arc<MetricsRecorder>,
    config: WorkerConfig,
}

impl<L, S, A, C, Q> Worker<L, S, A, C, Q>
where
    L: LedgerStore,
    S: ChainStore,
    A: AllocationStore,
    C: CustodianApi,
    Q: FundingQueueStore,
{
    #[instrument(skip_all, name = "(funding-worker)")]
    async fn run(self, shutdown: ShutdownSignal) {
        let mut poll_timer = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = poll_timer.tick() => {
                    if let Err(e) = self.drain_once().await {
                        error!("Funding worker poll failed: {e:#}");
                    }
                }
                () = shutdown.wait() => {
                    info!("Funding worker shutting down");
                    break;
                }
            }
        }
    }

    /// Claims and processes one batch. Per-job errors never propagate; they
    /// are recorded on the job itself.
    async fn drain_once(&self) -> anyhow::Result<()> {
        let now = TimestampMs::now();
        let batch =
            self.queue.claim_batch(self.config.batch_size, now).await?;
        if batch.is_empty() {
            return Ok(());
        }
        debug!("Claimed {} funding events", batch.len());

        for event in batch {
            self.process_one(event).await;
        }
        Ok(())
    }

    async fn process_one(&self, event: FundingEvent) {
        let attempt = event.attempt_count + 1;
        let result = self.try_process(&event).await;
        let now = TimestampMs::now();

        match result {
            Ok(deposit_id) => {
                let latency =
                    now.saturating_duration_since(event.first_seen_at);
                self.metrics
                    .record_processed(event.attempt_count, latency);
                let log_line = format!(
                    "attempt {attempt}: processed as deposit {deposit_id}"
                );
                if let Err(e) =
                    self.queue.complete(&event, log_line, now).await
                {
                    error!(
                        "Completed funding event {} but couldn't record it: \
                         {e:#}",
                        event.id
                    );
                }
            }
            Err(e) => {
                let class = e.class();
                let will_retry = class == ErrorClass::Transient
                    && attempt < event.max_attempts;
                let next_retry_at = will_retry.then(|| {
                    now + backoff::jittered_backoff(
                        attempt,
                        self.config.retry_initial,
                        self.config.retry_max,
                    )
                });

                match (class, will_retry) {
                    (ErrorClass::Permanent, _) => {
                        warn!(
                            "Funding event {} failed permanently: {e:#}",
                            event.id
                        );
                        self.metrics.record_dlq();
                    }
                    (ErrorClass::Transient, true) => {
                        warn!(
                            "Funding event {} failed (attempt \
                             {attempt}/{}), will retry: {e:#}",
                            event.id, event.max_attempts
                        );
                        self.metrics.record_failed();
                    }
                    (ErrorClass::Transient, false) => {
                        error!(
                            "Funding event {} exhausted retries: {e:#}",
                            event.id
                        );
                        self.metrics.record_dlq();
                    }
                }

                let log_line = format!("attempt {attempt}: {e}");
                if let Err(store_err) = self
                    .queue
                    .fail(
                        &event,
                        e.to_string(),
                        class,
                        next_retry_at,
                        log_line,
                        now,
                    )
                    .await
                {
                    error!(
                        "Couldn't record failure for funding event {}: \
                         {store_err:#}",
                        event.id
                    );
                }
            }
        }
    }

    async fn try_process(
        &self,
        event: &FundingEvent,
    ) -> Result<common::ids::DepositId, ChainError> {
        // The webhook names only the deposit address; the managed wallet
        // row is the authority on which user owns it.
        let wallet = self
            .chain_store
            .find_wallet_by_address(&event.chain, &event.to_address)
            .await?
            .ok_or_else(|| ChainError::NoWalletForAddress {
                chain: event.chain.to_string(),
                address: event.to_address.clone(),
            })?;

        let from_address = event
            .webhook_payload
            .get("from_address")
            .and_then(|value| value.as_str())
            .unwrap_or_default()
            .to_owned();

        let deposit = self
            .engine
            .process_deposit(DepositRequest {
                user_id: wallet.user_id,
                custodian_wallet_id: wallet.custodian_wallet_id,
                chain: event.chain.clone(),
                tx_hash: event.tx_hash.clone(),
                token: event.token.clone(),
                amount: event.amount,
                from_address,
            })
            .await?;
        Ok(deposit.id)
    }
}
