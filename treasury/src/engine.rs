use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use common::{
    amount::Amount,
    ids::{IdempotencyKey, ProviderId},
    store::StoreError,
    time::TimestampMs,
};
use ledger::{
    AccountType, CreateTransactionRequest, LedgerError, LedgerService,
    LedgerStore, NewEntry, Reference, ReferenceKind, TxnType,
};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    adapter::{
        ConversionStatusResponse, InitiateConversionRequest, ProviderAdapter,
        ProviderError, ProviderTxStatus,
    },
    config::TreasuryConfig,
    job::{ConversionDirection, ConversionJob, JobStatus, TriggerReason},
    provider::{ConversionProvider, ProviderType},
    selector::{select_provider, SelectorError},
    store::TreasuryStore,
    thresholds::{BufferHealth, BufferThreshold},
};

/// Errors from treasury operations.
#[derive(Debug, thiserror::Error)]
pub enum TreasuryError {
    #[error("No adapter registered for provider type {0}")]
    AdapterMissing(ProviderType),

    #[error(transparent)]
    NoAvailableProvider(#[from] SelectorError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One buffer's standing at the start of a settlement cycle.
#[derive(Clone, Debug)]
pub struct BufferReport {
    pub account_type: AccountType,
    pub balance: Amount,
    pub health: BufferHealth,
}

/// What one settlement cycle did.
#[derive(Clone, Debug, Default)]
pub struct CycleReport {
    pub buffers: Vec<BufferReport>,
    pub stale_checked: usize,
    pub jobs_planned: usize,
    pub jobs_submitted: usize,
    pub jobs_failed: usize,
}

/// What one monitor pass did.
#[derive(Clone, Debug, Default)]
pub struct MonitorReport {
    pub polled: usize,
    pub completed: usize,
    pub failed: usize,
    pub retried: usize,
}

/// The treasury engine. Owns the cycle logic; the scheduler owns the
/// timers.
pub struct TreasuryEngine<L, T> {
    ledger: LedgerService<L>,
    store: Arc<T>,
    /// Build-once adapter registry; never mutated after initialization.
    adapters: HashMap<ProviderType, Arc<dyn ProviderAdapter>>,
    config: TreasuryConfig,
}

impl<L, T> Clone for TreasuryEngine<L, T> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
            store: self.store.clone(),
            adapters: self.adapters.clone(),
            config: self.config.clone(),
        }
    }
}

impl<L: LedgerStore, T: TreasuryStore> TreasuryEngine<L, T> {
    pub fn new(
        ledger: LedgerService<L>,
        store: Arc<T>,
        adapters: HashMap<ProviderType, Arc<dyn ProviderAdapter>>,
        config: TreasuryConfig,
    ) -> Self {
        Self {
            ledger,
            store,
            adapters,
            config,
        }
    }

    pub fn config(&self) -> &TreasuryConfig {
        &self.config
    }

    fn adapter_for(
        &self,
        provider_type: ProviderType,
    ) -> Result<&Arc<dyn ProviderAdapter>, TreasuryError> {
        self.adapters
            .get(&provider_type)
            .ok_or(TreasuryError::AdapterMissing(provider_type))
    }

    // --- Settlement cycle --- //

    /// One settlement cycle: check buffers, recover stale jobs, plan
    /// replenishments, execute pending jobs. Per-job errors are recorded on
    /// the jobs and never abort the cycle.
    #[instrument(skip_all, name = "(settlement-cycle)")]
    pub async fn run_settlement_cycle(
        &self,
    ) -> Result<CycleReport, TreasuryError> {
        let now = TimestampMs::now();
        let mut report = CycleReport::default();

        report.buffers = self.check_buffers().await?;
        report.stale_checked = self.process_stale_jobs(now).await?;
        report.jobs_planned =
            self.plan_replenishment(&report.buffers, now).await?;
        let (submitted, failed) = self.execute_pending_jobs(now).await?;
        report.jobs_submitted = submitted;
        report.jobs_failed = failed;

        info!(
            "Settlement cycle done: {} buffers, {} stale checked, \
             {} planned, {} submitted, {} failed",
            report.buffers.len(),
            report.stale_checked,
            report.jobs_planned,
            report.jobs_submitted,
            report.jobs_failed,
        );
        Ok(report)
    }

    /// Classifies every configured buffer against its thresholds.
    pub async fn check_buffers(
        &self,
    ) -> Result<Vec<BufferReport>, TreasuryError> {
        let thresholds = self.store.list_thresholds().await?;
        let mut reports = Vec::with_capacity(thresholds.len());

        for threshold in &thresholds {
            let account = self
                .ledger
                .get_system_account(threshold.account_type)
                .await?;
            let health = threshold.health(
                account.balance,
                self.config.emergency_threshold_ratio,
            );
            match health {
                BufferHealth::CriticalLow => warn!(
                    "Buffer {} CRITICAL: balance {} below min {}",
                    threshold.account_type, account.balance, threshold.min
                ),
                BufferHealth::BelowTarget => info!(
                    "Buffer {} below target: {} < {}",
                    threshold.account_type, account.balance, threshold.target
                ),
                BufferHealth::Healthy => debug!(
                    "Buffer {} healthy at {}",
                    threshold.account_type, account.balance
                ),
                BufferHealth::OverCapitalized => info!(
                    "Buffer {} over-capitalized: {} > max {}",
                    threshold.account_type, account.balance, threshold.max
                ),
            }
            reports.push(BufferReport {
                account_type: threshold.account_type,
                balance: account.balance,
                health,
            });
        }
        Ok(reports)
    }

    /// Re-checks jobs that have sat with the provider past the conversion
    /// timeout: one status poll, then retry or fail.
    async fn process_stale_jobs(
        &self,
        now: TimestampMs,
    ) -> Result<usize, TreasuryError> {
        let cutoff = now.saturating_sub(self.config.conversion_timeout);
        let stale = self
            .store
            .list_in_flight_jobs()
            .await?
            .into_iter()
            .filter(|job| {
                job.submitted_at.map(|at| at < cutoff).unwrap_or(true)
            })
            .collect::<Vec<_>>();

        let provider_types = self.provider_types_by_id().await?;
        let mut checked = 0;
        for mut job in stale {
            checked += 1;
            warn!(
                "Job {} stale (submitted {:?}); re-checking with provider",
                job.id, job.submitted_at
            );
            match self.poll_provider(&job, &provider_types).await {
                Ok(resp) => {
                    self.apply_status(&mut job, resp, now).await?;
                }
                Err(e) => {
                    if job.can_retry() {
                        let delay = self.retry_delay(job.retry_count + 1);
                        job.requeue_for_retry(now + delay, now);
                        self.store.update_job(&job).await?;
                        info!(
                            "Stale job {} re-queued (retry {}): {e:#}",
                            job.id, job.retry_count
                        );
                    } else {
                        job.fail(
                            format!("stale past conversion timeout: {e}"),
                            Some("TIMEOUT".to_owned()),
                            now,
                        );
                        self.store.update_job(&job).await?;
                        error!("Stale job {} failed: {e:#}", job.id);
                    }
                }
            }
        }
        Ok(checked)
    }

    /// Creates conversion jobs for buffers that need replenishment.
    async fn plan_replenishment(
        &self,
        buffers: &[BufferReport],
        now: TimestampMs,
    ) -> Result<usize, TreasuryError> {
        let thresholds: HashMap<AccountType, BufferThreshold> = self
            .store
            .list_thresholds()
            .await?
            .into_iter()
            .map(|threshold| (threshold.account_type, threshold))
            .collect();

        let mut planned = 0;
        for buffer in buffers {
            if !buffer.health.needs_replenishment() {
                continue;
            }
            let emergency = buffer.health == BufferHealth::CriticalLow;
            if !emergency && !self.config.enable_auto_rebalance {
                debug!(
                    "Auto-rebalance disabled; skipping {} top-up",
                    buffer.account_type
                );
                continue;
            }
            let Some(threshold) = thresholds.get(&buffer.account_type)
            else {
                continue;
            };

            // Replenishment mapping: which direction refills this buffer,
            // and from which source account.
            let (direction, source_type) = match buffer.account_type {
                AccountType::SystemBufferUsdc => (
                    ConversionDirection::UsdToUsdc,
                    AccountType::SystemBufferFiat,
                ),
                AccountType::SystemBufferFiat => (
                    ConversionDirection::UsdcToUsd,
                    AccountType::SystemBufferUsdc,
                ),
                AccountType::BrokerOperational => (
                    ConversionDirection::UsdcToUsd,
                    AccountType::SystemBufferUsdc,
                ),
                other => {
                    warn!("No replenishment mapping for buffer {other}");
                    continue;
                }
            };

            let source = self.ledger.get_system_account(source_type).await?;
            let destination = self
                .ledger
                .get_system_account(buffer.account_type)
                .await?;

            // Skip if a conversion is already on its way to this buffer.
            if self
                .store
                .has_open_job_for_destination(destination.id)
                .await?
            {
                debug!(
                    "Open conversion already targets {}; not planning \
                     another",
                    buffer.account_type
                );
                continue;
            }

            // Cap the ask at what the source can actually give.
            let amount =
                threshold.shortfall(buffer.balance).min(source.balance);
            if amount.is_zero() {
                warn!(
                    "Buffer {} needs replenishment but source {} is empty",
                    buffer.account_type, source_type
                );
                continue;
            }

            let trigger = if emergency {
                TriggerReason::Emergency
            } else {
                TriggerReason::BufferReplenishment
            };
            let scheduled_at = if emergency {
                now
            } else {
                now + self.config.batch_window
            };
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("System clock before unix epoch")
                .as_nanos();
            let job = ConversionJob::new(
                direction,
                amount,
                trigger,
                source.id,
                destination.id,
                IdempotencyKey::new(format!(
                    "replenish-{}-{nanos}",
                    buffer.account_type
                )),
                scheduled_at,
                self.config.max_retries,
                now,
            );

            match self.store.insert_job(job).await {
                Ok(()) => {
                    info!(
                        "Planned {direction} of {amount} for {} ({})",
                        buffer.account_type,
                        trigger.as_str()
                    );
                    planned += 1;
                }
                // Same-nanosecond double plan; drop ours.
                Err(StoreError::Conflict(_)) => (),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(planned)
    }

    /// Submits due pending jobs to their selected providers.
    async fn execute_pending_jobs(
        &self,
        now: TimestampMs,
    ) -> Result<(usize, usize), TreasuryError> {
        let due_jobs = self
            .store
            .list_jobs_by_status(JobStatus::Pending)
            .await?
            .into_iter()
            .filter(|job| job.scheduled_at <= now)
            .collect::<Vec<_>>();

        let providers = self.store.list_providers().await?;
        let today = now.utc_date();

        let mut submitted = 0;
        let mut failed = 0;
        for mut job in due_jobs {
            match self
                .submit_job(&mut job, &providers, today, now)
                .await
            {
                Ok(()) => submitted += 1,
                Err(e) => {
                    self.record_submit_failure(&mut job, e, now).await?;
                    if job.status == JobStatus::Failed {
                        failed += 1;
                    }
                }
            }
        }
        Ok((submitted, failed))
    }

    async fn submit_job(
        &self,
        job: &mut ConversionJob,
        providers: &[ConversionProvider],
        today: chrono::NaiveDate,
        now: TimestampMs,
    ) -> Result<(), TreasuryError> {
        let provider = select_provider(
            providers,
            job.amount,
            job.direction,
            self.config.provider_failure_threshold,
            today,
        )?;
        let adapter = self.adapter_for(provider.provider_type)?;
        adapter.validate_amount(job.amount, job.direction)?;

        // Attribute the attempt to this provider up front so a failed
        // initiate still lands on its failure stats.
        job.provider_id = Some(provider.id);

        let response = adapter
            .initiate_conversion(InitiateConversionRequest {
                direction: job.direction,
                amount: job.amount,
                idempotency_key: job.idempotency_key.clone(),
            })
            .await?;

        job.provider_tx_id = Some(response.provider_tx_id.clone());
        job.provider_response = response.provider_response;
        job.status = JobStatus::ProviderSubmitted;
        job.submitted_at = Some(now);
        job.updated_at = now;
        self.store.update_job(job).await?;
        self.store
            .add_provider_volume(provider.id, job.amount, today)
            .await?;

        info!(
            "Job {} submitted to {} as {}",
            job.id, provider.name, response.provider_tx_id
        );
        Ok(())
    }

    /// Applies retry policy after a failed submission attempt.
    async fn record_submit_failure(
        &self,
        job: &mut ConversionJob,
        error: TreasuryError,
        now: TimestampMs,
    ) -> Result<(), TreasuryError> {
        match &error {
            // No provider right now: leave the job pending and try again
            // next cycle without consuming a retry.
            TreasuryError::NoAvailableProvider(e) => {
                warn!("Job {} has no provider: {e}", job.id);
                Ok(())
            }
            TreasuryError::Provider(e) => {
                if let Some(provider_id) = job.provider_id {
                    self.store
                        .record_provider_failure(provider_id, now)
                        .await?;
                }
                if e.is_retryable() && job.can_retry() {
                    let delay = self.retry_delay(job.retry_count + 1);
                    job.requeue_for_retry(now + delay, now);
                    self.store.update_job(job).await?;
                    warn!(
                        "Job {} submit failed (retry {}): {e:#}",
                        job.id, job.retry_count
                    );
                } else {
                    job.fail(
                        e.to_string(),
                        Some("PROVIDER_ERROR".to_owned()),
                        now,
                    );
                    self.store.update_job(job).await?;
                    error!("Job {} failed permanently: {e:#}", job.id);
                }
                Ok(())
            }
            // Store/ledger trouble: abort the cycle, jobs stay as they are.
            _ => Err(error),
        }
    }

    // --- Monitoring --- //

    /// One monitor pass over every job with an open provider-side
    /// conversion, plus any job stuck between provider completion and its
    /// ledger posting.
    #[instrument(skip_all, name = "(monitor-pass)")]
    pub async fn run_monitor_pass(
        &self,
    ) -> Result<MonitorReport, TreasuryError> {
        let now = TimestampMs::now();
        let mut report = MonitorReport::default();

        let provider_types = self.provider_types_by_id().await?;
        let in_flight = self.store.list_in_flight_jobs().await?;
        for mut job in in_flight {
            report.polled += 1;
            let resp = match self.poll_provider(&job, &provider_types).await
            {
                Ok(resp) => resp,
                Err(e) => {
                    // Transient poll failure; the job stays in flight and
                    // the stale sweep has it covered if this persists.
                    warn!("Status poll for job {} failed: {e:#}", job.id);
                    continue;
                }
            };
            match self.apply_status(&mut job, resp, now).await? {
                StatusOutcome::Completed => report.completed += 1,
                StatusOutcome::Failed => report.failed += 1,
                StatusOutcome::Retried => report.retried += 1,
                StatusOutcome::Unchanged => (),
            }
        }

        // Jobs that crashed between provider completion and the ledger
        // posting; the idempotency key makes re-driving safe.
        let stuck = self
            .store
            .list_jobs_by_status(JobStatus::ProviderCompleted)
            .await?;
        for mut job in stuck {
            warn!("Resuming ledger posting for job {}", job.id);
            self.finalize_completed_job(&mut job, None, now).await?;
            report.completed += 1;
        }

        Ok(report)
    }

    async fn provider_types_by_id(
        &self,
    ) -> Result<HashMap<ProviderId, ProviderType>, TreasuryError> {
        Ok(self
            .store
            .list_providers()
            .await?
            .into_iter()
            .map(|provider| (provider.id, provider.provider_type))
            .collect())
    }

    async fn poll_provider(
        &self,
        job: &ConversionJob,
        provider_types: &HashMap<ProviderId, ProviderType>,
    ) -> Result<ConversionStatusResponse, TreasuryError> {
        let provider_id = job.provider_id.ok_or_else(|| {
            TreasuryError::Provider(ProviderError::Unknown(format!(
                "job {} is in flight without a provider",
                job.id
            )))
        })?;
        let provider_type =
            provider_types.get(&provider_id).copied().ok_or_else(|| {
                TreasuryError::Provider(ProviderError::Unknown(format!(
                    "job {} references unknown provider {provider_id}",
                    job.id
                )))
            })?;
        let provider_tx_id = job.provider_tx_id.as_deref().ok_or_else(|| {
            TreasuryError::Provider(ProviderError::Unknown(format!(
                "job {} is in flight without a provider tx id",
                job.id
            )))
        })?;

        let adapter = self.adapter_for(provider_type)?;
        Ok(adapter.get_conversion_status(provider_tx_id).await?)
    }

    /// Maps a provider status onto the job's state machine.
    async fn apply_status(
        &self,
        job: &mut ConversionJob,
        resp: ConversionStatusResponse,
        now: TimestampMs,
    ) -> Result<StatusOutcome, TreasuryError> {
        match resp.status {
            ProviderTxStatus::Pending => Ok(StatusOutcome::Unchanged),
            ProviderTxStatus::Processing => {
                if job.status != JobStatus::ProviderProcessing {
                    job.status = JobStatus::ProviderProcessing;
                    job.updated_at = now;
                    self.store.update_job(job).await?;
                }
                Ok(StatusOutcome::Unchanged)
            }
            ProviderTxStatus::Completed => {
                self.finalize_completed_job(job, Some(resp), now).await?;
                Ok(StatusOutcome::Completed)
            }
            ProviderTxStatus::Failed => {
                if let Some(provider_id) = job.provider_id {
                    self.store
                        .record_provider_failure(provider_id, now)
                        .await?;
                }
                let reason = resp
                    .failure_reason
                    .unwrap_or_else(|| "provider reported failure".to_owned());
                if job.can_retry() {
                    let delay = self.retry_delay(job.retry_count + 1);
                    job.requeue_for_retry(now + delay, now);
                    self.store.update_job(job).await?;
                    info!(
                        "Job {} failed at provider, re-queued (retry {}): \
                         {reason}",
                        job.id, job.retry_count
                    );
                    Ok(StatusOutcome::Retried)
                } else {
                    job.fail(reason, Some("PROVIDER_FAILED".to_owned()), now);
                    self.store.update_job(job).await?;
                    Ok(StatusOutcome::Failed)
                }
            }
            ProviderTxStatus::Cancelled => {
                job.status = JobStatus::Cancelled;
                job.updated_at = now;
                self.store.update_job(job).await?;
                Ok(StatusOutcome::Failed)
            }
        }
    }

    /// Posts the conversion to the ledger and closes the job.
    ///
    /// The ledger pair debits the destination account in the destination
    /// currency for the provider-reported fill, and credits the source
    /// account in the source currency for the submitted amount; a divergent
    /// fill is honored as-is. The posting is keyed on the job id, so
    /// re-driving after a crash replays instead of double-posting.
    async fn finalize_completed_job(
        &self,
        job: &mut ConversionJob,
        resp: Option<ConversionStatusResponse>,
        now: TimestampMs,
    ) -> Result<(), TreasuryError> {
        // Mark provider completion first; if we crash before the ledger
        // posting, the next monitor pass resumes from here.
        if job.status != JobStatus::ProviderCompleted {
            job.status = JobStatus::ProviderCompleted;
            job.provider_completed_at = Some(now);
            job.updated_at = now;
            self.store.update_job(job).await?;
        }

        let destination_amount = resp
            .as_ref()
            .and_then(|resp| resp.destination_amount)
            .unwrap_or(job.amount);
        let rate = resp.as_ref().and_then(|resp| resp.rate);
        let fees = resp.as_ref().and_then(|resp| resp.fees);

        let entries = vec![
            NewEntry::debit(
                job.destination_account_id,
                destination_amount,
                job.direction.destination_currency(),
            )
            .describe("conversion: destination leg"),
            NewEntry::credit(
                job.source_account_id,
                job.amount,
                job.direction.source_currency(),
            )
            .describe("conversion: source leg"),
        ];

        let transaction = self
            .ledger
            .create_transaction(CreateTransactionRequest {
                user_id: None,
                txn_type: TxnType::Conversion,
                reference: Some(Reference::new(
                    ReferenceKind::ConversionJob,
                    job.id,
                )),
                idempotency_key: IdempotencyKey::new(format!(
                    "conversion-{}",
                    job.id
                )),
                description: Some(format!(
                    "{} conversion of {}",
                    job.direction, job.amount
                )),
                metadata: serde_json::json!({
                    "provider_tx_id": job.provider_tx_id,
                    "rate": rate,
                    "fees": fees,
                }),
                entries,
            })
            .await?;

        job.ledger_transaction_id = Some(transaction.id);
        job.status = JobStatus::Completed;
        job.completed_at = Some(now);
        job.updated_at = now;
        self.store.update_job(job).await?;

        if let Some(provider_id) = job.provider_id {
            self.store.record_provider_success(provider_id, now).await?;
        }

        info!(
            "Job {} completed: {} {} -> {} {}, ledger txn {}",
            job.id,
            job.amount,
            job.direction.source_currency(),
            destination_amount,
            job.direction.destination_currency(),
            transaction.id,
        );
        Ok(())
    }

    /// The delay before retry attempt number `attempt`, scaled by the
    /// configured multiplier.
    fn retry_delay(&self, attempt: u32) -> Duration {
        const RETRY_BASE: Duration = Duration::from_secs(30);
        let factor = (1..attempt).fold(Decimal::ONE, |acc, _| {
            acc * self.config.retry_backoff_multiplier
        });
        let millis = (Decimal::from(RETRY_BASE.as_millis() as u64) * factor)
            .to_u64()
            .unwrap_or(u64::MAX);
        Duration::from_millis(millis)
    }
}

enum StatusOutcome {
    Unchanged,
    Retried,
    Completed,
    Failed,
}
