use async_trait::async_trait;
use chrono::NaiveDate;
use common::{
    amount::Amount,
    ids::{AccountId, ConversionJobId, ProviderId},
    store::StoreError,
    time::TimestampMs,
};
use treasury::{
    BufferThreshold, ConversionJob, ConversionProvider, JobStatus,
    TreasuryStore,
};

use crate::MemStore;

#[async_trait]
impl TreasuryStore for MemStore {
    async fn list_providers(
        &self,
    ) -> Result<Vec<ConversionProvider>, StoreError> {
        let mut providers: Vec<ConversionProvider> =
            self.lock().providers.values().cloned().collect();
        // Stable listing order so selection tie-breaks are deterministic.
        providers.sort_by(|a, b| {
            a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name))
        });
        Ok(providers)
    }

    async fn upsert_provider(
        &self,
        provider: ConversionProvider,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        if let Some(existing_id) = state.provider_by_name.get(&provider.name)
        {
            let existing_id = *existing_id;
            let mut replacement = provider;
            replacement.id = existing_id;
            state.providers.insert(existing_id, replacement);
            return Ok(());
        }
        state
            .provider_by_name
            .insert(provider.name.clone(), provider.id);
        state.providers.insert(provider.id, provider);
        Ok(())
    }

    async fn record_provider_success(
        &self,
        id: ProviderId,
        now: TimestampMs,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        let provider = state.providers.get_mut(&id).ok_or_else(|| {
            StoreError::not_found(format!("provider {id}"))
        })?;
        provider.success_count += 1;
        provider.last_success_at = Some(now);
        provider.updated_at = now;
        Ok(())
    }

    async fn record_provider_failure(
        &self,
        id: ProviderId,
        now: TimestampMs,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        let provider = state.providers.get_mut(&id).ok_or_else(|| {
            StoreError::not_found(format!("provider {id}"))
        })?;
        provider.failure_count += 1;
        provider.last_failure_at = Some(now);
        provider.updated_at = now;
        Ok(())
    }

    async fn add_provider_volume(
        &self,
        id: ProviderId,
        amount: Amount,
        day: NaiveDate,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        let provider = state.providers.get_mut(&id).ok_or_else(|| {
            StoreError::not_found(format!("provider {id}"))
        })?;
        if provider.volume_day != day {
            provider.volume_day = day;
            provider.daily_volume_used = Amount::ZERO;
        }
        provider.daily_volume_used = provider.daily_volume_used + amount;
        Ok(())
    }

    async fn list_thresholds(
        &self,
    ) -> Result<Vec<BufferThreshold>, StoreError> {
        Ok(self.lock().thresholds.values().cloned().collect())
    }

    async fn upsert_threshold(
        &self,
        threshold: BufferThreshold,
    ) -> Result<(), StoreError> {
        self.lock()
            .thresholds
            .insert(threshold.account_type, threshold);
        Ok(())
    }

    async fn insert_job(&self, job: ConversionJob) -> Result<(), StoreError> {
        let mut state = self.lock();
        let key = job.idempotency_key.as_str().to_owned();
        if state.job_by_idempotency_key.contains_key(&key) {
            return Err(StoreError::conflict(format!(
                "conversion job idempotency key {key}"
            )));
        }
        state.job_by_idempotency_key.insert(key, job.id);
        state.jobs.insert(job.id, job);
        Ok(())
    }

    async fn update_job(
        &self,
        job: &ConversionJob,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        if !state.jobs.contains_key(&job.id) {
            return Err(StoreError::not_found(format!("job {}", job.id)));
        }
        state.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(
        &self,
        id: ConversionJobId,
    ) -> Result<Option<ConversionJob>, StoreError> {
        Ok(self.lock().jobs.get(&id).cloned())
    }

    async fn list_jobs_by_status(
        &self,
        status: JobStatus,
    ) -> Result<Vec<ConversionJob>, StoreError> {
        let mut jobs: Vec<ConversionJob> = self
            .lock()
            .jobs
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    async fn list_in_flight_jobs(
        &self,
    ) -> Result<Vec<ConversionJob>, StoreError> {
        let mut jobs: Vec<ConversionJob> = self
            .lock()
            .jobs
            .values()
            .filter(|job| job.status.is_in_flight())
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    async fn has_open_job_for_destination(
        &self,
        destination_account_id: AccountId,
    ) -> Result<bool, StoreError> {
        Ok(self.lock().jobs.values().any(|job| {
            job.destination_account_id == destination_account_id
                && !job.status.is_terminal()
        }))
    }
}
