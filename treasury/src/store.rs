use async_trait::async_trait;
use chrono::NaiveDate;
use common::{
    amount::Amount,
    ids::{AccountId, ConversionJobId, ProviderId},
    store::StoreError,
    time::TimestampMs,
};

use crate::{
    job::{ConversionJob, JobStatus},
    provider::ConversionProvider,
    thresholds::BufferThreshold,
};

/// Persistence seam for providers, thresholds and conversion jobs.
///
/// Job rows have a single logical writer at any time (the settlement loop
/// or the monitor loop, never both for the same status bucket), so
/// [`update_job`] may replace the whole row.
///
/// [`update_job`]: TreasuryStore::update_job
#[async_trait]
pub trait TreasuryStore: Send + Sync + 'static {
    // --- Providers --- //

    async fn list_providers(
        &self,
    ) -> Result<Vec<ConversionProvider>, StoreError>;

    /// Insert or replace by unique `name`.
    async fn upsert_provider(
        &self,
        provider: ConversionProvider,
    ) -> Result<(), StoreError>;

    async fn record_provider_success(
        &self,
        id: ProviderId,
        now: TimestampMs,
    ) -> Result<(), StoreError>;

    async fn record_provider_failure(
        &self,
        id: ProviderId,
        now: TimestampMs,
    ) -> Result<(), StoreError>;

    /// Adds `amount` to the provider's volume counter for `day`; a counter
    /// carried over from a previous day is reset first.
    async fn add_provider_volume(
        &self,
        id: ProviderId,
        amount: Amount,
        day: NaiveDate,
    ) -> Result<(), StoreError>;

    // --- Thresholds --- //

    async fn list_thresholds(
        &self,
    ) -> Result<Vec<BufferThreshold>, StoreError>;

    /// Insert or replace by unique `account_type`.
    async fn upsert_threshold(
        &self,
        threshold: BufferThreshold,
    ) -> Result<(), StoreError>;

    // --- Conversion jobs --- //

    /// Insert; `idempotency_key` is unique and a duplicate returns
    /// [`StoreError::Conflict`].
    async fn insert_job(&self, job: ConversionJob) -> Result<(), StoreError>;

    async fn update_job(
        &self,
        job: &ConversionJob,
    ) -> Result<(), StoreError>;

    async fn get_job(
        &self,
        id: ConversionJobId,
    ) -> Result<Option<ConversionJob>, StoreError>;

    async fn list_jobs_by_status(
        &self,
        status: JobStatus,
    ) -> Result<Vec<ConversionJob>, StoreError>;

    /// Jobs with an open provider-side conversion
    /// (`provider_submitted` | `provider_processing`).
    async fn list_in_flight_jobs(
        &self,
    ) -> Result<Vec<ConversionJob>, StoreError>;

    /// Whether a non-terminal job already targets this destination account.
    /// Used to avoid planning duplicate replenishments.
    async fn has_open_job_for_destination(
        &self,
        destination_account_id: AccountId,
    ) -> Result<bool, StoreError>;
}
