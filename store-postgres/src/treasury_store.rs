use async_trait::async_trait;
use chrono::NaiveDate;
use common::{
    amount::Amount,
    ids::{AccountId, ConversionJobId, IdempotencyKey, ProviderId, TxnId},
    store::StoreError,
    time::TimestampMs,
};
use rust_decimal::Decimal;
use sqlx::{postgres::PgRow, Row};
use treasury::{
    BufferThreshold, ConversionJob, ConversionProvider, JobStatus,
    TreasuryStore,
};
use uuid::Uuid;

use crate::{
    amount, map_sqlx_err, opt_timestamp, parse_enum, parse_from_str,
    timestamp, PgStore,
};

fn provider_from_row(row: &PgRow) -> Result<ConversionProvider, StoreError> {
    let provider_type_raw: String =
        row.try_get("provider_type").map_err(map_sqlx_err)?;
    let status_raw: String = row.try_get("status").map_err(map_sqlx_err)?;
    Ok(ConversionProvider {
        id: ProviderId::from_uuid(row.try_get("id").map_err(map_sqlx_err)?),
        name: row.try_get("name").map_err(map_sqlx_err)?,
        provider_type: parse_enum(&provider_type_raw)?,
        priority: row.try_get::<i32, _>("priority").map_err(map_sqlx_err)?
            as u32,
        status: parse_enum(&status_raw)?,
        supports_usdc_to_usd: row
            .try_get("supports_usdc_to_usd")
            .map_err(map_sqlx_err)?,
        supports_usd_to_usdc: row
            .try_get("supports_usd_to_usdc")
            .map_err(map_sqlx_err)?,
        min_conversion_amount: amount(
            row.try_get::<Decimal, _>("min_conversion_amount")
                .map_err(map_sqlx_err)?,
        )?,
        max_conversion_amount: amount(
            row.try_get::<Decimal, _>("max_conversion_amount")
                .map_err(map_sqlx_err)?,
        )?,
        daily_volume_limit: amount(
            row.try_get::<Decimal, _>("daily_volume_limit")
                .map_err(map_sqlx_err)?,
        )?,
        daily_volume_used: amount(
            row.try_get::<Decimal, _>("daily_volume_used")
                .map_err(map_sqlx_err)?,
        )?,
        volume_day: row.try_get("volume_day").map_err(map_sqlx_err)?,
        success_count: row
            .try_get::<i64, _>("success_count")
            .map_err(map_sqlx_err)? as u64,
        failure_count: row
            .try_get::<i64, _>("failure_count")
            .map_err(map_sqlx_err)? as u64,
        last_success_at: opt_timestamp(
            row.try_get("last_success_at").map_err(map_sqlx_err)?,
        )?,
        last_failure_at: opt_timestamp(
            row.try_get("last_failure_at").map_err(map_sqlx_err)?,
        )?,
        created_at: timestamp(
            row.try_get("created_at").map_err(map_sqlx_err)?,
        )?,
        updated_at: timestamp(
            row.try_get("updated_at").map_err(map_sqlx_err)?,
        )?,
    })
}

fn threshold_from_row(row: &PgRow) -> Result<BufferThreshold, StoreError> {
    let account_type_raw: String =
        row.try_get("account_type").map_err(map_sqlx_err)?;
    Ok(BufferThreshold {
        id: row.try_get("id").map_err(map_sqlx_err)?,
        account_type: parse_from_str(&account_type_raw)?,
        min: amount(
            row.try_get::<Decimal, _>("min_amount").map_err(map_sqlx_err)?,
        )?,
        target: amount(
            row.try_get::<Decimal, _>("target_amount")
                .map_err(map_sqlx_err)?,
        )?,
        max: amount(
            row.try_get::<Decimal, _>("max_amount").map_err(map_sqlx_err)?,
        )?,
        batch_size: amount(
            row.try_get::<Decimal, _>("batch_size").map_err(map_sqlx_err)?,
        )?,
        created_at: timestamp(
            row.try_get("created_at").map_err(map_sqlx_err)?,
        )?,
        updated_at: timestamp(
            row.try_get("updated_at").map_err(map_sqlx_err)?,
        )?,
    })
}

fn job_from_row(row: &PgRow) -> Result<ConversionJob, StoreError> {
    let direction_raw: String =
        row.try_get("direction").map_err(map_sqlx_err)?;
    let status_raw: String = row.try_get("status").map_err(map_sqlx_err)?;
    let trigger_raw: String =
        row.try_get("trigger_reason").map_err(map_sqlx_err)?;
    Ok(ConversionJob {
        id: ConversionJobId::from_uuid(
            row.try_get("id").map_err(map_sqlx_err)?,
        ),
        direction: parse_enum(&direction_raw)?,
        amount: amount(
            row.try_get::<Decimal, _>("amount").map_err(map_sqlx_err)?,
        )?,
        status: parse_enum(&status_raw)?,
        trigger_reason: parse_enum(&trigger_raw)?,
        source_account_id: AccountId::from_uuid(
            row.try_get("source_account_id").map_err(map_sqlx_err)?,
        ),
        destination_account_id: AccountId::from_uuid(
            row.try_get("destination_account_id").map_err(map_sqlx_err)?,
        ),
        provider_id: row
            .try_get::<Option<Uuid>, _>("provider_id")
            .map_err(map_sqlx_err)?
            .map(ProviderId::from_uuid),
        provider_tx_id: row
            .try_get("provider_tx_id")
            .map_err(map_sqlx_err)?,
        provider_response: row
            .try_get("provider_response")
            .map_err(map_sqlx_err)?,
        ledger_transaction_id: row
            .try_get::<Option<Uuid>, _>("ledger_transaction_id")
            .map_err(map_sqlx_err)?
            .map(TxnId::from_uuid),
        scheduled_at: timestamp(
            row.try_get("scheduled_at").map_err(map_sqlx_err)?,
        )?,
        submitted_at: opt_timestamp(
            row.try_get("submitted_at").map_err(map_sqlx_err)?,
        )?,
        provider_completed_at: opt_timestamp(
            row.try_get("provider_completed_at").map_err(map_sqlx_err)?,
        )?,
        completed_at: opt_timestamp(
            row.try_get("completed_at").map_err(map_sqlx_err)?,
        )?,
        failed_at: opt_timestamp(
            row.try_get("failed_at").map_err(map_sqlx_err)?,
        )?,
        error_message: row.try_get("error_message").map_err(map_sqlx_err)?,
        error_code: row.try_get("error_code").map_err(map_sqlx_err)?,
        retry_count: row
            .try_get::<i32, _>("retry_count")
            .map_err(map_sqlx_err)? as u32,
        max_retries: row
            .try_get::<i32, _>("max_retries")
            .map_err(map_sqlx_err)? as u32,
        idempotency_key: IdempotencyKey::new(
            row.try_get::<String, _>("idempotency_key")
                .map_err(map_sqlx_err)?,
        ),
        created_at: timestamp(
            row.try_get("created_at").map_err(map_sqlx_err)?,
        )?,
        updated_at: timestamp(
            row.try_get("updated_at").map_err(map_sqlx_err)?,
        )?,
    })
}

#[async_trait]
impl TreasuryStore for PgStore {
    async fn list_providers(
        &self,
    ) -> Result<Vec<ConversionProvider>, StoreError> {
        // created_at, id ordering keeps selection tie-breaks stable.
        sqlx::query(
            "SELECT * FROM conversion_providers ORDER BY created_at, id",
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_err)?
        .iter()
        .map(provider_from_row)
        .collect()
    }

    async fn upsert_provider(
        &self,
        provider: ConversionProvider,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO conversion_providers \
             (id, name, provider_type, priority, status, \
              supports_usdc_to_usd, supports_usd_to_usdc, \
              min_conversion_amount, max_conversion_amount, \
              daily_volume_limit, daily_volume_used, volume_day, \
              success_count, failure_count, last_success_at, \
              last_failure_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, \
                     $13, $14, $15, $16, $17, $18) \
             ON CONFLICT (name) DO UPDATE SET \
                 provider_type = EXCLUDED.provider_type, \
                 priority = EXCLUDED.priority, \
                 status = EXCLUDED.status, \
                 supports_usdc_to_usd = EXCLUDED.supports_usdc_to_usd, \
                 supports_usd_to_usdc = EXCLUDED.supports_usd_to_usdc, \
                 min_conversion_amount = EXCLUDED.min_conversion_amount, \
                 max_conversion_amount = EXCLUDED.max_conversion_amount, \
                 daily_volume_limit = EXCLUDED.daily_volume_limit, \
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(provider.id.as_uuid())
        .bind(&provider.name)
        .bind(provider.provider_type.as_str())
        .bind(provider.priority as i32)
        .bind(match provider.status {
            treasury::ProviderStatus::Active => "active",
            treasury::ProviderStatus::Inactive => "inactive",
        })
        .bind(provider.supports_usdc_to_usd)
        .bind(provider.supports_usd_to_usdc)
        .bind(provider.min_conversion_amount.to_decimal())
        .bind(provider.max_conversion_amount.to_decimal())
        .bind(provider.daily_volume_limit.to_decimal())
        .bind(provider.daily_volume_used.to_decimal())
        .bind(provider.volume_day)
        .bind(provider.success_count as i64)
        .bind(provider.failure_count as i64)
        .bind(provider.last_success_at.map(|at| at.as_i64()))
        .bind(provider.last_failure_at.map(|at| at.as_i64()))
        .bind(provider.created_at.as_i64())
        .bind(provider.updated_at.as_i64())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn record_provider_success(
        &self,
        id: ProviderId,
        now: TimestampMs,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE conversion_providers \
             SET success_count = success_count + 1, last_success_at = $2, \
                 updated_at = $2 \
             WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(now.as_i64())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn record_provider_failure(
        &self,
        id: ProviderId,
        now: TimestampMs,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE conversion_providers \
             SET failure_count = failure_count + 1, last_failure_at = $2, \
                 updated_at = $2 \
             WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(now.as_i64())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn add_provider_volume(
        &self,
        id: ProviderId,
        amount: Amount,
        day: NaiveDate,
    ) -> Result<(), StoreError> {
        // A counter carried over from a previous day resets to zero first.
        sqlx::query(
            "UPDATE conversion_providers \
             SET daily_volume_used = CASE \
                     WHEN volume_day = $3 THEN daily_volume_used + $2 \
                     ELSE $2 \
                 END, \
                 volume_day = $3 \
             WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(amount.to_decimal())
        .bind(day)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn list_thresholds(
        &self,
    ) -> Result<Vec<BufferThreshold>, StoreError> {
        sqlx::query("SELECT * FROM buffer_thresholds ORDER BY account_type")
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_err)?
            .iter()
            .map(threshold_from_row)
            .collect()
    }

    async fn upsert_threshold(
        &self,
        threshold: BufferThreshold,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO buffer_thresholds \
             (id, account_type, min_amount, target_amount, max_amount, \
              batch_size, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (account_type) DO UPDATE SET \
                 min_amount = EXCLUDED.min_amount, \
                 target_amount = EXCLUDED.target_amount, \
                 max_amount = EXCLUDED.max_amount, \
                 batch_size = EXCLUDED.batch_size, \
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(threshold.id)
        .bind(threshold.account_type.as_str())
        .bind(threshold.min.to_decimal())
        .bind(threshold.target.to_decimal())
        .bind(threshold.max.to_decimal())
        .bind(threshold.batch_size.to_decimal())
        .bind(threshold.created_at.as_i64())
        .bind(threshold.updated_at.as_i64())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn insert_job(&self, job: ConversionJob) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO conversion_jobs \
             (id, direction, amount, status, trigger_reason, \
              source_account_id, destination_account_id, provider_id, \
              provider_tx_id, provider_response, ledger_transaction_id, \
              scheduled_at, submitted_at, provider_completed_at, \
              completed_at, failed_at, error_message, error_code, \
              retry_count, max_retries, idempotency_key, created_at, \
              updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, \
                     $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23)",
        )
        .bind(job.id.as_uuid())
        .bind(job.direction.as_str())
        .bind(job.amount.to_decimal())
        .bind(job.status.as_str())
        .bind(job.trigger_reason.as_str())
        .bind(job.source_account_id.as_uuid())
        .bind(job.destination_account_id.as_uuid())
        .bind(job.provider_id.map(|id| *id.as_uuid()))
        .bind(job.provider_tx_id.as_deref())
        .bind(&job.provider_response)
        .bind(job.ledger_transaction_id.map(|id| *id.as_uuid()))
        .bind(job.scheduled_at.as_i64())
        .bind(job.submitted_at.map(|at| at.as_i64()))
        .bind(job.provider_completed_at.map(|at| at.as_i64()))
        .bind(job.completed_at.map(|at| at.as_i64()))
        .bind(job.failed_at.map(|at| at.as_i64()))
        .bind(job.error_message.as_deref())
        .bind(job.error_code.as_deref())
        .bind(job.retry_count as i32)
        .bind(job.max_retries as i32)
        .bind(job.idempotency_key.as_str())
        .bind(job.created_at.as_i64())
        .bind(job.updated_at.as_i64())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn update_job(
        &self,
        job: &ConversionJob,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            "UPDATE conversion_jobs SET \
                 status = $2, provider_id = $3, provider_tx_id = $4, \
                 provider_response = $5, ledger_transaction_id = $6, \
                 scheduled_at = $7, submitted_at = $8, \
                 provider_completed_at = $9, completed_at = $10, \
                 failed_at = $11, error_message = $12, error_code = $13, \
                 retry_count = $14, updated_at = $15 \
             WHERE id = $1",
        )
        .bind(job.id.as_uuid())
        .bind(job.status.as_str())
        .bind(job.provider_id.map(|id| *id.as_uuid()))
        .bind(job.provider_tx_id.as_deref())
        .bind(&job.provider_response)
        .bind(job.ledger_transaction_id.map(|id| *id.as_uuid()))
        .bind(job.scheduled_at.as_i64())
        .bind(job.submitted_at.map(|at| at.as_i64()))
        .bind(job.provider_completed_at.map(|at| at.as_i64()))
        .bind(job.completed_at.map(|at| at.as_i64()))
        .bind(job.failed_at.map(|at| at.as_i64()))
        .bind(job.error_message.as_deref())
        .bind(job.error_code.as_deref())
        .bind(job.retry_count as i32)
        .bind(job.updated_at.as_i64())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_err)?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("job {}", job.id)));
        }
        Ok(())
    }

    async fn get_job(
        &self,
        id: ConversionJobId,
    ) -> Result<Option<ConversionJob>, StoreError> {
        sqlx::query("SELECT * FROM conversion_jobs WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_err)?
            .as_ref()
            .map(job_from_row)
            .transpose()
    }

    async fn list_jobs_by_status(
        &self,
        status: JobStatus,
    ) -> Result<Vec<ConversionJob>, StoreError> {
        sqlx::query(
            "SELECT * FROM conversion_jobs WHERE status = $1 \
             ORDER BY created_at, id",
        )
        .bind(status.as_str())
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_err)?
        .iter()
        .map(job_from_row)
        .collect()
    }

    async fn list_in_flight_jobs(
        &self,
    ) -> Result<Vec<ConversionJob>, StoreError> {
        sqlx::query(
            "SELECT * FROM conversion_jobs \
             WHERE status IN ('provider_submitted', 'provider_processing') \
             ORDER BY created_at, id",
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_err)?
        .iter()
        .map(job_from_row)
        .collect()
    }

    async fn has_open_job_for_destination(
        &self,
        destination_account_id: AccountId,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT EXISTS ( \
                 SELECT 1 FROM conversion_jobs \
                 WHERE destination_account_id = $1 \
                   AND status NOT IN ('completed', 'failed', 'cancelled') \
             ) AS open",
        )
        .bind(destination_account_id.as_uuid())
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_err)?;
        row.try_get("open").map_err(map_sqlx_err)
    }
}
