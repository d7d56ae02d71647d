use async_trait::async_trait;
use chain::{
    ChainName, ErrorClass, FundingEvent, FundingQueueStore, NewFundingEvent,
    TokenSymbol, TxHash,
};
use common::{
    ids::FundingEventId, store::StoreError, time::TimestampMs,
};
use rust_decimal::Decimal;
use sqlx::{postgres::PgRow, Row};

use crate::{amount, map_sqlx_err, opt_timestamp, parse_enum, timestamp, PgStore};

fn event_from_row(row: &PgRow) -> Result<FundingEvent, StoreError> {
    let status_raw: String = row.try_get("status").map_err(map_sqlx_err)?;
    let error_type_raw: Option<String> =
        row.try_get("error_type").map_err(map_sqlx_err)?;
    Ok(FundingEvent {
        id: FundingEventId::from_uuid(
            row.try_get("id").map_err(map_sqlx_err)?,
        ),
        tx_hash: TxHash::new(
            row.try_get::<String, _>("tx_hash").map_err(map_sqlx_err)?,
        ),
        chain: ChainName::new(
            row.try_get::<String, _>("chain").map_err(map_sqlx_err)?,
        ),
        token: TokenSymbol::new(
            row.try_get::<String, _>("token").map_err(map_sqlx_err)?,
        ),
        amount: amount(
            row.try_get::<Decimal, _>("amount").map_err(map_sqlx_err)?,
        )?,
        to_address: row.try_get("to_address").map_err(map_sqlx_err)?,
        status: parse_enum(&status_raw)?,
        attempt_count: row
            .try_get::<i32, _>("attempt_count")
            .map_err(map_sqlx_err)? as u32,
        max_attempts: row
            .try_get::<i32, _>("max_attempts")
            .map_err(map_sqlx_err)? as u32,
        last_error: row.try_get("last_error").map_err(map_sqlx_err)?,
        error_type: error_type_raw
            .as_deref()
            .map(parse_enum::<ErrorClass>)
            .transpose()?,
        first_seen_at: timestamp(
            row.try_get("first_seen_at").map_err(map_sqlx_err)?,
        )?,
        last_attempt_at: opt_timestamp(
            row.try_get("last_attempt_at").map_err(map_sqlx_err)?,
        )?,
        next_retry_at: opt_timestamp(
            row.try_get("next_retry_at").map_err(map_sqlx_err)?,
        )?,
        completed_at: opt_timestamp(
            row.try_get("completed_at").map_err(map_sqlx_err)?,
        )?,
        moved_to_dlq_at: opt_timestamp(
            row.try_get("moved_to_dlq_at").map_err(map_sqlx_err)?,
        )?,
        webhook_payload: row
            .try_get("webhook_payload")
            .map_err(map_sqlx_err)?,
        processing_logs: row
            .try_get("processing_logs")
            .map_err(map_sqlx_err)?,
    })
}

#[async_trait]
impl FundingQueueStore for PgStore {
    async fn enqueue(
        &self,
        new: NewFundingEvent,
        max_attempts: u32,
    ) -> Result<Option<FundingEvent>, StoreError> {
        let event =
            FundingEvent::new(new, max_attempts, TimestampMs::now());
        // Duplicate deliveries of the same chain event are silently
        // absorbed by the (tx_hash, chain) unique constraint.
        let inserted = sqlx::query(
            "INSERT INTO funding_event_jobs \
             (id, tx_hash, chain, token, amount, to_address, status, \
              attempt_count, max_attempts, first_seen_at, webhook_payload, \
              processing_logs) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (tx_hash, chain) DO NOTHING",
        )
        .bind(event.id.as_uuid())
        .bind(event.tx_hash.as_str())
        .bind(event.chain.as_str())
        .bind(event.token.as_str())
        .bind(event.amount.to_decimal())
        .bind(&event.to_address)
        .bind(event.status.as_str())
        .bind(event.attempt_count as i32)
        .bind(event.max_attempts as i32)
        .bind(event.first_seen_at.as_i64())
        .bind(&event.webhook_payload)
        .bind(&event.processing_logs)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_err)?;

        Ok((inserted.rows_affected() == 1).then_some(event))
    }

    async fn claim_batch(
        &self,
        batch: usize,
        now: TimestampMs,
    ) -> Result<Vec<FundingEvent>, StoreError> {
        // SKIP LOCKED is what makes the multi-worker fan-out safe: a row
        // claimed by one worker's transaction is invisible to the others.
        sqlx::query(
            "UPDATE funding_event_jobs SET status = 'processing', \
                    last_attempt_at = $2 \
             WHERE id IN ( \
                 SELECT id FROM funding_event_jobs \
                 WHERE status = 'pending' \
                    OR (status = 'failed' AND next_retry_at <= $2) \
                 ORDER BY first_seen_at \
                 LIMIT $1 \
                 FOR UPDATE SKIP LOCKED) \
             RETURNING *",
        )
        .bind(batch as i64)
        .bind(now.as_i64())
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_err)?
        .iter()
        .map(event_from_row)
        .collect()
    }

    async fn complete(
        &self,
        event: &FundingEvent,
        log_line: String,
        now: TimestampMs,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            "UPDATE funding_event_jobs \
             SET status = 'completed', attempt_count = attempt_count + 1, \
                 completed_at = $2, \
                 processing_logs = array_append(processing_logs, $3) \
             WHERE id = $1",
        )
        .bind(event.id.as_uuid())
        .bind(now.as_i64())
        .bind(&log_line)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_err)?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::not_found(format!(
                "funding event {}",
                event.id
            )));
        }
        Ok(())
    }

    async fn fail(
        &self,
        event: &FundingEvent,
        error: String,
        error_type: ErrorClass,
        next_retry_at: Option<TimestampMs>,
        log_line: String,
        now: TimestampMs,
    ) -> Result<(), StoreError> {
        let error_type_str = match error_type {
            ErrorClass::Permanent => "permanent",
            ErrorClass::Transient => "transient",
        };
        let (status, moved_to_dlq_at) = match next_retry_at {
            Some(_) => ("failed", None),
            None => ("dlq", Some(now.as_i64())),
        };
        let updated = sqlx::query(
            "UPDATE funding_event_jobs \
             SET status = $2, attempt_count = attempt_count + 1, \
                 last_error = $3, error_type = $4, last_attempt_at = $5, \
                 next_retry_at = $6, moved_to_dlq_at = $7, \
                 processing_logs = array_append(processing_logs, $8) \
             WHERE id = $1",
        )
        .bind(event.id.as_uuid())
        .bind(status)
        .bind(&error)
        .bind(error_type_str)
        .bind(now.as_i64())
        .bind(next_retry_at.map(|at| at.as_i64()))
        .bind(moved_to_dlq_at)
        .bind(&log_line)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_err)?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::not_found(format!(
                "funding event {}",
                event.id
            )));
        }
        Ok(())
    }

    async fn get(
        &self,
        tx_hash: &TxHash,
        chain: &ChainName,
    ) -> Result<Option<FundingEvent>, StoreError> {
        sqlx::query(
            "SELECT * FROM funding_event_jobs \
             WHERE tx_hash = $1 AND chain = $2",
        )
        .bind(tx_hash.as_str())
        .bind(chain.as_str())
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_err)?
        .as_ref()
        .map(event_from_row)
        .transpose()
    }

    async fn count_pending(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query(
            "SELECT COUNT(*) AS n FROM funding_event_jobs \
             WHERE status IN ('pending', 'failed')",
        )
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_err)?
        .try_get("n")
        .map_err(map_sqlx_err)?;
        Ok(count as u64)
    }

    async fn list_dlq(
        &self,
        limit: usize,
    ) -> Result<Vec<FundingEvent>, StoreError> {
        sqlx::query(
            "SELECT * FROM funding_event_jobs WHERE status = 'dlq' \
             ORDER BY first_seen_at LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_err)?
        .iter()
        .map(event_from_row)
        .collect()
    }
}
