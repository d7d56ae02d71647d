use allocation::{
    AllocationEvent, AllocationEventType, AllocationMode, AllocationStore,
    WeeklyAllocationSummary,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use common::{
    ids::{AllocationEventId, TxnId, UserId},
    store::StoreError,
};
use rust_decimal::Decimal;
use sqlx::{postgres::PgRow, Row};

use crate::{amount, map_sqlx_err, opt_timestamp, parse_enum, timestamp, PgStore};

fn mode_from_row(row: &PgRow) -> Result<AllocationMode, StoreError> {
    Ok(AllocationMode {
        user_id: UserId::from_uuid(
            row.try_get("user_id").map_err(map_sqlx_err)?,
        ),
        active: row.try_get("active").map_err(map_sqlx_err)?,
        ratio_spending: row
            .try_get("ratio_spending")
            .map_err(map_sqlx_err)?,
        ratio_stash: row.try_get("ratio_stash").map_err(map_sqlx_err)?,
        paused_at: opt_timestamp(
            row.try_get("paused_at").map_err(map_sqlx_err)?,
        )?,
        resumed_at: opt_timestamp(
            row.try_get("resumed_at").map_err(map_sqlx_err)?,
        )?,
        created_at: timestamp(
            row.try_get("created_at").map_err(map_sqlx_err)?,
        )?,
        updated_at: timestamp(
            row.try_get("updated_at").map_err(map_sqlx_err)?,
        )?,
    })
}

fn event_from_row(row: &PgRow) -> Result<AllocationEvent, StoreError> {
    let event_type_raw: String =
        row.try_get("event_type").map_err(map_sqlx_err)?;
    Ok(AllocationEvent {
        id: AllocationEventId::from_uuid(
            row.try_get("id").map_err(map_sqlx_err)?,
        ),
        user_id: UserId::from_uuid(
            row.try_get("user_id").map_err(map_sqlx_err)?,
        ),
        total: amount(
            row.try_get::<Decimal, _>("total").map_err(map_sqlx_err)?,
        )?,
        stash_amount: amount(
            row.try_get::<Decimal, _>("stash_amount")
                .map_err(map_sqlx_err)?,
        )?,
        spending_amount: amount(
            row.try_get::<Decimal, _>("spending_amount")
                .map_err(map_sqlx_err)?,
        )?,
        event_type: parse_enum::<AllocationEventType>(&event_type_raw)?,
        source_txn_id: TxnId::from_uuid(
            row.try_get("source_txn_id").map_err(map_sqlx_err)?,
        ),
        metadata: row.try_get("metadata").map_err(map_sqlx_err)?,
        created_at: timestamp(
            row.try_get("created_at").map_err(map_sqlx_err)?,
        )?,
    })
}

fn summary_from_row(
    row: &PgRow,
) -> Result<WeeklyAllocationSummary, StoreError> {
    Ok(WeeklyAllocationSummary {
        id: row.try_get("id").map_err(map_sqlx_err)?,
        user_id: UserId::from_uuid(
            row.try_get("user_id").map_err(map_sqlx_err)?,
        ),
        week_start: row.try_get("week_start").map_err(map_sqlx_err)?,
        total_allocated: amount(
            row.try_get::<Decimal, _>("total_allocated")
                .map_err(map_sqlx_err)?,
        )?,
        total_spending: amount(
            row.try_get::<Decimal, _>("total_spending")
                .map_err(map_sqlx_err)?,
        )?,
        total_stash: amount(
            row.try_get::<Decimal, _>("total_stash")
                .map_err(map_sqlx_err)?,
        )?,
        deposit_count: row
            .try_get::<i32, _>("deposit_count")
            .map_err(map_sqlx_err)? as u32,
        created_at: timestamp(
            row.try_get("created_at").map_err(map_sqlx_err)?,
        )?,
        updated_at: timestamp(
            row.try_get("updated_at").map_err(map_sqlx_err)?,
        )?,
    })
}

#[async_trait]
impl AllocationStore for PgStore {
    async fn get_mode(
        &self,
        user_id: UserId,
    ) -> Result<Option<AllocationMode>, StoreError> {
        sqlx::query("SELECT * FROM smart_allocation_modes WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_err)?
            .as_ref()
            .map(mode_from_row)
            .transpose()
    }

    async fn upsert_mode(
        &self,
        mode: AllocationMode,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO smart_allocation_modes \
             (user_id, active, ratio_spending, ratio_stash, paused_at, \
              resumed_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (user_id) DO UPDATE SET \
                 active = EXCLUDED.active, \
                 ratio_spending = EXCLUDED.ratio_spending, \
                 ratio_stash = EXCLUDED.ratio_stash, \
                 paused_at = EXCLUDED.paused_at, \
                 resumed_at = EXCLUDED.resumed_at, \
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(mode.user_id.as_uuid())
        .bind(mode.active)
        .bind(mode.ratio_spending)
        .bind(mode.ratio_stash)
        .bind(mode.paused_at.map(|at| at.as_i64()))
        .bind(mode.resumed_at.map(|at| at.as_i64()))
        .bind(mode.created_at.as_i64())
        .bind(mode.updated_at.as_i64())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn record_event(
        &self,
        event: AllocationEvent,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO allocation_events \
             (id, user_id, total, stash_amount, spending_amount, \
              event_type, source_txn_id, metadata, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(event.id.as_uuid())
        .bind(event.user_id.as_uuid())
        .bind(event.total.to_decimal())
        .bind(event.stash_amount.to_decimal())
        .bind(event.spending_amount.to_decimal())
        .bind(event.event_type.as_str())
        .bind(event.source_txn_id.as_uuid())
        .bind(&event.metadata)
        .bind(event.created_at.as_i64())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn list_events(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AllocationEvent>, StoreError> {
        sqlx::query(
            "SELECT * FROM allocation_events WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(user_id.as_uuid())
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_err)?
        .iter()
        .map(event_from_row)
        .collect()
    }

    async fn get_weekly_summary(
        &self,
        user_id: UserId,
        week_start: NaiveDate,
    ) -> Result<Option<WeeklyAllocationSummary>, StoreError> {
        sqlx::query(
            "SELECT * FROM weekly_allocation_summaries \
             WHERE user_id = $1 AND week_start = $2",
        )
        .bind(user_id.as_uuid())
        .bind(week_start)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_err)?
        .as_ref()
        .map(summary_from_row)
        .transpose()
    }

    async fn upsert_weekly_summary(
        &self,
        summary: WeeklyAllocationSummary,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO weekly_allocation_summaries \
             (id, user_id, week_start, total_allocated, total_spending, \
              total_stash, deposit_count, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (user_id, week_start) DO UPDATE SET \
                 total_allocated = EXCLUDED.total_allocated, \
                 total_spending = EXCLUDED.total_spending, \
                 total_stash = EXCLUDED.total_stash, \
                 deposit_count = EXCLUDED.deposit_count, \
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(summary.id)
        .bind(summary.user_id.as_uuid())
        .bind(summary.week_start)
        .bind(summary.total_allocated.to_decimal())
        .bind(summary.total_spending.to_decimal())
        .bind(summary.total_stash.to_decimal())
        .bind(summary.deposit_count as i32)
        .bind(summary.created_at.as_i64())
        .bind(summary.updated_at.as_i64())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }
}
