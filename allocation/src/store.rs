use async_trait::async_trait;
use chrono::NaiveDate;
use common::{ids::UserId, store::StoreError};

use crate::{
    event::AllocationEvent, mode::AllocationMode,
    summary::WeeklyAllocationSummary,
};

/// Persistence seam for allocation modes, events and weekly summaries.
#[async_trait]
pub trait AllocationStore: Send + Sync + 'static {
    async fn get_mode(
        &self,
        user_id: UserId,
    ) -> Result<Option<AllocationMode>, StoreError>;

    /// Inserts or replaces the user's mode (`user_id` is the primary key).
    async fn upsert_mode(
        &self,
        mode: AllocationMode,
    ) -> Result<(), StoreError>;

    async fn record_event(
        &self,
        event: AllocationEvent,
    ) -> Result<(), StoreError>;

    async fn list_events(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AllocationEvent>, StoreError>;

    async fn get_weekly_summary(
        &self,
        user_id: UserId,
        week_start: NaiveDate,
    ) -> Result<Option<WeeklyAllocationSummary>, StoreError>;

    /// Inserts or replaces the `(user_id, week_start)` aggregate row.
    async fn upsert_weekly_summary(
        &self,
        summary: WeeklyAllocationSummary,
    ) -> Result<(), StoreError>;
}
