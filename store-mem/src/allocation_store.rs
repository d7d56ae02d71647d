use allocation::{
    AllocationEvent, AllocationMode, AllocationStore,
    WeeklyAllocationSummary,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use common::{ids::UserId, store::StoreError};

use crate::MemStore;

#[async_trait]
impl AllocationStore for MemStore {
    async fn get_mode(
        &self,
        user_id: UserId,
    ) -> Result<Option<AllocationMode>, StoreError> {
        Ok(self.lock().modes.get(&user_id).cloned())
    }

    async fn upsert_mode(
        &self,
        mode: AllocationMode,
    ) -> Result<(), StoreError> {
        self.lock().modes.insert(mode.user_id, mode);
        Ok(())
    }

    async fn record_event(
        &self,
        event: AllocationEvent,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.allocation_events.contains_key(&event.id) {
            return Err(StoreError::conflict(format!(
                "allocation event {}",
                event.id
            )));
        }
        state.allocation_events.insert(event.id, event);
        Ok(())
    }

    async fn list_events(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AllocationEvent>, StoreError> {
        let mut events: Vec<AllocationEvent> = self
            .lock()
            .allocation_events
            .values()
            .filter(|event| event.user_id == user_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(events.into_iter().skip(offset).take(limit).collect())
    }

    async fn get_weekly_summary(
        &self,
        user_id: UserId,
        week_start: NaiveDate,
    ) -> Result<Option<WeeklyAllocationSummary>, StoreError> {
        Ok(self
            .lock()
            .weekly_summaries
            .get(&(user_id, week_start))
            .cloned())
    }

    async fn upsert_weekly_summary(
        &self,
        summary: WeeklyAllocationSummary,
    ) -> Result<(), StoreError> {
        self.lock()
            .weekly_summaries
            .insert((summary.user_id, summary.week_start), summary);
        Ok(())
    }
}
