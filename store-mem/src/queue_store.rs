use async_trait::async_trait;
use chain::{
    ChainName, ErrorClass, FundingEvent, FundingEventStatus,
    FundingQueueStore, NewFundingEvent, TxHash,
};
use common::{store::StoreError, time::TimestampMs};

use crate::MemStore;

#[async_trait]
impl FundingQueueStore for MemStore {
    async fn enqueue(
        &self,
        new: NewFundingEvent,
        max_attempts: u32,
    ) -> Result<Option<FundingEvent>, StoreError> {
        let mut state = self.lock();
        let key = (new.tx_hash.clone(), new.chain.clone());
        if state.funding_event_index.contains_key(&key) {
            // Duplicate delivery; silently absorbed.
            return Ok(None);
        }
        let event = FundingEvent::new(new, max_attempts, TimestampMs::now());
        state.funding_event_index.insert(key, event.id);
        state.funding_events.insert(event.id, event.clone());
        Ok(Some(event))
    }

    async fn claim_batch(
        &self,
        batch: usize,
        now: TimestampMs,
    ) -> Result<Vec<FundingEvent>, StoreError> {
        let mut state = self.lock();

        let mut claimable: Vec<FundingEvent> = state
            .funding_events
            .values()
            .filter(|event| match event.status {
                FundingEventStatus::Pending => true,
                FundingEventStatus::Failed => event
                    .next_retry_at
                    .map(|at| at <= now)
                    .unwrap_or(false),
                _ => false,
            })
            .cloned()
            .collect();
        claimable.sort_by_key(|event| event.first_seen_at);
        claimable.truncate(batch);

        // Marking them processing under the same lock is what makes
        // concurrent claimers disjoint.
        for event in &mut claimable {
            event.status = FundingEventStatus::Processing;
            event.last_attempt_at = Some(now);
            let stored = state
                .funding_events
                .get_mut(&event.id)
                .expect("claimed from this map");
            stored.status = FundingEventStatus::Processing;
            stored.last_attempt_at = Some(now);
        }
        Ok(claimable)
    }

    async fn complete(
        &self,
        event: &FundingEvent,
        log_line: String,
        now: TimestampMs,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        let stored =
            state.funding_events.get_mut(&event.id).ok_or_else(|| {
                StoreError::not_found(format!("funding event {}", event.id))
            })?;
        stored.status = FundingEventStatus::Completed;
        stored.attempt_count += 1;
        stored.completed_at = Some(now);
        stored.processing_logs.push(log_line);
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
        let mut state = self.lock();
        let stored =
            state.funding_events.get_mut(&event.id).ok_or_else(|| {
                StoreError::not_found(format!("funding event {}", event.id))
            })?;
        stored.attempt_count += 1;
        stored.last_error = Some(error);
        stored.error_type = Some(error_type);
        stored.last_attempt_at = Some(now);
        stored.processing_logs.push(log_line);
        match next_retry_at {
            Some(at) => {
                stored.status = FundingEventStatus::Failed;
                stored.next_retry_at = Some(at);
            }
            None => {
                stored.status = FundingEventStatus::Dlq;
                stored.next_retry_at = None;
                stored.moved_to_dlq_at = Some(now);
            }
        }
        Ok(())
    }

    async fn get(
        &self,
        tx_hash: &TxHash,
        chain: &ChainName,
    ) -> Result<Option<FundingEvent>, StoreError> {
        let state = self.lock();
        Ok(state
            .funding_event_index
            .get(&(tx_hash.clone(), chain.clone()))
            .map(|id| state.funding_events[id].clone()))
    }

    async fn count_pending(&self) -> Result<u64, StoreError> {
        Ok(self
            .lock()
            .funding_events
            .values()
            .filter(|event| {
                matches!(
                    event.status,
                    FundingEventStatus::Pending | FundingEventStatus::Failed
                )
            })
            .count() as u64)
    }

    async fn list_dlq(
        &self,
        limit: usize,
    ) -> Result<Vec<FundingEvent>, StoreError> {
        let mut dlq: Vec<FundingEvent> = self
            .lock()
            .funding_events
            .values()
            .filter(|event| event.status == FundingEventStatus::Dlq)
            .cloned()
            .collect();
        dlq.sort_by_key(|event| event.first_seen_at);
        dlq.truncate(limit);
        Ok(dlq)
    }
}
