//! The funding-event job queue: a durable inbox between webhook ingestion
//! and the on-chain engine.
//!
//! Enqueue is conflict-free on `(tx_hash, chain)`, so a second delivery of
//! the same chain event is silently absorbed. Workers claim batches with
//! skip-locked semantics (no two workers ever hold the same job), process
//! through the engine, and either complete, schedule a retry with jittered
//! backoff, or park the job in the DLQ for an operator.

use std::{collections::VecDeque, sync::Mutex, time::Duration};

use common::{
    amount::Amount, ids::FundingEventId, time::TimestampMs,
};
#[cfg(any(test, feature = "test-utils"))]
use proptest_derive::Arbitrary;
use serde::{Deserialize, Serialize};

use crate::{
    error::ErrorClass,
    types::{ChainName, TokenSymbol, TxHash},
};

/// The lifecycle of a funding-event job.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(any(test, feature = "test-utils"), derive(Arbitrary))]
#[cfg_attr(test, derive(strum::VariantArray))]
pub enum FundingEventStatus {
    /// Enqueued, not yet claimed.
    Pending,
    /// Claimed by a worker.
    Processing,
    /// Processed successfully; a deposit exists.
    Completed,
    /// Failed transiently; eligible to be claimed again once
    /// `next_retry_at` passes.
    Failed,
    /// Dead-lettered: permanent failure or retries exhausted. Needs an
    /// operator.
    Dlq,
}

impl FundingEventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Dlq => "dlq",
        }
    }
}

/// A new chain event as delivered by the webhook layer.
#[derive(Clone, Debug)]
pub struct NewFundingEvent {
    pub tx_hash: TxHash,
    pub chain: ChainName,
    pub token: TokenSymbol,
    pub amount: Amount,
    /// The deposit address the funds landed on; resolved to a managed
    /// wallet (and thus a user) at processing time.
    pub to_address: String,
    pub webhook_payload: serde_json::Value,
}

/// A durable funding-event job.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FundingEvent {
    pub id: FundingEventId,
    pub tx_hash: TxHash,
    pub chain: ChainName,
    pub token: TokenSymbol,
    pub amount: Amount,
    pub to_address: String,
    pub status: FundingEventStatus,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub error_type: Option<ErrorClass>,
    pub first_seen_at: TimestampMs,
    pub last_attempt_at: Option<TimestampMs>,
    pub next_retry_at: Option<TimestampMs>,
    pub completed_at: Option<TimestampMs>,
    pub moved_to_dlq_at: Option<TimestampMs>,
    pub webhook_payload: serde_json::Value,
    /// One line appended per processing attempt; operator breadcrumbs.
    pub processing_logs: Vec<String>,
}

impl FundingEvent {
    pub fn new(
        new: NewFundingEvent,
        max_attempts: u32,
        now: TimestampMs,
    ) -> Self {
        Self {
            id: FundingEventId::generate(),
            tx_hash: new.tx_hash,
            chain: new.chain,
            token: new.token,
            amount: new.amount,
            to_address: new.to_address,
            status: FundingEventStatus::Pending,
            attempt_count: 0,
            max_attempts,
            last_error: None,
            error_type: None,
            first_seen_at: now,
            last_attempt_at: None,
            next_retry_at: None,
            completed_at: None,
            moved_to_dlq_at: None,
            webhook_payload: new.webhook_payload,
            processing_logs: Vec::new(),
        }
    }

    /// Whether another attempt is allowed after a transient failure.
    pub fn can_retry(&self) -> bool {
        self.attempt_count < self.max_attempts
    }
}

// --- Rolling metrics --- //

/// A point-in-time snapshot of queue health.
#[derive(Clone, Debug, Default, Serialize)]
pub struct QueueMetrics {
    pub total_received: u64,
    pub total_processed: u64,
    pub total_failed: u64,
    pub total_dlq: u64,
    pub pending_count: u64,
    pub avg_retry_count: f64,
    pub avg_latency: Duration,
}

#[derive(Clone, Copy, Debug)]
enum Outcome {
    Processed { retries: u32, latency: Duration },
    Failed,
    Dlq,
}

/// Aggregates worker outcomes over a rolling window.
///
/// Shared by all workers of a pool; `pending_count` is not tracked here
/// since it is a property of the store, and is filled in by the caller of
/// [`snapshot`].
///
/// [`snapshot`]: MetricsRecorder::snapshot
pub struct MetricsRecorder {
    window: Duration,
    state: Mutex<RecorderState>,
}

#[derive(Default)]
struct RecorderState {
    received: u64,
    events: VecDeque<(TimestampMs, Outcome)>,
}

impl MetricsRecorder {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(RecorderState::default()),
        }
    }

    pub fn record_received(&self) {
        self.state.lock().unwrap().received += 1;
    }

    pub fn record_processed(&self, retries: u32, latency: Duration) {
        self.push(Outcome::Processed { retries, latency });
    }

    pub fn record_failed(&self) {
        self.push(Outcome::Failed);
    }

    pub fn record_dlq(&self) {
        self.push(Outcome::Dlq);
    }

    fn push(&self, outcome: Outcome) {
        let now = TimestampMs::now();
        let mut state = self.state.lock().unwrap();
        state.events.push_back((now, outcome));
        let cutoff = now.saturating_sub(self.window);
        while let Some((at, _)) = state.events.front() {
            if *at < cutoff {
                state.events.pop_front();
            } else {
                break;
            }
        }
    }

    /// Aggregate the rolling window; `pending_count` comes from the store.
    pub fn snapshot(&self, pending_count: u64) -> QueueMetrics {
        let state = self.state.lock().unwrap();

        let mut metrics = QueueMetrics {
            total_received: state.received,
            pending_count,
            ..QueueMetrics::default()
        };

        let mut retry_sum = 0u64;
        let mut latency_sum = Duration::ZERO;
        for (_, outcome) in state.events.iter() {
            match outcome {
                Outcome::Processed { retries, latency } => {
                    metrics.total_processed += 1;
                    retry_sum += u64::from(*retries);
                    latency_sum += *latency;
                }
                Outcome::Failed => metrics.total_failed += 1,
                Outcome::Dlq => metrics.total_dlq += 1,
            }
        }

        if metrics.total_processed > 0 {
            metrics.avg_retry_count =
                retry_sum as f64 / metrics.total_processed as f64;
            metrics.avg_latency =
                latency_sum / u32::try_from(metrics.total_processed)
                    .unwrap_or(u32::MAX);
        }
        metrics
    }
}

#[cfg(test)]
mod test {
    use common::test_utils::roundtrip;

    use super::*;

    #[test]
    fn status_json_backwards_compat() {
        let expected_ser =
            r#"["pending","processing","completed","failed","dlq"]"#;
        roundtrip::json_unit_enum_backwards_compat::<FundingEventStatus>(
            expected_ser,
        );
    }

    #[test]
    fn can_retry_respects_max_attempts() {
        let new = NewFundingEvent {
            tx_hash: TxHash::new("0xAAA"),
            chain: ChainName::new("base"),
            token: TokenSymbol::usdc(),
            amount: Amount::from_u64(50),
            to_address: "0xdead".to_owned(),
            webhook_payload: serde_json::Value::Null,
        };
        let mut event = FundingEvent::new(new, 3, TimestampMs::now());
        assert!(event.can_retry());
        event.attempt_count = 3;
        assert!(!event.can_retry());
    }

    #[test]
    fn metrics_aggregate() {
        let recorder = MetricsRecorder::new(Duration::from_secs(3600));
        recorder.record_received();
        recorder.record_received();
        recorder.record_processed(0, Duration::from_millis(100));
        recorder.record_processed(2, Duration::from_millis(300));
        recorder.record_failed();
        recorder.record_dlq();

        let metrics = recorder.snapshot(5);
        assert_eq!(metrics.total_received, 2);
        assert_eq!(metrics.total_processed, 2);
        assert_eq!(metrics.total_failed, 1);
        assert_eq!(metrics.total_dlq, 1);
        assert_eq!(metrics.pending_count, 5);
        assert_eq!(metrics.avg_retry_count, 1.0);
        assert_eq!(metrics.avg_latency, Duration::from_millis(200));
    }
}
