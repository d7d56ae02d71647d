use std::fmt;

use common::{
    amount::Amount,
    ids::{AccountId, ConversionJobId, IdempotencyKey, ProviderId, TxnId},
    time::TimestampMs,
};
#[cfg(any(test, feature = "test-utils"))]
use proptest_derive::Arbitrary;
use serde::{Deserialize, Serialize};

/// Which way a conversion moves value.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(any(test, feature = "test-utils"), derive(Arbitrary))]
#[cfg_attr(test, derive(strum::VariantArray))]
pub enum ConversionDirection {
    UsdcToUsd,
    UsdToUsdc,
}

impl ConversionDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UsdcToUsd => "usdc_to_usd",
            Self::UsdToUsdc => "usd_to_usdc",
        }
    }

    pub fn source_currency(&self) -> common::currency::Currency {
        match self {
            Self::UsdcToUsd => common::currency::Currency::Usdc,
            Self::UsdToUsdc => common::currency::Currency::Usd,
        }
    }

    pub fn destination_currency(&self) -> common::currency::Currency {
        match self {
            Self::UsdcToUsd => common::currency::Currency::Usd,
            Self::UsdToUsdc => common::currency::Currency::Usdc,
        }
    }
}

impl fmt::Display for ConversionDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conversion-job lifecycle.
///
/// ```text
/// pending -> provider_submitted -> provider_processing
///     ^              |                     |
///     |              v                     v
///     +--- (retryable failure)    provider_completed -> completed
///                    |
///                    +-> failed | cancelled
/// ```
///
/// `completed`, `failed` (retries exhausted) and `cancelled` are terminal.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(any(test, feature = "test-utils"), derive(Arbitrary))]
#[cfg_attr(test, derive(strum::VariantArray))]
pub enum JobStatus {
    /// Awaiting execution (fresh, or re-queued after a retryable failure).
    Pending,
    /// Accepted by the provider.
    ProviderSubmitted,
    /// The provider reports the conversion in progress.
    ProviderProcessing,
    /// The provider reports the conversion done; ledger posting pending.
    ProviderCompleted,
    /// Ledger entries posted and linked. Terminal.
    Completed,
    /// Failed with retries exhausted (or permanently). Terminal.
    Failed,
    /// Cancelled before completion. Terminal.
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::ProviderSubmitted => "provider_submitted",
            Self::ProviderProcessing => "provider_processing",
            Self::ProviderCompleted => "provider_completed",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Statuses with an open provider-side conversion, i.e. what the
    /// monitor loop polls.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::ProviderSubmitted | Self::ProviderProcessing)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a conversion job was created.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(any(test, feature = "test-utils"), derive(Arbitrary))]
#[cfg_attr(test, derive(strum::VariantArray))]
pub enum TriggerReason {
    /// A buffer fell below its target.
    BufferReplenishment,
    /// A buffer fell below its critical floor.
    Emergency,
    /// An operator asked for it.
    Manual,
}

impl TriggerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BufferReplenishment => "buffer_replenishment",
            Self::Emergency => "emergency",
            Self::Manual => "manual",
        }
    }
}

/// A durable record orchestrating one usdc<->usd move through an external
/// provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversionJob {
    pub id: ConversionJobId,
    pub direction: ConversionDirection,
    /// The source-side amount to convert.
    pub amount: Amount,
    pub status: JobStatus,
    pub trigger_reason: TriggerReason,
    pub source_account_id: AccountId,
    pub destination_account_id: AccountId,
    pub provider_id: Option<ProviderId>,
    pub provider_tx_id: Option<String>,
    /// Raw provider response for the initiate call; operator breadcrumbs.
    pub provider_response: serde_json::Value,
    /// Set when the conversion's ledger transaction posts.
    pub ledger_transaction_id: Option<TxnId>,
    /// Execution is deferred until this instant (batching, retry backoff).
    pub scheduled_at: TimestampMs,
    pub submitted_at: Option<TimestampMs>,
    pub provider_completed_at: Option<TimestampMs>,
    pub completed_at: Option<TimestampMs>,
    pub failed_at: Option<TimestampMs>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub idempotency_key: IdempotencyKey,
    pub created_at: TimestampMs,
    pub updated_at: TimestampMs,
}

impl ConversionJob {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        direction: ConversionDirection,
        amount: Amount,
        trigger_reason: TriggerReason,
        source_account_id: AccountId,
        destination_account_id: AccountId,
        idempotency_key: IdempotencyKey,
        scheduled_at: TimestampMs,
        max_retries: u32,
        now: TimestampMs,
    ) -> Self {
        Self {
            id: ConversionJobId::generate(),
            direction,
            amount,
            status: JobStatus::Pending,
            trigger_reason,
            source_account_id,
            destination_account_id,
            provider_id: None,
            provider_tx_id: None,
            provider_response: serde_json::Value::Null,
            ledger_transaction_id: None,
            scheduled_at,
            submitted_at: None,
            provider_completed_at: None,
            completed_at: None,
            failed_at: None,
            error_message: None,
            error_code: None,
            retry_count: 0,
            max_retries,
            idempotency_key,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether another attempt is allowed.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Re-queues the job for execution after a retryable failure.
    pub fn requeue_for_retry(&mut self, scheduled_at: TimestampMs, now: TimestampMs) {
        debug_assert!(self.can_retry());
        self.status = JobStatus::Pending;
        self.retry_count += 1;
        self.provider_id = None;
        self.provider_tx_id = None;
        self.scheduled_at = scheduled_at;
        self.updated_at = now;
    }

    /// Terminal failure.
    pub fn fail(
        &mut self,
        message: String,
        code: Option<String>,
        now: TimestampMs,
    ) {
        self.status = JobStatus::Failed;
        self.error_message = Some(message);
        self.error_code = code;
        self.failed_at = Some(now);
        self.updated_at = now;
    }
}

#[cfg(test)]
mod test {
    use common::test_utils::roundtrip;

    use super::*;

    #[test]
    fn job_status_json_backwards_compat() {
        let expected_ser = r#"["pending","provider_submitted","provider_processing","provider_completed","completed","failed","cancelled"]"#;
        roundtrip::json_unit_enum_backwards_compat::<JobStatus>(expected_ser);
    }

    #[test]
    fn direction_json_backwards_compat() {
        let expected_ser = r#"["usdc_to_usd","usd_to_usdc"]"#;
        roundtrip::json_unit_enum_backwards_compat::<ConversionDirection>(
            expected_ser,
        );
    }

    #[test]
    fn trigger_json_backwards_compat() {
        let expected_ser = r#"["buffer_replenishment","emergency","manual"]"#;
        roundtrip::json_unit_enum_backwards_compat::<TriggerReason>(
            expected_ser,
        );
    }

    #[test]
    fn terminal_and_in_flight() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(JobStatus::ProviderSubmitted.is_in_flight());
        assert!(JobStatus::ProviderProcessing.is_in_flight());
        assert!(!JobStatus::ProviderCompleted.is_in_flight());
    }

    #[test]
    fn retry_resets_provider_linkage() {
        let now = TimestampMs::now();
        let mut job = ConversionJob::new(
            ConversionDirection::UsdToUsdc,
            Amount::from_u64(6_000),
            TriggerReason::BufferReplenishment,
            AccountId::generate(),
            AccountId::generate(),
            IdempotencyKey::new("job-key"),
            now,
            3,
            now,
        );
        job.status = JobStatus::ProviderSubmitted;
        job.provider_tx_id = Some("ptx_1".to_owned());
        assert!(job.can_retry());

        job.requeue_for_retry(now, now);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 1);
        assert!(job.provider_tx_id.is_none());
        assert!(job.provider_id.is_none());
    }
}
