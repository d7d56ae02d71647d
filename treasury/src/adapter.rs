//! The conversion-provider adapter contract.
//!
//! Every provider integration implements [`ProviderAdapter`]; the engine is
//! polymorphic over a build-once `ProviderType -> Arc<dyn ProviderAdapter>`
//! map. Adapters translate between our job model and the provider's API and
//! signal retryability on every error.

use async_trait::async_trait;
use common::{amount::Amount, ids::IdempotencyKey};
#[cfg(any(test, feature = "test-utils"))]
use proptest_derive::Arbitrary;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::job::ConversionDirection;

/// Errors surfaced by provider adapters.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider rejected the request and will keep rejecting it.
    #[error("Provider rejected conversion ({code}): {message}")]
    Rejected { code: String, message: String },

    /// The amount violates the provider's own limits.
    #[error("Amount {amount} out of provider bounds: {message}")]
    AmountOutOfBounds { amount: Amount, message: String },

    /// The provider doesn't do this direction.
    #[error("Provider does not support {0}")]
    UnsupportedDirection(ConversionDirection),

    /// Transport failures, 5xx, timeouts, unparseable responses.
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// Anything the adapter couldn't classify.
    #[error("Provider error: {0}")]
    Unknown(String),
}

impl ProviderError {
    /// Retry policy: unknown errors are retryable by default; only errors
    /// the provider will deterministically repeat are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Rejected { .. }
            | Self::AmountOutOfBounds { .. }
            | Self::UnsupportedDirection(_) => false,
            Self::Unavailable(_) | Self::Unknown(_) => true,
        }
    }
}

/// Provider-side conversion status.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(any(test, feature = "test-utils"), derive(Arbitrary))]
#[cfg_attr(test, derive(strum::VariantArray))]
pub enum ProviderTxStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

/// A request to start a conversion.
#[derive(Clone, Debug)]
pub struct InitiateConversionRequest {
    pub direction: ConversionDirection,
    pub amount: Amount,
    /// Forwarded to the provider so a crashed-and-retried initiate cannot
    /// double-convert.
    pub idempotency_key: IdempotencyKey,
}

/// The provider's answer to an initiate call.
#[derive(Clone, Debug)]
pub struct InitiateConversionResponse {
    pub provider_tx_id: String,
    pub status: ProviderTxStatus,
    pub estimated_rate: Option<Decimal>,
    pub fees: Option<Amount>,
    /// Raw response body, persisted on the job for operators.
    pub provider_response: serde_json::Value,
}

/// The provider's answer to a status poll.
#[derive(Clone, Debug)]
pub struct ConversionStatusResponse {
    pub status: ProviderTxStatus,
    pub source_amount: Amount,
    /// The destination-side fill. May diverge from `source_amount`; the
    /// ledger honors the divergence per currency.
    pub destination_amount: Option<Amount>,
    pub rate: Option<Decimal>,
    pub fees: Option<Amount>,
    pub failure_reason: Option<String>,
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync + 'static {
    async fn initiate_conversion(
        &self,
        req: InitiateConversionRequest,
    ) -> Result<InitiateConversionResponse, ProviderError>;

    async fn get_conversion_status(
        &self,
        provider_tx_id: &str,
    ) -> Result<ConversionStatusResponse, ProviderError>;

    async fn cancel_conversion(
        &self,
        provider_tx_id: &str,
    ) -> Result<(), ProviderError>;

    fn supports_direction(&self, direction: ConversionDirection) -> bool;

    /// Provider-side amount validation, beyond the row-level bounds the
    /// selector already applied.
    fn validate_amount(
        &self,
        amount: Amount,
        direction: ConversionDirection,
    ) -> Result<(), ProviderError>;

    async fn estimate_fees(
        &self,
        amount: Amount,
        direction: ConversionDirection,
    ) -> Result<Amount, ProviderError>;
}
