use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use common::amount::Amount;
use rust_decimal_macros::dec;

use crate::{
    adapter::{
        ConversionStatusResponse, InitiateConversionRequest,
        InitiateConversionResponse, ProviderAdapter, ProviderError,
        ProviderTxStatus,
    },
    job::ConversionDirection,
};

/// A scriptable in-memory [`ProviderAdapter`] for tests.
///
/// Conversions are accepted immediately and sit in `processing` until the
/// test script advances them with [`complete`] / [`fail`].
///
/// [`complete`]: MockAdapter::complete
/// [`fail`]: MockAdapter::fail
#[derive(Default)]
pub struct MockAdapter {
    next_id: AtomicU64,
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    conversions: HashMap<String, MockConversion>,
    fail_initiate: bool,
    fail_initiate_permanently: bool,
    fail_status_checks: bool,
}

struct MockConversion {
    status: ProviderTxStatus,
    source_amount: Amount,
    destination_amount: Option<Amount>,
    failure_reason: Option<String>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next initiate calls to fail transiently (retryable).
    pub fn fail_initiate(&self, fail: bool) {
        self.state.lock().unwrap().fail_initiate = fail;
    }

    /// Script the next initiate calls to be rejected (not retryable).
    pub fn fail_initiate_permanently(&self, fail: bool) {
        self.state.lock().unwrap().fail_initiate_permanently = fail;
    }

    /// Script status polls to fail transiently.
    pub fn fail_status_checks(&self, fail: bool) {
        self.state.lock().unwrap().fail_status_checks = fail;
    }

    /// Marks an in-flight conversion completed, optionally with a divergent
    /// destination amount.
    pub fn complete(
        &self,
        provider_tx_id: &str,
        destination_amount: Option<Amount>,
    ) {
        let mut state = self.state.lock().unwrap();
        let conversion = state
            .conversions
            .get_mut(provider_tx_id)
            .expect("unknown mock conversion");
        conversion.status = ProviderTxStatus::Completed;
        if destination_amount.is_some() {
            conversion.destination_amount = destination_amount;
        }
    }

    /// Marks an in-flight conversion failed.
    pub fn fail(&self, provider_tx_id: &str, reason: &str) {
        let mut state = self.state.lock().unwrap();
        let conversion = state
            .conversions
            .get_mut(provider_tx_id)
            .expect("unknown mock conversion");
        conversion.status = ProviderTxStatus::Failed;
        conversion.failure_reason = Some(reason.to_owned());
    }

    pub fn initiate_count(&self) -> usize {
        self.state.lock().unwrap().conversions.len()
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    async fn initiate_conversion(
        &self,
        req: InitiateConversionRequest,
    ) -> Result<InitiateConversionResponse, ProviderError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_initiate {
            return Err(ProviderError::Unavailable(
                "mock initiate failure".to_owned(),
            ));
        }
        if state.fail_initiate_permanently {
            return Err(ProviderError::Rejected {
                code: "mock".to_owned(),
                message: "mock permanent rejection".to_owned(),
            });
        }

        let provider_tx_id = format!(
            "mock-conv-{}",
            self.next_id.fetch_add(1, Ordering::Relaxed)
        );
        state.conversions.insert(
            provider_tx_id.clone(),
            MockConversion {
                status: ProviderTxStatus::Processing,
                source_amount: req.amount,
                // 1:1 unless the test scripts otherwise.
                destination_amount: Some(req.amount),
                failure_reason: None,
            },
        );

        Ok(InitiateConversionResponse {
            provider_tx_id,
            status: ProviderTxStatus::Processing,
            estimated_rate: Some(dec!(1)),
            fees: None,
            provider_response: serde_json::json!({ "mock": true }),
        })
    }

    async fn get_conversion_status(
        &self,
        provider_tx_id: &str,
    ) -> Result<ConversionStatusResponse, ProviderError> {
        let state = self.state.lock().unwrap();
        if state.fail_status_checks {
            return Err(ProviderError::Unavailable(
                "mock status failure".to_owned(),
            ));
        }
        let conversion = state
            .conversions
            .get(provider_tx_id)
            .ok_or_else(|| ProviderError::Rejected {
                code: "404".to_owned(),
                message: format!("no conversion {provider_tx_id}"),
            })?;

        Ok(ConversionStatusResponse {
            status: conversion.status,
            source_amount: conversion.source_amount,
            destination_amount: conversion.destination_amount,
            rate: Some(dec!(1)),
            fees: None,
            failure_reason: conversion.failure_reason.clone(),
        })
    }

    async fn cancel_conversion(
        &self,
        provider_tx_id: &str,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        if let Some(conversion) = state.conversions.get_mut(provider_tx_id) {
            conversion.status = ProviderTxStatus::Cancelled;
        }
        Ok(())
    }

    fn supports_direction(&self, _direction: ConversionDirection) -> bool {
        true
    }

    fn validate_amount(
        &self,
        amount: Amount,
        _direction: ConversionDirection,
    ) -> Result<(), ProviderError> {
        if amount.is_zero() {
            return Err(ProviderError::AmountOutOfBounds {
                amount,
                message: "mock requires a positive amount".to_owned(),
            });
        }
        Ok(())
    }

    async fn estimate_fees(
        &self,
        _amount: Amount,
        _direction: ConversionDirection,
    ) -> Result<Amount, ProviderError> {
        Ok(Amount::ZERO)
    }
}
