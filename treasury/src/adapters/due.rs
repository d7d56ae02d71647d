use async_trait::async_trait;
use common::amount::Amount;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::instrument;

use crate::{
    adapter::{
        ConversionStatusResponse, InitiateConversionRequest,
        InitiateConversionResponse, ProviderAdapter, ProviderError,
        ProviderTxStatus,
    },
    job::ConversionDirection,
};

use super::AdapterSettings;

/// Adapter for the Due exchange API.
///
/// Due models a conversion as an "exchange" with a buy/sell side on the
/// USDC/USD pair and settles both directions.
pub struct DueAdapter {
    client: reqwest::Client,
    settings: AdapterSettings,
}

#[derive(Deserialize)]
struct DueExchange {
    id: String,
    status: String,
    #[serde(default)]
    rate: Option<Decimal>,
    #[serde(default)]
    fee: Option<Decimal>,
    #[serde(default)]
    source_amount: Option<Decimal>,
    #[serde(default)]
    destination_amount: Option<Decimal>,
    #[serde(default)]
    failure_reason: Option<String>,
}

impl DueAdapter {
    pub fn new(client: reqwest::Client, settings: AdapterSettings) -> Self {
        Self { client, settings }
    }

    fn map_status(status: &str) -> Result<ProviderTxStatus, ProviderError> {
        match status {
            "created" | "pending" => Ok(ProviderTxStatus::Pending),
            "processing" | "settling" => Ok(ProviderTxStatus::Processing),
            "settled" | "completed" => Ok(ProviderTxStatus::Completed),
            "failed" => Ok(ProviderTxStatus::Failed),
            "cancelled" => Ok(ProviderTxStatus::Cancelled),
            other => Err(ProviderError::Unknown(format!(
                "Unrecognized due exchange status: '{other}'"
            ))),
        }
    }

    fn side(direction: ConversionDirection) -> &'static str {
        match direction {
            ConversionDirection::UsdcToUsd => "sell",
            ConversionDirection::UsdToUsdc => "buy",
        }
    }

    fn amount(
        value: Option<Decimal>,
    ) -> Result<Option<Amount>, ProviderError> {
        value
            .map(|decimal| {
                Amount::try_from_decimal(decimal).map_err(|e| {
                    ProviderError::Unknown(format!(
                        "Bad amount in due response: {e}"
                    ))
                })
            })
            .transpose()
    }

    async fn parse_error(response: reqwest::Response) -> ProviderError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            ProviderError::Rejected {
                code: status.as_u16().to_string(),
                message: body,
            }
        } else {
            ProviderError::Unavailable(format!("HTTP {status}: {body}"))
        }
    }
}

#[async_trait]
impl ProviderAdapter for DueAdapter {
    #[instrument(skip_all, name = "(due-initiate)")]
    async fn initiate_conversion(
        &self,
        req: InitiateConversionRequest,
    ) -> Result<InitiateConversionResponse, ProviderError> {
        self.validate_amount(req.amount, req.direction)?;

        let url = format!("{}/v1/exchanges", self.settings.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.settings.api_key.expose_secret())
            .header("Idempotency-Key", req.idempotency_key.as_str())
            .json(&serde_json::json!({
                "pair": "USDC/USD",
                "side": Self::side(req.direction),
                "amount": req.amount,
            }))
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::parse_error(response).await);
        }

        let body = response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        let exchange =
            serde_json::from_value::<DueExchange>(body.clone()).map_err(
                |e| ProviderError::Unknown(format!("Bad due response: {e}")),
            )?;

        Ok(InitiateConversionResponse {
            provider_tx_id: exchange.id,
            status: Self::map_status(&exchange.status)?,
            estimated_rate: exchange.rate,
            fees: Self::amount(exchange.fee)?,
            provider_response: body,
        })
    }

    async fn get_conversion_status(
        &self,
        provider_tx_id: &str,
    ) -> Result<ConversionStatusResponse, ProviderError> {
        let url = format!(
            "{}/v1/exchanges/{provider_tx_id}",
            self.settings.base_url
        );
        let response = self
            .client
            .get(&url)
            .bearer_auth(self.settings.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::parse_error(response).await);
        }

        let exchange = response
            .json::<DueExchange>()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        Ok(ConversionStatusResponse {
            status: Self::map_status(&exchange.status)?,
            source_amount: Self::amount(exchange.source_amount)?
                .unwrap_or(Amount::ZERO),
            destination_amount: Self::amount(exchange.destination_amount)?,
            rate: exchange.rate,
            fees: Self::amount(exchange.fee)?,
            failure_reason: exchange.failure_reason,
        })
    }

    async fn cancel_conversion(
        &self,
        provider_tx_id: &str,
    ) -> Result<(), ProviderError> {
        let url = format!(
            "{}/v1/exchanges/{provider_tx_id}/cancel",
            self.settings.base_url
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.settings.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::parse_error(response).await);
        }
        Ok(())
    }

    fn supports_direction(&self, _direction: ConversionDirection) -> bool {
        // Due settles the USDC/USD pair both ways.
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
                message: "due requires a positive amount".to_owned(),
            });
        }
        Ok(())
    }

    async fn estimate_fees(
        &self,
        amount: Amount,
        _direction: ConversionDirection,
    ) -> Result<Amount, ProviderError> {
        // Due charges 10 bps, floor one cent.
        let fee = (amount * Decimal::new(1, 3)).round_down_dp(2);
        Ok(if fee.is_zero() {
            Amount::try_from_decimal(Decimal::new(1, 2))
                .expect("one cent is a valid amount")
        } else {
            fee
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            DueAdapter::map_status("settled").unwrap(),
            ProviderTxStatus::Completed
        );
        assert_eq!(
            DueAdapter::map_status("processing").unwrap(),
            ProviderTxStatus::Processing
        );
        assert!(DueAdapter::map_status("garbled").is_err());
    }

    #[test]
    fn fee_floor_is_one_cent() {
        let adapter = DueAdapter::new(
            reqwest::Client::new(),
            AdapterSettings::default(),
        );
        let fee = tokio_test_block_on(adapter.estimate_fees(
            Amount::from_u64(1),
            ConversionDirection::UsdcToUsd,
        ))
        .unwrap();
        assert_eq!(fee.to_decimal(), Decimal::new(1, 2));

        let fee = tokio_test_block_on(adapter.estimate_fees(
            Amount::from_u64(10_000),
            ConversionDirection::UsdcToUsd,
        ))
        .unwrap();
        assert_eq!(fee.to_decimal(), Decimal::from(10));
    }

    fn tokio_test_block_on<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(fut)
    }
}
