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

/// Adapter for the Zero Hash RFQ API.
///
/// Zero Hash is quote-driven: we request a quote for the pair, then execute
/// a trade against the quote id. The trade id is our provider tx id.
pub struct ZeroHashAdapter {
    client: reqwest::Client,
    settings: AdapterSettings,
}

#[derive(Deserialize)]
struct ZeroHashQuote {
    quote_id: String,
    #[serde(default)]
    price: Option<Decimal>,
}

#[derive(Deserialize)]
struct ZeroHashTrade {
    trade_id: String,
    state: String,
    #[serde(default)]
    price: Option<Decimal>,
    #[serde(default)]
    fee: Option<Decimal>,
    #[serde(default)]
    base_amount: Option<Decimal>,
    #[serde(default)]
    quote_amount: Option<Decimal>,
    #[serde(default)]
    reject_reason: Option<String>,
}

impl ZeroHashAdapter {
    /// Zero Hash rejects RFQs under a dollar.
    const MIN_AMOUNT: u64 = 1;

    pub fn new(client: reqwest::Client, settings: AdapterSettings) -> Self {
        Self { client, settings }
    }

    fn map_state(state: &str) -> Result<ProviderTxStatus, ProviderError> {
        match state {
            "accepted" => Ok(ProviderTxStatus::Pending),
            "active" => Ok(ProviderTxStatus::Processing),
            "terminated" => Ok(ProviderTxStatus::Completed),
            "rejected" => Ok(ProviderTxStatus::Failed),
            "cancelled" => Ok(ProviderTxStatus::Cancelled),
            other => Err(ProviderError::Unknown(format!(
                "Unrecognized zero hash trade state: '{other}'"
            ))),
        }
    }

    fn trade_side(direction: ConversionDirection) -> &'static str {
        match direction {
            ConversionDirection::UsdcToUsd => "sell",
            ConversionDirection::UsdToUsdc => "buy",
        }
    }

    fn opt_amount(
        value: Option<Decimal>,
    ) -> Result<Option<Amount>, ProviderError> {
        value
            .map(|decimal| {
                Amount::try_from_decimal(decimal).map_err(|e| {
                    ProviderError::Unknown(format!(
                        "Bad amount in zero hash response: {e}"
                    ))
                })
            })
            .transpose()
    }

    async fn parse_error(response: reqwest::Response) -> ProviderError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 429 {
            ProviderError::Unavailable(format!("rate limited: {body}"))
        } else if status.is_client_error() {
            ProviderError::Rejected {
                code: status.as_u16().to_string(),
                message: body,
            }
        } else {
            ProviderError::Unavailable(format!("HTTP {status}: {body}"))
        }
    }

    async fn request_quote(
        &self,
        req: &InitiateConversionRequest,
    ) -> Result<ZeroHashQuote, ProviderError> {
        let url = format!("{}/quotes", self.settings.base_url);
        let response = self
            .client
            .post(&url)
            .header(
                "X-SCX-API-KEY",
                self.settings.api_key.expose_secret(),
            )
            .json(&serde_json::json!({
                "underlying": "USDC",
                "quoted_currency": "USD",
                "side": Self::trade_side(req.direction),
                "quantity": req.amount,
            }))
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::parse_error(response).await);
        }
        response
            .json::<ZeroHashQuote>()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl ProviderAdapter for ZeroHashAdapter {
    #[instrument(skip_all, name = "(zero-hash-initiate)")]
    async fn initiate_conversion(
        &self,
        req: InitiateConversionRequest,
    ) -> Result<InitiateConversionResponse, ProviderError> {
        self.validate_amount(req.amount, req.direction)?;

        let quote = self.request_quote(&req).await?;

        let url = format!("{}/trades", self.settings.base_url);
        let response = self
            .client
            .post(&url)
            .header(
                "X-SCX-API-KEY",
                self.settings.api_key.expose_secret(),
            )
            .header("X-SCX-IDEMPOTENCY", req.idempotency_key.as_str())
            .json(&serde_json::json!({ "quote_id": quote.quote_id }))
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
        let trade = serde_json::from_value::<ZeroHashTrade>(body.clone())
            .map_err(|e| {
                ProviderError::Unknown(format!(
                    "Bad zero hash trade response: {e}"
                ))
            })?;

        Ok(InitiateConversionResponse {
            provider_tx_id: trade.trade_id,
            status: Self::map_state(&trade.state)?,
            estimated_rate: trade.price.or(quote.price),
            fees: Self::opt_amount(trade.fee)?,
            provider_response: body,
        })
    }

    async fn get_conversion_status(
        &self,
        provider_tx_id: &str,
    ) -> Result<ConversionStatusResponse, ProviderError> {
        let url =
            format!("{}/trades/{provider_tx_id}", self.settings.base_url);
        let response = self
            .client
            .get(&url)
            .header(
                "X-SCX-API-KEY",
                self.settings.api_key.expose_secret(),
            )
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::parse_error(response).await);
        }

        let trade = response
            .json::<ZeroHashTrade>()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        Ok(ConversionStatusResponse {
            status: Self::map_state(&trade.state)?,
            source_amount: Self::opt_amount(trade.base_amount)?
                .unwrap_or(Amount::ZERO),
            destination_amount: Self::opt_amount(trade.quote_amount)?,
            rate: trade.price,
            fees: Self::opt_amount(trade.fee)?,
            failure_reason: trade.reject_reason,
        })
    }

    async fn cancel_conversion(
        &self,
        provider_tx_id: &str,
    ) -> Result<(), ProviderError> {
        let url = format!(
            "{}/trades/{provider_tx_id}/cancel",
            self.settings.base_url
        );
        let response = self
            .client
            .post(&url)
            .header(
                "X-SCX-API-KEY",
                self.settings.api_key.expose_secret(),
            )
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::parse_error(response).await);
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
        if amount < Amount::from_u64(Self::MIN_AMOUNT) {
            return Err(ProviderError::AmountOutOfBounds {
                amount,
                message: format!(
                    "zero hash requires at least {}",
                    Self::MIN_AMOUNT
                ),
            });
        }
        Ok(())
    }

    async fn estimate_fees(
        &self,
        amount: Amount,
        _direction: ConversionDirection,
    ) -> Result<Amount, ProviderError> {
        // 25 bps taker fee.
        Ok((amount * Decimal::new(25, 4)).round_down_dp(2))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn state_mapping() {
        assert_eq!(
            ZeroHashAdapter::map_state("terminated").unwrap(),
            ProviderTxStatus::Completed
        );
        assert_eq!(
            ZeroHashAdapter::map_state("rejected").unwrap(),
            ProviderTxStatus::Failed
        );
        assert!(ZeroHashAdapter::map_state("limbo").is_err());
    }
}
