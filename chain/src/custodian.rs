//! The managed-wallet custodian seam.
//!
//! The custodian holds keys and signs transfers; we talk to it over an
//! authenticated REST API. [`CustodianApi`] is the trait the engine consumes
//! so tests can substitute a mock without any HTTP.

use async_trait::async_trait;
use common::{amount::Amount, ids::WithdrawalId};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::types::TokenSymbol;

/// Errors from custodian calls.
#[derive(Debug, thiserror::Error)]
pub enum CustodianError {
    /// The custodian rejected the request (4xx).
    #[error("Custodian rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The custodian failed or the response was unusable (5xx, transport,
    /// decode). May be retried.
    #[error("Custodian unavailable: {0}")]
    Unavailable(String),
}

impl CustodianError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// A request to move funds out of a managed wallet.
#[derive(Clone, Debug, Serialize)]
pub struct TransferFundsRequest {
    pub wallet_id: String,
    pub destination_address: String,
    pub amounts: Vec<Amount>,
    pub token_id: TokenSymbol,
    /// The withdrawal id doubles as the custodian-side idempotency key, so a
    /// crashed-and-retried execution cannot double-send.
    pub idempotency_key: WithdrawalId,
}

/// A token balance held by a managed wallet.
#[derive(Clone, Debug, Deserialize)]
pub struct TokenBalance {
    pub token: TokenSymbol,
    pub amount: Amount,
}

#[async_trait]
pub trait CustodianApi: Send + Sync + 'static {
    /// Requests an on-chain transfer; returns the custodian's transfer id.
    async fn transfer_funds(
        &self,
        req: TransferFundsRequest,
    ) -> Result<String, CustodianError>;

    /// The token balances currently held by the given custodian wallet.
    async fn get_wallet_balances(
        &self,
        custodian_wallet_id: &str,
    ) -> Result<Vec<TokenBalance>, CustodianError>;
}

// --- HTTP client --- //

/// The production [`CustodianApi`]: a thin reqwest client over the
/// custodian's REST API.
pub struct HttpCustodianClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Secret<String>,
}

#[derive(Deserialize)]
struct WalletBalancesResponse {
    token_balances: Vec<WireTokenBalance>,
}

#[derive(Deserialize)]
struct WireTokenBalance {
    token: WireToken,
    amount: Decimal,
}

#[derive(Deserialize)]
struct WireToken {
    symbol: String,
}

impl HttpCustodianClient {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Secret<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
        }
    }

    /// The custodian has returned transfer ids both at the top level and
    /// nested under `data` across API versions; accept either.
    fn extract_transfer_id(
        body: &serde_json::Value,
    ) -> Result<String, CustodianError> {
        body.get("id")
            .or_else(|| body.get("data").and_then(|data| data.get("id")))
            .and_then(|id| id.as_str())
            .map(str::to_owned)
            .ok_or_else(|| {
                CustodianError::Unavailable(
                    "Transfer response missing id".to_owned(),
                )
            })
    }

    async fn handle_error_status(
        response: reqwest::Response,
    ) -> CustodianError {
        let status = response.status();
        let message = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            CustodianError::Rejected {
                status: status.as_u16(),
                message,
            }
        } else {
            CustodianError::Unavailable(format!("HTTP {status}: {message}"))
        }
    }
}

#[async_trait]
impl CustodianApi for HttpCustodianClient {
    #[instrument(skip_all, name = "(custodian-transfer)")]
    async fn transfer_funds(
        &self,
        req: TransferFundsRequest,
    ) -> Result<String, CustodianError> {
        let url = format!("{}/v1/transfers", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .header("Idempotency-Key", req.idempotency_key.to_string())
            .json(&req)
            .send()
            .await
            .map_err(|e| CustodianError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::handle_error_status(response).await);
        }

        let body = response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| CustodianError::Unavailable(e.to_string()))?;
        Self::extract_transfer_id(&body)
    }

    async fn get_wallet_balances(
        &self,
        custodian_wallet_id: &str,
    ) -> Result<Vec<TokenBalance>, CustodianError> {
        let url = format!(
            "{}/v1/wallets/{custodian_wallet_id}/balances",
            self.base_url
        );
        let response = self
            .client
            .get(&url)
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| CustodianError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::handle_error_status(response).await);
        }

        let body = response
            .json::<WalletBalancesResponse>()
            .await
            .map_err(|e| CustodianError::Unavailable(e.to_string()))?;

        body.token_balances
            .into_iter()
            .map(|wire| {
                Ok(TokenBalance {
                    token: TokenSymbol::new(&wire.token.symbol),
                    amount: Amount::try_from_decimal(wire.amount).map_err(
                        |e| CustodianError::Unavailable(e.to_string()),
                    )?,
                })
            })
            .collect()
    }
}

// --- Mock custodian --- //

#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use std::{
        collections::HashMap,
        sync::Mutex,
    };

    use super::*;

    /// An in-memory [`CustodianApi`] for tests: configurable wallet
    /// balances, scriptable transfer failures, and a call log.
    #[derive(Default)]
    pub struct MockCustodian {
        state: Mutex<MockState>,
    }

    #[derive(Default)]
    struct MockState {
        balances: HashMap<String, Vec<TokenBalance>>,
        transfers: Vec<TransferFundsRequest>,
        fail_transfers: bool,
    }

    impl MockCustodian {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_balance(
            &self,
            custodian_wallet_id: impl Into<String>,
            token: TokenSymbol,
            amount: Amount,
        ) {
            self.state
                .lock()
                .unwrap()
                .balances
                .entry(custodian_wallet_id.into())
                .or_default()
                .push(TokenBalance { token, amount });
        }

        /// Makes every subsequent transfer fail with a retryable error.
        pub fn fail_transfers(&self, fail: bool) {
            self.state.lock().unwrap().fail_transfers = fail;
        }

        pub fn transfer_count(&self) -> usize {
            self.state.lock().unwrap().transfers.len()
        }

        pub fn last_transfer(&self) -> Option<TransferFundsRequest> {
            self.state.lock().unwrap().transfers.last().cloned()
        }
    }

    #[async_trait]
    impl CustodianApi for MockCustodian {
        async fn transfer_funds(
            &self,
            req: TransferFundsRequest,
        ) -> Result<String, CustodianError> {
            let mut state = self.state.lock().unwrap();
            if state.fail_transfers {
                return Err(CustodianError::Unavailable(
                    "mock transfer failure".to_owned(),
                ));
            }
            let transfer_id =
                format!("mock-transfer-{}", req.idempotency_key);
            state.transfers.push(req);
            Ok(transfer_id)
        }

        async fn get_wallet_balances(
            &self,
            custodian_wallet_id: &str,
        ) -> Result<Vec<TokenBalance>, CustodianError> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .balances
                .get(custodian_wallet_id)
                .cloned()
                .unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn extract_transfer_id_accepts_both_shapes() {
        let top = serde_json::json!({ "id": "tr_123" });
        assert_eq!(
            HttpCustodianClient::extract_transfer_id(&top).unwrap(),
            "tr_123"
        );

        let nested = serde_json::json!({ "data": { "id": "tr_456" } });
        assert_eq!(
            HttpCustodianClient::extract_transfer_id(&nested).unwrap(),
            "tr_456"
        );

        let missing = serde_json::json!({ "status": "ok" });
        assert!(HttpCustodianClient::extract_transfer_id(&missing).is_err());
    }
}
