//! Destination chain client
//!
//! MultiversX gateway (proxy) REST API. Every response is wrapped in the
//! envelope `{ "data": …, "error": "…", "code": "…" }`; a non-empty `error`
//! is classified into a relay error kind.

use std::time::Duration;

use async_trait::async_trait;
use eyre::{Result, WrapErr};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::error::RelayError;
use crate::retry::relay_error_from_message;
use crate::transaction::{NetworkConfig, Transaction};

/// Execution status of a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    /// Accepted but not yet executed
    Pending,
    /// Executed successfully
    Success,
    /// Executed and failed, or declared invalid
    Failed(String),
    /// The gateway does not know the hash (yet)
    NotFound,
}

impl TxStatus {
    /// Map the gateway's status string
    pub fn from_gateway(status: &str) -> Self {
        match status {
            "success" | "executed" => TxStatus::Success,
            "fail" | "invalid" | "rewardReverted" => TxStatus::Failed(status.to_string()),
            _ => TxStatus::Pending,
        }
    }
}

/// Destination chain operations used by the relay
#[async_trait]
pub trait DestinationChain: Send + Sync {
    async fn account_nonce(&self, address: &str) -> Result<u64, RelayError>;

    async fn network_config(&self) -> Result<NetworkConfig, RelayError>;

    /// Submit a signed transaction; returns its hash once the gateway accepts it
    async fn send_transaction(&self, tx: &Transaction) -> Result<String, RelayError>;

    async fn transaction_status(&self, tx_hash: &str) -> Result<TxStatus, RelayError>;
}

#[derive(Debug, Deserialize)]
struct GatewayEnvelope<T> {
    data: Option<T>,
    #[serde(default)]
    error: String,
    #[serde(default)]
    code: String,
}

#[derive(Debug, Deserialize)]
struct NonceData {
    nonce: u64,
}

#[derive(Debug, Deserialize)]
struct NetworkConfigData {
    config: RawNetworkConfig,
}

#[derive(Debug, Deserialize)]
struct RawNetworkConfig {
    erd_chain_id: String,
    erd_min_gas_price: u64,
    erd_min_transaction_version: u32,
}

#[derive(Debug, Deserialize)]
struct SendData {
    #[serde(rename = "txHash")]
    tx_hash: String,
}

#[derive(Debug, Deserialize)]
struct StatusData {
    status: String,
}

/// HTTP client for the MultiversX gateway
pub struct GatewayClient {
    client: reqwest::Client,
    base_url: String,
}

impl GatewayClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .wrap_err("Failed to build gateway HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, RelayError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).send().await?;
        unwrap_envelope(path, response).await
    }
}

/// Unwrap the gateway envelope, classifying any reported error
async fn unwrap_envelope<T: DeserializeOwned>(
    path: &str,
    response: Response,
) -> Result<T, RelayError> {
    let status = response.status();
    let body = response.text().await?;
    parse_envelope(path, status, &body)
}

fn parse_envelope<T: DeserializeOwned>(
    path: &str,
    status: StatusCode,
    body: &str,
) -> Result<T, RelayError> {
    let envelope: GatewayEnvelope<T> = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(e) => {
            let message = format!("{} returned {} with unreadable body: {}", path, status, e);
            return Err(if status.is_success() || status.is_server_error() {
                RelayError::Network(message)
            } else {
                relay_error_from_message(&message, false)
            });
        }
    };

    if !envelope.error.is_empty() || !status.is_success() {
        let message = if envelope.error.is_empty() {
            format!("{} returned {} ({})", path, status, envelope.code)
        } else {
            envelope.error
        };
        return Err(relay_error_from_message(&message, status.is_server_error()));
    }

    envelope
        .data
        .ok_or_else(|| RelayError::Network(format!("{} returned no data", path)))
}

#[async_trait]
impl DestinationChain for GatewayClient {
    async fn account_nonce(&self, address: &str) -> Result<u64, RelayError> {
        let data: NonceData = self.get(&format!("/address/{}/nonce", address)).await?;
        Ok(data.nonce)
    }

    async fn network_config(&self) -> Result<NetworkConfig, RelayError> {
        let data: NetworkConfigData = self.get("/network/config").await?;
        Ok(NetworkConfig {
            chain_id: data.config.erd_chain_id,
            min_gas_price: data.config.erd_min_gas_price,
            min_transaction_version: data.config.erd_min_transaction_version,
        })
    }

    async fn send_transaction(&self, tx: &Transaction) -> Result<String, RelayError> {
        let url = format!("{}/transaction/send", self.base_url);
        let response = self.client.post(&url).json(tx).send().await?;
        let data: SendData = unwrap_envelope("/transaction/send", response).await?;
        debug!(tx_hash = %data.tx_hash, nonce = tx.nonce, "Gateway accepted transaction");
        Ok(data.tx_hash)
    }

    async fn transaction_status(&self, tx_hash: &str) -> Result<TxStatus, RelayError> {
        let path = format!("/transaction/{}/status", tx_hash);
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if status == StatusCode::NOT_FOUND || body.to_lowercase().contains("not found") {
            return Ok(TxStatus::NotFound);
        }

        let data: StatusData = parse_envelope(&path, status, &body)?;
        Ok(TxStatus::from_gateway(&data.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(TxStatus::from_gateway("success"), TxStatus::Success);
        assert_eq!(TxStatus::from_gateway("executed"), TxStatus::Success);
        assert_eq!(TxStatus::from_gateway("pending"), TxStatus::Pending);
        assert_eq!(TxStatus::from_gateway("received"), TxStatus::Pending);
        assert_eq!(TxStatus::from_gateway("partially-executed"), TxStatus::Pending);
        assert_eq!(
            TxStatus::from_gateway("fail"),
            TxStatus::Failed("fail".to_string())
        );
        assert_eq!(
            TxStatus::from_gateway("invalid"),
            TxStatus::Failed("invalid".to_string())
        );
    }

    #[test]
    fn test_parse_network_config() {
        let body = r#"{"data":{"config":{"erd_chain_id":"1","erd_min_gas_price":1000000000,"erd_min_transaction_version":1,"erd_denomination":18}},"error":"","code":"successful"}"#;
        let data: NetworkConfigData = parse_envelope("/network/config", StatusCode::OK, body).unwrap();
        assert_eq!(data.config.erd_chain_id, "1");
        assert_eq!(data.config.erd_min_gas_price, 1_000_000_000);
        assert_eq!(data.config.erd_min_transaction_version, 1);
    }

    #[test]
    fn test_parse_send_response() {
        let body = r#"{"data":{"txHash":"6c41c71946b5b428c2cfb560e1ea425f8a1ea9a9cd1e8e4bd3a53a4ea4d13dcd"},"error":"","code":"successful"}"#;
        let data: SendData = parse_envelope("/transaction/send", StatusCode::OK, body).unwrap();
        assert!(data.tx_hash.starts_with("6c41c7"));
    }

    #[test]
    fn test_nonce_error_classified() {
        let body = r#"{"data":null,"error":"transaction generation failed: lowerNonceInTx","code":"bad_request"}"#;
        let err = parse_envelope::<SendData>("/transaction/send", StatusCode::BAD_REQUEST, body)
            .unwrap_err();
        assert!(matches!(err, RelayError::NonceMismatch(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_insufficient_funds_rejected() {
        let body = r#"{"data":null,"error":"insufficient funds for address erd1...","code":"bad_request"}"#;
        let err = parse_envelope::<SendData>("/transaction/send", StatusCode::BAD_REQUEST, body)
            .unwrap_err();
        assert!(matches!(err, RelayError::Rejected(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_server_error_is_network() {
        let err = parse_envelope::<SendData>(
            "/transaction/send",
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"data":null,"error":"internal issue","code":"internal_issue"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, RelayError::Network(_)));

        let err = parse_envelope::<SendData>(
            "/transaction/send",
            StatusCode::BAD_GATEWAY,
            "<html>bad gateway</html>",
        )
        .unwrap_err();
        assert!(matches!(err, RelayError::Network(_)));
    }

    #[test]
    fn test_missing_data_is_error() {
        let body = r#"{"data":null,"error":"","code":"successful"}"#;
        assert!(parse_envelope::<NonceData>("/address/x/nonce", StatusCode::OK, body).is_err());
    }
}
