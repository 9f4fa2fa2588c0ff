//! Source chain client
//!
//! Talks to a Substrate API sidecar in front of the source chain node. Only
//! the semantics the relay consumes are modelled: the finalized head, block
//! hash by height, and the ordered event list of a block.

use std::time::Duration;

use async_trait::async_trait;
use eyre::{Result, WrapErr};
use serde::de::DeserializeOwned;
use serde::{de, Deserialize, Deserializer};

use crate::error::RelayError;
use crate::types::{BlockHeader, RawEvent};

/// Read access to the source chain
#[async_trait]
pub trait SourceChain: Send + Sync {
    /// Latest block the chain reports as finalized
    async fn finalized_head(&self) -> Result<BlockHeader, RelayError>;

    /// Canonical hash of the block at `height`
    async fn block_hash(&self, height: u64) -> Result<String, RelayError>;

    /// All events emitted by the block, in emission order
    async fn events_at(&self, block_hash: &str) -> Result<Vec<RawEvent>, RelayError>;
}

#[derive(Debug, Deserialize)]
struct SidecarBlock {
    #[serde(deserialize_with = "deserialize_string_to_u64")]
    number: u64,
    hash: String,
    #[serde(rename = "onInitialize", default)]
    on_initialize: SidecarPhase,
    #[serde(default)]
    extrinsics: Vec<SidecarPhase>,
    #[serde(rename = "onFinalize", default)]
    on_finalize: SidecarPhase,
}

#[derive(Debug, Default, Deserialize)]
struct SidecarPhase {
    #[serde(default)]
    events: Vec<SidecarEvent>,
}

#[derive(Debug, Deserialize)]
struct SidecarEvent {
    method: SidecarMethod,
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SidecarMethod {
    pallet: String,
    method: String,
}

impl SidecarBlock {
    fn header(&self) -> BlockHeader {
        BlockHeader {
            height: self.number,
            hash: self.hash.clone(),
        }
    }

    /// Flatten the block's events: onInitialize, then each extrinsic, then onFinalize
    fn into_events(self) -> Vec<RawEvent> {
        std::iter::once(self.on_initialize)
            .chain(self.extrinsics)
            .chain(std::iter::once(self.on_finalize))
            .flat_map(|phase| phase.events)
            .enumerate()
            .map(|(index, event)| RawEvent {
                index: index as u32,
                section: event.method.pallet,
                method: event.method.method,
                data: event.data,
            })
            .collect()
    }
}

/// HTTP client for the Substrate API sidecar
pub struct SidecarClient {
    client: reqwest::Client,
    base_url: String,
}

impl SidecarClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .wrap_err("Failed to build source chain HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RelayError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Network(format!(
                "GET {} returned {}: {}",
                path, status, body
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| RelayError::Network(format!("failed to parse {} response: {}", path, e)))
    }
}

#[async_trait]
impl SourceChain for SidecarClient {
    async fn finalized_head(&self) -> Result<BlockHeader, RelayError> {
        let block: SidecarBlock = self
            .get_json("/blocks/head?finalized=true&eventDocs=false&extrinsicDocs=false")
            .await?;
        Ok(block.header())
    }

    async fn block_hash(&self, height: u64) -> Result<String, RelayError> {
        let block: SidecarBlock = self
            .get_json(&format!(
                "/blocks/{}?eventDocs=false&extrinsicDocs=false",
                height
            ))
            .await?;
        if block.number != height {
            return Err(RelayError::Network(format!(
                "asked for block {} but sidecar returned {}",
                height, block.number
            )));
        }
        Ok(block.hash)
    }

    async fn events_at(&self, block_hash: &str) -> Result<Vec<RawEvent>, RelayError> {
        let block: SidecarBlock = self
            .get_json(&format!(
                "/blocks/{}?eventDocs=false&extrinsicDocs=false",
                block_hash
            ))
            .await?;
        tracing::trace!(height = block.number, hash = %block.hash, "Fetched block events");
        Ok(block.into_events())
    }
}

/// Sidecar renders block numbers as decimal strings
fn deserialize_string_to_u64<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrU64Visitor;

    impl de::Visitor<'_> for StringOrU64Visitor {
        type Value = u64;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or integer")
        }

        fn visit_u64<E>(self, value: u64) -> std::result::Result<u64, E>
        where
            E: de::Error,
        {
            Ok(value)
        }

        fn visit_i64<E>(self, value: i64) -> std::result::Result<u64, E>
        where
            E: de::Error,
        {
            u64::try_from(value)
                .map_err(|_| E::custom(format!("negative block number {}", value)))
        }

        fn visit_str<E>(self, value: &str) -> std::result::Result<u64, E>
        where
            E: de::Error,
        {
            value.parse().map_err(E::custom)
        }
    }

    deserializer.deserialize_any(StringOrU64Visitor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_block() -> serde_json::Value {
        json!({
            "number": "1000",
            "hash": "0xfeed",
            "parentHash": "0xbeef",
            "onInitialize": {
                "events": [
                    { "method": { "pallet": "system", "method": "NewAccount" }, "data": ["cTJ..."] }
                ]
            },
            "extrinsics": [
                {
                    "method": { "pallet": "timestamp", "method": "set" },
                    "events": [
                        { "method": { "pallet": "system", "method": "ExtrinsicSuccess" }, "data": [{}] }
                    ]
                },
                {
                    "method": { "pallet": "bridgeTransfer", "method": "transferNative" },
                    "events": [
                        {
                            "method": { "pallet": "chainBridge", "method": "FungibleTransfer" },
                            "data": ["100", "7", "0x0000", "500000000000000", "0x65726431"]
                        },
                        { "method": { "pallet": "system", "method": "ExtrinsicSuccess" }, "data": [{}] }
                    ]
                }
            ],
            "onFinalize": { "events": [] }
        })
    }

    #[test]
    fn test_parse_block_header() {
        let block: SidecarBlock = serde_json::from_value(sample_block()).unwrap();
        assert_eq!(
            block.header(),
            BlockHeader {
                height: 1000,
                hash: "0xfeed".to_string()
            }
        );
    }

    #[test]
    fn test_events_flattened_in_order() {
        let block: SidecarBlock = serde_json::from_value(sample_block()).unwrap();
        let events = block.into_events();

        assert_eq!(events.len(), 4);
        assert_eq!(events[0].qualified_name(), "system.NewAccount");
        assert_eq!(events[2].qualified_name(), "chainBridge.FungibleTransfer");
        assert_eq!(events[2].index, 2);
        assert_eq!(events[2].data[1], json!("7"));
        assert_eq!(events[3].index, 3);
    }

    #[test]
    fn test_numeric_block_number() {
        let block: SidecarBlock =
            serde_json::from_value(json!({ "number": 42, "hash": "0x01" })).unwrap();
        assert_eq!(block.number, 42);
        assert!(block.into_events().is_empty());
    }

    #[test]
    fn test_invalid_block_number() {
        let result: std::result::Result<SidecarBlock, _> =
            serde_json::from_value(json!({ "number": "abc", "hash": "0x01" }));
        assert!(result.is_err());
    }
}
