//! Destination-chain transaction model
//!
//! A MultiversX transaction is signed over the JSON serialization of its
//! unsigned fields, in declaration order. The ESDT transfer is expressed in
//! the data field as `ESDTTransfer@<token id hex>@<amount hex>`.

use base64::Engine;
use serde::{Deserialize, Serialize};

/// Built-in function that moves an ESDT token
pub const ESDT_TRANSFER_FUNCTION: &str = "ESDTTransfer";

/// Default gas limit for an ESDT transfer to a wallet address
pub const DEFAULT_ESDT_GAS_LIMIT: u64 = 500_000;

/// Chain-wide parameters fetched from the destination network config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub chain_id: String,
    pub min_gas_price: u64,
    pub min_transaction_version: u32,
}

/// Field order matters: it is the signing order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub nonce: u64,
    pub value: String,
    pub receiver: String,
    pub sender: String,
    pub gas_price: u64,
    pub gas_limit: u64,
    /// Base64 encoded payload
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<String>,
    #[serde(rename = "chainID")]
    pub chain_id: String,
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub signature: Option<String>,
}

impl Transaction {
    /// Bytes covered by the signature (the transaction without its signature)
    pub fn signing_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let unsigned = Transaction {
            signature: None,
            ..self.clone()
        };
        serde_json::to_vec(&unsigned)
    }

    /// Decoded data payload, if any
    pub fn data_utf8(&self) -> Option<String> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(self.data.as_ref()?)
            .ok()?;
        String::from_utf8(raw).ok()
    }
}

/// Hex encoding of an amount, left-padded to an even number of digits
pub fn encode_amount_hex(amount: u128) -> String {
    let hex = format!("{:x}", amount);
    if hex.len() % 2 == 0 {
        hex
    } else {
        format!("0{}", hex)
    }
}

/// Plain-text `ESDTTransfer@<token>@<amount>` call
pub fn esdt_transfer_call(token_identifier: &str, amount: u128) -> String {
    format!(
        "{}@{}@{}",
        ESDT_TRANSFER_FUNCTION,
        hex::encode(token_identifier.as_bytes()),
        encode_amount_hex(amount)
    )
}

/// Build the unsigned ESDT transfer from the custody account to `receiver`
pub fn build_esdt_transfer(
    nonce: u64,
    sender: &str,
    receiver: &str,
    token_identifier: &str,
    amount: u128,
    gas_limit: u64,
    network: &NetworkConfig,
) -> Transaction {
    let call = esdt_transfer_call(token_identifier, amount);
    Transaction {
        nonce,
        value: "0".to_string(),
        receiver: receiver.to_string(),
        sender: sender.to_string(),
        gas_price: network.min_gas_price,
        gas_limit,
        data: Some(base64::engine::general_purpose::STANDARD.encode(call.as_bytes())),
        chain_id: network.chain_id.clone(),
        version: network.min_transaction_version,
        signature: None,
    }
}
