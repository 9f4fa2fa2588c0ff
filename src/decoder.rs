//! Bridge event decoding
//!
//! `FungibleTransfer(dest_chain_id, deposit_nonce, resource_id, amount, recipient)`
//! is selected by its qualified method name and the destination discriminant
//! in field 0, then validated field by field. A malformed event is rejected
//! as a whole and never affects its siblings.

use serde_json::Value;

use crate::error::DecodeError;
use crate::signer::decode_address;
use crate::types::{BlockHeader, BridgeEvent, RawEvent};

/// Number of data fields of a bridge transfer event
pub const TRANSFER_EVENT_ARITY: usize = 5;

const FIELD_DISCRIMINANT: usize = 0;
const FIELD_NONCE: usize = 1;
const FIELD_AMOUNT: usize = 3;
const FIELD_RECIPIENT: usize = 4;

/// Outcome of decoding one selected event
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Transfer(BridgeEvent),
    Malformed { event_index: u32, error: DecodeError },
}

/// Selects and decodes bridge transfer events
#[derive(Debug, Clone)]
pub struct EventDecoder {
    event_method: String,
    discriminant: String,
    address_hrp: String,
}

impl EventDecoder {
    pub fn new(
        event_method: impl Into<String>,
        discriminant: impl Into<String>,
        address_hrp: impl Into<String>,
    ) -> Self {
        Self {
            event_method: event_method.into(),
            discriminant: discriminant.into(),
            address_hrp: address_hrp.into(),
        }
    }

    /// Decode every selected event of a block, in event order
    pub fn decode(&self, header: &BlockHeader, events: &[RawEvent]) -> Vec<Decoded> {
        events
            .iter()
            .filter(|event| self.is_selected(event))
            .map(|event| match self.decode_event(header, event) {
                Ok(transfer) => Decoded::Transfer(transfer),
                Err(error) => Decoded::Malformed {
                    event_index: event.index,
                    error,
                },
            })
            .collect()
    }

    /// Matching method and, when present, a matching discriminant. An event
    /// with the right method but no fields at all is selected so that it is
    /// reported as malformed.
    fn is_selected(&self, event: &RawEvent) -> bool {
        if event.qualified_name() != self.event_method {
            return false;
        }
        match event.data.get(FIELD_DISCRIMINANT) {
            None => true,
            Some(value) => scalar_text(value).as_deref() == Some(self.discriminant.as_str()),
        }
    }

    fn decode_event(&self, header: &BlockHeader, event: &RawEvent) -> Result<BridgeEvent, DecodeError> {
        if event.data.len() != TRANSFER_EVENT_ARITY {
            return Err(DecodeError::WrongArity {
                expected: TRANSFER_EVENT_ARITY,
                found: event.data.len(),
            });
        }

        let nonce = parse_unsigned(&event.data[FIELD_NONCE], FIELD_NONCE, "nonce")?;
        let transfer_nonce = u64::try_from(nonce).map_err(|_| DecodeError::InvalidNumber {
            index: FIELD_NONCE,
            name: "nonce",
            value: nonce.to_string(),
        })?;

        let source_amount = parse_unsigned(&event.data[FIELD_AMOUNT], FIELD_AMOUNT, "amount")?;
        if source_amount == 0 {
            return Err(DecodeError::ZeroAmount);
        }

        let recipient = self.parse_recipient(&event.data[FIELD_RECIPIENT])?;

        Ok(BridgeEvent {
            source_block: header.clone(),
            event_index: event.index,
            transfer_nonce,
            recipient,
            source_amount,
        })
    }

    fn parse_recipient(&self, value: &Value) -> Result<String, DecodeError> {
        let raw = value.as_str().ok_or_else(|| DecodeError::InvalidType {
            index: FIELD_RECIPIENT,
            name: "recipient",
            value: value.to_string(),
        })?;

        // Vec<u8> fields may come back hex encoded
        let recipient = match raw.strip_prefix("0x") {
            Some(hex_part) => {
                let bytes = hex::decode(hex_part).map_err(|e| DecodeError::InvalidRecipient {
                    recipient: raw.to_string(),
                    reason: format!("bad hex: {}", e),
                })?;
                String::from_utf8(bytes).map_err(|_| DecodeError::InvalidRecipient {
                    recipient: raw.to_string(),
                    reason: "not valid UTF-8".to_string(),
                })?
            }
            None => raw.to_string(),
        };

        decode_address(&self.address_hrp, &recipient)
            .map_err(|reason| DecodeError::InvalidRecipient {
                recipient: recipient.clone(),
                reason,
            })?;

        Ok(recipient)
    }
}

/// Text form of a string or integer field
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Decimal string, JSON integer, or 0x-prefixed hex string
fn parse_unsigned(value: &Value, index: usize, name: &'static str) -> Result<u128, DecodeError> {
    let invalid = || DecodeError::InvalidNumber {
        index,
        name,
        value: value.to_string(),
    };

    match value {
        Value::Number(n) => n.as_u64().map(u128::from).ok_or_else(invalid),
        Value::String(s) => {
            let s = s.trim();
            if let Some(hex_part) = s.strip_prefix("0x") {
                if hex_part.is_empty() {
                    return Err(invalid());
                }
                u128::from_str_radix(hex_part, 16).map_err(|_| invalid())
            } else if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
                s.parse::<u128>().map_err(|_| invalid())
            } else {
                Err(invalid())
            }
        }
        _ => Err(DecodeError::InvalidType {
            index,
            name,
            value: value.to_string(),
        }),
    }
}
