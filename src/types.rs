//! Common types for the relay pipeline
//!
//! Blocks and events observed on the source chain, and the attempt record
//! the coordinator keeps for every transfer nonce.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Finalized source-chain block header
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub hash: String,
}

impl fmt::Display for BlockHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}({})", self.height, self.hash)
    }
}

/// Event as emitted by the source chain, before any schema validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Position of the event in the block's event list
    pub index: u32,
    /// Pallet name, e.g. `chainBridge`
    pub section: String,
    /// Event name, e.g. `FungibleTransfer`
    pub method: String,
    pub data: Vec<serde_json::Value>,
}

impl RawEvent {
    /// Qualified `section.method` name
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.section, self.method)
    }
}

/// A finalized block together with its ordered events
#[derive(Debug, Clone, PartialEq)]
pub struct SourceBlock {
    pub header: BlockHeader,
    pub events: Vec<RawEvent>,
}

/// A decoded cross-chain transfer request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeEvent {
    pub source_block: BlockHeader,
    pub event_index: u32,
    /// Idempotency key. Unique and strictly increasing on the source chain.
    pub transfer_nonce: u64,
    /// Destination-chain bech32 address
    pub recipient: String,
    /// Amount in source-chain minimal units
    pub source_amount: u128,
}

/// Processing status of a relay attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Pending,
    Submitted,
    Confirmed,
    Failed,
}

impl AttemptStatus {
    pub const ALL: [AttemptStatus; 4] = [
        AttemptStatus::Pending,
        AttemptStatus::Submitted,
        AttemptStatus::Confirmed,
        AttemptStatus::Failed,
    ];

    /// Get the status as a lowercase string
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Pending => "pending",
            AttemptStatus::Submitted => "submitted",
            AttemptStatus::Confirmed => "confirmed",
            AttemptStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptStatus::Confirmed | AttemptStatus::Failed)
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AttemptStatus::Pending),
            "submitted" => Ok(AttemptStatus::Submitted),
            "confirmed" => Ok(AttemptStatus::Confirmed),
            "failed" => Ok(AttemptStatus::Failed),
            other => Err(format!("unknown attempt status: {}", other)),
        }
    }
}

/// Durable record of relaying one transfer nonce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayAttempt {
    pub transfer_nonce: u64,
    pub source_block_height: u64,
    pub source_block_hash: String,
    pub event_index: u32,
    pub recipient: String,
    pub source_amount: u128,
    /// Set once the amount has been converted
    pub dest_amount: Option<u128>,
    pub status: AttemptStatus,
    pub dest_tx_hash: Option<String>,
    /// Custody nonce of the accepted submission
    pub custody_nonce: Option<u64>,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl RelayAttempt {
    /// Fresh `Pending` attempt for a decoded event
    pub fn pending(event: &BridgeEvent) -> Self {
        let now = Utc::now();
        Self {
            transfer_nonce: event.transfer_nonce,
            source_block_height: event.source_block.height,
            source_block_hash: event.source_block.hash.clone(),
            event_index: event.event_index,
            recipient: event.recipient.clone(),
            source_amount: event.source_amount,
            dest_amount: None,
            status: AttemptStatus::Pending,
            dest_tx_hash: None,
            custody_nonce: None,
            attempt_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            submitted_at: None,
        }
    }

    pub fn mark_submitted(&mut self, tx_hash: String, custody_nonce: u64) {
        let now = Utc::now();
        self.status = AttemptStatus::Submitted;
        self.dest_tx_hash = Some(tx_hash);
        self.custody_nonce = Some(custody_nonce);
        self.submitted_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_confirmed(&mut self) {
        self.status = AttemptStatus::Confirmed;
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = AttemptStatus::Failed;
        self.last_error = Some(error.into());
        self.updated_at = Utc::now();
    }

    /// Count a failed try that leaves the attempt `Pending`
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.attempt_count += 1;
        self.last_error = Some(error.into());
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> BridgeEvent {
        BridgeEvent {
            source_block: BlockHeader {
                height: 1000,
                hash: "0xabc".to_string(),
            },
            event_index: 3,
            transfer_nonce: 7,
            recipient: "erd1recipient".to_string(),
            source_amount: 500_000_000_000_000,
        }
    }

    #[test]
    fn test_status_as_str() {
        assert_eq!(AttemptStatus::Pending.as_str(), "pending");
        assert_eq!(AttemptStatus::Submitted.as_str(), "submitted");
        assert_eq!(AttemptStatus::Confirmed.as_str(), "confirmed");
        assert_eq!(AttemptStatus::Failed.as_str(), "failed");
    }

    #[test]
    fn test_status_parse() {
        for status in AttemptStatus::ALL {
            assert_eq!(status.as_str().parse::<AttemptStatus>().unwrap(), status);
        }
        assert!("reorged".parse::<AttemptStatus>().is_err());
    }

    #[test]
    fn test_status_terminal() {
        assert!(!AttemptStatus::Pending.is_terminal());
        assert!(!AttemptStatus::Submitted.is_terminal());
        assert!(AttemptStatus::Confirmed.is_terminal());
        assert!(AttemptStatus::Failed.is_terminal());
    }

    #[test]
    fn test_pending_attempt_from_event() {
        let attempt = RelayAttempt::pending(&sample_event());
        assert_eq!(attempt.transfer_nonce, 7);
        assert_eq!(attempt.source_block_height, 1000);
        assert_eq!(attempt.status, AttemptStatus::Pending);
        assert_eq!(attempt.attempt_count, 0);
        assert!(attempt.dest_tx_hash.is_none());
    }

    #[test]
    fn test_attempt_transitions() {
        let mut attempt = RelayAttempt::pending(&sample_event());
        attempt.record_failure("connection reset");
        assert_eq!(attempt.attempt_count, 1);
        assert_eq!(attempt.status, AttemptStatus::Pending);

        attempt.mark_submitted("f00d".to_string(), 42);
        assert_eq!(attempt.status, AttemptStatus::Submitted);
        assert_eq!(attempt.custody_nonce, Some(42));
        assert!(attempt.submitted_at.is_some());

        attempt.mark_confirmed();
        assert_eq!(attempt.status, AttemptStatus::Confirmed);
    }

    #[test]
    fn test_header_display() {
        let header = BlockHeader {
            height: 1000,
            hash: "0xabc".to_string(),
        };
        assert_eq!(header.to_string(), "#1000(0xabc)");
    }
}
