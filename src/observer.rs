//! Relay observability
//!
//! The coordinator reports progress through a `RelayObserver` instead of
//! calling the logger directly, so tests can capture what was reported.

use std::fmt;

use crate::types::{AttemptStatus, BlockHeader, BridgeEvent, RelayAttempt};

/// One human-facing relay record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayRecord {
    pub message: String,
    pub source_block: Option<String>,
    pub transfer_nonce: Option<u64>,
    pub recipient: Option<String>,
    pub amount: Option<String>,
    pub status: Option<AttemptStatus>,
    pub detail: Option<String>,
}

impl RelayRecord {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn block(mut self, header: &BlockHeader) -> Self {
        self.source_block = Some(header.to_string());
        self
    }

    /// Fill block, nonce, recipient and source amount from an event
    pub fn event(mut self, event: &BridgeEvent) -> Self {
        self.source_block = Some(event.source_block.to_string());
        self.transfer_nonce = Some(event.transfer_nonce);
        self.recipient = Some(event.recipient.clone());
        self.amount = Some(event.source_amount.to_string());
        self
    }

    /// Fill fields from an attempt; the amount is the destination amount once known
    pub fn attempt(mut self, attempt: &RelayAttempt) -> Self {
        self.source_block = Some(format!(
            "#{}({})",
            attempt.source_block_height, attempt.source_block_hash
        ));
        self.transfer_nonce = Some(attempt.transfer_nonce);
        self.recipient = Some(attempt.recipient.clone());
        self.amount = Some(
            attempt
                .dest_amount
                .unwrap_or(attempt.source_amount)
                .to_string(),
        );
        self.status = Some(attempt.status);
        self
    }

    pub fn status(mut self, status: AttemptStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn detail(mut self, detail: impl fmt::Display) -> Self {
        self.detail = Some(detail.to_string());
        self
    }
}

impl fmt::Display for RelayRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(detail) = &self.detail {
            write!(f, ": {}", detail)?;
        }
        Ok(())
    }
}

/// Sink for relay records
pub trait RelayObserver: Send + Sync {
    fn info(&self, record: &RelayRecord);
    fn warn(&self, record: &RelayRecord);
    fn error(&self, record: &RelayRecord);
}

/// Emits relay records as `tracing` events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

macro_rules! emit {
    ($level:ident, $record:expr) => {{
        let r = $record;
        tracing::$level!(
            target: "esdt_relayer::relay",
            source_block = r.source_block.as_deref().unwrap_or("-"),
            transfer_nonce = r.transfer_nonce,
            recipient = r.recipient.as_deref().unwrap_or("-"),
            amount = r.amount.as_deref().unwrap_or("-"),
            status = r.status.map(|s| s.as_str()).unwrap_or("-"),
            detail = r.detail.as_deref().unwrap_or(""),
            "{}",
            r.message
        );
    }};
}

impl RelayObserver for TracingObserver {
    fn info(&self, record: &RelayRecord) {
        emit!(info, record);
    }

    fn warn(&self, record: &RelayRecord) {
        emit!(warn, record);
    }

    fn error(&self, record: &RelayRecord) {
        emit!(error, record);
    }
}
