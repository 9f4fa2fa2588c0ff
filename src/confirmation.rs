//! Destination transaction confirmation
//!
//! Polls the transaction status until it is executed, fails, or the
//! confirmation deadline passes. Status lookups that error are logged and
//! polled again; only the deadline ends an undecided wait.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::destination_client::TxStatus;
use crate::error::RelayError;
use crate::executor::TransferExecutor;

/// Result of waiting for a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationResult {
    /// Executed successfully on the destination chain
    Confirmed,
    /// Executed and failed, or declared invalid
    Failed(String),
    /// Still undecided when the deadline passed
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct ConfirmationPoller {
    poll_interval: Duration,
    timeout: Duration,
}

impl ConfirmationPoller {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait with the full confirmation window
    pub async fn wait(&self, executor: &TransferExecutor, tx_hash: &str) -> ConfirmationResult {
        self.wait_for(executor, tx_hash, self.timeout).await
    }

    /// Wait at most `remaining`; used when resuming after a restart
    pub async fn wait_for(
        &self,
        executor: &TransferExecutor,
        tx_hash: &str,
        remaining: Duration,
    ) -> ConfirmationResult {
        let deadline = Instant::now() + remaining;

        loop {
            match executor.transaction_status(tx_hash).await {
                Ok(TxStatus::Success) => return ConfirmationResult::Confirmed,
                Ok(TxStatus::Failed(status)) => {
                    warn!(%tx_hash, %status, "Destination transaction failed");
                    return ConfirmationResult::Failed(status);
                }
                Ok(status) => debug!(%tx_hash, ?status, "Transaction not final yet"),
                Err(e) => warn!(%tx_hash, error = %e, "Failed to query transaction status"),
            }

            let now = Instant::now();
            if now >= deadline {
                return ConfirmationResult::TimedOut;
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

impl ConfirmationResult {
    /// Relay error for an unsuccessful result
    pub fn into_error(self, tx_hash: &str, timeout: Duration) -> Option<RelayError> {
        match self {
            ConfirmationResult::Confirmed => None,
            ConfirmationResult::Failed(status) => Some(RelayError::ExecutionFailed {
                tx_hash: tx_hash.to_string(),
                status,
            }),
            ConfirmationResult::TimedOut => Some(RelayError::ConfirmationTimeout {
                tx_hash: tx_hash.to_string(),
                timeout_secs: timeout.as_secs(),
            }),
        }
    }
}
