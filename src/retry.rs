//! Retry policy for relay steps
//!
//! Provides exponential backoff and classification of destination gateway
//! error messages into relay error kinds.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::RelayError;

/// Retry configuration for transfer submission and store writes
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of tries, the first one included
    pub max_attempts: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate backoff duration after a given failed try (0-indexed)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let backoff_secs = self.initial_backoff.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let capped = backoff_secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Whether another try is allowed after `failed` tries
    pub fn should_retry(&self, failed: u32) -> bool {
        failed < self.max_attempts
    }
}

/// Classifies gateway errors for retry decisions
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorClass {
    /// Temporary failure (timeout, connection, rate limit)
    Transient,
    /// Custody nonce is behind the chain
    NonceTooLow,
    /// Custody nonce is ahead of the chain
    NonceTooHigh,
    /// The chain refuses the transaction as built
    Permanent,
    Unknown,
}

/// Classify an error message for retry decisions
pub fn classify_error(error: &str) -> ErrorClass {
    let error_lower = error.to_lowercase();

    // Nonce errors
    if error_lower.contains("nonce too low")
        || error_lower.contains("lower nonce")
        || error_lower.contains("lowernonceintx")
        || error_lower.contains("already known")
    {
        return ErrorClass::NonceTooLow;
    }

    if error_lower.contains("nonce too high")
        || error_lower.contains("higher nonce")
        || error_lower.contains("nonce gap")
    {
        return ErrorClass::NonceTooHigh;
    }

    // Refusals mentioning the network fee or a connection are still refusals
    if error_lower.contains("insufficient funds")
        || error_lower.contains("insufficient balance")
        || error_lower.contains("invalid signature")
        || error_lower.contains("signature")
        || error_lower.contains("invalid receiver")
        || error_lower.contains("insufficient gas")
        || error_lower.contains("gas price")
        || error_lower.contains("invalid chain")
        || error_lower.contains("invalid transaction version")
    {
        return ErrorClass::Permanent;
    }

    if error_lower.contains("timeout")
        || error_lower.contains("timed out")
        || error_lower.contains("connection")
        || error_lower.contains("network")
        || error_lower.contains("rate limit")
        || error_lower.contains("too many requests")
        || error_lower.contains("503")
        || error_lower.contains("502")
        || error_lower.contains("temporarily unavailable")
    {
        return ErrorClass::Transient;
    }

    ErrorClass::Unknown
}

/// Map a gateway error message to a relay error. `server_error` tells an
/// unclassified message from a 5xx response apart from a 4xx one.
pub fn relay_error_from_message(message: &str, server_error: bool) -> RelayError {
    match classify_error(message) {
        ErrorClass::Transient => RelayError::Network(message.to_string()),
        ErrorClass::NonceTooLow | ErrorClass::NonceTooHigh => {
            RelayError::NonceMismatch(message.to_string())
        }
        ErrorClass::Permanent => RelayError::Rejected(message.to_string()),
        ErrorClass::Unknown if server_error => RelayError::Network(message.to_string()),
        ErrorClass::Unknown => RelayError::Rejected(message.to_string()),
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the configured number of tries is used up. The closure receives the
/// 0-indexed try number.
pub async fn with_retry<F, T, Fut>(
    config: &RetryConfig,
    what: &str,
    mut operation: F,
) -> Result<T, RelayError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, RelayError>>,
{
    let mut failed = 0u32;

    loop {
        match operation(failed).await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                failed += 1;
                if !config.should_retry(failed) {
                    debug!(operation = what, attempts = failed, "Retries exhausted");
                    return Err(e);
                }
                let backoff = config.backoff_for_attempt(failed - 1);
                warn!(
                    operation = what,
                    attempt = failed,
                    max = config.max_attempts,
                    ?backoff,
                    error = %e,
                    "Retrying after backoff"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}
