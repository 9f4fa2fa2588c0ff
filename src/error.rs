//! Error kinds of the relay pipeline
//!
//! Every failure a transfer can hit is one of these. The coordinator decides
//! what happens next from the variant alone: decode problems are skipped,
//! retryable errors are retried with backoff, everything else ends the
//! attempt as `Failed`.

use thiserror::Error;

/// A bridge event matched the transfer signature but its fields do not fit
/// the event schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("expected {expected} data fields, found {found}")]
    WrongArity { expected: usize, found: usize },
    #[error("field {index} ({name}) has an unexpected type: {value}")]
    InvalidType {
        index: usize,
        name: &'static str,
        value: String,
    },
    #[error("field {index} ({name}) is not a valid unsigned integer: {value}")]
    InvalidNumber {
        index: usize,
        name: &'static str,
        value: String,
    },
    #[error("transfer amount is zero")]
    ZeroAmount,
    #[error("recipient {recipient:?} is not a valid address: {reason}")]
    InvalidRecipient { recipient: String, reason: String },
}

/// The source amount cannot be represented exactly in destination units.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("cannot convert from {source_decimals} to {dest_decimals} decimals: only upscaling is supported")]
    UnsupportedDirection {
        source_decimals: u32,
        dest_decimals: u32,
    },
    #[error("amount {amount} shifted by {shift} decimals overflows the destination amount width")]
    Overflow { amount: u128, shift: u32 },
    #[error("amount {amount} is not a multiple of 10^{shift}")]
    Inexact { amount: u128, shift: u32 },
}

/// Top level error of the relay pipeline
#[derive(Debug, Clone, Error)]
pub enum RelayError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    /// RPC call timed out or the connection dropped
    #[error("network error: {0}")]
    Network(String),
    /// Destination chain refused the transaction (e.g. insufficient custody balance)
    #[error("transaction rejected: {0}")]
    Rejected(String),
    /// Custody nonce is out of sync with the destination chain
    #[error("custody nonce mismatch: {0}")]
    NonceMismatch(String),
    /// Transaction landed but its execution failed on the destination chain
    #[error("transaction {tx_hash} failed on the destination chain: {status}")]
    ExecutionFailed { tx_hash: String, status: String },
    /// Submitted but not confirmed in time. Needs manual reconciliation.
    #[error("transaction {tx_hash} not confirmed within {timeout_secs}s")]
    ConfirmationTimeout { tx_hash: String, timeout_secs: u64 },
    /// A signed transaction may have landed but its outcome could not be
    /// established. Never re-signed; needs manual reconciliation.
    #[error("submission at custody nonce {custody_nonce} is in doubt, reconcile manually: {reason}")]
    SubmissionInDoubt { custody_nonce: u64, reason: String },
    #[error("outcome store error: {0}")]
    Store(String),
    #[error("custody key error: {0}")]
    CustodyKey(String),
}

impl RelayError {
    /// Whether the failed step may be attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayError::Network(_) | RelayError::NonceMismatch(_) | RelayError::Store(_)
        )
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Decode(_) => "decode",
            RelayError::Conversion(_) => "conversion",
            RelayError::Network(_) => "network",
            RelayError::Rejected(_) => "rejected",
            RelayError::NonceMismatch(_) => "nonce_mismatch",
            RelayError::ExecutionFailed { .. } => "execution_failed",
            RelayError::ConfirmationTimeout { .. } => "confirmation_timeout",
            RelayError::SubmissionInDoubt { .. } => "submission_in_doubt",
            RelayError::Store(_) => "store",
            RelayError::CustodyKey(_) => "custody_key",
        }
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        RelayError::Network(e.to_string())
    }
}
