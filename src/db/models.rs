use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::error::RelayError;
use crate::types::{AttemptStatus, RelayAttempt};

// Amounts are NUMERIC(78,0) in the database. They are bound as text and cast
// with $n::NUMERIC on the way in, and read back with amount::TEXT.

/// Row of the relay_attempts table
#[derive(Debug, Clone, FromRow)]
pub struct RelayAttemptRow {
    pub transfer_nonce: i64,
    pub source_block_height: i64,
    pub source_block_hash: String,
    pub event_index: i32,
    pub recipient: String,
    pub source_amount: String,
    pub dest_amount: Option<String>,
    pub status: String,
    pub dest_tx_hash: Option<String>,
    pub custody_nonce: Option<i64>,
    pub attempt_count: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
}

fn corrupt(field: &str, value: impl std::fmt::Display) -> RelayError {
    RelayError::Store(format!("stored {} is invalid: {}", field, value))
}

fn parse_amount(field: &str, value: &str) -> Result<u128, RelayError> {
    value.parse().map_err(|_| corrupt(field, value))
}

fn to_u64(field: &str, value: i64) -> Result<u64, RelayError> {
    u64::try_from(value).map_err(|_| corrupt(field, value))
}

impl TryFrom<RelayAttemptRow> for RelayAttempt {
    type Error = RelayError;

    fn try_from(row: RelayAttemptRow) -> Result<Self, Self::Error> {
        Ok(RelayAttempt {
            transfer_nonce: to_u64("transfer_nonce", row.transfer_nonce)?,
            source_block_height: to_u64("source_block_height", row.source_block_height)?,
            source_block_hash: row.source_block_hash,
            event_index: u32::try_from(row.event_index)
                .map_err(|_| corrupt("event_index", row.event_index))?,
            recipient: row.recipient,
            source_amount: parse_amount("source_amount", &row.source_amount)?,
            dest_amount: row
                .dest_amount
                .as_deref()
                .map(|v| parse_amount("dest_amount", v))
                .transpose()?,
            status: row
                .status
                .parse::<AttemptStatus>()
                .map_err(|e| corrupt("status", e))?,
            dest_tx_hash: row.dest_tx_hash,
            custody_nonce: row
                .custody_nonce
                .map(|v| to_u64("custody_nonce", v))
                .transpose()?,
            attempt_count: u32::try_from(row.attempt_count)
                .map_err(|_| corrupt("attempt_count", row.attempt_count))?,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            submitted_at: row.submitted_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> RelayAttemptRow {
        let now = Utc::now();
        RelayAttemptRow {
            transfer_nonce: 7,
            source_block_height: 1000,
            source_block_hash: "0xabc".to_string(),
            event_index: 2,
            recipient: "erd1xyz".to_string(),
            source_amount: "500000000000000".to_string(),
            dest_amount: Some("500000000000000000000".to_string()),
            status: "submitted".to_string(),
            dest_tx_hash: Some("f00d".to_string()),
            custody_nonce: Some(41),
            attempt_count: 1,
            last_error: None,
            created_at: now,
            updated_at: now,
            submitted_at: Some(now),
        }
    }

    #[test]
    fn test_row_to_attempt() {
        let attempt = RelayAttempt::try_from(row()).unwrap();
        assert_eq!(attempt.transfer_nonce, 7);
        assert_eq!(attempt.dest_amount, Some(500_000_000_000_000_000_000));
        assert_eq!(attempt.status, AttemptStatus::Submitted);
        assert_eq!(attempt.custody_nonce, Some(41));
    }

    #[test]
    fn test_corrupt_rows_rejected() {
        let mut bad_status = row();
        bad_status.status = "lost".to_string();
        assert!(RelayAttempt::try_from(bad_status).is_err());

        let mut bad_amount = row();
        bad_amount.source_amount = "1.5".to_string();
        assert!(RelayAttempt::try_from(bad_amount).is_err());

        let mut negative = row();
        negative.transfer_nonce = -1;
        assert!(RelayAttempt::try_from(negative).is_err());
    }
}
