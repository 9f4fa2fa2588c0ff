//! Outcome store
//!
//! Durable relay attempts keyed by transfer nonce, plus the source block
//! cursor. Postgres in production, in-memory in tests.

use async_trait::async_trait;
use eyre::{Result, WrapErr};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::error;

use crate::error::RelayError;
use crate::types::{AttemptStatus, RelayAttempt};

pub mod memory;
pub mod models;

pub use memory::MemoryAttemptStore;
pub use models::RelayAttemptRow;

/// Durable record of relay attempts
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Insert `attempt` unless a record already exists for its transfer
    /// nonce. Returns true when this call created the record.
    async fn claim(&self, attempt: &RelayAttempt) -> Result<bool, RelayError>;

    async fn get(&self, transfer_nonce: u64) -> Result<Option<RelayAttempt>, RelayError>;

    /// Overwrite the mutable fields of an existing attempt
    async fn save(&self, attempt: &RelayAttempt) -> Result<(), RelayError>;

    /// Newest first, optionally filtered by status
    async fn list(
        &self,
        status: Option<AttemptStatus>,
        limit: u32,
    ) -> Result<Vec<RelayAttempt>, RelayError>;

    async fn count_by_status(&self) -> Result<Vec<(AttemptStatus, u64)>, RelayError>;

    async fn last_processed_block(&self) -> Result<Option<u64>, RelayError>;

    /// Advance the cursor. Never moves it backwards.
    async fn set_last_processed_block(&self, height: u64) -> Result<(), RelayError>;
}

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .wrap_err("Failed to connect to database")
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run database migrations")?;
    Ok(())
}

fn store_error(context: &str, e: sqlx::Error) -> RelayError {
    error!(error = ?e, "SQL error: {}", context);
    RelayError::Store(format!("{}: {}", context, e))
}

fn to_i64(field: &str, value: u64) -> Result<i64, RelayError> {
    i64::try_from(value)
        .map_err(|_| RelayError::Store(format!("{} {} does not fit BIGINT", field, value)))
}

const ATTEMPT_COLUMNS: &str = r#"transfer_nonce, source_block_height, source_block_hash, event_index,
    recipient, source_amount::TEXT AS source_amount, dest_amount::TEXT AS dest_amount, status,
    dest_tx_hash, custody_nonce, attempt_count, last_error, created_at, updated_at, submitted_at"#;

/// Postgres-backed attempt store
#[derive(Clone)]
pub struct PgAttemptStore {
    pool: PgPool,
}

impl PgAttemptStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttemptStore for PgAttemptStore {
    async fn claim(&self, attempt: &RelayAttempt) -> Result<bool, RelayError> {
        let result = sqlx::query(
            r#"
            INSERT INTO relay_attempts (transfer_nonce, source_block_height, source_block_hash,
                event_index, recipient, source_amount, status, attempt_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6::NUMERIC, $7, $8, $9, $10)
            ON CONFLICT (transfer_nonce) DO NOTHING
            "#,
        )
        .bind(to_i64("transfer_nonce", attempt.transfer_nonce)?)
        .bind(to_i64("source_block_height", attempt.source_block_height)?)
        .bind(&attempt.source_block_hash)
        .bind(attempt.event_index as i32)
        .bind(&attempt.recipient)
        .bind(attempt.source_amount.to_string())
        .bind(attempt.status.as_str())
        .bind(attempt.attempt_count as i32)
        .bind(attempt.created_at)
        .bind(attempt.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("Failed to claim relay attempt", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, transfer_nonce: u64) -> Result<Option<RelayAttempt>, RelayError> {
        let row = sqlx::query_as::<_, RelayAttemptRow>(&format!(
            "SELECT {} FROM relay_attempts WHERE transfer_nonce = $1",
            ATTEMPT_COLUMNS
        ))
        .bind(to_i64("transfer_nonce", transfer_nonce)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error("Failed to get relay attempt", e))?;

        row.map(RelayAttempt::try_from).transpose()
    }

    async fn save(&self, attempt: &RelayAttempt) -> Result<(), RelayError> {
        let result = sqlx::query(
            r#"
            UPDATE relay_attempts
            SET status = $2, dest_amount = $3::NUMERIC, dest_tx_hash = $4, custody_nonce = $5,
                attempt_count = $6, last_error = $7, updated_at = $8, submitted_at = $9
            WHERE transfer_nonce = $1
            "#,
        )
        .bind(to_i64("transfer_nonce", attempt.transfer_nonce)?)
        .bind(attempt.status.as_str())
        .bind(attempt.dest_amount.map(|a| a.to_string()))
        .bind(&attempt.dest_tx_hash)
        .bind(
            attempt
                .custody_nonce
                .map(|n| to_i64("custody_nonce", n))
                .transpose()?,
        )
        .bind(attempt.attempt_count as i32)
        .bind(&attempt.last_error)
        .bind(attempt.updated_at)
        .bind(attempt.submitted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("Failed to save relay attempt", e))?;

        if result.rows_affected() == 0 {
            return Err(RelayError::Store(format!(
                "no relay attempt for transfer nonce {}",
                attempt.transfer_nonce
            )));
        }
        Ok(())
    }

    async fn list(
        &self,
        status: Option<AttemptStatus>,
        limit: u32,
    ) -> Result<Vec<RelayAttempt>, RelayError> {
        let rows = sqlx::query_as::<_, RelayAttemptRow>(&format!(
            r#"SELECT {} FROM relay_attempts
               WHERE ($1::VARCHAR IS NULL OR status = $1)
               ORDER BY created_at DESC, transfer_nonce DESC
               LIMIT $2"#,
            ATTEMPT_COLUMNS
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("Failed to list relay attempts", e))?;

        rows.into_iter().map(RelayAttempt::try_from).collect()
    }

    async fn count_by_status(&self) -> Result<Vec<(AttemptStatus, u64)>, RelayError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM relay_attempts GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| store_error("Failed to count relay attempts", e))?;

        rows.into_iter()
            .map(|(status, count)| {
                let status = status
                    .parse::<AttemptStatus>()
                    .map_err(RelayError::Store)?;
                Ok((status, count.max(0) as u64))
            })
            .collect()
    }

    async fn last_processed_block(&self) -> Result<Option<u64>, RelayError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT last_processed_block FROM relay_cursor WHERE id = 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| store_error("Failed to get last processed block", e))?;

        Ok(row.map(|r| r.0.max(0) as u64))
    }

    async fn set_last_processed_block(&self, height: u64) -> Result<(), RelayError> {
        sqlx::query(
            r#"
            INSERT INTO relay_cursor (id, last_processed_block)
            VALUES (1, $1)
            ON CONFLICT (id) DO UPDATE
            SET last_processed_block = GREATEST(relay_cursor.last_processed_block, $1),
                updated_at = NOW()
            "#,
        )
        .bind(to_i64("last_processed_block", height)?)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("Failed to update last processed block", e))?;

        Ok(())
    }
}
