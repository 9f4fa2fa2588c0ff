//! In-memory attempt store with the same claim semantics as Postgres

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::AttemptStore;
use crate::error::RelayError;
use crate::types::{AttemptStatus, RelayAttempt};

#[derive(Debug, Default)]
struct Inner {
    attempts: HashMap<u64, RelayAttempt>,
    cursor: Option<u64>,
}

#[derive(Debug, Default)]
pub struct MemoryAttemptStore {
    inner: Mutex<Inner>,
}

impl MemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record as if left behind by an earlier run
    pub async fn insert(&self, attempt: RelayAttempt) {
        self.inner
            .lock()
            .await
            .attempts
            .insert(attempt.transfer_nonce, attempt);
    }

    pub async fn all(&self) -> Vec<RelayAttempt> {
        let mut attempts: Vec<_> = self.inner.lock().await.attempts.values().cloned().collect();
        attempts.sort_by_key(|a| a.transfer_nonce);
        attempts
    }
}

#[async_trait]
impl AttemptStore for MemoryAttemptStore {
    async fn claim(&self, attempt: &RelayAttempt) -> Result<bool, RelayError> {
        let mut inner = self.inner.lock().await;
        if inner.attempts.contains_key(&attempt.transfer_nonce) {
            return Ok(false);
        }
        inner
            .attempts
            .insert(attempt.transfer_nonce, attempt.clone());
        Ok(true)
    }

    async fn get(&self, transfer_nonce: u64) -> Result<Option<RelayAttempt>, RelayError> {
        Ok(self.inner.lock().await.attempts.get(&transfer_nonce).cloned())
    }

    async fn save(&self, attempt: &RelayAttempt) -> Result<(), RelayError> {
        let mut inner = self.inner.lock().await;
        match inner.attempts.get_mut(&attempt.transfer_nonce) {
            Some(existing) => {
                *existing = attempt.clone();
                Ok(())
            }
            None => Err(RelayError::Store(format!(
                "no relay attempt for transfer nonce {}",
                attempt.transfer_nonce
            ))),
        }
    }

    async fn list(
        &self,
        status: Option<AttemptStatus>,
        limit: u32,
    ) -> Result<Vec<RelayAttempt>, RelayError> {
        let inner = self.inner.lock().await;
        let mut attempts: Vec<_> = inner
            .attempts
            .values()
            .filter(|a| status.map_or(true, |s| a.status == s))
            .cloned()
            .collect();
        attempts.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.transfer_nonce.cmp(&a.transfer_nonce))
        });
        attempts.truncate(limit as usize);
        Ok(attempts)
    }

    async fn count_by_status(&self) -> Result<Vec<(AttemptStatus, u64)>, RelayError> {
        let inner = self.inner.lock().await;
        Ok(AttemptStatus::ALL
            .iter()
            .map(|s| {
                let count = inner.attempts.values().filter(|a| a.status == *s).count();
                (*s, count as u64)
            })
            .filter(|(_, count)| *count > 0)
            .collect())
    }

    async fn last_processed_block(&self) -> Result<Option<u64>, RelayError> {
        Ok(self.inner.lock().await.cursor)
    }

    async fn set_last_processed_block(&self, height: u64) -> Result<(), RelayError> {
        let mut inner = self.inner.lock().await;
        inner.cursor = Some(inner.cursor.map_or(height, |c| c.max(height)));
        Ok(())
    }
}
