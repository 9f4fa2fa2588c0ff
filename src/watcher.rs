//! Source chain watcher
//!
//! Follows the finalized head and delivers every finalized block, with its
//! events, in height order. Heights skipped between two heads are fetched
//! by height within the backfill window; anything older is reported as a
//! gap and not delivered.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::metrics;
use crate::retry::{with_retry, RetryConfig};
use crate::source_client::SourceChain;
use crate::types::{BlockHeader, SourceBlock};

pub struct SourceChainWatcher {
    client: Arc<dyn SourceChain>,
    poll_interval: Duration,
    retry: RetryConfig,
    max_backfill: u64,
    /// Next height to deliver; None until the first head is seen
    next_height: Option<u64>,
}

impl SourceChainWatcher {
    pub fn new(
        client: Arc<dyn SourceChain>,
        poll_interval: Duration,
        retry: RetryConfig,
        max_backfill: u64,
    ) -> Self {
        Self {
            client,
            poll_interval,
            retry,
            max_backfill: max_backfill.max(1),
            next_height: None,
        }
    }

    /// Continue after a previously processed height instead of the current head
    pub fn resume_after(mut self, last_processed: Option<u64>) -> Self {
        self.next_height = last_processed.map(|h| h + 1);
        self
    }

    /// Run until shutdown or until the receiver goes away. Only failing to
    /// reach the source chain at startup is an error.
    pub async fn run(
        mut self,
        blocks: mpsc::Sender<SourceBlock>,
        shutdown: CancellationToken,
    ) -> Result<(), RelayError> {
        let subscribe = with_retry(&self.retry, "subscribe to finalized heads", |_| {
            self.client.finalized_head()
        });
        let head = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            head = subscribe => head?,
        };
        info!(head = %head, resume_from = ?self.next_height, "Subscribed to finalized heads");

        let mut head = head;
        let mut failures = 0u32;
        loop {
            if !self.deliver_up_to(&head, &blocks, &shutdown).await {
                return Ok(());
            }

            let wait = if failures == 0 {
                self.poll_interval
            } else {
                self.retry.backoff_for_attempt(failures - 1)
            };
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(wait) => {}
            }

            match self.client.finalized_head().await {
                Ok(new_head) => {
                    if failures > 0 {
                        info!(head = %new_head, "Reconnected to source chain");
                    }
                    failures = 0;
                    head = new_head;
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    metrics::record_error(e.kind());
                    warn!(failures, error = %e, "Failed to poll finalized head");
                }
            }
        }
    }

    /// Deliver every height from the next expected one through `head`.
    /// Returns false when the watcher should stop.
    async fn deliver_up_to(
        &mut self,
        head: &BlockHeader,
        blocks: &mpsc::Sender<SourceBlock>,
        shutdown: &CancellationToken,
    ) -> bool {
        let mut next = self.next_height.unwrap_or(head.height);
        if head.height < next {
            return true;
        }

        let pending = head.height - next + 1;
        if pending > self.max_backfill {
            let resume = head.height + 1 - self.max_backfill;
            metrics::record_gap();
            warn!(
                from = next,
                to = resume - 1,
                head = head.height,
                "Finalized blocks outside the backfill window were skipped"
            );
            next = resume;
        } else if pending > 1 {
            debug!(from = next, to = head.height, "Backfilling finalized blocks");
        }

        while next <= head.height {
            let known_hash = (next == head.height).then_some(head.hash.as_str());
            let Some(block) = self.fetch_block(next, known_hash, shutdown).await else {
                return false;
            };
            if blocks.send(block).await.is_err() {
                debug!("Block receiver dropped, stopping watcher");
                return false;
            }
            next += 1;
            self.next_height = Some(next);
        }
        true
    }

    /// Fetch one block, retrying until it succeeds or shutdown is requested
    async fn fetch_block(
        &self,
        height: u64,
        known_hash: Option<&str>,
        shutdown: &CancellationToken,
    ) -> Option<SourceBlock> {
        let mut failures = 0u32;
        loop {
            match self.try_fetch_block(height, known_hash).await {
                Ok(block) => return Some(block),
                Err(e) => {
                    let backoff = self.retry.backoff_for_attempt(failures);
                    failures = failures.saturating_add(1);
                    metrics::record_error(e.kind());
                    warn!(height, failures, ?backoff, error = %e, "Failed to fetch finalized block");
                    tokio::select! {
                        _ = shutdown.cancelled() => return None,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }
    }

    async fn try_fetch_block(
        &self,
        height: u64,
        known_hash: Option<&str>,
    ) -> Result<SourceBlock, RelayError> {
        let hash = match known_hash {
            Some(hash) => hash.to_string(),
            None => self.client.block_hash(height).await?,
        };
        let events = self.client.events_at(&hash).await?;
        debug!(height, %hash, events = events.len(), "Got new finalized block");

        Ok(SourceBlock {
            header: BlockHeader { height, hash },
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RawEvent;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Serves heads from a script; the last one repeats
    struct ScriptedSource {
        heads: Mutex<VecDeque<Result<u64, RelayError>>>,
        last_head: Mutex<u64>,
        failing_fetches: Mutex<u32>,
    }

    impl ScriptedSource {
        fn new(heads: Vec<Result<u64, RelayError>>) -> Self {
            Self {
                heads: Mutex::new(heads.into()),
                last_head: Mutex::new(0),
                failing_fetches: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl SourceChain for ScriptedSource {
        async fn finalized_head(&self) -> Result<BlockHeader, RelayError> {
            let next = self.heads.lock().unwrap().pop_front();
            let height = match next {
                Some(Ok(h)) => {
                    *self.last_head.lock().unwrap() = h;
                    h
                }
                Some(Err(e)) => return Err(e),
                None => *self.last_head.lock().unwrap(),
            };
            Ok(BlockHeader {
                height,
                hash: format!("0x{:x}", height),
            })
        }

        async fn block_hash(&self, height: u64) -> Result<String, RelayError> {
            let mut failing = self.failing_fetches.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(RelayError::Network("connection reset".into()));
            }
            Ok(format!("0x{:x}", height))
        }

        async fn events_at(&self, block_hash: &str) -> Result<Vec<RawEvent>, RelayError> {
            Ok(vec![RawEvent {
                index: 0,
                section: "system".to_string(),
                method: "Marker".to_string(),
                data: vec![serde_json::json!(block_hash)],
            }])
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            backoff_multiplier: 2.0,
        }
    }

    fn watcher(source: ScriptedSource, max_backfill: u64) -> SourceChainWatcher {
        SourceChainWatcher::new(
            Arc::new(source),
            Duration::from_millis(1),
            fast_retry(3),
            max_backfill,
        )
    }

    async fn collect(watcher: SourceChainWatcher, count: usize) -> Vec<u64> {
        let (tx, mut rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(watcher.run(tx, shutdown.clone()));

        let mut heights = Vec::new();
        while heights.len() < count {
            let block = rx.recv().await.unwrap();
            assert_eq!(block.header.hash, format!("0x{:x}", block.header.height));
            heights.push(block.header.height);
        }
        shutdown.cancel();
        drop(rx);
        handle.await.unwrap().unwrap();
        heights
    }

    #[tokio::test]
    async fn test_starts_at_current_head_and_backfills() {
        let source = ScriptedSource::new(vec![Ok(1000), Ok(1000), Ok(1003), Ok(1004)]);
        let heights = collect(watcher(source, 64), 5).await;
        assert_eq!(heights, vec![1000, 1001, 1002, 1003, 1004]);
    }

    #[tokio::test]
    async fn test_gap_beyond_backfill_window_is_skipped() {
        let source = ScriptedSource::new(vec![Ok(10), Ok(20)]);
        let heights = collect(watcher(source, 3), 4).await;
        assert_eq!(heights, vec![10, 18, 19, 20]);
    }

    #[tokio::test]
    async fn test_resumes_after_cursor() {
        let source = ScriptedSource::new(vec![Ok(105)]);
        let heights = collect(watcher(source, 64).resume_after(Some(101)), 4).await;
        assert_eq!(heights, vec![102, 103, 104, 105]);
    }

    #[tokio::test]
    async fn test_survives_disconnects() {
        let source = ScriptedSource::new(vec![
            Ok(50),
            Err(RelayError::Network("connection closed".into())),
            Err(RelayError::Network("connection closed".into())),
            Ok(52),
        ]);
        *source.failing_fetches.lock().unwrap() = 2;
        let heights = collect(watcher(source, 64), 3).await;
        assert_eq!(heights, vec![50, 51, 52]);
    }

    #[tokio::test]
    async fn test_initial_subscription_failure_is_fatal() {
        let source = ScriptedSource::new(vec![
            Err(RelayError::Network("refused".into())),
            Err(RelayError::Network("refused".into())),
            Err(RelayError::Network("refused".into())),
        ]);
        let (tx, _rx) = mpsc::channel(1);
        let result = watcher(source, 64).run(tx, CancellationToken::new()).await;
        assert!(matches!(result, Err(RelayError::Network(_))));
    }
}
