//! Relay coordinator
//!
//! Drives every bridge transfer through its attempt state machine:
//!
//! ```text
//! Pending -> Submitted -> Confirmed
//!                      -> Failed   (execution failure or confirmation timeout)
//! Pending -> Failed                (conversion error, rejection, retries exhausted,
//!                                   submission in doubt)
//! ```
//!
//! The attempt record keyed by transfer nonce is the idempotency guard: it
//! is claimed atomically before anything is sent, and an existing record of
//! any status means the transfer is never submitted again by this process.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::amount::AmountConverter;
use crate::confirmation::ConfirmationPoller;
use crate::db::AttemptStore;
use crate::decoder::{Decoded, EventDecoder};
use crate::error::RelayError;
use crate::executor::TransferExecutor;
use crate::metrics;
use crate::observer::{RelayObserver, RelayRecord};
use crate::retry::{with_retry, RetryConfig};
use crate::types::{AttemptStatus, BridgeEvent, RelayAttempt, SourceBlock};

/// Reason recorded for attempts a crashed process left in `Pending`
pub const INTERRUPTED_REASON: &str =
    "interrupted before submission was acknowledged; reconcile manually";

/// What startup recovery found
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Submitted attempts whose confirmation polling was resumed
    pub resumed: usize,
    /// Pending attempts marked failed
    pub interrupted: usize,
}

struct Inner {
    decoder: EventDecoder,
    converter: AmountConverter,
    executor: Arc<TransferExecutor>,
    store: Arc<dyn AttemptStore>,
    observer: Arc<dyn RelayObserver>,
    retry: RetryConfig,
    confirmation: ConfirmationPoller,
    /// Transfers whose claim failed, retried ahead of every new block
    unclaimed: Mutex<Vec<BridgeEvent>>,
}

/// Cheap to clone; clones share the same pipeline
#[derive(Clone)]
pub struct RelayCoordinator {
    inner: Arc<Inner>,
}

impl RelayCoordinator {
    pub fn new(
        decoder: EventDecoder,
        converter: AmountConverter,
        executor: Arc<TransferExecutor>,
        store: Arc<dyn AttemptStore>,
        observer: Arc<dyn RelayObserver>,
        retry: RetryConfig,
        confirmation: ConfirmationPoller,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                decoder,
                converter,
                executor,
                store,
                observer,
                retry,
                confirmation,
                unclaimed: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Consume finalized blocks until the channel closes or shutdown is
    /// requested, then wait for every in-flight transfer to finish.
    pub async fn run(
        &self,
        mut blocks: mpsc::Receiver<SourceBlock>,
        shutdown: CancellationToken,
    ) -> Result<(), RelayError> {
        let mut tasks = JoinSet::new();

        let report = self.recover(&mut tasks).await?;
        if report != RecoveryReport::default() {
            info!(
                resumed = report.resumed,
                interrupted = report.interrupted,
                "Recovered relay attempts from previous run"
            );
        }

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, no longer accepting blocks");
                    break;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    reap(joined);
                }
                block = blocks.recv() => match block {
                    Some(block) => self.handle_block(block, &mut tasks).await,
                    None => {
                        info!("Block stream closed");
                        break;
                    }
                },
            }
            metrics::set_in_flight(tasks.len());
        }

        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "Waiting for in-flight transfers");
        }
        while let Some(joined) = tasks.join_next().await {
            reap(joined);
            metrics::set_in_flight(tasks.len());
        }

        Ok(())
    }

    /// Resume what a previous process left behind. Submitted attempts go
    /// back to confirmation polling for what remains of their window;
    /// Pending ones may or may not have reached the chain and are failed
    /// for manual reconciliation.
    pub async fn recover(&self, tasks: &mut JoinSet<()>) -> Result<RecoveryReport, RelayError> {
        let inner = &self.inner;
        let mut report = RecoveryReport::default();

        let pending = with_retry(&inner.retry, "list pending attempts", |_| {
            inner.store.list(Some(AttemptStatus::Pending), u32::MAX)
        })
        .await?;
        for mut attempt in pending {
            attempt.mark_failed(INTERRUPTED_REASON);
            self.persist(&attempt).await;
            metrics::record_outcome(AttemptStatus::Failed.as_str());
            inner.observer.error(
                &RelayRecord::new("Attempt interrupted by restart")
                    .attempt(&attempt)
                    .detail(INTERRUPTED_REASON),
            );
            report.interrupted += 1;
        }

        let submitted = with_retry(&inner.retry, "list submitted attempts", |_| {
            inner.store.list(Some(AttemptStatus::Submitted), u32::MAX)
        })
        .await?;
        for attempt in submitted {
            let window = inner.confirmation.timeout();
            let remaining = attempt
                .submitted_at
                .and_then(|at| (Utc::now() - at).to_std().ok())
                .map(|elapsed| window.saturating_sub(elapsed))
                .unwrap_or(Duration::ZERO);

            inner.observer.info(
                &RelayRecord::new("Resuming confirmation")
                    .attempt(&attempt)
                    .detail(format!("{}s left", remaining.as_secs())),
            );
            let this = self.clone();
            tasks.spawn(async move {
                this.confirm(attempt, remaining).await;
            });
            report.resumed += 1;
        }

        Ok(report)
    }

    /// Decode a block, claim its transfers and dispatch one task per claimed
    /// transfer. A transfer whose claim fails is kept and claimed again
    /// before the next block; until then the cursor stays below its block.
    pub async fn handle_block(&self, block: SourceBlock, tasks: &mut JoinSet<()>) {
        let inner = &self.inner;
        debug!(block = %block.header, events = block.events.len(), "Handling block");
        let mut unclaimed = inner.unclaimed.lock().await;

        let earlier = std::mem::take(&mut *unclaimed);
        if !earlier.is_empty() {
            info!(count = earlier.len(), "Retrying unrecorded transfers");
        }
        for event in earlier {
            self.dispatch(event, tasks, &mut unclaimed).await;
        }

        for decoded in inner.decoder.decode(&block.header, &block.events) {
            match decoded {
                Decoded::Malformed { event_index, error } => {
                    metrics::record_malformed_event();
                    inner.observer.warn(
                        &RelayRecord::new("Skipping malformed bridge event")
                            .block(&block.header)
                            .detail(format!("event {}: {}", event_index, error)),
                    );
                }
                Decoded::Transfer(event) => {
                    metrics::record_transfer_detected();
                    self.dispatch(event, tasks, &mut unclaimed).await;
                }
            }
        }

        metrics::record_block_processed(block.header.height);
        let height = block.header.height;
        let cursor = match unclaimed.iter().map(|e| e.source_block.height).min() {
            Some(lowest) => {
                // A restart must see the lowest unrecorded block again
                error!(
                    height,
                    unclaimed = unclaimed.len(),
                    lowest,
                    "Transfers not recorded yet, cursor held back"
                );
                match lowest.checked_sub(1) {
                    Some(cursor) => cursor,
                    None => return,
                }
            }
            None => height,
        };
        drop(unclaimed);

        if let Err(e) = with_retry(&inner.retry, "advance block cursor", |_| {
            inner.store.set_last_processed_block(cursor)
        })
        .await
        {
            metrics::record_error(e.kind());
            error!(height = cursor, error = %e, "Failed to advance block cursor");
        }
    }

    /// Claim one transfer and spawn its task, or keep it for another try
    async fn dispatch(
        &self,
        event: BridgeEvent,
        tasks: &mut JoinSet<()>,
        unclaimed: &mut Vec<BridgeEvent>,
    ) {
        match self.claim(&event).await {
            Ok(Some(attempt)) => {
                let this = self.clone();
                tasks.spawn(async move {
                    this.execute(attempt).await;
                });
            }
            Ok(None) => {}
            Err(_) => unclaimed.push(event),
        }
    }

    /// Claim and fully process one transfer. Returns the final attempt, or
    /// None when the transfer was skipped.
    pub async fn relay(&self, event: &BridgeEvent) -> Option<RelayAttempt> {
        let attempt = self.claim(event).await.ok().flatten()?;
        Some(self.execute(attempt).await)
    }

    /// Atomically create the Pending record. None if a record already exists.
    async fn claim(&self, event: &BridgeEvent) -> Result<Option<RelayAttempt>, RelayError> {
        let inner = &self.inner;
        let attempt = RelayAttempt::pending(event);

        match with_retry(&inner.retry, "claim attempt", |_| inner.store.claim(&attempt)).await {
            Ok(true) => {
                inner.observer.info(
                    &RelayRecord::new("New bridge transfer")
                        .event(event)
                        .status(AttemptStatus::Pending),
                );
                Ok(Some(attempt))
            }
            Ok(false) => {
                metrics::record_duplicate();
                let existing = inner.store.get(event.transfer_nonce).await.ok().flatten();
                let mut record = RelayRecord::new("Transfer already recorded, skipping").event(event);
                if let Some(existing) = existing {
                    record = record.status(existing.status);
                }
                inner.observer.info(&record);
                Ok(None)
            }
            Err(e) => {
                metrics::record_error(e.kind());
                inner.observer.error(
                    &RelayRecord::new("Could not record transfer")
                        .event(event)
                        .detail(&e),
                );
                Err(e)
            }
        }
    }

    /// Convert, submit with retries, then confirm
    async fn execute(&self, mut attempt: RelayAttempt) -> RelayAttempt {
        let inner = &self.inner;

        let dest_amount = match inner.converter.convert(attempt.source_amount) {
            Ok(amount) => amount,
            Err(e) => return self.fail(attempt, RelayError::from(e)).await,
        };
        attempt.dest_amount = Some(dest_amount);

        // Signed transaction whose send ended without an answer
        let mut in_doubt = None;
        let submission = loop {
            match inner
                .executor
                .execute(&attempt.recipient, dest_amount, &mut in_doubt)
                .await
            {
                Ok(submission) => break submission,
                Err(e) if e.is_retryable() => {
                    attempt.record_failure(e.to_string());
                    if !inner.retry.should_retry(attempt.attempt_count) {
                        let e = match in_doubt.take() {
                            Some(tx) => RelayError::SubmissionInDoubt {
                                custody_nonce: tx.nonce,
                                reason: e.to_string(),
                            },
                            None => e,
                        };
                        return self.fail(attempt, e).await;
                    }
                    metrics::record_error(e.kind());
                    self.persist(&attempt).await;

                    let backoff = inner.retry.backoff_for_attempt(attempt.attempt_count - 1);
                    inner.observer.warn(
                        &RelayRecord::new("Submission failed, retrying")
                            .attempt(&attempt)
                            .detail(format!(
                                "try {}/{} in {:?}: {}",
                                attempt.attempt_count, inner.retry.max_attempts, backoff, e
                            )),
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return self.fail(attempt, e).await,
            }
        };

        attempt.mark_submitted(submission.tx_hash.clone(), submission.custody_nonce);
        self.persist(&attempt).await;
        inner.observer.info(
            &RelayRecord::new("Transfer submitted")
                .attempt(&attempt)
                .detail(format!(
                    "tx {} with custody nonce {}",
                    submission.tx_hash, submission.custody_nonce
                )),
        );

        let window = inner.confirmation.timeout();
        self.confirm(attempt, window).await
    }

    /// Poll a Submitted attempt to a terminal status. Never resubmits.
    async fn confirm(&self, mut attempt: RelayAttempt, remaining: Duration) -> RelayAttempt {
        let inner = &self.inner;
        let Some(tx_hash) = attempt.dest_tx_hash.clone() else {
            let e = RelayError::Store("submitted attempt has no transaction hash".to_string());
            return self.fail(attempt, e).await;
        };

        let started = Instant::now();
        let result = inner
            .confirmation
            .wait_for(&inner.executor, &tx_hash, remaining)
            .await;
        metrics::record_latency("confirmation", started.elapsed().as_secs_f64());

        match result.into_error(&tx_hash, inner.confirmation.timeout()) {
            None => {
                attempt.mark_confirmed();
                self.persist(&attempt).await;
                metrics::record_outcome(AttemptStatus::Confirmed.as_str());
                inner
                    .observer
                    .info(&RelayRecord::new("Transfer confirmed").attempt(&attempt).detail(&tx_hash));
                attempt
            }
            Some(e) => self.fail(attempt, e).await,
        }
    }

    async fn fail(&self, mut attempt: RelayAttempt, e: RelayError) -> RelayAttempt {
        let inner = &self.inner;
        if let RelayError::SubmissionInDoubt { custody_nonce, .. } = &e {
            attempt.custody_nonce = Some(*custody_nonce);
        }
        attempt.mark_failed(e.to_string());
        self.persist(&attempt).await;
        metrics::record_error(e.kind());
        metrics::record_outcome(AttemptStatus::Failed.as_str());
        inner.observer.error(
            &RelayRecord::new("Transfer failed, manual review required")
                .attempt(&attempt)
                .detail(&e),
        );
        attempt
    }

    /// Write the attempt, retrying store errors. A write that still fails
    /// is reported and the in-memory state carries on.
    async fn persist(&self, attempt: &RelayAttempt) {
        let inner = &self.inner;
        if let Err(e) = with_retry(&inner.retry, "save attempt", |_| inner.store.save(attempt)).await
        {
            metrics::record_error(e.kind());
            inner.observer.error(
                &RelayRecord::new("Failed to persist relay attempt")
                    .attempt(attempt)
                    .detail(&e),
            );
        }
    }
}

fn reap(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        metrics::record_error("task");
        error!(error = %e, "Relay task ended abnormally");
    }
}
