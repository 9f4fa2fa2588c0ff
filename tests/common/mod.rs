//! Shared fixtures for pipeline tests: scripted chain clients, a recording
//! observer and builders for blocks and events.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use esdt_relayer::amount::AmountConverter;
use esdt_relayer::confirmation::ConfirmationPoller;
use esdt_relayer::coordinator::RelayCoordinator;
use esdt_relayer::db::{AttemptStore, MemoryAttemptStore};
use esdt_relayer::decoder::EventDecoder;
use esdt_relayer::destination_client::{DestinationChain, TxStatus};
use esdt_relayer::error::RelayError;
use esdt_relayer::executor::TransferExecutor;
use esdt_relayer::observer::{RelayObserver, RelayRecord};
use esdt_relayer::retry::RetryConfig;
use esdt_relayer::signer::{encode_address, CustodySigner};
use esdt_relayer::source_client::SourceChain;
use esdt_relayer::transaction::{NetworkConfig, Transaction};
use esdt_relayer::types::{AttemptStatus, BlockHeader, RawEvent, RelayAttempt, SourceBlock};

pub const CUSTODY_SECRET: &str = "413f42575f7f26fad3317a778771212fdb80245850981e48b58a4f25e344e8f9";
pub const TOKEN: &str = "CRU-a5f4aa";
pub const EVENT_METHOD: &str = "chainBridge.FungibleTransfer";
pub const RESOURCE_ID: &str = "0x000000000000000000000000000000c76ebe4a02bbc34786d860b355f5a5ce00";

/// Gateway double. Enforces the custody nonce like the real chain and
/// lets tests script send failures and status answers.
pub struct MockGateway {
    pub chain_nonce: Mutex<u64>,
    pub send_script: Mutex<VecDeque<RelayError>>,
    /// Errors returned after the transaction was accepted, as when the
    /// reply is lost on the way back
    pub lost_replies: Mutex<VecDeque<RelayError>>,
    pub statuses: Mutex<VecDeque<TxStatus>>,
    pub default_status: Mutex<TxStatus>,
    pub sent: Mutex<Vec<Transaction>>,
    pub send_calls: Mutex<u32>,
    pub send_delay: Duration,
}

impl MockGateway {
    pub fn new(chain_nonce: u64) -> Self {
        Self {
            chain_nonce: Mutex::new(chain_nonce),
            send_script: Mutex::new(VecDeque::new()),
            lost_replies: Mutex::new(VecDeque::new()),
            statuses: Mutex::new(VecDeque::new()),
            default_status: Mutex::new(TxStatus::Success),
            sent: Mutex::new(Vec::new()),
            send_calls: Mutex::new(0),
            send_delay: Duration::ZERO,
        }
    }

    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    pub fn fail_next_sends(&self, errors: Vec<RelayError>) {
        self.send_script.lock().unwrap().extend(errors);
    }

    pub fn lose_next_replies(&self, errors: Vec<RelayError>) {
        self.lost_replies.lock().unwrap().extend(errors);
    }

    pub fn set_default_status(&self, status: TxStatus) {
        *self.default_status.lock().unwrap() = status;
    }

    pub fn sent(&self) -> Vec<Transaction> {
        self.sent.lock().unwrap().clone()
    }

    pub fn send_calls(&self) -> u32 {
        *self.send_calls.lock().unwrap()
    }

    /// Simulate another party spending the custody account's nonces
    pub fn bump_nonce(&self, nonce: u64) {
        *self.chain_nonce.lock().unwrap() = nonce;
    }
}

#[async_trait]
impl DestinationChain for MockGateway {
    async fn account_nonce(&self, _address: &str) -> Result<u64, RelayError> {
        Ok(*self.chain_nonce.lock().unwrap())
    }

    async fn network_config(&self) -> Result<NetworkConfig, RelayError> {
        Ok(NetworkConfig {
            chain_id: "D".to_string(),
            min_gas_price: 1_000_000_000,
            min_transaction_version: 1,
        })
    }

    async fn send_transaction(&self, tx: &Transaction) -> Result<String, RelayError> {
        if !self.send_delay.is_zero() {
            tokio::time::sleep(self.send_delay).await;
        }
        *self.send_calls.lock().unwrap() += 1;

        if let Some(e) = self.send_script.lock().unwrap().pop_front() {
            return Err(e);
        }

        let mut chain_nonce = self.chain_nonce.lock().unwrap();
        if tx.nonce < *chain_nonce {
            return Err(RelayError::NonceMismatch("lowerNonceInTx: true".to_string()));
        }
        if tx.nonce > *chain_nonce {
            return Err(RelayError::NonceMismatch("nonce too high".to_string()));
        }
        *chain_nonce += 1;
        self.sent.lock().unwrap().push(tx.clone());
        if let Some(e) = self.lost_replies.lock().unwrap().pop_front() {
            return Err(e);
        }
        Ok(format!("{:064x}", tx.nonce))
    }

    async fn transaction_status(&self, _tx_hash: &str) -> Result<TxStatus, RelayError> {
        let scripted = self.statuses.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_else(|| self.default_status.lock().unwrap().clone()))
    }
}

/// Source double serving a fixed set of finalized blocks
pub struct MockSource {
    pub head: Mutex<u64>,
    pub blocks: Mutex<Vec<SourceBlock>>,
}

impl MockSource {
    pub fn new(blocks: Vec<SourceBlock>) -> Self {
        let head = blocks.iter().map(|b| b.header.height).max().unwrap_or(0);
        Self {
            head: Mutex::new(head),
            blocks: Mutex::new(blocks),
        }
    }

    fn find(&self, predicate: impl Fn(&SourceBlock) -> bool) -> Option<SourceBlock> {
        self.blocks.lock().unwrap().iter().find(|b| predicate(b)).cloned()
    }
}

#[async_trait]
impl SourceChain for MockSource {
    async fn finalized_head(&self) -> Result<BlockHeader, RelayError> {
        let height = *self.head.lock().unwrap();
        Ok(self
            .find(|b| b.header.height == height)
            .map(|b| b.header)
            .unwrap_or(BlockHeader {
                height,
                hash: block_hash(height),
            }))
    }

    async fn block_hash(&self, height: u64) -> Result<String, RelayError> {
        Ok(block_hash(height))
    }

    async fn events_at(&self, hash: &str) -> Result<Vec<RawEvent>, RelayError> {
        Ok(self
            .find(|b| b.header.hash == hash)
            .map(|b| b.events)
            .unwrap_or_default())
    }
}

/// Store whose claims fail a fixed number of times before reaching the
/// wrapped store
pub struct FlakyClaims {
    pub inner: Arc<MemoryAttemptStore>,
    pub failures_left: Mutex<u32>,
}

impl FlakyClaims {
    pub fn new(inner: Arc<MemoryAttemptStore>, failures: u32) -> Self {
        Self {
            inner,
            failures_left: Mutex::new(failures),
        }
    }
}

#[async_trait]
impl AttemptStore for FlakyClaims {
    async fn claim(&self, attempt: &RelayAttempt) -> Result<bool, RelayError> {
        {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(RelayError::Store("connection refused".to_string()));
            }
        }
        self.inner.claim(attempt).await
    }

    async fn get(&self, transfer_nonce: u64) -> Result<Option<RelayAttempt>, RelayError> {
        self.inner.get(transfer_nonce).await
    }

    async fn save(&self, attempt: &RelayAttempt) -> Result<(), RelayError> {
        self.inner.save(attempt).await
    }

    async fn list(
        &self,
        status: Option<AttemptStatus>,
        limit: u32,
    ) -> Result<Vec<RelayAttempt>, RelayError> {
        self.inner.list(status, limit).await
    }

    async fn count_by_status(&self) -> Result<Vec<(AttemptStatus, u64)>, RelayError> {
        self.inner.count_by_status().await
    }

    async fn last_processed_block(&self) -> Result<Option<u64>, RelayError> {
        self.inner.last_processed_block().await
    }

    async fn set_last_processed_block(&self, height: u64) -> Result<(), RelayError> {
        self.inner.set_last_processed_block(height).await
    }
}

/// Observer that keeps every record for assertions
#[derive(Default)]
pub struct RecordingObserver {
    pub records: Mutex<Vec<(&'static str, RelayRecord)>>,
}

impl RecordingObserver {
    pub fn messages(&self, level: &str) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, r)| r.message.clone())
            .collect()
    }
}

impl RelayObserver for RecordingObserver {
    fn info(&self, record: &RelayRecord) {
        self.records.lock().unwrap().push(("info", record.clone()));
    }

    fn warn(&self, record: &RelayRecord) {
        self.records.lock().unwrap().push(("warn", record.clone()));
    }

    fn error(&self, record: &RelayRecord) {
        self.records.lock().unwrap().push(("error", record.clone()));
    }
}

pub fn block_hash(height: u64) -> String {
    format!("0x{:064x}", height)
}

/// Recipient address derived from a repeated byte
pub fn recipient(byte: u8) -> String {
    encode_address("erd", &[byte; 32]).unwrap()
}

pub fn transfer_event(index: u32, nonce: u64, amount: &str, recipient: &str) -> RawEvent {
    RawEvent {
        index,
        section: "chainBridge".to_string(),
        method: "FungibleTransfer".to_string(),
        data: vec![
            json!("100"),
            json!(nonce.to_string()),
            json!(RESOURCE_ID),
            json!(amount),
            json!(recipient),
        ],
    }
}

pub fn other_event(index: u32, section: &str, method: &str, data: Vec<Value>) -> RawEvent {
    RawEvent {
        index,
        section: section.to_string(),
        method: method.to_string(),
        data,
    }
}

pub fn block(height: u64, events: Vec<RawEvent>) -> SourceBlock {
    SourceBlock {
        header: BlockHeader {
            height,
            hash: block_hash(height),
        },
        events,
    }
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        backoff_multiplier: 2.0,
    }
}

pub struct Harness {
    pub coordinator: RelayCoordinator,
    pub store: Arc<MemoryAttemptStore>,
    pub gateway: Arc<MockGateway>,
    pub observer: Arc<RecordingObserver>,
    pub executor: Arc<TransferExecutor>,
}

impl Harness {
    pub fn new(gateway: MockGateway) -> Self {
        Self::with_store(gateway, Arc::new(MemoryAttemptStore::new()), Duration::from_millis(200))
    }

    pub fn with_store(
        gateway: MockGateway,
        store: Arc<MemoryAttemptStore>,
        confirmation_timeout: Duration,
    ) -> Self {
        Self::with_backend(gateway, store.clone(), store, confirmation_timeout)
    }

    /// The coordinator talks to `backend`; assertions read `store`
    pub fn with_backend(
        gateway: MockGateway,
        store: Arc<MemoryAttemptStore>,
        backend: Arc<dyn AttemptStore>,
        confirmation_timeout: Duration,
    ) -> Self {
        let gateway = Arc::new(gateway);
        let observer = Arc::new(RecordingObserver::default());
        let signer = CustodySigner::from_hex(CUSTODY_SECRET, "erd").unwrap();
        let executor = Arc::new(TransferExecutor::new(gateway.clone(), signer, TOKEN, 500_000));

        let coordinator = RelayCoordinator::new(
            EventDecoder::new(EVENT_METHOD, "100", "erd"),
            AmountConverter::new(12, 18).unwrap(),
            executor.clone(),
            backend,
            observer.clone(),
            fast_retry(),
            ConfirmationPoller::new(Duration::from_millis(5), confirmation_timeout),
        );

        Self {
            coordinator,
            store,
            gateway,
            observer,
            executor,
        }
    }
}
