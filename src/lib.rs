//! CRU ESDT Relayer - Library interface
//!
//! Re-exports internal modules for use in integration tests.

pub mod amount;
pub mod api;
pub mod config;
pub mod confirmation;
pub mod coordinator;
pub mod db;
pub mod decoder;
pub mod destination_client;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod observer;
pub mod retry;
pub mod signer;
pub mod source_client;
pub mod transaction;
pub mod types;
pub mod watcher;
