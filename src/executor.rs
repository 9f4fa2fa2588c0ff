//! Transfer execution on the destination chain
//!
//! The custody account nonce is a shared resource: the executor keeps the
//! next nonce behind a mutex and holds the guard across build, sign and
//! submit, so concurrent transfers get distinct, gapless nonces. A signed
//! transaction is never replaced by one at a fresh nonce while its first
//! submission may have landed.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::destination_client::{DestinationChain, TxStatus};
use crate::error::RelayError;
use crate::metrics;
use crate::signer::CustodySigner;
use crate::transaction::{build_esdt_transfer, NetworkConfig, Transaction};

/// Accepted submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub tx_hash: String,
    pub custody_nonce: u64,
}

/// Custody account state as last synced from the chain
#[derive(Debug, Default)]
struct CustodyState {
    next_nonce: Option<u64>,
    network: Option<NetworkConfig>,
}

impl CustodyState {
    fn invalidate(&mut self) {
        self.next_nonce = None;
    }
}

/// Builds, signs and submits ESDT transfers from the custody account
pub struct TransferExecutor {
    client: Arc<dyn DestinationChain>,
    signer: CustodySigner,
    token_identifier: String,
    gas_limit: u64,
    state: Mutex<CustodyState>,
}

impl TransferExecutor {
    pub fn new(
        client: Arc<dyn DestinationChain>,
        signer: CustodySigner,
        token_identifier: impl Into<String>,
        gas_limit: u64,
    ) -> Self {
        Self {
            client,
            signer,
            token_identifier: token_identifier.into(),
            gas_limit,
            state: Mutex::new(CustodyState::default()),
        }
    }

    pub fn custody_address(&self) -> &str {
        self.signer.address()
    }

    /// Refresh network config and custody nonce from the chain
    pub async fn sync(&self) -> Result<(), RelayError> {
        let mut state = self.state.lock().await;
        self.sync_locked(&mut state).await
    }

    async fn sync_locked(&self, state: &mut CustodyState) -> Result<(), RelayError> {
        let network = self.client.network_config().await?;
        let nonce = self.client.account_nonce(self.signer.address()).await?;

        info!(
            custody = %self.signer.address(),
            nonce,
            chain_id = %network.chain_id,
            min_gas_price = network.min_gas_price,
            "Synced custody account"
        );
        metrics::set_custody_nonce(nonce);

        state.network = Some(network);
        state.next_nonce = Some(nonce);
        Ok(())
    }

    /// Transfer `amount` destination units to `recipient`. Returns once the
    /// gateway accepts the transaction; confirmation is the caller's job.
    ///
    /// `in_doubt` belongs to one transfer and carries a signed transaction
    /// across calls. A network error on send may hide an accepted
    /// transaction, so the signed transaction is parked there and the next
    /// call resends it byte for byte instead of signing a new one.
    pub async fn execute(
        &self,
        recipient: &str,
        amount: u128,
        in_doubt: &mut Option<Transaction>,
    ) -> Result<Submission, RelayError> {
        let mut state = self.state.lock().await;

        if let Some(tx) = in_doubt.clone() {
            return self.resend_locked(&mut state, tx, in_doubt).await;
        }

        let (nonce, network) = match (state.next_nonce, state.network.clone()) {
            (Some(nonce), Some(network)) => (nonce, network),
            _ => {
                self.sync_locked(&mut state).await?;
                match (state.next_nonce, state.network.clone()) {
                    (Some(nonce), Some(network)) => (nonce, network),
                    _ => {
                        return Err(RelayError::Network(
                            "custody account state unavailable after sync".to_string(),
                        ))
                    }
                }
            }
        };

        let mut tx = build_esdt_transfer(
            nonce,
            self.signer.address(),
            recipient,
            &self.token_identifier,
            amount,
            self.gas_limit,
            &network,
        );
        self.signer.sign(&mut tx)?;

        match self.send(&tx).await {
            Ok(tx_hash) => {
                state.next_nonce = Some(nonce + 1);
                metrics::set_custody_nonce(nonce + 1);
                debug!(%tx_hash, nonce, %recipient, amount = %amount, "Transfer submitted");
                Ok(Submission {
                    tx_hash,
                    custody_nonce: nonce,
                })
            }
            Err(e @ RelayError::Network(_)) => {
                warn!(nonce, error = %e, "Submission outcome unknown, keeping signed transaction");
                *in_doubt = Some(tx);
                Err(e)
            }
            Err(e) => {
                if let RelayError::NonceMismatch(_) = e {
                    warn!(nonce, error = %e, "Custody nonce out of sync, will re-sync");
                    state.invalidate();
                }
                // Otherwise the nonce was not consumed and stays for the next transfer
                Err(e)
            }
        }
    }

    /// Resend a transaction whose first submission ended in a network error
    async fn resend_locked(
        &self,
        state: &mut CustodyState,
        tx: Transaction,
        in_doubt: &mut Option<Transaction>,
    ) -> Result<Submission, RelayError> {
        let nonce = tx.nonce;

        match self.send(&tx).await {
            Ok(tx_hash) => {
                *in_doubt = None;
                if let Some(next) = state.next_nonce {
                    if next <= nonce {
                        state.next_nonce = Some(nonce + 1);
                        metrics::set_custody_nonce(nonce + 1);
                    }
                }
                info!(%tx_hash, nonce, "Resent transaction accepted");
                Ok(Submission {
                    tx_hash,
                    custody_nonce: nonce,
                })
            }
            Err(e @ RelayError::Network(_)) => Err(e),
            Err(e) => {
                // The nonce may have been spent by the first send
                *in_doubt = None;
                if let RelayError::NonceMismatch(_) = e {
                    state.invalidate();
                }
                warn!(nonce, error = %e, "Resend refused, submission outcome unknown");
                Err(RelayError::SubmissionInDoubt {
                    custody_nonce: nonce,
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn send(&self, tx: &Transaction) -> Result<String, RelayError> {
        let started = Instant::now();
        let result = self.client.send_transaction(tx).await;
        metrics::record_latency("submission", started.elapsed().as_secs_f64());

        match &result {
            Ok(_) => metrics::record_submission(true),
            Err(e) => {
                metrics::record_submission(false);
                metrics::record_error(e.kind());
            }
        }
        result
    }

    pub async fn transaction_status(&self, tx_hash: &str) -> Result<TxStatus, RelayError> {
        self.client.transaction_status(tx_hash).await
    }

    /// Next nonce the executor would use, if synced
    pub async fn next_nonce(&self) -> Option<u64> {
        self.state.lock().await.next_nonce
    }
}
