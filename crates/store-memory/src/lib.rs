//! In-memory transaction log
//!
//! Reference [`TxStore`] implementation backing the test-suites and small
//! single-store deployments. Records live in a `BTreeMap` keyed by the
//! UUIDv7 transaction id, so scans come back in creation order; the
//! advisory mutex is a single lease slot with an expiry instant, the
//! in-memory analogue of a SETNX-with-TTL lock.
//!
//! Terminal records are retained (visible through `get_tx`) and excluded
//! from the hanging scan; purging them is left to the embedder.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

use tcc_common::{Transaction, TransactionId, TryStatus, TxStatus};
use tcc_coordinator::{StoreError, TxStore};

/// In-memory transaction log with a leased advisory mutex
#[derive(Default)]
pub struct MemoryStore {
    txs: Mutex<BTreeMap<TransactionId, Transaction>>,
    lease: Mutex<Option<Instant>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record, terminal ones included, in creation order.
    /// For observability and tests.
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.txs.lock().values().cloned().collect()
    }
}

#[async_trait]
impl TxStore for MemoryStore {
    async fn create_tx(&self, participant_ids: &[String]) -> Result<TransactionId, StoreError> {
        let mut seen = HashSet::with_capacity(participant_ids.len());
        for id in participant_ids {
            if !seen.insert(id.as_str()) {
                return Err(StoreError::Backend(format!(
                    "duplicate participant id in transaction: {id}"
                )));
            }
        }

        let tx_id = TransactionId::new();
        let tx = Transaction::new(tx_id, participant_ids, Utc::now());
        self.txs.lock().insert(tx_id, tx);
        Ok(tx_id)
    }

    async fn tx_update(
        &self,
        tx_id: TransactionId,
        participant_id: &str,
        accept: bool,
    ) -> Result<(), StoreError> {
        let mut txs = self.txs.lock();
        let tx = txs.get_mut(&tx_id).ok_or(StoreError::NotFound(tx_id))?;
        let state = tx
            .participants
            .iter_mut()
            .find(|state| state.participant_id == participant_id)
            .ok_or_else(|| {
                StoreError::Backend(format!(
                    "participant {participant_id} is not part of transaction {tx_id}"
                ))
            })?;

        // Terminal try statuses never regress; repeated updates are no-ops.
        if state.try_status == TryStatus::Hanging {
            state.try_status = if accept {
                TryStatus::Successful
            } else {
                TryStatus::Failure
            };
        }
        Ok(())
    }

    async fn tx_submit(&self, tx_id: TransactionId, success: bool) -> Result<(), StoreError> {
        let mut txs = self.txs.lock();
        let tx = txs.get_mut(&tx_id).ok_or(StoreError::NotFound(tx_id))?;

        let next = if success {
            TxStatus::Successful
        } else {
            TxStatus::Failure
        };
        match tx.status {
            TxStatus::Hanging => {
                tx.status = next;
                Ok(())
            }
            existing if existing == next => Ok(()),
            existing => Err(StoreError::TerminalConflict { tx_id, existing }),
        }
    }

    async fn get_hanging_txs(&self) -> Result<Vec<Transaction>, StoreError> {
        Ok(self
            .txs
            .lock()
            .values()
            .filter(|tx| tx.status == TxStatus::Hanging)
            .cloned()
            .collect())
    }

    async fn get_tx(&self, tx_id: TransactionId) -> Result<Transaction, StoreError> {
        self.txs
            .lock()
            .get(&tx_id)
            .cloned()
            .ok_or(StoreError::NotFound(tx_id))
    }

    async fn lock(&self, lease: Duration) -> Result<(), StoreError> {
        let mut slot = self.lease.lock();
        let now = Instant::now();
        if let Some(expires_at) = *slot
            && expires_at > now
        {
            return Err(StoreError::LockBusy);
        }
        *slot = Some(now + lease);
        Ok(())
    }

    async fn unlock(&self) -> Result<(), StoreError> {
        self.lease.lock().take();
        Ok(())
    }
}
