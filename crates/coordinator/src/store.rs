//! The transaction log contract
//!
//! The store is the durable side of the protocol: it persists one record per
//! transaction and arbitrates recovery between coordinator instances with a
//! coarse leased mutex. The coordinator never retries phase one — recovery
//! always replays from what the store recorded.

use async_trait::async_trait;
use std::time::Duration;

use tcc_common::{Transaction, TransactionId, TxStatus};
use thiserror::Error;

/// Errors surfaced by a transaction log implementation
#[derive(Debug, Error)]
pub enum StoreError {
    /// The advisory mutex is currently leased to another coordinator.
    /// Recovery treats this as "someone else is driving", not as a failure.
    #[error("transaction log lock is held elsewhere")]
    LockBusy,

    /// No record exists for the given id
    #[error("transaction not found: {0}")]
    NotFound(TransactionId),

    /// `tx_submit` contradicted an already-terminal record
    #[error("transaction {tx_id} already submitted as {existing:?}")]
    TerminalConflict {
        tx_id: TransactionId,
        existing: TxStatus,
    },

    /// Failure in the backing storage
    #[error("store backend: {0}")]
    Backend(String),
}

/// Durable log of transaction records plus a cross-process advisory mutex.
///
/// Implementations must make `tx_update` linearizable per
/// `(tx_id, participant_id)` and keep both try statuses and the transaction
/// status monotonic: once terminal, a status never regresses.
#[async_trait]
pub trait TxStore: Send + Sync {
    /// Persist a new record with every participant hanging and return its
    /// globally unique id.
    async fn create_tx(&self, participant_ids: &[String]) -> Result<TransactionId, StoreError>;

    /// Record one participant's Try outcome. Idempotent.
    async fn tx_update(
        &self,
        tx_id: TransactionId,
        participant_id: &str,
        accept: bool,
    ) -> Result<(), StoreError>;

    /// Submit the terminal transaction status. Idempotent; submitting the
    /// opposite terminal status fails with [`StoreError::TerminalConflict`].
    async fn tx_submit(&self, tx_id: TransactionId, success: bool) -> Result<(), StoreError>;

    /// Every record whose status is still hanging, in creation order.
    async fn get_hanging_txs(&self) -> Result<Vec<Transaction>, StoreError>;

    /// Fetch one record.
    async fn get_tx(&self, tx_id: TransactionId) -> Result<Transaction, StoreError>;

    /// Acquire the advisory mutex with a lease; the lease auto-expires so a
    /// crashed holder cannot stall recovery. Fails with
    /// [`StoreError::LockBusy`] while leased elsewhere.
    async fn lock(&self, lease: Duration) -> Result<(), StoreError>;

    /// Release the advisory mutex.
    async fn unlock(&self) -> Result<(), StoreError>;
}
