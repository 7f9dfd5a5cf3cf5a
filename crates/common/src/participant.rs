//! The participant capability
//!
//! A participant is one resource manager taking part in a distributed
//! transaction. It reserves resources in `try_reserve`, then either commits
//! the reservation in `confirm` or releases it in `cancel`. The coordinator
//! only ever talks to participants through this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

use crate::TransactionId;

/// Errors a participant can surface to the coordinator
#[derive(Debug, Error)]
pub enum ParticipantError {
    /// The requested phase contradicts the participant's recorded history
    /// (e.g. Confirm arriving after Cancel). Not retryable.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Transport or storage failure on the participant side. Retryable.
    #[error("{0}")]
    Other(String),
}

/// Request handed to a participant's Try phase.
///
/// `data` is an opaque key/value payload passed through verbatim from the
/// caller of `Coordinator::transaction`; the coordinator never inspects it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TryRequest {
    pub participant_id: String,
    pub tx_id: TransactionId,
    pub data: HashMap<String, Value>,
}

/// Response from any participant phase.
///
/// `ack = true` means the participant's state for this transaction is now
/// (or already was) consistent with the requested phase. `ack = false` is an
/// in-band rejection that no retry will fix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TccResponse {
    pub participant_id: String,
    pub tx_id: TransactionId,
    pub ack: bool,
}

/// A resource manager implementing the Try-Confirm/Cancel contract.
///
/// All three phase operations must be idempotent per `(participant, tx_id)`,
/// and concurrent calls for the same transaction must be serialized by the
/// implementation (typically with a per-transaction lock). A Cancel arriving
/// before any Try installs a tombstone: a later Try for the same transaction
/// must answer `ack = false`.
#[async_trait]
pub trait Participant: Send + Sync {
    /// Stable identity; equality defines participant identity for
    /// registration, dedup and recovery.
    fn id(&self) -> &str;

    /// Reserve resources for the transaction.
    async fn try_reserve(&self, req: TryRequest) -> Result<TccResponse, ParticipantError>;

    /// Commit a reservation previously made by a successful Try.
    async fn confirm(&self, tx_id: TransactionId) -> Result<TccResponse, ParticipantError>;

    /// Release a reservation. Legal from any state except confirmed.
    async fn cancel(&self, tx_id: TransactionId) -> Result<TccResponse, ParticipantError>;
}
