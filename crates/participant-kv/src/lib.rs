//! Sample key-value participant
//!
//! A reference resource manager for the TCC protocol: Try freezes one
//! business key, Confirm commits the frozen slot, Cancel releases it. Every
//! transaction's history is recorded so the three phases stay idempotent,
//! and a Cancel observed before any Try leaves a tombstone that rejects a
//! late Try for the same transaction.
//!
//! Concurrent calls for one transaction are serialized through a
//! per-transaction async mutex, the in-process analogue of the per-tx
//! distributed lock a networked participant would hold.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

use tcc_common::{Participant, ParticipantError, TccResponse, TransactionId, TryRequest};

/// Phase a transaction has reached on this participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxPhase {
    /// Try succeeded; the slot is frozen
    Tried,
    /// Confirm committed the slot
    Confirmed,
    /// Canceled; doubles as the tombstone for Cancel-before-Try
    Canceled,
}

/// State of one business key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Reserved by the given transaction, awaiting phase two
    Frozen(TransactionId),
    /// Committed by a confirmed transaction
    Committed,
}

#[derive(Default)]
struct Tables {
    /// Per-transaction phase history, for idempotence and tombstones
    phases: HashMap<TransactionId, TxPhase>,
    /// Which key each transaction froze
    details: HashMap<TransactionId, String>,
    /// Business keys and their reservation state
    slots: HashMap<String, Slot>,
}

/// In-memory key-value resource manager implementing [`Participant`].
///
/// The Try payload must carry the business key under `"key"` as a string.
pub struct KvParticipant {
    id: String,
    tables: Mutex<Tables>,
    tx_locks: DashMap<TransactionId, Arc<AsyncMutex<()>>>,
}

impl KvParticipant {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tables: Mutex::new(Tables::default()),
            tx_locks: DashMap::new(),
        }
    }

    /// Phase recorded for a transaction, if any. For inspection.
    pub fn phase(&self, tx_id: TransactionId) -> Option<TxPhase> {
        self.tables.lock().phases.get(&tx_id).copied()
    }

    /// Reservation state of a business key, if any. For inspection.
    pub fn slot(&self, key: &str) -> Option<Slot> {
        self.tables.lock().slots.get(key).copied()
    }

    fn tx_lock(&self, tx_id: TransactionId) -> Arc<AsyncMutex<()>> {
        self.tx_locks
            .entry(tx_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn response(&self, tx_id: TransactionId, ack: bool) -> TccResponse {
        TccResponse {
            participant_id: self.id.clone(),
            tx_id,
            ack,
        }
    }
}

#[async_trait]
impl Participant for KvParticipant {
    fn id(&self) -> &str {
        &self.id
    }

    async fn try_reserve(&self, req: TryRequest) -> Result<TccResponse, ParticipantError> {
        let lock = self.tx_lock(req.tx_id);
        let _guard = lock.lock().await;

        let key = req
            .data
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ParticipantError::Other(format!(
                    "participant {}: try payload carries no string \"key\"",
                    self.id
                ))
            })?
            .to_string();

        let mut tables = self.tables.lock();
        match tables.phases.get(&req.tx_id).copied() {
            // Replayed Try after success: answer what we answered before.
            Some(TxPhase::Tried) | Some(TxPhase::Confirmed) => {
                return Ok(self.response(req.tx_id, true));
            }
            // Cancel got here first; the tombstone rejects the late Try.
            Some(TxPhase::Canceled) => return Ok(self.response(req.tx_id, false)),
            None => {}
        }

        // The freeze must go from zero to one; a key someone else holds
        // (frozen or already committed) refuses the reservation.
        if tables.slots.contains_key(&key) {
            return Ok(self.response(req.tx_id, false));
        }
        tables.slots.insert(key.clone(), Slot::Frozen(req.tx_id));
        tables.details.insert(req.tx_id, key);
        tables.phases.insert(req.tx_id, TxPhase::Tried);
        Ok(self.response(req.tx_id, true))
    }

    async fn confirm(&self, tx_id: TransactionId) -> Result<TccResponse, ParticipantError> {
        let lock = self.tx_lock(tx_id);
        let _guard = lock.lock().await;

        let mut tables = self.tables.lock();
        match tables.phases.get(&tx_id).copied() {
            Some(TxPhase::Confirmed) => return Ok(self.response(tx_id, true)),
            Some(TxPhase::Canceled) => {
                return Err(ParticipantError::ProtocolViolation(format!(
                    "confirm after cancel for tx {} on participant {}",
                    tx_id, self.id
                )));
            }
            Some(TxPhase::Tried) => {}
            // Confirm without a successful Try cannot be honored.
            None => return Ok(self.response(tx_id, false)),
        }

        let Some(key) = tables.details.get(&tx_id).cloned() else {
            return Ok(self.response(tx_id, false));
        };
        match tables.slots.get(&key) {
            Some(Slot::Frozen(holder)) if *holder == tx_id => {}
            _ => return Ok(self.response(tx_id, false)),
        }

        tables.slots.insert(key, Slot::Committed);
        tables.phases.insert(tx_id, TxPhase::Confirmed);
        Ok(self.response(tx_id, true))
    }

    async fn cancel(&self, tx_id: TransactionId) -> Result<TccResponse, ParticipantError> {
        let lock = self.tx_lock(tx_id);
        let _guard = lock.lock().await;

        let mut tables = self.tables.lock();
        if tables.phases.get(&tx_id) == Some(&TxPhase::Confirmed) {
            return Err(ParticipantError::ProtocolViolation(format!(
                "cancel after confirm for tx {} on participant {}",
                tx_id, self.id
            )));
        }

        // Release the reservation if this transaction holds one.
        if let Some(key) = tables.details.get(&tx_id).cloned()
            && matches!(tables.slots.get(&key), Some(Slot::Frozen(holder)) if *holder == tx_id)
        {
            tables.slots.remove(&key);
        }

        // Recorded even before any Try: this is the tombstone.
        tables.phases.insert(tx_id, TxPhase::Canceled);
        Ok(self.response(tx_id, true))
    }
}
