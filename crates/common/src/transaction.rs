//! The persisted transaction record
//!
//! A transaction is a set of per-participant Try outcomes plus a terminal
//! status submitted once phase two completes. The effective status is always
//! derived from the Try outcomes and the record's age; the READY states of
//! the protocol exist only in that derivation and are never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::TransactionId;

/// Transaction status as persisted in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    /// Not yet terminal; still eligible for advance or recovery
    Hanging,
    /// Every participant confirmed
    Successful,
    /// Canceled, either by a failed Try or by age expiry
    Failure,
}

/// Outcome of one participant's Try phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TryStatus {
    Hanging,
    Successful,
    Failure,
}

/// One participant's entry in a transaction record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantTryState {
    pub participant_id: String,
    pub try_status: TryStatus,
}

impl ParticipantTryState {
    pub fn new(participant_id: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            try_status: TryStatus::Hanging,
        }
    }
}

/// A transaction record as held by the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub participants: Vec<ParticipantTryState>,
    pub status: TxStatus,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Create a fresh record with every participant hanging.
    pub fn new(
        id: TransactionId,
        participant_ids: &[String],
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            participants: participant_ids
                .iter()
                .map(ParticipantTryState::new)
                .collect(),
            status: TxStatus::Hanging,
            created_at,
        }
    }

    /// Derive the effective status at a point in time.
    ///
    /// `created_before` is the expiry horizon (now minus the configured
    /// timeout): a still-hanging record created strictly before it has aged
    /// out and derives to `Failure`. A persisted terminal status is
    /// absorbing and is returned as-is, so an already-successful record is
    /// never demoted by age.
    pub fn status_at(&self, created_before: DateTime<Utc>) -> TxStatus {
        if self.status != TxStatus::Hanging {
            return self.status;
        }
        if self.created_at < created_before {
            return TxStatus::Failure;
        }

        let mut hanging = false;
        for participant in &self.participants {
            match participant.try_status {
                TryStatus::Failure => return TxStatus::Failure,
                TryStatus::Hanging => hanging = true,
                TryStatus::Successful => {}
            }
        }
        if hanging {
            TxStatus::Hanging
        } else {
            TxStatus::Successful
        }
    }
}
