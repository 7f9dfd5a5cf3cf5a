//! Error types for the coordinator
//!
//! Phase one surfaces the first error to the caller of `transaction`; phase
//! two and recovery never propagate back to the original caller — they are
//! retried by the recovery loop or logged.

use tcc_common::ParticipantError;
use thiserror::Error;

use crate::store::StoreError;

/// Coordinator errors that can occur while driving a transaction
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The transaction request named no participants
    #[error("transaction request is empty")]
    EmptyTask,

    /// The same participant appeared twice in one request
    #[error("duplicate participant: {0}")]
    DuplicateParticipant(String),

    /// A referenced participant was never registered
    #[error("participant not registered: {0}")]
    UnknownParticipant(String),

    /// A participant answered a phase with `ack = false`
    #[error("participant {participant_id} refused to ack")]
    ParticipantRejected { participant_id: String },

    /// A participant call failed
    #[error("participant {participant_id} failed: {source}")]
    Participant {
        participant_id: String,
        source: ParticipantError,
    },

    /// Phase one exceeded the configured timeout
    #[error("phase one timed out")]
    PhaseTimeout,

    /// Error from the transaction log
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A participant history contradicts the requested phase; the
    /// transaction was marked terminal-failed and needs operator attention
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}

/// Result type alias for coordinator operations
pub type Result<T> = std::result::Result<T, CoordinatorError>;
