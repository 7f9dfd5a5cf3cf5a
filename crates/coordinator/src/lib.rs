//! TCC transaction coordinator
//!
//! This crate drives distributed transactions through the Try-Confirm/Cancel
//! protocol: a synchronous Try fan-out across registered participants,
//! an asynchronous second phase, and a background recovery loop that walks
//! the persistent transaction log and pushes stranded transactions to a
//! terminal state.
//!
//! The coordinator is generic over its collaborators: participants implement
//! [`tcc_common::Participant`], the durable log implements [`TxStore`].

mod coordinator;
mod error;
mod options;
mod registry;
mod store;

pub use coordinator::Coordinator;
pub use coordinator::ParticipantRequest;
pub use error::{CoordinatorError, Result};
pub use options::Options;
pub use registry::Registry;
pub use store::{StoreError, TxStore};

// Re-export the contract types for convenience
pub use tcc_common::{
    Participant, ParticipantError, ParticipantTryState, TccResponse, Transaction, TransactionId,
    TryRequest, TryStatus, TxStatus,
};
