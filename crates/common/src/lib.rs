//! Common types for the TCC transaction manager
//!
//! This crate defines:
//! - The participant capability every resource manager implements
//! - Transaction IDs (UUIDv7-based)
//! - The persisted transaction record and its status derivation

mod participant;
mod transaction;
mod transaction_id;

pub use participant::Participant;
pub use participant::ParticipantError;
pub use participant::TccResponse;
pub use participant::TryRequest;
pub use transaction::ParticipantTryState;
pub use transaction::Transaction;
pub use transaction::TryStatus;
pub use transaction::TxStatus;
pub use transaction_id::TransactionId;
