//! Transaction identifier
//!
//! Ids are UUIDv7: random enough that coordinator instances sharing one
//! store can mint them independently, with a leading timestamp so that a
//! store keyed by id hands the recovery scan its records oldest-first.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Globally unique transaction identifier.
///
/// Ordering comes straight from the underlying UUID, which for v7 means
/// ids sort by mint time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Mint a fresh id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parse from the canonical string form.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        s.parse().map(Self)
    }

    /// The underlying UUID, for store implementations that persist ids in
    /// a native UUID column.
    pub fn uuid(self) -> Uuid {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
