//! Participant registry
//!
//! Coordinator-scoped mapping from participant identity to the registered
//! instance. Append-only during normal operation; there is no deregistration.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use tcc_common::Participant;

use crate::error::{CoordinatorError, Result};

/// Concurrency-safe participant registry
#[derive(Default)]
pub struct Registry {
    participants: RwLock<HashMap<String, Arc<dyn Participant>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a participant under its own id.
    pub fn register(&self, participant: Arc<dyn Participant>) -> Result<()> {
        let id = participant.id().to_string();
        let mut participants = self.participants.write();
        if participants.contains_key(&id) {
            return Err(CoordinatorError::DuplicateParticipant(id));
        }
        participants.insert(id, participant);
        Ok(())
    }

    /// Look up one participant.
    pub fn get(&self, participant_id: &str) -> Result<Arc<dyn Participant>> {
        self.participants
            .read()
            .get(participant_id)
            .cloned()
            .ok_or_else(|| CoordinatorError::UnknownParticipant(participant_id.to_string()))
    }

    /// Look up many participants, preserving the requested order. Fails on
    /// the first unknown id.
    pub fn lookup(&self, participant_ids: &[String]) -> Result<Vec<Arc<dyn Participant>>> {
        let participants = self.participants.read();
        participant_ids
            .iter()
            .map(|id| {
                participants
                    .get(id)
                    .cloned()
                    .ok_or_else(|| CoordinatorError::UnknownParticipant(id.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::result::Result;
    use tcc_common::{ParticipantError, TccResponse, TransactionId, TryRequest};

    struct Named(&'static str);

    #[async_trait]
    impl Participant for Named {
        fn id(&self) -> &str {
            self.0
        }

        async fn try_reserve(&self, req: TryRequest) -> Result<TccResponse, ParticipantError> {
            Ok(TccResponse {
                participant_id: self.0.to_string(),
                tx_id: req.tx_id,
                ack: true,
            })
        }

        async fn confirm(&self, tx_id: TransactionId) -> Result<TccResponse, ParticipantError> {
            Ok(TccResponse {
                participant_id: self.0.to_string(),
                tx_id,
                ack: true,
            })
        }

        async fn cancel(&self, tx_id: TransactionId) -> Result<TccResponse, ParticipantError> {
            Ok(TccResponse {
                participant_id: self.0.to_string(),
                tx_id,
                ack: true,
            })
        }
    }

    #[test]
    fn rejects_duplicate_registration() {
        let registry = Registry::new();
        registry.register(Arc::new(Named("wallet"))).unwrap();

        let err = registry.register(Arc::new(Named("wallet"))).unwrap_err();
        assert!(matches!(err, CoordinatorError::DuplicateParticipant(id) if id == "wallet"));
    }

    #[test]
    fn lookup_preserves_request_order() {
        let registry = Registry::new();
        registry.register(Arc::new(Named("wallet"))).unwrap();
        registry.register(Arc::new(Named("stock"))).unwrap();

        let found = registry
            .lookup(&["stock".to_string(), "wallet".to_string()])
            .unwrap();
        assert_eq!(found[0].id(), "stock");
        assert_eq!(found[1].id(), "wallet");
    }

    #[test]
    fn lookup_fails_on_unknown_id() {
        let registry = Registry::new();
        registry.register(Arc::new(Named("wallet"))).unwrap();

        let err = match registry.lookup(&["wallet".to_string(), "ghost".to_string()]) {
            Err(e) => e,
            Ok(_) => panic!("expected lookup to fail"),
        };
        assert!(matches!(err, CoordinatorError::UnknownParticipant(id) if id == "ghost"));
    }
}
