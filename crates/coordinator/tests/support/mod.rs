//! Shared helpers for the coordinator integration tests

use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

use tcc_coordinator::{ParticipantRequest, Transaction, TransactionId, TxStatus, TxStore};
use tcc_store_memory::MemoryStore;

/// Build a one-key Try payload for the sample participant.
pub fn request(participant_id: &str, key: &str) -> ParticipantRequest {
    ParticipantRequest::new(
        participant_id,
        HashMap::from([("key".to_string(), json!(key))]),
    )
}

/// Poll the store until the transaction reaches the wanted status.
pub async fn wait_for_status(
    store: &MemoryStore,
    tx_id: TransactionId,
    want: TxStatus,
) -> Transaction {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let tx = store.get_tx(tx_id).await.unwrap();
        if tx.status == want {
            return tx;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "transaction {tx_id} stuck in {:?}, want {want:?}",
            tx.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
