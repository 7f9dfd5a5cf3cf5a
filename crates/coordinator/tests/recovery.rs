//! Recovery-loop behavior: stranded transactions, shared stores, shutdown

mod support;

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use support::{request, wait_for_status};
use tcc_coordinator::{
    Coordinator, Options, Participant, TransactionId, TryRequest, TxStatus, TxStore,
};
use tcc_participant_kv::{KvParticipant, Slot, TxPhase};
use tcc_store_memory::MemoryStore;

fn fast_options() -> Options {
    Options::new().with_monitor_tick(Duration::from_millis(50))
}

fn try_request(participant_id: &str, tx_id: TransactionId, key: &str) -> TryRequest {
    TryRequest {
        participant_id: participant_id.to_string(),
        tx_id,
        data: HashMap::from([("key".to_string(), json!(key))]),
    }
}

/// Phase one fully acked but the driving process died before phase two: a
/// second coordinator sharing the store picks the transaction up on its tick
/// and confirms it.
#[tokio::test]
async fn recovers_a_transaction_stranded_after_phase_one() {
    let store = Arc::new(MemoryStore::new());
    let wallet = Arc::new(KvParticipant::new("wallet"));
    let stock = Arc::new(KvParticipant::new("stock"));

    // Replay what a crashed coordinator left behind: a created record plus
    // acked Tries, with phase two never dispatched.
    let tx_id = store
        .create_tx(&["wallet".to_string(), "stock".to_string()])
        .await
        .unwrap();
    wallet
        .try_reserve(try_request("wallet", tx_id, "order-9"))
        .await
        .unwrap();
    stock
        .try_reserve(try_request("stock", tx_id, "order-9"))
        .await
        .unwrap();
    store.tx_update(tx_id, "wallet", true).await.unwrap();
    store.tx_update(tx_id, "stock", true).await.unwrap();

    let coordinator = Coordinator::new(store.clone(), fast_options());
    coordinator
        .register(wallet.clone() as Arc<dyn Participant>)
        .unwrap();
    coordinator
        .register(stock.clone() as Arc<dyn Participant>)
        .unwrap();

    wait_for_status(&store, tx_id, TxStatus::Successful).await;
    assert_eq!(wallet.phase(tx_id), Some(TxPhase::Confirmed));
    assert_eq!(stock.phase(tx_id), Some(TxPhase::Confirmed));
    assert_eq!(wallet.slot("order-9"), Some(Slot::Committed));

    coordinator.stop();
}

/// A record whose Tries never landed ages past the timeout and is canceled.
#[tokio::test]
async fn expires_an_aged_hanging_transaction() {
    let store = Arc::new(MemoryStore::new());
    let wallet = Arc::new(KvParticipant::new("wallet"));

    let tx_id = store.create_tx(&["wallet".to_string()]).await.unwrap();

    let options = Options::new()
        .with_timeout(Duration::from_millis(100))
        .with_monitor_tick(Duration::from_millis(50));
    let coordinator = Coordinator::new(store.clone(), options);
    coordinator
        .register(wallet.clone() as Arc<dyn Participant>)
        .unwrap();

    wait_for_status(&store, tx_id, TxStatus::Failure).await;

    // The cancel reached a participant that never saw the Try, leaving a
    // tombstone behind.
    assert_eq!(wallet.phase(tx_id), Some(TxPhase::Canceled));

    coordinator.stop();
}

/// A participant history contradicting the chosen phase must not make
/// recovery loop forever: the transaction is marked terminal-failed.
#[tokio::test]
async fn a_protocol_violation_marks_the_transaction_failed() {
    let store = Arc::new(MemoryStore::new());
    let wallet = Arc::new(KvParticipant::new("wallet"));

    let tx_id = store.create_tx(&["wallet".to_string()]).await.unwrap();
    // The participant saw a Cancel, but the log claims the Try succeeded.
    wallet.cancel(tx_id).await.unwrap();
    store.tx_update(tx_id, "wallet", true).await.unwrap();

    let coordinator = Coordinator::new(store.clone(), fast_options());
    coordinator
        .register(wallet.clone() as Arc<dyn Participant>)
        .unwrap();

    wait_for_status(&store, tx_id, TxStatus::Failure).await;
    assert_eq!(wallet.phase(tx_id), Some(TxPhase::Canceled));

    coordinator.stop();
}

/// Two coordinators over one store: the advisory lock arbitrates recovery
/// and the transaction still converges cleanly.
#[tokio::test]
async fn two_coordinators_share_one_store() {
    let store = Arc::new(MemoryStore::new());
    let wallet = Arc::new(KvParticipant::new("wallet"));
    let stock = Arc::new(KvParticipant::new("stock"));

    let build = |store: &Arc<MemoryStore>| {
        let coordinator = Coordinator::new(store.clone(), fast_options());
        coordinator
            .register(wallet.clone() as Arc<dyn Participant>)
            .unwrap();
        coordinator
            .register(stock.clone() as Arc<dyn Participant>)
            .unwrap();
        coordinator
    };
    let first = build(&store);
    let second = build(&store);

    // Strand a fully-acked transaction; whichever instance wins the lock
    // drives it to confirmation.
    let tx_id = store
        .create_tx(&["wallet".to_string(), "stock".to_string()])
        .await
        .unwrap();
    wallet
        .try_reserve(try_request("wallet", tx_id, "order-2"))
        .await
        .unwrap();
    stock
        .try_reserve(try_request("stock", tx_id, "order-2"))
        .await
        .unwrap();
    store.tx_update(tx_id, "wallet", true).await.unwrap();
    store.tx_update(tx_id, "stock", true).await.unwrap();

    wait_for_status(&store, tx_id, TxStatus::Successful).await;

    // No participant saw mixed Confirm/Cancel signals.
    assert_eq!(wallet.phase(tx_id), Some(TxPhase::Confirmed));
    assert_eq!(stock.phase(tx_id), Some(TxPhase::Confirmed));
    assert_eq!(wallet.slot("order-2"), Some(Slot::Committed));
    assert_eq!(stock.slot("order-2"), Some(Slot::Committed));

    first.stop();
    second.stop();
}

/// `stop` halts recovery and is idempotent; a stopped coordinator leaves
/// stranded work for other instances.
#[tokio::test]
async fn stop_halts_the_recovery_loop() {
    let store = Arc::new(MemoryStore::new());
    let wallet = Arc::new(KvParticipant::new("wallet"));

    let coordinator = Coordinator::new(store.clone(), fast_options());
    coordinator
        .register(wallet.clone() as Arc<dyn Participant>)
        .unwrap();
    coordinator.stop();
    coordinator.stop();

    let tx_id = store.create_tx(&["wallet".to_string()]).await.unwrap();
    store.tx_update(tx_id, "wallet", true).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let tx = store.get_tx(tx_id).await.unwrap();
    assert_eq!(tx.status, TxStatus::Hanging);
    assert_eq!(wallet.phase(tx_id), None);
}

#[tokio::test]
async fn single_participant_transaction_commits() {
    let store = Arc::new(MemoryStore::new());
    let wallet = Arc::new(KvParticipant::new("wallet"));
    let coordinator = Coordinator::new(store.clone(), fast_options());
    coordinator
        .register(wallet.clone() as Arc<dyn Participant>)
        .unwrap();

    let tx_id = coordinator
        .transaction(vec![request("wallet", "order-5")])
        .await
        .unwrap();

    wait_for_status(&store, tx_id, TxStatus::Successful).await;
    assert_eq!(wallet.slot("order-5"), Some(Slot::Committed));

    coordinator.stop();
}
