//! Core coordinator implementation
//!
//! The coordinator drives each transaction through two phases. Phase one
//! creates the log record and fans Try calls out across the participants
//! concurrently, failing fast on the first rejection. Phase two runs
//! detached from the caller: once the Try outcomes are durable the terminal
//! result is already determined, so confirming or canceling synchronously
//! would only couple client latency to the slowest participant. A recovery
//! loop replays phase two for anything left hanging, so a crash between the
//! phases never strands a transaction.

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

use tcc_common::{Participant, ParticipantError, Transaction, TransactionId, TryRequest, TxStatus};

use crate::error::{CoordinatorError, Result};
use crate::options::Options;
use crate::registry::Registry;
use crate::store::{StoreError, TxStore};

/// A single participant invocation within a transaction request.
///
/// `data` is handed to that participant's Try verbatim.
#[derive(Debug, Clone)]
pub struct ParticipantRequest {
    pub participant_id: String,
    pub data: HashMap<String, Value>,
}

impl ParticipantRequest {
    pub fn new(participant_id: impl Into<String>, data: HashMap<String, Value>) -> Self {
        Self {
            participant_id: participant_id.into(),
            data,
        }
    }
}

/// A validated request entry bound to its registered participant.
struct Binding {
    participant: Arc<dyn Participant>,
    data: HashMap<String, Value>,
}

/// State shared between the public handle, in-flight transactions and the
/// recovery loop.
struct Shared {
    options: Options,
    store: Arc<dyn TxStore>,
    registry: Registry,
}

/// The TCC transaction coordinator.
///
/// Construction spawns the recovery loop; [`Coordinator::stop`] (also run on
/// drop) shuts it down together with any detached phase-two work.
pub struct Coordinator {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    recovery: Mutex<Option<JoinHandle<()>>>,
}

impl Coordinator {
    /// Create a coordinator over the given transaction log and start its
    /// recovery loop.
    pub fn new(store: Arc<dyn TxStore>, options: Options) -> Self {
        let shared = Arc::new(Shared {
            options: options.normalized(),
            store,
            registry: Registry::new(),
        });

        let (shutdown, shutdown_rx) = watch::channel(false);
        let recovery = tokio::spawn(Shared::run_recovery(shared.clone(), shutdown_rx));

        Self {
            shared,
            shutdown,
            recovery: Mutex::new(Some(recovery)),
        }
    }

    /// Register a participant for use in later transactions.
    pub fn register(&self, participant: Arc<dyn Participant>) -> Result<()> {
        self.shared.registry.register(participant)
    }

    /// Run a distributed transaction across the requested participants.
    ///
    /// Returns `Ok(tx_id)` iff every participant accepted Try and the log
    /// recorded it. The terminal outcome is settled asynchronously: phase
    /// two is dispatched in the background and, should it fail, replayed by
    /// the recovery loop. On error the transaction (if it was created) is
    /// driven to cancellation the same way.
    pub async fn transaction(
        &self,
        requests: Vec<ParticipantRequest>,
    ) -> Result<TransactionId> {
        let bindings = self.shared.resolve(requests)?;
        let deadline = Instant::now() + self.shared.options.timeout;

        let participant_ids: Vec<String> = bindings
            .iter()
            .map(|binding| binding.participant.id().to_string())
            .collect();
        let tx_id = tokio::time::timeout_at(deadline, self.shared.store.create_tx(&participant_ids))
            .await
            .map_err(|_| CoordinatorError::PhaseTimeout)??;

        let outcome = self.shared.try_phase(tx_id, bindings, deadline).await;

        // The terminal result is already determined by the recorded Try
        // outcomes; phase two runs detached and recovery backstops it.
        self.dispatch_advance(tx_id);

        outcome.map(|()| tx_id)
    }

    /// Stop the recovery loop and cancel detached phase-two work. Idempotent.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.recovery.lock().take() {
            handle.abort();
        }
    }

    /// Dispatch a phase-two advance on the coordinator's lifetime scope.
    fn dispatch_advance(&self, tx_id: TransactionId) {
        let shared = self.shared.clone();
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            if *shutdown.borrow() {
                return;
            }
            tokio::select! {
                _ = shutdown.changed() => {}
                result = shared.advance_by_id(tx_id) => {
                    if let Err(err) = result {
                        tracing::warn!(
                            "phase two advance for tx {} failed, recovery will retry: {}",
                            tx_id,
                            err
                        );
                    }
                }
            }
        });
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    /// Validate a request set and bind each entry to its registered
    /// participant. Runs before any side effect.
    fn resolve(&self, requests: Vec<ParticipantRequest>) -> Result<Vec<Binding>> {
        if requests.is_empty() {
            return Err(CoordinatorError::EmptyTask);
        }

        let mut seen = HashSet::with_capacity(requests.len());
        for request in &requests {
            if !seen.insert(request.participant_id.as_str()) {
                return Err(CoordinatorError::DuplicateParticipant(
                    request.participant_id.clone(),
                ));
            }
        }

        let ids: Vec<String> = requests
            .iter()
            .map(|request| request.participant_id.clone())
            .collect();
        let participants = self.registry.lookup(&ids)?;

        Ok(participants
            .into_iter()
            .zip(requests)
            .map(|(participant, request)| Binding {
                participant,
                data: request.data,
            })
            .collect())
    }

    /// Phase one: fan Try out across all participants, recording each
    /// outcome in the log. The first failure cancels the siblings and is
    /// returned; in-flight siblings are not awaited beyond that signal.
    async fn try_phase(
        self: &Arc<Self>,
        tx_id: TransactionId,
        bindings: Vec<Binding>,
        deadline: Instant,
    ) -> Result<()> {
        let (cancel_tx, _) = watch::channel(false);
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();

        for binding in bindings {
            let shared = self.clone();
            let cancel_rx = cancel_tx.subscribe();
            let outcome_tx = outcome_tx.clone();
            tokio::spawn(async move {
                let result = shared.run_try(tx_id, binding, cancel_rx, deadline).await;
                let _ = outcome_tx.send(result);
            });
        }
        drop(outcome_tx);

        while let Some(result) = outcome_rx.recv().await {
            if let Err(err) = result {
                // Fail fast: cancel the siblings and stop collecting. Late
                // outcomes land on a closed channel and are dropped.
                let _ = cancel_tx.send(true);
                return Err(err);
            }
        }
        Ok(())
    }

    /// One participant's Try, raced against the phase deadline and the
    /// sibling-failure cancel signal.
    async fn run_try(
        &self,
        tx_id: TransactionId,
        binding: Binding,
        mut cancel_rx: watch::Receiver<bool>,
        deadline: Instant,
    ) -> Result<()> {
        let participant_id = binding.participant.id().to_string();
        let request = TryRequest {
            participant_id: participant_id.clone(),
            tx_id,
            data: binding.data,
        };

        let attempt = tokio::select! {
            // A sibling failed; stop without recording an outcome. The
            // participant stays hanging in the log and recovery cancels it.
            _ = cancel_rx.changed() => return Ok(()),
            _ = tokio::time::sleep_until(deadline) => Err(CoordinatorError::PhaseTimeout),
            result = binding.participant.try_reserve(request) => match result {
                Ok(resp) if resp.ack => Ok(()),
                Ok(_) => Err(CoordinatorError::ParticipantRejected {
                    participant_id: participant_id.clone(),
                }),
                Err(source) => Err(CoordinatorError::Participant {
                    participant_id: participant_id.clone(),
                    source,
                }),
            },
        };

        match attempt {
            Ok(()) => {
                // A Try that succeeded but could not be recorded counts as
                // a failure: the log is the source of truth for phase two.
                self.store
                    .tx_update(tx_id, &participant_id, true)
                    .await
                    .map_err(|err| {
                        tracing::warn!(
                            "recording try success for tx {} participant {} failed: {}",
                            tx_id,
                            participant_id,
                            err
                        );
                        CoordinatorError::from(err)
                    })
            }
            Err(err) => {
                tracing::warn!(
                    "try failed for tx {} participant {}: {}",
                    tx_id,
                    participant_id,
                    err
                );
                if let Err(update_err) =
                    self.store.tx_update(tx_id, &participant_id, false).await
                {
                    tracing::warn!(
                        "recording try failure for tx {} participant {} failed: {}",
                        tx_id,
                        participant_id,
                        update_err
                    );
                }
                Err(err)
            }
        }
    }

    async fn advance_by_id(&self, tx_id: TransactionId) -> Result<()> {
        let tx = self.store.get_tx(tx_id).await?;
        self.advance(&tx).await
    }

    /// Phase two: derive the transaction's status and, if it is determined,
    /// drive every participant to Confirm or Cancel, then submit the
    /// terminal status. Any error aborts the advance; the recovery loop
    /// retries on a later tick.
    async fn advance(&self, tx: &Transaction) -> Result<()> {
        let status = tx.status_at(self.expiry_horizon());
        if status == TxStatus::Hanging {
            // Some Try outcome is still pending; wait for a later tick.
            return Ok(());
        }
        let success = status == TxStatus::Successful;

        for state in &tx.participants {
            let participant = self.registry.get(&state.participant_id)?;
            let result = if success {
                participant.confirm(tx.id).await
            } else {
                participant.cancel(tx.id).await
            };
            match result {
                Ok(resp) if resp.ack => {}
                Ok(_) => {
                    return Err(CoordinatorError::ParticipantRejected {
                        participant_id: state.participant_id.clone(),
                    });
                }
                Err(ParticipantError::ProtocolViolation(detail)) => {
                    // The participant's history contradicts the chosen
                    // phase. Retrying cannot converge, so mark the
                    // transaction terminal-failed and alert the operator.
                    tracing::error!(
                        "protocol violation advancing tx {} at participant {}: {}",
                        tx.id,
                        state.participant_id,
                        detail
                    );
                    self.store.tx_submit(tx.id, false).await?;
                    return Err(CoordinatorError::ProtocolViolation(detail));
                }
                Err(source) => {
                    return Err(CoordinatorError::Participant {
                        participant_id: state.participant_id.clone(),
                        source,
                    });
                }
            }
        }

        self.store.tx_submit(tx.id, success).await?;
        Ok(())
    }

    /// Advance a batch of hanging transactions concurrently, returning the
    /// first error; the rest are logged.
    async fn advance_all(self: &Arc<Self>, txs: Vec<Transaction>) -> Result<()> {
        let mut set = JoinSet::new();
        for tx in txs {
            let shared = self.clone();
            set.spawn(async move { shared.advance(&tx).await });
        }

        let mut first_err = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    if first_err.is_none() {
                        first_err = Some(err);
                    } else {
                        tracing::debug!("further recovery error: {}", err);
                    }
                }
                Err(err) => {
                    tracing::warn!("recovery advance task failed: {}", err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// The recovery loop. Each tick takes the store's advisory lock, scans
    /// for hanging transactions and advances them; failures back the tick
    /// off (doubling, capped at eight base ticks), while a busy lock means
    /// another coordinator is driving and resets it.
    async fn run_recovery(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
        let base = shared.options.monitor_tick;
        let mut tick = base;

        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = tokio::time::sleep(tick) => {}
            }

            match shared.store.lock(base).await {
                Err(StoreError::LockBusy) => {
                    tracing::debug!("recovery lock busy, another coordinator is driving");
                    tick = base;
                    continue;
                }
                Err(err) => {
                    tracing::warn!("acquiring recovery lock failed: {}", err);
                    tick = back_off(tick, base);
                    continue;
                }
                Ok(()) => {}
            }

            let txs = match shared.store.get_hanging_txs().await {
                Ok(txs) => txs,
                Err(err) => {
                    tracing::warn!("scanning hanging transactions failed: {}", err);
                    let _ = shared.store.unlock().await;
                    tick = back_off(tick, base);
                    continue;
                }
            };

            let result = shared.advance_all(txs).await;
            let _ = shared.store.unlock().await;

            tick = match result {
                Ok(()) => base,
                Err(err) => {
                    tracing::warn!("recovery advance failed: {}", err);
                    back_off(tick, base)
                }
            };
        }
    }

    /// Records created strictly before this horizon have aged out.
    fn expiry_horizon(&self) -> DateTime<Utc> {
        let timeout = TimeDelta::from_std(self.options.timeout).unwrap_or(TimeDelta::MAX);
        Utc::now()
            .checked_sub_signed(timeout)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Double the tick, capped at eight base ticks.
fn back_off(tick: Duration, base: Duration) -> Duration {
    std::cmp::min(tick * 2, base * 8)
}
