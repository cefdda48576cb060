//! Event Processor
//!
//! Turns source-chain events into destination-chain actions, one direction per
//! instance:
//!
//! - `Lock`: `Locked` on A -> attested `relayLock` on B
//! - `Unlock`: `Unlocked` on B -> `relayUnlock` on A
//!
//! Events are handled strictly in the order given. A destination "already
//! processed" rejection is benign and recorded like a success; every other
//! failure is returned so the poller leaves the watermark where it was and
//! re-queries the whole range next tick. Re-processing succeeded events in that
//! range relies on the local dedup set and on destination-side idempotence.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::Address;
use tracing::{debug, error, info, warn};

use crate::attestor::{AttestationFields, Attestor};
use crate::chain::ChainClient;
use crate::checkpoint::CheckpointStore;
use crate::error::{AttestorError, ProcessError, SubmitOutcome};
use crate::metrics::Metrics;
use crate::types::{Direction, EventId, GasParams, RelayAction, RelayEvent, RelayEventKind};

/// Source-side fields bound into lock attestations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSource {
    pub bridge: Address,
    pub token: Address,
}

/// What happened to a single event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Destination transaction confirmed
    Relayed,
    /// Destination had already applied it
    AlreadyProcessed,
    /// Already in the local processed set
    Skipped,
    /// Belongs to a different relay pair
    Dropped,
}

/// Per-batch tally, logged by the poller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub relayed: usize,
    pub already_processed: usize,
    pub skipped: usize,
    pub dropped: usize,
}

impl BatchSummary {
    fn add(&mut self, outcome: EventOutcome) {
        match outcome {
            EventOutcome::Relayed => self.relayed += 1,
            EventOutcome::AlreadyProcessed => self.already_processed += 1,
            EventOutcome::Skipped => self.skipped += 1,
            EventOutcome::Dropped => self.dropped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.relayed + self.already_processed + self.skipped + self.dropped
    }
}

pub struct EventProcessor {
    direction: Direction,
    destination: Arc<dyn ChainClient>,
    store: Arc<CheckpointStore>,
    metrics: Arc<Metrics>,
    attestation: Option<(Arc<Attestor>, LockSource)>,
    gas: GasParams,
    failure_alert_threshold: u32,
    /// Consecutive failures per event id, cleared on success
    failures: HashMap<EventId, u32>,
}

impl EventProcessor {
    pub fn new(
        direction: Direction,
        destination: Arc<dyn ChainClient>,
        store: Arc<CheckpointStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            direction,
            destination,
            store,
            metrics,
            attestation: None,
            gas: GasParams::default(),
            failure_alert_threshold: 3,
            failures: HashMap::new(),
        }
    }

    /// Sign lock relays with `attestor`, binding `source` into each attestation
    pub fn with_attestor(mut self, attestor: Arc<Attestor>, source: LockSource) -> Self {
        self.attestation = Some((attestor, source));
        self
    }

    pub fn with_gas(mut self, gas: GasParams) -> Self {
        self.gas = gas;
        self
    }

    pub fn with_failure_alert_threshold(mut self, threshold: u32) -> Self {
        self.failure_alert_threshold = threshold.max(1);
        self
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Consecutive failures recorded for `id`
    pub fn failure_count(&self, id: &EventId) -> u32 {
        self.failures.get(id).copied().unwrap_or(0)
    }

    /// Process events in order, stopping at the first failure
    pub async fn process_batch(
        &mut self,
        events: &[RelayEvent],
    ) -> Result<BatchSummary, ProcessError> {
        let mut summary = BatchSummary::default();
        for event in events {
            summary.add(self.process(event).await?);
        }
        Ok(summary)
    }

    /// Process one event
    pub async fn process(&mut self, event: &RelayEvent) -> Result<EventOutcome, ProcessError> {
        let id = event.id();

        if event.direction() != self.direction {
            warn!(
                direction = %self.direction,
                event_id = %id,
                "Event does not belong to this direction, dropping"
            );
            return Ok(EventOutcome::Dropped);
        }

        if let RelayEventKind::LockObserved(lock) = &event.kind {
            let expected = self.destination.chain_id();
            if lock.destination_chain_id != expected {
                info!(
                    event_id = %id,
                    destination_chain_id = lock.destination_chain_id,
                    expected_chain_id = expected,
                    "Lock targets a different chain, dropping"
                );
                self.metrics
                    .dropped_events_total
                    .with_label_values(&[self.direction.as_str()])
                    .inc();
                return Ok(EventOutcome::Dropped);
            }
        }

        if self.store.is_processed(self.direction, &id).await {
            debug!(direction = %self.direction, event_id = %id, "Already processed, skipping");
            return Ok(EventOutcome::Skipped);
        }

        let result = match self.build_action(event) {
            Ok(action) => self.submit(id, &action).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(outcome) => {
                self.failures.remove(&id);
                self.persist().await;
                Ok(outcome)
            }
            Err(e) => {
                self.note_failure(&e).await;
                Err(e)
            }
        }
    }

    fn build_action(&self, event: &RelayEvent) -> Result<RelayAction, ProcessError> {
        match &event.kind {
            RelayEventKind::LockObserved(lock) => {
                let (attestor, source) =
                    self.attestation
                        .as_ref()
                        .ok_or_else(|| ProcessError::Attestation {
                            event_id: event.id(),
                            source: AttestorError::MissingCredential,
                        })?;
                let fields = AttestationFields {
                    source_chain_id: lock.source_chain_id,
                    source_bridge: source.bridge,
                    source_token: source.token,
                    tx_hash: lock.tx_hash,
                    from: lock.from,
                    amount: lock.amount,
                    source_timestamp: lock.timestamp,
                };
                let signature = attestor
                    .sign(&fields)
                    .map_err(|source| ProcessError::Attestation {
                        event_id: event.id(),
                        source,
                    })?;
                Ok(RelayAction::RelayLock {
                    tx_hash: lock.tx_hash,
                    from: lock.from,
                    amount: lock.amount,
                    source_timestamp: lock.timestamp,
                    signature,
                })
            }
            RelayEventKind::UnlockRequested(unlock) => Ok(RelayAction::RelayUnlock {
                burn_tx_hash: unlock.burn_tx_hash,
                to: unlock.to,
                amount: unlock.amount,
            }),
        }
    }

    async fn submit(
        &self,
        id: EventId,
        action: &RelayAction,
    ) -> Result<EventOutcome, ProcessError> {
        let side = self.destination.side();
        let label = self.direction.as_str();

        match self.destination.submit(action, self.gas).await {
            SubmitOutcome::Confirmed(receipt) => {
                self.store.record_processed(self.direction, id).await;
                self.store.record_relayed(self.direction).await;
                self.metrics.relayed_total.with_label_values(&[label]).inc();
                info!(
                    direction = %self.direction,
                    event_id = %id,
                    action = action.name(),
                    chain = %side,
                    tx_hash = %receipt.tx_hash,
                    block = ?receipt.block_number,
                    "Event relayed"
                );
                Ok(EventOutcome::Relayed)
            }
            SubmitOutcome::AlreadyProcessed { reason } => {
                self.store.record_processed(self.direction, id).await;
                self.store.record_benign_rejection().await;
                self.metrics
                    .benign_rejections_total
                    .with_label_values(&[label])
                    .inc();
                warn!(
                    direction = %self.direction,
                    event_id = %id,
                    chain = %side,
                    reason = %reason,
                    "Destination already processed event, recording as done"
                );
                Ok(EventOutcome::AlreadyProcessed)
            }
            SubmitOutcome::Reverted { reason } => Err(ProcessError::Rejected {
                side,
                event_id: id,
                reason,
            }),
            SubmitOutcome::TransportFailure { message } => Err(ProcessError::Transport {
                side,
                event_id: id,
                message,
            }),
        }
    }

    async fn persist(&self) {
        if !self.store.flush().await {
            self.metrics.checkpoint_save_failures_total.inc();
        }
    }

    async fn note_failure(&mut self, err: &ProcessError) {
        let id = err.event_id();
        let count = {
            let entry = self.failures.entry(id).or_insert(0);
            *entry += 1;
            *entry
        };

        self.store.record_error().await;
        self.metrics
            .errors_total
            .with_label_values(&[self.direction.as_str(), err.kind()])
            .inc();

        if count >= self.failure_alert_threshold {
            self.metrics.repeated_failures_total.inc();
            error!(
                alert = true,
                direction = %self.direction,
                event_id = %id,
                consecutive_failures = count,
                error = %err,
                "Event keeps failing, operator attention required"
            );
        } else {
            error!(
                direction = %self.direction,
                event_id = %id,
                consecutive_failures = count,
                error = %err,
                "Failed to process event"
            );
        }
    }
}
