//! End-to-end relay tests against in-memory ledgers
//!
//! Each test wires the real processors, pollers and checkpoint store to two
//! `MockChainClient`s and drives ticks by hand.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{keccak256, Address, PrimitiveSignature, B256, U256};
use alloy::sol_types::SolValue;
use tempfile::TempDir;
use tokio_test::assert_ok;

use lock_relayer::attestor::Attestor;
use lock_relayer::chain::{ChainClient, MockChainClient};
use lock_relayer::checkpoint::CheckpointStore;
use lock_relayer::error::SubmitOutcome;
use lock_relayer::metrics::Metrics;
use lock_relayer::processor::{EventProcessor, LockSource};
use lock_relayer::scheduler::{BackoffConfig, ChainPoller, PollerSettings, TickOutcome};
use lock_relayer::types::{
    ChainSide, Direction, EventId, GasParams, LockObserved, RelayAction, RelayEvent,
    RelayEventKind, UnlockRequested,
};

const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
const CHAIN_A_ID: u64 = 1337;
const CHAIN_B_ID: u64 = 11155111;
const TIMESTAMP: u64 = 1_700_000_000;

fn bridge_a() -> Address {
    Address::repeat_byte(0x11)
}

fn token_a() -> Address {
    Address::repeat_byte(0x22)
}

fn locked(block: u64, tx_hash: u8, destination_chain_id: u64) -> RelayEvent {
    RelayEvent {
        block_number: block,
        log_index: 0,
        kind: RelayEventKind::LockObserved(LockObserved {
            source_chain_id: CHAIN_A_ID,
            from: Address::repeat_byte(0xaa),
            amount: U256::from(100u64),
            destination_chain_id,
            timestamp: U256::from(TIMESTAMP),
            tx_hash: B256::repeat_byte(tx_hash),
        }),
    }
}

fn unlocked(block: u64, log_index: u64, burn_tx_hash: u8) -> RelayEvent {
    RelayEvent {
        block_number: block,
        log_index,
        kind: RelayEventKind::UnlockRequested(UnlockRequested {
            burn_tx_hash: B256::repeat_byte(burn_tx_hash),
            to: Address::repeat_byte(0xbb),
            amount: U256::from(50u64),
        }),
    }
}

/// Two ledgers that outlive relayer restarts
struct Ledgers {
    dir: TempDir,
    chain_a: Arc<MockChainClient>,
    chain_b: Arc<MockChainClient>,
}

impl Ledgers {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            chain_a: Arc::new(MockChainClient::new(ChainSide::A, CHAIN_A_ID)),
            chain_b: Arc::new(MockChainClient::new(ChainSide::B, CHAIN_B_ID)),
        }
    }

    fn checkpoint_path(&self) -> std::path::PathBuf {
        self.dir.path().join("relayer-state.json")
    }

    /// Start a relayer process from whatever checkpoint is on disk
    fn start_relayer(&self) -> Relayer {
        let store = Arc::new(CheckpointStore::open(self.checkpoint_path(), None).unwrap());
        let metrics = Arc::new(Metrics::new());
        let attestor = Arc::new(Attestor::from_private_key(TEST_KEY).unwrap());
        let settings = PollerSettings {
            poll_interval: Duration::from_millis(10),
            max_block_range: 100,
            start_block: Some(1),
            backoff: BackoffConfig::default(),
        };

        let lock_processor = EventProcessor::new(
            Direction::Lock,
            self.chain_b.clone(),
            store.clone(),
            metrics.clone(),
        )
        .with_attestor(
            attestor.clone(),
            LockSource {
                bridge: bridge_a(),
                token: token_a(),
            },
        );
        let unlock_processor = EventProcessor::new(
            Direction::Unlock,
            self.chain_a.clone(),
            store.clone(),
            metrics.clone(),
        );

        Relayer {
            lock_poller: ChainPoller::new(
                self.chain_a.clone(),
                lock_processor,
                store.clone(),
                metrics.clone(),
                settings.clone(),
            )
            .unwrap(),
            unlock_poller: ChainPoller::new(
                self.chain_b.clone(),
                unlock_processor,
                store.clone(),
                metrics.clone(),
                settings,
            )
            .unwrap(),
            store,
            metrics,
            attestor,
        }
    }
}

struct Relayer {
    lock_poller: ChainPoller,
    unlock_poller: ChainPoller,
    store: Arc<CheckpointStore>,
    metrics: Arc<Metrics>,
    attestor: Arc<Attestor>,
}

impl Relayer {
    /// Graceful shutdown: final flush
    async fn stop(self) {
        assert!(self.store.flush().await);
    }
}

#[tokio::test]
async fn test_lock_end_to_end_with_verifiable_signature() {
    let ledgers = Ledgers::new();
    ledgers.chain_a.emit(locked(5, 0x01, CHAIN_B_ID));
    let mut relayer = ledgers.start_relayer();

    let outcome = assert_ok!(relayer.lock_poller.tick().await);
    assert!(matches!(outcome, TickOutcome::Advanced { from_block: 1, to_block: 5, .. }));

    let actions = ledgers.chain_b.confirmed_actions();
    assert_eq!(actions.len(), 1);
    let RelayAction::RelayLock {
        tx_hash,
        from,
        amount,
        source_timestamp,
        signature,
    } = &actions[0]
    else {
        panic!("expected relayLock, got {:?}", actions[0]);
    };
    assert_eq!(*tx_hash, B256::repeat_byte(0x01));
    assert_eq!(*from, Address::repeat_byte(0xaa));
    assert_eq!(*amount, U256::from(100u64));
    assert_eq!(*source_timestamp, U256::from(TIMESTAMP));

    // Verify against the documented preimage, built independently
    let preimage = (
        CHAIN_A_ID,
        bridge_a(),
        token_a(),
        B256::repeat_byte(0x01),
        Address::repeat_byte(0xaa),
        U256::from(100u64),
        U256::from(TIMESTAMP),
    )
        .abi_encode_packed();
    assert_eq!(preimage.len(), 164);
    let digest = keccak256(&preimage);
    let sig = PrimitiveSignature::try_from(signature.as_slice()).unwrap();
    let signer = sig.recover_address_from_msg(digest.as_slice()).unwrap();
    assert_eq!(signer, relayer.attestor.address());

    // Same chain height on the next tick: no second call
    assert_ok!(relayer.lock_poller.tick().await);
    assert_eq!(ledgers.chain_b.submit_attempts(), 1);
    assert_eq!(
        relayer.metrics.relayed_total.with_label_values(&["lock"]).get(),
        1
    );
}

#[tokio::test]
async fn test_repeated_range_query_is_deduplicated_locally() {
    let ledgers = Ledgers::new();
    ledgers.chain_a.emit(locked(5, 0x01, CHAIN_B_ID));

    let mut relayer = ledgers.start_relayer();
    assert_ok!(relayer.lock_poller.tick().await);
    relayer.stop().await;

    // Roll the watermark back on disk so the restarted relayer re-queries [1, 5]
    let path = ledgers.checkpoint_path();
    let mut snapshot = CheckpointStore::load(&path).unwrap();
    snapshot.watermarks.remove(&ChainSide::A);
    std::fs::write(&path, serde_json::to_vec(&snapshot).unwrap()).unwrap();

    let mut relayer = ledgers.start_relayer();
    let outcome = assert_ok!(relayer.lock_poller.tick().await);
    match outcome {
        TickOutcome::Advanced { from_block, summary, .. } => {
            assert_eq!(from_block, 1);
            assert_eq!(summary.skipped, 1);
            assert_eq!(summary.relayed, 0);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(ledgers.chain_b.submit_attempts(), 1);
}

#[tokio::test]
async fn test_idempotence_across_independent_dedup_state() {
    let ledgers = Ledgers::new();
    let event = locked(5, 0x01, CHAIN_B_ID);

    // Two processors that do not share a processed set
    let dir = tempfile::tempdir().unwrap();
    let attestor = Arc::new(Attestor::from_private_key(TEST_KEY).unwrap());
    let source = LockSource {
        bridge: bridge_a(),
        token: token_a(),
    };
    let mut outcomes = Vec::new();
    for name in ["first.json", "second.json"] {
        let store = Arc::new(CheckpointStore::open(dir.path().join(name), None).unwrap());
        let mut processor = EventProcessor::new(
            Direction::Lock,
            ledgers.chain_b.clone(),
            store.clone(),
            Arc::new(Metrics::new()),
        )
        .with_attestor(attestor.clone(), source);
        outcomes.push(assert_ok!(processor.process(&event).await));
        assert!(store.is_processed(Direction::Lock, &event.id()).await);
    }

    use lock_relayer::processor::EventOutcome;
    assert_eq!(outcomes, vec![EventOutcome::Relayed, EventOutcome::AlreadyProcessed]);
    assert_eq!(ledgers.chain_b.confirmed_actions().len(), 1);
}

#[tokio::test]
async fn test_unlock_end_to_end() {
    let ledgers = Ledgers::new();
    ledgers.chain_b.emit(unlocked(7, 0, 0x02));
    let mut relayer = ledgers.start_relayer();

    assert_ok!(relayer.unlock_poller.tick().await);
    assert_ok!(relayer.unlock_poller.tick().await);

    assert_eq!(
        ledgers.chain_a.confirmed_actions(),
        vec![RelayAction::RelayUnlock {
            burn_tx_hash: B256::repeat_byte(0x02),
            to: Address::repeat_byte(0xbb),
            amount: U256::from(50u64),
        }]
    );
    assert_eq!(ledgers.chain_a.submit_attempts(), 1);
    assert_eq!(relayer.store.watermark(ChainSide::B).await, Some(7));
}

#[tokio::test]
async fn test_unlock_restart_after_confirmation_before_record() {
    let ledgers = Ledgers::new();
    let event = unlocked(7, 0, 0x02);
    ledgers.chain_b.emit(event.clone());

    // First process: the relayUnlock lands on chain A, then the process dies
    // before anything is recorded locally.
    let relayer = ledgers.start_relayer();
    let in_flight = RelayAction::RelayUnlock {
        burn_tx_hash: B256::repeat_byte(0x02),
        to: Address::repeat_byte(0xbb),
        amount: U256::from(50u64),
    };
    assert!(matches!(
        ledgers.chain_a.submit(&in_flight, GasParams::default()).await,
        SubmitOutcome::Confirmed(_)
    ));
    drop(relayer);

    // Second process sees the event again and converges on the benign rejection
    let mut relayer = ledgers.start_relayer();
    let outcome = assert_ok!(relayer.unlock_poller.tick().await);
    match outcome {
        TickOutcome::Advanced { summary, .. } => assert_eq!(summary.already_processed, 1),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(relayer.store.is_processed(Direction::Unlock, &event.id()).await);
    assert_eq!(ledgers.chain_a.confirmed_actions().len(), 1);
    assert_eq!(relayer.store.stats().await.benign_rejections, 1);
}

#[tokio::test]
async fn test_unlock_restart_after_record_before_watermark() {
    let ledgers = Ledgers::new();
    let event = unlocked(7, 0, 0x02);
    ledgers.chain_b.emit(event.clone());

    // First process relays and records, but its watermark never advances
    // because a later event in the batch keeps failing.
    ledgers.chain_b.emit(unlocked(8, 0, 0x03));
    ledgers
        .chain_a
        .reject_event(EventId([0x03; 32]), "execution reverted: paused");
    let mut relayer = ledgers.start_relayer();
    assert!(relayer.unlock_poller.tick().await.is_err());
    assert_eq!(relayer.store.watermark(ChainSide::B).await, Some(0));
    relayer.stop().await;

    // Second process finds 0x02 already recorded and does not resubmit it
    ledgers.chain_a.clear_rejection(&EventId([0x03; 32]));
    let mut relayer = ledgers.start_relayer();
    assert_ok!(relayer.unlock_poller.tick().await);

    assert_eq!(ledgers.chain_a.confirmed_actions().len(), 2);
    // 0x02 once, 0x03 twice (rejected, then confirmed)
    assert_eq!(ledgers.chain_a.submit_attempts(), 3);
    assert_eq!(relayer.store.watermark(ChainSide::B).await, Some(8));
}

#[tokio::test]
async fn test_watermark_monotonic_across_restart() {
    let ledgers = Ledgers::new();
    ledgers.chain_b.set_height(40);

    let mut relayer = ledgers.start_relayer();
    assert_ok!(relayer.unlock_poller.tick().await);
    assert_eq!(relayer.store.watermark(ChainSide::B).await, Some(40));
    // attempts to move backwards are ignored
    assert!(!relayer.store.set_watermark(ChainSide::B, 10).await);
    relayer.stop().await;

    ledgers.chain_b.set_height(45);
    let mut relayer = ledgers.start_relayer();
    assert_eq!(relayer.store.watermark(ChainSide::B).await, Some(40));
    assert_ok!(relayer.unlock_poller.tick().await);

    let ranges = ledgers.chain_b.queried_ranges();
    assert_eq!(ranges, vec![(1, 40), (41, 45)]);
}

#[tokio::test]
async fn test_no_event_loss_across_restart() {
    let ledgers = Ledgers::new();
    ledgers.chain_b.set_height(20);

    let mut relayer = ledgers.start_relayer();
    assert_ok!(relayer.unlock_poller.tick().await);
    relayer.stop().await;

    // Event at W+1 arrives, the process crashes before polling again
    ledgers.chain_b.emit(unlocked(21, 0, 0x09));
    let relayer = ledgers.start_relayer();
    drop(relayer);

    let mut relayer = ledgers.start_relayer();
    assert_ok!(relayer.unlock_poller.tick().await);
    assert_ok!(relayer.unlock_poller.tick().await);

    let actions = ledgers.chain_a.confirmed_actions();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].event_id(), EventId([0x09; 32]));
    assert_eq!(ledgers.chain_a.submit_attempts(), 1);
}

#[tokio::test]
async fn test_foreign_destination_never_submitted() {
    let ledgers = Ledgers::new();
    ledgers.chain_a.emit(locked(3, 0x01, 56));
    ledgers.chain_a.emit(locked(4, 0x02, CHAIN_B_ID));

    let mut relayer = ledgers.start_relayer();
    let outcome = assert_ok!(relayer.lock_poller.tick().await);
    match outcome {
        TickOutcome::Advanced { summary, to_block, .. } => {
            assert_eq!(summary.dropped, 1);
            assert_eq!(summary.relayed, 1);
            assert_eq!(to_block, 4);
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let submitted: Vec<EventId> = ledgers
        .chain_b
        .confirmed_actions()
        .iter()
        .map(RelayAction::event_id)
        .collect();
    assert_eq!(submitted, vec![EventId([0x02; 32])]);
    assert_eq!(ledgers.chain_b.submit_attempts(), 1);
}

#[tokio::test]
async fn test_batch_atomicity() {
    let ledgers = Ledgers::new();
    ledgers.chain_b.set_height(9);
    let mut relayer = ledgers.start_relayer();
    assert_ok!(relayer.unlock_poller.tick().await);
    let before = relayer.store.watermark(ChainSide::B).await;
    assert_eq!(before, Some(9));

    ledgers.chain_b.emit(unlocked(10, 0, 0x01));
    ledgers.chain_b.emit(unlocked(10, 1, 0x02));
    ledgers.chain_b.emit(unlocked(11, 0, 0x03));
    ledgers
        .chain_a
        .reject_event(EventId([0x02; 32]), "execution reverted: unauthorized");

    assert!(relayer.unlock_poller.tick().await.is_err());
    assert_eq!(relayer.store.watermark(ChainSide::B).await, before);
    assert!(relayer.store.is_processed(Direction::Unlock, &EventId([0x01; 32])).await);
    assert!(!relayer.store.is_processed(Direction::Unlock, &EventId([0x03; 32])).await);

    // Still failing: whole range retried, event 1 only re-checked locally
    assert!(relayer.unlock_poller.tick().await.is_err());
    assert_eq!(relayer.store.watermark(ChainSide::B).await, before);
    assert_eq!(ledgers.chain_b.queried_ranges()[1..], [(10, 11), (10, 11)]);

    // Cause fixed: the batch completes and the watermark advances
    ledgers.chain_a.clear_rejection(&EventId([0x02; 32]));
    assert_ok!(relayer.unlock_poller.tick().await);
    assert_eq!(relayer.store.watermark(ChainSide::B).await, Some(11));
    assert_eq!(ledgers.chain_a.confirmed_actions().len(), 3);
    // 0x01 once, 0x02 three times, 0x03 once
    assert_eq!(ledgers.chain_a.submit_attempts(), 5);
    assert_eq!(
        relayer
            .metrics
            .errors_total
            .with_label_values(&["unlock", "rejected"])
            .get(),
        2
    );
}

#[tokio::test]
async fn test_transport_failure_retried_next_tick() {
    let ledgers = Ledgers::new();
    ledgers.chain_b.emit(unlocked(3, 0, 0x04));
    ledgers.chain_a.push_outcome(SubmitOutcome::TransportFailure {
        message: "request timed out".to_string(),
    });

    let mut relayer = ledgers.start_relayer();
    assert!(relayer.unlock_poller.tick().await.is_err());
    assert_eq!(relayer.store.watermark(ChainSide::B).await, Some(0));

    assert_ok!(relayer.unlock_poller.tick().await);
    assert_eq!(ledgers.chain_a.confirmed_actions().len(), 1);
    assert_eq!(relayer.store.watermark(ChainSide::B).await, Some(3));
}

#[tokio::test]
async fn test_directions_are_independent() {
    let ledgers = Ledgers::new();
    ledgers.chain_a.emit(locked(5, 0x01, CHAIN_B_ID));
    ledgers.chain_b.emit(unlocked(6, 0, 0x02));
    ledgers.chain_a.set_rpc_down(true);

    let mut relayer = ledgers.start_relayer();
    // chain A unreachable: the lock side stalls
    assert!(relayer.lock_poller.tick().await.is_err());
    // unlock side keeps polling B; its submission to A fails the same way
    assert!(relayer.unlock_poller.tick().await.is_err());

    ledgers.chain_a.set_rpc_down(false);
    assert_ok!(relayer.lock_poller.tick().await);
    assert_ok!(relayer.unlock_poller.tick().await);
    assert_eq!(ledgers.chain_b.confirmed_actions().len(), 1);
    assert_eq!(ledgers.chain_a.confirmed_actions().len(), 1);
    assert_eq!(relayer.store.watermark(ChainSide::A).await, Some(5));
    assert_eq!(relayer.store.watermark(ChainSide::B).await, Some(6));
}
