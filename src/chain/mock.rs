//! A mock chain client used in test environments.
//!
//! Behaves like a bridge ledger: it stores emitted events by block, enforces
//! destination-side idempotence (a second action for the same event id is
//! rejected as already processed), and lets tests script failures.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;

use crate::chain::{sort_events, ChainClient};
use crate::error::{ChainError, SubmitOutcome};
use crate::types::{
    ChainSide, EventId, EventKind, GasParams, Receipt, RelayAction, RelayEvent, RelayEventKind,
};

pub struct MockChainClient {
    side: ChainSide,
    chain_id: u64,
    relayer: Address,
    height: AtomicU64,
    events: Mutex<Vec<RelayEvent>>,
    applied: Mutex<HashSet<EventId>>,
    confirmed: Mutex<Vec<RelayAction>>,
    submit_attempts: AtomicU64,
    scripted_outcomes: Mutex<VecDeque<SubmitOutcome>>,
    rejections: Mutex<HashMap<EventId, String>>,
    queries: Mutex<Vec<(u64, u64)>>,
    rpc_down: AtomicBool,
    balance: Mutex<U256>,
}

impl MockChainClient {
    pub fn new(side: ChainSide, chain_id: u64) -> Self {
        Self {
            side,
            chain_id,
            relayer: Address::repeat_byte(0x5e),
            height: AtomicU64::new(0),
            events: Mutex::default(),
            applied: Mutex::default(),
            confirmed: Mutex::default(),
            submit_attempts: AtomicU64::new(0),
            scripted_outcomes: Mutex::default(),
            rejections: Mutex::default(),
            queries: Mutex::default(),
            rpc_down: AtomicBool::new(false),
            balance: Mutex::new(U256::from(10u64).pow(U256::from(18u64))),
        }
    }

    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    /// Emit an event; raises the chain height to its block if needed
    pub fn emit(&self, event: RelayEvent) {
        self.height.fetch_max(event.block_number, Ordering::SeqCst);
        self.events.lock().unwrap().push(event);
    }

    /// Make every read call fail with an RPC error while `down` is set
    pub fn set_rpc_down(&self, down: bool) {
        self.rpc_down.store(down, Ordering::SeqCst);
    }

    /// Queue an outcome for the next submission, bypassing the ledger
    pub fn push_outcome(&self, outcome: SubmitOutcome) {
        self.scripted_outcomes.lock().unwrap().push_back(outcome);
    }

    /// Revert every action for `id` with `reason` until cleared
    pub fn reject_event(&self, id: EventId, reason: &str) {
        self.rejections.lock().unwrap().insert(id, reason.to_string());
    }

    pub fn clear_rejection(&self, id: &EventId) {
        self.rejections.lock().unwrap().remove(id);
    }

    /// Mark an event as already applied by the ledger
    pub fn mark_applied(&self, id: EventId) {
        self.applied.lock().unwrap().insert(id);
    }

    pub fn set_balance(&self, balance: U256) {
        *self.balance.lock().unwrap() = balance;
    }

    /// Actions that mutated the ledger, in order
    pub fn confirmed_actions(&self) -> Vec<RelayAction> {
        self.confirmed.lock().unwrap().clone()
    }

    /// Every call to `submit`, whatever its outcome
    pub fn submit_attempts(&self) -> u64 {
        self.submit_attempts.load(Ordering::SeqCst)
    }

    /// Block ranges requested through `query_events`
    pub fn queried_ranges(&self) -> Vec<(u64, u64)> {
        self.queries.lock().unwrap().clone()
    }

    fn check_up(&self) -> Result<(), ChainError> {
        if self.rpc_down.load(Ordering::SeqCst) {
            return Err(ChainError::rpc(self.side, "connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    fn side(&self) -> ChainSide {
        self.side
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn relayer_address(&self) -> Address {
        self.relayer
    }

    async fn current_height(&self) -> Result<u64, ChainError> {
        self.check_up()?;
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn query_events(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RelayEvent>, ChainError> {
        self.check_up()?;
        self.queries.lock().unwrap().push((from_block, to_block));
        let mut matching: Vec<RelayEvent> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.block_number >= from_block && e.block_number <= to_block)
            .filter(|e| match (&e.kind, kind) {
                (RelayEventKind::LockObserved(_), EventKind::Locked) => true,
                (RelayEventKind::UnlockRequested(_), EventKind::Unlocked) => true,
                _ => false,
            })
            .cloned()
            .collect();
        sort_events(&mut matching);
        Ok(matching)
    }

    async fn submit(&self, action: &RelayAction, _gas: GasParams) -> SubmitOutcome {
        let attempt = self.submit_attempts.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(outcome) = self.scripted_outcomes.lock().unwrap().pop_front() {
            return outcome;
        }
        if self.rpc_down.load(Ordering::SeqCst) {
            return SubmitOutcome::TransportFailure {
                message: "connection refused".to_string(),
            };
        }

        let id = action.event_id();
        if let Some(reason) = self.rejections.lock().unwrap().get(&id) {
            return SubmitOutcome::Reverted {
                reason: reason.clone(),
            };
        }

        let mut applied = self.applied.lock().unwrap();
        if !applied.insert(id) {
            return SubmitOutcome::AlreadyProcessed {
                reason: "execution reverted: already processed".to_string(),
            };
        }
        self.confirmed.lock().unwrap().push(action.clone());

        SubmitOutcome::Confirmed(Receipt {
            tx_hash: B256::left_padding_from(&attempt.to_be_bytes()),
            block_number: Some(self.height.load(Ordering::SeqCst)),
        })
    }

    async fn balance(&self) -> Result<U256, ChainError> {
        self.check_up()?;
        Ok(*self.balance.lock().unwrap())
    }
}
