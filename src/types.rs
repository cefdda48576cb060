//! Common types for the lock/unlock relay
//!
//! Events observed on a source chain, the actions submitted to the other chain,
//! and the identifiers used to deduplicate them across restarts.

use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// One of the two ledgers served by the relayer.
///
/// Chain A is where tokens are locked (and later released); chain B is where
/// the bridged representation is minted and burned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainSide {
    A,
    B,
}

impl ChainSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainSide::A => "a",
            ChainSide::B => "b",
        }
    }

    /// The peer ledger.
    pub fn other(&self) -> ChainSide {
        match self {
            ChainSide::A => ChainSide::B,
            ChainSide::B => ChainSide::A,
        }
    }
}

impl fmt::Display for ChainSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Relay direction, named after the event that drives it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// `Locked` on A -> `relayLock` on B
    Lock,
    /// `Unlocked` on B -> `relayUnlock` on A
    Unlock,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Lock => "lock",
            Direction::Unlock => "unlock",
        }
    }

    /// Chain whose events feed this direction
    pub fn source(&self) -> ChainSide {
        match self {
            Direction::Lock => ChainSide::A,
            Direction::Unlock => ChainSide::B,
        }
    }

    /// Chain the resulting action is submitted to
    pub fn destination(&self) -> ChainSide {
        self.source().other()
    }

    /// Event kind queried on the source chain
    pub fn event_kind(&self) -> EventKind {
        match self {
            Direction::Lock => EventKind::Locked,
            Direction::Unlock => EventKind::Unlocked,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bridge event kinds a chain client can be asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Locked,
    Unlocked,
}

/// Opaque 32-byte event identifier (a transaction hash).
///
/// Serialized as a 0x-prefixed lowercase hex string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(pub [u8; 32]);

impl From<B256> for EventId {
    fn from(hash: B256) -> Self {
        EventId(hash.0)
    }
}

impl From<EventId> for B256 {
    fn from(id: EventId) -> Self {
        B256::from(id.0)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", self)
    }
}

impl FromStr for EventId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s.strip_prefix("0x").unwrap_or(s), &mut bytes)?;
        Ok(EventId(bytes))
    }
}

impl Serialize for EventId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EventId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// `Locked(from, amount, destinationChainId, timestamp)` seen on chain A
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockObserved {
    pub source_chain_id: u64,
    pub from: Address,
    pub amount: U256,
    pub destination_chain_id: u64,
    pub timestamp: U256,
    pub tx_hash: B256,
}

/// `Unlocked(burnTxHash, to, amount)` seen on chain B
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockRequested {
    pub burn_tx_hash: B256,
    pub to: Address,
    pub amount: U256,
}

/// Payload of a relay event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEventKind {
    LockObserved(LockObserved),
    UnlockRequested(UnlockRequested),
}

/// An event returned by a chain query, with its position on the source chain.
///
/// Transient: consumed once by the event processor and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEvent {
    pub block_number: u64,
    pub log_index: u64,
    pub kind: RelayEventKind,
}

impl RelayEvent {
    /// Identifier used for deduplication: the lock transaction hash or the
    /// burn transaction hash.
    pub fn id(&self) -> EventId {
        match &self.kind {
            RelayEventKind::LockObserved(lock) => lock.tx_hash.into(),
            RelayEventKind::UnlockRequested(unlock) => unlock.burn_tx_hash.into(),
        }
    }

    pub fn direction(&self) -> Direction {
        match &self.kind {
            RelayEventKind::LockObserved(_) => Direction::Lock,
            RelayEventKind::UnlockRequested(_) => Direction::Unlock,
        }
    }

    /// Ordering key: ascending block, then log index
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

/// Action submitted to a destination bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayAction {
    /// `relayLock(txHash, from, amount, sourceTimestamp, signature)`
    RelayLock {
        tx_hash: B256,
        from: Address,
        amount: U256,
        source_timestamp: U256,
        signature: Vec<u8>,
    },
    /// `relayUnlock(burnTxHash, to, amount)`
    RelayUnlock {
        burn_tx_hash: B256,
        to: Address,
        amount: U256,
    },
}

impl RelayAction {
    pub fn name(&self) -> &'static str {
        match self {
            RelayAction::RelayLock { .. } => "relayLock",
            RelayAction::RelayUnlock { .. } => "relayUnlock",
        }
    }

    /// Identifier of the event this action acts upon
    pub fn event_id(&self) -> EventId {
        match self {
            RelayAction::RelayLock { tx_hash, .. } => (*tx_hash).into(),
            RelayAction::RelayUnlock { burn_tx_hash, .. } => (*burn_tx_hash).into(),
        }
    }
}

/// Gas parameters for a submission. `None` fields are filled by the node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GasParams {
    pub gas_limit: Option<u64>,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
}

/// Confirmation of an included transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
}

/// Observational counters. Nothing depends on them for correctness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayerStats {
    pub locks_relayed: u64,
    pub unlocks_relayed: u64,
    pub benign_rejections: u64,
    pub errors: u64,
    pub started_at: DateTime<Utc>,
    pub last_block_a: u64,
    pub last_block_b: u64,
}

impl Default for RelayerStats {
    fn default() -> Self {
        Self {
            locks_relayed: 0,
            unlocks_relayed: 0,
            benign_rejections: 0,
            errors: 0,
            started_at: Utc::now(),
            last_block_a: 0,
            last_block_b: 0,
        }
    }
}

impl RelayerStats {
    pub fn record_relayed(&mut self, direction: Direction) {
        match direction {
            Direction::Lock => self.locks_relayed += 1,
            Direction::Unlock => self.unlocks_relayed += 1,
        }
    }

    pub fn set_last_block(&mut self, side: ChainSide, block: u64) {
        match side {
            ChainSide::A => self.last_block_a = block,
            ChainSide::B => self.last_block_b = block,
        }
    }
}
