//! Chain clients
//!
//! Thin read/write access to one bridge deployment. Clients never retry;
//! retry policy belongs to the poller.

use alloy::primitives::{Address, U256};
use async_trait::async_trait;

use crate::error::{ChainError, SubmitOutcome};
use crate::types::{ChainSide, EventKind, GasParams, RelayAction, RelayEvent};

pub mod evm;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use evm::EvmChainClient;
#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockChainClient;

/// Access to one ledger's bridge contract
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Which side of the relay pair this client serves
    fn side(&self) -> ChainSide;

    /// Native chain id of the ledger
    fn chain_id(&self) -> u64;

    /// Address the relayer submits from on this chain
    fn relayer_address(&self) -> Address;

    /// Highest block the relayer is willing to act on
    async fn current_height(&self) -> Result<u64, ChainError>;

    /// Bridge events of `kind` in `[from_block, to_block]`, ascending by
    /// block then log index. Empty when there are none.
    async fn query_events(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RelayEvent>, ChainError>;

    /// Submit an action and wait for inclusion
    async fn submit(&self, action: &RelayAction, gas: GasParams) -> SubmitOutcome;

    /// Native balance of the relayer account
    async fn balance(&self) -> Result<U256, ChainError>;
}

/// Sort events into processing order
pub fn sort_events(events: &mut [RelayEvent]) {
    events.sort_by_key(|e| e.position());
}
