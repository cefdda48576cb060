//! EVM chain client
//!
//! Reads `Locked`/`Unlocked` logs from a bridge deployment and submits
//! `relayLock`/`relayUnlock` calls signed by the relayer key.
//!
//! # Transaction Building
//!
//! Submissions use `ProviderBuilder::with_recommended_fillers()` so nonce and
//! fees are populated by the node. Every submission is first simulated with
//! `eth_call` from the relayer address, which is the only way to recover the
//! revert reason; a revert reason is classified once, here, into a
//! [`SubmitOutcome`].

use std::str::FromStr;
use std::time::Duration;

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::sol_types::SolCall;
use alloy::transports::http::{Client, Http};
use alloy::transports::{RpcError, TransportErrorKind};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use tracing::{debug, info, warn};

use crate::chain::{sort_events, ChainClient};
use crate::config::ChainConfig;
use crate::error::{ChainError, SubmitOutcome};
use crate::types::{
    ChainSide, EventKind, GasParams, LockObserved, Receipt, RelayAction, RelayEvent,
    RelayEventKind, UnlockRequested,
};

/// How long to wait for a submitted transaction to be included
const RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);

sol! {
    /// Bridge contract interface deployed on both ledgers
    #[sol(rpc)]
    contract LockBridge {
        event Locked(
            address indexed from,
            uint256 amount,
            uint64 indexed destinationChainId,
            uint256 timestamp
        );

        event Unlocked(
            bytes32 indexed burnTxHash,
            address indexed to,
            uint256 amount
        );

        /// Mint on the destination for a lock attested by the relayer
        function relayLock(
            bytes32 txHash,
            address from,
            uint256 amount,
            uint256 sourceTimestamp,
            bytes signature
        ) external;

        /// Release locked funds for a burn on the peer chain
        function relayUnlock(bytes32 burnTxHash, address to, uint256 amount) external;
    }
}

/// How a node error should be treated
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorClass {
    /// The ledger already applied this event
    AlreadyProcessed,
    /// Node-side condition that may clear by the next tick
    Transient,
    /// Any other rejection
    Revert,
}

/// Classify the message of a JSON-RPC error response
pub fn classify_node_error(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();

    if lower.contains("already processed")
        || lower.contains("already been processed")
        || lower.contains("already relayed")
        || lower.contains("already minted")
        || lower.contains("already unlocked")
    {
        return ErrorClass::AlreadyProcessed;
    }

    if lower.contains("timeout")
        || lower.contains("rate limit")
        || lower.contains("too many requests")
        || lower.contains("temporarily unavailable")
        || lower.contains("nonce too low")
        || lower.contains("already known")
        || lower.contains("underpriced")
    {
        return ErrorClass::Transient;
    }

    ErrorClass::Revert
}

/// Map an RPC failure to a submission outcome
fn outcome_from_rpc_error(err: RpcError<TransportErrorKind>) -> SubmitOutcome {
    match err {
        RpcError::ErrorResp(payload) => {
            let message = payload.message.to_string();
            match classify_node_error(&message) {
                ErrorClass::AlreadyProcessed => SubmitOutcome::AlreadyProcessed { reason: message },
                ErrorClass::Transient => SubmitOutcome::TransportFailure { message },
                ErrorClass::Revert => SubmitOutcome::Reverted { reason: message },
            }
        }
        other => SubmitOutcome::TransportFailure {
            message: other.to_string(),
        },
    }
}

/// Encode the calldata for an action
pub fn encode_action(action: &RelayAction) -> Bytes {
    match action {
        RelayAction::RelayLock {
            tx_hash,
            from,
            amount,
            source_timestamp,
            signature,
        } => LockBridge::relayLockCall {
            txHash: *tx_hash,
            from: *from,
            amount: *amount,
            sourceTimestamp: *source_timestamp,
            signature: Bytes::copy_from_slice(signature),
        }
        .abi_encode()
        .into(),
        RelayAction::RelayUnlock {
            burn_tx_hash,
            to,
            amount,
        } => LockBridge::relayUnlockCall {
            burnTxHash: *burn_tx_hash,
            to: *to,
            amount: *amount,
        }
        .abi_encode()
        .into(),
    }
}

/// Chain client for an EVM bridge deployment
pub struct EvmChainClient {
    side: ChainSide,
    rpc_url: String,
    chain_id: u64,
    bridge_address: Address,
    confirmations: u64,
    provider: RootProvider<Http<Client>>,
    signer: PrivateKeySigner,
}

impl EvmChainClient {
    /// Connect and verify the node serves the configured chain
    pub async fn connect(
        side: ChainSide,
        config: &ChainConfig,
        signer: PrivateKeySigner,
    ) -> Result<Self> {
        let url = config
            .rpc_url
            .parse()
            .wrap_err_with(|| format!("Invalid RPC URL for chain {}", config.name))?;
        let provider = ProviderBuilder::new().on_http(url);

        let bridge_address = Address::from_str(&config.bridge_address)
            .wrap_err_with(|| format!("Invalid bridge address for chain {}", config.name))?;

        let reported = provider
            .get_chain_id()
            .await
            .wrap_err_with(|| format!("Failed to connect to {}", config.rpc_url))?;
        if reported != config.chain_id {
            return Err(eyre!(
                "chain {} RPC reports chain id {} but {} is configured",
                config.name,
                reported,
                config.chain_id
            ));
        }

        info!(
            chain = %side,
            name = %config.name,
            chain_id = config.chain_id,
            bridge = %bridge_address,
            relayer = %signer.address(),
            "EVM chain client connected"
        );

        Ok(Self {
            side,
            rpc_url: config.rpc_url.clone(),
            chain_id: config.chain_id,
            bridge_address,
            confirmations: config.confirmations,
            provider,
            signer,
        })
    }

    fn decode_err(&self, message: impl ToString) -> ChainError {
        ChainError::Decode {
            side: self.side,
            message: message.to_string(),
        }
    }

    fn log_position(&self, log: &alloy::rpc::types::Log) -> Result<(u64, u64), ChainError> {
        let block = log
            .block_number
            .ok_or_else(|| self.decode_err("log missing block number"))?;
        let index = log
            .log_index
            .ok_or_else(|| self.decode_err("log missing log index"))?;
        Ok((block, index))
    }

    async fn query_locked(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RelayEvent>, ChainError> {
        let contract = LockBridge::new(self.bridge_address, &self.provider);
        let logs = contract
            .Locked_filter()
            .from_block(from_block)
            .to_block(to_block)
            .query()
            .await
            .map_err(|e| ChainError::rpc(self.side, e))?;

        let mut events = Vec::with_capacity(logs.len());
        for (event, log) in logs {
            let (block_number, log_index) = self.log_position(&log)?;
            let tx_hash = log
                .transaction_hash
                .ok_or_else(|| self.decode_err("Locked log missing transaction hash"))?;
            events.push(RelayEvent {
                block_number,
                log_index,
                kind: RelayEventKind::LockObserved(LockObserved {
                    source_chain_id: self.chain_id,
                    from: event.from,
                    amount: event.amount,
                    destination_chain_id: event.destinationChainId,
                    timestamp: event.timestamp,
                    tx_hash,
                }),
            });
        }
        Ok(events)
    }

    async fn query_unlocked(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RelayEvent>, ChainError> {
        let contract = LockBridge::new(self.bridge_address, &self.provider);
        let logs = contract
            .Unlocked_filter()
            .from_block(from_block)
            .to_block(to_block)
            .query()
            .await
            .map_err(|e| ChainError::rpc(self.side, e))?;

        let mut events = Vec::with_capacity(logs.len());
        for (event, log) in logs {
            let (block_number, log_index) = self.log_position(&log)?;
            events.push(RelayEvent {
                block_number,
                log_index,
                kind: RelayEventKind::UnlockRequested(UnlockRequested {
                    burn_tx_hash: event.burnTxHash,
                    to: event.to,
                    amount: event.amount,
                }),
            });
        }
        Ok(events)
    }
}

#[async_trait]
impl ChainClient for EvmChainClient {
    fn side(&self) -> ChainSide {
        self.side
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn relayer_address(&self) -> Address {
        self.signer.address()
    }

    async fn current_height(&self) -> Result<u64, ChainError> {
        let head = self
            .provider
            .get_block_number()
            .await
            .map_err(|e| ChainError::rpc(self.side, e))?;
        Ok(head.saturating_sub(self.confirmations))
    }

    async fn query_events(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RelayEvent>, ChainError> {
        let mut events = match kind {
            EventKind::Locked => self.query_locked(from_block, to_block).await?,
            EventKind::Unlocked => self.query_unlocked(from_block, to_block).await?,
        };
        sort_events(&mut events);
        Ok(events)
    }

    async fn submit(&self, action: &RelayAction, gas: GasParams) -> SubmitOutcome {
        let url = match self.rpc_url.parse() {
            Ok(url) => url,
            Err(e) => {
                return SubmitOutcome::TransportFailure {
                    message: format!("invalid RPC URL: {}", e),
                }
            }
        };
        let wallet = EthereumWallet::from(self.signer.clone());
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(wallet)
            .on_http(url);

        let mut tx = TransactionRequest::default()
            .with_from(self.signer.address())
            .with_to(self.bridge_address)
            .with_input(encode_action(action));
        if let Some(limit) = gas.gas_limit {
            tx = tx.with_gas_limit(limit);
        }
        if let Some(max_fee) = gas.max_fee_per_gas {
            tx = tx.with_max_fee_per_gas(max_fee);
        }
        if let Some(tip) = gas.max_priority_fee_per_gas {
            tx = tx.with_max_priority_fee_per_gas(tip);
        }

        debug!(
            chain = %self.side,
            action = action.name(),
            event_id = %action.event_id(),
            "Simulating submission"
        );

        if let Err(e) = provider.call(&tx).await {
            return outcome_from_rpc_error(e);
        }

        let pending = match provider.send_transaction(tx).await {
            Ok(pending) => pending,
            Err(e) => return outcome_from_rpc_error(e),
        };

        let tx_hash = *pending.tx_hash();
        info!(
            chain = %self.side,
            action = action.name(),
            tx_hash = %tx_hash,
            "Transaction sent, waiting for confirmation"
        );

        let receipt = match pending.with_timeout(Some(RECEIPT_TIMEOUT)).get_receipt().await {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(chain = %self.side, tx_hash = %tx_hash, error = %e, "Failed to get receipt");
                return SubmitOutcome::TransportFailure {
                    message: format!("failed to get receipt for {}: {}", tx_hash, e),
                };
            }
        };

        if !receipt.status() {
            return SubmitOutcome::Reverted {
                reason: format!("transaction {} reverted", tx_hash),
            };
        }

        SubmitOutcome::Confirmed(Receipt {
            tx_hash,
            block_number: receipt.block_number,
        })
    }

    async fn balance(&self) -> Result<U256, ChainError> {
        self.provider
            .get_balance(self.signer.address())
            .await
            .map_err(|e| ChainError::rpc(self.side, e))
    }
}
