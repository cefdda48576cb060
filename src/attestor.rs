//! Attestations for inbound lock relays
//!
//! The destination bridge only accepts `relayLock` when it carries a signature
//! by the relayer over the packed lock fields:
//!
//! ```text
//! sourceChainId (8) || sourceBridge (20) || sourceToken (20) || txHash (32)
//!     || from (20) || amount (32) || sourceTimestamp (32)
//! ```
//!
//! i.e. Solidity's `abi.encodePacked(uint64, address, address, bytes32, address,
//! uint256, uint256)`. The keccak256 digest of that preimage is signed as an
//! EIP-191 personal message, matching `ECDSA.toEthSignedMessageHash(digest)` on
//! the verifier side.

use alloy::primitives::{Address, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use tiny_keccak::{Hasher, Keccak};

use crate::error::AttestorError;

/// Packed preimage length in bytes
pub const PREIMAGE_LEN: usize = 8 + 20 + 20 + 32 + 20 + 32 + 32;

/// Compute keccak256 hash of data
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

/// Fields bound by a lock attestation, in wire order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationFields {
    pub source_chain_id: u64,
    pub source_bridge: Address,
    pub source_token: Address,
    pub tx_hash: B256,
    pub from: Address,
    pub amount: U256,
    pub source_timestamp: U256,
}

impl AttestationFields {
    /// Fixed-width, fixed-order packing expected by the destination verifier
    pub fn pack(&self) -> [u8; PREIMAGE_LEN] {
        let mut data = [0u8; PREIMAGE_LEN];
        let mut offset = 0;
        let mut put = |bytes: &[u8]| {
            data[offset..offset + bytes.len()].copy_from_slice(bytes);
            offset += bytes.len();
        };

        put(&self.source_chain_id.to_be_bytes());
        put(self.source_bridge.as_slice());
        put(self.source_token.as_slice());
        put(self.tx_hash.as_slice());
        put(self.from.as_slice());
        put(&self.amount.to_be_bytes::<32>());
        put(&self.source_timestamp.to_be_bytes::<32>());

        data
    }

    /// keccak256 of the packed preimage
    pub fn digest(&self) -> [u8; 32] {
        keccak256(&self.pack())
    }
}

/// Signs lock attestations with the relayer credential
pub struct Attestor {
    signer: PrivateKeySigner,
}

impl std::fmt::Debug for Attestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attestor")
            .field("address", &self.signer.address())
            .field("signer", &"<redacted>")
            .finish()
    }
}

impl Attestor {
    /// Build from a hex private key (with or without 0x).
    ///
    /// A missing or malformed key is a startup failure, never a per-event one.
    pub fn from_private_key(private_key: &str) -> Result<Self, AttestorError> {
        let key = private_key.trim();
        if key.is_empty() {
            return Err(AttestorError::MissingCredential);
        }
        let signer: PrivateKeySigner = key
            .parse()
            .map_err(|e| AttestorError::MalformedCredential(format!("{}", e)))?;
        Ok(Self { signer })
    }

    /// The underlying key, for the chain clients' transaction wallet
    pub fn signer(&self) -> PrivateKeySigner {
        self.signer.clone()
    }

    /// Address the destination bridge must recognise as the relayer
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Sign the attestation, returning the 65-byte `r || s || v` signature.
    ///
    /// Deterministic (RFC 6979 nonces) for a given key and field set.
    pub fn sign(&self, fields: &AttestationFields) -> Result<Vec<u8>, AttestorError> {
        let digest = fields.digest();
        let signature = self
            .signer
            .sign_message_sync(&digest)
            .map_err(|e| AttestorError::Signing(e.to_string()))?;
        Ok(signature.as_bytes().to_vec())
    }
}
