//! Error types for the relay core
//!
//! Submission results are a tagged outcome rather than an error string so the
//! event processor never has to parse node messages.

use thiserror::Error;

use crate::types::{ChainSide, EventId, Receipt};

/// Result of submitting an action to a destination bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Included on chain and succeeded
    Confirmed(Receipt),
    /// Rejected because the ledger already applied this event
    AlreadyProcessed { reason: String },
    /// Rejected on chain for any other reason
    Reverted { reason: String },
    /// Never reached a verdict (timeout, connection refused, ...)
    TransportFailure { message: String },
}

impl SubmitOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SubmitOutcome::Confirmed(_) => "confirmed",
            SubmitOutcome::AlreadyProcessed { .. } => "already_processed",
            SubmitOutcome::Reverted { .. } => "reverted",
            SubmitOutcome::TransportFailure { .. } => "transport_failure",
        }
    }
}

/// Failures of read calls against a chain
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("rpc error on chain {side}: {message}")]
    Rpc { side: ChainSide, message: String },

    #[error("malformed event on chain {side}: {message}")]
    Decode { side: ChainSide, message: String },
}

impl ChainError {
    pub fn rpc(side: ChainSide, message: impl ToString) -> Self {
        ChainError::Rpc {
            side,
            message: message.to_string(),
        }
    }
}

/// Per-event processing failures. Each aborts watermark advancement for the batch.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("transport failure submitting {event_id} to chain {side}: {message}")]
    Transport {
        side: ChainSide,
        event_id: EventId,
        message: String,
    },

    #[error("chain {side} rejected {event_id}: {reason}")]
    Rejected {
        side: ChainSide,
        event_id: EventId,
        reason: String,
    },

    #[error("failed to attest {event_id}: {source}")]
    Attestation {
        event_id: EventId,
        #[source]
        source: AttestorError,
    },
}

impl ProcessError {
    pub fn event_id(&self) -> EventId {
        match self {
            ProcessError::Transport { event_id, .. }
            | ProcessError::Rejected { event_id, .. }
            | ProcessError::Attestation { event_id, .. } => *event_id,
        }
    }

    /// Label for the error counter
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessError::Transport { .. } => "transport",
            ProcessError::Rejected { .. } => "rejected",
            ProcessError::Attestation { .. } => "attestation",
        }
    }
}

/// Reasons a poll tick ended without advancing the watermark
#[derive(Debug, Error)]
pub enum TickError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Credential and signing failures
#[derive(Debug, Error)]
pub enum AttestorError {
    #[error("relayer credential is missing")]
    MissingCredential,

    #[error("relayer credential is malformed: {0}")]
    MalformedCredential(String),

    #[error("signing failed: {0}")]
    Signing(String),
}

/// Snapshot persistence failures
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint at {path} is corrupt: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode checkpoint: {0}")]
    Encode(#[from] serde_json::Error),
}
