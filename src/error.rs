use std::time::Duration;

use thiserror::Error;

use crate::types::DeliveryStatus;

/// Failure reported by a ledger client.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger transport error: {0}")]
    Transport(String),

    #[error("ledger rejected transaction: {0}")]
    Rejected(String),

    #[error("transaction {tx_ref} reverted")]
    Reverted { tx_ref: String },

    #[error("ledger submission timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected ledger response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for LedgerError {
    fn from(err: reqwest::Error) -> Self {
        LedgerError::Transport(err.to_string())
    }
}

/// Attempted record update that breaks the status order.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("delivery {id}: cannot move from {from} to {to}")]
    Invalid {
        id: String,
        from: DeliveryStatus,
        to: DeliveryStatus,
    },

    #[error("delivery {0}: ledger hash already recorded")]
    LedgerHashAlreadySet(String),
}

/// Errors surfaced by the reconciler's public operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    #[error("delivery {0} not found")]
    NotFound(String),

    #[error("delivery {id} already {status}")]
    AlreadyFinalized { id: String, status: DeliveryStatus },

    #[error("reconciler is shutting down")]
    ShuttingDown,

    #[error("task for delivery {0} ended before answering")]
    TaskUnavailable(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("{0}")]
    Hash(String),

    #[error("record store error: {0}")]
    Store(#[from] anyhow::Error),
}
