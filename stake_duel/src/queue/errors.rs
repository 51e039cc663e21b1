//! Queue error types.

use crate::ledger::LedgerError;
use crate::session::SessionError;
use crate::store::StoreError;
use crate::types::PlayerId;
use thiserror::Error;

/// Matchmaking errors
#[derive(Debug, Error)]
pub enum QueueError {
    /// Total balance below the tier's entry fee; nothing was enqueued
    #[error("Player {player_id} has {available}, tier needs {required}")]
    InsufficientFunds {
        player_id: PlayerId,
        available: i64,
        required: i64,
    },

    /// No opponent within the search budget; the entry was removed
    #[error("No opponent found for tier {0}")]
    SearchTimeout(String),

    /// Another challenger claimed the candidate first
    #[error("Queue entry {0} was claimed by someone else")]
    ClaimConflict(String),

    /// Our own entry vanished while waiting, e.g. a disconnect hook fired
    #[error("Queue entry {0} disappeared while waiting")]
    EntryLost(String),

    /// Shared store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Balance lookup failed
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Session could not be created for a committed claim
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

impl QueueError {
    /// Get a client-safe error message that doesn't leak sensitive information
    pub fn client_message(&self) -> String {
        match self {
            QueueError::InsufficientFunds { required, .. } => {
                format!("You need at least {required} to play this tier")
            }
            QueueError::SearchTimeout(_) => "No opponent found, pick a tier again".to_string(),
            QueueError::ClaimConflict(_) | QueueError::EntryLost(_) => {
                "Search interrupted, try again".to_string()
            }
            QueueError::Store(_) | QueueError::Ledger(_) | QueueError::Session(_) => {
                "Connection problem, try again".to_string()
            }
        }
    }
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;
