//! Settlement error types.

use crate::ledger::LedgerError;
use crate::store::StoreError;
use crate::types::{MatchId, PlayerId};
use thiserror::Error;

/// Settlement errors
#[derive(Debug, Error)]
pub enum SettlementError {
    /// A player cannot cover the entry fee at arm time
    #[error("Player {player_id} cannot cover the stake: available {available}, required {required}")]
    InsufficientFunds {
        player_id: PlayerId,
        available: i64,
        required: i64,
    },

    /// The ledger rejected or failed the batch; nothing was applied
    #[error("Ledger write failed for match {match_id}: {source}")]
    LedgerWriteFailure {
        match_id: MatchId,
        #[source]
        source: LedgerError,
    },

    /// Escrow was never taken for this match
    #[error("Match {0} was never armed")]
    NotArmed(MatchId),

    /// The match has no decided result to settle
    #[error("Match {0} has no result to settle")]
    Undecided(MatchId),

    /// Shared store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl SettlementError {
    /// Get a client-safe error message that doesn't leak sensitive information
    pub fn client_message(&self) -> String {
        match self {
            SettlementError::InsufficientFunds { .. } => {
                "A player could not cover the stake, match cancelled".to_string()
            }
            _ => "Could not settle the match, retrying".to_string(),
        }
    }

    /// Money state may be incomplete until this is retried
    pub fn needs_retry(&self) -> bool {
        matches!(
            self,
            SettlementError::LedgerWriteFailure { .. } | SettlementError::Store(_)
        )
    }
}

/// Result type for settlement operations
pub type SettlementResult<T> = Result<T, SettlementError>;
