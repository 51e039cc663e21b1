//! Session error types.

use super::models::Phase;
use crate::engine::IllegalMove;
use crate::settlement::SettlementError;
use crate::store::StoreError;
use crate::types::{MatchId, PlayerId};
use thiserror::Error;

/// Coordinator errors
#[derive(Debug, Error)]
pub enum SessionError {
    /// No session document under the match id
    #[error("Match not found: {0}")]
    NotFound(MatchId),

    /// The session document did not appear in time after pairing
    #[error("Match {0} was never created")]
    NeverCreated(MatchId),

    /// Caller is not one of the two players
    #[error("Player {player_id} is not in match {match_id}")]
    NotAParticipant { match_id: MatchId, player_id: PlayerId },

    /// Move rejected before any write
    #[error("Illegal move: {0}")]
    IllegalMove(#[from] IllegalMove),

    /// Operation does not apply in the current phase
    #[error("Match {match_id} is {phase}")]
    InvalidPhase { match_id: MatchId, phase: Phase },

    /// Escrow or settlement failure
    #[error("Settlement error: {0}")]
    Settlement(#[from] SettlementError),

    /// Shared store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl SessionError {
    /// Get a client-safe error message that doesn't leak sensitive information
    pub fn client_message(&self) -> String {
        match self {
            SessionError::NotFound(_) | SessionError::NeverCreated(_) => {
                "Match not available".to_string()
            }
            SessionError::NotAParticipant { .. } => "You are not in this match".to_string(),
            SessionError::IllegalMove(e) => e.to_string(),
            SessionError::InvalidPhase { phase, .. } => format!("Match is {phase}"),
            SessionError::Settlement(e) => e.client_message(),
            SessionError::Store(_) => "Connection problem, try again".to_string(),
        }
    }
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;
