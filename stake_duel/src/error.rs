//! Crate-level error.
//!
//! Each layer has its own error enum; `DuelError` lets an embedding
//! application handle any of them through one type.

use crate::config::ConfigError;
use crate::engine::IllegalMove;
use crate::ledger::LedgerError;
use crate::queue::QueueError;
use crate::session::SessionError;
use crate::settlement::SettlementError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DuelError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Settlement(#[from] SettlementError),

    #[error(transparent)]
    IllegalMove(#[from] IllegalMove),
}

impl DuelError {
    /// Short notification suitable for the player
    pub fn client_message(&self) -> String {
        match self {
            DuelError::Config(_) | DuelError::Store(_) => {
                "Service unavailable, try again".to_string()
            }
            DuelError::Ledger(e) => e.client_message(),
            DuelError::Queue(e) => e.client_message(),
            DuelError::Session(e) => e.client_message(),
            DuelError::Settlement(e) => e.client_message(),
            DuelError::IllegalMove(e) => e.to_string(),
        }
    }

    /// Money state may be incomplete and the operation must be retried
    pub fn needs_retry(&self) -> bool {
        match self {
            DuelError::Settlement(e) => e.needs_retry(),
            DuelError::Session(SessionError::Settlement(e)) => e.needs_retry(),
            _ => false,
        }
    }
}

pub type DuelResult<T> = Result<T, DuelError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::AccountId;

    #[test]
    fn test_client_messages_hide_internals() {
        let err: DuelError = StoreError::Backend("10.0.0.3 refused".to_string()).into();
        assert!(!err.client_message().contains("10.0.0.3"));

        let err: DuelError = QueueError::SearchTimeout("grid-10-18".to_string()).into();
        assert_eq!(err.client_message(), "No opponent found, pick a tier again");

        let err: DuelError = IllegalMove::NotYourTurn.into();
        assert_eq!(err.client_message(), "not your turn");
    }

    #[test]
    fn test_ledger_failure_needs_retry() {
        let err: DuelError = SettlementError::LedgerWriteFailure {
            match_id: uuid::Uuid::new_v4(),
            source: LedgerError::AccountNotFound(AccountId::House),
        }
        .into();
        assert!(err.needs_retry());

        let err: DuelError = SettlementError::NotArmed(uuid::Uuid::new_v4()).into();
        assert!(!err.needs_retry());
    }
}
