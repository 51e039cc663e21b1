//! Ledger error types.

use super::models::AccountId;
use crate::db::timeouts::TimeoutError;
use std::time::Duration;
use thiserror::Error;

/// Ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Ledger backend did not answer in time
    #[error("Ledger operation timed out after {0:?}")]
    Timeout(Duration),

    /// Insufficient balance
    #[error("Insufficient funds for {account}: available {available}, required {required}")]
    InsufficientFunds {
        account: AccountId,
        available: i64,
        required: i64,
    },

    /// Account not found
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Duplicate transaction (idempotency key already used)
    #[error("Duplicate transaction: {0}")]
    DuplicateTransaction(String),

    /// Invalid amount (must be positive)
    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),

    /// Balance arithmetic overflowed
    #[error("Balance overflow")]
    BalanceOverflow,

    /// Batch without postings
    #[error("Ledger batch {0} has no postings")]
    EmptyBatch(String),

    /// Transaction failed
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),
}

impl From<TimeoutError> for LedgerError {
    fn from(err: TimeoutError) -> Self {
        match err {
            TimeoutError::Timeout(after) => LedgerError::Timeout(after),
            TimeoutError::Database(e) => LedgerError::Database(e),
        }
    }
}

impl LedgerError {
    /// Get a client-safe error message that doesn't leak sensitive information
    pub fn client_message(&self) -> String {
        match self {
            LedgerError::Database(_) | LedgerError::Timeout(_) => {
                "Balance service unavailable".to_string()
            }
            LedgerError::AccountNotFound(_) => "Account not found".to_string(),
            LedgerError::InsufficientFunds {
                available,
                required,
                ..
            } => format!("Insufficient funds: need {required}, have {available}"),
            _ => "Balance update failed".to_string(),
        }
    }

    /// Whether retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LedgerError::Database(_) | LedgerError::Timeout(_) | LedgerError::TransactionFailed(_)
        )
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
