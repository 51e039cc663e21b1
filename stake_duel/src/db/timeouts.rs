//! Time budgets for ledger database work.
//!
//! A single statement and a whole ledger transaction get separate budgets.
//! The transaction budget also bounds how long a settlement guard lock must
//! live, see `EngineConfig::validate`.

use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// How long a piece of database work may take
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    /// One statement outside a transaction
    Query,
    /// Begin, lock, write and commit
    Transaction,
}

impl Budget {
    pub const fn duration(self) -> Duration {
        match self {
            Budget::Query => Duration::from_secs(5),
            Budget::Transaction => Duration::from_secs(10),
        }
    }
}

/// Error type for bounded database calls
#[derive(Debug, thiserror::Error)]
pub enum TimeoutError {
    /// Operation timed out
    #[error("Database operation timed out after {0:?}")]
    Timeout(Duration),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type for bounded database calls
pub type TimeoutResult<T> = Result<T, TimeoutError>;

/// Run one sqlx statement within `budget`
///
/// # Example
///
/// ```no_run
/// use stake_duel::db::timeouts::{Budget, bounded};
/// # use sqlx::PgPool;
/// # async fn example(pool: &PgPool) -> Result<(), Box<dyn std::error::Error>> {
///
/// let row = bounded(
///     Budget::Query,
///     sqlx::query("SELECT credit, winnings FROM ledger_accounts WHERE account_key = $1")
///         .bind("house")
///         .fetch_optional(pool)
/// ).await?;
///
/// # Ok(())
/// # }
/// ```
pub async fn bounded<F, T>(budget: Budget, future: F) -> TimeoutResult<T>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match timeout(budget.duration(), future).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(TimeoutError::Timeout(budget.duration())),
    }
}

/// Run a multi-statement unit of work within `budget`. A timeout surfaces
/// as the caller's own error type; the dropped transaction rolls back.
pub async fn bounded_work<F, T, E>(budget: Budget, work: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<TimeoutError>,
{
    timeout(budget.duration(), work)
        .await
        .unwrap_or_else(|_| Err(TimeoutError::Timeout(budget.duration()).into()))
}
