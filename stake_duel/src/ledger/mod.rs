//! Balance ledger: two-pool player balances with an append-only log.
//!
//! This module implements:
//! - `BalanceLedger`, the collaborator interface (read, adjust, append, and
//!   all-or-nothing batches under an idempotency key)
//! - `MemoryLedger` for tests and simulation
//! - `PgLedger`, a PostgreSQL implementation with row locks
//!
//! Player pools can never go negative. The house account absorbs the spread
//! between collected stakes and paid prizes, so every batch the settlement
//! engine commits nets to zero across players and house.
//!
//! ## Example
//!
//! ```
//! use stake_duel::ledger::{
//!     AccountId, Balance, BalanceLedger, EntryType, LedgerBatch, MemoryLedger, Posting,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let ledger = MemoryLedger::new().with_account(1, Balance::new(20, 0));
//!
//! let batch = LedgerBatch::new("arm:example")
//!     .posting(Posting::debit_credit_first(AccountId::Player(1), 10, EntryType::Escrow));
//! ledger.commit(&batch).await.unwrap();
//!
//! assert_eq!(ledger.read_balance(AccountId::Player(1)).await.unwrap(), Balance::new(10, 0));
//! # }
//! ```

pub mod errors;
pub mod memory;
pub mod models;
pub mod postgres;

pub use errors::{LedgerError, LedgerResult};
pub use memory::MemoryLedger;
pub use models::{
    Account, AccountId, Balance, BalanceDelta, EntryDirection, EntryType, LedgerBatch,
    LedgerEntry, NewEntry, Posting, PostingChange,
};
pub use postgres::PgLedger;

use async_trait::async_trait;

/// Balance ledger collaborator
#[async_trait]
pub trait BalanceLedger: Send + Sync {
    /// Current balance. The house account reads as zero until first used.
    async fn read_balance(&self, account: AccountId) -> LedgerResult<Balance>;

    /// Adjust both pools of one account atomically.
    ///
    /// # Errors
    ///
    /// * `LedgerError::InsufficientFunds` - A player pool would go negative
    async fn adjust_balance(
        &self,
        account: AccountId,
        credit_delta: i64,
        winnings_delta: i64,
    ) -> LedgerResult<Balance>;

    /// Append an entry to the log without touching balances
    async fn append_transaction(&self, entry: NewEntry) -> LedgerResult<i64>;

    /// Apply every posting of the batch or none of them, writing one entry
    /// per posting.
    ///
    /// # Errors
    ///
    /// * `LedgerError::DuplicateTransaction` - The batch key was already committed
    /// * `LedgerError::InsufficientFunds` - A player pool would go negative
    async fn commit(&self, batch: &LedgerBatch) -> LedgerResult<Vec<LedgerEntry>>;

    /// Entries written by a committed batch, empty if the key is unknown
    async fn batch_entries(&self, idempotency_key: &str) -> LedgerResult<Vec<LedgerEntry>>;

    /// Most recent entries of one account, newest first
    async fn entries(&self, account: AccountId, limit: i64) -> LedgerResult<Vec<LedgerEntry>>;
}
