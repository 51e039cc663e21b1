//! Shared state store: the only channel between two peer clients.
//!
//! This module implements:
//! - The `StateStore` trait (read/write/delete, bounded prefix scan, atomic
//!   compare-and-set transactions, change notification, disconnect hooks)
//! - `MemoryStore`, a strongly-consistent in-process implementation
//! - Typed document helpers (`doc`) so domain types never touch raw JSON
//!
//! ## Example
//!
//! ```
//! use stake_duel::store::{MemoryStore, StateStore, TxDecision};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = MemoryStore::new();
//! store.write("counter", json!(1)).await.unwrap();
//!
//! let outcome = store
//!     .transact("counter", &|current| {
//!         let n = current.and_then(|v| v.as_i64()).unwrap_or(0);
//!         Ok(TxDecision::Write(json!(n + 1)))
//!     })
//!     .await
//!     .unwrap();
//! assert!(outcome.is_committed());
//! # }
//! ```

pub mod doc;
pub mod errors;
pub mod keys;
pub mod memory;

pub use doc::{DocDecision, DocOutcome, DocSubscription};
pub use errors::{StoreError, StoreResult};
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use uuid::Uuid;

/// Identity of one client connection, used to scope disconnect hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a transaction closure wants done with the key
#[derive(Debug, Clone, PartialEq)]
pub enum TxDecision {
    Write(Value),
    Delete,
    Abort,
}

/// Result of a transaction. Both variants carry the value stored under the
/// key once the transaction finished.
#[derive(Debug, Clone, PartialEq)]
pub enum TxOutcome {
    Committed(Option<Value>),
    Aborted(Option<Value>),
}

impl TxOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, TxOutcome::Committed(_))
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            TxOutcome::Committed(v) | TxOutcome::Aborted(v) => v,
        }
    }
}

/// Action the store performs on its own when a connection drops
#[derive(Debug, Clone, PartialEq)]
pub enum CleanupAction {
    Delete,
    Write(Value),
}

/// Transaction update closure. It may run more than once on backends that
/// retry on contention, so it must be free of side effects.
pub type UpdateFn<'a> = dyn Fn(Option<&Value>) -> StoreResult<TxDecision> + Send + Sync + 'a;

/// Change notification for one key. Dropping the subscription unsubscribes.
pub struct Subscription {
    key: String,
    rx: watch::Receiver<Option<Value>>,
}

impl Subscription {
    pub fn new(key: impl Into<String>, rx: watch::Receiver<Option<Value>>) -> Self {
        Self {
            key: key.into(),
            rx,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Value at the time of the last observed change (or of subscribing)
    pub fn current(&self) -> Option<Value> {
        self.rx.borrow().clone()
    }

    /// Wait for the next change and return the new value. Intermediate
    /// values may be coalesced; the latest one is always delivered.
    pub async fn changed(&mut self) -> StoreResult<Option<Value>> {
        self.rx
            .changed()
            .await
            .map_err(|_| StoreError::SubscriptionClosed(self.key.clone()))?;
        Ok(self.rx.borrow_and_update().clone())
    }

    pub fn unsubscribe(self) {}
}

/// Strongly-consistent key-value store shared by both peers
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn read(&self, key: &str) -> StoreResult<Option<Value>>;

    async fn write(&self, key: &str, value: Value) -> StoreResult<()>;

    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Read at most `limit` documents whose key starts with `prefix`.
    /// No ordering is promised.
    async fn scan(&self, prefix: &str, limit: usize) -> StoreResult<Vec<(String, Value)>>;

    /// Atomic compare-and-set on a single key
    async fn transact(&self, key: &str, update: &UpdateFn<'_>) -> StoreResult<TxOutcome>;

    async fn watch(&self, key: &str) -> StoreResult<Subscription>;

    /// Register an action to run when `connection` drops. Replaces any
    /// previous action the connection registered for the same key.
    async fn on_disconnect(
        &self,
        connection: ConnectionId,
        key: &str,
        action: CleanupAction,
    ) -> StoreResult<()>;

    async fn cancel_on_disconnect(&self, connection: ConnectionId, key: &str) -> StoreResult<()>;
}
