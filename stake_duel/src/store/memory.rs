//! In-process shared state store.

use super::{
    CleanupAction, ConnectionId, StateStore, Subscription, TxDecision, TxOutcome, UpdateFn,
    errors::StoreResult,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tokio::sync::watch;

#[derive(Default)]
struct Inner {
    /// Documents, ordered so prefix scans are a range walk
    docs: BTreeMap<String, Value>,
    /// One watch channel per observed key
    watchers: HashMap<String, watch::Sender<Option<Value>>>,
    /// Disconnect hooks per connection
    cleanups: HashMap<ConnectionId, HashMap<String, CleanupAction>>,
}

impl Inner {
    fn put(&mut self, key: &str, value: Option<Value>) {
        match &value {
            Some(v) => {
                self.docs.insert(key.to_string(), v.clone());
            }
            None => {
                self.docs.remove(key);
            }
        }
        self.notify(key, value);
    }

    fn notify(&mut self, key: &str, value: Option<Value>) {
        let drop_watcher = match self.watchers.get(key) {
            Some(sender) => {
                sender.send_replace(value.clone());
                value.is_none() && sender.receiver_count() == 0
            }
            None => false,
        };

        if drop_watcher {
            self.watchers.remove(key);
        }
    }
}

/// Strongly-consistent in-memory store.
///
/// Every operation runs under one mutex, so `transact` is a true
/// compare-and-set and watchers see writes in commit order.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic inside a transaction closure must not wedge every client
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Simulate a connection drop: run and forget its disconnect hooks.
    ///
    /// # Returns
    ///
    /// * `usize` - Number of hooks that ran
    pub fn disconnect(&self, connection: ConnectionId) -> usize {
        let mut inner = self.lock();
        let hooks = inner.cleanups.remove(&connection).unwrap_or_default();
        let count = hooks.len();

        for (key, action) in hooks {
            match action {
                CleanupAction::Delete => inner.put(&key, None),
                CleanupAction::Write(value) => inner.put(&key, Some(value)),
            }
        }

        log::debug!("Connection {} dropped, ran {} cleanup hooks", connection, count);
        count
    }

    /// Number of hooks registered for a connection
    pub fn pending_hooks(&self, connection: ConnectionId) -> usize {
        self.lock()
            .cleanups
            .get(&connection)
            .map(HashMap::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn read(&self, key: &str) -> StoreResult<Option<Value>> {
        Ok(self.lock().docs.get(key).cloned())
    }

    async fn write(&self, key: &str, value: Value) -> StoreResult<()> {
        self.lock().put(key, Some(value));
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        if inner.docs.contains_key(key) {
            inner.put(key, None);
        }
        Ok(())
    }

    async fn scan(&self, prefix: &str, limit: usize) -> StoreResult<Vec<(String, Value)>> {
        let inner = self.lock();
        let docs = inner
            .docs
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(docs)
    }

    async fn transact(&self, key: &str, update: &UpdateFn<'_>) -> StoreResult<TxOutcome> {
        let mut inner = self.lock();
        let current = inner.docs.get(key).cloned();

        match update(current.as_ref())? {
            TxDecision::Write(value) => {
                inner.put(key, Some(value.clone()));
                Ok(TxOutcome::Committed(Some(value)))
            }
            TxDecision::Delete => {
                if current.is_some() {
                    inner.put(key, None);
                }
                Ok(TxOutcome::Committed(None))
            }
            TxDecision::Abort => Ok(TxOutcome::Aborted(current)),
        }
    }

    async fn watch(&self, key: &str) -> StoreResult<Subscription> {
        let mut inner = self.lock();
        let current = inner.docs.get(key).cloned();
        let rx = inner
            .watchers
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(current).0)
            .subscribe();
        Ok(Subscription::new(key, rx))
    }

    async fn on_disconnect(
        &self,
        connection: ConnectionId,
        key: &str,
        action: CleanupAction,
    ) -> StoreResult<()> {
        self.lock()
            .cleanups
            .entry(connection)
            .or_default()
            .insert(key.to_string(), action);
        Ok(())
    }

    async fn cancel_on_disconnect(&self, connection: ConnectionId, key: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        if let Some(hooks) = inner.cleanups.get_mut(&connection) {
            hooks.remove(key);
            if hooks.is_empty() {
                inner.cleanups.remove(&connection);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_read_write_delete() {
        let store = MemoryStore::new();
        assert_eq!(store.read("a").await.unwrap(), None);

        store.write("a", json!({"n": 1})).await.unwrap();
        assert_eq!(store.read("a").await.unwrap(), Some(json!({"n": 1})));

        store.delete("a").await.unwrap();
        assert_eq!(store.read("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scan_respects_prefix_and_limit() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.write(&format!("queue/t/{i}"), json!(i)).await.unwrap();
        }
        store.write("queue/u/0", json!(0)).await.unwrap();
        store.write("queue/s/0", json!(0)).await.unwrap();

        let all = store.scan("queue/t/", 100).await.unwrap();
        assert_eq!(all.len(), 5);
        assert!(all.iter().all(|(k, _)| k.starts_with("queue/t/")));

        let some = store.scan("queue/t/", 2).await.unwrap();
        assert_eq!(some.len(), 2);
    }

    #[tokio::test]
    async fn test_transact_abort_leaves_value() {
        let store = MemoryStore::new();
        store.write("k", json!("original")).await.unwrap();

        let outcome = store
            .transact("k", &|_| Ok(TxDecision::Abort))
            .await
            .unwrap();

        assert_eq!(outcome, TxOutcome::Aborted(Some(json!("original"))));
        assert_eq!(store.read("k").await.unwrap(), Some(json!("original")));
    }

    #[tokio::test]
    async fn test_concurrent_cas_only_one_commits() {
        let store = Arc::new(MemoryStore::new());
        store.write("slot", json!(null)).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .transact("slot", &|current| match current {
                        Some(Value::Null) => Ok(TxDecision::Write(json!(i))),
                        _ => Ok(TxDecision::Abort),
                    })
                    .await
                    .unwrap()
                    .is_committed()
            }));
        }

        let mut committed = 0;
        for task in tasks {
            if task.await.unwrap() {
                committed += 1;
            }
        }
        assert_eq!(committed, 1, "Exactly one writer should win the slot");
    }

    #[tokio::test]
    async fn test_watch_sees_changes() {
        let store = MemoryStore::new();
        let mut sub = store.watch("doc").await.unwrap();
        assert_eq!(sub.current(), None);

        store.write("doc", json!(1)).await.unwrap();
        assert_eq!(sub.changed().await.unwrap(), Some(json!(1)));

        store.delete("doc").await.unwrap();
        assert_eq!(sub.changed().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_disconnect_runs_hooks() {
        let store = MemoryStore::new();
        let conn = ConnectionId::new();
        store.write("queue/t/1", json!({"p": 1})).await.unwrap();
        store
            .on_disconnect(conn, "queue/t/1", CleanupAction::Delete)
            .await
            .unwrap();
        store
            .on_disconnect(conn, "status/1", CleanupAction::Write(json!("offline")))
            .await
            .unwrap();

        assert_eq!(store.pending_hooks(conn), 2);
        assert_eq!(store.disconnect(conn), 2);
        assert_eq!(store.read("queue/t/1").await.unwrap(), None);
        assert_eq!(store.read("status/1").await.unwrap(), Some(json!("offline")));
        assert_eq!(store.pending_hooks(conn), 0);
    }

    #[tokio::test]
    async fn test_cancelled_hook_does_not_run() {
        let store = MemoryStore::new();
        let conn = ConnectionId::new();
        store.write("k", json!(1)).await.unwrap();
        store
            .on_disconnect(conn, "k", CleanupAction::Delete)
            .await
            .unwrap();
        store.cancel_on_disconnect(conn, "k").await.unwrap();

        assert_eq!(store.disconnect(conn), 0);
        assert_eq!(store.read("k").await.unwrap(), Some(json!(1)));
    }
}
