//! Typed documents over the untyped store.
//!
//! Queue entries, match sessions and settlement records are plain serde
//! types; they are converted to JSON only here, at the store edge.

use super::{StateStore, Subscription, TxDecision, TxOutcome, errors::StoreError, errors::StoreResult};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::marker::PhantomData;

/// Typed counterpart of `TxDecision`
#[derive(Debug, Clone, PartialEq)]
pub enum DocDecision<T> {
    Write(T),
    Delete,
    Abort,
}

/// Typed counterpart of `TxOutcome`
#[derive(Debug, Clone, PartialEq)]
pub enum DocOutcome<T> {
    Committed(Option<T>),
    Aborted(Option<T>),
}

impl<T> DocOutcome<T> {
    pub fn is_committed(&self) -> bool {
        matches!(self, DocOutcome::Committed(_))
    }

    pub fn into_doc(self) -> Option<T> {
        match self {
            DocOutcome::Committed(doc) | DocOutcome::Aborted(doc) => doc,
        }
    }
}

pub fn decode<T: DeserializeOwned>(key: &str, value: &Value) -> StoreResult<T> {
    serde_json::from_value(value.clone()).map_err(|e| StoreError::codec(key, e))
}

pub fn encode<T: Serialize>(key: &str, doc: &T) -> StoreResult<Value> {
    serde_json::to_value(doc).map_err(|e| StoreError::codec(key, e))
}

pub async fn read_doc<T: DeserializeOwned>(
    store: &dyn StateStore,
    key: &str,
) -> StoreResult<Option<T>> {
    store
        .read(key)
        .await?
        .map(|value| decode(key, &value))
        .transpose()
}

pub async fn write_doc<T: Serialize + Sync>(
    store: &dyn StateStore,
    key: &str,
    doc: &T,
) -> StoreResult<()> {
    let value = encode(key, doc)?;
    store.write(key, value).await
}

/// Compare-and-set on a typed document.
///
/// `update` sees the decoded current document (if any). A document that
/// fails to decode aborts the transaction with `StoreError::Codec`.
pub async fn transact_doc<T, F>(
    store: &dyn StateStore,
    key: &str,
    update: F,
) -> StoreResult<DocOutcome<T>>
where
    T: Serialize + DeserializeOwned,
    F: Fn(Option<T>) -> DocDecision<T> + Send + Sync,
{
    let outcome = store
        .transact(key, &|current: Option<&Value>| {
            let typed = current.map(|value| decode::<T>(key, value)).transpose()?;
            Ok(match update(typed) {
                DocDecision::Write(doc) => TxDecision::Write(encode(key, &doc)?),
                DocDecision::Delete => TxDecision::Delete,
                DocDecision::Abort => TxDecision::Abort,
            })
        })
        .await?;

    Ok(match outcome {
        TxOutcome::Committed(value) => {
            DocOutcome::Committed(value.map(|v| decode(key, &v)).transpose()?)
        }
        TxOutcome::Aborted(value) => {
            DocOutcome::Aborted(value.map(|v| decode(key, &v)).transpose()?)
        }
    })
}

/// Typed change notification
pub struct DocSubscription<T> {
    inner: Subscription,
    _doc: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> DocSubscription<T> {
    pub async fn open(store: &dyn StateStore, key: &str) -> StoreResult<Self> {
        Ok(Self {
            inner: store.watch(key).await?,
            _doc: PhantomData,
        })
    }

    pub fn key(&self) -> &str {
        self.inner.key()
    }

    pub fn current(&self) -> StoreResult<Option<T>> {
        self.inner
            .current()
            .map(|value| decode(self.inner.key(), &value))
            .transpose()
    }

    pub async fn changed(&mut self) -> StoreResult<Option<T>> {
        let value = self.inner.changed().await?;
        value
            .map(|v| decode(self.inner.key(), &v))
            .transpose()
    }
}
