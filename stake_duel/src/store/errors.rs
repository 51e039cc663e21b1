//! Shared state store error types.

use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Document could not be converted to or from its typed form
    #[error("Codec error on {key}: {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Watch channel closed underneath a subscriber
    #[error("Subscription to {0} closed")]
    SubscriptionClosed(String),

    /// Backend failure (connection lost, quota, ...)
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn codec(key: &str, source: serde_json::Error) -> Self {
        StoreError::Codec {
            key: key.to_string(),
            source,
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
