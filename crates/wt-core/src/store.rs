//! The persistent key-value store the tracker writes through.
//!
//! Mirrors the browser extension storage contract: values are JSON, reads
//! return only the keys that exist, writes merge into the existing mapping and
//! `clear` drops everything. There are no transactions; callers that need a
//! read-modify-write must serialize it themselves (see [`crate::Ledger`]).

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use thiserror::Error;

/// A set of stored items, keyed by storage key.
pub type Items = BTreeMap<String, Value>;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend failed to read or write.
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// A stored value could not be encoded or decoded.
    #[error("invalid value for key {key}: {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Asynchronous key-value storage.
pub trait KeyValueStore: Send + Sync {
    /// Returns the stored values for `keys`; missing keys are absent from the result.
    fn get(&self, keys: &[&str]) -> impl Future<Output = Result<Items, StoreError>> + Send;

    /// Returns every stored item.
    fn get_all(&self) -> impl Future<Output = Result<Items, StoreError>> + Send;

    /// Writes `items`, replacing existing values for the same keys.
    fn set(&self, items: Items) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Removes `keys`.
    fn remove(&self, keys: &[&str]) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Removes every item.
    fn clear(&self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

impl<S: KeyValueStore> KeyValueStore for Arc<S> {
    fn get(&self, keys: &[&str]) -> impl Future<Output = Result<Items, StoreError>> + Send {
        (**self).get(keys)
    }

    fn get_all(&self) -> impl Future<Output = Result<Items, StoreError>> + Send {
        (**self).get_all()
    }

    fn set(&self, items: Items) -> impl Future<Output = Result<(), StoreError>> + Send {
        (**self).set(items)
    }

    fn remove(&self, keys: &[&str]) -> impl Future<Output = Result<(), StoreError>> + Send {
        (**self).remove(keys)
    }

    fn clear(&self) -> impl Future<Output = Result<(), StoreError>> + Send {
        (**self).clear()
    }
}

/// In-process store backed by a map.
///
/// Useful for testing and for embedding the tracker without persistence.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    items: Arc<Mutex<Items>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Items> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueStore for MemoryStore {
    async fn get(&self, keys: &[&str]) -> Result<Items, StoreError> {
        let items = self.lock();
        Ok(keys
            .iter()
            .filter_map(|k| items.get(*k).map(|v| ((*k).to_string(), v.clone())))
            .collect())
    }

    async fn get_all(&self) -> Result<Items, StoreError> {
        Ok(self.lock().clone())
    }

    async fn set(&self, items: Items) -> Result<(), StoreError> {
        self.lock().extend(items);
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<(), StoreError> {
        let mut items = self.lock();
        for key in keys {
            items.remove(*key);
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.lock().clear();
        Ok(())
    }
}

/// Decodes `items[key]` into `T`, treating absent or malformed values as `None`.
pub(crate) fn decode_lenient<T: serde::de::DeserializeOwned>(items: &Items, key: &str) -> Option<T> {
    let value = items.get(key)?;
    match serde_json::from_value(value.clone()) {
        Ok(decoded) => Some(decoded),
        Err(error) => {
            tracing::warn!(key, %error, "ignoring malformed stored value");
            None
        }
    }
}
