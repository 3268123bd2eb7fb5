//! The key/value collaborator every higher layer persists through.
//!
//! Values are JSON documents. Three families of entries exist:
//!
//! - plain keyed values (`get`/`set`/`delete`) holding whole maps such as the
//!   task queue or the object register;
//! - transients, keyed values with a time-to-live, used for the queue lock;
//! - per-object attribute bags keyed by `(object_id, name)`.
//!
//! [`MemoryStore`] keeps everything in process memory; [`Database`] persists
//! to SQLite.
//!
//! [`Database`]: super::Database

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use super::types::StoreError;

/// Shared handle passed to every component that persists state.
pub type SharedStore = Arc<dyn KeyValueStore>;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Returns the transient's value unless it is missing or expired.
    async fn get_transient(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Stores a transient only if no live entry exists under `key`.
    ///
    /// Returns `true` when this call created the entry. The check and the
    /// write are atomic with respect to other callers of the same store.
    async fn add_transient(&self, key: &str, value: Value, ttl: Duration)
        -> Result<bool, StoreError>;

    async fn delete_transient(&self, key: &str) -> Result<(), StoreError>;

    /// Allocates a new object id.
    async fn create_object(&self) -> Result<i64, StoreError>;

    /// Removes an object together with all of its attributes.
    async fn delete_object(&self, object_id: i64) -> Result<(), StoreError>;

    async fn get_meta(&self, object_id: i64, name: &str) -> Result<Option<Value>, StoreError>;
    async fn set_meta(&self, object_id: i64, name: &str, value: Value) -> Result<(), StoreError>;
    async fn delete_meta(&self, object_id: i64, name: &str) -> Result<(), StoreError>;
}

// ============================================================================
// Typed helpers
// ============================================================================

/// Reads and deserializes a keyed value.
pub async fn load<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Serializes and writes a keyed value.
pub async fn save<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    store.set(key, serde_json::to_value(value)?).await
}

/// Reads and deserializes an object attribute.
pub async fn load_meta<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    object_id: i64,
    name: &str,
) -> Result<Option<T>, StoreError> {
    match store.get_meta(object_id, name).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Serializes and writes an object attribute.
pub async fn save_meta<T: Serialize>(
    store: &dyn KeyValueStore,
    object_id: i64,
    name: &str,
    value: &T,
) -> Result<(), StoreError> {
    store
        .set_meta(object_id, name, serde_json::to_value(value)?)
        .await
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
struct MemoryState {
    values: HashMap<String, Value>,
    transients: HashMap<String, (Value, Instant)>,
    objects: HashMap<i64, HashMap<String, Value>>,
    next_object_id: i64,
}

/// Process-local store. Transient expiry follows the tokio clock, so tests
/// running with paused time can advance past a lock's TTL.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MemoryState) -> R) -> R {
        // A poisoned lock only means another thread panicked mid-update of a
        // plain map; the data is still usable.
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.with_state(|s| s.values.get(key).cloned()))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.with_state(|s| s.values.insert(key.to_string(), value));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.with_state(|s| s.values.remove(key));
        Ok(())
    }

    async fn get_transient(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let now = Instant::now();
        Ok(self.with_state(|s| match s.transients.get(key) {
            Some((value, expires)) if *expires > now => Some(value.clone()),
            _ => None,
        }))
    }

    async fn add_transient(
        &self,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = Instant::now();
        Ok(self.with_state(|s| {
            if matches!(s.transients.get(key), Some((_, expires)) if *expires > now) {
                return false;
            }
            s.transients.insert(key.to_string(), (value, now + ttl));
            true
        }))
    }

    async fn delete_transient(&self, key: &str) -> Result<(), StoreError> {
        self.with_state(|s| s.transients.remove(key));
        Ok(())
    }

    async fn create_object(&self) -> Result<i64, StoreError> {
        Ok(self.with_state(|s| {
            s.next_object_id += 1;
            s.objects.insert(s.next_object_id, HashMap::new());
            s.next_object_id
        }))
    }

    async fn delete_object(&self, object_id: i64) -> Result<(), StoreError> {
        self.with_state(|s| s.objects.remove(&object_id));
        Ok(())
    }

    async fn get_meta(&self, object_id: i64, name: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.with_state(|s| {
            s.objects
                .get(&object_id)
                .and_then(|attrs| attrs.get(name))
                .cloned()
        }))
    }

    async fn set_meta(&self, object_id: i64, name: &str, value: Value) -> Result<(), StoreError> {
        self.with_state(|s| {
            s.objects
                .entry(object_id)
                .or_default()
                .insert(name.to_string(), value)
        });
        Ok(())
    }

    async fn delete_meta(&self, object_id: i64, name: &str) -> Result<(), StoreError> {
        self.with_state(|s| {
            if let Some(attrs) = s.objects.get_mut(&object_id) {
                attrs.remove(name);
            }
        });
        Ok(())
    }
}
