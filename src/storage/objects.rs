use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::kv::{load, load_meta, save, save_meta, SharedStore};
use super::types::{DataKind, ObjectIndex, StoreError};
use crate::util::content_hash;

/// Store key of the register mapping unique ids to [`ObjectIndex`] entries.
pub const REGISTER_KEY: &str = "podkeeper-register";

type Register = BTreeMap<String, ObjectIndex>;

/// Registry of stored objects (one per podcast feed) addressed by opaque keys.
///
/// A feed is created under the URL it was first requested with. Later
/// requests may reach the same feed through a different URL (a redirect
/// target, a `www.` variant); those aliases are recorded in the index so
/// every known key resolves to the same object and its attribute bag.
#[derive(Clone)]
pub struct ObjectStore {
    store: SharedStore,
    register_lock: Arc<Mutex<()>>,
}

impl ObjectStore {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            register_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    async fn register(&self) -> Result<Register, StoreError> {
        Ok(load(self.store.as_ref(), REGISTER_KEY)
            .await?
            .unwrap_or_default())
    }

    /// Resolves a key to its index entry.
    ///
    /// The key may be a unique id, a key whose hash is a unique id, any known
    /// alias (or the hash of one), or the object id in decimal form. Matching
    /// is exact.
    pub async fn lookup(&self, key: &str) -> Result<Option<ObjectIndex>, StoreError> {
        let register = self.register().await?;
        Ok(find(&register, key).map(|(_, index)| index.clone()))
    }

    /// Visible objects in creation order.
    pub async fn list_visible(&self) -> Result<Vec<ObjectIndex>, StoreError> {
        let mut visible: Vec<ObjectIndex> = self
            .register()
            .await?
            .into_values()
            .filter(|index| !index.is_hidden)
            .collect();
        visible.sort_by_key(|index| index.object_id);
        Ok(visible)
    }

    /// Reads one attribute of the object `key` resolves to.
    pub async fn get_data<T: DeserializeOwned>(
        &self,
        key: &str,
        kind: DataKind,
    ) -> Result<Option<T>, StoreError> {
        match self.lookup(key).await? {
            Some(index) => load_meta(self.store.as_ref(), index.object_id, kind.as_str()).await,
            None => Ok(None),
        }
    }

    /// Writes one attribute of the object `key` resolves to.
    ///
    /// When `key` is unknown but `alias` is indexed, the two swap roles so the
    /// data lands on the existing object. The non-resolving key is then
    /// recorded as an alias. Returns `false` if neither key resolves.
    pub async fn update_data<T: Serialize>(
        &self,
        data: &T,
        key: &str,
        kind: DataKind,
        alias: Option<&str>,
    ) -> Result<bool, StoreError> {
        let _guard = self.register_lock.lock().await;
        let mut register = self.register().await?;

        let mut resolved = find(&register, key).map(|(id, _)| id.clone());
        let mut alias = alias.filter(|a| !a.is_empty() && *a != key);
        if resolved.is_none() {
            if let Some(a) = alias {
                resolved = find(&register, a).map(|(id, _)| id.clone());
                alias = Some(key);
            }
        }

        let Some(unique_id) = resolved else {
            return Ok(false);
        };
        let Some(index) = register.get_mut(&unique_id) else {
            return Ok(false);
        };
        let object_id = index.object_id;

        if let Some(a) = alias {
            if index.add_key(a) {
                tracing::debug!(object_id, alias = %a, "Recorded alias key");
                save(self.store.as_ref(), REGISTER_KEY, &register).await?;
            }
        }

        save_meta(self.store.as_ref(), object_id, kind.as_str(), data).await?;
        Ok(true)
    }

    /// Removes one attribute of the object `key` resolves to.
    pub async fn delete_data(&self, key: &str, kind: DataKind) -> Result<(), StoreError> {
        if let Some(index) = self.lookup(key).await? {
            self.store
                .delete_meta(index.object_id, kind.as_str())
                .await?;
        }
        Ok(())
    }

    /// Removes an object, all of its attributes and its index entry.
    ///
    /// Returns `false` when the key does not resolve.
    pub async fn delete_object(&self, key: &str) -> Result<bool, StoreError> {
        let _guard = self.register_lock.lock().await;
        let mut register = self.register().await?;
        let Some((unique_id, object_id)) =
            find(&register, key).map(|(id, index)| (id.clone(), index.object_id))
        else {
            return Ok(false);
        };

        self.store.delete_object(object_id).await?;
        register.remove(&unique_id);
        save(self.store.as_ref(), REGISTER_KEY, &register).await?;
        tracing::info!(object_id, "Removed stored object");
        Ok(true)
    }

    /// Returns the object for `key`, creating it on first use.
    ///
    /// An existing hidden object is made visible again.
    pub async fn maybe_add_new_object(&self, key: &str, title: &str) -> Result<i64, StoreError> {
        let _guard = self.register_lock.lock().await;
        let mut register = self.register().await?;

        if let Some(unique_id) = find(&register, key).map(|(id, _)| id.clone()) {
            if let Some(index) = register.get_mut(&unique_id) {
                let object_id = index.object_id;
                if index.is_hidden {
                    index.is_hidden = false;
                    save(self.store.as_ref(), REGISTER_KEY, &register).await?;
                }
                return Ok(object_id);
            }
        }

        let object_id = self.store.create_object().await?;
        let unique_id = content_hash(key);
        register.insert(
            unique_id.clone(),
            ObjectIndex {
                object_id,
                title: title.to_string(),
                known_keys: vec![key.to_string()],
                unique_id,
                is_hidden: false,
            },
        );
        save(self.store.as_ref(), REGISTER_KEY, &register).await?;
        tracing::info!(object_id, key = %key, "Registered new object");
        Ok(object_id)
    }

    /// Hides an object from listings without deleting its data.
    pub async fn hide(&self, key: &str) -> Result<bool, StoreError> {
        let _guard = self.register_lock.lock().await;
        let mut register = self.register().await?;
        let Some(unique_id) = find(&register, key).map(|(id, _)| id.clone()) else {
            return Ok(false);
        };
        if let Some(index) = register.get_mut(&unique_id) {
            index.is_hidden = true;
        }
        save(self.store.as_ref(), REGISTER_KEY, &register).await?;
        Ok(true)
    }
}

fn find<'a>(register: &'a Register, key: &str) -> Option<(&'a String, &'a ObjectIndex)> {
    if key.is_empty() {
        return None;
    }
    if let Some(entry) = register.get_key_value(key) {
        return Some(entry);
    }
    if let Some(entry) = register.get_key_value(&content_hash(key)) {
        return Some(entry);
    }
    let object_id = key.parse::<i64>().ok();
    register.iter().find(|(_, index)| {
        Some(index.object_id) == object_id
            || index
                .known_keys
                .iter()
                .any(|k| k == key || content_hash(k) == key)
    })
}
