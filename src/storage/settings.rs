use serde::{Deserialize, Serialize};

use super::kv::{load, save, KeyValueStore};
use super::types::StoreError;
use crate::config::Config;

/// Store key of the persisted runtime settings.
pub const SETTINGS_KEY: &str = "podkeeper-options";

/// Operator flags that can change while the process runs.
///
/// Seeded from the config file the first time a store is used. After that
/// the persisted copy wins, because the queue itself flips `save_images` off
/// when image downloads keep failing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub save_images: bool,
    pub auto_import: bool,
    pub keep_deleted_episodes: bool,
    pub check_cache_headers: bool,
    pub refresh_interval_minutes: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for RuntimeSettings {
    fn from(config: &Config) -> Self {
        Self {
            save_images: config.save_images,
            auto_import: config.auto_import,
            keep_deleted_episodes: config.keep_deleted_episodes,
            check_cache_headers: config.check_cache_headers,
            refresh_interval_minutes: config.refresh_interval_minutes,
        }
    }
}

impl RuntimeSettings {
    /// Reads the persisted settings, falling back to defaults.
    pub async fn load(store: &dyn KeyValueStore) -> Result<Self, StoreError> {
        Ok(load(store, SETTINGS_KEY).await?.unwrap_or_default())
    }

    pub async fn save(&self, store: &dyn KeyValueStore) -> Result<(), StoreError> {
        save(store, SETTINGS_KEY, self).await
    }

    /// Persists `seed` unless settings already exist. Returns the effective settings.
    pub async fn seed(store: &dyn KeyValueStore, seed: &Self) -> Result<Self, StoreError> {
        match load::<Self>(store, SETTINGS_KEY).await? {
            Some(existing) => Ok(existing),
            None => {
                seed.save(store).await?;
                Ok(seed.clone())
            }
        }
    }

    /// Applies `f` to the persisted settings and writes them back.
    pub async fn update(
        store: &dyn KeyValueStore,
        f: impl FnOnce(&mut Self),
    ) -> Result<Self, StoreError> {
        let mut settings = Self::load(store).await?;
        f(&mut settings);
        settings.save(store).await?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv::MemoryStore;

    #[tokio::test]
    async fn test_seed_only_once() {
        let store = MemoryStore::new();
        let seed = RuntimeSettings {
            save_images: true,
            ..RuntimeSettings::default()
        };
        let effective = RuntimeSettings::seed(&store, &seed).await.unwrap();
        assert!(effective.save_images);

        RuntimeSettings::update(&store, |s| s.save_images = false)
            .await
            .unwrap();

        // A restart with the same config keeps the persisted flag.
        let effective = RuntimeSettings::seed(&store, &seed).await.unwrap();
        assert!(!effective.save_images);
    }

    #[tokio::test]
    async fn test_load_defaults() {
        let store = MemoryStore::new();
        let settings = RuntimeSettings::load(&store).await.unwrap();
        assert_eq!(settings, RuntimeSettings::default());
        assert!(settings.check_cache_headers);
        assert_eq!(settings.refresh_interval_minutes, 60);
    }
}
