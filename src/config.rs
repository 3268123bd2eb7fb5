//! Configuration file parser for ~/.config/podkeeper/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde, though we log a warning when the file
//! contains potential typos.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// `save_images`, `auto_import`, `keep_deleted_episodes`,
/// `check_cache_headers` and `refresh_interval_minutes` only seed the
/// persisted runtime settings; see [`crate::storage::RuntimeSettings`].
///
/// SEC-015: Custom Debug impl masks `queue_secret`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Upper bound on a feed's cache duration, in minutes.
    pub refresh_interval_minutes: u64,

    /// Send `If-None-Match` / `If-Modified-Since` on re-fetches.
    pub check_cache_headers: bool,

    /// Keep episodes that disappeared from the feed.
    pub keep_deleted_episodes: bool,

    /// Download episode and cover images into `media_dir`.
    pub save_images: bool,

    /// Import newly discovered episodes automatically.
    pub auto_import: bool,

    /// Where downloaded images go. Defaults to `<config dir>/media`.
    pub media_dir: Option<PathBuf>,

    /// SQLite database file. Defaults to `<config dir>/podkeeper.db`.
    pub database_path: Option<PathBuf>,

    /// Number of queue workers waiting for wake signals.
    pub worker_count: usize,

    /// Seconds before an abandoned queue lock expires.
    pub lock_ttl_secs: u64,

    /// Pause after each handled task before the lock is released.
    pub pace_secs: u64,

    /// Pause before re-dispatching when the memory ceiling is near.
    pub memory_backoff_secs: u64,

    /// Process memory ceiling in MB. 0 = unlimited.
    pub memory_limit_mb: u64,

    /// Timeout for feed and image requests.
    pub http_timeout_secs: u64,

    /// How often the scheduler looks for feeds due a refresh.
    pub tick_interval_minutes: u64,

    /// Shared secret workers present to the queue. Random per process when unset.
    pub queue_secret: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_interval_minutes: 60,
            check_cache_headers: true,
            keep_deleted_episodes: false,
            save_images: false,
            auto_import: false,
            media_dir: None,
            database_path: None,
            worker_count: 2,
            lock_ttl_secs: 30,
            pace_secs: 5,
            memory_backoff_secs: 5,
            memory_limit_mb: 128,
            http_timeout_secs: 10,
            tick_interval_minutes: 10,
            queue_secret: None,
        }
    }
}

/// SEC-015: Mask queue_secret in Debug output to prevent secret leakage.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("refresh_interval_minutes", &self.refresh_interval_minutes)
            .field("check_cache_headers", &self.check_cache_headers)
            .field("keep_deleted_episodes", &self.keep_deleted_episodes)
            .field("save_images", &self.save_images)
            .field("auto_import", &self.auto_import)
            .field("media_dir", &self.media_dir)
            .field("database_path", &self.database_path)
            .field("worker_count", &self.worker_count)
            .field("lock_ttl_secs", &self.lock_ttl_secs)
            .field("pace_secs", &self.pace_secs)
            .field("memory_backoff_secs", &self.memory_backoff_secs)
            .field("memory_limit_mb", &self.memory_limit_mb)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("tick_interval_minutes", &self.tick_interval_minutes)
            .field(
                "queue_secret",
                &self.queue_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Memory ceiling assumed when `memory_limit_mb = 0`.
    const UNLIMITED_MEMORY_MB: u64 = 32_000;

    const KNOWN_KEYS: [&'static str; 15] = [
        "refresh_interval_minutes",
        "check_cache_headers",
        "keep_deleted_episodes",
        "save_images",
        "auto_import",
        "media_dir",
        "database_path",
        "worker_count",
        "lock_ttl_secs",
        "pace_secs",
        "memory_backoff_secs",
        "memory_limit_mb",
        "http_timeout_secs",
        "tick_interval_minutes",
        "queue_secret",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            workers = config.worker_count,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Effective memory ceiling in bytes.
    pub fn memory_limit_bytes(&self) -> u64 {
        let mb = match self.memory_limit_mb {
            0 => Self::UNLIMITED_MEMORY_MB,
            mb => mb,
        };
        mb.saturating_mul(1024 * 1024)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }

    /// The configured queue secret, or a random one for this process.
    pub fn queue_secret(&self) -> SecretString {
        match &self.queue_secret {
            Some(secret) if !secret.is_empty() => SecretString::from(secret.clone()),
            _ => SecretString::from(random_secret()),
        }
    }
}

fn random_secret() -> String {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let seed = format!(
        "{}:{}:{}",
        std::process::id(),
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        RandomState::new().build_hasher().finish()
    );
    crate::util::content_hash(&seed)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn write_config(name: &str, content: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("podkeeper_config_test_{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.refresh_interval_minutes, 60);
        assert!(config.check_cache_headers);
        assert!(!config.save_images);
        assert!(!config.auto_import);
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.lock_ttl_secs, 30);
        assert_eq!(config.pace_secs, 5);
        assert!(config.queue_secret.is_none());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/podkeeper_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.worker_count, 2);
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let (dir, path) = write_config("whitespace", "   \n  \n  ");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.refresh_interval_minutes, 60);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (dir, path) = write_config("partial", "save_images = true\npace_secs = 0\n");
        let config = Config::load(&path).unwrap();
        assert!(config.save_images);
        assert_eq!(config.pace_secs, 0);
        assert_eq!(config.lock_ttl_secs, 30);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let content = r#"
refresh_interval_minutes = 15
check_cache_headers = false
keep_deleted_episodes = true
save_images = true
auto_import = true
media_dir = "/srv/podcasts/media"
database_path = "/srv/podcasts/podkeeper.db"
worker_count = 4
lock_ttl_secs = 60
pace_secs = 1
memory_backoff_secs = 2
memory_limit_mb = 512
http_timeout_secs = 20
tick_interval_minutes = 5
queue_secret = "s3cret"
"#;
        let (dir, path) = write_config("full", content);
        let config = Config::load(&path).unwrap();
        assert_eq!(config.refresh_interval_minutes, 15);
        assert!(!config.check_cache_headers);
        assert!(config.keep_deleted_episodes);
        assert_eq!(
            config.media_dir.as_deref(),
            Some(Path::new("/srv/podcasts/media"))
        );
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.memory_limit_bytes(), 512 * 1024 * 1024);
        assert_eq!(config.http_timeout(), Duration::from_secs(20));
        assert_eq!(config.queue_secret().expose_secret(), "s3cret");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (dir, path) = write_config("invalid", "this is not [valid toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let (dir, path) = write_config("wrongtype", "worker_count = \"many\"\n");
        assert!(Config::load(&path).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let (dir, path) = write_config("unknown", "worker_count = 3\ntheme = \"dark\"\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.worker_count, 3);
        std::fs::remove_dir_all(&dir).ok();
    }

    // SEC-014: File size limit
    #[test]
    fn test_too_large_file_rejected() {
        let (dir, path) = write_config("too_large", &"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unlimited_memory() {
        let config = Config {
            memory_limit_mb: 0,
            ..Config::default()
        };
        assert_eq!(config.memory_limit_bytes(), 32_000 * 1024 * 1024);
    }

    #[test]
    fn test_random_secret_when_unset() {
        let config = Config::default();
        let a = config.queue_secret();
        assert_eq!(a.expose_secret().len(), 64);
    }

    // SEC-015: Debug output masks the queue secret
    #[test]
    fn test_debug_masks_secret() {
        let config = Config {
            queue_secret: Some("super-secret-nonce".to_string()),
            ..Config::default()
        };
        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("super-secret-nonce"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
