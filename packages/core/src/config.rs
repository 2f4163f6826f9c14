//! Engine configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Largest accepted lock deadline (10 minutes)
const MAX_LOCK_TIMEOUT_MS: u64 = 600_000;

/// Runtime settings for `TreeService` and `StructuralOperationQueue`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// How long a structural operation waits for its partition lock
    pub lock_timeout_ms: u64,

    /// Retries after the first attempt when a partition lock times out
    pub max_retries: u32,

    /// Backoff base; attempt `n` sleeps `retry_base_delay_ms * 2^n`
    pub retry_base_delay_ms: u64,

    /// Broadcast channel capacity for domain events
    pub event_capacity: usize,

    /// libsql database file; `None` selects the in-memory store
    pub db_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5_000,
            max_retries: 3,
            retry_base_delay_ms: 10,
            event_capacity: 128,
            db_path: None,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `MENUTREE_*` environment variables
    ///
    /// Recognized: `MENUTREE_LOCK_TIMEOUT_MS`, `MENUTREE_MAX_RETRIES`,
    /// `MENUTREE_RETRY_BASE_DELAY_MS`, `MENUTREE_EVENT_CAPACITY`, `MENUTREE_DB_PATH`.
    ///
    /// # Errors
    ///
    /// Returns a message naming the variable when a value does not parse or the
    /// resulting configuration fails [`EngineConfig::validate`].
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] with an injectable variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        fn parse<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Result<Option<T>, String>
        where
            T::Err: std::fmt::Display,
        {
            raw.map(|value| {
                value
                    .trim()
                    .parse::<T>()
                    .map_err(|e| format!("{}: invalid value '{}': {}", key, value, e))
            })
            .transpose()
        }

        let mut config = Self::default();

        if let Some(v) = parse("MENUTREE_LOCK_TIMEOUT_MS", lookup("MENUTREE_LOCK_TIMEOUT_MS"))? {
            config.lock_timeout_ms = v;
        }
        if let Some(v) = parse("MENUTREE_MAX_RETRIES", lookup("MENUTREE_MAX_RETRIES"))? {
            config.max_retries = v;
        }
        if let Some(v) = parse(
            "MENUTREE_RETRY_BASE_DELAY_MS",
            lookup("MENUTREE_RETRY_BASE_DELAY_MS"),
        )? {
            config.retry_base_delay_ms = v;
        }
        if let Some(v) = parse("MENUTREE_EVENT_CAPACITY", lookup("MENUTREE_EVENT_CAPACITY"))? {
            config.event_capacity = v;
        }
        if let Some(path) = lookup("MENUTREE_DB_PATH").filter(|p| !p.trim().is_empty()) {
            config.db_path = Some(PathBuf::from(path));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.lock_timeout_ms == 0 {
            return Err("lock_timeout_ms must be greater than 0".to_string());
        }

        if self.lock_timeout_ms > MAX_LOCK_TIMEOUT_MS {
            return Err(format!(
                "lock_timeout_ms {} exceeds maximum of {}",
                self.lock_timeout_ms, MAX_LOCK_TIMEOUT_MS
            ));
        }

        // 2^max_retries must not overflow the backoff multiplier
        if self.max_retries > 16 {
            return Err(format!(
                "max_retries {} exceeds maximum of 16",
                self.max_retries
            ));
        }

        if self.event_capacity == 0 {
            return Err("event_capacity must be greater than 0".to_string());
        }

        Ok(())
    }
}
