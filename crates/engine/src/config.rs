use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub database: DatabaseConfig,
    pub remote: RemoteConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Every sync fetches the whole remote snapshot and replaces the base table.
    #[default]
    Full,
    /// After the first sync, fetch only orders updated since the last one and merge them.
    Incremental,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    #[serde(default)]
    pub mode: SyncMode,
    pub sync_on_start: bool,
    pub refresh_after_flush: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                path: "orders_local_1.db".to_string(),
            },
            remote: RemoteConfig {
                base_url: "http://localhost:3000".to_string(),
                timeout_ms: 30_000,
            },
            sync: SyncConfig::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10_000,
            batch_size: 100,
            mode: SyncMode::Full,
            sync_on_start: true,
            refresh_after_flush: true,
        }
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the `ORDERSYNC_*` keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(v) = lookup("ORDERSYNC_DB_PATH") {
            cfg.database.path = v;
        }
        if let Some(v) = lookup("ORDERSYNC_API_URL") {
            cfg.remote.base_url = v.trim().to_string();
        }
        if let Some(value) = lookup("ORDERSYNC_HTTP_TIMEOUT_MS").and_then(|v| parse_u64(&v)) {
            cfg.remote.timeout_ms = value.max(1);
        }
        if let Some(value) = lookup("ORDERSYNC_POLL_INTERVAL_MS").and_then(|v| parse_u64(&v)) {
            cfg.sync.poll_interval_ms = value.max(1);
        }
        if let Some(value) = lookup("ORDERSYNC_BATCH_SIZE").and_then(|v| parse_u64(&v)) {
            cfg.sync.batch_size = value.max(1) as usize;
        }
        if let Some(v) = lookup("ORDERSYNC_SYNC_MODE") {
            match v.trim().to_ascii_lowercase().as_str() {
                "full" => cfg.sync.mode = SyncMode::Full,
                "incremental" => cfg.sync.mode = SyncMode::Incremental,
                other => tracing::warn!(value = other, "ignoring unknown ORDERSYNC_SYNC_MODE"),
            }
        }
        if let Some(v) = lookup("ORDERSYNC_SYNC_ON_START") {
            cfg.sync.sync_on_start = parse_bool(&v, cfg.sync.sync_on_start);
        }
        if let Some(v) = lookup("ORDERSYNC_REFRESH_AFTER_FLUSH") {
            cfg.sync.refresh_after_flush = parse_bool(&v, cfg.sync.refresh_after_flush);
        }

        cfg
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.remote.base_url.trim().is_empty() {
            return Err(EngineError::Config("remote base_url is empty".into()));
        }
        if self.sync.batch_size == 0 {
            return Err(EngineError::Config("sync batch_size must be positive".into()));
        }
        if self.sync.poll_interval_ms == 0 {
            return Err(EngineError::Config("sync poll_interval_ms must be positive".into()));
        }
        Ok(())
    }
}

fn parse_bool(value: &str, default: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

fn parse_u64(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}
