//! TOML configuration for the index and the external adaptor.
//!
//! ```toml
//! [index]
//! cache_enabled = true
//! sync_interval_secs = 60
//! resync_page_size = 1000
//! max_entries = 10000
//! store_timeout_secs = 10
//!
//! [adaptor]
//! connect_timeout_secs = 10
//! read_timeout_secs = 20
//! fetch_all_page_size = 30
//! max_pages = 200
//! ```
//!
//! Every key is optional; missing keys fall back to the defaults above.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub adaptor: AdaptorConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_cache_enabled")]
    pub cache_enabled: bool,
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_resync_page_size")]
    pub resync_page_size: usize,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Upper bound on any single backing store call.
    #[serde(default = "default_store_timeout_secs")]
    pub store_timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            cache_enabled: default_cache_enabled(),
            sync_interval_secs: default_sync_interval_secs(),
            resync_page_size: default_resync_page_size(),
            max_entries: default_max_entries(),
            store_timeout_secs: default_store_timeout_secs(),
        }
    }
}

impl IndexConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}

fn default_cache_enabled() -> bool {
    true
}
fn default_sync_interval_secs() -> u64 {
    60
}
fn default_resync_page_size() -> usize {
    1000
}
fn default_max_entries() -> usize {
    10_000
}
fn default_store_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct AdaptorConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_fetch_all_page_size")]
    pub fetch_all_page_size: usize,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

impl Default for AdaptorConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            fetch_all_page_size: default_fetch_all_page_size(),
            max_pages: default_max_pages(),
        }
    }
}

impl AdaptorConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_read_timeout_secs() -> u64 {
    20
}
fn default_fetch_all_page_size() -> usize {
    30
}
fn default_max_pages() -> usize {
    200
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate index
    if config.index.cache_enabled && config.index.sync_interval_secs == 0 {
        anyhow::bail!("index.sync_interval_secs must be > 0 when the cache is enabled");
    }
    if config.index.resync_page_size == 0 {
        anyhow::bail!("index.resync_page_size must be > 0");
    }
    if config.index.max_entries == 0 {
        anyhow::bail!("index.max_entries must be > 0");
    }
    if config.index.store_timeout_secs == 0 {
        anyhow::bail!("index.store_timeout_secs must be > 0");
    }

    // Validate adaptor
    if config.adaptor.connect_timeout_secs == 0 || config.adaptor.read_timeout_secs == 0 {
        anyhow::bail!("adaptor timeouts must be > 0");
    }
    if config.adaptor.fetch_all_page_size == 0 {
        anyhow::bail!("adaptor.fetch_all_page_size must be > 0");
    }
    if config.adaptor.max_pages == 0 {
        anyhow::bail!("adaptor.max_pages must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(validate(&config).is_ok());
        assert_eq!(config.adaptor.max_pages, 200);
        assert_eq!(config.adaptor.fetch_all_page_size, 30);
        assert_eq!(config.index.resync_page_size, 1000);
        assert_eq!(config.index.store_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let file = write_config("[index]\ncache_enabled = false\n");
        let config = load_config(file.path()).unwrap();
        assert!(!config.index.cache_enabled);
        assert_eq!(config.index.sync_interval_secs, 60);
        assert_eq!(config.adaptor.read_timeout(), Duration::from_secs(20));
    }

    #[test]
    fn test_zero_interval_rejected_when_enabled() {
        let file = write_config("[index]\nsync_interval_secs = 0\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("sync_interval_secs"));
    }

    #[test]
    fn test_zero_interval_allowed_when_disabled() {
        let file = write_config("[index]\ncache_enabled = false\nsync_interval_secs = 0\n");
        assert!(load_config(file.path()).is_ok());
    }

    #[test]
    fn test_zero_guard_rejected() {
        let file = write_config("[adaptor]\nmax_pages = 0\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_zero_store_timeout_rejected() {
        let file = write_config("[index]\nstore_timeout_secs = 0\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("store_timeout_secs"));
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = load_config(Path::new("/nonexistent/regidx.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
