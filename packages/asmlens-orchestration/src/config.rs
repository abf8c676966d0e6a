//! Engine configuration (YAML v1)
//!
//! ```yaml
//! version: 1
//! storage_root: ./data/analyses
//! database_path: ./data/asmlens.db
//! workers: 4
//! step_timeout_secs: 300
//! max_steps_per_turn: 16
//! artifact_retry:
//!   attempts: 3
//!   backoff_ms: 200
//! decompiler_cache:
//!   ttl_secs: 1800
//!   max_entries: 1024
//!   module_budget_mb: 256
//!   module_idle_secs: 1800
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use asmlens_metadata::DecompilerCacheConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid range for field '{field}': {value} not in {min}..={max}")]
    Range {
        field: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("Unsupported configuration version {found}. Supported versions: 1")]
    UnsupportedVersion { found: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    pub attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_ms: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecompilerCacheSettings {
    pub ttl_secs: u64,
    pub max_entries: u64,
    /// Resident module images, in MiB
    #[serde(default = "default_module_budget_mb")]
    pub module_budget_mb: u64,
    #[serde(default = "default_module_idle_secs")]
    pub module_idle_secs: u64,
}

fn default_module_budget_mb() -> u64 {
    256
}

fn default_module_idle_secs() -> u64 {
    30 * 60
}

impl Default for DecompilerCacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 30 * 60,
            max_entries: 1024,
            module_budget_mb: default_module_budget_mb(),
            module_idle_secs: default_module_idle_secs(),
        }
    }
}

impl From<&DecompilerCacheSettings> for DecompilerCacheConfig {
    fn from(settings: &DecompilerCacheSettings) -> Self {
        DecompilerCacheConfig {
            ttl: Duration::from_secs(settings.ttl_secs),
            max_entries: settings.max_entries,
            module_budget_bytes: settings.module_budget_mb * 1024 * 1024,
            module_idle: Duration::from_secs(settings.module_idle_secs),
        }
    }
}

/// Engine configuration, schema v1
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Schema version (always 1 for v1)
    pub version: u32,

    /// Root under which one directory per analysis is created
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,

    /// Consecutive steps a worker runs for one analysis before requeueing it
    #[serde(default = "default_max_steps_per_turn")]
    pub max_steps_per_turn: usize,

    #[serde(default)]
    pub artifact_retry: RetryConfig,

    #[serde(default)]
    pub decompiler_cache: DecompilerCacheSettings,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data/analyses")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/asmlens.db")
}

fn default_workers() -> usize {
    (num_cpus::get() * 3 / 4).max(1) // 75% of cores
}

fn default_step_timeout_secs() -> u64 {
    300
}

fn default_max_steps_per_turn() -> usize {
    16
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            storage_root: default_storage_root(),
            database_path: default_database_path(),
            workers: default_workers(),
            step_timeout_secs: default_step_timeout_secs(),
            max_steps_per_turn: default_max_steps_per_turn(),
            artifact_retry: RetryConfig::default(),
            decompiler_cache: DecompilerCacheSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults rooted under one directory, used by the CLI and tests
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            storage_root: root.join("analyses"),
            database_path: root.join("asmlens.db"),
            ..Self::default()
        }
    }

    pub fn from_yaml(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let config: EngineConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion {
                found: self.version,
            });
        }
        check_range("workers", self.workers as u64, 1, 1024)?;
        check_range("step_timeout_secs", self.step_timeout_secs, 1, 24 * 60 * 60)?;
        check_range("max_steps_per_turn", self.max_steps_per_turn as u64, 1, 1024)?;
        check_range("artifact_retry.attempts", self.artifact_retry.attempts as u64, 1, 20)?;
        check_range("artifact_retry.backoff_ms", self.artifact_retry.backoff_ms, 0, 60_000)?;
        check_range("decompiler_cache.ttl_secs", self.decompiler_cache.ttl_secs, 1, 7 * 24 * 60 * 60)?;
        check_range("decompiler_cache.max_entries", self.decompiler_cache.max_entries, 1, 1 << 20)?;
        check_range("decompiler_cache.module_budget_mb", self.decompiler_cache.module_budget_mb, 1, 64 * 1024)?;
        check_range("decompiler_cache.module_idle_secs", self.decompiler_cache.module_idle_secs, 1, 7 * 24 * 60 * 60)?;
        Ok(())
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}

fn check_range(field: &'static str, value: u64, min: u64, max: u64) -> ConfigResult<()> {
    if value < min || value > max {
        return Err(ConfigError::Range {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}
