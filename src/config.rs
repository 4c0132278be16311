//! Runtime configuration for scroll-virtualizer.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! The two user-facing knobs (enabled, buffer distance) live in [`EngineConfig`];
//! timer and protection tuning live alongside it in [`Settings`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config JSON in {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Command-line arguments for the simulation driver.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "scroll-virtualizer",
    about = "Simulate viewport-driven virtualization over a long document"
)]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "virtualizer.json")]
    pub config: PathBuf,

    /// Number of blocks in the simulated document.
    #[arg(long, default_value_t = 200)]
    pub blocks: usize,

    /// Override the buffer distance in pixels.
    #[arg(long)]
    pub buffer: Option<u32>,

    /// Viewport height in pixels.
    #[arg(long, default_value_t = 900.0)]
    pub viewport: f64,

    /// Laid-out height of each simulated block in pixels.
    #[arg(long, default_value_t = 400.0)]
    pub block_height: f64,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// User-facing engine switches.
    pub engine: EngineConfig,

    /// Timer tuning.
    pub timing: TimingConfig,

    /// Eviction protection policy.
    pub protection: ProtectionConfig,
}

/// The externally settable engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Whether virtualization runs at all.
    pub enabled: bool,

    /// Margin in pixels beyond the viewport within which blocks count as visible.
    pub buffer_distance: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            buffer_distance: 2000,
        }
    }
}

/// Debounce and retry intervals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Coalescing window for stats publication.
    pub stats_debounce_ms: u64,

    /// Coalescing window for navigation-triggered reinitialization.
    pub reinit_debounce_ms: u64,

    /// Delay between attempts to find the scroll root.
    pub init_retry_interval_ms: u64,

    /// Attempts before initialization gives up.
    pub max_init_retries: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            stats_debounce_ms: 500,
            reinit_debounce_ms: 300,
            init_retry_interval_ms: 500,
            max_init_retries: 15,
        }
    }
}

impl TimingConfig {
    pub fn stats_debounce(&self) -> Duration {
        Duration::from_millis(self.stats_debounce_ms)
    }

    pub fn reinit_debounce(&self) -> Duration {
        Duration::from_millis(self.reinit_debounce_ms)
    }

    pub fn init_retry_interval(&self) -> Duration {
        Duration::from_millis(self.init_retry_interval_ms)
    }
}

/// Which blocks are exempt from eviction in every batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectionConfig {
    /// Number of trailing blocks (in document order) that are never evicted.
    pub trailing_blocks: usize,

    /// Never evict a block whose content is still streaming in.
    pub protect_streaming: bool,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            trailing_blocks: 3,
            protect_streaming: true,
        }
    }
}

/// A storage-change notification. Only keys that changed are present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigChange {
    pub enabled: Option<bool>,
    pub buffer_distance: Option<u32>,
}

impl ConfigChange {
    /// Diff two configs into the notification a store would emit.
    pub fn between(old: &EngineConfig, new: &EngineConfig) -> Self {
        Self {
            enabled: (old.enabled != new.enabled).then_some(new.enabled),
            buffer_distance: (old.buffer_distance != new.buffer_distance)
                .then_some(new.buffer_distance),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.enabled.is_none() && self.buffer_distance.is_none()
    }

    /// Apply this change on top of `config`.
    pub fn apply_to(&self, config: &mut EngineConfig) {
        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }
        if let Some(buffer) = self.buffer_distance {
            config.buffer_distance = buffer;
        }
    }
}

impl Settings {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Settings::default());
        }
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Persistent home of the user-facing [`EngineConfig`].
pub trait ConfigStore {
    fn get(&self) -> EngineConfig;

    /// Store a new config, returning what changed.
    fn set(&mut self, config: EngineConfig) -> Result<ConfigChange, ConfigError>;
}

/// A [`ConfigStore`] backed by a JSON file.
#[derive(Debug)]
pub struct FileConfigStore {
    path: PathBuf,
    current: EngineConfig,
}

impl FileConfigStore {
    /// Open the store, reading the file if present.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let current = if path.exists() {
            let data = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str(&data).map_err(|source| ConfigError::Json {
                path: path.clone(),
                source,
            })?
        } else {
            EngineConfig::default()
        };
        Ok(Self { path, current })
    }
}

impl ConfigStore for FileConfigStore {
    fn get(&self) -> EngineConfig {
        self.current
    }

    fn set(&mut self, config: EngineConfig) -> Result<ConfigChange, ConfigError> {
        let change = ConfigChange::between(&self.current, &config);
        if change.is_empty() {
            return Ok(change);
        }
        let data = serde_json::to_string_pretty(&config).map_err(|source| ConfigError::Json {
            path: self.path.clone(),
            source,
        })?;
        std::fs::write(&self.path, data).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.current = config;
        Ok(change)
    }
}
