//! Configuration for store sizing and logging

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Sizing knobs shared by every store of a component map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Span of the first sparse window. The window is aligned to its span and
    /// contains the first inserted id.
    #[serde(default = "default_initial_window")]
    pub initial_window: u64,
    /// Dense capacity a new store starts with.
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,
    /// Largest sparse window a store may grow to. Ids that would need a
    /// wider window are kept in the overflow store.
    #[serde(default = "default_max_window_span")]
    pub max_window_span: u64,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_initial_window() -> u64 {
    64
}

fn default_initial_capacity() -> usize {
    64
}

fn default_max_window_span() -> u64 {
    1 << 24
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            initial_window: default_initial_window(),
            initial_capacity: default_initial_capacity(),
            max_window_span: default_max_window_span(),
            logging: LoggingConfig::default(),
        }
    }
}

impl StorageConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: StorageConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config.normalized())
    }

    /// Save configuration to a YAML file
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    /// Rounds every size up to a power of two and keeps the window limits
    /// consistent with each other.
    pub fn normalized(mut self) -> Self {
        self.initial_window = self.initial_window.max(1).next_power_of_two();
        self.initial_capacity = self.initial_capacity.max(1).next_power_of_two();
        self.max_window_span = self
            .max_window_span
            .max(self.initial_window)
            .checked_next_power_of_two()
            .unwrap_or(1 << 63);
        self
    }
}
