//! Configuration loading and management

use anyhow::{Context, Result};
use resultcache_core::{CacheConfig, DEFAULT_GC_INTERVAL};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Shortest accepted sweep interval; anything below is clamped up
const MIN_GC_INTERVAL_MS: u64 = 100;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_directory")]
    pub directory: String,
    /// Maximum number of entries; unbounded when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_entries: Option<usize>,
    /// Maximum entry age in seconds; entries never expire when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_secs: Option<u64>,
    #[serde(default = "default_gc_interval_ms")]
    pub gc_interval_ms: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            max_entries: None,
            max_age_secs: None,
            gc_interval_ms: default_gc_interval_ms(),
        }
    }
}

impl CacheSection {
    /// Sweep interval, clamped to the minimum and logging a warning if adjusted
    pub fn validated_gc_interval(&self) -> Duration {
        if self.gc_interval_ms < MIN_GC_INTERVAL_MS {
            warn!(
                "gc_interval_ms {} is below minimum {}, using minimum",
                self.gc_interval_ms, MIN_GC_INTERVAL_MS
            );
            Duration::from_millis(MIN_GC_INTERVAL_MS)
        } else {
            Duration::from_millis(self.gc_interval_ms)
        }
    }

    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_entries: self.max_entries,
            max_age: self.max_age_secs.map(Duration::from_secs),
            gc_interval: self.validated_gc_interval(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Metrics exporter configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Address for the Prometheus scrape endpoint; disabled when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen: Option<SocketAddr>,
}

/// Where the loaded configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(String),
    /// The file was missing
    Defaults(String),
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "Loaded configuration from {}", path),
            ConfigSource::Defaults(path) => {
                write!(f, "Config file not found at {}, using defaults", path)
            }
        }
    }
}

// Default value functions
fn default_directory() -> String {
    "./data/resultcache".to_string()
}

fn default_gc_interval_ms() -> u64 {
    DEFAULT_GC_INTERVAL.as_millis() as u64
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Load configuration from a file, falling back to defaults if it is
    /// missing.
    ///
    /// Nothing is logged here since logging is configured from the result.
    pub fn load(path: &str) -> Result<(Self, ConfigSource)> {
        let config_path = Path::new(path);

        // Check if config file exists
        if !config_path.exists() {
            return Ok((Self::default(), ConfigSource::Defaults(path.to_string())));
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        Ok((config, ConfigSource::File(path.to_string())))
    }

    /// Save configuration to a file atomically
    ///
    /// This uses a write-to-temp-then-rename strategy so a crash mid-write
    /// leaves the original file intact.
    pub fn save(&self, path: &str) -> Result<()> {
        let content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize configuration")?;

        let path_obj = Path::new(path);
        let parent = match path_obj.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;

        let temp_file = tempfile::NamedTempFile::new_in(parent)
            .with_context(|| format!("Failed to create temp file in {:?}", parent))?;

        {
            let mut file = temp_file.as_file();
            file.write_all(content.as_bytes())
                .with_context(|| "Failed to write to temp file")?;
            file.sync_all()
                .with_context(|| "Failed to sync temp file")?;
        }

        temp_file
            .persist(path)
            .with_context(|| format!("Failed to persist config file: {}", path))?;

        info!("Saved configuration to {}", path);
        Ok(())
    }
}
