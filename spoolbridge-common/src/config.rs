//! Configuration loading and data folder resolution
//!
//! Bootstrap configuration lives in a small TOML file. Every field has a
//! built-in default, so a missing file is not a startup failure.
//!
//! # Data folder priority
//!
//! 1. Command-line argument (`--data-dir`)
//! 2. Environment variable (`SPOOLBRIDGE_DATA_DIR`)
//! 3. TOML config file (`data_dir`)
//! 4. OS-dependent compiled default

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable overriding the data folder
pub const DATA_DIR_ENV: &str = "SPOOLBRIDGE_DATA_DIR";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Folder holding the mapping file, catalog snapshots and job history
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub matching: MatchingConfig,

    #[serde(default)]
    pub spoolman: SpoolmanConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Name similarity algorithm used by the matcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityAlgorithm {
    /// Sørensen–Dice coefficient over character bigrams
    #[default]
    Dice,
    /// Jaro-Winkler distance
    JaroWinkler,
}

/// Matcher tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Minimum name similarity (0.0-1.0) for tier 1 and tier 2 proposals
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    #[serde(default)]
    pub algorithm: SimilarityAlgorithm,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            algorithm: SimilarityAlgorithm::default(),
        }
    }
}

/// Spool tracker connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpoolmanConfig {
    /// Base URL, e.g. `http://192.168.1.20:7912`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SpoolmanConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// HTTP surface configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_threshold() -> f64 {
    0.4
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_bind() -> String {
    "127.0.0.1:12346".to_string()
}

/// Where a loaded configuration came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    File,
    /// No config file existed; built-in defaults are in effect
    Defaults,
}

impl TomlConfig {
    /// Load configuration from `path`
    ///
    /// A missing file yields defaults. A file that exists but cannot be read
    /// or parsed is a configuration error.
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_source(path).map(|(config, _)| config)
    }

    /// Load configuration and report whether the file existed
    ///
    /// Logs nothing. Runs before tracing is initialized; the caller reports
    /// the outcome afterwards.
    pub fn load_with_source(path: &Path) -> Result<(Self, ConfigSource)> {
        if !path.exists() {
            return Ok((Self::default(), ConfigSource::Defaults));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        let config: TomlConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

        config.validate()?;
        Ok((config, ConfigSource::File))
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.matching.threshold) {
            return Err(Error::Config(format!(
                "matching.threshold must be within 0.0-1.0, got {}",
                self.matching.threshold
            )));
        }
        Ok(())
    }
}

/// Default configuration file path for the platform
///
/// `<config_dir>/spoolbridge/config.toml`, falling back to `./spoolbridge.toml`
/// when the platform has no config directory.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("spoolbridge").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("spoolbridge.toml"))
}

/// OS-dependent default data folder
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("spoolbridge"))
        .unwrap_or_else(|| PathBuf::from("./spoolbridge_data"))
}

/// Resolve the data folder following the documented priority order
pub fn resolve_data_dir(cli_arg: Option<&Path>, toml_config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(DATA_DIR_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml_config.data_dir {
        return path.clone();
    }

    default_data_dir()
}

/// Well-known file locations inside the data folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub root: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the data folder if missing
    pub fn ensure_exists(&self) -> Result<()> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root)?;
            info!("Created data folder {}", self.root.display());
        }
        Ok(())
    }

    pub fn mapping_file(&self) -> PathBuf {
        self.root.join("filament_mapping.json")
    }

    pub fn slicer_catalog_file(&self) -> PathBuf {
        self.root.join("slicer_filaments.json")
    }

    pub fn spoolman_catalog_file(&self) -> PathBuf {
        self.root.join("spoolman_filaments.json")
    }

    pub fn job_history_file(&self) -> PathBuf {
        self.root.join("tasks.json")
    }
}

/// Write a TOML config atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, target: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
    crate::fs::write_atomic(target, content.as_bytes())
}
