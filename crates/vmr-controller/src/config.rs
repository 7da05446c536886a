//! Configuration management for vmr-controller
//!
//! Configuration is stored in TOML format.
//!
//! # Configuration File Locations
//!
//! - Unix: `~/.config/vmr/controller.toml`
//! - Windows: `%APPDATA%\vmr\controller.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse config file
    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Controller configuration
///
/// # Example TOML
///
/// ```toml
/// [relays]
/// urls = ["wss://relay.damus.io", "wss://nos.lol"]
/// publish_timeout_seconds = 5
///
/// [credentials]
/// path = ""  # Empty = default location
///
/// [output]
/// format = "table"  # "table" | "json" | "quiet"
/// verbose = false
///
/// [logging]
/// level = "warn"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub relays: RelaysConfig,

    #[serde(default)]
    pub credentials: CredentialsConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Relay network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaysConfig {
    /// Relay WebSocket URLs (ws:// or wss://)
    #[serde(default = "default_relay_urls")]
    pub urls: Vec<String>,

    /// How long to wait for the first relay acknowledgement
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_seconds: u64,
}

fn default_relay_urls() -> Vec<String> {
    vec!["ws://localhost:7777".to_string()]
}

fn default_publish_timeout() -> u64 {
    5
}

impl Default for RelaysConfig {
    fn default() -> Self {
        Self {
            urls: default_relay_urls(),
            publish_timeout_seconds: default_publish_timeout(),
        }
    }
}

impl RelaysConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_seconds)
    }
}

/// Credential file configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Path to the credentials file (empty = default location)
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl CredentialsConfig {
    /// Configured path, or the platform default when unset or empty.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path
            .clone()
            .filter(|path| !path.as_os_str().is_empty())
            .or_else(|| Config::data_dir().map(|dir| dir.join("credentials.json")))
    }
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output format: "table", "json", "quiet"
    #[serde(default = "default_format")]
    pub format: String,

    /// Verbose output
    #[serde(default)]
    pub verbose: bool,
}

fn default_format() -> String {
    "table".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            verbose: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default location
    pub fn load_default() -> Result<Self, ConfigError> {
        if let Some(path) = Self::default_path() {
            if path.exists() {
                return Self::load(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from custom path or default
    pub fn load_from(custom_path: Option<&Path>) -> Result<Self, ConfigError> {
        match custom_path {
            Some(path) => Self::load(path),
            None => Self::load_default(),
        }
    }

    /// Configuration for a CLI run.
    ///
    /// An explicit path must load. A broken file at the default location
    /// only warns and falls back to defaults.
    pub fn load_for_run(custom_path: Option<&Path>) -> Result<Self, ConfigError> {
        match custom_path {
            Some(path) => Self::load(path),
            None => Ok(Self::load_default().unwrap_or_else(|e| {
                eprintln!("Warning: Config error: {e}");
                eprintln!("Using default configuration.");
                Self::default()
            })),
        }
    }

    /// Get default configuration file path
    pub fn default_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("controller.toml"))
    }

    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("io", "vmr", "vmr")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the data directory path (for credentials)
    pub fn data_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("io", "vmr", "vmr")
            .map(|dirs| dirs.data_dir().to_path_buf())
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Create default configuration file if it doesn't exist
    pub fn create_default_if_missing() -> Result<bool, ConfigError> {
        if let Some(path) = Self::default_path() {
            if !path.exists() {
                Self::default().save(&path)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_formats = ["table", "json", "quiet"];
        if !valid_formats.contains(&self.output.format.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid output format '{}'. Valid values: {:?}",
                self.output.format, valid_formats
            )));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}'. Valid values: {:?}",
                self.logging.level, valid_levels
            )));
        }

        if self.relays.publish_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "publish_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.relays.urls.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one relay URL is required".to_string(),
            ));
        }

        for raw in &self.relays.urls {
            let parsed = url::Url::parse(raw).map_err(|e| {
                ConfigError::ValidationError(format!("Invalid relay URL '{raw}': {e}"))
            })?;
            if !matches!(parsed.scheme(), "ws" | "wss") {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid relay URL '{raw}': must start with ws:// or wss://"
                )));
            }
        }

        Ok(())
    }

    /// Generate a sample configuration file content
    pub fn sample_toml() -> &'static str {
        r#"# VMR Controller Configuration

[relays]
# Relay WebSocket URLs
urls = ["ws://localhost:7777"]
# Seconds to wait for the first relay acknowledgement
publish_timeout_seconds = 5

[credentials]
# Path to the credentials file (empty = default location)
# path = ""

[output]
# Output format: "table", "json", "quiet"
format = "table"
verbose = false

[logging]
# Log level: "error", "warn", "info", "debug", "trace"
level = "warn"
"#
    }
}

/// CLI configuration overrides
///
/// Command-line arguments take precedence over config file values.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub output_format: Option<String>,
    pub verbose: Option<bool>,
    pub debug: Option<bool>,
    pub relay_urls: Option<Vec<String>>,
}

impl Config {
    /// Apply CLI overrides to configuration
    pub fn with_overrides(mut self, overrides: &CliOverrides) -> Self {
        if let Some(ref format) = overrides.output_format {
            self.output.format = format.clone();
        }
        if let Some(verbose) = overrides.verbose {
            self.output.verbose = verbose;
        }
        if overrides.debug == Some(true) {
            self.logging.level = "debug".to_string();
        }
        if let Some(ref urls) = overrides.relay_urls {
            if !urls.is_empty() {
                self.relays.urls = urls.clone();
            }
        }
        self
    }
}
