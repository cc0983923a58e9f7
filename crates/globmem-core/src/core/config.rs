//! Configuration for globmem
//!
//! Settings for the memory space, the in-process team transport, logging and
//! metrics. Values come from a TOML file, then `GLOBMEM_*` environment
//! variables, then command line overrides applied by the binary.

use std::fmt;
use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use serde::de::{self, Deserializer, Visitor};
use serde::Serializer;
use crate::constants::{
    CONFIG_FILE_NAME, DEFAULT_COLLECTIVE_TIMEOUT_MS, DEFAULT_INITIAL_LOCAL_CAPACITY,
    DEFAULT_TEAM_UNITS, ENV_PREFIX, MAX_UNITS,
};
use crate::types::{Error, Result};
use crate::{log_info, log_warn};

/// How a shrink that ends inside a committed bucket is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShrinkPolicy {
    /// Reject with a size mismatch error
    #[default]
    Strict,
    /// Detach the bucket and re-allocate the retained prefix as a new pending bucket
    Relocate,
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Memory space configuration
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Team transport configuration
    #[serde(default)]
    pub team: TeamConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Memory space configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Elements allocated by every unit at construction
    #[serde(default = "default_initial_local_capacity")]
    pub initial_local_capacity: usize,

    /// Partial shrink handling
    #[serde(default)]
    pub shrink_policy: ShrinkPolicy,

    /// Upper bound on a unit's local size (None = bounded only by byte extent)
    #[serde(default)]
    pub max_local_capacity: Option<usize>,
}

/// Team transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamConfig {
    /// Number of units in the in-process team
    #[serde(default = "default_units")]
    pub units: usize,

    /// Timeout for a single barrier or exchange
    #[serde(
        default = "default_collective_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub collective_timeout: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Metrics configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Render Prometheus metrics after a run
    #[serde(default)]
    pub enabled: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            initial_local_capacity: default_initial_local_capacity(),
            shrink_policy: ShrinkPolicy::default(),
            max_local_capacity: None,
        }
    }
}

impl Default for TeamConfig {
    fn default() -> Self {
        Self {
            units: default_units(),
            collective_timeout: default_collective_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions for serde
fn default_initial_local_capacity() -> usize { DEFAULT_INITIAL_LOCAL_CAPACITY }
fn default_units() -> usize { DEFAULT_TEAM_UNITS }
fn default_collective_timeout() -> Duration { Duration::from_millis(DEFAULT_COLLECTIVE_TIMEOUT_MS) }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "pretty".to_string() }

impl Config {
    /// Load configuration from `globmem.toml` if present, then apply
    /// environment overrides and validate
    pub fn load() -> Result<Self> {
        let mut config = if Path::new(CONFIG_FILE_NAME).exists() {
            Self::from_file(CONFIG_FILE_NAME)?
        } else {
            Config::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read config file: {}", e)))?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| Error::config(format!("Failed to parse config file: {}", e)))
    }

    /// Apply `GLOBMEM_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(format!("{}{}", ENV_PREFIX, key)).ok())
    }

    /// Apply overrides from an arbitrary key lookup (keys without prefix)
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(units) = lookup("UNITS") {
            self.team.units = units.parse()
                .map_err(|e| Error::config(format!("Invalid unit count: {}", e)))?;
        }

        if let Some(capacity) = lookup("INITIAL_CAPACITY") {
            self.memory.initial_local_capacity = capacity.parse()
                .map_err(|e| Error::config(format!("Invalid initial capacity: {}", e)))?;
        }

        if let Some(policy) = lookup("SHRINK_POLICY") {
            self.memory.shrink_policy = parse_shrink_policy(&policy)?;
        }

        if let Some(timeout) = lookup("COLLECTIVE_TIMEOUT") {
            self.team.collective_timeout = parse_duration(&timeout)
                .map_err(|e| Error::config(format!("Invalid collective timeout: {}", e)))?;
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.team.units == 0 {
            return Err(Error::config("A team needs at least one unit"));
        }

        if self.team.units > MAX_UNITS {
            return Err(Error::config(format!("Too many units (maximum {})", MAX_UNITS)));
        }

        if self.team.collective_timeout.is_zero() {
            return Err(Error::config("Collective timeout must be non-zero"));
        }

        if let Some(max) = self.memory.max_local_capacity {
            if self.memory.initial_local_capacity > max {
                return Err(Error::config(format!(
                    "Initial local capacity {} exceeds max local capacity {}",
                    self.memory.initial_local_capacity, max
                )));
            }
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {},
            other => return Err(Error::config(format!("Invalid log level: {}", other))),
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => {},
            other => return Err(Error::config(format!("Invalid log format: {}", other))),
        }

        Ok(())
    }
}

/// Parse a shrink policy name
pub fn parse_shrink_policy(s: &str) -> Result<ShrinkPolicy> {
    match s.to_ascii_lowercase().as_str() {
        "strict" => Ok(ShrinkPolicy::Strict),
        "relocate" => Ok(ShrinkPolicy::Relocate),
        other => Err(Error::config(format!("Unknown shrink policy: {}", other))),
    }
}

/// Load configuration from file
pub fn load_config(path: &str) -> Result<Config> {
    let config = Config::from_file(path)?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from file or use defaults
pub fn load_config_or_default(path: Option<&str>) -> Config {
    match path {
        Some(path) => {
            match load_config(path) {
                Ok(config) => {
                    log_info!("Loaded configuration from: {}", path);
                    config
                }
                Err(e) => {
                    log_warn!("Failed to load config from {}: {}. Using defaults.", path, e);
                    Config::default()
                }
            }
        }
        None => {
            log_info!("No config file specified, using defaults");
            Config::default()
        }
    }
}

// Custom deserializer for Duration from string
fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a duration string like '30s' or '500ms'")
        }

        fn visit_str<E>(self, value: &str) -> std::result::Result<Duration, E>
        where
            E: de::Error,
        {
            parse_duration(value).map_err(E::custom)
        }

        fn visit_u64<E>(self, value: u64) -> std::result::Result<Duration, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_secs(value))
        }

        fn visit_i64<E>(self, value: i64) -> std::result::Result<Duration, E>
        where
            E: de::Error,
        {
            u64::try_from(value)
                .map(Duration::from_secs)
                .map_err(|_| E::custom("negative duration"))
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format!("{}ms", duration.as_millis()))
}

/// Parse durations of the form `500ms`, `30s`, `5m`, `1h` or raw seconds
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        let ms: u64 = ms.parse().map_err(|_| "Invalid milliseconds")?;
        Ok(Duration::from_millis(ms))
    } else if let Some(secs) = s.strip_suffix('s') {
        let secs: u64 = secs.parse().map_err(|_| "Invalid seconds")?;
        Ok(Duration::from_secs(secs))
    } else if let Some(mins) = s.strip_suffix('m') {
        let mins: u64 = mins.parse().map_err(|_| "Invalid minutes")?;
        Ok(Duration::from_secs(mins * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        let hours: u64 = hours.parse().map_err(|_| "Invalid hours")?;
        Ok(Duration::from_secs(hours * 3600))
    } else {
        let secs: u64 = s.parse().map_err(|_| "Invalid duration format")?;
        Ok(Duration::from_secs(secs))
    }
}
