//! Configuration management for the bucket engine
//!
//! This module provides configuration file support with TOML format,
//! environment variable overrides, and sensible defaults, plus the
//! per-collection time-series options accepted at collection creation.

use crate::error::{ConfigurationError, Error, Result};
use crate::granularity::Granularity;
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Bucket catalog defaults
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Monitoring and observability
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Bucket catalog configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogConfig {
    /// Granularity for collections created without an explicit one
    #[serde(default)]
    pub default_granularity: Granularity,

    /// Rotate buckets after this many measurements (unset = unlimited)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_measurements_per_bucket: Option<u32>,

    /// Time field for collections created without an explicit one
    #[serde(default = "default_time_field")]
    pub default_time_field: String,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Enable Prometheus metrics output
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default value functions
fn default_time_field() -> String { "t".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            default_granularity: Granularity::default(),
            max_measurements_per_bucket: None,
            default_time_field: default_time_field(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            log_level: default_log_level(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Settings(format!("Failed to read config file {}: {}", path, e)))?;

        toml::from_str(&contents)
            .map_err(|e| Error::Settings(format!("Failed to parse config file {}: {}", path, e)))
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: &str) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        // Catalog
        if let Ok(granularity) = std::env::var("KUBA_BUCKETS_DEFAULT_GRANULARITY") {
            match granularity.parse() {
                Ok(g) => self.catalog.default_granularity = g,
                Err(e) => tracing::warn!(error = %e, "Ignoring KUBA_BUCKETS_DEFAULT_GRANULARITY"),
            }
        }
        if let Ok(max) = std::env::var("KUBA_BUCKETS_MAX_MEASUREMENTS") {
            if let Ok(n) = max.parse::<u32>() {
                self.catalog.max_measurements_per_bucket = (n > 0).then_some(n);
            }
        }

        // Monitoring
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.monitoring.log_level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.catalog.default_time_field.is_empty() {
            return Err(Error::Settings("Default time field cannot be empty".to_string()));
        }
        if self.catalog.max_measurements_per_bucket == Some(0) {
            return Err(Error::Settings(
                "Max measurements per bucket must be > 0 when set".to_string(),
            ));
        }
        if self.monitoring.log_level.is_empty() {
            return Err(Error::Settings("Log level cannot be empty".to_string()));
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Settings(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Time-series options built from the catalog defaults
    pub fn timeseries_options(&self, meta_field: Option<String>) -> TimeseriesOptions {
        TimeseriesOptions {
            time_field: self.catalog.default_time_field.clone(),
            meta_field,
            granularity: self.catalog.default_granularity,
        }
    }
}

/// Options a time-series collection is created with
///
/// ```
/// use kuba_buckets::config::TimeseriesOptions;
/// use kuba_buckets::granularity::Granularity;
///
/// let options: TimeseriesOptions =
///     serde_json::from_str(r#"{"time_field": "time", "meta_field": "sensor"}"#).unwrap();
/// assert_eq!(options.granularity, Granularity::Seconds);
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TimeseriesOptions {
    /// Field holding each measurement's timestamp
    pub time_field: String,

    /// Field whose value groups measurements into separate buckets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_field: Option<String>,

    /// Initial granularity
    #[serde(default)]
    pub granularity: Granularity,
}

impl TimeseriesOptions {
    /// Options with the given time field, no meta field, and seconds granularity
    pub fn new(time_field: impl Into<String>) -> Self {
        Self {
            time_field: time_field.into(),
            meta_field: None,
            granularity: Granularity::default(),
        }
    }

    /// Set the meta field
    pub fn with_meta_field(mut self, meta_field: impl Into<String>) -> Self {
        self.meta_field = Some(meta_field.into());
        self
    }

    /// Set the initial granularity
    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    /// Check field names
    pub fn validate(&self) -> std::result::Result<(), ConfigurationError> {
        if self.time_field.is_empty() {
            return Err(ConfigurationError::InvalidOptions(
                "timeField must be a non-empty string".to_string(),
            ));
        }
        if let Some(meta) = &self.meta_field {
            if meta.is_empty() {
                return Err(ConfigurationError::InvalidOptions(
                    "metaField must be a non-empty string".to_string(),
                ));
            }
            if *meta == self.time_field {
                return Err(ConfigurationError::InvalidOptions(format!(
                    "metaField '{}' cannot be the same as timeField",
                    meta
                )));
            }
        }
        Ok(())
    }
}
