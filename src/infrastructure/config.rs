//! Application configuration
//!
//! Settings are layered: built-in defaults, then an optional configuration
//! file, then `CATALOG_ENRICHER__*` environment variables (`__` separates
//! nested keys, e.g. `CATALOG_ENRICHER__PIPELINE__PARSERS=4`). Command-line
//! flags are applied last by the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::{ChannelCapacities, ItemLimit, PipelineSettings};

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "CATALOG_ENRICHER";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },

    #[error("Failed to read proxy list {path}: {source}")]
    ProxyList {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
    pub fetch: FetchConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

/// HTTP front end
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address, `host:port`
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost:8001".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of pipeline instances, i.e. concurrently processed jobs
    pub parsers: usize,
    /// Enrichment workers per instance
    pub scrappers: usize,
    /// Maximum items decoded per job; negative means unlimited
    pub url_limit: i64,
    pub channels: ChannelCapacities,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parsers: 1,
            scrappers: 100,
            url_limit: -1,
            channels: ChannelCapacities::default(),
        }
    }
}

/// Product page fetching
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub proxy_file: PathBuf,
    /// Per-fetch timeout; unset means no timeout
    pub timeout_secs: Option<u64>,
    /// Global fetch rate limit shared by every worker; unset means unlimited
    pub requests_per_second: Option<u32>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            proxy_file: PathBuf::from("proxy.txt"),
            timeout_secs: None,
            requests_per_second: None,
        }
    }
}

/// Where finished documents go
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Write documents to `dir` instead of posting them to the job callback
    pub to_file: bool,
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            to_file: false,
            dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted logs in the log file
    pub json_format: bool,

    /// Enable console output
    pub console_output: bool,

    /// Enable file output
    pub file_output: bool,

    pub log_dir: PathBuf,

    pub file_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            console_output: true,
            file_output: false,
            log_dir: PathBuf::from("logs"),
            file_name: "catalog-enricher.log".to_string(),
        }
    }
}

impl AppConfig {
    /// Loads defaults, the optional file and environment overrides, then
    /// validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.parsers == 0 {
            return Err(ConfigError::Validation {
                message: "parsers must be greater than 0".to_string(),
            });
        }
        if self.pipeline.scrappers == 0 {
            return Err(ConfigError::Validation {
                message: "scrappers must be greater than 0".to_string(),
            });
        }
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "host must not be empty".to_string(),
            });
        }
        if self.fetch.requests_per_second == Some(0) {
            return Err(ConfigError::Validation {
                message: "requests_per_second must be greater than 0 when set".to_string(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            workers: self.pipeline.scrappers,
            limit: ItemLimit::from_flag(self.pipeline.url_limit),
            capacities: self.pipeline.channels,
        }
    }

    #[must_use]
    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch.timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_command_line_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "localhost:8001");
        assert_eq!(config.fetch.proxy_file, PathBuf::from("proxy.txt"));
        assert_eq!((config.pipeline.parsers, config.pipeline.scrappers), (1, 100));
        assert_eq!(config.pipeline_settings().limit, ItemLimit::UNLIMITED);
        assert_eq!(config.fetch_timeout(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn loads_partial_file_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[pipeline]\nparsers = 3\nurl_limit = 10\n\n[pipeline.channels]\nstructure = 4\n\n[fetch]\ntimeout_secs = 15"
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.pipeline.parsers, 3);
        assert_eq!(config.pipeline.scrappers, 100);
        assert_eq!(config.pipeline.channels.structure, 4);
        assert_eq!(config.pipeline.channels.records, 100);
        assert_eq!(config.pipeline_settings().limit, ItemLimit::at_most(10));
        assert_eq!(config.fetch_timeout(), Some(Duration::from_secs(15)));
    }

    #[test]
    fn rejects_zero_workers() {
        let mut config = AppConfig::default();
        config.pipeline.scrappers = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation { .. })));

        let mut config = AppConfig::default();
        config.pipeline.parsers = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn missing_config_file_is_a_load_error() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/catalog-enricher.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }
}
