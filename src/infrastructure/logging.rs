//! Logging system initialization
//!
//! - `RUST_LOG` wins when set; otherwise the configured level applies to this
//!   crate and chatty dependencies are kept at `info`/`warn` unless the level
//!   is `trace`
//! - console output and an optional non-blocking log file, plain or JSON

use std::sync::Mutex;

use anyhow::{Result, anyhow};
use once_cell::sync::Lazy;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

pub use crate::infrastructure::config::LoggingConfig;

// Keeps the file writer alive for the lifetime of the process
static LOG_GUARDS: Lazy<Mutex<Vec<WorkerGuard>>> = Lazy::new(|| Mutex::new(Vec::new()));

type BoxedLayer = Box<dyn Layer<Layered<EnvFilter, Registry>> + Send + Sync>;

/// Targets kept quiet unless tracing everything
const QUIET_TARGETS: [(&str, &str); 6] = [
    ("reqwest", "info"),
    ("hyper", "warn"),
    ("hyper_util", "warn"),
    ("h2", "warn"),
    ("tokio", "info"),
    ("html5ever", "warn"),
];

/// Builds the filter used when `RUST_LOG` is not set
pub fn build_filter(level: &str) -> Result<EnvFilter> {
    let mut filter = EnvFilter::try_new(level).map_err(|e| anyhow!("Invalid log level {level}: {e}"))?;
    if !level.to_lowercase().contains("trace") {
        for (target, target_level) in QUIET_TARGETS {
            filter = filter.add_directive(format!("{target}={target_level}").parse()?);
        }
        filter = filter.add_directive(format!("catalog_enricher={level}").parse()?);
    }
    Ok(filter)
}

/// Initialize the global subscriber. Fails when called twice.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    if !config.console_output && !config.file_output {
        return Err(anyhow!("No logging output configured"));
    }

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => build_filter(&config.level)?,
    };

    let mut layers: Vec<BoxedLayer> = Vec::new();

    if config.console_output {
        layers.push(
            fmt::layer()
                .with_writer(std::io::stdout)
                .with_timer(fmt::time::ChronoLocal::rfc_3339())
                .with_target(false)
                .boxed(),
        );
    }

    if config.file_output {
        std::fs::create_dir_all(&config.log_dir).map_err(|e| {
            anyhow!("Failed to create log directory {}: {e}", config.log_dir.display())
        })?;
        let (file_writer, guard) = non_blocking(rolling::never(&config.log_dir, &config.file_name));
        LOG_GUARDS
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(guard);

        let file_layer = if config.json_format {
            fmt::layer()
                .json()
                .with_writer(file_writer)
                .with_timer(fmt::time::ChronoLocal::rfc_3339())
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .boxed()
        } else {
            fmt::layer()
                .with_writer(file_writer)
                .with_timer(fmt::time::ChronoLocal::rfc_3339())
                .with_target(false)
                .with_ansi(false)
                .boxed()
        };
        layers.push(file_layer);
    }

    Registry::default()
        .with(env_filter)
        .with(layers)
        .try_init()
        .map_err(|e| anyhow!("Failed to install the log subscriber: {e}"))?;

    info!(
        level = %config.level,
        json = config.json_format,
        console = config.console_output,
        file = config.file_output,
        "Logging system initialized"
    );
    if config.file_output {
        info!("Log file: {}", config.log_dir.join(&config.file_name).display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_quiets_dependencies_below_trace() {
        let filter = build_filter("debug").unwrap().to_string();
        assert!(filter.contains("hyper=warn"));
        assert!(filter.contains("catalog_enricher=debug"));

        let filter = build_filter("trace").unwrap().to_string();
        assert!(!filter.contains("hyper=warn"));
    }

    #[test]
    fn rejects_config_without_outputs() {
        let config = LoggingConfig {
            console_output: false,
            file_output: false,
            ..LoggingConfig::default()
        };
        assert!(init_logging(&config).is_err());
    }
}
