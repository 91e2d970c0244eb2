//! Command-line flags; each one overrides the matching configuration value
//! when given.

use std::path::PathBuf;

use clap::Parser;

use crate::infrastructure::AppConfig;

#[derive(Parser, Debug, Default)]
#[command(name = "catalog-enricher")]
#[command(version, about = "Retailer catalog ingestion and product page enrichment service", long_about = None)]
pub struct Cli {
    /// Configuration file (toml, yaml or json)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Listen address [default: localhost:8001]
    #[arg(long)]
    pub host: Option<String>,

    /// File with proxies, one per line [default: proxy.txt]
    #[arg(long)]
    pub proxy_file: Option<PathBuf>,

    /// Concurrent enrichment workers per parser [default: 100]
    #[arg(long)]
    pub scrappers: Option<usize>,

    /// Concurrently processed catalogs [default: 1]
    #[arg(long)]
    pub parsers: Option<usize>,

    /// Maximum items processed per catalog, negative for no limit [default: -1]
    #[arg(long, allow_negative_numbers = true)]
    pub url_limit: Option<i64>,

    /// Write results to the output directory instead of the job callback
    #[arg(long)]
    pub file: bool,

    /// Directory for results written with --file [default: .]
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Per-fetch timeout in seconds [default: none]
    #[arg(long)]
    pub fetch_timeout_secs: Option<u64>,
}

impl Cli {
    /// Applies the given flags on top of the loaded configuration
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(host) = &self.host {
            config.server.host.clone_from(host);
        }
        if let Some(proxy_file) = &self.proxy_file {
            config.fetch.proxy_file.clone_from(proxy_file);
        }
        if let Some(scrappers) = self.scrappers {
            config.pipeline.scrappers = scrappers;
        }
        if let Some(parsers) = self.parsers {
            config.pipeline.parsers = parsers;
        }
        if let Some(url_limit) = self.url_limit {
            config.pipeline.url_limit = url_limit;
        }
        if self.file {
            config.output.to_file = true;
        }
        if let Some(output_dir) = &self.output_dir {
            config.output.dir.clone_from(output_dir);
        }
        if let Some(timeout) = self.fetch_timeout_secs {
            config.fetch.timeout_secs = Some(timeout);
        }
    }
}
