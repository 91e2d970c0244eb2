//! Infrastructure layer: configuration, logging, outbound HTTP and document
//! delivery.
//!
//! Implements the capabilities the pipeline depends on ([`Enricher`](crate::domain::Enricher),
//! [`Sink`](crate::domain::Sink)) on top of reqwest, scraper and the shared
//! proxy pool.

pub mod config;
pub mod enrichment;
pub mod http_client;
pub mod logging;
pub mod proxy_pool;
pub mod sink;
pub mod user_agents;

pub use config::{AppConfig, ConfigError, LoggingConfig};
pub use enrichment::{PageEnricher, RetailerRules};
pub use http_client::{FetcherConfig, PageFetcher, PageSource};
pub use logging::init_logging;
pub use proxy_pool::{ProxyLease, ProxyPool, ProxyPoolError};
pub use sink::{CallbackSink, FileSink};
