//! Domain services
//!
//! Capabilities the pipeline depends on but does not implement: enriching a
//! record from its product page and delivering a finished document.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::job::JobMeta;
use crate::domain::offer::{DecodedRecord, Enrichment};

/// Why one record could not be enriched. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnrichError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error {0}: {1}")]
    Status(u16, String),

    #[error("Fetch timed out: {0}")]
    Timeout(String),

    #[error("No info {0}")]
    MissingContent(String),

    #[error("Invalid product url: {0}")]
    InvalidUrl(String),

    #[error("Record {0} has no product url")]
    MissingUrl(String),

    #[error("Enrichment rules error: {0}")]
    Rules(String),
}

/// Per-variant enrichment capability
#[async_trait]
pub trait Enricher: Send + Sync + 'static {
    /// Fetches the record's product page and extracts the enriched fields
    async fn enrich(&self, record: &DecodedRecord) -> Result<Enrichment, EnrichError>;
}

/// Delivery failures; fatal for the job
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Upload to {uri} failed: {message}")]
    Upload { uri: String, message: String },

    #[error("Callback {uri} answered with status {status}")]
    Status { uri: String, status: u16 },

    #[error("Job {0} has no callback uri")]
    MissingCallback(String),
}

/// Destination of finished documents
#[async_trait]
pub trait Sink: Send + Sync + 'static {
    async fn deliver(&self, job: &JobMeta, document: Vec<u8>) -> Result<(), SinkError>;
}
