//! Catalog jobs and their outcome reports

use std::fmt;
use std::io::Cursor;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncBufRead;
use uuid::Uuid;

use crate::domain::catalog::{CatalogVariant, UnknownCatalog};

/// Streamed catalog document of a job
pub type JobInput = Box<dyn AsyncBufRead + Send + Unpin>;

/// One request to enrich a single uploaded catalog document
pub struct Job {
    pub id: Uuid,
    /// File name of the uploaded document; selects the catalog variant
    pub name: String,
    pub callback: Option<String>,
    pub variant: CatalogVariant,
    pub input: JobInput,
    pub submitted_at: DateTime<Utc>,
}

impl Job {
    /// Creates a job, resolving the catalog variant from its name
    pub fn new(
        name: impl Into<String>,
        callback: Option<String>,
        input: JobInput,
    ) -> Result<Self, UnknownCatalog> {
        let name = name.into();
        let variant = CatalogVariant::from_job_name(&name)?;
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            callback,
            variant,
            input,
            submitted_at: Utc::now(),
        })
    }

    /// Job over an in-memory document
    pub fn from_bytes(
        name: impl Into<String>,
        callback: Option<String>,
        document: impl AsRef<[u8]> + Send + Unpin + 'static,
    ) -> Result<Self, UnknownCatalog> {
        Self::new(name, callback, Box::new(Cursor::new(document)))
    }

    /// Name, callback and identity without the input stream
    #[must_use]
    pub fn meta(&self) -> JobMeta {
        JobMeta {
            id: self.id,
            name: self.name.clone(),
            callback: self.callback.clone(),
            variant: self.variant,
            submitted_at: self.submitted_at,
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("callback", &self.callback)
            .field("variant", &self.variant)
            .field("submitted_at", &self.submitted_at)
            .finish_non_exhaustive()
    }
}

/// Job identity handed to the sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMeta {
    pub id: Uuid,
    pub name: String,
    pub callback: Option<String>,
    pub variant: CatalogVariant,
    pub submitted_at: DateTime<Utc>,
}

/// Final counters of one finished job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub job_name: String,
    pub decoded: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub document_bytes: usize,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JobReport {
    /// Wall time from submission to delivery
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.submitted_at
    }
}
