//! Delivery of finished documents
//!
//! [`CallbackSink`] posts the document to the job's callback URI as a
//! multipart upload; [`FileSink`] writes it to a local directory under the
//! job name.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use tracing::info;

use crate::domain::{JobMeta, Sink, SinkError};

/// Multipart field carrying the document
pub const UPLOAD_FIELD: &str = "file";

pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Target path of a job; only the final component of the job name is used
    pub fn path_for(&self, job_name: &str) -> Result<PathBuf, SinkError> {
        Path::new(job_name)
            .file_name()
            .map(|name| self.dir.join(name))
            .ok_or_else(|| SinkError::Io {
                path: job_name.to_string(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "job name is not a file name"),
            })
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn deliver(&self, job: &JobMeta, document: Vec<u8>) -> Result<(), SinkError> {
        let path = self.path_for(&job.name)?;
        let io_error = |source| SinkError::Io {
            path: path.display().to_string(),
            source,
        };
        tokio::fs::create_dir_all(&self.dir).await.map_err(io_error)?;
        tokio::fs::write(&path, &document).await.map_err(io_error)?;
        info!(job = %job.name, path = %path.display(), bytes = document.len(), "Document written");
        Ok(())
    }
}

pub struct CallbackSink {
    client: Client,
}

impl CallbackSink {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl Default for CallbackSink {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

#[async_trait]
impl Sink for CallbackSink {
    async fn deliver(&self, job: &JobMeta, document: Vec<u8>) -> Result<(), SinkError> {
        let uri = job
            .callback
            .as_deref()
            .map(str::trim)
            .filter(|uri| !uri.is_empty())
            .ok_or_else(|| SinkError::MissingCallback(job.name.clone()))?;
        let upload_error = |message: String| SinkError::Upload {
            uri: uri.to_string(),
            message,
        };

        let bytes = document.len();
        let part = Part::bytes(document)
            .file_name(job.name.clone())
            .mime_str("application/octet-stream")
            .map_err(|e| upload_error(e.to_string()))?;
        let form = Form::new().part(UPLOAD_FIELD, part);

        let response = self
            .client
            .post(uri)
            .multipart(form)
            .send()
            .await
            .map_err(|e| upload_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status {
                uri: uri.to_string(),
                status: status.as_u16(),
            });
        }
        info!(job = %job.name, uri, bytes, "Document uploaded");
        Ok(())
    }
}
