//! # Catalog Pipeline
//!
//! Three concurrent stages per job, connected by bounded queues:
//! - tokenizer: splits the input into decoded records and structural tokens
//! - worker pool: enriches records through the injected [`Enricher`](crate::domain::Enricher)
//! - assembler: merges both streams back into a document and delivers it
//!
//! A stage signals completion by dropping its senders. The overseer owns a
//! fixed set of pipeline instances and dispatches queued jobs to idle ones.

use thiserror::Error;

use crate::domain::{SinkError, UnknownCatalog};

pub mod assembler;
pub mod instance;
pub mod overseer;
pub mod state;
pub mod tokenizer;
pub mod workers;

pub use assembler::{AssemblySummary, DocumentAssembler};
pub use instance::{ChannelCapacities, InstanceStatus, JobOutcome, Lifecycle, PipelineInstance, PipelineSettings};
pub use overseer::{Overseer, OverseerStatus, SubmittedJob};
pub use state::{ParserState, ParserStats};
pub use tokenizer::{ItemLimit, StopReason, StreamTokenizer, StructuralToken, TokenizeError, TokenizeSummary};
pub use workers::{EnrichmentWorkerPool, WorkerPoolSummary};

/// Failure of one job inside a pipeline instance
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Delivery failed: {0}")]
    Delivery(#[from] SinkError),

    #[error("Job cancelled before delivery")]
    Cancelled,

    #[error("Pipeline stage failed: {0}")]
    StageJoin(String),
}

/// Job submission and dispatch errors
#[derive(Error, Debug)]
pub enum OverseerError {
    #[error(transparent)]
    UnknownCatalog(#[from] UnknownCatalog),

    #[error("File - {0} already in use")]
    DuplicateJob(String),

    #[error("Overseer is shutting down")]
    ShuttingDown,

    #[error("Job queue is closed")]
    QueueClosed,
}
