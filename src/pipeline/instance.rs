//! # Pipeline Instance
//!
//! One reusable tokenizer / worker pool / assembler trio. An instance runs a
//! single job at a time; its counters are reset and its job binding cleared
//! once the job has finished, whatever the outcome.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

use crate::domain::{Enricher, Job, JobReport, Sink};
use crate::pipeline::PipelineError;
use crate::pipeline::assembler::DocumentAssembler;
use crate::pipeline::state::{ParserState, ParserStats};
use crate::pipeline::tokenizer::{ItemLimit, StopReason, StreamTokenizer};
use crate::pipeline::workers::EnrichmentWorkerPool;

/// Bounds of the three inter-stage queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelCapacities {
    pub records: usize,
    pub structure: usize,
    pub enriched: usize,
}

impl Default for ChannelCapacities {
    fn default() -> Self {
        Self {
            records: 100,
            structure: 10,
            enriched: 100,
        }
    }
}

/// Per-instance pipeline settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub workers: usize,
    pub limit: ItemLimit,
    pub capacities: ChannelCapacities,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: 100,
            limit: ItemLimit::UNLIMITED,
            capacities: ChannelCapacities::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Idle,
    Running,
    /// Document assembled; remaining stages are being joined
    Draining,
}

/// Result of the last job an instance ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JobOutcome {
    Completed(JobReport),
    Failed { job_name: String, error: String },
}

/// Snapshot of one instance for status reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceStatus {
    pub id: usize,
    /// Name of the bound job, empty when idle
    pub job_name: String,
    pub lifecycle: Lifecycle,
    pub stats: ParserStats,
    pub last_outcome: Option<JobOutcome>,
}

#[derive(Debug, Clone)]
struct Binding {
    lifecycle: Lifecycle,
    job_name: Option<String>,
    last_outcome: Option<JobOutcome>,
}

pub struct PipelineInstance {
    id: usize,
    settings: PipelineSettings,
    enricher: Arc<dyn Enricher>,
    sink: Arc<dyn Sink>,
    cancel: CancellationToken,
    state: Arc<ParserState>,
    binding: watch::Sender<Binding>,
}

impl PipelineInstance {
    #[must_use]
    pub fn new(
        id: usize,
        settings: PipelineSettings,
        enricher: Arc<dyn Enricher>,
        sink: Arc<dyn Sink>,
        cancel: CancellationToken,
    ) -> Self {
        let (binding, _) = watch::channel(Binding {
            lifecycle: Lifecycle::Idle,
            job_name: None,
            last_outcome: None,
        });
        Self {
            id,
            settings,
            enricher,
            sink,
            cancel,
            state: Arc::new(ParserState::new()),
            binding,
        }
    }

    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    #[must_use]
    pub fn job_name(&self) -> Option<String> {
        self.binding.borrow().job_name.clone()
    }

    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.binding.borrow().lifecycle
    }

    #[must_use]
    pub fn status(&self) -> InstanceStatus {
        let binding = self.binding.borrow();
        InstanceStatus {
            id: self.id,
            job_name: binding.job_name.clone().unwrap_or_default(),
            lifecycle: binding.lifecycle,
            stats: self.state.snapshot(),
            last_outcome: binding.last_outcome.clone(),
        }
    }

    /// Runs one job to completion: spawns the three stages, waits for the
    /// assembler, then joins the other two.
    pub async fn run(&self, job: Job) -> Result<JobReport, PipelineError> {
        let job_name = job.name.clone();
        self.binding.send_modify(|binding| {
            binding.lifecycle = Lifecycle::Running;
            binding.job_name = Some(job_name.clone());
        });

        let span = info_span!("job", instance = self.id, job = %job_name);
        let result = self.execute(job).instrument(span).await;

        let outcome = match &result {
            Ok(report) => {
                info!(
                    instance = self.id,
                    job = %job_name,
                    decoded = report.decoded,
                    succeeded = report.succeeded,
                    failed = report.failed,
                    elapsed_ms = report.elapsed().num_milliseconds(),
                    "Job finished"
                );
                JobOutcome::Completed(report.clone())
            }
            Err(e) => {
                error!(instance = self.id, job = %job_name, error = %e, "Job failed");
                JobOutcome::Failed {
                    job_name: job_name.clone(),
                    error: e.to_string(),
                }
            }
        };

        self.state.reset();
        self.binding.send_modify(|binding| {
            binding.lifecycle = Lifecycle::Idle;
            binding.job_name = None;
            binding.last_outcome = Some(outcome);
        });
        result
    }

    async fn execute(&self, job: Job) -> Result<JobReport, PipelineError> {
        let meta = job.meta();
        let capacities = self.settings.capacities;
        let (record_tx, record_rx) = mpsc::channel(capacities.records.max(1));
        let (token_tx, token_rx) = mpsc::channel(capacities.structure.max(1));
        let (enriched_tx, enriched_rx) = mpsc::channel(capacities.enriched.max(1));

        let tokenizer = StreamTokenizer::new(
            job.variant,
            self.settings.limit,
            self.state.clone(),
            record_tx,
            token_tx,
            self.cancel.clone(),
        );
        let pool = EnrichmentWorkerPool::new(
            self.settings.workers,
            self.enricher.clone(),
            self.state.clone(),
            self.cancel.clone(),
        );
        let assembler = DocumentAssembler::new(
            job.variant.schema(),
            self.state.clone(),
            self.sink.clone(),
            self.cancel.clone(),
        );

        let reader = tokio::spawn(tokenizer.run(job.input).in_current_span());
        let workers = tokio::spawn(pool.run(record_rx, enriched_tx).in_current_span());
        let writer = tokio::spawn(assembler.run(meta.clone(), token_rx, enriched_rx).in_current_span());

        let assembled = writer.await;
        self.binding
            .send_modify(|binding| binding.lifecycle = Lifecycle::Draining);
        let tokenized = reader.await;
        let enriched = workers.await;

        let assembly = assembled.map_err(stage_failed)??;
        let tokenized = tokenized.map_err(stage_failed)?;
        let enriched = enriched.map_err(stage_failed)?;

        if let StopReason::Malformed(e) = &tokenized.stop {
            warn!(error = %e, "Delivered a partial document after malformed input");
        }

        Ok(JobReport {
            job_name: meta.name,
            decoded: tokenized.decoded,
            succeeded: enriched.succeeded,
            failed: enriched.failed,
            document_bytes: assembly.document_bytes,
            submitted_at: meta.submitted_at,
            finished_at: Utc::now(),
        })
    }

    /// Waits until the running job, if any, has joined all of its stages
    pub async fn stop(&self) {
        let mut binding = self.binding.subscribe();
        if binding
            .wait_for(|binding| binding.lifecycle == Lifecycle::Idle)
            .await
            .is_err()
        {
            warn!(instance = self.id, "Instance state channel closed while stopping");
        }
    }
}

fn stage_failed(e: JoinError) -> PipelineError {
    PipelineError::StageJoin(e.to_string())
}
