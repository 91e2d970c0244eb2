//! # Enrichment Worker Pool
//!
//! A fixed number of worker tasks share the decoded-record queue. Each record
//! is enriched exactly once: successes go downstream to the assembler,
//! failures are counted and dropped.
//!
//! Workers stop when the queue is closed and drained (the tokenizer has
//! finished) or when the shared cancellation token fires. A fetch already in
//! flight is never aborted; cancellation is only observed between records.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::domain::{DecodedRecord, EnrichedRecord, Enricher};
use crate::pipeline::state::ParserState;

/// Per-pool totals of one job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerPoolSummary {
    pub succeeded: u64,
    pub failed: u64,
}

/// Bounded set of concurrently scheduled enrichment tasks
pub struct EnrichmentWorkerPool {
    worker_count: usize,
    enricher: Arc<dyn Enricher>,
    state: Arc<ParserState>,
    cancel: CancellationToken,
}

impl EnrichmentWorkerPool {
    #[must_use]
    pub fn new(
        worker_count: usize,
        enricher: Arc<dyn Enricher>,
        state: Arc<ParserState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            worker_count: worker_count.max(1),
            enricher,
            state,
            cancel,
        }
    }

    #[must_use]
    pub const fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Spawns every worker and waits for all of them. The enriched queue
    /// closes once the last worker has dropped its sender.
    pub async fn run(
        self,
        records: mpsc::Receiver<DecodedRecord>,
        enriched: mpsc::Sender<EnrichedRecord>,
    ) -> WorkerPoolSummary {
        let records = Arc::new(Mutex::new(records));

        let handles: Vec<JoinHandle<WorkerPoolSummary>> = (1..=self.worker_count)
            .map(|id| {
                let worker = Worker {
                    id,
                    enricher: self.enricher.clone(),
                    state: self.state.clone(),
                    cancel: self.cancel.clone(),
                    records: records.clone(),
                    enriched: enriched.clone(),
                };
                tokio::spawn(worker.run().instrument(info_span!("worker", id)))
            })
            .collect();
        drop(enriched);

        join_all(handles)
            .await
            .into_iter()
            .fold(WorkerPoolSummary::default(), |mut total, joined| {
                match joined {
                    Ok(summary) => {
                        total.succeeded += summary.succeeded;
                        total.failed += summary.failed;
                    }
                    Err(e) => error!(error = %e, "Enrichment worker panicked"),
                }
                total
            })
    }
}

struct Worker {
    id: usize,
    enricher: Arc<dyn Enricher>,
    state: Arc<ParserState>,
    cancel: CancellationToken,
    records: Arc<Mutex<mpsc::Receiver<DecodedRecord>>>,
    enriched: mpsc::Sender<EnrichedRecord>,
}

impl Worker {
    async fn run(self) -> WorkerPoolSummary {
        debug!("Scrapper {} started", self.id);
        let mut summary = WorkerPoolSummary::default();

        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                next = async { self.records.lock().await.recv().await } => next,
            };
            let Some(record) = next else {
                break;
            };

            let _work = self.state.begin_work();
            match self.enricher.enrich(&record).await {
                Ok(enrichment) => {
                    let enriched = record.enrich(enrichment);
                    let sent = tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => false,
                        sent = self.enriched.send(enriched) => sent.is_ok(),
                    };
                    if !sent {
                        break;
                    }
                    self.state.record_success();
                    summary.succeeded += 1;
                }
                Err(e) => {
                    warn!(id = record.id(), error = %e, "Enrichment failed, dropping item");
                    self.state.record_failure();
                    summary.failed += 1;
                }
            }
        }

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Scrapper {} finished",
            self.id
        );
        summary
    }
}
