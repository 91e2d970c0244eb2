//! # Overseer
//!
//! Owns a fixed set of pipeline instances and a bounded job queue. A single
//! dispatcher task pairs each queued job with the next idle instance; the
//! instance runs the job on its own task and returns itself to the idle
//! queue when done.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{Enricher, Job, JobInput, Sink};
use crate::pipeline::OverseerError;
use crate::pipeline::instance::{InstanceStatus, PipelineInstance, PipelineSettings};

/// Capacity of the pending job queue
pub const JOB_QUEUE_CAPACITY: usize = 100;

/// Identity of an accepted job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedJob {
    pub job_id: Uuid,
    pub job_name: String,
}

/// Aggregate and per-instance view of the overseer
#[derive(Debug, Clone, Serialize)]
pub struct OverseerStatus {
    pub accepting: bool,
    pub queued: usize,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub instances: Vec<InstanceStatus>,
}

#[derive(Debug, Default)]
struct JobCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

type IdleQueue = mpsc::Receiver<Arc<PipelineInstance>>;

pub struct Overseer {
    instances: Vec<Arc<PipelineInstance>>,
    jobs: mpsc::Sender<Job>,
    accepting: AtomicBool,
    counters: Arc<JobCounters>,
    cancel: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<IdleQueue>>>,
}

impl Overseer {
    /// Creates `parsers` instances sharing the enricher and sink, and starts
    /// the dispatcher. Must be called inside a Tokio runtime.
    #[must_use]
    pub fn start(
        parsers: usize,
        settings: PipelineSettings,
        enricher: Arc<dyn Enricher>,
        sink: Arc<dyn Sink>,
    ) -> Self {
        let parsers = parsers.max(1);
        let cancel = CancellationToken::new();
        let counters = Arc::new(JobCounters::default());

        let instances: Vec<_> = (1..=parsers)
            .map(|id| {
                Arc::new(PipelineInstance::new(
                    id,
                    settings,
                    enricher.clone(),
                    sink.clone(),
                    cancel.clone(),
                ))
            })
            .collect();

        let (idle_tx, idle_rx) = mpsc::channel(parsers);
        for instance in &instances {
            // capacity equals the instance count
            if idle_tx.try_send(instance.clone()).is_err() {
                error!(instance = instance.id(), "Idle queue rejected a fresh instance");
            }
        }

        let (jobs, job_rx) = mpsc::channel(JOB_QUEUE_CAPACITY);
        let dispatcher = tokio::spawn(dispatch(
            job_rx,
            idle_tx,
            idle_rx,
            counters.clone(),
            cancel.clone(),
        ));

        info!(
            parsers,
            workers = settings.workers,
            "Overseer started"
        );

        Self {
            instances,
            jobs,
            accepting: AtomicBool::new(true),
            counters,
            cancel,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Queues a job. Waits while the job queue is full.
    ///
    /// # Errors
    /// Returns an error after shutdown began, when a running instance is
    /// already bound to a job of the same name, or when the queue is closed.
    pub async fn submit(&self, job: Job) -> Result<SubmittedJob, OverseerError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(OverseerError::ShuttingDown);
        }
        // Jobs still waiting in the queue are not checked.
        if self
            .instances
            .iter()
            .any(|instance| instance.job_name().as_deref() == Some(job.name.as_str()))
        {
            return Err(OverseerError::DuplicateJob(job.name));
        }

        let submitted = SubmittedJob {
            job_id: job.id,
            job_name: job.name.clone(),
        };
        self.jobs
            .send(job)
            .await
            .map_err(|_| OverseerError::QueueClosed)?;
        self.counters.submitted.fetch_add(1, Ordering::SeqCst);
        info!(job = %submitted.job_name, id = %submitted.job_id, "Job queued");
        Ok(submitted)
    }

    /// Builds a job from a named document and queues it
    ///
    /// # Errors
    /// Returns [`OverseerError::UnknownCatalog`] when the name selects no
    /// catalog, otherwise the errors of [`Overseer::submit`].
    pub async fn submit_document(
        &self,
        name: impl Into<String>,
        callback: Option<String>,
        input: JobInput,
    ) -> Result<SubmittedJob, OverseerError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(OverseerError::ShuttingDown);
        }
        let job = Job::new(name, callback, input)?;
        self.submit(job).await
    }

    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn status(&self) -> OverseerStatus {
        OverseerStatus {
            accepting: self.is_accepting(),
            queued: self.jobs.max_capacity() - self.jobs.capacity(),
            submitted: self.counters.submitted.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            instances: self
                .instances
                .iter()
                .map(|instance| instance.status())
                .collect(),
        }
    }

    /// Stops accepting jobs, cancels running ones and waits until every
    /// instance is idle again. Queued jobs that were never dispatched are
    /// dropped. Calling it twice is a no-op.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        self.cancel.cancel();

        let Some(dispatcher) = self.dispatcher.lock().await.take() else {
            return;
        };
        info!("Overseer shutting down");

        match dispatcher.await {
            Ok(mut idle) => {
                for _ in 0..self.instances.len() {
                    if idle.recv().await.is_none() {
                        break;
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Dispatcher task failed");
                for instance in &self.instances {
                    instance.stop().await;
                }
            }
        }
        info!("All pipeline instances stopped");
    }
}

async fn dispatch(
    mut jobs: mpsc::Receiver<Job>,
    idle_tx: mpsc::Sender<Arc<PipelineInstance>>,
    mut idle_rx: IdleQueue,
    counters: Arc<JobCounters>,
    cancel: CancellationToken,
) -> IdleQueue {
    loop {
        let job = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };
        let instance = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                warn!(job = %job.name, "Dropping queued job on shutdown");
                break;
            }
            instance = idle_rx.recv() => match instance {
                Some(instance) => instance,
                None => break,
            },
        };

        debug!(job = %job.name, instance = instance.id(), "Dispatching job");
        let idle = idle_tx.clone();
        let counters = counters.clone();
        tokio::spawn(async move {
            match instance.run(job).await {
                Ok(_) => counters.completed.fetch_add(1, Ordering::SeqCst),
                Err(_) => counters.failed.fetch_add(1, Ordering::SeqCst),
            };
            if idle.send(instance).await.is_err() {
                warn!("Idle queue closed before the instance returned");
            }
        });
    }

    jobs.close();
    let mut dropped = 0usize;
    while jobs.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        warn!(dropped, "Queued jobs dropped on shutdown");
    }
    idle_rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DecodedRecord, EnrichError, Enrichment, JobMeta, SinkError};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Blocks every enrichment until a permit is released
    struct GatedEnricher(Arc<Semaphore>);

    #[async_trait]
    impl Enricher for GatedEnricher {
        async fn enrich(&self, _record: &DecodedRecord) -> Result<Enrichment, EnrichError> {
            let _permit = self
                .0
                .acquire()
                .await
                .map_err(|e| EnrichError::Rules(e.to_string()))?;
            Ok(Enrichment::default())
        }
    }

    struct NullSink;

    #[async_trait]
    impl Sink for NullSink {
        async fn deliver(&self, _job: &JobMeta, _document: Vec<u8>) -> Result<(), SinkError> {
            Ok(())
        }
    }

    const FEED: &str = r#"<yml_catalog><shop><offers><offer id="1"/></offers></shop></yml_catalog>"#;

    fn overseer(parsers: usize, gate: Arc<Semaphore>) -> Overseer {
        Overseer::start(
            parsers,
            PipelineSettings {
                workers: 2,
                ..PipelineSettings::default()
            },
            Arc::new(GatedEnricher(gate)),
            Arc::new(NullSink),
        )
    }

    async fn wait_until(overseer: &Overseer, done: impl Fn(&OverseerStatus) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done(&overseer.status()) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("overseer did not reach the expected state");
    }

    #[tokio::test]
    async fn runs_queued_jobs_on_idle_instances() {
        let overseer = overseer(2, Arc::new(Semaphore::new(Semaphore::MAX_PERMITS)));
        for name in ["go.a.xml", "go.b.xml", "fotos.xml"] {
            let document = if name.starts_with("fotos") {
                r#"<price><catalog><items><item id="5"/></items></catalog></price>"#
            } else {
                FEED
            };
            overseer
                .submit(Job::from_bytes(name, None, document).unwrap())
                .await
                .unwrap();
        }

        wait_until(&overseer, |status| status.completed == 3).await;
        let status = overseer.status();
        assert_eq!((status.submitted, status.failed), (3, 0));
        assert!(status.instances.iter().all(|i| i.job_name.is_empty()));
        overseer.shutdown().await;
    }

    #[tokio::test]
    async fn rejects_duplicate_running_job() {
        let gate = Arc::new(Semaphore::new(0));
        let overseer = overseer(1, gate.clone());
        overseer
            .submit(Job::from_bytes("go.xml", None, FEED).unwrap())
            .await
            .unwrap();
        wait_until(&overseer, |status| status.instances[0].job_name == "go.xml").await;

        let err = overseer
            .submit(Job::from_bytes("go.xml", None, FEED).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, OverseerError::DuplicateJob(name) if name == "go.xml"));

        gate.add_permits(1);
        wait_until(&overseer, |status| status.completed == 1).await;
        overseer.shutdown().await;
    }

    #[tokio::test]
    async fn rejects_unknown_catalog_and_submissions_after_shutdown() {
        let overseer = overseer(1, Arc::new(Semaphore::new(1)));
        let err = overseer
            .submit_document("unknown.xml", None, Box::new(std::io::Cursor::new(FEED)))
            .await
            .unwrap_err();
        assert!(matches!(err, OverseerError::UnknownCatalog(_)));

        overseer.shutdown().await;
        assert!(!overseer.is_accepting());
        let err = overseer
            .submit(Job::from_bytes("go.xml", None, FEED).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, OverseerError::ShuttingDown));
        overseer.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_waits_for_running_job() {
        let gate = Arc::new(Semaphore::new(0));
        let overseer = overseer(1, gate.clone());
        overseer
            .submit(Job::from_bytes("shopart.xml", None, FEED).unwrap())
            .await
            .unwrap();
        wait_until(&overseer, |status| status.instances[0].stats.active_workers == 1).await;

        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            gate.add_permits(1);
        });
        overseer.shutdown().await;
        release.await.unwrap();

        let status = overseer.status();
        assert_eq!(status.instances[0].lifecycle, crate::pipeline::Lifecycle::Idle);
        assert_eq!(status.completed + status.failed, 1);
    }
}
