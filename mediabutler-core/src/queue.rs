//! Bounded job queue and the cooperative worker pool draining it.
//!
//! One mpsc channel, FIFO, shared by a fixed set of workers; completion
//! order is enqueue order up to worker-count interleaving. A full queue
//! rejects by default so producers degrade loudly instead of stalling the
//! watcher.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use mediabutler_model::{BatchJobId, FileHash};

use crate::batch::BatchExecutor;
use crate::classify::{Classifier, classify_with_deadline};
use crate::error::{ButlerError, ErrorKind, Result};
use crate::events::DomainEvent;
use crate::organize::{OrganizeOutcome, Organizer};
use crate::recovery::{ErrorClassifier, ErrorContext, RecoveryAction};
use crate::service::FileService;
use crate::store::Store;
use crate::tokenizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Classify,
    Organize,
    BatchOrganize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobPayload {
    Classify { hash: FileHash },
    Organize { hash: FileHash, category: String },
    BatchOrganize { job_id: BatchJobId },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub payload: JobPayload,
    pub attempt: u32,
}

impl Job {
    pub fn new(payload: JobPayload) -> Self {
        Self {
            id: Uuid::now_v7(),
            payload,
            attempt: 0,
        }
    }

    pub fn kind(&self) -> JobKind {
        match self.payload {
            JobPayload::Classify { .. } => JobKind::Classify,
            JobPayload::Organize { .. } => JobKind::Organize,
            JobPayload::BatchOrganize { .. } => JobKind::BatchOrganize,
        }
    }
}

/// Producer handle over the bounded channel. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    sender: Arc<Mutex<Option<mpsc::Sender<Job>>>>,
    block_when_full: bool,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("running", &self.is_running())
            .field("block_when_full", &self.block_when_full)
            .finish()
    }
}

impl JobQueue {
    pub fn new(capacity: usize, block_when_full: bool) -> (Self, mpsc::Receiver<Job>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender: Arc::new(Mutex::new(Some(tx))),
                block_when_full,
            },
            rx,
        )
    }

    pub fn is_running(&self) -> bool {
        self.sender.lock().expect("queue lock poisoned").is_some()
    }

    pub async fn enqueue(&self, job: Job) -> Result<()> {
        let sender = {
            let guard = self.sender.lock().expect("queue lock poisoned");
            guard.clone()
        };
        let Some(sender) = sender else {
            return Err(ButlerError::Transient("queue is draining".to_string()));
        };

        if self.block_when_full {
            sender
                .send(job)
                .await
                .map_err(|_| ButlerError::Transient("queue closed".to_string()))
        } else {
            match sender.try_send(job) {
                Ok(()) => Ok(()),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("job rejected: queue full");
                    Err(ButlerError::Transient("queue full".to_string()))
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    Err(ButlerError::Transient("queue closed".to_string()))
                }
            }
        }
    }

    /// Stop accepting jobs. Workers finish what is already queued and then
    /// exit when the channel drains.
    pub fn begin_drain(&self) {
        let mut guard = self.sender.lock().expect("queue lock poisoned");
        if guard.take().is_some() {
            info!("job queue draining; no new jobs accepted");
        }
    }
}

/// Everything a worker needs to execute a job.
pub struct WorkerDeps {
    pub store: Arc<Store>,
    pub service: Arc<FileService>,
    pub organizer: Arc<Organizer>,
    pub classifier: Arc<dyn Classifier>,
    pub errors: ErrorClassifier,
    pub batch: Arc<BatchExecutor>,
    pub queue: JobQueue,
    pub max_classification_ms: u64,
    pub max_retry: u32,
}

impl std::fmt::Debug for WorkerDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerDeps")
            .field("max_classification_ms", &self.max_classification_ms)
            .field("max_retry", &self.max_retry)
            .finish()
    }
}

#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers over one shared receiver.
    pub fn spawn(count: usize, rx: mpsc::Receiver<Job>, deps: Arc<WorkerDeps>) -> Self {
        let rx = Arc::new(AsyncMutex::new(rx));
        let handles = (0..count.max(1))
            .map(|index| {
                let rx = Arc::clone(&rx);
                let deps = Arc::clone(&deps);
                tokio::spawn(async move {
                    worker_loop(index, rx, deps).await;
                })
            })
            .collect();
        Self { handles }
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Wait for in-flight and queued jobs to finish, aborting whatever is
    /// left after the grace period. Call [`JobQueue::begin_drain`] first.
    pub async fn shutdown(self, grace: Duration) {
        let abort_handles: Vec<_> = self.handles.iter().map(|h| h.abort_handle()).collect();
        let join_all = futures::future::join_all(self.handles);
        if tokio::time::timeout(grace, join_all).await.is_err() {
            warn!("worker shutdown grace elapsed; aborting remaining workers");
            for handle in abort_handles {
                handle.abort();
            }
        }
    }
}

async fn worker_loop(index: usize, rx: Arc<AsyncMutex<mpsc::Receiver<Job>>>, deps: Arc<WorkerDeps>) {
    debug!(worker = index, "worker started");
    loop {
        let job = {
            let mut guard = rx.lock().await;
            guard.recv().await
        };
        let Some(job) = job else {
            debug!(worker = index, "queue closed; worker exiting");
            break;
        };
        if let Err(err) = process_job(&deps, &job).await {
            // process_job handles its own recovery; an Err here means even
            // the error path failed and the job is dropped.
            error!(worker = index, job = %job.id, error = %err, "job processing failed hard");
        }
    }
}

async fn process_job(deps: &WorkerDeps, job: &Job) -> Result<()> {
    match &job.payload {
        JobPayload::Classify { hash } => {
            if let Err(err) = run_classify(deps, hash).await {
                handle_pipeline_error(deps, job, hash, err, JobKind::Classify).await?;
            }
            Ok(())
        }
        JobPayload::Organize { hash, category } => {
            match deps.organizer.organize(hash, category).await? {
                OrganizeOutcome::Success(_) => Ok(()),
                OrganizeOutcome::Failed { recovery, .. } => {
                    maybe_requeue(deps, job, recovery).await;
                    Ok(())
                }
            }
        }
        JobPayload::BatchOrganize { job_id } => deps.batch.run(*job_id).await,
    }
}

async fn run_classify(deps: &WorkerDeps, hash: &FileHash) -> Result<()> {
    deps.service.begin_processing(hash).await?;
    let file = deps.store.require_file(hash).await?;
    let parsed = tokenizer::tokenize(&file.file_name);
    let classification = classify_with_deadline(
        deps.classifier.as_ref(),
        &parsed.series_tokens,
        &file.file_name,
        deps.max_classification_ms,
    )
    .await?;
    deps.service
        .update_classification(hash, &classification.category, classification.confidence)
        .await?;
    Ok(())
}

async fn handle_pipeline_error(
    deps: &WorkerDeps,
    job: &Job,
    hash: &FileHash,
    err: ButlerError,
    kind: JobKind,
) -> Result<()> {
    // Duplicate or stale jobs (file already past this stage, or soft
    // deleted meanwhile) are dropped without touching the retry budget.
    if matches!(
        err.kind(),
        ErrorKind::NotFound | ErrorKind::IllegalTransition
    ) {
        debug!(job = %job.id, hash = %hash, error = %err, "dropping stale job");
        return Ok(());
    }

    let retry_attempts = deps
        .store
        .get_file(hash, false)
        .await
        .ok()
        .flatten()
        .map(|f| f.retry_count)
        .unwrap_or(job.attempt);
    let ctx = ErrorContext {
        operation: format!("{kind:?}").to_uppercase(),
        file_hash: Some(hash.clone()),
        retry_attempts,
        ..Default::default()
    };
    let classification = deps.errors.classify(&err, &ctx);
    let recovery = deps.errors.recovery_action(&classification, &ctx);

    deps.service
        .record_error(
            hash,
            &classification.technical_details,
            Some(serde_json::to_value(&classification)?),
            !classification.can_retry,
        )
        .await?;

    deps.store
        .events()
        .publish(DomainEvent::ClassificationFailed {
            hash: hash.clone(),
            reason: classification.user_message.clone(),
        })
        .await;

    maybe_requeue(deps, job, recovery).await;
    Ok(())
}

/// Re-enqueue a retryable job after its backoff, capped by the retry
/// budget.
async fn maybe_requeue(deps: &WorkerDeps, job: &Job, recovery: RecoveryAction) {
    let RecoveryAction::AutomaticRetry { delay_ms } = recovery else {
        return;
    };
    if job.attempt + 1 >= deps.max_retry {
        warn!(job = %job.id, "retry budget exhausted; not re-enqueueing");
        return;
    }
    let mut retry = job.clone();
    retry.attempt += 1;
    let queue = deps.queue.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        if let Err(err) = queue.enqueue(retry).await {
            warn!(error = %err, "re-enqueue after backoff failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify_job(n: u8) -> Job {
        Job::new(JobPayload::Classify {
            hash: FileHash::from_digest(format!("{:064x}", n)),
        })
    }

    #[tokio::test]
    async fn full_queue_rejects_with_a_transient_error() {
        let (queue, _rx) = JobQueue::new(2, false);
        queue.enqueue(classify_job(1)).await.unwrap();
        queue.enqueue(classify_job(2)).await.unwrap();
        let err = queue.enqueue(classify_job(3)).await.unwrap_err();
        assert!(err.to_string().contains("queue full"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn drained_queue_refuses_new_jobs_but_keeps_backlog() {
        let (queue, mut rx) = JobQueue::new(8, false);
        let first = classify_job(1);
        queue.enqueue(first.clone()).await.unwrap();
        queue.begin_drain();

        assert!(!queue.is_running());
        assert!(queue.enqueue(classify_job(2)).await.is_err());

        // The already-queued job is still delivered, then the channel ends.
        assert_eq!(rx.recv().await, Some(first));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn jobs_come_out_in_enqueue_order() {
        let (queue, mut rx) = JobQueue::new(16, false);
        let jobs: Vec<Job> = (1..=5).map(classify_job).collect();
        for job in &jobs {
            queue.enqueue(job.clone()).await.unwrap();
        }
        for expected in &jobs {
            assert_eq!(rx.recv().await.as_ref(), Some(expected));
        }
    }
}
