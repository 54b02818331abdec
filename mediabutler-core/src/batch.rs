//! Multi-file organize jobs: validation, bounded-concurrency execution,
//! live progress, and cancellation.
//!
//! Per-job progress lives in a small actor task that is the single owner
//! of the state map; everyone else talks to it over a command channel. The
//! map is display state only, never the source of truth: the store's rows
//! and logs survive a restart, the map does not.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use mediabutler_model::{BatchJobId, FileHash, FileStatus};

use crate::clock::Clock;
use crate::error::{ButlerError, Result};
use crate::events::DomainEvent;
use crate::fsx::FileSystem;
use crate::mover::required_space;
use crate::organize::{OrganizeOutcome, Organizer};
use crate::pathing::PathBuilder;
use crate::queue::{Job, JobPayload, JobQueue};
use crate::store::Store;

#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct BatchItem {
    pub hash: FileHash,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct BatchRequest {
    pub items: Vec<BatchItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchState {
    Pending,
    Running,
    Completed,
    Cancelled,
}

/// Per-file outcome inside a batch.
#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum FileOutcome {
    Pending,
    InProgress,
    Completed,
    Failed(String),
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct BatchSnapshot {
    pub job_id: BatchJobId,
    pub state: BatchState,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled_remaining: usize,
    pub current: Option<FileHash>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub results: Vec<(FileHash, FileOutcome)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchValidation {
    pub problems: Vec<String>,
    pub required_space: u64,
    pub available_space: u64,
}

impl BatchValidation {
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

struct BatchJobState {
    items: Vec<BatchItem>,
    state: BatchState,
    outcomes: Vec<(FileHash, FileOutcome)>,
    cancelled: bool,
    current: Option<FileHash>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl BatchJobState {
    fn snapshot(&self, job_id: BatchJobId) -> BatchSnapshot {
        let mut completed = 0;
        let mut failed = 0;
        let mut skipped = 0;
        let mut unstarted = 0;
        for (_, outcome) in &self.outcomes {
            match outcome {
                FileOutcome::Completed => completed += 1,
                FileOutcome::Failed(_) => failed += 1,
                FileOutcome::Skipped => skipped += 1,
                FileOutcome::Pending | FileOutcome::InProgress => unstarted += 1,
            }
        }
        let cancelled_remaining = if self.cancelled { skipped + unstarted } else { 0 };
        BatchSnapshot {
            job_id,
            state: self.state,
            total: self.items.len(),
            completed,
            failed,
            skipped,
            cancelled_remaining,
            current: self.current.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            results: self.outcomes.clone(),
        }
    }
}

enum RegistryCommand {
    Create {
        job_id: BatchJobId,
        items: Vec<BatchItem>,
    },
    Start {
        job_id: BatchJobId,
    },
    MarkInProgress {
        job_id: BatchJobId,
        hash: FileHash,
    },
    MarkDone {
        job_id: BatchJobId,
        hash: FileHash,
        outcome: FileOutcome,
        reply: oneshot::Sender<Option<BatchSnapshot>>,
    },
    Finish {
        job_id: BatchJobId,
        reply: oneshot::Sender<Option<BatchSnapshot>>,
    },
    Cancel {
        job_id: BatchJobId,
        reply: oneshot::Sender<bool>,
    },
    IsCancelled {
        job_id: BatchJobId,
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        job_id: BatchJobId,
        reply: oneshot::Sender<Option<BatchSnapshot>>,
    },
    List {
        reply: oneshot::Sender<Vec<BatchSnapshot>>,
    },
    Plan {
        job_id: BatchJobId,
        reply: oneshot::Sender<Option<Vec<BatchItem>>>,
    },
}

/// Clonable handle to the registry actor.
#[derive(Clone)]
pub struct BatchRegistry {
    tx: mpsc::Sender<RegistryCommand>,
}

impl std::fmt::Debug for BatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchRegistry").finish()
    }
}

impl BatchRegistry {
    pub fn spawn(clock: Arc<dyn Clock>) -> Self {
        let (tx, mut rx) = mpsc::channel::<RegistryCommand>(64);
        tokio::spawn(async move {
            let mut jobs: HashMap<BatchJobId, BatchJobState> = HashMap::new();
            while let Some(command) = rx.recv().await {
                handle_command(&mut jobs, command, clock.as_ref());
            }
        });
        Self { tx }
    }

    async fn send(&self, command: RegistryCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| ButlerError::Internal("batch registry stopped".to_string()))
    }

    async fn ask<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(make(reply_tx)).await?;
        reply_rx
            .await
            .map_err(|_| ButlerError::Internal("batch registry dropped reply".to_string()))
    }

    pub async fn create(&self, job_id: BatchJobId, items: Vec<BatchItem>) -> Result<()> {
        self.send(RegistryCommand::Create { job_id, items }).await
    }

    pub async fn snapshot(&self, job_id: BatchJobId) -> Result<Option<BatchSnapshot>> {
        self.ask(|reply| RegistryCommand::Snapshot { job_id, reply }).await
    }

    pub async fn list(&self) -> Result<Vec<BatchSnapshot>> {
        self.ask(|reply| RegistryCommand::List { reply }).await
    }

    pub async fn cancel(&self, job_id: BatchJobId) -> Result<bool> {
        self.ask(|reply| RegistryCommand::Cancel { job_id, reply }).await
    }

    async fn is_cancelled(&self, job_id: BatchJobId) -> Result<bool> {
        self.ask(|reply| RegistryCommand::IsCancelled { job_id, reply }).await
    }

    async fn plan(&self, job_id: BatchJobId) -> Result<Option<Vec<BatchItem>>> {
        self.ask(|reply| RegistryCommand::Plan { job_id, reply }).await
    }
}

fn handle_command(
    jobs: &mut HashMap<BatchJobId, BatchJobState>,
    command: RegistryCommand,
    clock: &dyn Clock,
) {
    match command {
        RegistryCommand::Create { job_id, items } => {
            let outcomes = items
                .iter()
                .map(|item| (item.hash.clone(), FileOutcome::Pending))
                .collect();
            jobs.insert(
                job_id,
                BatchJobState {
                    items,
                    state: BatchState::Pending,
                    outcomes,
                    cancelled: false,
                    current: None,
                    started_at: None,
                    finished_at: None,
                },
            );
        }
        RegistryCommand::Start { job_id } => {
            if let Some(job) = jobs.get_mut(&job_id) {
                job.state = BatchState::Running;
                job.started_at = Some(clock.now_utc());
            }
        }
        RegistryCommand::MarkInProgress { job_id, hash } => {
            if let Some(job) = jobs.get_mut(&job_id) {
                job.current = Some(hash.clone());
                if let Some(slot) = job.outcomes.iter_mut().find(|(h, _)| *h == hash) {
                    slot.1 = FileOutcome::InProgress;
                }
            }
        }
        RegistryCommand::MarkDone {
            job_id,
            hash,
            outcome,
            reply,
        } => {
            let snapshot = jobs.get_mut(&job_id).map(|job| {
                if let Some(slot) = job.outcomes.iter_mut().find(|(h, _)| *h == hash) {
                    slot.1 = outcome;
                }
                if job.current.as_ref() == Some(&hash) {
                    job.current = None;
                }
                job.snapshot(job_id)
            });
            let _ = reply.send(snapshot);
        }
        RegistryCommand::Finish { job_id, reply } => {
            let snapshot = jobs.get_mut(&job_id).map(|job| {
                job.state = if job.cancelled {
                    BatchState::Cancelled
                } else {
                    BatchState::Completed
                };
                job.finished_at = Some(clock.now_utc());
                job.current = None;
                job.snapshot(job_id)
            });
            let _ = reply.send(snapshot);
        }
        RegistryCommand::Cancel { job_id, reply } => {
            let accepted = match jobs.get_mut(&job_id) {
                Some(job)
                    if matches!(job.state, BatchState::Pending | BatchState::Running) =>
                {
                    job.cancelled = true;
                    true
                }
                _ => false,
            };
            let _ = reply.send(accepted);
        }
        RegistryCommand::IsCancelled { job_id, reply } => {
            let cancelled = jobs.get(&job_id).map(|job| job.cancelled).unwrap_or(true);
            let _ = reply.send(cancelled);
        }
        RegistryCommand::Snapshot { job_id, reply } => {
            let _ = reply.send(jobs.get(&job_id).map(|job| job.snapshot(job_id)));
        }
        RegistryCommand::List { reply } => {
            let mut all: Vec<_> = jobs
                .iter()
                .map(|(job_id, job)| job.snapshot(*job_id))
                .collect();
            all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            let _ = reply.send(all);
        }
        RegistryCommand::Plan { job_id, reply } => {
            let _ = reply.send(jobs.get(&job_id).map(|job| job.items.clone()));
        }
    }
}

/// Accepts and validates batch requests; execution happens on the worker
/// pool via a `BATCH_ORGANIZE` job.
pub struct BatchOrchestrator {
    registry: BatchRegistry,
    store: Arc<Store>,
    fs: Arc<dyn FileSystem>,
    path_builder: Arc<PathBuilder>,
    queue: JobQueue,
    max_batch_size: usize,
}

impl std::fmt::Debug for BatchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOrchestrator")
            .field("max_batch_size", &self.max_batch_size)
            .finish()
    }
}

impl BatchOrchestrator {
    pub fn new(
        registry: BatchRegistry,
        store: Arc<Store>,
        fs: Arc<dyn FileSystem>,
        path_builder: Arc<PathBuilder>,
        queue: JobQueue,
        max_batch_size: usize,
    ) -> Self {
        Self {
            registry,
            store,
            fs,
            path_builder,
            queue,
            max_batch_size,
        }
    }

    /// Pre-flight a batch without executing anything.
    pub async fn validate(&self, request: &BatchRequest) -> Result<BatchValidation> {
        let mut problems = Vec::new();

        if request.items.is_empty() {
            problems.push("batch contains no files".to_string());
        }
        if request.items.len() > self.max_batch_size {
            problems.push(format!(
                "batch size {} exceeds the limit of {}",
                request.items.len(),
                self.max_batch_size
            ));
        }

        let mut required: u64 = 0;
        let mut planned_targets: HashMap<PathBuf, FileHash> = HashMap::new();
        let mut probe_path: Option<PathBuf> = None;

        for item in &request.items {
            let file = match self.store.get_file(&item.hash, false).await? {
                Some(file) => file,
                None => {
                    problems.push(format!("file {} is not tracked", item.hash));
                    continue;
                }
            };
            if !matches!(
                file.status,
                FileStatus::Classified | FileStatus::ReadyToMove
            ) {
                problems.push(format!(
                    "file {} is in state {} and cannot be organized",
                    item.hash, file.status
                ));
                continue;
            }
            required += required_space(file.file_size);

            let target = self.path_builder.render(&file, &item.category)?;
            probe_path.get_or_insert_with(|| target.clone());
            if let Some(other) = planned_targets.insert(target.clone(), item.hash.clone()) {
                problems.push(format!(
                    "files {other} and {} both resolve to {}",
                    item.hash,
                    target.display()
                ));
            }
        }

        let available_space = match &probe_path {
            Some(path) => self.fs.free_space(path).await.unwrap_or(0),
            None => 0,
        };
        if !request.items.is_empty() && available_space < required {
            problems.push(format!(
                "Insufficient disk space for batch: need {required} bytes, \
                 {available_space} available"
            ));
        }

        Ok(BatchValidation {
            problems,
            required_space: required,
            available_space,
        })
    }

    /// Validate, register, and enqueue a batch job.
    pub async fn submit(&self, request: BatchRequest) -> Result<BatchJobId> {
        if !self.queue.is_running() {
            return Err(ButlerError::Transient(
                "worker pool not running; batch organization unavailable".to_string(),
            ));
        }

        let validation = self.validate(&request).await?;
        if !validation.is_ok() {
            return Err(ButlerError::Validation(validation.problems.join("; ")));
        }

        let job_id = BatchJobId::new();
        self.registry.create(job_id, request.items).await?;
        self.queue
            .enqueue(Job::new(JobPayload::BatchOrganize { job_id }))
            .await?;
        info!(job_id = %job_id, "batch submitted");
        Ok(job_id)
    }

    pub async fn status(&self, job_id: BatchJobId) -> Result<BatchSnapshot> {
        self.registry
            .snapshot(job_id)
            .await?
            .ok_or_else(|| ButlerError::NotFound(format!("batch job {job_id}")))
    }

    pub async fn list(&self) -> Result<Vec<BatchSnapshot>> {
        self.registry.list().await
    }

    /// Request cancellation: the in-flight file completes, nothing further
    /// starts.
    pub async fn cancel(&self, job_id: BatchJobId) -> Result<bool> {
        let accepted = self.registry.cancel(job_id).await?;
        if accepted {
            info!(job_id = %job_id, "batch cancellation requested");
        }
        Ok(accepted)
    }
}

/// Executes a batch job on a worker. Separated from the orchestrator so
/// the worker pool does not depend on the submission surface.
pub struct BatchExecutor {
    registry: BatchRegistry,
    organizer: Arc<Organizer>,
    store: Arc<Store>,
    max_concurrency: usize,
}

impl std::fmt::Debug for BatchExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchExecutor")
            .field("max_concurrency", &self.max_concurrency)
            .finish()
    }
}

impl BatchExecutor {
    pub fn new(
        registry: BatchRegistry,
        organizer: Arc<Organizer>,
        store: Arc<Store>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            registry,
            organizer,
            store,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub async fn run(&self, job_id: BatchJobId) -> Result<()> {
        let items = self
            .registry
            .plan(job_id)
            .await?
            .ok_or_else(|| ButlerError::NotFound(format!("batch job {job_id}")))?;

        let started = Instant::now();
        self.registry.send(RegistryCommand::Start { job_id }).await?;
        self.store
            .events()
            .publish(DomainEvent::BatchStarted {
                job_id,
                total: items.len(),
            })
            .await;

        futures::stream::iter(items)
            .map(|item| self.run_item(job_id, item))
            .buffer_unordered(self.max_concurrency)
            .collect::<Vec<_>>()
            .await;

        let snapshot = self
            .registry
            .ask(|reply| RegistryCommand::Finish { job_id, reply })
            .await?
            .ok_or_else(|| ButlerError::NotFound(format!("batch job {job_id}")))?;

        self.store
            .events()
            .publish(DomainEvent::BatchCompleted {
                job_id,
                success: snapshot.completed,
                failed: snapshot.failed,
                duration_ms: started.elapsed().as_millis() as i64,
            })
            .await;
        info!(
            job_id = %job_id,
            completed = snapshot.completed,
            failed = snapshot.failed,
            cancelled_remaining = snapshot.cancelled_remaining,
            "batch finished"
        );
        Ok(())
    }

    async fn run_item(&self, job_id: BatchJobId, item: BatchItem) {
        // Cancellation gate: the check sits between files, so whatever is
        // already organizing finishes cleanly.
        let cancelled = self.registry.is_cancelled(job_id).await.unwrap_or(true);
        let outcome = if cancelled {
            FileOutcome::Skipped
        } else {
            let _ = self
                .registry
                .send(RegistryCommand::MarkInProgress {
                    job_id,
                    hash: item.hash.clone(),
                })
                .await;
            match self.organizer.organize(&item.hash, &item.category).await {
                Ok(OrganizeOutcome::Success(_)) => FileOutcome::Completed,
                Ok(OrganizeOutcome::Failed { classification, .. }) => {
                    FileOutcome::Failed(classification.user_message)
                }
                Err(err) => {
                    warn!(hash = %item.hash, error = %err, "batch item rejected");
                    FileOutcome::Failed(err.to_string())
                }
            }
        };

        let snapshot = self
            .registry
            .ask(|reply| RegistryCommand::MarkDone {
                job_id,
                hash: item.hash.clone(),
                outcome,
                reply,
            })
            .await
            .ok()
            .flatten();

        if let Some(snapshot) = snapshot {
            self.store
                .events()
                .publish(DomainEvent::BatchProgress {
                    job_id,
                    completed: snapshot.completed,
                    failed: snapshot.failed,
                    current: snapshot.current,
                })
                .await;
        }
    }
}
