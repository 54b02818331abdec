//! Explicit composition of the pipeline. The one place object graphs are
//! wired together; everything else takes its collaborators as arguments.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use mediabutler_config::ButlerConfig;

use crate::batch::{BatchExecutor, BatchOrchestrator, BatchRegistry};
use crate::classify::Classifier;
use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::events::InProcEventBus;
use crate::fsx::{FileSystem, TokioFs};
use crate::organize::Organizer;
use crate::pathing::PathBuilder;
use crate::queue::{JobQueue, WorkerDeps, WorkerPool};
use crate::recovery::{ErrorClassifier, RollbackService};
use crate::service::FileService;
use crate::store::Store;
use crate::watch::{WatcherHandle, WatcherService};

/// A fully wired pipeline. Handles are cheap clones over shared state;
/// the worker pool and watcher own their background tasks.
pub struct Pipeline {
    pub store: Arc<Store>,
    pub service: Arc<FileService>,
    pub organizer: Arc<Organizer>,
    pub rollback: Arc<RollbackService>,
    pub batch: Arc<BatchOrchestrator>,
    pub queue: JobQueue,
    pub events: Arc<InProcEventBus>,
    workers: WorkerPool,
    watcher: Option<WatcherHandle>,
    shutdown_grace: Duration,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("workers", &self.workers.worker_count())
            .field("watching", &self.watcher.is_some())
            .finish()
    }
}

impl Pipeline {
    /// Build and start every component from the loaded configuration.
    /// `start_watcher` is off for one-shot tools that only need the API
    /// surface.
    pub async fn start(
        config: &ButlerConfig,
        classifier: Arc<dyn Classifier>,
        start_watcher: bool,
    ) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let fs: Arc<dyn FileSystem> = Arc::new(TokioFs);
        let events = Arc::new(InProcEventBus::new(256));

        let store = Arc::new(
            Store::open(
                &config.paths.database_path,
                Arc::clone(&clock),
                Arc::clone(&events) as Arc<dyn crate::events::EventSink>,
            )
            .await?,
        );

        let path_builder = Arc::new(PathBuilder::new(
            Arc::clone(&fs),
            Arc::clone(&clock),
            config.paths.library_root.clone(),
        ));

        let service = Arc::new(FileService::new(
            Arc::clone(&store),
            Arc::clone(&fs),
            Arc::clone(&path_builder),
            config.classification.auto_threshold,
            config.classification.suggest_threshold,
            config.retries.max_retry,
        ));

        // Crash recovery before any worker can observe a stale MOVING row.
        let recovered = service.recover_interrupted_moves().await?;
        if recovered > 0 {
            info!(recovered, "recovered files stranded mid-move");
        }

        let rollback = Arc::new(RollbackService::new(Arc::clone(&store), Arc::clone(&fs)));
        let errors = ErrorClassifier::new(
            config.retries.retry_delays_ms.clone(),
            config.retries.max_retry,
        );

        let organizer = Arc::new(Organizer::new(
            Arc::clone(&store),
            Arc::clone(&fs),
            Arc::clone(&path_builder),
            Arc::clone(&rollback),
            errors.clone(),
            Arc::clone(&service),
        ));

        let (queue, queue_rx) = JobQueue::new(
            config.retries.queue_capacity,
            config.retries.queue_block_when_full,
        );

        let registry = BatchRegistry::spawn(Arc::clone(&clock));
        let batch = Arc::new(BatchOrchestrator::new(
            registry.clone(),
            Arc::clone(&store),
            Arc::clone(&fs),
            Arc::clone(&path_builder),
            queue.clone(),
            config.retries.max_batch_size,
        ));
        let batch_executor = Arc::new(BatchExecutor::new(
            registry,
            Arc::clone(&organizer),
            Arc::clone(&store),
            config.retries.max_batch_concurrency,
        ));

        let workers = WorkerPool::spawn(
            config.retries.worker_count,
            queue_rx,
            Arc::new(WorkerDeps {
                store: Arc::clone(&store),
                service: Arc::clone(&service),
                organizer: Arc::clone(&organizer),
                classifier,
                errors,
                batch: batch_executor,
                queue: queue.clone(),
                max_classification_ms: config.classification.max_classification_ms,
                max_retry: config.retries.max_retry,
            }),
        );

        let watcher = if start_watcher {
            let watcher = WatcherService::new(
                config.discovery.clone(),
                config.paths.watch_folders.clone(),
                Arc::clone(&fs),
                Arc::clone(&store),
                Arc::clone(&service),
                queue.clone(),
            );
            Some(watcher.start()?)
        } else {
            None
        };

        Ok(Self {
            store,
            service,
            organizer,
            rollback,
            batch,
            queue,
            events,
            workers,
            watcher,
            shutdown_grace: Duration::from_secs(config.retries.shutdown_timeout_seconds),
        })
    }

    /// Graceful stop: no new discoveries, drain the queue, then wait out
    /// the grace period before aborting stragglers.
    pub async fn shutdown(self) {
        if let Some(watcher) = self.watcher {
            watcher.shutdown().await;
        }
        self.queue.begin_drain();
        self.workers.shutdown(self.shutdown_grace).await;
        info!("pipeline stopped");
    }
}
