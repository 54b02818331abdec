//! Batch orchestration: validation, execution, progress, cancellation.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use mediabutler_core::batch::{
    BatchExecutor, BatchItem, BatchOrchestrator, BatchRegistry, BatchRequest, BatchState,
};
use mediabutler_core::clock::SystemClock;
use mediabutler_core::events::DomainEvent;
use mediabutler_core::fsx::FileSystem;
use mediabutler_core::queue::{JobPayload, JobQueue};
use mediabutler_model::{FileHash, FileStatus};

use common::{TestContext, context, seed_and_register, stage_ready};

struct BatchHarness {
    ctx: TestContext,
    orchestrator: BatchOrchestrator,
    executor: BatchExecutor,
    queue: JobQueue,
    queue_rx: tokio::sync::mpsc::Receiver<mediabutler_core::queue::Job>,
}

async fn harness() -> BatchHarness {
    let ctx = context().await;
    let (queue, queue_rx) = JobQueue::new(32, false);
    let registry = BatchRegistry::spawn(Arc::new(SystemClock));
    let orchestrator = BatchOrchestrator::new(
        registry.clone(),
        Arc::clone(&ctx.store),
        Arc::clone(&ctx.fs) as Arc<dyn FileSystem>,
        Arc::clone(&ctx.path_builder),
        queue.clone(),
        5,
    );
    let executor = BatchExecutor::new(
        registry,
        Arc::clone(&ctx.organizer),
        Arc::clone(&ctx.store),
        2,
    );
    BatchHarness {
        ctx,
        orchestrator,
        executor,
        queue,
        queue_rx,
    }
}

fn items(pairs: &[(&FileHash, &str)]) -> Vec<BatchItem> {
    pairs
        .iter()
        .map(|(hash, category)| BatchItem {
            hash: (*hash).clone(),
            category: category.to_string(),
        })
        .collect()
}

#[tokio::test]
async fn validation_rejects_untracked_ineligible_and_colliding_files() {
    let h = harness().await;
    let ready = stage_ready(&h.ctx, "/watch/a/ep.mkv", b"a", "FRIENDS").await;
    // Same filename and category from another folder: same target path.
    let colliding = stage_ready(&h.ctx, "/watch/b/ep.mkv", b"b", "FRIENDS").await;
    // NEW file, not yet eligible.
    let fresh = seed_and_register(&h.ctx, "/watch/new.mkv", b"n").await.hash;
    let untracked = FileHash::from_digest("5".repeat(64));

    let validation = h
        .orchestrator
        .validate(&BatchRequest {
            items: items(&[
                (&ready, "FRIENDS"),
                (&colliding, "FRIENDS"),
                (&fresh, "FRIENDS"),
                (&untracked, "FRIENDS"),
            ]),
        })
        .await
        .unwrap();

    assert!(!validation.is_ok());
    assert!(validation.problems.iter().any(|p| p.contains("not tracked")));
    assert!(validation.problems.iter().any(|p| p.contains("state NEW")));
    assert!(validation.problems.iter().any(|p| p.contains("both resolve to")));
}

#[tokio::test]
async fn oversized_batches_are_rejected() {
    let h = harness().await;
    let mut batch_items = Vec::new();
    for index in 0..6 {
        let hash = stage_ready(
            &h.ctx,
            &format!("/watch/show{index}.mkv"),
            format!("bytes {index}").as_bytes(),
            "SHOW",
        )
        .await;
        batch_items.push(BatchItem {
            hash,
            category: "SHOW".to_string(),
        });
    }

    let validation = h
        .orchestrator
        .validate(&BatchRequest { items: batch_items })
        .await
        .unwrap();
    assert!(validation.problems.iter().any(|p| p.contains("exceeds the limit")));
}

#[tokio::test]
async fn submit_enqueues_one_batch_job_and_run_completes_it() {
    let mut h = harness().await;
    let mut events = h.ctx.bus.subscribe();

    let a = stage_ready(&h.ctx, "/watch/Dark.S01E01.mkv", b"d1", "DARK").await;
    let b = stage_ready(&h.ctx, "/watch/Dark.S01E02.mkv", b"d2", "DARK").await;
    let c = stage_ready(&h.ctx, "/watch/Dark.S01E03.mkv", b"d3", "DARK").await;

    let job_id = h
        .orchestrator
        .submit(BatchRequest {
            items: items(&[(&a, "DARK"), (&b, "DARK"), (&c, "DARK")]),
        })
        .await
        .unwrap();

    let job = h.queue_rx.recv().await.unwrap();
    assert_eq!(job.payload, JobPayload::BatchOrganize { job_id });

    h.executor.run(job_id).await.unwrap();

    let snapshot = h.orchestrator.status(job_id).await.unwrap();
    assert_eq!(snapshot.state, BatchState::Completed);
    assert_eq!(snapshot.total, 3);
    assert_eq!(snapshot.completed, 3);
    assert_eq!(snapshot.failed, 0);
    assert_eq!(snapshot.cancelled_remaining, 0);

    for hash in [&a, &b, &c] {
        let file = h.ctx.store.require_file(hash).await.unwrap();
        assert_eq!(file.status, FileStatus::Moved);
    }
    assert!(h.ctx.fs.contents(Path::new("/library/DARK/Dark.S01E01.mkv")).is_some());

    // Event stream: started, at least one progress, completed.
    let mut saw_started = false;
    let mut saw_progress = false;
    let mut saw_completed = false;
    while let Ok(Ok(event)) =
        tokio::time::timeout(Duration::from_millis(200), events.recv()).await
    {
        match event {
            DomainEvent::BatchStarted { total, .. } => {
                saw_started = true;
                assert_eq!(total, 3);
            }
            DomainEvent::BatchProgress { .. } => saw_progress = true,
            DomainEvent::BatchCompleted { success, failed, .. } => {
                saw_completed = true;
                assert_eq!(success, 3);
                assert_eq!(failed, 0);
            }
            _ => {}
        }
        if saw_completed {
            break;
        }
    }
    assert!(saw_started && saw_progress && saw_completed);
}

#[tokio::test]
async fn cancelled_batches_skip_unstarted_files() {
    let h = harness().await;
    let a = stage_ready(&h.ctx, "/watch/a.mkv", b"a", "SHOW").await;
    let b = stage_ready(&h.ctx, "/watch/b.mkv", b"b", "SHOW").await;

    let job_id = h
        .orchestrator
        .submit(BatchRequest {
            items: items(&[(&a, "SHOW"), (&b, "SHOW")]),
        })
        .await
        .unwrap();

    // Cancel before the worker gets to it.
    assert!(h.orchestrator.cancel(job_id).await.unwrap());
    h.executor.run(job_id).await.unwrap();

    let snapshot = h.orchestrator.status(job_id).await.unwrap();
    assert_eq!(snapshot.state, BatchState::Cancelled);
    assert_eq!(snapshot.completed, 0);
    assert_eq!(snapshot.cancelled_remaining, 2);

    // Nothing moved, nothing stuck at MOVING.
    for hash in [&a, &b] {
        let file = h.ctx.store.require_file(hash).await.unwrap();
        assert_eq!(file.status, FileStatus::ReadyToMove);
    }
}

#[tokio::test]
async fn partial_failures_are_isolated_per_file() {
    let mut h = harness().await;
    let good = stage_ready(&h.ctx, "/watch/good.mkv", b"g", "SHOW").await;
    let doomed = stage_ready(&h.ctx, "/watch/doomed.mkv", b"d", "SHOW").await;
    // Remove the doomed file from disk after staging.
    h.ctx.fs.remove_file(Path::new("/watch/doomed.mkv")).await.unwrap();

    let job_id = h
        .orchestrator
        .submit(BatchRequest {
            items: items(&[(&good, "SHOW"), (&doomed, "SHOW")]),
        })
        .await
        .unwrap();
    let _ = h.queue_rx.recv().await;

    h.executor.run(job_id).await.unwrap();

    let snapshot = h.orchestrator.status(job_id).await.unwrap();
    assert_eq!(snapshot.state, BatchState::Completed);
    assert_eq!(snapshot.completed, 1);
    assert_eq!(snapshot.failed, 1);

    assert_eq!(
        h.ctx.store.require_file(&good).await.unwrap().status,
        FileStatus::Moved
    );
    assert_eq!(
        h.ctx.store.require_file(&doomed).await.unwrap().status,
        FileStatus::Error
    );
}

#[tokio::test]
async fn submission_requires_a_running_worker_pool() {
    let h = harness().await;
    let hash = stage_ready(&h.ctx, "/watch/ep.mkv", b"e", "SHOW").await;
    h.queue.begin_drain();

    let err = h
        .orchestrator
        .submit(BatchRequest {
            items: items(&[(&hash, "SHOW")]),
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("worker pool not running"));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn status_of_an_unknown_job_is_not_found() {
    let h = harness().await;
    let missing = mediabutler_model::BatchJobId::new();
    let err = h.orchestrator.status(missing).await.unwrap_err();
    assert_eq!(err.kind(), mediabutler_core::ErrorKind::NotFound);
}
