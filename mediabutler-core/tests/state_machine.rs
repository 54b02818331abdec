//! Lifecycle tests for the tracked-file state machine and the store
//! underneath it.

mod common;

use std::path::Path;

use chrono::{Duration, Utc};
use mediabutler_core::ErrorKind;
use mediabutler_model::{FileStatus, TrackedFile};

use common::{context, seed_and_register, stage_classified, stage_ready};

#[tokio::test]
async fn happy_path_reaches_moved_with_all_fields() {
    let ctx = context().await;
    let hash = stage_ready(
        &ctx,
        "/watch/The.Walking.Dead.S11E24.FINAL.ITA.ENG.1080p.mkv",
        b"walking dead finale",
        "THE WALKING DEAD",
    )
    .await;

    let staged = ctx.store.require_file(&hash).await.unwrap();
    assert_eq!(staged.status, FileStatus::ReadyToMove);
    assert!(staged.classified_at.is_some());
    assert_eq!(staged.category.as_deref(), Some("THE WALKING DEAD"));
    assert_eq!(
        staged.target_path.as_deref(),
        Some(Path::new(
            "/library/THE WALKING DEAD/The.Walking.Dead.S11E24.FINAL.ITA.ENG.1080p.mkv"
        ))
    );

    ctx.service.begin_move(&hash).await.unwrap();
    let moved = ctx
        .service
        .mark_moved(&hash, staged.target_path.as_deref().unwrap())
        .await
        .unwrap();
    assert_eq!(moved.status, FileStatus::Moved);
    assert!(moved.moved_at.is_some());
    assert_eq!(moved.moved_to_path, staged.target_path);
}

#[tokio::test]
async fn same_content_registers_exactly_once() {
    let ctx = context().await;
    let first = seed_and_register(&ctx, "/watch/a/ep.mkv", b"same bytes").await;
    // Same path again.
    let again = ctx.service.register(Path::new("/watch/a/ep.mkv")).await.unwrap();
    assert_eq!(again.hash, first.hash);

    // Same content at a different path: still one row, the original.
    let elsewhere = seed_and_register(&ctx, "/watch/b/copy.mkv", b"same bytes").await;
    assert_eq!(elsewhere.hash, first.hash);
    assert_eq!(elsewhere.original_path, first.original_path);

    let page = ctx.store.list_files(0, 100, None, None).await.unwrap();
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn transitions_outside_the_graph_are_rejected() {
    let ctx = context().await;
    let file = seed_and_register(&ctx, "/watch/ep.mkv", b"bytes").await;
    let hash = file.hash.clone();

    // NEW cannot confirm or move.
    let err = ctx.service.confirm(&hash, "SHOW").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalTransition);
    let err = ctx.service.begin_move(&hash).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalTransition);
    let err = ctx
        .service
        .mark_moved(&hash, Path::new("/library/S/ep.mkv"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalTransition);

    // NEW cannot reset either; nothing to reset.
    let err = ctx.service.reset_error(&hash).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalTransition);
}

#[tokio::test]
async fn moved_files_cannot_be_ignored() {
    let ctx = context().await;
    let hash = stage_ready(&ctx, "/watch/ep.mkv", b"bytes", "SHOW").await;
    ctx.service.begin_move(&hash).await.unwrap();
    ctx.service
        .mark_moved(&hash, Path::new("/library/SHOW/ep.mkv"))
        .await
        .unwrap();

    let err = ctx.service.ignore(&hash).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalTransition);
}

#[tokio::test]
async fn retry_budget_is_bounded_and_resettable() {
    let ctx = context().await;
    let hash = stage_ready(&ctx, "/watch/ep.mkv", b"bytes", "SHOW").await;
    ctx.service.begin_move(&hash).await.unwrap();

    let after1 = ctx
        .service
        .record_error(&hash, "disk hiccup", None, false)
        .await
        .unwrap();
    assert_eq!(after1.status, FileStatus::Retry);
    assert_eq!(after1.retry_count, 1);

    let after2 = ctx
        .service
        .record_error(&hash, "disk hiccup", None, false)
        .await
        .unwrap();
    assert_eq!(after2.status, FileStatus::Retry);
    assert_eq!(after2.retry_count, 2);

    let after3 = ctx
        .service
        .record_error(&hash, "disk hiccup", None, false)
        .await
        .unwrap();
    assert_eq!(after3.status, FileStatus::Error);
    assert_eq!(after3.retry_count, 3);

    // Budget spent: further errors are no-ops.
    let after4 = ctx
        .service
        .record_error(&hash, "disk hiccup", None, false)
        .await
        .unwrap();
    assert_eq!(after4.status, FileStatus::Error);
    assert_eq!(after4.retry_count, 3);

    let reset = ctx.service.reset_error(&hash).await.unwrap();
    assert_eq!(reset.status, FileStatus::New);
    assert_eq!(reset.retry_count, 0);
    assert!(reset.last_error.is_none());
}

#[tokio::test]
async fn fatal_errors_park_at_error_immediately() {
    let ctx = context().await;
    let hash = stage_ready(&ctx, "/watch/ep.mkv", b"bytes", "SHOW").await;
    ctx.service.begin_move(&hash).await.unwrap();

    let parked = ctx
        .service
        .record_error(&hash, "permission denied", None, true)
        .await
        .unwrap();
    assert_eq!(parked.status, FileStatus::Error);
    assert_eq!(parked.retry_count, 1);
}

#[tokio::test]
async fn low_confidence_collapses_suggestion_to_unknown() {
    let ctx = context().await;
    let file = seed_and_register(&ctx, "/watch/obscure.mkv", b"bytes").await;
    let hash = file.hash.clone();
    ctx.service.begin_processing(&hash).await.unwrap();
    let classified = ctx
        .service
        .update_classification(&hash, "MAYBE SHOW", 0.2)
        .await
        .unwrap();
    assert_eq!(classified.status, FileStatus::Classified);
    assert_eq!(classified.suggested_category.as_deref(), Some("UNKNOWN"));
    assert_eq!(classified.confidence, Some(0.2));
}

#[tokio::test]
async fn out_of_range_confidence_is_rejected() {
    let ctx = context().await;
    let file = seed_and_register(&ctx, "/watch/ep.mkv", b"bytes").await;
    let err = ctx
        .service
        .update_classification(&file.hash, "SHOW", 1.5)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn soft_deleted_rows_leave_default_reads() {
    let ctx = context().await;
    let file = seed_and_register(&ctx, "/watch/ep.mkv", b"bytes").await;
    let hash = file.hash.clone();

    ctx.service.soft_delete(&hash, "user removed").await.unwrap();

    assert!(ctx.store.get_file(&hash, false).await.unwrap().is_none());
    let inactive = ctx.store.get_file(&hash, true).await.unwrap().unwrap();
    assert!(!inactive.audit.active);
    assert_eq!(inactive.audit.note.as_deref(), Some("user removed"));
}

#[tokio::test]
async fn search_list_and_categories_work_over_live_rows() {
    let ctx = context().await;
    stage_ready(&ctx, "/watch/Friends.S01E01.mkv", b"f1", "FRIENDS").await;
    stage_ready(&ctx, "/watch/Friends.S01E02.mkv", b"f2", "FRIENDS").await;
    stage_ready(&ctx, "/watch/Dark.S01E01.mkv", b"d1", "DARK").await;

    let hits = ctx.store.search_files("Friends%").await.unwrap();
    assert_eq!(hits.len(), 2);

    let page = ctx
        .store
        .list_files(0, 10, Some(&[FileStatus::ReadyToMove]), Some("DARK"))
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].file_name, "Dark.S01E01.mkv");

    let categories = ctx.store.distinct_categories().await.unwrap();
    assert_eq!(categories, vec!["DARK".to_string(), "FRIENDS".to_string()]);

    // Paging: one row per page.
    let first = ctx.store.list_files(0, 1, None, None).await.unwrap();
    assert_eq!(first.items.len(), 1);
    assert_eq!(first.total, 3);
    let second = ctx.store.list_files(1, 1, None, None).await.unwrap();
    assert_eq!(second.items.len(), 1);
    assert_ne!(first.items[0].hash, second.items[0].hash);
}

#[tokio::test]
async fn stale_writers_get_a_conflict() {
    let ctx = context().await;
    let file = seed_and_register(&ctx, "/watch/ep.mkv", b"bytes").await;

    // Two copies of the same version.
    let mut copy_a = ctx.store.require_file(&file.hash).await.unwrap();
    let mut copy_b = ctx.store.require_file(&file.hash).await.unwrap();

    let mut scope = ctx.store.scope().await.unwrap();
    copy_a.status = FileStatus::Processing;
    scope.update_tracked_file(&mut copy_a).await.unwrap();
    scope.commit().await.unwrap();

    let mut scope = ctx.store.scope().await.unwrap();
    copy_b.status = FileStatus::Ignored;
    let err = scope.update_tracked_file(&mut copy_b).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    scope.rollback().await.unwrap();
}

#[tokio::test]
async fn injected_timestamps_survive_the_stamping_rule() {
    let ctx = context().await;
    let old = Utc::now() - Duration::days(30);
    let mut file = TrackedFile::new(
        mediabutler_model::FileHash::from_digest("7".repeat(64)),
        "/watch/old.mkv".into(),
        10,
        old,
    );

    let mut scope = ctx.store.scope().await.unwrap();
    scope.insert_tracked_file(&mut file).await.unwrap();
    scope.commit().await.unwrap();

    let read_back = ctx.store.require_file(&file.hash).await.unwrap();
    assert!((read_back.audit.created_at - old).num_seconds().abs() < 1);

    // A freshly stamped row gets "now" instead.
    let fresh = seed_and_register(&ctx, "/watch/new.mkv", b"n").await;
    assert!((fresh.audit.created_at - Utc::now()).num_seconds().abs() < 5);
}

#[tokio::test]
async fn every_operation_leaves_a_log_entry() {
    let ctx = context().await;
    let hash = stage_ready(&ctx, "/watch/ep.mkv", b"bytes", "SHOW").await;

    let logs = ctx.store.logs_for_file(&hash).await.unwrap();
    // register + begin_processing + classification + confirm.
    assert!(logs.len() >= 4);
    assert!(logs.iter().all(|log| log.file_hash == hash));

    let organization = ctx
        .store
        .logs_by_category(&hash, "ORGANIZATION")
        .await
        .unwrap();
    assert_eq!(organization.len(), 1);
}

#[tokio::test]
async fn recover_interrupted_moves_resets_moving_rows() {
    let ctx = context().await;
    let hash = stage_ready(&ctx, "/watch/ep.mkv", b"bytes", "SHOW").await;
    ctx.service.begin_move(&hash).await.unwrap();

    let recovered = ctx.service.recover_interrupted_moves().await.unwrap();
    assert_eq!(recovered, 1);
    let file = ctx.store.require_file(&hash).await.unwrap();
    assert_eq!(file.status, FileStatus::ReadyToMove);
}

#[tokio::test]
async fn classified_files_can_be_staged_separately() {
    let ctx = context().await;
    let hash = stage_classified(&ctx, "/watch/ep.mkv", b"bytes", "SHOW").await;
    let file = ctx.store.require_file(&hash).await.unwrap();
    assert_eq!(file.status, FileStatus::Classified);
    assert_eq!(file.suggested_category.as_deref(), Some("SHOW"));
    assert!(file.category.is_none());
}
