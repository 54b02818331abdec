//! State-machine operations on tracked files.
//!
//! Every operation is one unit-of-work commit and appends one processing
//! log entry. Transitions outside the lifecycle graph are rejected with
//! `ILLEGAL_TRANSITION`; commit conflicts are retried once before they
//! surface.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use mediabutler_model::{FileHash, FileStatus, LogLevel, ProcessingLog, TrackedFile};

use crate::classify::{self, SuggestionStrength, UNKNOWN_CATEGORY};
use crate::error::{ButlerError, ErrorKind, Result};
use crate::events::DomainEvent;
use crate::fsx::{self, FileSystem};
use crate::pathing::PathBuilder;
use crate::store::Store;

pub const LOG_DISCOVERY: &str = "FILE_DISCOVERY";
pub const LOG_CLASSIFICATION: &str = "FILE_CLASSIFICATION";
pub const LOG_ORGANIZATION: &str = "FILE_ORGANIZATION";
pub const LOG_ERROR_HANDLING: &str = "ERROR_HANDLING";

pub struct FileService {
    store: Arc<Store>,
    fs: Arc<dyn FileSystem>,
    path_builder: Arc<PathBuilder>,
    auto_threshold: f64,
    suggest_threshold: f64,
    max_retry: u32,
}

impl std::fmt::Debug for FileService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileService")
            .field("max_retry", &self.max_retry)
            .finish()
    }
}

fn illegal(hash: &FileHash, from: FileStatus, to: FileStatus) -> ButlerError {
    ButlerError::IllegalTransition {
        hash: hash.to_string(),
        from: from.as_str().to_string(),
        to: to.as_str().to_string(),
    }
}

fn ensure_transition(
    hash: &FileHash,
    from: FileStatus,
    allowed: &[FileStatus],
    to: FileStatus,
) -> Result<()> {
    if allowed.contains(&from) {
        Ok(())
    } else {
        Err(illegal(hash, from, to))
    }
}

impl FileService {
    pub fn new(
        store: Arc<Store>,
        fs: Arc<dyn FileSystem>,
        path_builder: Arc<PathBuilder>,
        auto_threshold: f64,
        suggest_threshold: f64,
        max_retry: u32,
    ) -> Self {
        Self {
            store,
            fs,
            path_builder,
            auto_threshold,
            suggest_threshold,
            max_retry,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn max_retry(&self) -> u32 {
        self.max_retry
    }

    /// Register a discovered file. Content hash is the identity: a path
    /// already tracked under the same hash returns the existing row
    /// unchanged.
    pub async fn register(&self, path: &Path) -> Result<TrackedFile> {
        let hash = fsx::hash_file(self.fs.as_ref(), path).await?;
        let size = self.fs.stat(path).await?.len;

        if let Some(existing) = self.store.get_file(&hash, false).await? {
            return Ok(existing);
        }

        let mut file = TrackedFile::new(
            hash.clone(),
            path.to_path_buf(),
            size,
            self.store.clock().now_utc(),
        );

        let mut scope = self.store.scope().await?;
        let insert = scope.insert_tracked_file(&mut file).await;
        match insert {
            Ok(()) => {
                scope
                    .append_log(&ProcessingLog::entry(
                        hash.clone(),
                        LogLevel::Info,
                        LOG_DISCOVERY,
                        format!("registered {}", path.display()),
                    ))
                    .await?;
                scope.queue_event(DomainEvent::FileDiscovered { hash: hash.clone() });
                scope.commit().await?;
                info!(hash = %hash, path = %path.display(), "file registered");
                Ok(file)
            }
            Err(ButlerError::Database(sqlx::Error::Database(db_err)))
                if db_err.is_unique_violation() =>
            {
                // Lost a registration race; the winner's row is the answer.
                scope.rollback().await?;
                self.store.require_file(&hash).await
            }
            Err(other) => Err(other),
        }
    }

    /// NEW/RETRY -> PROCESSING, claiming the file for a classification
    /// attempt.
    pub async fn begin_processing(&self, hash: &FileHash) -> Result<TrackedFile> {
        self.retry_conflict_once(|| self.begin_processing_inner(hash))
            .await
    }

    async fn begin_processing_inner(&self, hash: &FileHash) -> Result<TrackedFile> {
        let mut scope = self.store.scope().await?;
        let mut file = scope.require_tracked_file(hash).await?;
        ensure_transition(
            hash,
            file.status,
            &[FileStatus::New, FileStatus::Retry],
            FileStatus::Processing,
        )?;
        file.status = FileStatus::Processing;
        scope.update_tracked_file(&mut file).await?;
        scope
            .append_log(&ProcessingLog::entry(
                hash.clone(),
                LogLevel::Info,
                LOG_CLASSIFICATION,
                "classification started",
            ))
            .await?;
        scope.commit().await?;
        Ok(file)
    }

    /// NEW/PROCESSING -> CLASSIFIED with the classifier verdict applied
    /// through the confidence gates.
    pub async fn update_classification(
        &self,
        hash: &FileHash,
        category: &str,
        confidence: f64,
    ) -> Result<TrackedFile> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ButlerError::Validation(format!(
                "confidence {confidence} outside [0, 1]"
            )));
        }
        self.retry_conflict_once(|| self.update_classification_inner(hash, category, confidence))
            .await
    }

    async fn update_classification_inner(
        &self,
        hash: &FileHash,
        category: &str,
        confidence: f64,
    ) -> Result<TrackedFile> {
        let mut scope = self.store.scope().await?;
        let mut file = scope.require_tracked_file(hash).await?;
        ensure_transition(
            hash,
            file.status,
            &[FileStatus::New, FileStatus::Processing],
            FileStatus::Classified,
        )?;

        let strength = classify::interpret_confidence(
            confidence,
            self.auto_threshold,
            self.suggest_threshold,
        );
        let suggested = match strength {
            SuggestionStrength::Insufficient => UNKNOWN_CATEGORY.to_string(),
            _ => category.to_string(),
        };

        file.status = FileStatus::Classified;
        file.suggested_category = Some(suggested.clone());
        file.confidence = Some(confidence);
        file.classified_at = Some(self.store.clock().now_utc());
        scope.update_tracked_file(&mut file).await?;
        scope
            .append_log(
                &ProcessingLog::entry(
                    hash.clone(),
                    LogLevel::Info,
                    LOG_CLASSIFICATION,
                    format!("classified as {suggested} ({confidence:.2})"),
                )
                .with_details(serde_json::json!({
                    "category": suggested,
                    "confidence": confidence,
                })),
            )
            .await?;
        scope.queue_event(DomainEvent::ClassificationCompleted {
            hash: hash.clone(),
            category: suggested,
            confidence,
        });
        scope.commit().await?;
        Ok(file)
    }

    /// CLASSIFIED -> READY_TO_MOVE with the user-confirmed category and a
    /// freshly planned target path. A path-planning failure aborts the
    /// whole transition.
    pub async fn confirm(&self, hash: &FileHash, category: &str) -> Result<TrackedFile> {
        if category.trim().is_empty() {
            return Err(ButlerError::Validation("category must not be empty".into()));
        }
        self.retry_conflict_once(|| self.confirm_inner(hash, category))
            .await
    }

    async fn confirm_inner(&self, hash: &FileHash, category: &str) -> Result<TrackedFile> {
        let mut scope = self.store.scope().await?;
        let mut file = scope.require_tracked_file(hash).await?;
        ensure_transition(
            hash,
            file.status,
            &[FileStatus::Classified],
            FileStatus::ReadyToMove,
        )?;

        let planned = self.path_builder.build(&file, category).await?;
        if !planned.report.is_ok() {
            return Err(ButlerError::Path(planned.report.errors.join("; ")));
        }

        file.status = FileStatus::ReadyToMove;
        file.category = Some(category.to_string());
        file.target_path = Some(planned.target.clone());
        scope.update_tracked_file(&mut file).await?;
        scope
            .append_log(&ProcessingLog::entry(
                hash.clone(),
                LogLevel::Info,
                LOG_ORGANIZATION,
                format!("confirmed {category}, target {}", planned.target.display()),
            ))
            .await?;
        scope.commit().await?;
        Ok(file)
    }

    /// READY_TO_MOVE/RETRY -> MOVING, claiming the file for a move
    /// attempt. RETRY is accepted so a transient move failure resumes
    /// without a full reclassification pass.
    pub async fn begin_move(&self, hash: &FileHash) -> Result<TrackedFile> {
        self.retry_conflict_once(|| self.begin_move_inner(hash)).await
    }

    async fn begin_move_inner(&self, hash: &FileHash) -> Result<TrackedFile> {
        let mut scope = self.store.scope().await?;
        let mut file = scope.require_tracked_file(hash).await?;
        ensure_transition(
            hash,
            file.status,
            &[FileStatus::ReadyToMove, FileStatus::Retry],
            FileStatus::Moving,
        )?;
        file.status = FileStatus::Moving;
        scope.update_tracked_file(&mut file).await?;
        scope.commit().await?;
        Ok(file)
    }

    /// MOVING -> MOVED with the actual on-disk destination. The success
    /// log entry is the organizer's to write; it carries the durations and
    /// rollback id this transition does not know about.
    pub async fn mark_moved(&self, hash: &FileHash, actual_path: &Path) -> Result<TrackedFile> {
        self.retry_conflict_once(|| self.mark_moved_inner(hash, actual_path))
            .await
    }

    async fn mark_moved_inner(&self, hash: &FileHash, actual_path: &Path) -> Result<TrackedFile> {
        let mut scope = self.store.scope().await?;
        let mut file = scope.require_tracked_file(hash).await?;
        ensure_transition(hash, file.status, &[FileStatus::Moving], FileStatus::Moved)?;
        file.status = FileStatus::Moved;
        file.moved_to_path = Some(actual_path.to_path_buf());
        file.moved_at = Some(self.store.clock().now_utc());
        scope.update_tracked_file(&mut file).await?;
        scope.commit().await?;
        Ok(file)
    }

    /// Record a failure. Bumps the retry counter, parking the file at
    /// ERROR once the budget is spent; at that point further calls are
    /// no-ops. `fatal` skips the retry loop entirely for failures that
    /// need a human (permissions, space, bad paths).
    pub async fn record_error(
        &self,
        hash: &FileHash,
        message: &str,
        details: Option<serde_json::Value>,
        fatal: bool,
    ) -> Result<TrackedFile> {
        self.retry_conflict_once(|| {
            self.record_error_inner(hash, message, details.clone(), fatal)
        })
        .await
    }

    async fn record_error_inner(
        &self,
        hash: &FileHash,
        message: &str,
        details: Option<serde_json::Value>,
        fatal: bool,
    ) -> Result<TrackedFile> {
        let mut scope = self.store.scope().await?;
        let mut file = scope.require_tracked_file(hash).await?;

        if file.status == FileStatus::Error {
            // Already parked at ERROR; nothing left to record.
            return Ok(file);
        }
        ensure_transition(
            hash,
            file.status,
            &[
                FileStatus::Processing,
                FileStatus::Classified,
                FileStatus::ReadyToMove,
                FileStatus::Moving,
                FileStatus::Retry,
            ],
            FileStatus::Error,
        )?;

        let now = self.store.clock().now_utc();
        file.retry_count = (file.retry_count + 1).min(self.max_retry);
        file.status = if fatal || file.retry_count >= self.max_retry {
            FileStatus::Error
        } else {
            FileStatus::Retry
        };
        file.last_error = Some(message.to_string());
        file.last_error_at = Some(now);
        scope.update_tracked_file(&mut file).await?;

        let mut log = ProcessingLog::entry(
            hash.clone(),
            LogLevel::Error,
            LOG_ERROR_HANDLING,
            format!("attempt {} failed: {message}", file.retry_count),
        );
        if let Some(details) = details {
            log = log.with_details(details);
        }
        scope.append_log(&log).await?;
        scope.commit().await?;

        if file.status == FileStatus::Error {
            warn!(hash = %hash, retries = file.retry_count, "retry budget exhausted");
        }
        Ok(file)
    }

    /// ERROR/RETRY -> NEW: clear error state and re-enter the pipeline.
    pub async fn reset_error(&self, hash: &FileHash) -> Result<TrackedFile> {
        self.retry_conflict_once(|| self.reset_error_inner(hash)).await
    }

    async fn reset_error_inner(&self, hash: &FileHash) -> Result<TrackedFile> {
        let mut scope = self.store.scope().await?;
        let mut file = scope.require_tracked_file(hash).await?;
        ensure_transition(
            hash,
            file.status,
            &[FileStatus::Error, FileStatus::Retry],
            FileStatus::New,
        )?;
        file.status = FileStatus::New;
        file.retry_count = 0;
        file.last_error = None;
        file.last_error_at = None;
        scope.update_tracked_file(&mut file).await?;
        scope
            .append_log(&ProcessingLog::entry(
                hash.clone(),
                LogLevel::Info,
                LOG_ERROR_HANDLING,
                "error state reset, re-entering pipeline",
            ))
            .await?;
        scope.commit().await?;
        Ok(file)
    }

    /// Any state but MOVED -> IGNORED.
    pub async fn ignore(&self, hash: &FileHash) -> Result<TrackedFile> {
        self.retry_conflict_once(|| self.ignore_inner(hash)).await
    }

    async fn ignore_inner(&self, hash: &FileHash) -> Result<TrackedFile> {
        let mut scope = self.store.scope().await?;
        let mut file = scope.require_tracked_file(hash).await?;
        if file.status == FileStatus::Moved {
            return Err(illegal(hash, file.status, FileStatus::Ignored));
        }
        file.status = FileStatus::Ignored;
        scope.update_tracked_file(&mut file).await?;
        scope
            .append_log(&ProcessingLog::entry(
                hash.clone(),
                LogLevel::Info,
                LOG_DISCOVERY,
                "ignored by user",
            ))
            .await?;
        scope.commit().await?;
        Ok(file)
    }

    /// Logical removal; the row stays for audit.
    pub async fn soft_delete(&self, hash: &FileHash, reason: &str) -> Result<()> {
        self.retry_conflict_once(|| self.soft_delete_inner(hash, reason))
            .await
    }

    async fn soft_delete_inner(&self, hash: &FileHash, reason: &str) -> Result<()> {
        let mut scope = self.store.scope().await?;
        let mut file = scope.require_tracked_file(hash).await?;
        file.audit.active = false;
        file.audit.note = Some(reason.to_string());
        scope.update_tracked_file(&mut file).await?;
        scope
            .append_log(&ProcessingLog::entry(
                hash.clone(),
                LogLevel::Info,
                LOG_DISCOVERY,
                format!("soft-deleted: {reason}"),
            ))
            .await?;
        scope.commit().await?;
        Ok(())
    }

    /// Startup recovery: rows stranded at MOVING by a crash go back to
    /// READY_TO_MOVE; the mover's pre-flight makes the retry safe.
    pub async fn recover_interrupted_moves(&self) -> Result<usize> {
        let stranded = self.store.list_by_statuses(&[FileStatus::Moving]).await?;
        let mut recovered = 0;
        for mut file in stranded {
            warn!(hash = %file.hash, "recovering file stranded mid-move");
            let mut scope = self.store.scope().await?;
            file.status = FileStatus::ReadyToMove;
            scope.update_tracked_file(&mut file).await?;
            scope
                .append_log(&ProcessingLog::entry(
                    file.hash.clone(),
                    LogLevel::Warn,
                    LOG_ERROR_HANDLING,
                    "move interrupted by shutdown; reset to READY_TO_MOVE",
                ))
                .await?;
            scope.commit().await?;
            recovered += 1;
        }
        Ok(recovered)
    }

    async fn retry_conflict_once<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        match op().await {
            Err(err) if err.kind() == ErrorKind::Conflict => op().await,
            other => other,
        }
    }
}
