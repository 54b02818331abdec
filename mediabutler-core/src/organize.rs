//! Orchestration of a single file move: plan, safety-check, rollback point,
//! move, persist.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use mediabutler_model::{
    FileHash, FileStatus, LogLevel, OperationType, ProcessingLog, RollbackId,
    TrackedFile,
};

use crate::error::{ButlerError, Result};
use crate::events::DomainEvent;
use crate::fsx::FileSystem;
use crate::mover::{FileMover, MoveReceipt, required_space};
use crate::pathing::{PATH_WARN_LENGTH, PathBuilder, parent_usable};
use crate::recovery::{
    ErrorClassification, ErrorClassifier, ErrorContext, RecoveryAction, RollbackService,
};
use crate::service::{FileService, LOG_ORGANIZATION};
use crate::store::Store;

/// Read-only safety assessment shared by `preview` and batch validation.
#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct SafetyReport {
    pub is_safe: bool,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrganizePreview {
    pub hash: FileHash,
    pub category: String,
    pub target_path: PathBuf,
    pub safety: SafetyReport,
    pub siblings: Vec<PathBuf>,
    pub required_space: u64,
    pub available_space: u64,
}

#[derive(Debug, Clone)]
pub struct OrganizeSuccess {
    pub file: TrackedFile,
    pub receipt: MoveReceipt,
    pub rollback_id: Option<RollbackId>,
}

/// Outcome of an organize attempt that got past contract validation.
#[derive(Debug, Clone)]
pub enum OrganizeOutcome {
    Success(OrganizeSuccess),
    Failed {
        classification: ErrorClassification,
        recovery: RecoveryAction,
    },
}

impl OrganizeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, OrganizeOutcome::Success(_))
    }
}

pub struct Organizer {
    store: Arc<Store>,
    fs: Arc<dyn FileSystem>,
    path_builder: Arc<PathBuilder>,
    mover: FileMover,
    rollback: Arc<RollbackService>,
    errors: ErrorClassifier,
    service: Arc<FileService>,
}

impl std::fmt::Debug for Organizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Organizer").finish()
    }
}

impl Organizer {
    pub fn new(
        store: Arc<Store>,
        fs: Arc<dyn FileSystem>,
        path_builder: Arc<PathBuilder>,
        rollback: Arc<RollbackService>,
        errors: ErrorClassifier,
        service: Arc<FileService>,
    ) -> Self {
        let mover = FileMover::new(Arc::clone(&fs));
        Self {
            store,
            fs,
            path_builder,
            mover,
            rollback,
            errors,
            service,
        }
    }

    /// Organize one file into the library. `NOT_FOUND` and ineligible
    /// states surface as errors before any side effect; everything after
    /// that is reported through [`OrganizeOutcome`] with the file's error
    /// state already recorded.
    pub async fn organize(&self, hash: &FileHash, category: &str) -> Result<OrganizeOutcome> {
        let file = self.store.require_file(hash).await?;

        // A still-unconfirmed file gets its confirmation here; anything
        // else must already be staged for moving.
        let file = match file.status {
            FileStatus::Classified => self.service.confirm(hash, category).await?,
            FileStatus::ReadyToMove | FileStatus::Retry => file,
            other => {
                return Err(ButlerError::IllegalTransition {
                    hash: hash.to_string(),
                    from: other.as_str().to_string(),
                    to: FileStatus::Moving.as_str().to_string(),
                });
            }
        };

        let planned = match self.path_builder.build(&file, category).await {
            Ok(planned) if planned.report.is_ok() => planned,
            Ok(planned) => {
                let err = ButlerError::Path(planned.report.errors.join("; "));
                return Ok(self.handle_failure(&file, err).await?);
            }
            Err(err) => return Ok(self.handle_failure(&file, err).await?),
        };

        // Safety gate before any mutation; failures are typed so the
        // classifier can map them.
        if let Err(err) = self
            .mover
            .preflight(&file.original_path, &planned.target)
            .await
        {
            return Ok(self.handle_failure(&file, err).await?);
        }

        // Best-effort: a move without a rollback point is still a move.
        let rollback_id = match self
            .rollback
            .create(
                hash,
                OperationType::Move,
                &file.original_path,
                &planned.target,
                Some(format!("organize into {category}")),
            )
            .await
        {
            Ok(id) => Some(id),
            Err(err) => {
                warn!(hash = %hash, error = %err, "rollback point creation failed");
                None
            }
        };

        self.service.begin_move(hash).await?;

        match self
            .mover
            .move_file(&file.original_path, &planned.target)
            .await
        {
            Ok(receipt) => {
                let updated = self.service.mark_moved(hash, &receipt.target_path).await?;
                self.log_success(hash, &receipt, rollback_id.as_ref()).await?;
                info!(
                    hash = %hash,
                    target = %receipt.target_path.display(),
                    duration_ms = receipt.duration_ms,
                    "file organized"
                );
                Ok(OrganizeOutcome::Success(OrganizeSuccess {
                    file: updated,
                    receipt,
                    rollback_id,
                }))
            }
            Err(err) => Ok(self.handle_failure(&file, err).await?),
        }
    }

    /// Steps 1-3 of organize plus sibling and space math, with no
    /// mutation at all.
    pub async fn preview(&self, hash: &FileHash, category: &str) -> Result<OrganizePreview> {
        let file = self.store.require_file(hash).await?;
        let target = self.path_builder.render(&file, category)?;
        let report = self.path_builder.validate(&target).await;
        let target = self.path_builder.resolve_conflict(&target).await?;

        let mut issues = report.errors.clone();
        let mut warnings = report.warnings.clone();

        match self.fs.stat(&file.original_path).await {
            Ok(stat) if stat.is_file => {}
            Ok(_) => issues.push(format!(
                "source {} is not a regular file",
                file.original_path.display()
            )),
            Err(_) => issues.push(format!(
                "source file {} does not exist",
                file.original_path.display()
            )),
        }

        let required = required_space(file.file_size);
        let available = self.fs.free_space(&target).await.unwrap_or(0);
        if available < required {
            issues.push(format!(
                "Insufficient disk space: need {required} bytes, {available} available"
            ));
        }

        if let Some(parent) = target.parent() {
            if !parent_usable(self.fs.as_ref(), parent).await {
                issues.push(format!(
                    "target parent {} is not writable or creatable",
                    parent.display()
                ));
            }
        }

        if target.to_string_lossy().chars().count() > PATH_WARN_LENGTH {
            warnings.push("target path is unusually long".to_string());
        }

        let siblings = self
            .mover
            .discover_siblings(&file.original_path)
            .await
            .unwrap_or_default();

        Ok(OrganizePreview {
            hash: hash.clone(),
            category: category.to_string(),
            target_path: target,
            safety: SafetyReport {
                is_safe: issues.is_empty(),
                issues,
                warnings,
            },
            siblings,
            required_space: required,
            available_space: available,
        })
    }

    /// Safety assessment for an explicit target path, without planning.
    pub async fn validate_safety(&self, hash: &FileHash, target: &Path) -> Result<SafetyReport> {
        let file = self.store.require_file(hash).await?;
        let mut issues = crate::pathing::component_errors(target);
        let mut warnings = Vec::new();

        match self.fs.stat(&file.original_path).await {
            Ok(stat) if stat.is_file => {}
            _ => issues.push(format!(
                "source file {} does not exist",
                file.original_path.display()
            )),
        }

        if let Some(parent) = target.parent() {
            if !parent_usable(self.fs.as_ref(), parent).await {
                issues.push(format!(
                    "target parent {} is not writable or creatable",
                    parent.display()
                ));
            }
        }

        let required = required_space(file.file_size);
        let available = self.fs.free_space(target).await.unwrap_or(0);
        if available < required {
            issues.push(format!(
                "Insufficient disk space: need {required} bytes, {available} available"
            ));
        }

        if self.fs.exists(target).await.unwrap_or(false) {
            warnings.push(format!(
                "a file already exists at {}; it would be renamed on move",
                target.display()
            ));
        }

        Ok(SafetyReport {
            is_safe: issues.is_empty(),
            issues,
            warnings,
        })
    }

    /// Reconstructs live status for the API from the durable log trail.
    pub async fn status(&self, hash: &FileHash) -> Result<(TrackedFile, Vec<ProcessingLog>)> {
        let file = self.store.require_file(hash).await?;
        let logs = self.store.logs_for_file(hash).await?;
        Ok((file, logs))
    }

    async fn log_success(
        &self,
        hash: &FileHash,
        receipt: &MoveReceipt,
        rollback_id: Option<&RollbackId>,
    ) -> Result<()> {
        let mut scope = self.store.scope().await?;
        scope
            .append_log(
                &ProcessingLog::entry(
                    hash.clone(),
                    LogLevel::Info,
                    LOG_ORGANIZATION,
                    format!("organized into {}", receipt.target_path.display()),
                )
                .with_details(serde_json::json!({
                    "rollback_id": rollback_id.map(|id| id.to_string()),
                    "siblings_moved": receipt.siblings_moved.len(),
                    "siblings_failed": receipt.siblings_failed.len(),
                }))
                .with_duration_ms(receipt.duration_ms),
            )
            .await?;
        scope.commit().await?;
        Ok(())
    }

    async fn handle_failure(
        &self,
        file: &TrackedFile,
        err: ButlerError,
    ) -> Result<OrganizeOutcome> {
        let available = self
            .fs
            .free_space(file.target_path.as_deref().unwrap_or(&file.original_path))
            .await
            .ok();
        let ctx = ErrorContext {
            operation: OperationType::Move.as_str().to_string(),
            source_path: Some(file.original_path.clone()),
            target_path: file.target_path.clone(),
            file_size: Some(file.file_size),
            available_space: available,
            file_hash: Some(file.hash.clone()),
            retry_attempts: file.retry_count,
        };
        let classification = self.errors.classify(&err, &ctx);
        let recovery = self.errors.recovery_action(&classification, &ctx);

        error!(
            hash = %file.hash,
            kind = %classification.kind,
            error = %err,
            "organize failed"
        );

        let updated = self
            .service
            .record_error(
                &file.hash,
                &classification.technical_details,
                Some(serde_json::to_value(&classification)?),
                !classification.can_retry,
            )
            .await?;

        self.store
            .events()
            .publish(DomainEvent::MoveFailed {
                hash: file.hash.clone(),
                reason: classification.user_message.clone(),
                retry_count: updated.retry_count,
            })
            .await;

        Ok(OrganizeOutcome::Failed {
            classification,
            recovery,
        })
    }
}
