//! Rollback points: create before a move, execute to revert one.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use mediabutler_model::{
    AuditFields, FileHash, LogLevel, OperationType, ProcessingLog, RollbackId,
    RollbackPoint,
};

use crate::error::{ButlerError, Result};
use crate::fsx::FileSystem;
use crate::pathing::parent_usable;
use crate::service::LOG_ORGANIZATION;
use crate::store::Store;

/// Pre-flight outcome for a rollback execution.
#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct RollbackReport {
    pub issues: Vec<String>,
    pub success_probability: f64,
}

impl RollbackReport {
    pub fn is_executable(&self) -> bool {
        self.issues.is_empty()
    }
}

pub struct RollbackService {
    store: Arc<Store>,
    fs: Arc<dyn FileSystem>,
}

impl std::fmt::Debug for RollbackService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollbackService").finish()
    }
}

impl RollbackService {
    pub fn new(store: Arc<Store>, fs: Arc<dyn FileSystem>) -> Self {
        Self { store, fs }
    }

    /// Persist a rollback point ahead of a mutating operation.
    pub async fn create(
        &self,
        file_hash: &FileHash,
        operation_type: OperationType,
        original_path: &Path,
        target_path: &Path,
        info: Option<String>,
    ) -> Result<RollbackId> {
        let mut point = RollbackPoint {
            id: RollbackId::new(),
            file_hash: file_hash.clone(),
            operation_type,
            original_path: original_path.to_path_buf(),
            target_path: target_path.to_path_buf(),
            info,
            audit: AuditFields::new(self.store.clock().now_utc()),
        };
        let mut scope = self.store.scope().await?;
        scope.insert_rollback_point(&mut point).await?;
        scope.commit().await?;
        Ok(point.id)
    }

    /// Pre-flight check: is the file still where the move left it, and can
    /// it go back?
    pub async fn validate(&self, id: &RollbackId) -> Result<RollbackReport> {
        let point = self
            .store
            .get_rollback_point(id)
            .await?
            .ok_or_else(|| ButlerError::NotFound(format!("rollback point {id}")))?;
        Ok(self.validate_point(&point, false).await)
    }

    async fn validate_point(&self, point: &RollbackPoint, force: bool) -> RollbackReport {
        let mut issues = Vec::new();

        match self.fs.exists(&point.target_path).await {
            Ok(true) => {}
            Ok(false) => issues.push(format!(
                "moved file no longer exists at {}",
                point.target_path.display()
            )),
            Err(err) => issues.push(format!("cannot stat moved file: {err}")),
        }

        if let Some(parent) = point.original_path.parent() {
            if !parent_usable(self.fs.as_ref(), parent).await {
                issues.push(format!(
                    "original directory {} is not writable",
                    parent.display()
                ));
            }
        }

        if !force {
            if let Ok(true) = self.fs.exists(&point.original_path).await {
                issues.push(format!(
                    "a file already exists at the original path {}",
                    point.original_path.display()
                ));
            }
        }

        let success_probability = match issues.len() {
            0 => 0.95,
            1 => 0.40,
            _ => 0.05,
        };
        RollbackReport {
            issues,
            success_probability,
        }
    }

    /// Move the file back to its original path and retire the point.
    pub async fn execute(&self, id: &RollbackId, force_overwrite: bool) -> Result<()> {
        let point = self
            .store
            .get_rollback_point(id)
            .await?
            .ok_or_else(|| ButlerError::NotFound(format!("rollback point {id}")))?;

        let report = self.validate_point(&point, force_overwrite).await;
        if !report.is_executable() {
            return Err(ButlerError::Validation(format!(
                "rollback blocked: {}",
                report.issues.join("; ")
            )));
        }

        if let Some(parent) = point.original_path.parent() {
            self.fs.create_dir_all(parent).await?;
        }
        self.fs
            .rename(&point.target_path, &point.original_path)
            .await?;

        let mut scope = self.store.scope().await?;
        scope.soft_delete_rollback_point(id).await?;
        scope
            .append_log(&ProcessingLog::entry(
                point.file_hash.clone(),
                LogLevel::Warn,
                LOG_ORGANIZATION,
                format!(
                    "rolled back move, restored {}",
                    point.original_path.display()
                ),
            ))
            .await?;
        scope.commit().await?;
        info!(rollback_id = %id, hash = %point.file_hash, "rollback executed");
        Ok(())
    }

    /// Revert the most recent active point for a file.
    pub async fn rollback_last(&self, hash: &FileHash) -> Result<()> {
        let point = self
            .store
            .newest_rollback_point(hash)
            .await?
            .ok_or_else(|| {
                ButlerError::NotFound(format!("no active rollback point for {hash}"))
            })?;
        self.execute(&point.id, false).await
    }

    /// Retire points older than the cutoff; returns how many were retired.
    pub async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let mut scope = self.store.scope().await?;
        let retired = scope.soft_delete_rollback_points_before(older_than).await?;
        scope.commit().await?;
        Ok(retired)
    }
}
