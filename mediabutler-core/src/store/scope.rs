//! Unit-of-work scope: one transaction, centralized audit stamping,
//! optimistic concurrency, and post-commit event dispatch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{Sqlite, Transaction};

use mediabutler_model::{
    FileHash, PreferenceValue, ProcessingLog, RollbackPoint, TrackedFile,
};

use crate::clock::Clock;
use crate::error::{ButlerError, Result};
use crate::events::{DomainEvent, EventSink};

use super::Store;
use super::tracked_files::map_tracked_file;

/// Inserted rows carrying a stamp this far from now keep it; anything
/// closer is treated as "unset" and stamped fresh. Preserves test-injected
/// timestamps without a sentinel value.
const STAMP_TOLERANCE_SECS: i64 = 10;

pub struct StoreScope {
    tx: Transaction<'static, Sqlite>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    events: Vec<DomainEvent>,
}

impl std::fmt::Debug for StoreScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreScope")
            .field("queued_events", &self.events.len())
            .finish()
    }
}

impl StoreScope {
    pub(super) async fn begin(store: &Store) -> Result<Self> {
        let tx = store.pool().begin().await?;
        Ok(Self {
            tx,
            clock: Arc::clone(store.clock()),
            sink: Arc::clone(store.events()),
            events: Vec::new(),
        })
    }

    /// Queue an event for dispatch after a successful commit. Events from
    /// one scope are published in insertion order.
    pub fn queue_event(&mut self, event: DomainEvent) {
        self.events.push(event);
    }

    /// Commit the transaction, then publish queued events (at-least-once;
    /// handlers tolerate redelivery).
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        for event in self.events {
            self.sink.publish(event).await;
        }
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now_utc()
    }

    pub async fn get_tracked_file(&mut self, hash: &FileHash) -> Result<Option<TrackedFile>> {
        let row = sqlx::query("SELECT * FROM tracked_files WHERE hash = ? AND active = 1")
            .bind(hash.as_str())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(map_tracked_file).transpose()
    }

    pub async fn require_tracked_file(&mut self, hash: &FileHash) -> Result<TrackedFile> {
        self.get_tracked_file(hash)
            .await?
            .ok_or_else(|| ButlerError::NotFound(format!("tracked file {hash}")))
    }

    /// Insert a new row. The entity's audit fields are rewritten to the
    /// values actually persisted.
    pub async fn insert_tracked_file(&mut self, file: &mut TrackedFile) -> Result<()> {
        let now = self.now();
        if (file.audit.created_at - now).num_seconds().abs() <= STAMP_TOLERANCE_SECS {
            file.audit.created_at = now;
            file.audit.updated_at = now;
        }
        file.version = 0;

        sqlx::query(
            "INSERT INTO tracked_files (\
                hash, original_path, file_name, file_size, status, \
                suggested_category, confidence, classified_at, category, target_path, \
                moved_to_path, moved_at, retry_count, last_error, last_error_at, \
                created_at, updated_at, note, active, version\
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(file.hash.as_str())
        .bind(file.original_path.to_string_lossy().as_ref())
        .bind(&file.file_name)
        .bind(file.file_size as i64)
        .bind(file.status.as_str())
        .bind(&file.suggested_category)
        .bind(file.confidence)
        .bind(file.classified_at)
        .bind(&file.category)
        .bind(file.target_path.as_ref().map(|p| p.to_string_lossy().into_owned()))
        .bind(file.moved_to_path.as_ref().map(|p| p.to_string_lossy().into_owned()))
        .bind(file.moved_at)
        .bind(file.retry_count as i64)
        .bind(&file.last_error)
        .bind(file.last_error_at)
        .bind(file.audit.created_at)
        .bind(file.audit.updated_at)
        .bind(&file.audit.note)
        .bind(file.audit.active as i64)
        .bind(file.version)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Full-row update guarded by the optimistic version; zero rows
    /// affected means another scope got there first.
    pub async fn update_tracked_file(&mut self, file: &mut TrackedFile) -> Result<()> {
        let expected = file.version;
        let now = self.now();

        let result = sqlx::query(
            "UPDATE tracked_files SET \
                status = ?, suggested_category = ?, confidence = ?, classified_at = ?, \
                category = ?, target_path = ?, moved_to_path = ?, moved_at = ?, \
                retry_count = ?, last_error = ?, last_error_at = ?, \
                updated_at = ?, note = ?, active = ?, version = version + 1 \
             WHERE hash = ? AND version = ?",
        )
        .bind(file.status.as_str())
        .bind(&file.suggested_category)
        .bind(file.confidence)
        .bind(file.classified_at)
        .bind(&file.category)
        .bind(file.target_path.as_ref().map(|p| p.to_string_lossy().into_owned()))
        .bind(file.moved_to_path.as_ref().map(|p| p.to_string_lossy().into_owned()))
        .bind(file.moved_at)
        .bind(file.retry_count as i64)
        .bind(&file.last_error)
        .bind(file.last_error_at)
        .bind(now)
        .bind(&file.audit.note)
        .bind(file.audit.active as i64)
        .bind(file.hash.as_str())
        .bind(expected)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ButlerError::Conflict(format!(
                "tracked file {} was updated concurrently (version {expected})",
                file.hash
            )));
        }
        file.audit.updated_at = now;
        file.version = expected + 1;
        Ok(())
    }

    pub async fn append_log(&mut self, log: &ProcessingLog) -> Result<()> {
        let details = log
            .details_json
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        sqlx::query(
            "INSERT INTO processing_logs \
                (file_hash, level, category, message, details_json, duration_ms, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(log.file_hash.as_str())
        .bind(log.level.as_str())
        .bind(&log.category)
        .bind(&log.message)
        .bind(details)
        .bind(log.duration_ms)
        .bind(self.now())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn insert_rollback_point(&mut self, point: &mut RollbackPoint) -> Result<()> {
        let now = self.now();
        if (point.audit.created_at - now).num_seconds().abs() <= STAMP_TOLERANCE_SECS {
            point.audit.created_at = now;
            point.audit.updated_at = now;
        }
        sqlx::query(
            "INSERT INTO rollback_points \
                (id, file_hash, operation_type, original_path, target_path, info, \
                 created_at, updated_at, note, active) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(point.id.to_string())
        .bind(point.file_hash.as_str())
        .bind(point.operation_type.as_str())
        .bind(point.original_path.to_string_lossy().as_ref())
        .bind(point.target_path.to_string_lossy().as_ref())
        .bind(&point.info)
        .bind(point.audit.created_at)
        .bind(point.audit.updated_at)
        .bind(&point.audit.note)
        .bind(point.audit.active as i64)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn soft_delete_rollback_point(
        &mut self,
        id: &mediabutler_model::RollbackId,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE rollback_points SET active = 0, updated_at = ? WHERE id = ? AND active = 1",
        )
        .bind(self.now())
        .bind(id.to_string())
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ButlerError::NotFound(format!("rollback point {id}")));
        }
        Ok(())
    }

    pub async fn soft_delete_rollback_points_before(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE rollback_points SET active = 0, updated_at = ? \
             WHERE active = 1 AND created_at < ?",
        )
        .bind(self.now())
        .bind(cutoff)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    /// Upsert a user preference; insert keeps creation time, update only
    /// touches `updated_at`.
    pub async fn set_preference(&mut self, key: &str, value: &PreferenceValue) -> Result<()> {
        let now = self.now();
        let value_json = serde_json::to_string(value)?;
        sqlx::query(
            "INSERT INTO user_preferences (key, value_json, created_at, updated_at, active) \
             VALUES (?, ?, ?, ?, 1) \
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, \
                 updated_at = excluded.updated_at, active = 1",
        )
        .bind(key)
        .bind(value_json)
        .bind(now)
        .bind(now)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}
