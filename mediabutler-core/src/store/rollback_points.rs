//! Read queries over `rollback_points`.

use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use mediabutler_model::{
    AuditFields, FileHash, OperationType, RollbackId, RollbackPoint,
};

use crate::error::{ButlerError, Result};

use super::Store;

fn map_point(row: &SqliteRow) -> Result<RollbackPoint> {
    let id = Uuid::from_str(&row.try_get::<String, _>("id")?)
        .map_err(|err| ButlerError::Internal(format!("malformed rollback id: {err}")))?;
    Ok(RollbackPoint {
        id: RollbackId(id),
        file_hash: FileHash::parse(row.try_get::<String, _>("file_hash")?)?,
        operation_type: OperationType::parse(&row.try_get::<String, _>("operation_type")?)?,
        original_path: PathBuf::from(row.try_get::<String, _>("original_path")?),
        target_path: PathBuf::from(row.try_get::<String, _>("target_path")?),
        info: row.try_get("info")?,
        audit: AuditFields {
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
            note: row.try_get("note")?,
            active: row.try_get::<i64, _>("active")? != 0,
        },
    })
}

impl Store {
    pub async fn get_rollback_point(&self, id: &RollbackId) -> Result<Option<RollbackPoint>> {
        let row = sqlx::query("SELECT * FROM rollback_points WHERE id = ? AND active = 1")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(map_point).transpose()
    }

    pub async fn newest_rollback_point(
        &self,
        hash: &FileHash,
    ) -> Result<Option<RollbackPoint>> {
        let row = sqlx::query(
            "SELECT * FROM rollback_points WHERE file_hash = ? AND active = 1 \
             ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(hash.as_str())
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(map_point).transpose()
    }

    pub async fn rollback_points_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<RollbackPoint>> {
        let rows = sqlx::query(
            "SELECT * FROM rollback_points WHERE active = 1 AND created_at < ? \
             ORDER BY created_at",
        )
        .bind(cutoff)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(map_point).collect()
    }
}
