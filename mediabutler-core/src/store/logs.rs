//! Read queries over the append-only `processing_logs` table.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use mediabutler_model::{FileHash, LogLevel, ProcessingLog};

use crate::error::Result;

use super::Store;

fn map_log(row: &SqliteRow) -> Result<ProcessingLog> {
    let details = row
        .try_get::<Option<String>, _>("details_json")?
        .map(|raw| serde_json::from_str(&raw))
        .transpose()?;
    Ok(ProcessingLog {
        id: row.try_get("id")?,
        file_hash: FileHash::parse(row.try_get::<String, _>("file_hash")?)?,
        level: LogLevel::parse(&row.try_get::<String, _>("level")?)?,
        category: row.try_get("category")?,
        message: row.try_get("message")?,
        details_json: details,
        duration_ms: row.try_get("duration_ms")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

impl Store {
    pub async fn logs_for_file(&self, hash: &FileHash) -> Result<Vec<ProcessingLog>> {
        let rows = sqlx::query(
            "SELECT * FROM processing_logs WHERE file_hash = ? ORDER BY id",
        )
        .bind(hash.as_str())
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(map_log).collect()
    }

    /// Category filter is a substring match, so `FILE_` finds every
    /// file-pipeline tag.
    pub async fn logs_by_category(
        &self,
        hash: &FileHash,
        category_fragment: &str,
    ) -> Result<Vec<ProcessingLog>> {
        let pattern = format!("%{category_fragment}%");
        let rows = sqlx::query(
            "SELECT * FROM processing_logs \
             WHERE file_hash = ? AND category LIKE ? ORDER BY id",
        )
        .bind(hash.as_str())
        .bind(pattern)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(map_log).collect()
    }
}
