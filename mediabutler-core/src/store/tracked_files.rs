//! Read queries over `tracked_files`. Writes live on [`super::StoreScope`].

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};

use mediabutler_model::{AuditFields, FileHash, FileStatus, TrackedFile};

use crate::error::Result;

use super::Store;

pub(crate) fn map_tracked_file(row: &SqliteRow) -> Result<TrackedFile> {
    let hash = FileHash::parse(row.try_get::<String, _>("hash")?)?;
    let status = FileStatus::parse(&row.try_get::<String, _>("status")?)?;
    Ok(TrackedFile {
        hash,
        original_path: PathBuf::from(row.try_get::<String, _>("original_path")?),
        file_name: row.try_get("file_name")?,
        file_size: row.try_get::<i64, _>("file_size")? as u64,
        status,
        suggested_category: row.try_get("suggested_category")?,
        confidence: row.try_get("confidence")?,
        classified_at: row.try_get("classified_at")?,
        category: row.try_get("category")?,
        target_path: row
            .try_get::<Option<String>, _>("target_path")?
            .map(PathBuf::from),
        moved_to_path: row
            .try_get::<Option<String>, _>("moved_to_path")?
            .map(PathBuf::from),
        moved_at: row.try_get("moved_at")?,
        retry_count: row.try_get::<i64, _>("retry_count")? as u32,
        last_error: row.try_get("last_error")?,
        last_error_at: row.try_get("last_error_at")?,
        audit: AuditFields {
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
            note: row.try_get("note")?,
            active: row.try_get::<i64, _>("active")? != 0,
        },
        version: row.try_get("version")?,
    })
}

/// One page of a filtered listing plus the unpaged total.
#[derive(Debug, Clone)]
pub struct FileListPage {
    pub items: Vec<TrackedFile>,
    pub total: i64,
}

impl Store {
    pub async fn get_file(
        &self,
        hash: &FileHash,
        include_inactive: bool,
    ) -> Result<Option<TrackedFile>> {
        let sql = if include_inactive {
            "SELECT * FROM tracked_files WHERE hash = ?"
        } else {
            "SELECT * FROM tracked_files WHERE hash = ? AND active = 1"
        };
        let row = sqlx::query(sql)
            .bind(hash.as_str())
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(map_tracked_file).transpose()
    }

    pub async fn require_file(&self, hash: &FileHash) -> Result<TrackedFile> {
        self.get_file(hash, false).await?.ok_or_else(|| {
            crate::error::ButlerError::NotFound(format!("tracked file {hash}"))
        })
    }

    /// Paged listing with optional status-set and category filters.
    pub async fn list_files(
        &self,
        skip: i64,
        take: i64,
        statuses: Option<&[FileStatus]>,
        category: Option<&str>,
    ) -> Result<FileListPage> {
        let mut count_qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) AS n FROM tracked_files WHERE active = 1");
        push_filters(&mut count_qb, statuses, category);
        let total: i64 = count_qb
            .build()
            .fetch_one(self.pool())
            .await?
            .try_get("n")?;

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM tracked_files WHERE active = 1");
        push_filters(&mut qb, statuses, category);
        qb.push(" ORDER BY created_at DESC, hash");
        qb.push(" LIMIT ").push_bind(take.max(0));
        qb.push(" OFFSET ").push_bind(skip.max(0));

        let rows = qb.build().fetch_all(self.pool()).await?;
        let items = rows
            .iter()
            .map(map_tracked_file)
            .collect::<Result<Vec<_>>>()?;
        Ok(FileListPage { items, total })
    }

    pub async fn list_by_statuses(&self, statuses: &[FileStatus]) -> Result<Vec<TrackedFile>> {
        let page = self
            .list_files(0, i64::MAX, Some(statuses), None)
            .await?;
        Ok(page.items)
    }

    /// Oldest NEW files first, for the classification workers.
    pub async fn list_ready_for_classification(&self, limit: i64) -> Result<Vec<TrackedFile>> {
        let rows = sqlx::query(
            "SELECT * FROM tracked_files WHERE active = 1 AND status = ? \
             ORDER BY created_at, hash LIMIT ?",
        )
        .bind(FileStatus::New.as_str())
        .bind(limit.max(0))
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(map_tracked_file).collect()
    }

    /// Files awaiting user review (classified, unconfirmed).
    pub async fn list_pending_review(&self) -> Result<Vec<TrackedFile>> {
        self.list_by_statuses(&[FileStatus::Classified]).await
    }

    /// Filename search with SQL-LIKE wildcards (`%`, `_`) as typed by the
    /// user.
    pub async fn search_files(&self, pattern: &str) -> Result<Vec<TrackedFile>> {
        let rows = sqlx::query(
            "SELECT * FROM tracked_files WHERE active = 1 AND file_name LIKE ? \
             ORDER BY file_name",
        )
        .bind(pattern)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(map_tracked_file).collect()
    }

    pub async fn distinct_categories(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT category FROM tracked_files \
             WHERE active = 1 AND category IS NOT NULL ORDER BY category",
        )
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(|row| Ok(row.try_get::<String, _>("category")?))
            .collect()
    }

    /// Fast path check used by the periodic scan to skip known files
    /// without re-hashing them.
    pub async fn file_exists_by_path(&self, path: &Path) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 AS one FROM tracked_files WHERE active = 1 AND original_path = ? LIMIT 1",
        )
        .bind(path.to_string_lossy().as_ref())
        .fetch_optional(self.pool())
        .await?;
        Ok(row.is_some())
    }
}

fn push_filters(
    qb: &mut QueryBuilder<'_, Sqlite>,
    statuses: Option<&[FileStatus]>,
    category: Option<&str>,
) {
    if let Some(statuses) = statuses {
        if !statuses.is_empty() {
            qb.push(" AND status IN (");
            let mut separated = qb.separated(", ");
            for status in statuses {
                separated.push_bind(status.as_str());
            }
            qb.push(")");
        }
    }
    if let Some(category) = category {
        qb.push(" AND category = ").push_bind(category.to_string());
    }
}
