//! Persistence layer: one embedded SQLite file, accessed through a pool.
//!
//! All mutation flows through a [`StoreScope`] unit of work so audit
//! stamping, optimistic concurrency, and post-commit event dispatch live in
//! exactly one place. Read paths filter `active = 1` unless a caller asks
//! for inactive rows explicitly.

mod logs;
mod preferences;
mod rollback_points;
mod scope;
mod tracked_files;

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::clock::Clock;
use crate::error::Result;
use crate::events::EventSink;

pub use scope::StoreScope;
pub use tracked_files::FileListPage;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub struct Store {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

impl Store {
    /// Open (creating if missing) the database file and run pending
    /// migrations.
    pub async fn open(
        path: &Path,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self { pool, clock, events };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory database for tests. Single connection: each SQLite
    /// `:memory:` connection is its own database.
    pub async fn open_in_memory(
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool, clock, events };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|err| crate::error::ButlerError::Internal(format!("migration failed: {err}")))
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    /// Begin a unit-of-work scope. One logical operation per scope.
    pub async fn scope(&self) -> Result<StoreScope> {
        StoreScope::begin(self).await
    }
}
