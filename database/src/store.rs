use std::path::{Path, PathBuf};

use chrono::Utc;
use shark_core::error::{Result, SharkError};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Sqlite, SqlitePool, Transaction,
};

use crate::common::map_sqlx_err;

/// The data-store adapter: the only component holding a live store handle.
///
/// Everything above it receives the adapter by reference and runs multi-row
/// mutations through [`Store::begin`] so they commit or roll back as one.
/// For file-backed stores the adapter also provides the pre-force backup.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
    file_path: Option<PathBuf>,
}

impl Store {
    /// Open (creating if missing) the store at the given URL.
    ///
    /// Accepts `sqlite://path`, a bare path, or `:memory:` for tests. File
    /// stores run in WAL mode; foreign keys are always on because the
    /// cascade-deletion rules live in the schema.
    pub async fn open(database_url: &str) -> Result<Self> {
        let raw = database_url
            .strip_prefix("sqlite://")
            .unwrap_or(database_url);
        let in_memory = raw.starts_with(":memory:");

        let options = if in_memory {
            SqliteConnectOptions::new()
                .filename(raw)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Memory)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
        } else {
            SqliteConnectOptions::new()
                .filename(raw)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
        };

        // An in-memory database exists per connection; a pool of one keeps
        // every query on the same database.
        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect_with(options)
                .await
        } else {
            SqlitePool::connect_with(options).await
        }
        .map_err(map_sqlx_err)?;

        let file_path = (!in_memory).then(|| PathBuf::from(raw));
        Ok(Self { pool, file_path })
    }

    /// Apply pending migrations; called once at startup
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations/sqlite")
            .run(&self.pool)
            .await
            .map_err(|e| SharkError::store(format!("migration failed: {e}")))?;
        tracing::debug!("store migrations up to date");
        Ok(())
    }

    /// The underlying connection pool, for read queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Begin a transaction scope. Dropping the returned transaction without
    /// committing rolls everything back, including on deadline cancellation.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool.begin().await.map_err(map_sqlx_err)
    }

    /// Whether the store is a local file (backups apply) rather than
    /// in-memory or provider-backed
    pub fn is_local_file(&self) -> bool {
        self.file_path.is_some()
    }

    /// The backing file, when the store is file-backed
    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    /// Copy the store file to `<store>.<operation>-<UTC timestamp>.backup`
    /// next to it. Returns `None` for non-file stores (provider durability
    /// applies there). A failed copy is fatal to the caller's operation.
    pub fn backup(&self, operation: &str) -> Result<Option<PathBuf>> {
        let Some(source) = &self.file_path else {
            return Ok(None);
        };
        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let backup_path = PathBuf::from(format!(
            "{}.{operation}-{stamp}.backup",
            source.display()
        ));
        std::fs::copy(source, &backup_path).map_err(|e| {
            SharkError::BackupFailed(format!(
                "copying {} to {}: {e}",
                source.display(),
                backup_path.display()
            ))
        })?;
        tracing::info!(
            backup = %backup_path.display(),
            operation,
            "store backup written"
        );
        Ok(Some(backup_path))
    }
}
