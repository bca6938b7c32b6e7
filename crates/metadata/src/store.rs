//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{ChunkRepo, FileRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: FileRepo + ChunkRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store and apply the schema.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let mut pool_opts = SqlitePoolOptions::new()
            // A single connection serializes writers; the conditional updates
            // below rely on the database, not on this, for correctness.
            .max_connections(1);
        if let Some(secs) = query_timeout_secs {
            pool_opts = pool_opts.acquire_timeout(Duration::from_secs(secs));
        }
        let pool = pool_opts.connect_with(opts).await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::debug!(path = %path.display(), "SQLite metadata store ready");
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use crate::repos::StateTransition;
    use crate::repos::files::transition_source;
    use tessera_core::FileState;
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[async_trait]
    impl FileRepo for SqliteStore {
        async fn create_file(&self, file: &FileRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO files (file_id, file_hash, size_bytes, num_chunks, name,
                                   content_type, state, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(file.file_id)
            .bind(&file.file_hash)
            .bind(file.size_bytes)
            .bind(file.num_chunks)
            .bind(&file.name)
            .bind(&file.content_type)
            .bind(&file.state)
            .bind(file.created_at)
            .bind(file.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| MetadataError::from_insert(e, format!("file {}", file.file_hash)))?;
            Ok(())
        }

        async fn get_file(&self, file_id: Uuid) -> MetadataResult<Option<FileRow>> {
            let row = sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE file_id = ?")
                .bind(file_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_file_by_hash(&self, file_hash: &str) -> MetadataResult<Option<FileRow>> {
            let row = sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE file_hash = ?")
                .bind(file_hash)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn set_file_state(
            &self,
            file_id: Uuid,
            target: FileState,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<StateTransition> {
            let from = transition_source(target)?;
            let result = sqlx::query(
                "UPDATE files SET state = ?, updated_at = ? WHERE file_id = ? AND state = ?",
            )
            .bind(target.as_str())
            .bind(updated_at)
            .bind(file_id)
            .bind(from.as_str())
            .execute(&self.pool)
            .await?;

            if result.rows_affected() > 0 {
                return Ok(StateTransition::Applied);
            }

            let current: Option<String> =
                sqlx::query_scalar("SELECT state FROM files WHERE file_id = ?")
                    .bind(file_id)
                    .fetch_optional(&self.pool)
                    .await?;
            match current {
                Some(state) => Ok(StateTransition::AlreadyHandled {
                    current: FileState::parse(&state)?,
                }),
                None => Err(MetadataError::NotFound(format!("file {file_id}"))),
            }
        }

        async fn list_files(&self, offset: u64, limit: u32) -> MetadataResult<Vec<FileRow>> {
            let offset = i64::try_from(offset)
                .map_err(|_| MetadataError::Config(format!("offset {offset} out of range")))?;
            let rows = sqlx::query_as::<_, FileRow>(
                "SELECT * FROM files ORDER BY created_at DESC, file_id ASC LIMIT ? OFFSET ?",
            )
            .bind(i64::from(limit))
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn count_files(&self) -> MetadataResult<u64> {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
                .fetch_one(&self.pool)
                .await?;
            Ok(count.max(0) as u64)
        }

        async fn get_unclaimed_complete_files(
            &self,
            updated_before: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<FileRow>> {
            let rows = sqlx::query_as::<_, FileRow>(
                r#"
                SELECT f.* FROM files f
                WHERE f.state = ? AND f.updated_at < ?
                  AND (SELECT COUNT(*) FROM chunks c WHERE c.file_id = f.file_id) >= f.num_chunks
                ORDER BY f.updated_at ASC
                LIMIT ?
                "#,
            )
            .bind(FileState::Incomplete.as_str())
            .bind(updated_before)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn get_stale_files(
            &self,
            state: FileState,
            updated_before: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<FileRow>> {
            let rows = sqlx::query_as::<_, FileRow>(
                r#"
                SELECT * FROM files
                WHERE state = ? AND updated_at < ?
                ORDER BY updated_at ASC
                LIMIT ?
                "#,
            )
            .bind(state.as_str())
            .bind(updated_before)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn reclaim_stale_file(
            &self,
            file_id: Uuid,
            state: FileState,
            updated_before: OffsetDateTime,
            now: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                "UPDATE files SET updated_at = ? WHERE file_id = ? AND state = ? AND updated_at < ?",
            )
            .bind(now)
            .bind(file_id)
            .bind(state.as_str())
            .bind(updated_before)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }
    }

    #[async_trait]
    impl ChunkRepo for SqliteStore {
        async fn chunk_exists_for_file(
            &self,
            file_id: Uuid,
            chunk_hash: &str,
        ) -> MetadataResult<bool> {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM chunks WHERE file_id = ? AND chunk_hash = ?)",
            )
            .bind(file_id)
            .bind(chunk_hash)
            .fetch_one(&self.pool)
            .await?;
            Ok(exists)
        }

        async fn count_chunks_for_file(&self, file_id: Uuid) -> MetadataResult<u64> {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE file_id = ?")
                .bind(file_id)
                .fetch_one(&self.pool)
                .await?;
            Ok(count.max(0) as u64)
        }

        async fn insert_chunk(&self, chunk: &ChunkRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO chunks (chunk_id, file_id, position, size_bytes, chunk_hash, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(chunk.chunk_id)
            .bind(chunk.file_id)
            .bind(chunk.position)
            .bind(chunk.size_bytes)
            .bind(&chunk.chunk_hash)
            .bind(chunk.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                MetadataError::from_insert(
                    e,
                    format!("chunk {} for file {}", chunk.chunk_hash, chunk.file_id),
                )
            })?;
            Ok(())
        }

        async fn get_chunks_for_file(&self, file_id: Uuid) -> MetadataResult<Vec<ChunkRow>> {
            let rows = sqlx::query_as::<_, ChunkRow>(
                "SELECT * FROM chunks WHERE file_id = ? ORDER BY position ASC, created_at ASC",
            )
            .bind(file_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    file_id BLOB PRIMARY KEY,
    file_hash TEXT NOT NULL UNIQUE,
    size_bytes INTEGER NOT NULL CHECK (size_bytes >= 0),
    num_chunks INTEGER NOT NULL CHECK (num_chunks >= 1),
    name TEXT NOT NULL,
    content_type TEXT NOT NULL DEFAULT '',
    state TEXT NOT NULL DEFAULT 'incomplete',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_files_state_updated ON files(state, updated_at);

CREATE TABLE IF NOT EXISTS chunks (
    chunk_id BLOB PRIMARY KEY,
    file_id BLOB NOT NULL REFERENCES files(file_id),
    position INTEGER NOT NULL CHECK (position >= 0),
    size_bytes INTEGER NOT NULL CHECK (size_bytes >= 0),
    chunk_hash TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(file_id, chunk_hash)
);
CREATE INDEX IF NOT EXISTS idx_chunks_file_position ON chunks(file_id, position);
"#;
