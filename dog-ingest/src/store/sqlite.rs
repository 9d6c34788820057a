use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, instrument};

use crate::{store::ChunkStore, ChunkRecord, FileId, IngestError, IngestResult};

const CREATE_CHUNKS_TABLE: &str = "CREATE TABLE IF NOT EXISTS chunks (
    file_id INTEGER NOT NULL,
    chunk_index INTEGER NOT NULL,
    total_chunks INTEGER NOT NULL,
    payload BLOB NOT NULL,
    PRIMARY KEY (file_id, chunk_index)
)";

const CREATE_FILE_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_chunks_file_id ON chunks (file_id)";

type ChunkRow = (i64, i64, i64, Vec<u8>);

/// SQLite-backed chunk store.
///
/// The connection is opened lazily on first use and memoized. Every caller
/// awaits the same initialization; if it fails the failure is kept and every
/// later call gets `EnvironmentUnsupported` without another attempt.
pub struct SqliteChunkStore {
    path: PathBuf,
    pool: OnceCell<Result<SqlitePool, String>>,
}

impl SqliteChunkStore {
    /// Create a store for the database at `path`. Nothing is opened yet.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            pool: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once initialization has run, successfully or not
    pub fn is_initialized(&self) -> bool {
        self.pool.initialized()
    }

    async fn pool(&self) -> IngestResult<&SqlitePool> {
        let initialized = self.pool.get_or_init(|| open_pool(self.path.clone())).await;
        initialized
            .as_ref()
            .map_err(|reason| IngestError::environment(reason.clone()))
    }

    /// Close the connection if it was opened
    pub async fn close(&self) {
        if let Some(Ok(pool)) = self.pool.get() {
            pool.close().await;
        }
    }
}

async fn open_pool(path: PathBuf) -> Result<SqlitePool, String> {
    let result = connect(&path).await;
    match &result {
        Ok(_) => info!(path = %path.display(), "Opened chunk store"),
        Err(reason) => error!(path = %path.display(), %reason, "Chunk store unavailable"),
    }
    result
}

async fn connect(path: &Path) -> Result<SqlitePool, String> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("cannot create {}: {}", parent.display(), e))?;
        }
    }

    let opts = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .busy_timeout(Duration::from_secs(5));

    // One connection serializes writers; SQLite allows a single writer at a time.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
        .map_err(|e| format!("cannot open {}: {}", path.display(), e))?;

    for statement in [CREATE_CHUNKS_TABLE, CREATE_FILE_INDEX] {
        sqlx::query(statement)
            .execute(&pool)
            .await
            .map_err(|e| format!("cannot create schema in {}: {}", path.display(), e))?;
    }

    Ok(pool)
}

fn row_to_chunk(row: ChunkRow) -> IngestResult<ChunkRecord> {
    let (file_id, chunk_index, total_chunks, payload) = row;
    let convert = |value: i64, column: &str| {
        u32::try_from(value)
            .map_err(|_| IngestError::storage_read(format!("{column} out of range: {value}")))
    };

    Ok(ChunkRecord {
        file_id: FileId(file_id as u64),
        chunk_index: convert(chunk_index, "chunk_index")?,
        total_chunks: convert(total_chunks, "total_chunks")?,
        payload: Bytes::from(payload),
    })
}

#[async_trait]
impl ChunkStore for SqliteChunkStore {
    #[instrument(skip(self, chunk), fields(file_id = %chunk.file_id, chunk_index = chunk.chunk_index))]
    async fn put(&self, chunk: ChunkRecord) -> IngestResult<()> {
        let pool = self.pool().await?;

        sqlx::query(
            "INSERT INTO chunks (file_id, chunk_index, total_chunks, payload)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (file_id, chunk_index)
             DO UPDATE SET total_chunks = excluded.total_chunks, payload = excluded.payload",
        )
        .bind(chunk.file_id.get() as i64)
        .bind(chunk.chunk_index as i64)
        .bind(chunk.total_chunks as i64)
        .bind(&chunk.payload[..])
        .execute(pool)
        .await
        .map_err(|e| IngestError::storage_write(e.to_string()))?;

        debug!(bytes = chunk.payload.len(), "Committed chunk");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_by_file(&self, file_id: FileId) -> IngestResult<()> {
        let pool = self.pool().await?;

        let result = sqlx::query("DELETE FROM chunks WHERE file_id = ?")
            .bind(file_id.get() as i64)
            .execute(pool)
            .await
            .map_err(|e| IngestError::storage_write(e.to_string()))?;

        debug!(deleted = result.rows_affected(), "Deleted chunks");
        Ok(())
    }

    async fn get_all_by_file(&self, file_id: FileId) -> IngestResult<Vec<ChunkRecord>> {
        let pool = self.pool().await?;

        let rows: Vec<ChunkRow> = sqlx::query_as(
            "SELECT file_id, chunk_index, total_chunks, payload FROM chunks WHERE file_id = ?",
        )
        .bind(file_id.get() as i64)
        .fetch_all(pool)
        .await
        .map_err(|e| IngestError::storage_read(e.to_string()))?;

        rows.into_iter().map(row_to_chunk).collect()
    }

    async fn count_by_file(&self, file_id: FileId) -> IngestResult<usize> {
        let pool = self.pool().await?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE file_id = ?")
            .bind(file_id.get() as i64)
            .fetch_one(pool)
            .await
            .map_err(|e| IngestError::storage_read(e.to_string()))?;

        Ok(count as usize)
    }
}
