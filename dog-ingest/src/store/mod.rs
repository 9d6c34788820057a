#[cfg(feature = "memory")]
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use crate::{ChunkRecord, FileId, IngestError, IngestResult};

/// Durable chunk persistence keyed by `(file_id, chunk_index)`
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Upsert a chunk. Resolves only after the write is durable.
    async fn put(&self, chunk: ChunkRecord) -> IngestResult<()>;

    /// Remove every chunk of a file. Deleting nothing is not an error.
    async fn delete_by_file(&self, file_id: FileId) -> IngestResult<()>;

    /// All chunks of a file, in no particular order
    async fn get_all_by_file(&self, file_id: FileId) -> IngestResult<Vec<ChunkRecord>>;

    /// Number of chunks stored for a file
    async fn count_by_file(&self, file_id: FileId) -> IngestResult<usize> {
        Ok(self.get_all_by_file(file_id).await?.len())
    }
}

/// Rebuild a file from its stored chunks.
///
/// Fails with `Invalid` when the stored indices are not exactly
/// `0..total_chunks` or when chunks disagree on `total_chunks`.
pub async fn assemble(store: &dyn ChunkStore, file_id: FileId) -> IngestResult<Bytes> {
    let mut chunks = store.get_all_by_file(file_id).await?;
    chunks.sort_by_key(|c| c.chunk_index);

    let Some(first) = chunks.first() else {
        return Ok(Bytes::new());
    };
    let total = first.total_chunks;

    if chunks.len() != total as usize {
        return Err(IngestError::invalid(format!(
            "file {} has {} of {} chunks",
            file_id,
            chunks.len(),
            total
        )));
    }

    let mut out = BytesMut::with_capacity(chunks.iter().map(|c| c.payload.len()).sum());
    for (expected, chunk) in chunks.iter().enumerate() {
        if chunk.chunk_index != expected as u32 || chunk.total_chunks != total {
            return Err(IngestError::invalid(format!(
                "file {} has a gap or mismatch at chunk {}",
                file_id, expected
            )));
        }
        out.extend_from_slice(&chunk.payload);
    }

    Ok(out.freeze())
}
