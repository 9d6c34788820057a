use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{store::ChunkStore, ChunkRecord, FileId, IngestResult};

type ChunkMap = BTreeMap<(FileId, u32), ChunkRecord>;

/// In-memory chunk store for testing and ephemeral sessions
#[derive(Clone, Default)]
pub struct MemoryChunkStore {
    /// Chunks ordered by (file_id, chunk_index) so per-file scans are range reads
    chunks: Arc<RwLock<ChunkMap>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a single chunk, leaving the rest of the file in place
    pub fn remove_chunk(&self, file_id: FileId, chunk_index: u32) -> bool {
        self.chunks.write().remove(&(file_id, chunk_index)).is_some()
    }

    /// Total number of chunks across all files
    pub fn len(&self) -> usize {
        self.chunks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.read().is_empty()
    }

    /// Ids of every file with at least one chunk
    pub fn file_ids(&self) -> Vec<FileId> {
        let chunks = self.chunks.read();
        let mut ids: Vec<FileId> = chunks.keys().map(|(id, _)| *id).collect();
        ids.dedup();
        ids
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn put(&self, chunk: ChunkRecord) -> IngestResult<()> {
        self.chunks.write().insert(chunk.key(), chunk);
        Ok(())
    }

    async fn delete_by_file(&self, file_id: FileId) -> IngestResult<()> {
        self.chunks.write().retain(|(id, _), _| *id != file_id);
        Ok(())
    }

    async fn get_all_by_file(&self, file_id: FileId) -> IngestResult<Vec<ChunkRecord>> {
        let chunks = self.chunks.read();
        Ok(chunks
            .range((file_id, 0)..=(file_id, u32::MAX))
            .map(|(_, chunk)| chunk.clone())
            .collect())
    }

    async fn count_by_file(&self, file_id: FileId) -> IngestResult<usize> {
        Ok(self.chunks.read().range((file_id, 0)..=(file_id, u32::MAX)).count())
    }
}
