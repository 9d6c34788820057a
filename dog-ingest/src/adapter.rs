use std::sync::Arc;

use bytes::Bytes;
use tracing::{info, instrument};

use crate::{
    collection::PreviewCollection,
    events::EventStream,
    ids::IdGenerator,
    manifest::{ExportReport, ManifestEntry, MetadataExporter},
    pipeline::{ChunkIngestionPipeline, IngestHandle},
    preview::ObjectUrlRegistry,
    slots::SlotStore,
    source::MediaSource,
    store::{self, ChunkStore},
    ByteStream, FileId, FileRecord, IngestConfig, IngestError, IngestResult, Partition,
    PreviewHandle,
};

#[cfg(feature = "sqlite")]
use crate::{slots::FsSlotStore, store::sqlite::SqliteChunkStore};

#[cfg(feature = "memory")]
use crate::{slots::MemorySlotStore, store::memory::MemoryChunkStore};

/// The ingestion engine: store, preview registry, collection, pipeline and
/// exporter wired together. Embed one per process.
pub struct IngestAdapter {
    config: IngestConfig,
    store: Arc<dyn ChunkStore>,
    registry: Arc<ObjectUrlRegistry>,
    collection: Arc<PreviewCollection>,
    pipeline: ChunkIngestionPipeline,
    exporter: MetadataExporter,
    #[cfg(feature = "sqlite")]
    sqlite: Option<Arc<SqliteChunkStore>>,
}

impl IngestAdapter {
    /// Wire an adapter around any chunk and slot store
    pub fn new<S, L>(config: IngestConfig, store: S, slots: L) -> IngestResult<Self>
    where
        S: ChunkStore + 'static,
        L: SlotStore + 'static,
    {
        Self::with_parts(config, Arc::new(store), Arc::new(slots))
    }

    pub fn with_parts(
        config: IngestConfig,
        store: Arc<dyn ChunkStore>,
        slots: Arc<dyn SlotStore>,
    ) -> IngestResult<Self> {
        let registry = Arc::new(ObjectUrlRegistry::new());
        let collection = Arc::new(PreviewCollection::new(
            store.clone(),
            registry.clone(),
            config.event_capacity,
        ));
        let pipeline = ChunkIngestionPipeline::new(
            config.clone(),
            store.clone(),
            registry.clone(),
            collection.clone(),
        )?;
        let exporter = MetadataExporter::new(collection.clone(), store.clone(), slots);

        Ok(Self {
            config,
            store,
            registry,
            collection,
            pipeline,
            exporter,
            #[cfg(feature = "sqlite")]
            sqlite: None,
        })
    }

    /// SQLite chunks at `config.database_path`, manifests under `config.manifest_dir`.
    ///
    /// The database is opened on first use, so this never fails on an
    /// unusable path; the first store operation reports it instead.
    #[cfg(feature = "sqlite")]
    pub fn open_sqlite(config: IngestConfig) -> IngestResult<Self> {
        let sqlite = Arc::new(SqliteChunkStore::new(&config.database_path));
        let slots = Arc::new(FsSlotStore::new(&config.manifest_dir));
        let mut adapter = Self::with_parts(config, sqlite.clone(), slots)?;
        adapter.sqlite = Some(sqlite);
        Ok(adapter)
    }

    /// Everything kept in memory
    #[cfg(feature = "memory")]
    pub fn in_memory(config: IngestConfig) -> IngestResult<Self> {
        Self::new(config, MemoryChunkStore::new(), MemorySlotStore::new())
    }

    /// Replace the file id generator
    pub fn with_id_generator<G: IdGenerator + 'static>(mut self, ids: G) -> Self {
        self.pipeline = self.pipeline.with_id_generator(ids);
        self
    }

    /// Start ingesting a file. Must be called from within a Tokio runtime.
    pub fn ingest(&self, file: Arc<dyn MediaSource>, partition: Partition) -> IngestHandle {
        self.pipeline.ingest(file, partition)
    }

    pub fn ingest_batch<I>(&self, files: I, partition: Partition) -> Vec<IngestHandle>
    where
        I: IntoIterator<Item = Arc<dyn MediaSource>>,
    {
        self.pipeline.ingest_batch(files, partition)
    }

    pub async fn remove(&self, id: FileId) -> IngestResult<Option<FileRecord>> {
        self.collection.remove(id).await
    }

    pub async fn remove_all(&self, partition: Partition) -> IngestResult<Vec<FileRecord>> {
        self.collection.remove_all(partition).await
    }

    pub fn list(&self, partition: Partition) -> Vec<FileRecord> {
        self.collection.list(partition)
    }

    pub fn get(&self, id: FileId) -> Option<FileRecord> {
        self.collection.get(id)
    }

    pub fn subscribe(&self) -> EventStream {
        self.collection.subscribe()
    }

    pub async fn export(&self, partition: Partition) -> IngestResult<ExportReport> {
        self.exporter.export(partition).await
    }

    pub async fn load_manifest(&self, partition: Partition) -> IngestResult<Option<Vec<ManifestEntry>>> {
        self.exporter.load(partition).await
    }

    /// Rebuild a file's bytes from the chunk store
    pub async fn reassemble(&self, id: FileId) -> IngestResult<Bytes> {
        store::assemble(self.store.as_ref(), id).await
    }

    /// Read `[start, end)` of a file through its preview handle
    pub async fn open_preview(&self, handle: &PreviewHandle, start: u64, end: u64) -> IngestResult<Bytes> {
        self.registry.open_range(handle, start, end).await
    }

    /// Stream a previewed file in pieces of `piece_size` bytes
    pub fn stream_preview(&self, handle: &PreviewHandle, piece_size: u64) -> IngestResult<ByteStream> {
        self.registry
            .stream(handle, piece_size)
            .ok_or_else(|| IngestError::invalid(format!("preview handle {} is not live", handle)))
    }

    /// Process teardown: cancel every ingestion, revoke every preview handle
    /// and close the database. Stored chunks stay for the next session.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> usize {
        let mut revoked = self.collection.shutdown();
        revoked += self.registry.revoke_all();

        #[cfg(feature = "sqlite")]
        {
            if let Some(sqlite) = &self.sqlite {
                sqlite.close().await;
            }
        }

        info!(revoked, "Ingestion engine shut down");
        revoked
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn collection(&self) -> &Arc<PreviewCollection> {
        &self.collection
    }

    pub fn registry(&self) -> &Arc<ObjectUrlRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::source::MemoryFile;

    fn adapter() -> IngestAdapter {
        IngestAdapter::in_memory(IngestConfig::new().with_chunk_size(4)).unwrap()
    }

    #[tokio::test]
    async fn test_reassemble_after_ingest() {
        let adapter = adapter();
        let handle = adapter.ingest(
            Arc::new(MemoryFile::new("notes.png", &b"0123456789"[..])),
            Partition::Image,
        );
        let id = handle.file_id();
        handle.wait().await.unwrap();

        assert_eq!(&adapter.reassemble(id).await.unwrap()[..], b"0123456789");
        assert!(adapter.get(id).unwrap().is_complete());
    }

    #[tokio::test]
    async fn test_preview_reads_source_bytes() {
        let adapter = adapter();
        let handle = adapter.ingest(
            Arc::new(MemoryFile::new("clip.mp4", &b"abcdefgh"[..])),
            Partition::Video,
        );
        let id = handle.file_id();
        handle.wait().await.unwrap();

        let preview = adapter.get(id).unwrap().preview_handle.unwrap();
        assert_eq!(&adapter.open_preview(&preview, 2, 5).await.unwrap()[..], b"cde");
    }

    #[tokio::test]
    async fn test_shutdown_revokes_handles_and_keeps_records() {
        let adapter = adapter();
        let handle = adapter.ingest(
            Arc::new(MemoryFile::new("a.png", &b"abc"[..])),
            Partition::Image,
        );
        let id = handle.file_id();
        handle.wait().await.unwrap();
        let preview = adapter.get(id).unwrap().preview_handle.unwrap();

        assert_eq!(adapter.shutdown().await, 1);
        assert!(!adapter.registry().is_live(&preview));
        assert!(adapter.stream_preview(&preview, 2).is_err());
        assert_eq!(adapter.list(Partition::Image).len(), 1);
        assert_eq!(&adapter.reassemble(id).await.unwrap()[..], b"abc");
    }

    #[test]
    fn test_rejects_zero_chunk_size() {
        let config = IngestConfig::new().with_chunk_size(0);
        assert!(matches!(
            IngestAdapter::in_memory(config),
            Err(IngestError::Invalid { .. })
        ));
    }
}
