use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

use crate::{
    collection::{IngestTicket, PreviewCollection},
    ids::{IdGenerator, MonotonicIds},
    preview::ObjectUrlRegistry,
    source::MediaSource,
    store::ChunkStore,
    ChunkRecord, FileId, FileRecord, IngestConfig, IngestError, IngestResult, Partition,
    PreviewHandle,
};

/// How an ingestion task ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Every chunk is durable
    Completed { total_chunks: u32 },
    /// Stopped at a chunk boundary; `committed_chunks` form a contiguous prefix
    Canceled { committed_chunks: u32 },
}

/// Handle to a running ingestion. Dropping it does not stop the task.
#[derive(Debug)]
pub struct IngestHandle {
    file_id: FileId,
    task: JoinHandle<IngestResult<IngestOutcome>>,
}

impl IngestHandle {
    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the task and return how it ended
    pub async fn wait(self) -> IngestResult<IngestOutcome> {
        self.task.await.map_err(|e| {
            IngestError::internal(format!("ingestion task for file {} failed: {}", self.file_id, e))
        })?
    }
}

/// Splits files into chunks and writes them, in order, to the chunk store
pub struct ChunkIngestionPipeline {
    config: IngestConfig,
    store: Arc<dyn ChunkStore>,
    registry: Arc<ObjectUrlRegistry>,
    collection: Arc<PreviewCollection>,
    ids: Arc<dyn IdGenerator>,
}

impl ChunkIngestionPipeline {
    pub fn new(
        config: IngestConfig,
        store: Arc<dyn ChunkStore>,
        registry: Arc<ObjectUrlRegistry>,
        collection: Arc<PreviewCollection>,
    ) -> IngestResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            registry,
            collection,
            ids: Arc::new(MonotonicIds::new()),
        })
    }

    /// Use a custom id generator
    pub fn with_id_generator<G: IdGenerator + 'static>(mut self, ids: G) -> Self {
        self.ids = Arc::new(ids);
        self
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Accept a file and start writing its chunks in the background.
    ///
    /// The record is visible in the collection with 0% before this returns.
    /// Must be called from within a Tokio runtime.
    #[instrument(skip(self, file), fields(file = file.name(), size = file.size()))]
    pub fn ingest(&self, file: Arc<dyn MediaSource>, partition: Partition) -> IngestHandle {
        let file_id = self.ids.next_id();
        let size_bytes = file.size();
        let preview = self.registry.register(file.clone());

        let total_chunks = match self.config.total_chunks(size_bytes) {
            Ok(total_chunks) => total_chunks,
            Err(e) => return self.reject(file_id, file.name(), size_bytes, preview, partition, e),
        };

        let record = FileRecord::accepted(file_id, file.name().to_string(), size_bytes, total_chunks)
            .with_preview_handle(preview);
        let ticket = self.collection.add(partition, record);

        info!(%file_id, %partition, total_chunks, "Accepted file");

        let job = ChunkJob {
            file_id,
            file,
            total_chunks,
            ticket,
            config: self.config.clone(),
            store: self.store.clone(),
            collection: self.collection.clone(),
        };
        let span = info_span!("ingest", %file_id, %partition);
        let task = tokio::spawn(job.run().instrument(span));

        IngestHandle { file_id, task }
    }

    /// Record a file that cannot be chunked as already failed, so it stays
    /// visible and removable like any other failed ingestion
    fn reject(
        &self,
        file_id: FileId,
        name: &str,
        size_bytes: u64,
        preview: PreviewHandle,
        partition: Partition,
        error: IngestError,
    ) -> IngestHandle {
        let mut record = FileRecord::accepted(file_id, name.to_string(), size_bytes, 0)
            .with_preview_handle(preview);
        record.total_chunks = None;
        self.collection.add(partition, record);

        warn!(%file_id, %partition, error = %error, "Rejected file");
        self.collection.mark_failed(file_id, &error.to_string());

        let task = tokio::spawn(async move { Err(error) });
        IngestHandle { file_id, task }
    }

    /// Accept several files; each is ingested independently
    pub fn ingest_batch<I>(&self, files: I, partition: Partition) -> Vec<IngestHandle>
    where
        I: IntoIterator<Item = Arc<dyn MediaSource>>,
    {
        files
            .into_iter()
            .map(|file| self.ingest(file, partition))
            .collect()
    }
}

struct ChunkJob {
    file_id: FileId,
    file: Arc<dyn MediaSource>,
    total_chunks: u32,
    ticket: IngestTicket,
    config: IngestConfig,
    store: Arc<dyn ChunkStore>,
    collection: Arc<PreviewCollection>,
}

impl ChunkJob {
    async fn run(self) -> IngestResult<IngestOutcome> {
        match self.write_chunks().await {
            Ok(IngestOutcome::Completed { total_chunks }) => {
                self.collection.set_loading_complete(self.file_id);
                info!(total_chunks, "Ingestion complete");
                Ok(IngestOutcome::Completed { total_chunks })
            }
            Ok(IngestOutcome::Canceled { committed_chunks }) => {
                self.collection.mark_canceled(self.file_id);
                info!(committed_chunks, "Ingestion canceled");
                Ok(IngestOutcome::Canceled { committed_chunks })
            }
            Err(e) => {
                error!(error = %e, "Ingestion failed");
                self.collection.mark_failed(self.file_id, &e.to_string());
                Err(e)
            }
        }
    }

    /// Chunk `i + 1` is never started before chunk `i` is durable, so a crash
    /// leaves a contiguous prefix.
    async fn write_chunks(&self) -> IngestResult<IngestOutcome> {
        let size = self.file.size();

        for index in 0..self.total_chunks {
            if self.ticket.is_canceled() {
                return Ok(IngestOutcome::Canceled { committed_chunks: index });
            }

            {
                let _writes = self.ticket.lock_writes().await;
                if self.ticket.is_canceled() {
                    return Ok(IngestOutcome::Canceled { committed_chunks: index });
                }

                let (start, end) = self.config.chunk_bounds(index, size);
                let payload = self
                    .file
                    .read_range(start, end)
                    .await
                    .map_err(|e| IngestError::source_read(self.file.name(), e))?;

                self.store
                    .put(ChunkRecord::new(self.file_id, index, self.total_chunks, payload))
                    .await?;
            }

            debug!(chunk_index = index, "Chunk committed");

            // The final chunk is reported by set_loading_complete
            if index + 1 < self.total_chunks {
                self.collection
                    .record_committed(self.file_id, index + 1, self.total_chunks);

                if self.config.yield_between_chunks {
                    tokio::task::yield_now().await;
                }
            }
        }

        Ok(IngestOutcome::Completed {
            total_chunks: self.total_chunks,
        })
    }
}
