use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    events::{CollectionEvent, EventStream},
    preview::ObjectUrlRegistry,
    progress_percent,
    store::ChunkStore,
    FileId, FileRecord, IngestResult, Partition,
};

/// Cooperative cancellation plus a per-file write lock.
///
/// The pipeline holds the lock across "check cancellation, write chunk";
/// removal cancels first and then takes the lock, so no chunk can be written
/// after removal has started deleting.
#[derive(Debug, Clone, Default)]
pub struct IngestTicket {
    cancel: CancellationToken,
    writes: Arc<Mutex<()>>,
}

impl IngestTicket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait until no chunk write for this file is in flight
    pub(crate) async fn lock_writes(&self) -> OwnedMutexGuard<()> {
        self.writes.clone().lock_owned().await
    }
}

struct Entry {
    record: FileRecord,
    ticket: IngestTicket,
}

#[derive(Default)]
struct Partitions {
    image: Vec<Entry>,
    video: Vec<Entry>,
}

impl Partitions {
    fn entries(&self, partition: Partition) -> &Vec<Entry> {
        match partition {
            Partition::Image => &self.image,
            Partition::Video => &self.video,
        }
    }

    fn entries_mut(&mut self, partition: Partition) -> &mut Vec<Entry> {
        match partition {
            Partition::Image => &mut self.image,
            Partition::Video => &mut self.video,
        }
    }

    fn find(&self, id: FileId) -> Option<(Partition, &Entry)> {
        Partition::ALL.into_iter().find_map(|partition| {
            self.entries(partition)
                .iter()
                .find(|e| e.record.id == id)
                .map(|e| (partition, e))
        })
    }

    fn find_mut(&mut self, id: FileId) -> Option<&mut Entry> {
        let Partitions { image, video } = self;
        image
            .iter_mut()
            .chain(video.iter_mut())
            .find(|e| e.record.id == id)
    }

    fn take(&mut self, id: FileId) -> Option<(Partition, Entry)> {
        Partition::ALL.into_iter().find_map(|partition| {
            let entries = self.entries_mut(partition);
            let index = entries.iter().position(|e| e.record.id == id)?;
            Some((partition, entries.remove(index)))
        })
    }
}

/// The observable set of file records, split into image and video partitions.
///
/// Records keep insertion order. Every mutation is followed by a
/// [`CollectionEvent`] on the broadcast channel returned by [`subscribe`](Self::subscribe).
pub struct PreviewCollection {
    partitions: RwLock<Partitions>,
    store: Arc<dyn ChunkStore>,
    registry: Arc<ObjectUrlRegistry>,
    events: broadcast::Sender<CollectionEvent>,
}

impl PreviewCollection {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        registry: Arc<ObjectUrlRegistry>,
        event_capacity: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            partitions: RwLock::new(Partitions::default()),
            store,
            registry,
            events,
        }
    }

    fn emit(&self, event: CollectionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Subscribe to change events. Events missed by a lagging subscriber are skipped.
    pub fn subscribe(&self) -> EventStream {
        let stream = BroadcastStream::new(self.events.subscribe()).filter_map(|event| event.ok());
        Box::pin(stream)
    }

    /// Insert a record at the end of `partition` and return its ingestion ticket
    pub fn add(&self, partition: Partition, record: FileRecord) -> IngestTicket {
        let ticket = IngestTicket::new();
        let file_id = record.id;

        self.partitions.write().entries_mut(partition).push(Entry {
            record,
            ticket: ticket.clone(),
        });

        self.emit(CollectionEvent::Added {
            file_id,
            partition,
            at: Utc::now(),
        });
        ticket
    }

    /// Raise progress of a loading record. Lower values and finished records are ignored.
    pub fn update_progress(&self, id: FileId, percent: u8) -> bool {
        let percent = percent.min(100);
        let updated = {
            let mut partitions = self.partitions.write();
            match partitions.find_mut(id) {
                Some(entry) if entry.record.loading && percent > entry.record.progress_percent => {
                    entry.record.progress_percent = percent;
                    true
                }
                _ => false,
            }
        };

        if updated {
            self.emit(CollectionEvent::Progress {
                file_id: id,
                percent,
                at: Utc::now(),
            });
        }
        updated
    }

    /// Record `committed` of `total` chunks as durable
    pub fn record_committed(&self, id: FileId, committed: u32, total: u32) -> bool {
        self.update_progress(id, progress_percent(committed, total))
    }

    /// Normal completion: `loading=false`, `progress=100`
    pub fn set_loading_complete(&self, id: FileId) -> bool {
        let updated = self.finish(id, |record| record.progress_percent = 100);
        if updated {
            self.emit(CollectionEvent::Completed {
                file_id: id,
                at: Utc::now(),
            });
        }
        updated
    }

    /// Ingestion failed: `loading=false`, progress frozen
    pub fn mark_failed(&self, id: FileId, error: &str) -> bool {
        let updated = self.finish(id, |_| {});
        if updated {
            self.emit(CollectionEvent::Failed {
                file_id: id,
                error: error.to_string(),
                at: Utc::now(),
            });
        }
        updated
    }

    /// Ingestion canceled: `loading=false`, progress frozen
    pub fn mark_canceled(&self, id: FileId) -> bool {
        let updated = self.finish(id, |_| {});
        if updated {
            self.emit(CollectionEvent::Canceled {
                file_id: id,
                at: Utc::now(),
            });
        }
        updated
    }

    fn finish(&self, id: FileId, apply: impl FnOnce(&mut FileRecord)) -> bool {
        let mut partitions = self.partitions.write();
        match partitions.find_mut(id) {
            Some(entry) if entry.record.loading => {
                apply(&mut entry.record);
                entry.record.loading = false;
                true
            }
            _ => false,
        }
    }

    /// Records of `partition` in insertion order
    pub fn list(&self, partition: Partition) -> Vec<FileRecord> {
        self.partitions
            .read()
            .entries(partition)
            .iter()
            .map(|e| e.record.clone())
            .collect()
    }

    pub fn get(&self, id: FileId) -> Option<FileRecord> {
        self.partitions.read().find(id).map(|(_, e)| e.record.clone())
    }

    pub fn partition_of(&self, id: FileId) -> Option<Partition> {
        self.partitions.read().find(id).map(|(partition, _)| partition)
    }

    pub fn len(&self, partition: Partition) -> usize {
        self.partitions.read().entries(partition).len()
    }

    pub fn is_empty(&self, partition: Partition) -> bool {
        self.len(partition) == 0
    }

    /// Ticket of a record, used by the pipeline to observe cancellation
    pub fn ticket(&self, id: FileId) -> Option<IngestTicket> {
        self.partitions.read().find(id).map(|(_, e)| e.ticket.clone())
    }

    /// Remove a record together with its chunks and preview handle.
    ///
    /// Order: cancel ingestion and wait for the in-flight chunk write, delete
    /// stored chunks, revoke the preview handle, drop the record. If deleting
    /// chunks fails the error is returned and the record stays visible, so the
    /// removal can be retried. Unknown ids return `Ok(None)`.
    #[instrument(skip(self))]
    pub async fn remove(&self, id: FileId) -> IngestResult<Option<FileRecord>> {
        let Some(ticket) = self.ticket(id) else {
            debug!("Nothing to remove");
            return Ok(None);
        };

        ticket.cancel();
        let _writes = ticket.lock_writes().await;

        if let Err(e) = self.store.delete_by_file(id).await {
            warn!(error = %e, "Chunk cleanup failed, keeping record");
            return Err(e);
        }

        if let Some(handle) = self.get(id).and_then(|record| record.preview_handle) {
            self.registry.revoke(&handle);
        }

        let Some((partition, entry)) = self.partitions.write().take(id) else {
            // A concurrent removal finished first
            return Ok(None);
        };

        info!(%partition, file = %entry.record.file_name, "Removed file");
        self.emit(CollectionEvent::Removed {
            file_id: id,
            partition,
            at: Utc::now(),
        });
        Ok(Some(entry.record))
    }

    /// Remove every record of `partition`, oldest first, with the same cleanup
    /// as [`remove`](Self::remove). Stops at the first storage failure; records
    /// removed before it stay removed. The other partition is never touched.
    #[instrument(skip(self))]
    pub async fn remove_all(&self, partition: Partition) -> IngestResult<Vec<FileRecord>> {
        let ids: Vec<FileId> = self
            .partitions
            .read()
            .entries(partition)
            .iter()
            .map(|e| e.record.id)
            .collect();

        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.remove(id).await? {
                removed.push(record);
            }
        }
        Ok(removed)
    }

    /// Process teardown: cancel all ingestion and revoke every preview handle.
    /// Records and stored chunks are left in place.
    pub fn shutdown(&self) -> usize {
        let released: Vec<FileId> = {
            let mut partitions = self.partitions.write();
            let Partitions { image, video } = &mut *partitions;

            let mut released = Vec::new();
            for entry in image.iter_mut().chain(video.iter_mut()) {
                entry.ticket.cancel();
                if let Some(handle) = entry.record.preview_handle.take() {
                    if self.registry.revoke(&handle) {
                        released.push(entry.record.id);
                    }
                }
            }
            released
        };

        for file_id in &released {
            self.emit(CollectionEvent::PreviewRevoked {
                file_id: *file_id,
                at: Utc::now(),
            });
        }
        released.len()
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::{source::MemoryFile, store::memory::MemoryChunkStore, ChunkRecord};
    use bytes::Bytes;

    fn collection() -> (PreviewCollection, MemoryChunkStore, Arc<ObjectUrlRegistry>) {
        let store = MemoryChunkStore::new();
        let registry = Arc::new(ObjectUrlRegistry::new());
        let collection = PreviewCollection::new(Arc::new(store.clone()), registry.clone(), 64);
        (collection, store, registry)
    }

    fn record(id: u64) -> FileRecord {
        FileRecord::accepted(FileId(id), format!("file-{id}.png"), 10, 2)
    }

    #[test]
    fn test_progress_only_moves_forward() {
        let (collection, _, _) = collection();
        collection.add(Partition::Image, record(1));

        assert!(collection.update_progress(FileId(1), 40));
        assert!(!collection.update_progress(FileId(1), 30));
        assert!(!collection.update_progress(FileId(1), 40));
        assert_eq!(collection.get(FileId(1)).unwrap().progress_percent, 40);
    }

    #[test]
    fn test_finished_records_are_frozen() {
        let (collection, _, _) = collection();
        collection.add(Partition::Image, record(1));
        collection.update_progress(FileId(1), 50);

        assert!(collection.mark_failed(FileId(1), "disk full"));
        assert!(!collection.update_progress(FileId(1), 90));
        assert!(!collection.set_loading_complete(FileId(1)));

        let record = collection.get(FileId(1)).unwrap();
        assert!(!record.loading);
        assert_eq!(record.progress_percent, 50);
    }

    #[test]
    fn test_list_keeps_insertion_order_per_partition() {
        let (collection, _, _) = collection();
        collection.add(Partition::Video, record(3));
        collection.add(Partition::Image, record(1));
        collection.add(Partition::Video, record(2));

        let ids: Vec<_> = collection.list(Partition::Video).iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![FileId(3), FileId(2)]);
        assert_eq!(collection.partition_of(FileId(1)), Some(Partition::Image));
        assert_eq!(collection.len(Partition::Image), 1);
    }

    #[tokio::test]
    async fn test_remove_cancels_deletes_and_revokes() {
        let (collection, store, registry) = collection();
        let handle = registry.register(Arc::new(MemoryFile::new("a.png", vec![1u8; 10])));
        let ticket = collection.add(Partition::Image, record(1).with_preview_handle(handle.clone()));
        store
            .put(ChunkRecord::new(FileId(1), 0, 2, Bytes::from_static(b"abcde")))
            .await
            .unwrap();

        let removed = collection.remove(FileId(1)).await.unwrap().unwrap();
        assert_eq!(removed.id, FileId(1));
        assert!(ticket.is_canceled());
        assert!(store.is_empty());
        assert!(!registry.is_live(&handle));
        assert!(collection.get(FileId(1)).is_none());

        assert!(collection.remove(FileId(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_all_leaves_other_partition() {
        let (collection, _, _) = collection();
        collection.add(Partition::Image, record(1));
        collection.add(Partition::Image, record(2));
        collection.add(Partition::Video, record(3));

        let removed = collection.remove_all(Partition::Image).await.unwrap();
        assert_eq!(removed.len(), 2);
        assert!(collection.is_empty(Partition::Image));
        assert_eq!(collection.len(Partition::Video), 1);
    }

    #[tokio::test]
    async fn test_events_follow_mutations() {
        use tokio_stream::StreamExt;

        let (collection, _, _) = collection();
        let mut events = collection.subscribe();

        collection.add(Partition::Image, record(1));
        collection.record_committed(FileId(1), 1, 2);
        collection.set_loading_complete(FileId(1));

        let names: Vec<_> = vec![
            events.next().await.unwrap().event_name(),
            events.next().await.unwrap().event_name(),
            events.next().await.unwrap().event_name(),
        ];
        assert_eq!(names, vec!["added", "progress", "completed"]);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_and_revokes() {
        let (collection, _, registry) = collection();
        let handle = registry.register(Arc::new(MemoryFile::new("a.png", vec![1u8; 10])));
        let ticket = collection.add(Partition::Video, record(1).with_preview_handle(handle.clone()));

        let mut events = collection.subscribe();

        assert_eq!(collection.shutdown(), 1);
        assert!(ticket.is_canceled());
        assert!(!registry.is_live(&handle));

        let record = collection.get(FileId(1)).unwrap();
        assert!(record.preview_handle.is_none());
        assert_eq!(collection.shutdown(), 0);

        let event = events.next().await.unwrap();
        assert_eq!(event.event_name(), "preview_revoked");
        assert_eq!(event.file_id(), FileId(1));
    }
}
