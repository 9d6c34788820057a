use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::{
    collection::PreviewCollection, slots::SlotStore, store::ChunkStore, FileId, FileRecord,
    IngestError, IngestResult, Partition,
};

/// One file as written to a partition manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub id: FileId,
    pub name: String,
    pub size_bytes: u64,
    pub total_chunks: u32,
    pub exported_at_epoch_millis: i64,
}

impl ManifestEntry {
    fn from_record(record: &FileRecord, exported_at_epoch_millis: i64) -> Self {
        Self {
            id: record.id,
            name: record.file_name.clone(),
            size_bytes: record.size_bytes,
            total_chunks: record.total_chunks.unwrap_or(0),
            exported_at_epoch_millis,
        }
    }
}

/// A file whose stored chunk count disagrees with its manifest entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletenessWarning {
    pub file_id: FileId,
    pub expected: u32,
    pub found: usize,
}

/// Result of one export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub partition: Partition,
    /// Number of entries written; 0 means no manifest was written
    pub entries: usize,
    pub warnings: Vec<CompletenessWarning>,
}

impl ExportReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Writes per-partition metadata manifests and checks them against stored chunks
pub struct MetadataExporter {
    collection: Arc<PreviewCollection>,
    store: Arc<dyn ChunkStore>,
    slots: Arc<dyn SlotStore>,
}

impl MetadataExporter {
    pub fn new(
        collection: Arc<PreviewCollection>,
        store: Arc<dyn ChunkStore>,
        slots: Arc<dyn SlotStore>,
    ) -> Self {
        Self {
            collection,
            store,
            slots,
        }
    }

    /// Snapshot `partition` into its manifest slot.
    ///
    /// An empty partition writes nothing. Files whose chunk count does not
    /// match `total_chunks` (still loading, failed, or truncated) are reported
    /// as warnings; the manifest is written regardless.
    #[instrument(skip(self))]
    pub async fn export(&self, partition: Partition) -> IngestResult<ExportReport> {
        let records = self.collection.list(partition);
        if records.is_empty() {
            debug!("Partition empty, skipping export");
            return Ok(ExportReport {
                partition,
                entries: 0,
                warnings: Vec::new(),
            });
        }

        let now = Utc::now().timestamp_millis();
        let entries: Vec<ManifestEntry> = records
            .iter()
            .map(|record| ManifestEntry::from_record(record, now))
            .collect();

        let json = serde_json::to_vec(&entries)?;
        self.slots
            .put(partition.manifest_slot(), Bytes::from(json))
            .await?;

        let mut warnings = Vec::new();
        for entry in &entries {
            let found = self.store.count_by_file(entry.id).await.map_err(|e| {
                IngestError::storage_read(format!(
                    "counting chunks of file {} failed: {}",
                    entry.id, e
                ))
            })?;

            if found != entry.total_chunks as usize {
                warn!(
                    file_id = %entry.id,
                    expected = entry.total_chunks,
                    found,
                    "Stored chunks do not match manifest"
                );
                warnings.push(CompletenessWarning {
                    file_id: entry.id,
                    expected: entry.total_chunks,
                    found,
                });
            }
        }

        info!(entries = entries.len(), warnings = warnings.len(), "Manifest exported");
        Ok(ExportReport {
            partition,
            entries: entries.len(),
            warnings,
        })
    }

    /// Read back the last manifest written for `partition`
    pub async fn load(&self, partition: Partition) -> IngestResult<Option<Vec<ManifestEntry>>> {
        match self.slots.get(partition.manifest_slot()).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::{
        preview::ObjectUrlRegistry, slots::MemorySlotStore, store::memory::MemoryChunkStore,
        ChunkRecord,
    };
    use tracing_test::traced_test;

    fn setup() -> (MetadataExporter, Arc<PreviewCollection>, MemoryChunkStore, MemorySlotStore) {
        let store = MemoryChunkStore::new();
        let slots = MemorySlotStore::new();
        let collection = Arc::new(PreviewCollection::new(
            Arc::new(store.clone()),
            Arc::new(ObjectUrlRegistry::new()),
            16,
        ));
        let exporter = MetadataExporter::new(
            collection.clone(),
            Arc::new(store.clone()),
            Arc::new(slots.clone()),
        );
        (exporter, collection, store, slots)
    }

    #[tokio::test]
    async fn test_empty_partition_writes_nothing() {
        let (exporter, _, _, slots) = setup();

        let report = exporter.export(Partition::Video).await.unwrap();
        assert_eq!(report.entries, 0);
        assert!(slots.get("manifest.video").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_export_uses_camel_case_fields() {
        let (exporter, collection, store, slots) = setup();
        let id = FileId(3);
        collection.add(
            Partition::Image,
            FileRecord::accepted(id, "cat.png".into(), 5, 1),
        );
        store
            .put(ChunkRecord::new(id, 0, 1, Bytes::from_static(b"12345")))
            .await
            .unwrap();

        let report = exporter.export(Partition::Image).await.unwrap();
        assert_eq!(report.entries, 1);
        assert!(report.is_clean());

        let raw = slots.get("manifest.image").await.unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(json[0]["id"], 3);
        assert_eq!(json[0]["name"], "cat.png");
        assert_eq!(json[0]["sizeBytes"], 5);
        assert_eq!(json[0]["totalChunks"], 1);
        assert!(json[0]["exportedAtEpochMillis"].is_i64());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_missing_chunks_are_warnings() {
        let (exporter, collection, _, _) = setup();
        collection.add(
            Partition::Video,
            FileRecord::accepted(FileId(1), "clip.mp4".into(), 600_000, 3),
        );

        let report = exporter.export(Partition::Video).await.unwrap();
        assert_eq!(
            report.warnings,
            vec![CompletenessWarning {
                file_id: FileId(1),
                expected: 3,
                found: 0
            }]
        );
        assert!(logs_contain("Stored chunks do not match manifest"));

        let loaded = exporter.load(Partition::Video).await.unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "clip.mp4");
    }

    #[tokio::test]
    async fn test_load_without_export() {
        let (exporter, _, _, _) = setup();
        assert!(exporter.load(Partition::Image).await.unwrap().is_none());
    }
}
