//! # dog-ingest: chunked media ingestion for DogRS applications
//!
//! `dog-ingest` takes user-selected image and video files, slices them into
//! fixed-size chunks and writes the chunks durably, one after another, while
//! an observable collection reports per-file progress and a preview handle
//! lets the UI render the file before ingestion finishes.
//!
//! ## Key Features
//!
//! - **Ordered, durable chunks**: chunk `i + 1` is never written before chunk `i` is stored
//! - **Live progress**: every committed chunk raises the file's progress; 100 only on completion
//! - **Instant previews**: revocable handles resolve to the original bytes, no storage round trip
//! - **Safe removal**: removing a file cancels its ingestion before its chunks are deleted
//! - **Manifests**: per-partition metadata snapshots, cross-checked against stored chunks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dog_ingest::prelude::*;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> IngestResult<()> {
//! let adapter = IngestAdapter::open_sqlite(IngestConfig::from_env("DOG_INGEST__")?)?;
//!
//! let file = DiskFile::open("holiday.mp4").await?;
//! let handle = adapter.ingest(Arc::new(file), Partition::Video);
//! let id = handle.file_id();
//!
//! // The record is already visible at 0% with a live preview handle
//! let record = adapter.get(id).expect("record is visible");
//! println!("{} -> {:?}", record.file_name, record.preview_handle);
//!
//! handle.wait().await?;
//! adapter.export(Partition::Video).await?;
//! adapter.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐
//! │      IngestAdapter       │  ← facade embedded by the application
//! ├────────────┬─────────────┤
//! │  Pipeline  │  Exporter   │  ← chunk writer / manifest writer
//! ├────────────┴─────────────┤
//! │ PreviewCollection + URLs │  ← observable records, preview handles
//! ├──────────────────────────┤
//! │  ChunkStore / SlotStore  │  ← SQLite, filesystem or memory
//! └──────────────────────────┘
//! ```

pub mod adapter;
pub mod collection;
mod config;
mod error;
pub mod events;
pub mod ids;
pub mod manifest;
pub mod observability;
pub mod pipeline;
pub mod preview;
pub mod slots;
pub mod source;
pub mod store;
mod types;

// Re-export main types for clean API
pub use adapter::IngestAdapter;
pub use collection::{IngestTicket, PreviewCollection};
pub use config::{IngestConfig, DEFAULT_CHUNK_SIZE};
pub use error::{IngestError, IngestResult};
pub use events::{CollectionEvent, EventStream};
pub use ids::{IdGenerator, MonotonicIds};
pub use manifest::{CompletenessWarning, ExportReport, ManifestEntry, MetadataExporter};
pub use pipeline::{ChunkIngestionPipeline, IngestHandle, IngestOutcome};
pub use preview::ObjectUrlRegistry;
pub use slots::{FsSlotStore, MemorySlotStore, SlotStore};
pub use source::{DiskFile, MediaSource, MemoryFile};
pub use store::{assemble, ChunkStore};
pub use types::{
    progress_percent, ByteStream, ChunkRecord, FileId, FileRecord, Partition, PreviewHandle,
};

#[cfg(feature = "memory")]
pub use store::memory::MemoryChunkStore;
#[cfg(feature = "sqlite")]
pub use store::sqlite::SqliteChunkStore;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        ChunkStore, DiskFile, FileId, FileRecord, IngestAdapter, IngestConfig, IngestError,
        IngestResult, MediaSource, MemoryFile, Partition, PreviewHandle,
    };
}
