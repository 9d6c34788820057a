use bytes::Bytes;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use uuid::Uuid;

/// Stream of bytes read from a registered preview
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Process-unique identifier of an ingested file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub u64);

impl FileId {
    /// Get the inner value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for FileId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// One of the two disjoint groups a file belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    Image,
    Video,
}

impl Partition {
    pub const ALL: [Partition; 2] = [Partition::Image, Partition::Video];

    /// Get partition name as string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }

    /// Name of the small-object slot holding this partition's manifest
    pub fn manifest_slot(&self) -> &'static str {
        match self {
            Self::Image => "manifest.image",
            Self::Video => "manifest.video",
        }
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Partition {
    type Err = crate::IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            other => Err(crate::IngestError::invalid(format!("unknown partition: {other}"))),
        }
    }
}

/// Revocable reference to a file's bytes, consumable by a rendering surface
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PreviewHandle(pub String);

impl PreviewHandle {
    /// Mint a fresh handle
    pub fn new() -> Self {
        Self(format!("blob:dog-ingest/{}", Uuid::new_v4()))
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PreviewHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PreviewHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Observable per-file state held by the preview collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: FileId,
    pub file_name: String,
    pub size_bytes: u64,
    pub preview_handle: Option<PreviewHandle>,
    pub loading: bool,
    pub progress_percent: u8,
    pub total_chunks: Option<u32>,
}

impl FileRecord {
    /// A freshly accepted file: loading, nothing committed yet
    pub fn accepted(id: FileId, file_name: String, size_bytes: u64, total_chunks: u32) -> Self {
        Self {
            id,
            file_name,
            size_bytes,
            preview_handle: None,
            loading: true,
            progress_percent: 0,
            total_chunks: Some(total_chunks),
        }
    }

    pub fn with_preview_handle(mut self, handle: PreviewHandle) -> Self {
        self.preview_handle = Some(handle);
        self
    }

    /// True once ingestion finished normally
    pub fn is_complete(&self) -> bool {
        !self.loading && self.progress_percent == 100
    }
}

/// One persisted slice of a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    pub file_id: FileId,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub payload: Bytes,
}

impl ChunkRecord {
    pub fn new(file_id: FileId, chunk_index: u32, total_chunks: u32, payload: Bytes) -> Self {
        Self {
            file_id,
            chunk_index,
            total_chunks,
            payload,
        }
    }

    /// Composite key of this chunk
    pub fn key(&self) -> (FileId, u32) {
        (self.file_id, self.chunk_index)
    }
}

/// Committed-chunk progress, rounded half up.
///
/// Only a fully committed file reports 100; anything short of that caps at 99.
pub fn progress_percent(committed: u32, total: u32) -> u8 {
    if committed >= total {
        return 100;
    }
    let (committed, total) = (committed as u64, total as u64);
    (((200 * committed + total) / (2 * total)) as u8).min(99)
}
