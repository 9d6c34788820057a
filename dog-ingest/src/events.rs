use std::pin::Pin;

use chrono::{DateTime, Utc};
use futures_core::Stream;
use serde::{Deserialize, Serialize};

use crate::{FileId, Partition};

/// Boxed stream of collection events
pub type EventStream = Pin<Box<dyn Stream<Item = CollectionEvent> + Send + 'static>>;

/// Emitted after every mutation of the preview collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionEvent {
    /// A file was accepted and is visible with 0%
    Added {
        file_id: FileId,
        partition: Partition,
        at: DateTime<Utc>,
    },

    /// Another chunk was committed
    Progress {
        file_id: FileId,
        percent: u8,
        at: DateTime<Utc>,
    },

    /// All chunks committed
    Completed {
        file_id: FileId,
        at: DateTime<Utc>,
    },

    /// Ingestion stopped on an error; progress is frozen
    Failed {
        file_id: FileId,
        error: String,
        at: DateTime<Utc>,
    },

    /// Ingestion stopped because the file is being removed or the process is shutting down
    Canceled {
        file_id: FileId,
        at: DateTime<Utc>,
    },

    /// Preview handle released at teardown; record and chunks are kept
    PreviewRevoked {
        file_id: FileId,
        at: DateTime<Utc>,
    },

    /// Record, chunks and preview handle are gone
    Removed {
        file_id: FileId,
        partition: Partition,
        at: DateTime<Utc>,
    },
}

impl CollectionEvent {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Added { .. } => "added",
            Self::Progress { .. } => "progress",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Canceled { .. } => "canceled",
            Self::PreviewRevoked { .. } => "preview_revoked",
            Self::Removed { .. } => "removed",
        }
    }

    /// Get the file ID from any event
    pub fn file_id(&self) -> FileId {
        match self {
            Self::Added { file_id, .. }
            | Self::Progress { file_id, .. }
            | Self::Completed { file_id, .. }
            | Self::Failed { file_id, .. }
            | Self::Canceled { file_id, .. }
            | Self::PreviewRevoked { file_id, .. }
            | Self::Removed { file_id, .. } => *file_id,
        }
    }

    /// Get the timestamp from any event
    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::Added { at, .. }
            | Self::Progress { at, .. }
            | Self::Completed { at, .. }
            | Self::Failed { at, .. }
            | Self::Canceled { at, .. }
            | Self::PreviewRevoked { at, .. }
            | Self::Removed { at, .. } => at,
        }
    }
}
