use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::{IngestError, IngestResult};

/// Small durable key-value slots, one blob per name
#[async_trait]
pub trait SlotStore: Send + Sync {
    /// Replace the content of a slot
    async fn put(&self, slot: &str, value: Bytes) -> IngestResult<()>;

    /// Read a slot, `None` if it was never written
    async fn get(&self, slot: &str) -> IngestResult<Option<Bytes>>;
}

/// In-memory slots for tests
#[derive(Clone, Default)]
pub struct MemorySlotStore {
    slots: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemorySlotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SlotStore for MemorySlotStore {
    async fn put(&self, slot: &str, value: Bytes) -> IngestResult<()> {
        self.slots.write().insert(slot.to_string(), value);
        Ok(())
    }

    async fn get(&self, slot: &str) -> IngestResult<Option<Bytes>> {
        Ok(self.slots.read().get(slot).cloned())
    }
}

/// Slots stored as `<dir>/<slot>.json`, replaced atomically via rename
#[derive(Debug, Clone)]
pub struct FsSlotStore {
    dir: PathBuf,
}

impl FsSlotStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn slot_path(&self, slot: &str) -> IngestResult<PathBuf> {
        if slot.is_empty() || slot.contains(['/', '\\']) || slot.starts_with('.') {
            return Err(IngestError::invalid(format!("invalid slot name: {slot:?}")));
        }
        Ok(self.dir.join(format!("{slot}.json")))
    }
}

#[async_trait]
impl SlotStore for FsSlotStore {
    async fn put(&self, slot: &str, value: Bytes) -> IngestResult<()> {
        let path = self.slot_path(slot)?;
        let tmp = path.with_extension("json.tmp");

        let write = async {
            tokio::fs::create_dir_all(&self.dir).await?;
            let mut file = tokio::fs::File::create(&tmp).await?;
            tokio::io::AsyncWriteExt::write_all(&mut file, &value).await?;
            file.sync_all().await?;
            tokio::fs::rename(&tmp, &path).await
        };

        write
            .await
            .map_err(|e| IngestError::storage_write(format!("slot {slot}: {e}")))
    }

    async fn get(&self, slot: &str) -> IngestResult<Option<Bytes>> {
        let path = self.slot_path(slot)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(IngestError::storage_read(format!("slot {slot}: {e}"))),
        }
    }
}
