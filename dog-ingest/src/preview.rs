use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::debug;

use crate::{source::MediaSource, ByteStream, IngestError, IngestResult, PreviewHandle};

/// Maps preview handles to the files they stream from.
///
/// Every `register` must be matched by exactly one effective `revoke`, either
/// on removal or at teardown through `revoke_all`.
#[derive(Default)]
pub struct ObjectUrlRegistry {
    handles: RwLock<HashMap<PreviewHandle, Arc<dyn MediaSource>>>,
}

impl ObjectUrlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a handle for `file`
    pub fn register(&self, file: Arc<dyn MediaSource>) -> PreviewHandle {
        let handle = PreviewHandle::new();
        debug!(%handle, file = file.name(), "Registered preview");
        self.handles.write().insert(handle.clone(), file);
        handle
    }

    /// Release a handle. Returns `true` only for the call that actually released it.
    pub fn revoke(&self, handle: &PreviewHandle) -> bool {
        let revoked = self.handles.write().remove(handle).is_some();
        if revoked {
            debug!(%handle, "Revoked preview");
        }
        revoked
    }

    /// Release every live handle, returning how many were released
    pub fn revoke_all(&self) -> usize {
        let mut handles = self.handles.write();
        let count = handles.len();
        handles.clear();
        count
    }

    /// File behind a live handle
    pub fn resolve(&self, handle: &PreviewHandle) -> Option<Arc<dyn MediaSource>> {
        self.handles.read().get(handle).cloned()
    }

    pub fn is_live(&self, handle: &PreviewHandle) -> bool {
        self.handles.read().contains_key(handle)
    }

    /// Number of handles not yet revoked
    pub fn active_count(&self) -> usize {
        self.handles.read().len()
    }

    /// Read bytes `[start, end)` through a live handle
    pub async fn open_range(&self, handle: &PreviewHandle, start: u64, end: u64) -> IngestResult<Bytes> {
        let file = self
            .resolve(handle)
            .ok_or_else(|| IngestError::invalid(format!("preview handle {handle} is not live")))?;
        file.read_range(start, end.min(file.size()))
            .await
            .map_err(|e| IngestError::source_read(file.name(), e))
    }

    /// Stream the whole file behind a handle in pieces of `piece_size` bytes.
    ///
    /// The stream holds its own reference to the file, so revoking the handle
    /// does not cut off a stream already being rendered.
    pub fn stream(&self, handle: &PreviewHandle, piece_size: u64) -> Option<ByteStream> {
        let file = self.resolve(handle)?;
        let piece_size = piece_size.max(1);

        let stream = async_stream::stream! {
            let size = file.size();
            let mut offset = 0;
            while offset < size {
                let end = (offset + piece_size).min(size);
                match file.read_range(offset, end).await {
                    Ok(bytes) => yield Ok(bytes),
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
                offset = end;
            }
        };
        Some(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryFile;
    use tokio_stream::StreamExt;

    #[test]
    fn test_revoke_only_first_call_has_effect() {
        let registry = ObjectUrlRegistry::new();
        let handle = registry.register(Arc::new(MemoryFile::new("a.png", vec![0u8; 4])));

        assert!(registry.is_live(&handle));
        assert!(registry.revoke(&handle));
        assert!(!registry.revoke(&handle));
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_handles_are_distinct() {
        let registry = ObjectUrlRegistry::new();
        let file: Arc<dyn MediaSource> = Arc::new(MemoryFile::new("a.png", vec![0u8; 4]));
        let a = registry.register(file.clone());
        let b = registry.register(file);

        assert_ne!(a, b);
        assert!(a.as_str().starts_with("blob:dog-ingest/"));
        assert_eq!(registry.revoke_all(), 2);
    }

    #[tokio::test]
    async fn test_stream_yields_whole_file() {
        let registry = ObjectUrlRegistry::new();
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let handle = registry.register(Arc::new(MemoryFile::new("clip.mp4", data.clone())));

        let mut stream = registry.stream(&handle, 300).unwrap();
        let mut collected = Vec::new();
        let mut pieces = 0;
        while let Some(piece) = stream.next().await {
            collected.extend_from_slice(&piece.unwrap());
            pieces += 1;
        }

        assert_eq!(pieces, 4);
        assert_eq!(collected, data);
    }

    #[tokio::test]
    async fn test_open_range_requires_live_handle() {
        let registry = ObjectUrlRegistry::new();
        let handle = registry.register(Arc::new(MemoryFile::new("a.png", b"abcdef".to_vec())));

        assert_eq!(&registry.open_range(&handle, 2, 99).await.unwrap()[..], b"cdef");

        registry.revoke(&handle);
        assert!(registry.open_range(&handle, 0, 1).await.is_err());
        assert!(registry.stream(&handle, 1).is_none());
    }
}
