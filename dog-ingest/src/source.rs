use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

/// A user-supplied file with a name, a length and sliceable bytes
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// File name as selected by the user
    fn name(&self) -> &str;

    /// Length in bytes
    fn size(&self) -> u64;

    /// Read bytes `[start, end)`. `end` never exceeds `size()`.
    async fn read_range(&self, start: u64, end: u64) -> std::io::Result<Bytes>;
}

fn check_range(start: u64, end: u64, size: u64) -> std::io::Result<()> {
    if start > end || end > size {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("range {start}..{end} out of bounds for {size} bytes"),
        ));
    }
    Ok(())
}

/// File whose content is already in memory
#[derive(Debug, Clone)]
pub struct MemoryFile {
    name: String,
    data: Bytes,
}

impl MemoryFile {
    pub fn new<S: Into<String>, B: Into<Bytes>>(name: S, data: B) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

#[async_trait]
impl MediaSource for MemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_range(&self, start: u64, end: u64) -> std::io::Result<Bytes> {
        check_range(start, end, self.size())?;
        Ok(self.data.slice(start as usize..end as usize))
    }
}

/// File on local disk, sliced with seek + read.
///
/// The handle is opened on the first read and reused for later ones; a failed
/// read drops it so the next read reopens the file.
#[derive(Debug)]
pub struct DiskFile {
    name: String,
    path: PathBuf,
    size: u64,
    handle: Mutex<Option<File>>,
}

impl DiskFile {
    /// Stat the file and capture its length
    pub async fn open<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self {
            name,
            path,
            size: metadata.len(),
            handle: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True while a file handle is kept open between reads
    pub async fn is_open(&self) -> bool {
        self.handle.lock().await.is_some()
    }

    async fn read_at(file: &mut File, start: u64, len: usize) -> std::io::Result<Bytes> {
        file.seek(SeekFrom::Start(start)).await?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

#[async_trait]
impl MediaSource for DiskFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn read_range(&self, start: u64, end: u64) -> std::io::Result<Bytes> {
        check_range(start, end, self.size)?;

        let mut handle = self.handle.lock().await;
        let mut file = match handle.take() {
            Some(file) => file,
            None => File::open(&self.path).await?,
        };

        let bytes = Self::read_at(&mut file, start, (end - start) as usize).await?;
        *handle = Some(file);
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_file_slices() {
        let file = MemoryFile::new("a.bin", vec![1u8, 2, 3, 4, 5]);
        assert_eq!(file.size(), 5);
        assert_eq!(&file.read_range(1, 4).await.unwrap()[..], &[2, 3, 4]);
        assert!(file.read_range(3, 9).await.is_err());
    }

    #[tokio::test]
    async fn test_disk_file_slices() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        tokio::fs::write(&path, b"0123456789").await.unwrap();

        let file = DiskFile::open(&path).await.unwrap();
        assert_eq!(file.name(), "clip.mp4");
        assert_eq!(file.size(), 10);
        assert_eq!(&file.read_range(4, 7).await.unwrap()[..], b"456");
    }

    #[tokio::test]
    async fn test_disk_file_reuses_handle_across_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("movie.mp4");
        tokio::fs::write(&path, b"abcdefghij").await.unwrap();

        let file = DiskFile::open(&path).await.unwrap();
        assert!(!file.is_open().await);

        assert_eq!(&file.read_range(6, 10).await.unwrap()[..], b"ghij");
        assert!(file.is_open().await);
        assert_eq!(&file.read_range(0, 3).await.unwrap()[..], b"abc");
        assert_eq!(&file.read_range(3, 6).await.unwrap()[..], b"def");
    }

    #[tokio::test]
    async fn test_disk_file_detects_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shrinking.mp4");
        tokio::fs::write(&path, b"0123456789").await.unwrap();

        let file = DiskFile::open(&path).await.unwrap();
        tokio::fs::write(&path, b"0123").await.unwrap();

        assert!(file.read_range(0, 10).await.is_err());
        assert!(!file.is_open().await);
    }
}
