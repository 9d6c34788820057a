use std::path::PathBuf;

use crate::{IngestError, IngestResult};

/// Default chunk size: 256 KiB
pub const DEFAULT_CHUNK_SIZE: u64 = 262_144;

/// Configuration for ingestion
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Bytes per chunk. Every chunk but the last is exactly this size.
    pub chunk_size: u64,

    /// Yield to the scheduler after every committed chunk
    pub yield_between_chunks: bool,

    /// Buffer of the collection event channel
    pub event_capacity: usize,

    /// SQLite file backing the chunk store
    pub database_path: PathBuf,

    /// Directory for exported manifests
    pub manifest_dir: PathBuf,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            yield_between_chunks: true,
            event_capacity: 1024,
            database_path: PathBuf::from("dog-ingest.db"),
            manifest_dir: PathBuf::from("dog-ingest-manifests"),
        }
    }
}

impl IngestConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load defaults, then apply `<PREFIX>CHUNK_SIZE`, `<PREFIX>DATABASE_PATH`,
    /// `<PREFIX>MANIFEST_DIR` and `<PREFIX>EVENT_CAPACITY` when set.
    ///
    /// ```bash
    /// export DOG_INGEST__CHUNK_SIZE=524288
    /// ```
    pub fn from_env(prefix: &str) -> IngestResult<Self> {
        let mut config = Self::default();

        for (key, value) in std::env::vars() {
            let Some(name) = key.strip_prefix(prefix) else {
                continue;
            };
            match name.to_ascii_uppercase().as_str() {
                "CHUNK_SIZE" => {
                    config.chunk_size = value.parse().map_err(|_| {
                        IngestError::invalid(format!("{key} must be an integer, got {value:?}"))
                    })?;
                }
                "EVENT_CAPACITY" => {
                    config.event_capacity = value.parse().map_err(|_| {
                        IngestError::invalid(format!("{key} must be an integer, got {value:?}"))
                    })?;
                }
                "DATABASE_PATH" => config.database_path = PathBuf::from(value),
                "MANIFEST_DIR" => config.manifest_dir = PathBuf::from(value),
                _ => {}
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Set chunk size
    pub fn with_chunk_size(mut self, bytes: u64) -> Self {
        self.chunk_size = bytes;
        self
    }

    /// Set the event channel capacity
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Set the SQLite database path
    pub fn with_database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = path.into();
        self
    }

    /// Set the manifest directory
    pub fn with_manifest_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.manifest_dir = dir.into();
        self
    }

    /// Process chunks back to back without yielding
    pub fn without_yield(mut self) -> Self {
        self.yield_between_chunks = false;
        self
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> IngestResult<()> {
        if self.chunk_size == 0 {
            return Err(IngestError::invalid("chunk_size must be greater than zero"));
        }
        if self.event_capacity == 0 {
            return Err(IngestError::invalid("event_capacity must be greater than zero"));
        }
        Ok(())
    }

    /// Number of chunks a file of `size_bytes` splits into.
    ///
    /// Chunk indices are `u32`; a file needing more chunks is rejected.
    pub fn total_chunks(&self, size_bytes: u64) -> IngestResult<u32> {
        let chunks = size_bytes.div_ceil(self.chunk_size);
        u32::try_from(chunks).map_err(|_| {
            IngestError::invalid(format!(
                "{size_bytes} bytes need {chunks} chunks of {} bytes, more than {} allowed",
                self.chunk_size,
                u32::MAX
            ))
        })
    }

    /// Byte range `[start, end)` of chunk `index` within a file of `size_bytes`
    pub fn chunk_bounds(&self, index: u32, size_bytes: u64) -> (u64, u64) {
        let start = index as u64 * self.chunk_size;
        let end = start.saturating_add(self.chunk_size).min(size_bytes);
        (start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_chunks_rounds_up() {
        let config = IngestConfig::default();
        assert_eq!(config.total_chunks(0).unwrap(), 0);
        assert_eq!(config.total_chunks(1).unwrap(), 1);
        assert_eq!(config.total_chunks(262_144).unwrap(), 1);
        assert_eq!(config.total_chunks(262_145).unwrap(), 2);
        assert_eq!(config.total_chunks(300_000).unwrap(), 2);
    }

    #[test]
    fn test_total_chunks_rejects_index_overflow() {
        let config = IngestConfig::new().with_chunk_size(1);
        assert_eq!(config.total_chunks(u32::MAX as u64).unwrap(), u32::MAX);

        let too_many = config.total_chunks(u32::MAX as u64 + 1);
        assert!(matches!(too_many, Err(IngestError::Invalid { .. })));
    }

    #[test]
    fn test_chunk_bounds_clamp_last_chunk() {
        let config = IngestConfig::default();
        assert_eq!(config.chunk_bounds(0, 300_000), (0, 262_144));
        assert_eq!(config.chunk_bounds(1, 300_000), (262_144, 300_000));
        assert_eq!(300_000 - 262_144, 37_856);
    }

    #[test]
    fn test_validate_rejects_zero_chunk_size() {
        let config = IngestConfig::new().with_chunk_size(0);
        assert!(matches!(config.validate(), Err(IngestError::Invalid { .. })));
    }

    #[test]
    fn test_from_env_overrides() {
        std::env::set_var("DOG_INGEST_TEST__CHUNK_SIZE", "1024");
        std::env::set_var("DOG_INGEST_TEST__DATABASE_PATH", "/tmp/chunks.db");

        let config = IngestConfig::from_env("DOG_INGEST_TEST__").unwrap();
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.database_path, PathBuf::from("/tmp/chunks.db"));

        std::env::remove_var("DOG_INGEST_TEST__CHUNK_SIZE");
        std::env::remove_var("DOG_INGEST_TEST__DATABASE_PATH");
    }

    #[test]
    fn test_from_env_rejects_garbage() {
        std::env::set_var("DOG_INGEST_BAD__CHUNK_SIZE", "lots");
        let result = IngestConfig::from_env("DOG_INGEST_BAD__");
        std::env::remove_var("DOG_INGEST_BAD__CHUNK_SIZE");
        assert!(matches!(result, Err(IngestError::Invalid { .. })));
    }
}
