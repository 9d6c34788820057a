use thiserror::Error;

/// Result type for ingestion operations
pub type IngestResult<T> = Result<T, IngestError>;

/// Errors that can occur while ingesting, storing or exporting media
#[derive(Error, Debug)]
pub enum IngestError {
    /// The durable store could not be opened. Cached and returned to every
    /// later store operation.
    #[error("Storage environment unsupported: {reason}")]
    EnvironmentUnsupported { reason: String },

    #[error("Storage write failed: {message}")]
    StorageWrite { message: String },

    #[error("Storage read failed: {message}")]
    StorageRead { message: String },

    #[error("Failed to read source file {file}: {source}")]
    SourceRead {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid request: {message}")]
    Invalid { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

impl IngestError {
    /// Create an environment error
    pub fn environment<S: Into<String>>(reason: S) -> Self {
        Self::EnvironmentUnsupported {
            reason: reason.into(),
        }
    }

    /// Create a storage write error
    pub fn storage_write<S: Into<String>>(message: S) -> Self {
        Self::StorageWrite {
            message: message.into(),
        }
    }

    /// Create a storage read error
    pub fn storage_read<S: Into<String>>(message: S) -> Self {
        Self::StorageRead {
            message: message.into(),
        }
    }

    /// Create an invalid request error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Wrap an I/O failure that happened while slicing a source file
    pub fn source_read<S: Into<String>>(file: S, source: std::io::Error) -> Self {
        Self::SourceRead {
            file: file.into(),
            source,
        }
    }

    /// True for errors that poison the store for the rest of the process
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::EnvironmentUnsupported { .. })
    }
}
