//! Error types for the FIFO cache

use std::fmt;
use std::io;
use std::path::PathBuf;

#[derive(Debug)]
pub enum FifoCacheError {
    /// A required value (key, subdirectory) was empty
    NullArgument(String),
    /// A size or path argument was out of range
    InvalidArgument(String),
    StreamExceedsCapacity {
        size: u64,
        capacity: u64,
    },
    /// The byte source yielded a different number of bytes than declared
    SizeMismatch {
        expected: u64,
        actual: u64,
    },
    NotFound(String),
    SourceRead(Box<io::Error>),
    StorageUnavailable {
        path: PathBuf,
        source: Box<io::Error>,
    },
    Index(String),
    /// Ledger bookkeeping bug: eviction was requested with no entries left
    EmptyLedger,
}

impl FifoCacheError {
    pub(crate) fn storage(path: impl Into<PathBuf>, err: io::Error) -> Self {
        FifoCacheError::StorageUnavailable {
            path: path.into(),
            source: Box::new(err),
        }
    }

    pub(crate) fn source_read(err: io::Error) -> Self {
        FifoCacheError::SourceRead(Box::new(err))
    }

    /// True for failures caused by the environment rather than the caller
    pub fn is_storage_unavailable(&self) -> bool {
        matches!(
            self,
            FifoCacheError::StorageUnavailable { .. } | FifoCacheError::Index(_)
        )
    }
}

impl fmt::Display for FifoCacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FifoCacheError::NullArgument(msg) => write!(f, "Null argument: {}", msg),
            FifoCacheError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            FifoCacheError::StreamExceedsCapacity { size, capacity } => write!(
                f,
                "Stream of {} bytes exceeds capacity of {} bytes: a single entry cannot exceed the cache's total capacity",
                size, capacity
            ),
            FifoCacheError::SizeMismatch { expected, actual } => write!(
                f,
                "Size mismatch: declared {} bytes but source yielded {}",
                expected, actual
            ),
            FifoCacheError::NotFound(key) => write!(f, "No cached entry for key: {}", key),
            FifoCacheError::SourceRead(err) => write!(f, "Source read error: {}", err),
            FifoCacheError::StorageUnavailable { path, source } => write!(
                f,
                "Storage unavailable at {}: {}",
                path.display(),
                source
            ),
            FifoCacheError::Index(msg) => write!(f, "Index error: {}", msg),
            FifoCacheError::EmptyLedger => write!(f, "Ledger is empty"),
        }
    }
}

impl std::error::Error for FifoCacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FifoCacheError::SourceRead(err) => Some(err.as_ref()),
            FifoCacheError::StorageUnavailable { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for FifoCacheError {
    fn from(err: serde_json::Error) -> Self {
        FifoCacheError::Index(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FifoCacheError>;
