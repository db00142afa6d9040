//! Cache configuration

use crate::error::{FifoCacheError, Result};

/// Default location of the managed cache, relative to the provider's root
pub const DEFAULT_DIRECTORY: &str = "fifo-cache";

/// Default capacity of the cache in bytes
pub const DEFAULT_SIZE: u64 = 5 * 1024 * 1024; // 5MB

/// Where the cache lives and how large it may grow.
///
/// Both fields are valid at all times: setters reject bad values and leave
/// the previous value in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfiguration {
    subdirectory: String,
    capacity_bytes: u64,
}

impl CacheConfiguration {
    pub fn new(subdirectory: impl Into<String>, capacity_bytes: u64) -> Result<Self> {
        let mut config = Self::default();
        config.set_subdirectory(subdirectory)?;
        config.set_capacity_bytes(capacity_bytes)?;
        Ok(config)
    }

    /// Load configuration from `FIFO_CACHE_SUBDIRECTORY` and `FIFO_CACHE_SIZE`.
    /// Missing, unparsable or zero values fall back to the defaults.
    pub fn from_env() -> Self {
        let subdirectory = std::env::var("FIFO_CACHE_SUBDIRECTORY")
            .ok()
            .filter(|s| validate_subdirectory(s).is_ok())
            .unwrap_or_else(|| DEFAULT_DIRECTORY.to_string());

        let capacity_bytes = std::env::var("FIFO_CACHE_SIZE")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_SIZE);

        Self {
            subdirectory,
            capacity_bytes,
        }
    }

    pub fn subdirectory(&self) -> &str {
        &self.subdirectory
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    pub fn set_subdirectory(&mut self, path: impl Into<String>) -> Result<()> {
        let path = path.into();
        validate_subdirectory(&path)?;
        self.subdirectory = path;
        Ok(())
    }

    pub fn set_capacity_bytes(&mut self, capacity_bytes: u64) -> Result<()> {
        validate_capacity(capacity_bytes)?;
        self.capacity_bytes = capacity_bytes;
        Ok(())
    }

    pub fn with_subdirectory(mut self, path: impl Into<String>) -> Result<Self> {
        self.set_subdirectory(path)?;
        Ok(self)
    }

    pub fn with_capacity_bytes(mut self, capacity_bytes: u64) -> Result<Self> {
        self.set_capacity_bytes(capacity_bytes)?;
        Ok(self)
    }
}

impl Default for CacheConfiguration {
    fn default() -> Self {
        Self {
            subdirectory: DEFAULT_DIRECTORY.to_string(),
            capacity_bytes: DEFAULT_SIZE,
        }
    }
}

pub(crate) fn validate_subdirectory(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(FifoCacheError::NullArgument(
            "provided path was null".to_string(),
        ));
    }
    if path == "." || path == ".." || path.contains('/') || path.contains('\\') {
        return Err(FifoCacheError::InvalidArgument(format!(
            "subdirectory must be a single path segment, got {:?}",
            path
        )));
    }
    Ok(())
}

pub(crate) fn validate_capacity(capacity_bytes: u64) -> Result<()> {
    if capacity_bytes == 0 {
        return Err(FifoCacheError::InvalidArgument(
            "cache size must be a positive integer".to_string(),
        ));
    }
    Ok(())
}
