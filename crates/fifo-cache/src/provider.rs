//! Resolution of the directory the cache manages

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::error::{FifoCacheError, Result};

const DEFAULT_ROOT: &str = "./cache";

/// Supplies an application-private root and named subdirectories under it.
#[async_trait]
pub trait DirectoryProvider: Send + Sync {
    /// Absolute root under which cache subdirectories live
    fn root(&self) -> &Path;

    /// Absolute path to `root/subdirectory`, created if absent
    async fn subdirectory(&self, name: &str) -> Result<PathBuf>;
}

/// Provider backed by a directory on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalDirectoryProvider {
    root: PathBuf,
}

impl LocalDirectoryProvider {
    /// Relative roots are resolved against the current working directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let root = if root.is_absolute() {
            root
        } else {
            std::env::current_dir()
                .map_err(|e| FifoCacheError::storage(&root, e))?
                .join(root)
        };
        Ok(Self { root })
    }

    /// Root taken from `FIFO_CACHE_ROOT`, defaulting to `./cache`
    pub fn from_env() -> Result<Self> {
        let root = std::env::var("FIFO_CACHE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_ROOT));
        Self::new(root)
    }
}

#[async_trait]
impl DirectoryProvider for LocalDirectoryProvider {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn subdirectory(&self, name: &str) -> Result<PathBuf> {
        let dir = self.root.join(name);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| FifoCacheError::storage(&dir, e))?;
        debug!(dir = ?dir, "Resolved cache directory");
        Ok(dir)
    }
}
