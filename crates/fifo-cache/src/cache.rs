//! Size-bounded disk cache with first-in-first-out eviction

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncRead;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

use crate::config::{validate_capacity, validate_subdirectory, CacheConfiguration};
use crate::error::{FifoCacheError, Result};
use crate::ledger::EntryLedger;
use crate::provider::{DirectoryProvider, LocalDirectoryProvider};
use crate::store::BlobStore;
use crate::types::{CacheEntry, CacheOutcome, CacheStats};

struct CacheState {
    config: CacheConfiguration,
    /// `None` after the subdirectory changed, until the next operation loads it
    ledger: Option<EntryLedger>,
}

/// A byte cache in a directory, bounded by a total size budget.
///
/// Once the budget would be exceeded, the oldest admitted entries are
/// deleted first. Reading an entry never changes its position.
#[derive(Clone)]
pub struct FifoCache {
    provider: Arc<dyn DirectoryProvider>,
    state: Arc<RwLock<CacheState>>,
    /// Cache hit counter
    hits: Arc<AtomicU64>,
    /// Cache miss counter
    misses: Arc<AtomicU64>,
}

impl FifoCache {
    /// Open the cache, creating its subdirectory and loading any entries
    /// left by a previous run
    pub async fn open<P>(provider: P, config: CacheConfiguration) -> Result<Self>
    where
        P: DirectoryProvider + 'static,
    {
        let provider: Arc<dyn DirectoryProvider> = Arc::new(provider);
        let dir = provider.subdirectory(config.subdirectory()).await?;
        let ledger = EntryLedger::load(BlobStore::new(dir.clone())).await?;

        info!(
            cache_dir = ?dir,
            capacity_bytes = config.capacity_bytes(),
            entries = ledger.len(),
            occupied_bytes = ledger.total_bytes(),
            "Cache initialized"
        );

        Ok(Self {
            provider,
            state: Arc::new(RwLock::new(CacheState {
                config,
                ledger: Some(ledger),
            })),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Open a cache configured from `FIFO_CACHE_ROOT`, `FIFO_CACHE_SUBDIRECTORY`
    /// and `FIFO_CACHE_SIZE`
    pub async fn from_env() -> Result<Self> {
        Self::open(LocalDirectoryProvider::from_env()?, CacheConfiguration::from_env()).await
    }

    async fn ledger_mut<'a>(
        provider: &dyn DirectoryProvider,
        state: &'a mut CacheState,
    ) -> Result<&'a mut EntryLedger> {
        let ledger = match state.ledger.take() {
            Some(ledger) => ledger,
            None => {
                let dir = provider.subdirectory(state.config.subdirectory()).await?;
                EntryLedger::load(BlobStore::new(dir)).await?
            }
        };
        Ok(state.ledger.insert(ledger))
    }

    async fn read_ledger(&self) -> Result<RwLockReadGuard<'_, EntryLedger>> {
        loop {
            let state = self.state.read().await;
            match RwLockReadGuard::try_map(state, |s| s.ledger.as_ref()) {
                Ok(ledger) => return Ok(ledger),
                Err(state) => drop(state),
            }
            let mut state = self.state.write().await;
            Self::ledger_mut(self.provider.as_ref(), &mut state).await?;
        }
    }

    /// Store `declared_size` bytes read from `source` under `key`.
    ///
    /// Any entry already stored under `key` is replaced and the new one
    /// becomes the newest. Oldest entries are evicted until the new entry
    /// fits. On error the cache is left as it was before the call.
    pub async fn cache<R>(
        &self,
        source: &mut R,
        key: &str,
        declared_size: u64,
    ) -> Result<CacheOutcome>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut state = self.state.write().await;
        let capacity = state.config.capacity_bytes();

        if declared_size == 0 {
            return Err(FifoCacheError::InvalidArgument(
                "stream size must be a positive integer".to_string(),
            ));
        }
        if declared_size > capacity {
            return Err(FifoCacheError::StreamExceedsCapacity {
                size: declared_size,
                capacity,
            });
        }
        if key.is_empty() {
            return Err(FifoCacheError::NullArgument(
                "provided key was null".to_string(),
            ));
        }

        let ledger = Self::ledger_mut(self.provider.as_ref(), &mut state).await?;
        let store = ledger.store().clone();

        let temp_path = store.temp_path(ledger.peek_next_sequence());
        let written = store.stage(source, &temp_path, declared_size).await?;
        if written != declared_size {
            store.discard(&temp_path).await;
            warn!(key = %key, expected = declared_size, actual = written, "Source size mismatch");
            return Err(FifoCacheError::SizeMismatch {
                expected: declared_size,
                actual: written,
            });
        }

        let admitted = admit(ledger, &store, &temp_path, key, declared_size, capacity).await;
        match admitted {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                store.discard(&temp_path).await;
                if let Err(commit_err) = ledger.commit().await {
                    warn!(error = %commit_err, "Failed to persist ledger after failed admission");
                }
                Err(err)
            }
        }
    }

    /// Cache the contents of a file, using its current length as the size
    pub async fn cache_file(&self, path: impl AsRef<Path>, key: &str) -> Result<CacheOutcome> {
        let mut file = fs::File::open(path.as_ref())
            .await
            .map_err(FifoCacheError::source_read)?;
        let len = file
            .metadata()
            .await
            .map_err(FifoCacheError::source_read)?
            .len();
        self.cache(&mut file, key, len).await
    }

    /// Read the bytes stored under `key`
    pub async fn retrieve(&self, key: &str) -> Result<Vec<u8>> {
        let ledger = self.read_ledger().await?;
        let entry = match ledger.get(key) {
            Some(entry) => entry,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Err(FifoCacheError::NotFound(key.to_string()));
            }
        };

        match ledger.store().read(&entry.file_name).await {
            Ok(data) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache hit");
                Ok(data)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(key = %key, "Cached blob missing on disk");
                self.misses.fetch_add(1, Ordering::Relaxed);
                Err(FifoCacheError::NotFound(key.to_string()))
            }
            Err(e) => Err(FifoCacheError::storage(
                ledger.store().blob_path(&entry.file_name),
                e,
            )),
        }
    }

    /// Path of the blob stored under `key`; stable for the lifetime of the entry
    pub async fn retrieve_path(&self, key: &str) -> Result<PathBuf> {
        let ledger = self.read_ledger().await?;
        match ledger.get(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(ledger.store().blob_path(&entry.file_name))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Err(FifoCacheError::NotFound(key.to_string()))
            }
        }
    }

    pub async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.read_ledger().await?.get(key).is_some())
    }

    /// Remove a single entry. Returns whether the key was present.
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let ledger = Self::ledger_mut(self.provider.as_ref(), &mut state).await?;

        let file_name = match ledger.get(key) {
            Some(entry) => entry.file_name.clone(),
            None => return Ok(false),
        };
        ledger.store().remove(&file_name).await?;
        ledger.remove(key);
        ledger.commit().await?;
        debug!(key = %key, "Removed cache entry");
        Ok(true)
    }

    /// Delete every entry in the current subdirectory
    pub async fn clear(&self) -> Result<()> {
        let mut state = self.state.write().await;
        let ledger = Self::ledger_mut(self.provider.as_ref(), &mut state).await?;

        let entries = ledger.len();
        let freed = ledger.total_bytes();
        ledger.store().remove_stray_files(&Default::default()).await?;
        ledger.clear();
        ledger.commit().await?;
        info!(entries, freed_bytes = freed, "Cache cleared");
        Ok(())
    }

    pub async fn subdirectory(&self) -> String {
        self.state.read().await.config.subdirectory().to_string()
    }

    /// Point the cache at another subdirectory. Files already cached in the
    /// previous one are left where they are.
    pub async fn set_subdirectory(&self, path: impl Into<String>) -> Result<()> {
        let path = path.into();
        validate_subdirectory(&path)?;

        let mut state = self.state.write().await;
        if state.config.subdirectory() != path {
            state.config.set_subdirectory(path)?;
            state.ledger = None;
            debug!(subdirectory = %state.config.subdirectory(), "Cache subdirectory changed");
        }
        Ok(())
    }

    pub async fn capacity_bytes(&self) -> u64 {
        self.state.read().await.config.capacity_bytes()
    }

    /// Change the size budget. Shrinking below the occupied size does not
    /// evict anything until the next `cache` call.
    pub async fn set_capacity_bytes(&self, capacity_bytes: u64) -> Result<()> {
        validate_capacity(capacity_bytes)?;
        let mut state = self.state.write().await;
        state.config.set_capacity_bytes(capacity_bytes)?;
        Ok(())
    }

    pub async fn configuration(&self) -> CacheConfiguration {
        self.state.read().await.config.clone()
    }

    /// Absolute path of the directory currently holding cached blobs
    pub async fn directory(&self) -> Result<PathBuf> {
        Ok(self.read_ledger().await?.store().dir().to_path_buf())
    }

    pub async fn occupied_bytes(&self) -> Result<u64> {
        Ok(self.read_ledger().await?.total_bytes())
    }

    /// Cached keys, oldest first
    pub async fn keys(&self) -> Result<Vec<String>> {
        let ledger = self.read_ledger().await?;
        Ok(ledger.entries_oldest_first().map(|e| e.key.clone()).collect())
    }

    /// Entry metadata, oldest first
    pub async fn entries(&self) -> Result<Vec<CacheEntry>> {
        let ledger = self.read_ledger().await?;
        Ok(ledger.entries_oldest_first().cloned().collect())
    }

    /// Get current cache statistics
    pub async fn stats(&self) -> Result<CacheStats> {
        let capacity = self.capacity_bytes().await;
        let ledger = self.read_ledger().await?;
        Ok(CacheStats {
            entries: ledger.len(),
            total_size: ledger.total_bytes(),
            capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        })
    }
}

/// Evict, promote and record a fully staged blob.
///
/// An entry already stored under `key` stays in the ledger until the rename
/// succeeds; its bytes count as freed while making room.
async fn admit(
    ledger: &mut EntryLedger,
    store: &BlobStore,
    temp_path: &Path,
    key: &str,
    size: u64,
    capacity: u64,
) -> Result<CacheOutcome> {
    let replaced = ledger.get(key).map(|e| e.size_bytes).unwrap_or(0);
    if replaced > 0 {
        debug!(key = %key, previous_size = replaced, "Replacing cache entry");
    }

    let mut evicted = Vec::new();
    while ledger.total_bytes().saturating_sub(replaced).saturating_add(size) > capacity {
        // size <= capacity, so bytes still counted here must belong to an entry
        let file_name = ledger
            .oldest(Some(key))
            .map(|oldest| oldest.file_name.clone())
            .ok_or(FifoCacheError::EmptyLedger)?;
        store.remove(&file_name).await?;
        let oldest = ledger.evict_oldest(Some(key))?;
        debug!(key = %oldest.key, size = oldest.size_bytes, "Evicted oldest cache entry");
        evicted.push(oldest.key);
    }

    let path = store.promote(temp_path, &BlobStore::file_name_for(key)).await?;
    ledger.record_admission(key, size);
    ledger.commit().await?;

    debug!(
        key = %key,
        size,
        evicted = evicted.len(),
        occupied = ledger.total_bytes(),
        "Cached entry"
    );

    Ok(CacheOutcome {
        path,
        bytes_written: size,
        evicted,
    })
}
