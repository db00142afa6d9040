//! Durable record of cached entries and their admission order

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::ErrorKind;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{FifoCacheError, Result};
use crate::store::BlobStore;
use crate::types::CacheEntry;

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedIndex {
    next_sequence: u64,
    entries: Vec<CacheEntry>,
}

/// Entries keyed by name and ordered by admission sequence.
///
/// Mutations only touch memory; `commit` writes the index file. A crash
/// between a blob operation and a commit is repaired by `load`, which
/// cross-checks the index against the blobs actually on disk.
#[derive(Debug)]
pub(crate) struct EntryLedger {
    store: BlobStore,
    entries: HashMap<String, CacheEntry>,
    order: BTreeMap<u64, String>,
    total_bytes: u64,
    next_sequence: u64,
}

impl EntryLedger {
    fn empty(store: BlobStore) -> Self {
        Self {
            store,
            entries: HashMap::new(),
            order: BTreeMap::new(),
            total_bytes: 0,
            next_sequence: 1,
        }
    }

    /// Rebuild the ledger from the index file and the blobs on disk
    pub(crate) async fn load(store: BlobStore) -> Result<Self> {
        let index_path = store.index_path();
        let persisted = match fs::read(&index_path).await {
            Ok(data) => match serde_json::from_slice::<PersistedIndex>(&data) {
                Ok(index) => index,
                Err(e) => {
                    warn!(path = ?index_path, error = %e, "Corrupt cache index, starting empty");
                    PersistedIndex::default()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => PersistedIndex::default(),
            Err(e) => return Err(FifoCacheError::storage(index_path, e)),
        };

        let mut ledger = Self::empty(store);
        let mut dropped = 0usize;
        let mut max_sequence = 0u64;

        for entry in persisted.entries {
            if entry.file_name != BlobStore::file_name_for(&entry.key) {
                warn!(key = %entry.key, "Index entry points at a foreign file, dropping");
                dropped += 1;
                continue;
            }
            match ledger.store.blob_len(&entry.file_name).await {
                Some(len) if len == entry.size_bytes => {}
                Some(len) => {
                    warn!(key = %entry.key, expected = entry.size_bytes, actual = len, "Blob size differs from index, dropping");
                    ledger.store.remove(&entry.file_name).await?;
                    dropped += 1;
                    continue;
                }
                None => {
                    warn!(key = %entry.key, "Blob missing on disk, dropping");
                    dropped += 1;
                    continue;
                }
            }
            max_sequence = max_sequence.max(entry.sequence);
            if let Some(previous) = ledger.entries.get(&entry.key) {
                if previous.sequence >= entry.sequence {
                    dropped += 1;
                    continue;
                }
            }
            if let Some(holder) = ledger.order.get(&entry.sequence) {
                if *holder != entry.key {
                    warn!(key = %entry.key, sequence = entry.sequence, holder = %holder, "Duplicate admission sequence in index, dropping");
                    dropped += 1;
                    continue;
                }
            }
            ledger.insert(entry);
        }

        ledger.next_sequence = persisted
            .next_sequence
            .max(max_sequence.saturating_add(1))
            .max(1);

        let live: HashSet<String> = ledger
            .entries
            .values()
            .map(|e| e.file_name.clone())
            .collect();
        let stray = ledger.store.remove_stray_files(&live).await?;

        if dropped > 0 || stray > 0 {
            ledger.commit().await?;
        }

        info!(
            dir = ?ledger.store.dir(),
            entries = ledger.len(),
            total_bytes = ledger.total_bytes,
            dropped,
            stray,
            "Cache ledger loaded"
        );
        Ok(ledger)
    }

    fn insert(&mut self, entry: CacheEntry) {
        if let Some(previous) = self.entries.remove(&entry.key) {
            self.order.remove(&previous.sequence);
            self.total_bytes = self.total_bytes.saturating_sub(previous.size_bytes);
        }
        self.total_bytes = self.total_bytes.saturating_add(entry.size_bytes);
        self.order.insert(entry.sequence, entry.key.clone());
        self.entries.insert(entry.key.clone(), entry);
    }

    /// Sequence the next admission will receive
    pub(crate) fn peek_next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Record a fully written blob as the newest entry, replacing any entry
    /// with the same key
    pub(crate) fn record_admission(&mut self, key: &str, size_bytes: u64) -> CacheEntry {
        let entry = CacheEntry {
            key: key.to_string(),
            file_name: BlobStore::file_name_for(key),
            size_bytes,
            sequence: self.next_sequence,
            admitted_at: Utc::now(),
        };
        self.next_sequence = self.next_sequence.saturating_add(1);
        self.insert(entry.clone());
        debug!(key = %key, size_bytes, sequence = entry.sequence, "Recorded admission");
        entry
    }

    /// Remove and return the oldest entry, passing over `keep` if given
    pub(crate) fn evict_oldest(&mut self, keep: Option<&str>) -> Result<CacheEntry> {
        let sequence = self
            .order
            .iter()
            .find(|(_, key)| Some(key.as_str()) != keep)
            .map(|(sequence, _)| *sequence)
            .ok_or(FifoCacheError::EmptyLedger)?;
        let key = self
            .order
            .remove(&sequence)
            .ok_or(FifoCacheError::EmptyLedger)?;
        let entry = self
            .entries
            .remove(&key)
            .ok_or(FifoCacheError::EmptyLedger)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes);
        Ok(entry)
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.sequence);
        self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.total_bytes = 0;
    }

    pub(crate) fn oldest(&self, keep: Option<&str>) -> Option<&CacheEntry> {
        self.order
            .values()
            .find(|key| Some(key.as_str()) != keep)
            .and_then(|key| self.entries.get(key))
    }

    pub(crate) fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub(crate) fn store(&self) -> &BlobStore {
        &self.store
    }

    pub(crate) fn entries_oldest_first(&self) -> impl Iterator<Item = &CacheEntry> {
        self.order.values().filter_map(|key| self.entries.get(key))
    }

    /// Atomically replace the index file with the in-memory state
    pub(crate) async fn commit(&self) -> Result<()> {
        let index = PersistedIndex {
            next_sequence: self.next_sequence,
            entries: self.entries_oldest_first().cloned().collect(),
        };
        let data = serde_json::to_vec(&index)?;

        let temp_path = self.store.index_temp_path();
        let index_path = self.store.index_path();

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| FifoCacheError::storage(&temp_path, e))?;
        file.write_all(&data)
            .await
            .map_err(|e| FifoCacheError::storage(&temp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| FifoCacheError::storage(&temp_path, e))?;
        drop(file);

        fs::rename(&temp_path, &index_path)
            .await
            .map_err(|e| FifoCacheError::storage(&index_path, e))?;
        Ok(())
    }
}
