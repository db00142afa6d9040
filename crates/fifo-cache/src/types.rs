//! Cache types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Metadata for a cached entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    /// Name of the blob file inside the cache subdirectory
    pub file_name: String,
    pub size_bytes: u64,
    /// Admission order; smaller is older
    pub sequence: u64,
    pub admitted_at: DateTime<Utc>,
}

/// Statistics about the cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_size: u64,
    pub capacity: u64,
    pub hits: u64,
    pub misses: u64,
}

/// Result of a successful `cache` call
#[derive(Debug, Clone)]
pub struct CacheOutcome {
    pub path: PathBuf,
    pub bytes_written: u64,
    /// Keys evicted to make room, oldest first
    pub evicted: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(key: &str, sequence: u64) -> CacheEntry {
        CacheEntry {
            key: key.to_string(),
            file_name: format!("{key}-blob"),
            size_bytes: 4096,
            sequence,
            admitted_at: Utc::now(),
        }
    }

    #[test]
    fn test_entry_list_keeps_admission_order() {
        let mut entries = vec![entry("thumb.jpg", 3), entry("avatar.png", 1), entry("feed.json", 2)];
        entries.sort_by_key(|e| e.sequence);

        let json = serde_json::to_string(&entries).unwrap();
        let restored: Vec<CacheEntry> = serde_json::from_str(&json).unwrap();

        let order: Vec<_> = restored.iter().map(|e| (e.key.as_str(), e.sequence)).collect();
        assert_eq!(order, vec![("avatar.png", 1), ("feed.json", 2), ("thumb.jpg", 3)]);
        assert_eq!(restored, entries);
    }

    #[test]
    fn test_entry_admission_time_round_trips() {
        let mut original = entry("avatar.png", u64::MAX);
        original.admitted_at -= Duration::days(3);

        let json = serde_json::to_value(&original).unwrap();
        assert_eq!(json["sequence"], serde_json::json!(u64::MAX));
        assert!(json["admitted_at"].is_string());

        let restored: CacheEntry = serde_json::from_value(json).unwrap();
        assert_eq!(restored.admitted_at, original.admitted_at);
        assert_eq!(restored.sequence, u64::MAX);
    }

    #[test]
    fn test_stats_track_capacity_separately() {
        let stats = CacheStats {
            entries: 2,
            total_size: 90,
            capacity: 100,
            ..Default::default()
        };
        assert!(stats.total_size <= stats.capacity);
        assert_eq!(stats.hits + stats.misses, 0);
    }
}
