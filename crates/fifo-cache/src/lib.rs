//! Disk-backed byte cache with strict FIFO eviction
//!
//! Stores byte streams as files in a managed subdirectory, keeps their total
//! size under a configured budget by deleting the oldest admitted entries
//! first, and persists admission order in an index so it survives restarts.

mod cache;
mod config;
mod error;
mod ledger;
mod provider;
mod store;
mod types;

pub use cache::FifoCache;
pub use config::{CacheConfiguration, DEFAULT_DIRECTORY, DEFAULT_SIZE};
pub use error::{FifoCacheError, Result};
pub use provider::{DirectoryProvider, LocalDirectoryProvider};
pub use types::{CacheEntry, CacheOutcome, CacheStats};
