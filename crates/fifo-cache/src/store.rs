//! On-disk layout of a cache subdirectory
//!
//! ```text
//! <subdirectory>/
//!   index.json        ledger index
//!   index.json.tmp    index being replaced
//!   tmp_<n>           blob being staged
//!   <sha256(key)>     one blob per entry
//! ```

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::{FifoCacheError, Result};

pub(crate) const INDEX_FILE: &str = "index.json";
const INDEX_TEMP_FILE: &str = "index.json.tmp";
const TEMP_PREFIX: &str = "tmp_";
const COPY_BUFFER_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone)]
pub(crate) struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    pub(crate) fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic file name for a key
    pub(crate) fn file_name_for(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub(crate) fn blob_path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    pub(crate) fn temp_path(&self, sequence: u64) -> PathBuf {
        self.dir.join(format!("{}{}", TEMP_PREFIX, sequence))
    }

    pub(crate) fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    pub(crate) fn index_temp_path(&self) -> PathBuf {
        self.dir.join(INDEX_TEMP_FILE)
    }

    /// Copy at most `expected + 1` bytes from `source` into `temp_path`.
    ///
    /// Returns the number of bytes copied. The temp file is removed on error;
    /// read failures map to `SourceRead`, write failures to `StorageUnavailable`.
    pub(crate) async fn stage<R>(&self, source: &mut R, temp_path: &Path, expected: u64) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let result = copy_to_file(source, temp_path, expected).await;
        if result.is_err() {
            self.discard(temp_path).await;
        }
        result
    }

    /// Move a staged file into its final place, replacing any previous blob
    pub(crate) async fn promote(&self, temp_path: &Path, file_name: &str) -> Result<PathBuf> {
        let final_path = self.blob_path(file_name);
        fs::rename(temp_path, &final_path)
            .await
            .map_err(|e| FifoCacheError::storage(&final_path, e))?;
        Ok(final_path)
    }

    pub(crate) async fn discard(&self, temp_path: &Path) {
        if let Err(e) = fs::remove_file(temp_path).await {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = ?temp_path, error = %e, "Failed to remove staged file");
            }
        }
    }

    /// Delete a blob. A blob that is already gone is not an error.
    pub(crate) async fn remove(&self, file_name: &str) -> Result<()> {
        let path = self.blob_path(file_name);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = ?path, "Blob already removed");
                Ok(())
            }
            Err(e) => Err(FifoCacheError::storage(path, e)),
        }
    }

    pub(crate) async fn read(&self, file_name: &str) -> std::io::Result<Vec<u8>> {
        fs::read(self.blob_path(file_name)).await
    }

    /// Length of a blob on disk, `None` if it is missing or not a file
    pub(crate) async fn blob_len(&self, file_name: &str) -> Option<u64> {
        match fs::metadata(self.blob_path(file_name)).await {
            Ok(meta) if meta.is_file() => Some(meta.len()),
            _ => None,
        }
    }

    /// Delete staging leftovers and blobs not named in `live`.
    ///
    /// Returns the number of files removed.
    pub(crate) async fn remove_stray_files(&self, live: &HashSet<String>) -> Result<usize> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| FifoCacheError::storage(&self.dir, e))?;
        let mut removed = 0;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FifoCacheError::storage(&self.dir, e))?
        {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            if name == INDEX_FILE || live.contains(&name) {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(file = %name, error = %e, "Failed to remove stray cache file"),
            }
        }

        Ok(removed)
    }
}

async fn copy_to_file<R>(source: &mut R, temp_path: &Path, expected: u64) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut file = fs::File::create(temp_path)
        .await
        .map_err(|e| FifoCacheError::storage(temp_path, e))?;

    // One byte past the declared size is enough to detect an oversized source
    let limit = expected.saturating_add(1);
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut total: u64 = 0;

    while total < limit {
        let want = (limit - total).min(buf.len() as u64) as usize;
        let n = source
            .read(&mut buf[..want])
            .await
            .map_err(FifoCacheError::source_read)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])
            .await
            .map_err(|e| FifoCacheError::storage(temp_path, e))?;
        total += n as u64;
    }

    file.flush()
        .await
        .map_err(|e| FifoCacheError::storage(temp_path, e))?;
    file.sync_all()
        .await
        .map_err(|e| FifoCacheError::storage(temp_path, e))?;

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tempfile::tempdir;
    use tokio::io::ReadBuf;

    struct FailingReader {
        remaining: usize,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.remaining == 0 {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "source went away",
                )));
            }
            let n = self.remaining.min(buf.remaining());
            buf.put_slice(&vec![b'x'; n]);
            self.remaining -= n;
            Poll::Ready(Ok(()))
        }
    }

    #[test]
    fn test_file_name_generation() {
        let name1 = BlobStore::file_name_for("file.test");
        let name2 = BlobStore::file_name_for("file.test");
        let name3 = BlobStore::file_name_for("file2.test");

        assert_eq!(name1, name2);
        assert_ne!(name1, name3);

        // Hex strings (64 chars for SHA256)
        assert_eq!(name1.len(), 64);
        assert!(name1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_stage_and_promote() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path().to_path_buf());
        let temp = store.temp_path(1);

        let mut source: &[u8] = b"data";
        let copied = store.stage(&mut source, &temp, 4).await.unwrap();
        assert_eq!(copied, 4);

        let name = BlobStore::file_name_for("k");
        let path = store.promote(&temp, &name).await.unwrap();
        assert!(!temp.exists());
        assert_eq!(std::fs::read(path).unwrap(), b"data");
        assert_eq!(store.blob_len(&name).await, Some(4));
    }

    #[tokio::test]
    async fn test_stage_stops_one_past_expected() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path().to_path_buf());
        let temp = store.temp_path(1);

        let mut source: &[u8] = b"0123456789";
        let copied = store.stage(&mut source, &temp, 4).await.unwrap();
        assert_eq!(copied, 5);
    }

    #[tokio::test]
    async fn test_stage_read_failure_removes_temp() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path().to_path_buf());
        let temp = store.temp_path(9);

        let mut source = FailingReader { remaining: 3 };
        let err = store.stage(&mut source, &temp, 10).await.unwrap_err();
        assert!(matches!(err, FifoCacheError::SourceRead(_)));
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn test_remove_missing_blob_is_ok() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path().to_path_buf());
        store.remove("does-not-exist").await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_stray_files_keeps_live_and_index() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path().to_path_buf());

        std::fs::write(dir.path().join("live"), b"1").unwrap();
        std::fs::write(dir.path().join("orphan"), b"2").unwrap();
        std::fs::write(dir.path().join("tmp_3"), b"3").unwrap();
        std::fs::write(dir.path().join(INDEX_FILE), b"{}").unwrap();

        let live: HashSet<String> = ["live".to_string()].into_iter().collect();
        let removed = store.remove_stray_files(&live).await.unwrap();

        assert_eq!(removed, 2);
        assert!(dir.path().join("live").exists());
        assert!(dir.path().join(INDEX_FILE).exists());
        assert!(!dir.path().join("orphan").exists());
        assert!(!dir.path().join("tmp_3").exists());
    }
}
