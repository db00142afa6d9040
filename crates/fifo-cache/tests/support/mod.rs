#![allow(dead_code)]

use std::io;
use std::io::Write;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use fifo_cache::{CacheConfiguration, FifoCache, LocalDirectoryProvider};
use tempfile::TempDir;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::EnvFilter;

/// Route engine logs to the test harness, filtered by `RUST_LOG`
pub fn init_tracing() {
    let _ = fmt::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn open_cache(root: &Path, capacity: u64) -> FifoCache {
    let provider = LocalDirectoryProvider::new(root).expect("provider");
    let config = CacheConfiguration::default()
        .with_capacity_bytes(capacity)
        .expect("valid capacity");
    FifoCache::open(provider, config).await.expect("open cache")
}

pub async fn temp_cache(capacity: u64) -> (TempDir, FifoCache) {
    let dir = TempDir::new().expect("tempdir");
    let cache = open_cache(dir.path(), capacity).await;
    (dir, cache)
}

/// Yields `good_bytes` bytes and then fails every read
pub struct BrokenSource {
    pub good_bytes: usize,
}

impl AsyncRead for BrokenSource {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.good_bytes == 0 {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream closed early",
            )));
        }
        let n = self.good_bytes.min(buf.remaining());
        buf.put_slice(&vec![0xAB; n]);
        self.good_bytes -= n;
        Poll::Ready(Ok(()))
    }
}

#[derive(Clone)]
struct BufferWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl<'a> MakeWriter<'a> for BufferWriter {
    type Writer = BufferWriterHandle;

    fn make_writer(&'a self) -> Self::Writer {
        BufferWriterHandle {
            buffer: self.buffer.clone(),
        }
    }
}

struct BufferWriterHandle {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Write for BufferWriterHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.buffer.lock().unwrap_or_else(|err| err.into_inner());
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Captures tracing output through a shared global subscriber.
/// Tests holding a capture run one at a time.
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    _permit: OwnedSemaphorePermit,
}

static LOG_BUFFER: std::sync::OnceLock<Arc<Mutex<Vec<u8>>>> = std::sync::OnceLock::new();
static LOG_SEMAPHORE: std::sync::OnceLock<Arc<Semaphore>> = std::sync::OnceLock::new();

impl LogCapture {
    pub async fn new(filter: &str) -> Self {
        let semaphore = LOG_SEMAPHORE
            .get_or_init(|| Arc::new(Semaphore::new(1)))
            .clone();
        let permit = semaphore
            .acquire_owned()
            .await
            .expect("log capture semaphore closed");
        let buffer = LOG_BUFFER
            .get_or_init(|| {
                let buffer = Arc::new(Mutex::new(Vec::new()));
                let writer = BufferWriter {
                    buffer: buffer.clone(),
                };
                let subscriber = fmt::fmt()
                    .with_env_filter(EnvFilter::new(filter))
                    .with_target(false)
                    .with_ansi(false)
                    .compact()
                    .with_writer(writer)
                    .finish();
                let _ = tracing::subscriber::set_global_default(subscriber);
                buffer
            })
            .clone();
        buffer.lock().unwrap_or_else(|err| err.into_inner()).clear();
        Self {
            buffer,
            _permit: permit,
        }
    }

    pub fn text(&self) -> String {
        let guard = self.buffer.lock().unwrap_or_else(|err| err.into_inner());
        String::from_utf8_lossy(&guard).to_string()
    }
}
