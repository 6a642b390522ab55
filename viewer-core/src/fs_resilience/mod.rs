//! Filesystem resilience layer.
//!
//! Network-mounted media volumes occasionally hand back `ESTALE` for a
//! moment after the far side rotates a file handle. A single stale error is
//! not a reason to mark a file missing or fail an indexing cycle, so every
//! filesystem call the indexer and thumbnail engine make goes through
//! [`ResilientFs`], which retries `ESTALE` only, with exponential backoff,
//! and gives up and returns [`crate::error::ViewerError::Transient`] once the
//! retry budget is exhausted. Any other error passes straight through.
//!
//! The [`FileSystem`] trait and its `RealFs`/`InMemoryFs` implementations
//! mirror the scanning abstraction media indexers commonly use to keep the
//! indexer testable without touching a real disk.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::metrics;

/// `ESTALE` on Linux. The only error this layer retries.
const ESTALE: i32 = 116;

fn is_stale(err: &io::Error) -> bool {
    err.raw_os_error() == Some(ESTALE)
}

/// Lightweight metadata needed by the indexer and thumbnail engine.
#[derive(Debug, Clone, Copy)]
pub struct FsMetadata {
    /// Whether the path is a directory.
    pub is_dir: bool,
    /// Whether the path is a regular file.
    pub is_file: bool,
    /// Size in bytes.
    pub len: u64,
    /// Last-modified time, if the filesystem reports one.
    pub modified: Option<SystemTime>,
}

impl FsMetadata {
    /// Modification time as nanoseconds since the Unix epoch, used as part
    /// of the thumbnail cache key. Returns `0` when the filesystem does not
    /// report a modification time.
    #[must_use]
    pub fn modified_ns(&self) -> u64 {
        self.modified
            .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }
}

/// Async directory iterator.
#[async_trait]
pub trait ReadDirStream {
    /// Return the next entry's path, or `None` when exhausted.
    async fn next_entry(&mut self) -> io::Result<Option<PathBuf>>;
}

/// Minimal async filesystem abstraction used by the indexer and thumbnail
/// engine. Implemented by [`RealFs`] in production and [`InMemoryFs`] in
/// tests; [`ResilientFs`] wraps either with ESTALE retry.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Check whether a path exists, without distinguishing why not.
    async fn path_exists(&self, path: &Path) -> bool;

    /// Open a directory for iteration.
    async fn read_dir(&self, path: &Path) -> io::Result<Box<dyn ReadDirStream + Send>>;

    /// Fetch lightweight metadata.
    async fn metadata(&self, path: &Path) -> io::Result<FsMetadata>;

    /// Read a whole file into memory. Used for still-image thumbnail
    /// decoding; video frame extraction shells out to `ffmpeg` directly.
    async fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Write `data` to `path` atomically: write to a sibling temp file, then
    /// rename over the destination.
    async fn write_atomic(&self, path: &Path, data: &[u8]) -> io::Result<()>;
}

/// Real filesystem, backed by `tokio::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    /// Construct a real filesystem handle.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileSystem for RealFs {
    async fn path_exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Box<dyn ReadDirStream + Send>> {
        let inner = tokio::fs::read_dir(path).await?;
        Ok(Box::new(RealReadDir { inner }))
    }

    async fn metadata(&self, path: &Path) -> io::Result<FsMetadata> {
        let md = tokio::fs::metadata(path).await?;
        Ok(FsMetadata {
            is_dir: md.is_dir(),
            is_file: md.is_file(),
            len: md.len(),
            modified: md.modified().ok(),
        })
    }

    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }

    async fn write_atomic(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let tmp = path.with_extension(format!(
            "tmp-{}",
            uuid::Uuid::new_v4().simple()
        ));
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, path).await
    }
}

struct RealReadDir {
    inner: tokio::fs::ReadDir,
}

#[async_trait]
impl ReadDirStream for RealReadDir {
    async fn next_entry(&mut self) -> io::Result<Option<PathBuf>> {
        Ok(self.inner.next_entry().await?.map(|e| e.path()))
    }
}

/// In-memory filesystem double for tests. Paths are treated literally;
/// callers should use consistent absolute or relative paths throughout a
/// single test. Nodes live behind a `std::sync::Mutex` (never held across
/// an `.await`) so `write_atomic` can record writes the same way `RealFs`
/// does — production wiring points both the media root and the thumbnail
/// cache root through the one `FileSystem` impl, so tests exercising the
/// cache need writes to actually land.
#[derive(Default)]
pub struct InMemoryFs {
    nodes: std::sync::Mutex<HashMap<PathBuf, Node>>,
}

impl Clone for InMemoryFs {
    fn clone(&self) -> Self {
        Self {
            nodes: std::sync::Mutex::new(self.nodes.lock().unwrap().clone()),
        }
    }
}

#[derive(Clone)]
enum Node {
    Dir { children: Vec<PathBuf> },
    File { data: Vec<u8>, modified: Option<SystemTime> },
}

impl InMemoryFs {
    /// Construct an empty in-memory filesystem.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a directory, creating any missing ancestors.
    pub fn add_dir<P: Into<PathBuf>>(&mut self, path: P) {
        let path = path.into();
        let mut nodes = self.nodes.lock().unwrap();
        if nodes.contains_key(&path) {
            return;
        }
        ensure_parent_link(&mut nodes, &path);
        nodes.insert(path, Node::Dir { children: Vec::new() });
    }

    /// Register a file with the given contents, creating any missing
    /// ancestor directories.
    pub fn add_file<P: Into<PathBuf>>(&mut self, path: P, data: impl Into<Vec<u8>>) {
        let path = path.into();
        let mut nodes = self.nodes.lock().unwrap();
        ensure_parent_link(&mut nodes, &path);
        nodes.insert(
            path,
            Node::File {
                data: data.into(),
                modified: Some(SystemTime::now()),
            },
        );
    }

    /// Register a file with an explicit modification time, for tests that
    /// exercise thumbnail cache-key derivation.
    pub fn add_file_with_mtime<P: Into<PathBuf>>(
        &mut self,
        path: P,
        data: impl Into<Vec<u8>>,
        modified: SystemTime,
    ) {
        let path = path.into();
        let mut nodes = self.nodes.lock().unwrap();
        ensure_parent_link(&mut nodes, &path);
        nodes.insert(
            path,
            Node::File {
                data: data.into(),
                modified: Some(modified),
            },
        );
    }

    /// Remove a path, returning whether it was present.
    pub fn remove<P: AsRef<Path>>(&mut self, path: P) -> bool {
        let path = path.as_ref();
        let mut nodes = self.nodes.lock().unwrap();
        let removed = nodes.remove(path).is_some();
        if removed {
            if let Some(parent) = path.parent() {
                if let Some(Node::Dir { children }) = nodes.get_mut(parent) {
                    children.retain(|p| p != path);
                }
            }
        }
        removed
    }
}

fn ensure_parent_link(nodes: &mut HashMap<PathBuf, Node>, path: &Path) {
    if let Some(parent) = path.parent() {
        if !nodes.contains_key(parent) {
            nodes.insert(parent.to_path_buf(), Node::Dir { children: Vec::new() });
            ensure_parent_link(nodes, parent);
        }
        if let Some(Node::Dir { children }) = nodes.get_mut(parent) {
            if !children.iter().any(|p| p.as_path() == path) {
                children.push(path.to_path_buf());
            }
        }
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn path_exists(&self, path: &Path) -> bool {
        self.nodes.lock().unwrap().contains_key(path)
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Box<dyn ReadDirStream + Send>> {
        match self.nodes.lock().unwrap().get(path) {
            Some(Node::Dir { children }) => Ok(Box::new(InMemReadDir {
                queue: children.clone().into(),
            })),
            Some(Node::File { .. }) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("read_dir on file: {}", path.display()),
            )),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("read_dir on missing path: {}", path.display()),
            )),
        }
    }

    async fn metadata(&self, path: &Path) -> io::Result<FsMetadata> {
        match self.nodes.lock().unwrap().get(path) {
            Some(Node::Dir { .. }) => Ok(FsMetadata {
                is_dir: true,
                is_file: false,
                len: 0,
                modified: None,
            }),
            Some(Node::File { data, modified }) => Ok(FsMetadata {
                is_dir: false,
                is_file: true,
                len: data.len() as u64,
                modified: *modified,
            }),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("metadata on missing path: {}", path.display()),
            )),
        }
    }

    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        match self.nodes.lock().unwrap().get(path) {
            Some(Node::File { data, .. }) => Ok(data.clone()),
            Some(Node::Dir { .. }) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("read on directory: {}", path.display()),
            )),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("read on missing path: {}", path.display()),
            )),
        }
    }

    async fn write_atomic(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let mut nodes = self.nodes.lock().unwrap();
        ensure_parent_link(&mut nodes, path);
        nodes.insert(
            path.to_path_buf(),
            Node::File {
                data: data.to_vec(),
                modified: Some(SystemTime::now()),
            },
        );
        Ok(())
    }
}

struct InMemReadDir {
    queue: VecDeque<PathBuf>,
}

#[async_trait]
impl ReadDirStream for InMemReadDir {
    async fn next_entry(&mut self) -> io::Result<Option<PathBuf>> {
        Ok(self.queue.pop_front())
    }
}

/// ESTALE retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling the backoff delay is clamped to.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(500),
        }
    }
}

/// Wraps a [`FileSystem`] so that `ESTALE` errors are retried with
/// exponential backoff before being surfaced. All other errors, and
/// `ESTALE` once the retry budget is exhausted, pass straight through as
/// `io::Error` — callers convert to [`crate::error::ViewerError`] via its
/// `From<io::Error>` impl, which maps anything that reaches it as
/// `Internal` or `NotFound`/`Validation` by kind. A caller that wants the
/// stale-exhausted case to read as `Transient` should check
/// [`is_stale`](is_stale) before converting; the indexer does this when
/// deciding whether to skip a file for this cycle rather than delete it.
pub struct ResilientFs<F> {
    inner: F,
    config: RetryConfig,
    volume: String,
}

impl<F: FileSystem> ResilientFs<F> {
    /// Wrap `inner` with the default retry policy. `volume` labels metrics
    /// and should identify the mounted media volume (e.g. its configured
    /// root directory name).
    pub fn new(inner: F, volume: impl Into<String>) -> Self {
        Self::with_config(inner, volume, RetryConfig::default())
    }

    /// Wrap `inner` with an explicit retry policy.
    pub fn with_config(inner: F, volume: impl Into<String>, config: RetryConfig) -> Self {
        Self {
            inner,
            config,
            volume: volume.into(),
        }
    }

    /// Borrow the wrapped filesystem directly, bypassing retry. Used by
    /// callers (e.g. the thumbnail builder) that already loop at a higher
    /// level and want raw errors.
    pub fn inner(&self) -> &F {
        &self.inner
    }

    async fn retry<T, Fut>(
        &self,
        operation: &'static str,
        make: impl Fn() -> Fut,
    ) -> io::Result<T>
    where
        Fut: Future<Output = io::Result<T>>,
    {
        let timer = metrics::fs_retry::OPERATION_DURATION
            .with_label_values(&[operation, &self.volume])
            .start_timer();
        let mut attempt = 0u32;
        let mut delay = self.config.base_delay;
        loop {
            match make().await {
                Ok(value) => {
                    if attempt > 0 {
                        metrics::fs_retry::RETRY_SUCCESS
                            .with_label_values(&[operation])
                            .inc();
                    }
                    timer.observe_duration();
                    return Ok(value);
                }
                Err(err) if is_stale(&err) && attempt < self.config.max_retries => {
                    metrics::fs_retry::STALE_ERRORS
                        .with_label_values(&[operation])
                        .inc();
                    metrics::fs_retry::RETRY_ATTEMPTS
                        .with_label_values(&[operation])
                        .inc();
                    tracing::warn!(operation, attempt, "ESTALE, retrying after {:?}", delay);
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.config.max_delay);
                    attempt += 1;
                }
                Err(err) => {
                    if is_stale(&err) {
                        metrics::fs_retry::STALE_ERRORS
                            .with_label_values(&[operation])
                            .inc();
                        metrics::fs_retry::RETRY_FAILURE
                            .with_label_values(&[operation])
                            .inc();
                    }
                    timer.observe_duration();
                    return Err(err);
                }
            }
        }
    }
}

#[async_trait]
impl<F: FileSystem> FileSystem for ResilientFs<F> {
    async fn path_exists(&self, path: &Path) -> bool {
        self.inner.path_exists(path).await
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Box<dyn ReadDirStream + Send>> {
        self.retry("read_dir", || self.inner.read_dir(path)).await
    }

    async fn metadata(&self, path: &Path) -> io::Result<FsMetadata> {
        self.retry("metadata", || self.inner.metadata(path)).await
    }

    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.retry("read", || self.inner.read(path)).await
    }

    async fn write_atomic(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        self.retry("write", || self.inner.write_atomic(path, data))
            .await
    }
}

/// Whether an I/O error is a stale-handle error this layer would retry.
#[must_use]
pub fn is_stale_error(err: &io::Error) -> bool {
    is_stale(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlakyFs {
        inner: InMemoryFs,
        fail_times: Arc<AtomicU32>,
    }

    #[async_trait]
    impl FileSystem for FlakyFs {
        async fn path_exists(&self, path: &Path) -> bool {
            self.inner.path_exists(path).await
        }

        async fn read_dir(&self, path: &Path) -> io::Result<Box<dyn ReadDirStream + Send>> {
            self.inner.read_dir(path).await
        }

        async fn metadata(&self, path: &Path) -> io::Result<FsMetadata> {
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                return Err(io::Error::from_raw_os_error(ESTALE));
            }
            self.inner.metadata(path).await
        }

        async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
            self.inner.read(path).await
        }

        async fn write_atomic(&self, path: &Path, data: &[u8]) -> io::Result<()> {
            self.inner.write_atomic(path, data).await
        }
    }

    #[tokio::test]
    async fn retries_estale_until_success() {
        let mut inner = InMemoryFs::new();
        inner.add_file("/media/a.jpg", b"x".to_vec());
        let flaky = FlakyFs {
            inner,
            fail_times: Arc::new(AtomicU32::new(2)),
        };
        let fs = ResilientFs::with_config(
            flaky,
            "test-volume",
            RetryConfig {
                max_retries: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
        );
        let md = fs.metadata(Path::new("/media/a.jpg")).await.unwrap();
        assert!(md.is_file);
    }

    #[tokio::test]
    async fn gives_up_after_exhausting_retries() {
        let inner = InMemoryFs::new();
        let flaky = FlakyFs {
            inner,
            fail_times: Arc::new(AtomicU32::new(100)),
        };
        let fs = ResilientFs::with_config(
            flaky,
            "test-volume",
            RetryConfig {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
        );
        let err = fs.metadata(Path::new("/media/a.jpg")).await.unwrap_err();
        assert!(is_stale_error(&err));
    }

    #[tokio::test]
    async fn non_stale_errors_are_not_retried() {
        let inner = InMemoryFs::new();
        let fs = ResilientFs::new(inner, "test-volume");
        let err = fs.metadata(Path::new("/missing")).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
