//! Thumbnail engine.
//!
//! Maps `(path, size, mtime) -> bytes` through a content-addressed
//! [`ThumbKey`]. Concurrent requests for the same key single-flight onto
//! one builder: a `dashmap`-guarded map of key -> pending [`Shared`] future,
//! per the design notes' recipe. The build itself runs on its own spawned
//! task so it keeps making progress even if the caller that triggered it
//! stops polling (e.g. a prefetch that hits its soft deadline); every
//! concurrent waiter just holds a cheap clone of the same future. A
//! background sweep enqueues files with no cached artifact at low priority,
//! and a garbage sweep removes cache files whose key no longer matches any
//! current file.
//!
//! The engine never decodes pixels itself: still images go through the
//! `image` crate; video first frames are extracted by shelling out to an
//! external transcoder binary, treated here as an opaque
//! [`VideoFrameExtractor`] collaborator rather than something this crate
//! implements.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::future::{FutureExt, Shared};
use sha2::{Digest, Sha256};

use crate::error::{ViewerError, ViewerResult};
use crate::fs_resilience::FileSystem;
use crate::memory::MemoryGovernor;
use crate::metrics;
use crate::store::CatalogueStore;
use viewer_model::{MediaKind, ThumbArtifact, ThumbKey};

/// Derive the cache key for a file from its path, size, and modification
/// time: `sha256(path || 0x00 || size_le_u64 || mtime_ns_le_u64)`,
/// hex-truncated to [`ThumbKey::LEN`] characters.
#[must_use]
pub fn derive_key(path: &str, size: u64, mtime_ns: u64) -> ThumbKey {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update([0u8]);
    hasher.update(size.to_le_bytes());
    hasher.update(mtime_ns.to_le_bytes());
    let digest = hasher.finalize();
    let hex = hex_encode(&digest);
    ThumbKey(hex[..ThumbKey::LEN].to_string())
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Builds thumbnail bytes for a source file. Still-image decode/resize/
/// encode and video frame extraction are implementation details behind
/// this trait so the engine's scheduling/caching logic is testable without
/// a real `libvips`/`ffmpeg` binary on the test machine.
#[async_trait::async_trait]
pub trait ThumbnailBuilder: Send + Sync {
    /// Build thumbnail bytes and a content type for the source at `path`.
    async fn build(&self, path: &Path, kind: MediaKind) -> ViewerResult<(Vec<u8>, &'static str)>;
}

/// Decodes and resizes still images with the `image` crate. Video sources
/// are delegated to an optional [`VideoFrameExtractor`].
pub struct ImageThumbnailBuilder<F> {
    fs: Arc<F>,
    video: Option<Arc<dyn VideoFrameExtractor>>,
    max_dimension: u32,
}

impl<F: FileSystem> ImageThumbnailBuilder<F> {
    /// Construct a builder. `max_dimension` bounds the longer side of the
    /// generated thumbnail.
    pub fn new(fs: Arc<F>, video: Option<Arc<dyn VideoFrameExtractor>>, max_dimension: u32) -> Self {
        Self { fs, video, max_dimension }
    }
}

#[async_trait::async_trait]
impl<F: FileSystem> ThumbnailBuilder for ImageThumbnailBuilder<F> {
    async fn build(&self, path: &Path, kind: MediaKind) -> ViewerResult<(Vec<u8>, &'static str)> {
        match kind {
            MediaKind::Image => {
                let decode_timer = metrics::thumbnails::PHASE_DURATION
                    .with_label_values(&["decode"])
                    .start_timer();
                let bytes = self.fs.read(path).await?;
                let img = image::load_from_memory(&bytes)
                    .map_err(|err| ViewerError::Internal(format!("decode failed: {err}")))?;
                decode_timer.observe_duration();

                let resize_timer = metrics::thumbnails::PHASE_DURATION
                    .with_label_values(&["resize"])
                    .start_timer();
                let resized = img.resize(
                    self.max_dimension,
                    self.max_dimension,
                    image::imageops::FilterType::Lanczos3,
                );
                resize_timer.observe_duration();

                let encode_timer = metrics::thumbnails::PHASE_DURATION
                    .with_label_values(&["encode"])
                    .start_timer();
                let mut out = Vec::new();
                resized
                    .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Jpeg)
                    .map_err(|err| ViewerError::Internal(format!("encode failed: {err}")))?;
                encode_timer.observe_duration();
                Ok((out, "image/jpeg"))
            }
            MediaKind::Video => {
                let extractor = self.video.as_ref().ok_or_else(|| {
                    ViewerError::Internal("no video frame extractor configured".into())
                })?;
                extractor.extract_first_frame(path).await
            }
            other => Err(ViewerError::Validation(format!(
                "cannot thumbnail media kind {other}"
            ))),
        }
    }
}

/// Extracts a representative still frame from a video file, delegating to
/// an external transcoder binary this crate does not implement; this trait
/// is the seam the engine calls through.
#[async_trait::async_trait]
pub trait VideoFrameExtractor: Send + Sync {
    /// Extract the first frame, returning encoded bytes and content type.
    async fn extract_first_frame(&self, path: &Path) -> ViewerResult<(Vec<u8>, &'static str)>;
}

/// Tuning knobs for background sweeps and single-flight soft deadlines.
#[derive(Debug, Clone, Copy)]
pub struct ThumbnailConfig {
    /// Background sweep interval (default 6h, also triggered after a full
    /// indexer cycle).
    pub sweep_interval: Duration,
    /// Files visited per sweep tick.
    pub sweep_budget: usize,
    /// Soft deadline before an anonymous-prefetch caller gets a fallback
    /// icon instead of waiting for the build to finish.
    pub prefetch_deadline: Duration,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(6 * 60 * 60),
            sweep_budget: 200,
            prefetch_deadline: Duration::from_millis(300),
        }
    }
}

/// A build result shared across every caller single-flighted onto the same
/// key. The error side is `Arc`-wrapped solely so the pending future's
/// output is `Clone`, as [`Shared`] requires.
type SharedBuildResult = Result<ThumbArtifact, Arc<ViewerError>>;

/// The "key -> pending future" map the design notes call for: a build runs
/// on its own spawned task (so it keeps making progress even if the caller
/// that triggered it — e.g. a prefetch that hits its soft deadline — stops
/// polling it), and every concurrent waiter holds a cheap clone of the same
/// [`Shared`] future.
type PendingBuild = Shared<Pin<Box<dyn std::future::Future<Output = SharedBuildResult> + Send>>>;

/// Generates and caches thumbnail derivatives on demand and in the
/// background.
pub struct ThumbnailEngine<F> {
    fs: Arc<F>,
    store: Arc<CatalogueStore>,
    memory: Arc<MemoryGovernor>,
    builder: Arc<dyn ThumbnailBuilder>,
    cache_root: PathBuf,
    /// Root of the media tree. Every source path the engine is handed is
    /// repository-relative (it comes from the store, keyed the same way as
    /// `garbage_sweep`/`find_uncached`); this is joined on before any `fs`
    /// call so a relative path actually resolves to the file on disk instead
    /// of to the server process's working directory.
    media_root: PathBuf,
    config: ThumbnailConfig,
    in_flight: Arc<DashMap<String, PendingBuild>>,
}

impl<F: FileSystem + 'static> ThumbnailEngine<F> {
    /// Construct the engine. `cache_root` is `{CACHE_DIR}/thumbnails` and is
    /// owned exclusively by this engine — no other component writes under it.
    /// `media_root` is the directory repository-relative source paths are
    /// resolved against.
    pub fn new(
        fs: Arc<F>,
        store: Arc<CatalogueStore>,
        memory: Arc<MemoryGovernor>,
        builder: Arc<dyn ThumbnailBuilder>,
        cache_root: PathBuf,
        media_root: PathBuf,
        config: ThumbnailConfig,
    ) -> Self {
        Self {
            fs,
            store,
            memory,
            builder,
            cache_root,
            media_root,
            config,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    fn absolute_source_path(&self, path: &str) -> PathBuf {
        self.media_root.join(path)
    }

    fn artifact_path(&self, key: &ThumbKey, ext: &str) -> PathBuf {
        self.cache_root.join(key.shard()).join(format!("{key}.{ext}"))
    }

    /// Public counterpart of [`Self::artifact_path`] for callers (the HTTP
    /// surface) that already hold a [`ThumbArtifact`] from [`Self::get`] and
    /// need the on-disk path to read its bytes.
    #[must_use]
    pub fn artifact_file_path(&self, key: &ThumbKey, kind: MediaKind) -> PathBuf {
        self.artifact_path(key, extension_for(kind))
    }

    /// Resolve the cache key for a source path using its current size and
    /// modified time (fetched from the filesystem through C1, matching the
    /// design's "resolves the key via C1 stat").
    pub async fn resolve_key(&self, path: &str) -> ViewerResult<ThumbKey> {
        let md = self.fs.metadata(&self.absolute_source_path(path)).await?;
        Ok(derive_key(path, md.len, md.modified_ns()))
    }

    /// Fetch (building if necessary) thumbnail bytes for `path`. Concurrent
    /// callers for the same resolved key share one build. `is_prefetch`
    /// controls whether a soft deadline applies: an anonymous background
    /// prefetch gives up and signals the caller to fall back to a generic
    /// icon rather than waiting indefinitely for the real build.
    pub async fn get(
        &self,
        path: &str,
        kind: MediaKind,
        is_prefetch: bool,
    ) -> ViewerResult<GetOutcome> {
        let key = self.resolve_key(path).await?;
        let ext = extension_for(kind);
        let artifact_path = self.artifact_path(&key, ext);

        if self.fs.path_exists(&artifact_path).await {
            metrics::thumbnails::CACHE_HITS.inc();
            return Ok(GetOutcome::Ready(ThumbArtifact {
                key,
                content_type: mime_for(ext).to_string(),
                generated_at: chrono::Utc::now(),
            }));
        }
        metrics::thumbnails::CACHE_MISSES.inc();

        let pending = self.pending_build(key.clone(), path.to_string(), kind, artifact_path);
        if is_prefetch {
            match tokio::time::timeout(self.config.prefetch_deadline, pending).await {
                Ok(result) => result.map(GetOutcome::Ready).map_err(viewer_error_from_shared),
                Err(_) => Ok(GetOutcome::FallbackIcon),
            }
        } else {
            pending
                .await
                .map(GetOutcome::Ready)
                .map_err(viewer_error_from_shared)
        }
    }

    /// Return the single in-flight build for `key`, spawning one onto the
    /// runtime if none exists yet. `dashmap`'s `entry` API locks the shard
    /// for the duration of the closure, so two concurrent callers for the
    /// same key can never both spawn a build: the loser always observes the
    /// winner's future already in the map.
    fn pending_build(
        &self,
        key: ThumbKey,
        path: String,
        kind: MediaKind,
        artifact_path: PathBuf,
    ) -> PendingBuild {
        let key_str = key.0.clone();
        let abs_path = self.absolute_source_path(&path);
        match self.in_flight.entry(key_str) {
            dashmap::mapref::entry::Entry::Occupied(existing) => existing.get().clone(),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let fs = self.fs.clone();
                let memory = self.memory.clone();
                let builder = self.builder.clone();
                let handle = tokio::spawn(async move {
                    memory.wait_if_paused().await;
                    metrics::thumbnails::HEAP_RATIO_AT_BUILD
                        .set(if memory.should_throttle() { 1.0 } else { 0.0 });
                    metrics::thumbnails::QUEUE_DEPTH.inc();
                    let started = Instant::now();
                    let result = builder.build(&abs_path, kind).await;
                    metrics::thumbnails::QUEUE_DEPTH.dec();

                    match result {
                        Ok((bytes, content_type)) => match fs.write_atomic(&artifact_path, &bytes).await {
                            Ok(()) => {
                                tracing::debug!(path, elapsed = ?started.elapsed(), "thumbnail built");
                                Ok(ThumbArtifact {
                                    key,
                                    content_type: content_type.to_string(),
                                    generated_at: chrono::Utc::now(),
                                })
                            }
                            Err(err) => {
                                metrics::thumbnails::FAILURES.with_label_values(&["write"]).inc();
                                Err(ViewerError::from(err))
                            }
                        },
                        Err(err) => {
                            metrics::thumbnails::FAILURES.with_label_values(&["build"]).inc();
                            Err(err)
                        }
                    }
                });

                let shared: PendingBuild = async move {
                    match handle.await {
                        Ok(result) => result.map_err(Arc::new),
                        Err(join_err) => Err(Arc::new(ViewerError::Internal(format!(
                            "thumbnail build task did not complete: {join_err}"
                        )))),
                    }
                }
                .boxed()
                .shared();

                let key_str = vacant.key().clone();
                vacant.insert(shared.clone());

                // The cleanup task holds its own clone of both the shared
                // future and the (`Arc`-backed) map, so it runs to
                // completion regardless of whether any caller is still
                // waiting on the result.
                let cleanup_future = shared.clone();
                let in_flight = self.in_flight.clone();
                tokio::spawn(async move {
                    cleanup_future.await;
                    in_flight.remove(&key_str);
                });

                shared
            }
        }
    }

    /// Delete the cached artifact for `path`'s current key. The next
    /// request rebuilds it.
    pub async fn invalidate(&self, path: &str, kind: MediaKind) -> ViewerResult<()> {
        let key = self.resolve_key(path).await?;
        let artifact_path = self.artifact_path(&key, extension_for(kind));
        if self.fs.path_exists(&artifact_path).await {
            let _ = tokio::fs::remove_file(&artifact_path).await;
        }
        Ok(())
    }

    /// Clear the entire cache (truncate the cache root) and reset in-flight
    /// state; the background sweep re-populates on its next tick.
    pub async fn clear_all(&self) -> ViewerResult<()> {
        self.in_flight.clear();
        if tokio::fs::metadata(&self.cache_root).await.is_ok() {
            tokio::fs::remove_dir_all(&self.cache_root).await?;
        }
        tokio::fs::create_dir_all(&self.cache_root).await?;
        Ok(())
    }

    /// Iterate files that have no cached artifact (bounded by
    /// `sweep_budget`) and return their paths for the caller to enqueue at
    /// low priority.
    pub async fn find_uncached(&self) -> ViewerResult<Vec<String>> {
        let all_paths = self.store.all_file_paths().await?;
        let mut uncached = Vec::new();
        for path in all_paths {
            if uncached.len() >= self.config.sweep_budget {
                break;
            }
            let Some(file) = self.store.get_file(&path).await? else {
                continue;
            };
            if !matches!(file.kind, MediaKind::Image | MediaKind::Video) {
                continue;
            }
            let key = self.resolve_key(&path).await.ok();
            let Some(key) = key else { continue };
            let artifact_path = self.artifact_path(&key, extension_for(file.kind));
            if !self.fs.path_exists(&artifact_path).await {
                uncached.push(path);
            }
        }
        Ok(uncached)
    }

    /// Garbage sweep: scan artifact filenames on disk against the set of
    /// keys any current file could produce, removing orphans (stale
    /// artifacts whose source changed or disappeared).
    pub async fn garbage_sweep(&self) -> ViewerResult<u64> {
        let all_paths = self.store.all_file_paths().await?;
        let mut live_keys = std::collections::HashSet::new();
        for path in all_paths {
            if let Some(file) = self.store.get_file(&path).await? {
                if let Ok(key) = self.resolve_key(&path).await {
                    live_keys.insert(format!("{key}.{}", extension_for(file.kind)));
                }
            }
        }

        let mut removed = 0u64;
        let Ok(mut shards) = tokio::fs::read_dir(&self.cache_root).await else {
            return Ok(0);
        };
        while let Ok(Some(shard)) = shards.next_entry().await {
            let shard_path = shard.path();
            if !shard_path.is_dir() {
                continue;
            }
            let Ok(mut files) = tokio::fs::read_dir(&shard_path).await else {
                continue;
            };
            while let Ok(Some(entry)) = files.next_entry().await {
                let name = entry.file_name().to_string_lossy().to_string();
                if !live_keys.contains(&name) {
                    if tokio::fs::remove_file(entry.path()).await.is_ok() {
                        removed += 1;
                    }
                }
            }
        }
        Ok(removed)
    }
}

/// Outcome of [`ThumbnailEngine::get`].
#[derive(Debug, Clone)]
pub enum GetOutcome {
    /// The artifact is ready; bytes live at the path implied by its key.
    Ready(ThumbArtifact),
    /// Build exceeded the prefetch soft deadline; caller should serve a
    /// generic fallback icon instead of waiting.
    FallbackIcon,
}

/// Unwrap the `Arc`-wrapped error a [`PendingBuild`] resolves to, cloning
/// its message into a fresh [`ViewerError`] since `ViewerError` itself is
/// not `Clone` (it isn't safe to share the exact same error value across
/// unrelated call stacks, but its message is).
fn viewer_error_from_shared(err: Arc<ViewerError>) -> ViewerError {
    match &*err {
        ViewerError::Validation(msg) => ViewerError::Validation(msg.clone()),
        ViewerError::AuthRequired => ViewerError::AuthRequired,
        ViewerError::AuthFailed(msg) => ViewerError::AuthFailed(msg.clone()),
        ViewerError::NotFound(msg) => ViewerError::NotFound(msg.clone()),
        ViewerError::Conflict(msg) => ViewerError::Conflict(msg.clone()),
        ViewerError::Transient(msg) => ViewerError::Transient(msg.clone()),
        ViewerError::ClientGone => ViewerError::ClientGone,
        ViewerError::Internal(msg) => ViewerError::Internal(msg.clone()),
    }
}

fn extension_for(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Video => "jpg",
        _ => "jpg",
    }
}

fn mime_for(ext: &str) -> &'static str {
    match ext {
        "png" => "image/png",
        "webp" => "image/webp",
        _ => "image/jpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs_resilience::InMemoryFs;
    use crate::memory::MemoryGovernorConfig;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

    #[test]
    fn derive_key_changes_with_size_and_mtime() {
        let a = derive_key("a.jpg", 100, 1000);
        let b = derive_key("a.jpg", 200, 1000);
        let c = derive_key("a.jpg", 100, 2000);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.0.len(), ThumbKey::LEN);
    }

    struct CountingBuilder {
        calls: Arc<AtomicU32>,
    }

    #[async_trait::async_trait]
    impl ThumbnailBuilder for CountingBuilder {
        async fn build(&self, _path: &Path, _kind: MediaKind) -> ViewerResult<(Vec<u8>, &'static str)> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok((vec![1, 2, 3], "image/jpeg"))
        }
    }

    #[tokio::test]
    async fn concurrent_gets_single_flight_to_one_build() {
        let mut mem = InMemoryFs::new();
        mem.add_file_with_mtime("/media/a.jpg", b"x".to_vec(), std::time::SystemTime::UNIX_EPOCH);
        let fs = Arc::new(mem);
        let store = Arc::new(CatalogueStore::open_in_memory().await.unwrap());
        let memory = MemoryGovernor::new(MemoryGovernorConfig::default());
        let calls = Arc::new(AtomicU32::new(0));
        let builder = Arc::new(CountingBuilder { calls: calls.clone() });

        let engine = Arc::new(ThumbnailEngine::new(
            fs,
            store,
            memory,
            builder,
            PathBuf::from("/cache/thumbnails"),
            PathBuf::from("/media"),
            ThumbnailConfig::default(),
        ));

        let e1 = engine.clone();
        let e2 = engine.clone();
        let (r1, r2) = tokio::join!(
            e1.get("/media/a.jpg", MediaKind::Image, false),
            e2.get("/media/a.jpg", MediaKind::Image, false),
        );
        assert!(r1.is_ok());
        assert!(r2.is_ok());
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
    }
}
