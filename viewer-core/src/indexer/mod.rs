//! Media indexer.
//!
//! Keeps the catalogue consistent with the filesystem through two
//! cooperating cycles inside one task: a lightweight **poll** cycle that
//! only inserts/updates, and an exhaustive **full** cycle that also
//! deletes. Directory entries fan out to a fixed worker pool over a bounded
//! channel; a single writer task drains the channel and batches rows into
//! store transactions. This is an actor/dispatcher pipeline expressed with
//! a plain channel-based worker pool rather than a distributed job-queue
//! abstraction, which a single-host indexer has no use for.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::MissedTickBehavior;

use crate::error::ViewerResult;
use crate::fs_resilience::FileSystem;
use crate::memory::MemoryGovernor;
use crate::metrics;
use crate::store::{CatalogueStore, UpsertOutcome};
use viewer_model::{File, MediaKind};

/// Tuning knobs for the indexer's two cycles and worker pool.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Root of the media tree, relative paths are computed against this.
    pub media_root: PathBuf,
    /// How often the full (deleting) cycle runs. Default 30 min.
    pub full_scan_interval: Duration,
    /// How often the lightweight (non-deleting) poll cycle runs. Default 30 s.
    pub poll_interval: Duration,
    /// Size of the directory worker pool. Default 3 (tuned for NFS).
    pub workers: usize,
    /// Rows per store transaction batch.
    pub batch_size: usize,
    /// Directories visited per poll cycle before yielding to the next tick,
    /// resumed round-robin.
    pub poll_directory_budget: usize,
    /// Startup warmup before the first full cycle.
    pub startup_warmup: Duration,
    /// Changed-row threshold above which a vacuum is considered after a
    /// full cycle completes.
    pub vacuum_threshold: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            media_root: PathBuf::from("/media"),
            full_scan_interval: Duration::from_secs(30 * 60),
            poll_interval: Duration::from_secs(30),
            workers: 3,
            batch_size: 500,
            poll_directory_budget: 64,
            startup_warmup: Duration::from_millis(500),
            vacuum_threshold: 1000,
        }
    }
}

/// Path sets published after a batch commits, consumed by the thumbnail
/// engine (and any future subscriber) to learn what changed.
#[derive(Debug, Clone, Default)]
pub struct IndexEvent {
    /// Paths newly inserted.
    pub added: Vec<String>,
    /// Paths whose size/mtime changed.
    pub updated: Vec<String>,
    /// Paths confirmed gone (full cycle only).
    pub removed: Vec<String>,
}

/// A unit of work handed to a directory worker: one directory to read,
/// classify, and emit file records from.
#[derive(Debug, Clone)]
struct DirJob {
    path: PathBuf,
    rel: String,
}

/// An owned, immutable record a worker emits for the writer to persist.
/// Workers never touch the store directly, so there is no shared mutable
/// state between them.
#[derive(Debug, Clone)]
struct FileRecord {
    file: File,
}

enum WriterMsg {
    Record(FileRecord),
    DirDone { rel: String, seen: Vec<String> },
}

/// Walks the media root in parallel, diffs against the catalogue, and
/// drives background thumbnail work through [`IndexEvent`] subscribers.
pub struct Indexer<F> {
    fs: Arc<F>,
    store: Arc<CatalogueStore>,
    memory: Arc<MemoryGovernor>,
    config: IndexerConfig,
    events: tokio::sync::broadcast::Sender<IndexEvent>,
    last_indexed_at: Arc<Mutex<Option<chrono::DateTime<Utc>>>>,
    poll_cursor: Arc<Mutex<PollCursor>>,
    changed_rows_since_vacuum: AtomicU64,
}

#[derive(Default)]
struct PollCursor {
    remaining: Vec<PathBuf>,
}

impl<F: FileSystem + 'static> Indexer<F> {
    /// Build an indexer. `events` has a small lagging-receiver-tolerant
    /// broadcast capacity; subscribers that fall behind miss old events
    /// rather than blocking the indexer.
    pub fn new(
        fs: Arc<F>,
        store: Arc<CatalogueStore>,
        memory: Arc<MemoryGovernor>,
        config: IndexerConfig,
    ) -> Self {
        let (tx, _rx) = tokio::sync::broadcast::channel(256);
        Self {
            fs,
            store,
            memory,
            config,
            events: tx,
            last_indexed_at: Arc::new(Mutex::new(None)),
            poll_cursor: Arc::new(Mutex::new(PollCursor::default())),
            changed_rows_since_vacuum: AtomicU64::new(0),
        }
    }

    /// Subscribe to `{added, updated, removed}` events published after each
    /// batch commit.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<IndexEvent> {
        self.events.subscribe()
    }

    /// When the most recent full cycle completed, if any.
    pub async fn last_indexed_at(&self) -> Option<chrono::DateTime<Utc>> {
        *self.last_indexed_at.lock().await
    }

    /// Spawn the indexer's two-ticker workloop. The returned handle resolves
    /// when `shutdown` fires.
    pub fn spawn(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(self.config.startup_warmup).await;
            if let Err(err) = self.run_full_cycle().await {
                tracing::error!(%err, "startup full cycle failed");
            }

            let mut full_ticker = tokio::time::interval(self.config.full_scan_interval);
            full_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            full_ticker.tick().await; // consume the immediate first tick; we just ran startup

            let mut poll_ticker = tokio::time::interval(self.config.poll_interval);
            poll_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = full_ticker.tick() => {
                        if let Err(err) = self.run_full_cycle().await {
                            tracing::error!(%err, "full cycle failed");
                        }
                    }
                    _ = poll_ticker.tick() => {
                        if let Err(err) = self.run_poll_cycle().await {
                            tracing::error!(%err, "poll cycle failed");
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        })
    }

    /// Run one exhaustive full cycle: walk everything, upsert observed
    /// files, then delete per-directory anything no longer observed.
    /// Deletion only ever happens here, never in [`Self::run_poll_cycle`].
    pub async fn run_full_cycle(&self) -> ViewerResult<()> {
        let started = Instant::now();
        let timer = metrics::indexer::RUN_DURATION.with_label_values(&["full"]).start_timer();

        let observed = self.walk_and_write(true).await?;

        for (dir, seen) in &observed {
            let deleted = self.store.delete_missing(dir, seen).await?;
            if deleted > 0 {
                self.changed_rows_since_vacuum
                    .fetch_add(deleted, Ordering::Relaxed);
            }
        }

        *self.last_indexed_at.lock().await = Some(Utc::now());
        timer.observe_duration();

        let elapsed = started.elapsed().as_secs_f64().max(0.001);
        let total_files: usize = observed.values().map(|v| v.len()).sum();
        metrics::indexer::FILES_PER_SECOND.set(total_files as f64 / elapsed);

        if self.changed_rows_since_vacuum.load(Ordering::Relaxed) > self.config.vacuum_threshold {
            self.store.vacuum().await?;
            self.changed_rows_since_vacuum.store(0, Ordering::Relaxed);
        }

        tracing::info!(files = total_files, elapsed = ?started.elapsed(), "full indexer cycle complete");
        Ok(())
    }

    /// Run one lightweight poll cycle: visit at most
    /// `poll_directory_budget` directories (resumed round-robin across
    /// calls), insert/update only.
    pub async fn run_poll_cycle(&self) -> ViewerResult<()> {
        let timer = metrics::indexer::RUN_DURATION.with_label_values(&["poll"]).start_timer();
        let dirs = self.next_poll_batch().await;
        if !dirs.is_empty() {
            self.walk_directories(dirs, false).await?;
        }
        timer.observe_duration();
        Ok(())
    }

    async fn next_poll_batch(&self) -> Vec<PathBuf> {
        let mut cursor = self.poll_cursor.lock().await;
        if cursor.remaining.is_empty() {
            cursor.remaining = self.enumerate_all_dirs().await;
        }
        let take = self.config.poll_directory_budget.min(cursor.remaining.len());
        cursor.remaining.drain(..take).collect()
    }

    async fn enumerate_all_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.config.media_root.clone()];
        let mut frontier = vec![self.config.media_root.clone()];
        while let Some(dir) = frontier.pop() {
            let Ok(mut entries) = self.fs.read_dir(&dir).await else {
                continue;
            };
            while let Ok(Some(path)) = entries.next_entry().await {
                if let Ok(md) = self.fs.metadata(&path).await {
                    if md.is_dir {
                        dirs.push(path.clone());
                        frontier.push(path);
                    }
                }
            }
        }
        dirs
    }

    /// Full-cycle walk: returns, per visited directory (relative path),
    /// the set of file paths observed — used to drive `delete_missing`.
    async fn walk_and_write(&self, is_full: bool) -> ViewerResult<HashMap<String, Vec<String>>> {
        let all_dirs = self.enumerate_all_dirs().await;
        self.walk_directories(all_dirs, is_full).await
    }

    async fn walk_directories(
        &self,
        dirs: Vec<PathBuf>,
        is_full: bool,
    ) -> ViewerResult<HashMap<String, Vec<String>>> {
        let (job_tx, job_rx) = mpsc::channel::<DirJob>(self.config.workers * 4);
        let (writer_tx, writer_rx) = mpsc::channel::<WriterMsg>(self.config.batch_size * 2);

        let job_rx = Arc::new(Mutex::new(job_rx));
        let mut worker_handles = Vec::with_capacity(self.config.workers);
        for _ in 0..self.config.workers {
            let fs = self.fs.clone();
            let memory = self.memory.clone();
            let job_rx = job_rx.clone();
            let writer_tx = writer_tx.clone();
            let cycle_label = if is_full { "full" } else { "poll" };
            worker_handles.push(tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = job_rx.lock().await;
                        rx.recv().await
                    };
                    let Some(job) = job else { break };
                    memory.wait_if_paused().await;
                    if memory.should_throttle() {
                        metrics::indexer::PAUSED.with_label_values(&[cycle_label]).inc();
                    }
                    process_directory(&*fs, &job, &writer_tx, cycle_label).await;
                }
            }));
        }
        drop(writer_tx);

        let root = self.config.media_root.clone();
        for dir in &dirs {
            let rel = relative_str(&root, dir);
            if job_tx.send(DirJob { path: dir.clone(), rel }).await.is_err() {
                break;
            }
        }
        drop(job_tx);

        let store = self.store.clone();
        let batch_size = self.config.batch_size;
        let events_tx = self.events.clone();
        let writer = tokio::spawn(async move {
            run_writer(store, batch_size, writer_rx, events_tx).await
        });

        for handle in worker_handles {
            let _ = handle.await;
        }
        let observed = writer.await.unwrap_or_default();
        Ok(observed)
    }
}

fn relative_str(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

async fn process_directory<F: FileSystem + ?Sized>(
    fs: &F,
    job: &DirJob,
    writer_tx: &mpsc::Sender<WriterMsg>,
    cycle_label: &'static str,
) {
    let Ok(mut entries) = fs.read_dir(&job.path).await else {
        metrics::indexer::ERRORS.with_label_values(&[cycle_label]).inc();
        let _ = writer_tx
            .send(WriterMsg::DirDone {
                rel: job.rel.clone(),
                seen: Vec::new(),
            })
            .await;
        return;
    };

    let mut seen = Vec::new();
    loop {
        let next = entries.next_entry().await;
        let Ok(Some(path)) = next else {
            if next.is_err() {
                metrics::indexer::ERRORS.with_label_values(&[cycle_label]).inc();
            }
            break;
        };
        let Ok(md) = fs.metadata(&path).await else {
            metrics::indexer::ERRORS.with_label_values(&[cycle_label]).inc();
            continue;
        };
        if md.is_dir {
            continue; // subdirectories are separate DirJobs from enumeration
        }
        let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        let Some((_, ext)) = name.rsplit_once('.') else {
            continue;
        };
        let Some(kind) = MediaKind::from_extension(ext) else {
            continue;
        };
        let rel_path = if job.rel.is_empty() {
            name.clone()
        } else {
            format!("{}/{}", job.rel, name)
        };
        let modified = md
            .modified
            .map(chrono::DateTime::<Utc>::from)
            .unwrap_or_else(Utc::now);
        let file = File {
            path: crate::store::normalize_path(&rel_path),
            size: md.len,
            modified,
            kind,
            content_hash: None,
        };
        seen.push(file.path.clone());
        if writer_tx.send(WriterMsg::Record(FileRecord { file })).await.is_err() {
            return;
        }
    }
    let _ = writer_tx.send(WriterMsg::DirDone { rel: job.rel.clone(), seen }).await;
}

async fn run_writer(
    store: Arc<CatalogueStore>,
    batch_size: usize,
    mut rx: mpsc::Receiver<WriterMsg>,
    events_tx: tokio::sync::broadcast::Sender<IndexEvent>,
) -> HashMap<String, Vec<String>> {
    let mut observed: HashMap<String, Vec<String>> = HashMap::new();
    let mut batch = Vec::with_capacity(batch_size);

    async fn flush(
        batch: &mut Vec<FileRecord>,
        store: &CatalogueStore,
        events_tx: &tokio::sync::broadcast::Sender<IndexEvent>,
    ) {
        if batch.is_empty() {
            return;
        }
        let timer = metrics::indexer::BATCH_DURATION.with_label_values(&["write"]).start_timer();
        let mut event = IndexEvent::default();
        for record in batch.drain(..) {
            match store.upsert_file(&record.file).await {
                Ok(UpsertOutcome::Inserted) => event.added.push(record.file.path),
                Ok(UpsertOutcome::Updated) => event.updated.push(record.file.path),
                Ok(UpsertOutcome::Unchanged) => {}
                Err(err) => tracing::warn!(%err, path = %record.file.path, "indexer upsert failed"),
            }
        }
        timer.observe_duration();
        let _ = events_tx.send(event);
    }

    while let Some(msg) = rx.recv().await {
        match msg {
            WriterMsg::Record(record) => {
                batch.push(record);
                if batch.len() >= batch_size {
                    flush(&mut batch, &store, &events_tx).await;
                }
            }
            WriterMsg::DirDone { rel, seen } => {
                observed.entry(rel).or_default().extend(seen);
            }
        }
    }
    flush(&mut batch, &store, &events_tx).await;
    observed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs_resilience::InMemoryFs;
    use crate::memory::MemoryGovernorConfig;

    async fn new_store() -> CatalogueStore {
        CatalogueStore::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn full_cycle_populates_and_deletes() {
        let mut mem = InMemoryFs::new();
        mem.add_dir("/media");
        mem.add_file("/media/a.jpg", b"x".to_vec());
        let fs = Arc::new(mem);
        let store = Arc::new(new_store().await);
        let memory = MemoryGovernor::new(MemoryGovernorConfig::default());

        let config = IndexerConfig {
            media_root: PathBuf::from("/media"),
            workers: 2,
            startup_warmup: Duration::from_millis(0),
            ..Default::default()
        };
        let indexer = Indexer::new(fs.clone(), store.clone(), memory, config);
        indexer.run_full_cycle().await.unwrap();

        assert!(store.get_file("a.jpg").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn poll_cycle_never_deletes() {
        let mut mem = InMemoryFs::new();
        mem.add_dir("/media");
        mem.add_file("/media/a.jpg", b"x".to_vec());
        let fs = Arc::new(mem.clone());
        let store = Arc::new(new_store().await);
        let memory = MemoryGovernor::new(MemoryGovernorConfig::default());
        let config = IndexerConfig {
            media_root: PathBuf::from("/media"),
            workers: 1,
            startup_warmup: Duration::from_millis(0),
            ..Default::default()
        };
        let indexer = Indexer::new(fs.clone(), store.clone(), memory, config);
        indexer.run_full_cycle().await.unwrap();

        // Remove the file from the underlying fs view the indexer holds;
        // since InMemoryFs is cloned by value, mutate a fresh copy and swap
        // by constructing a new indexer pointed at it, simulating removal
        // observed only by a poll (which must not delete).
        let mut mem2 = mem;
        mem2.remove("/media/a.jpg");
        let fs2 = Arc::new(mem2);
        let memory2 = MemoryGovernor::new(MemoryGovernorConfig::default());
        let config2 = IndexerConfig {
            media_root: PathBuf::from("/media"),
            workers: 1,
            startup_warmup: Duration::from_millis(0),
            poll_directory_budget: 64,
            ..Default::default()
        };
        let indexer2 = Indexer::new(fs2, store.clone(), memory2, config2);
        indexer2.run_poll_cycle().await.unwrap();

        assert!(store.get_file("a.jpg").await.unwrap().is_some());
    }
}
