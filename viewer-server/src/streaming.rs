//! Streaming writer: wraps a chunked HTTP response body with per-write
//! timeouts, an idle-disconnect ticker, and byte/elapsed accounting.
//!
//! Axum's `Body::from_stream` is pull-based (the hyper connection asks for
//! the next frame), so the "writer" here is the producer side of an
//! `mpsc` channel consumed by a `ReceiverStream` wrapped into the body —
//! pushing chunks onto the channel is this module's stand-in for "write",
//! and a closed receiver (client gone, connection dropped) surfaces as a
//! `SendError`, exactly the signal the design calls `ClientGone`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;

/// Tuning knobs for a streaming session, one per active request.
#[derive(Debug, Clone, Copy)]
pub struct StreamingConfig {
    /// Per-chunk write timeout.
    pub write_timeout: Duration,
    /// Maximum idle time between successful writes before the writer gives up.
    pub idle_timeout: Duration,
    /// Overall session budget; `ZERO` means unbounded.
    pub max_duration: Duration,
    /// Split writes larger than this; `0` disables chunking.
    pub chunk_size: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
            max_duration: Duration::ZERO,
            chunk_size: 64 * 1024,
        }
    }
}

/// Why a streaming session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// All bytes were written successfully.
    Completed,
    /// The client disconnected (the receiving half was dropped, or the idle
    /// ticker observed no forward progress for longer than `idle_timeout`).
    ClientGone,
    /// A single chunk failed to send within `write_timeout`.
    WriteTimeout,
    /// The caller (`Close`) cancelled the session locally before completion.
    StreamCanceled,
}

/// Byte/elapsed accounting, safe to read concurrently with in-flight writes.
#[derive(Debug, Clone)]
pub struct StreamStats {
    bytes_written: Arc<AtomicU64>,
    started_at: Instant,
}

impl StreamStats {
    fn new() -> Self {
        Self { bytes_written: Arc::new(AtomicU64::new(0)), started_at: Instant::now() }
    }

    /// Bytes successfully handed to the underlying transport so far.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Wall-clock time since the session started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// A single streaming session: owns the sending half of the channel backing
/// the response body and enforces the write/idle/duration contract.
pub struct StreamingWriter {
    tx: mpsc::Sender<Result<Bytes, std::io::Error>>,
    config: StreamingConfig,
    stats: StreamStats,
    last_write: Arc<std::sync::Mutex<Instant>>,
    closed: Arc<std::sync::atomic::AtomicBool>,
}

impl StreamingWriter {
    /// Build a writer and the [`Body`] it feeds. The idle-disconnect ticker
    /// runs at `idle_timeout / 4`, matching the design's "check at IdleTimeout/4" cadence.
    #[must_use]
    pub fn new(config: StreamingConfig) -> (Self, Body) {
        let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(4);
        let stats = StreamStats::new();
        let last_write = Arc::new(std::sync::Mutex::new(Instant::now()));
        let closed = Arc::new(std::sync::atomic::AtomicBool::new(false));

        if !config.idle_timeout.is_zero() {
            let tick = (config.idle_timeout / 4).max(Duration::from_millis(50));
            let idle_timeout = config.idle_timeout;
            let last_write_watch = last_write.clone();
            let closed_watch = closed.clone();
            let tx_watch = tx.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(tick);
                loop {
                    interval.tick().await;
                    if closed_watch.load(Ordering::Relaxed) {
                        break;
                    }
                    let elapsed_since_write = {
                        let guard = last_write_watch.lock().unwrap();
                        guard.elapsed()
                    };
                    if elapsed_since_write > idle_timeout {
                        let _ = tx_watch
                            .send(Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "idle timeout")))
                            .await;
                        break;
                    }
                }
            });
        }

        let body = Body::from_stream(ReceiverStream::new(rx));
        (Self { tx, config, stats: stats.clone(), last_write, closed }, body)
    }

    /// Write `data`, splitting it into `chunk_size` pieces (or sending whole
    /// when chunking is disabled) and flushing (yielding) between chunks.
    /// Each chunk send is individually bounded by `write_timeout`.
    pub async fn write(&self, data: &[u8]) -> Result<(), StreamOutcome> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(StreamOutcome::StreamCanceled);
        }
        let chunk_size = if self.config.chunk_size == 0 { data.len().max(1) } else { self.config.chunk_size };

        for chunk in data.chunks(chunk_size) {
            let bytes = Bytes::copy_from_slice(chunk);
            let send = self.tx.send(Ok(bytes));
            match timeout(self.config.write_timeout, send).await {
                Ok(Ok(())) => {
                    self.stats.bytes_written.fetch_add(chunk.len() as u64, Ordering::Relaxed);
                    *self.last_write.lock().unwrap() = Instant::now();
                    tokio::task::yield_now().await;
                }
                Ok(Err(_)) => return Err(StreamOutcome::ClientGone),
                Err(_) => return Err(StreamOutcome::WriteTimeout),
            }

            if !self.config.max_duration.is_zero() && self.stats.elapsed() > self.config.max_duration {
                return Err(StreamOutcome::ClientGone);
            }
        }
        Ok(())
    }

    /// Current byte/elapsed snapshot.
    #[must_use]
    pub fn stats(&self) -> StreamStats {
        self.stats.clone()
    }

    /// Idempotent: marks the session closed and stops the idle ticker on its
    /// next tick. Safe to call more than once.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_accumulates_stats_and_chunks() {
        let config = StreamingConfig { chunk_size: 4, ..Default::default() };
        let (writer, body) = StreamingWriter::new(config);
        let data = b"abcdefghij";
        writer.write(data).await.unwrap();
        assert_eq!(writer.stats().bytes_written(), 10);
        drop(body);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_rejects_further_writes() {
        let (writer, body) = StreamingWriter::new(StreamingConfig::default());
        writer.close();
        writer.close();
        let err = writer.write(b"x").await.unwrap_err();
        assert_eq!(err, StreamOutcome::StreamCanceled);
        drop(body);
    }

    #[tokio::test]
    async fn client_disconnect_surfaces_as_client_gone() {
        let (writer, body) = StreamingWriter::new(StreamingConfig::default());
        drop(body);
        tokio::task::yield_now().await;
        let err = writer.write(b"hello").await.unwrap_err();
        assert_eq!(err, StreamOutcome::ClientGone);
    }
}
