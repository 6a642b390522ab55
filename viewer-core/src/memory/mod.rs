//! Memory governor.
//!
//! Resolves a heap ceiling from an explicit override or a container memory
//! limit, then polls process memory on an interval and exposes three
//! signals the indexer and thumbnail engine check at their suspension
//! points: [`MemoryGovernor::should_throttle`],
//! [`MemoryGovernor::wait_if_paused`], and [`MemoryGovernor::force_gc`].
//!
//! Built on `sysinfo`: refresh a `System` handle on a timer, compute a
//! ratio, publish it as a gauge, and drive a threshold state machine with a
//! resume signal for waiters.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sysinfo::{Pid, System};
use tokio::sync::{Notify, Mutex};

use crate::metrics;

/// Configuration for heap-limit resolution and threshold polling.
#[derive(Debug, Clone, Copy)]
pub struct MemoryGovernorConfig {
    /// Explicit heap limit in bytes (`GOMEMLIMIT`-equivalent). Takes
    /// priority over `container_limit_bytes` when set.
    pub explicit_limit_bytes: Option<u64>,
    /// A container memory limit in bytes, if known.
    pub container_limit_bytes: Option<u64>,
    /// Fraction of `container_limit_bytes` to use as the heap limit when no
    /// explicit limit is set. Clamped to `(0, 1]`.
    pub ratio: f64,
    /// How often the monitor polls memory usage.
    pub check_interval: Duration,
    /// Usage ratio at or above which the state becomes `Throttle`.
    pub high_watermark: f64,
    /// Usage ratio at or above which the state becomes `Paused`.
    pub critical_watermark: f64,
}

impl Default for MemoryGovernorConfig {
    fn default() -> Self {
        Self {
            explicit_limit_bytes: None,
            container_limit_bytes: None,
            ratio: 0.85,
            check_interval: Duration::from_secs(5),
            high_watermark: 0.70,
            critical_watermark: 0.85,
        }
    }
}

impl MemoryGovernorConfig {
    fn resolved_heap_limit(&self) -> Option<u64> {
        if let Some(limit) = self.explicit_limit_bytes {
            return Some(limit);
        }
        let container_limit = self.container_limit_bytes?;
        let ratio = self.ratio.clamp(f64::EPSILON, 1.0);
        Some((container_limit as f64 * ratio) as u64)
    }
}

/// Governor state, ordered so `Normal < Throttle < Paused`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryState {
    /// Usage below the high watermark.
    Normal,
    /// Usage at or above the high watermark: producers should reduce
    /// parallelism.
    Throttle,
    /// Usage at or above the critical watermark: producers should stop
    /// starting new work until resumed.
    Paused,
}

impl MemoryState {
    fn from_u8(v: u8) -> Self {
        match v {
            2 => Self::Paused,
            1 => Self::Throttle,
            _ => Self::Normal,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Throttle => 1,
            Self::Paused => 2,
        }
    }
}

/// Polls process memory usage against a resolved heap limit and exposes
/// throttle/pause signals to the indexer and thumbnail engine.
pub struct MemoryGovernor {
    config: MemoryGovernorConfig,
    heap_limit: Option<u64>,
    pid: Pid,
    state: AtomicU8,
    resume: Notify,
    shutting_down: AtomicBool,
    system: Mutex<System>,
}

impl MemoryGovernor {
    /// Build a governor from `config`, resolving the heap limit immediately.
    /// Wrapped in `Arc` since the background poll loop and every caller hold
    /// a shared reference.
    #[must_use]
    pub fn new(config: MemoryGovernorConfig) -> Arc<Self> {
        let heap_limit = config.resolved_heap_limit();
        Arc::new(Self {
            config,
            heap_limit,
            pid: Pid::from_u32(std::process::id()),
            state: AtomicU8::new(MemoryState::Normal.as_u8()),
            resume: Notify::new(),
            shutting_down: AtomicBool::new(false),
            system: Mutex::new(System::new()),
        })
    }

    /// The resolved heap limit in bytes, or `None` if unconfigured (and
    /// monitoring therefore never throttles).
    #[must_use]
    pub fn heap_limit_bytes(&self) -> Option<u64> {
        self.heap_limit
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> MemoryState {
        MemoryState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether producers should reduce parallelism right now.
    #[must_use]
    pub fn should_throttle(&self) -> bool {
        matches!(self.state(), MemoryState::Throttle | MemoryState::Paused)
    }

    /// Blocks until the state leaves `Paused` or the governor is shut down.
    /// A suspension point the indexer and thumbnail workers check before
    /// starting each unit of work.
    pub async fn wait_if_paused(&self) {
        loop {
            // Register interest before re-checking the condition: if we
            // checked first, a state transition (and its notify_waiters())
            // landing between the check and the `.notified()` call would be
            // missed, since Notify does not buffer notify_waiters() wakeups
            // for registrations that come after it.
            let notified = self.resume.notified();
            if self.shutting_down.load(Ordering::Acquire) || self.state() != MemoryState::Paused {
                return;
            }
            notified.await;
        }
    }

    /// Request a collection. Rust's allocator has no tracing collector to
    /// trigger; this records intent and is a hook point for an allocator
    /// that does support returning arenas to the OS (e.g. jemalloc's
    /// `je_malloc_trim` equivalent) without the rest of the system needing
    /// to know whether one is wired in.
    pub fn force_gc(&self) {
        metrics::memory::FORCE_GC_TOTAL.inc();
        tracing::debug!("force_gc requested");
    }

    /// Stop the background poll loop and wake any waiters.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.resume.notify_waiters();
    }

    /// Spawn the background poll loop. The returned handle resolves once
    /// [`MemoryGovernor::shutdown`] is called.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if self.shutting_down.load(Ordering::Acquire) {
                    return;
                }
                self.poll_once().await;
            }
        })
    }

    async fn poll_once(&self) {
        let used_bytes = {
            let mut system = self.system.lock().await;
            system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[self.pid]), true);
            system
                .process(self.pid)
                .map(|p| p.memory())
                .unwrap_or(0)
        };

        let Some(limit) = self.heap_limit else {
            metrics::memory::HEAP_RATIO.set(-1.0);
            return;
        };
        if limit == 0 {
            return;
        }

        let ratio = used_bytes as f64 / limit as f64;
        metrics::memory::HEAP_RATIO.set(ratio);

        let previous = self.state();
        let next = if ratio >= self.config.critical_watermark {
            MemoryState::Paused
        } else if ratio >= self.config.high_watermark {
            MemoryState::Throttle
        } else {
            MemoryState::Normal
        };

        if next != previous {
            self.state.store(next.as_u8(), Ordering::Release);
            metrics::memory::STATE.set(i64::from(next.as_u8()));
            tracing::info!(?previous, ?next, ratio, "memory governor state change");
            if previous == MemoryState::Paused && next != MemoryState::Paused {
                self.resume.notify_waiters();
            }
        }
    }
}

impl std::fmt::Debug for MemoryGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryGovernor")
            .field("heap_limit", &self.heap_limit)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_limit_wins_over_container_limit() {
        let config = MemoryGovernorConfig {
            explicit_limit_bytes: Some(100),
            container_limit_bytes: Some(1_000_000),
            ..Default::default()
        };
        assert_eq!(config.resolved_heap_limit(), Some(100));
    }

    #[test]
    fn container_limit_scaled_by_ratio() {
        let config = MemoryGovernorConfig {
            explicit_limit_bytes: None,
            container_limit_bytes: Some(1_000_000_000),
            ratio: 0.5,
            ..Default::default()
        };
        assert_eq!(config.resolved_heap_limit(), Some(500_000_000));
    }

    #[test]
    fn no_limit_when_neither_configured() {
        let config = MemoryGovernorConfig::default();
        assert_eq!(config.resolved_heap_limit(), None);
    }

    #[tokio::test]
    async fn wait_if_paused_returns_immediately_when_not_paused() {
        let governor = MemoryGovernor::new(MemoryGovernorConfig::default());
        tokio::time::timeout(Duration::from_millis(50), governor.wait_if_paused())
            .await
            .expect("should not block when state is Normal");
    }

    #[tokio::test]
    async fn shutdown_wakes_paused_waiters() {
        let governor = MemoryGovernor::new(MemoryGovernorConfig::default());
        governor.state.store(MemoryState::Paused.as_u8(), Ordering::Release);
        let waiter = {
            let governor = governor.clone();
            tokio::spawn(async move { governor.wait_if_paused().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        governor.shutdown();
        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("shutdown should wake waiter")
            .expect("task should not panic");
    }
}
