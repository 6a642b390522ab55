//! Prometheus metrics for the core subsystems. One process-wide registry,
//! grouped submodules per component, a `gather_metrics` helper the
//! server's `/metrics` handler calls directly.
//!
//! One [`std::sync::LazyLock<Registry>`], `register_*_with_registry!`
//! macros per metric, counters/gauges grouped by the component that owns
//! them.

use prometheus::{
    register_counter_vec_with_registry, register_histogram_vec_with_registry,
    register_int_counter_vec_with_registry, register_int_gauge_with_registry, CounterVec,
    Encoder, HistogramVec, IntCounterVec, IntGauge, Registry, TextEncoder,
};

/// The process-wide metrics registry.
pub static REGISTRY: std::sync::LazyLock<Registry> = std::sync::LazyLock::new(Registry::new);

/// FS resilience metrics.
pub mod fs_retry {
    use super::{
        register_counter_vec_with_registry, register_histogram_vec_with_registry, CounterVec,
        HistogramVec, REGISTRY,
    };

    /// Retry attempts made, labeled by operation (`stat`/`open`/`readdir`/`write`).
    pub static RETRY_ATTEMPTS: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
        register_counter_vec_with_registry!(
            "fs_retry_attempts_total",
            "Total ESTALE retry attempts",
            &["operation"],
            REGISTRY.clone()
        )
        .expect("register fs_retry_attempts_total")
    });

    /// Operations that ultimately succeeded after at least one retry.
    pub static RETRY_SUCCESS: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
        register_counter_vec_with_registry!(
            "fs_retry_success_total",
            "Operations that succeeded after a retry",
            &["operation"],
            REGISTRY.clone()
        )
        .expect("register fs_retry_success_total")
    });

    /// Operations that exhausted their retry budget.
    pub static RETRY_FAILURE: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
        register_counter_vec_with_registry!(
            "fs_retry_failure_total",
            "Operations that exhausted their ESTALE retry budget",
            &["operation"],
            REGISTRY.clone()
        )
        .expect("register fs_retry_failure_total")
    });

    /// Total ESTALE errors observed, including the first attempt.
    pub static STALE_ERRORS: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
        register_counter_vec_with_registry!(
            "fs_stale_errors_total",
            "Total ESTALE errors observed",
            &["operation"],
            REGISTRY.clone()
        )
        .expect("register fs_stale_errors_total")
    });

    /// Operation duration, labeled by operation and resolved volume.
    pub static OPERATION_DURATION: std::sync::LazyLock<HistogramVec> =
        std::sync::LazyLock::new(|| {
            register_histogram_vec_with_registry!(
                "fs_operation_duration_seconds",
                "Filesystem operation duration in seconds",
                &["operation", "volume"],
                REGISTRY.clone()
            )
            .expect("register fs_operation_duration_seconds")
        });
}

/// Indexer metrics.
pub mod indexer {
    use super::{
        register_counter_vec_with_registry, register_histogram_vec_with_registry, CounterVec,
        HistogramVec, REGISTRY,
    };
    use prometheus::{register_gauge_with_registry, Gauge};

    /// Files processed per second over the most recent cycle.
    pub static FILES_PER_SECOND: std::sync::LazyLock<Gauge> = std::sync::LazyLock::new(|| {
        register_gauge_with_registry!(
            "indexer_files_per_second",
            "Files processed per second in the most recent cycle",
            REGISTRY.clone()
        )
        .expect("register indexer_files_per_second")
    });

    /// Batch commit duration.
    pub static BATCH_DURATION: std::sync::LazyLock<HistogramVec> = std::sync::LazyLock::new(|| {
        register_histogram_vec_with_registry!(
            "indexer_batch_duration_seconds",
            "Indexer batch commit duration in seconds",
            &["cycle"],
            REGISTRY.clone()
        )
        .expect("register indexer_batch_duration_seconds")
    });

    /// Full cycle duration, labeled by cycle kind (`full`/`poll`).
    pub static RUN_DURATION: std::sync::LazyLock<HistogramVec> = std::sync::LazyLock::new(|| {
        register_histogram_vec_with_registry!(
            "indexer_run_duration_seconds",
            "Indexer cycle duration in seconds",
            &["cycle"],
            REGISTRY.clone()
        )
        .expect("register indexer_run_duration_seconds")
    });

    /// Per-file errors recorded during a cycle (the file is skipped, not
    /// deleted or upserted).
    pub static ERRORS: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
        register_counter_vec_with_registry!(
            "indexer_errors_total",
            "Per-file errors recorded during indexing",
            &["cycle"],
            REGISTRY.clone()
        )
        .expect("register indexer_errors_total")
    });

    /// Number of times a worker observed a memory-governor pause.
    pub static PAUSED: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
        register_counter_vec_with_registry!(
            "indexer_paused_total",
            "Times an indexer worker paused for memory pressure",
            &["cycle"],
            REGISTRY.clone()
        )
        .expect("register indexer_paused_total")
    });
}

/// Thumbnail engine metrics.
pub mod thumbnails {
    use super::{
        register_counter_vec_with_registry, register_histogram_vec_with_registry,
        register_int_gauge_with_registry, CounterVec, HistogramVec, IntGauge, REGISTRY,
    };

    /// Cache hits.
    pub static CACHE_HITS: std::sync::LazyLock<prometheus::Counter> =
        std::sync::LazyLock::new(|| {
            prometheus::register_counter_with_registry!(
                "thumbnail_cache_hits_total",
                "Thumbnail cache hits",
                REGISTRY.clone()
            )
            .expect("register thumbnail_cache_hits_total")
        });

    /// Cache misses (a build was required).
    pub static CACHE_MISSES: std::sync::LazyLock<prometheus::Counter> =
        std::sync::LazyLock::new(|| {
            prometheus::register_counter_with_registry!(
                "thumbnail_cache_misses_total",
                "Thumbnail cache misses",
                REGISTRY.clone()
            )
            .expect("register thumbnail_cache_misses_total")
        });

    /// Build phase timing, labeled by phase (`decode`/`resize`/`encode`).
    pub static PHASE_DURATION: std::sync::LazyLock<HistogramVec> = std::sync::LazyLock::new(|| {
        register_histogram_vec_with_registry!(
            "thumbnail_phase_duration_seconds",
            "Thumbnail build phase duration in seconds",
            &["phase"],
            REGISTRY.clone()
        )
        .expect("register thumbnail_phase_duration_seconds")
    });

    /// Current build queue depth.
    pub static QUEUE_DEPTH: std::sync::LazyLock<IntGauge> = std::sync::LazyLock::new(|| {
        register_int_gauge_with_registry!(
            "thumbnail_queue_depth",
            "Pending thumbnail build requests",
            REGISTRY.clone()
        )
        .expect("register thumbnail_queue_depth")
    });

    /// Heap usage ratio observed at the start of a build.
    pub static HEAP_RATIO_AT_BUILD: std::sync::LazyLock<prometheus::Gauge> =
        std::sync::LazyLock::new(|| {
            prometheus::register_gauge_with_registry!(
                "thumbnail_heap_ratio_at_build",
                "Heap usage ratio observed at the start of a thumbnail build",
                REGISTRY.clone()
            )
            .expect("register thumbnail_heap_ratio_at_build")
        });

    /// Build failures, labeled by reason.
    pub static FAILURES: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
        register_counter_vec_with_registry!(
            "thumbnail_failures_total",
            "Thumbnail build failures",
            &["reason"],
            REGISTRY.clone()
        )
        .expect("register thumbnail_failures_total")
    });
}

/// Memory governor metrics.
pub mod memory {
    use super::{register_int_gauge_with_registry, IntGauge, REGISTRY};

    /// Current heap usage ratio (used / heap limit), in the range `[0, 1]`.
    /// `-1` when no heap limit is configured.
    pub static HEAP_RATIO: std::sync::LazyLock<prometheus::Gauge> = std::sync::LazyLock::new(|| {
        prometheus::register_gauge_with_registry!(
            "memory_heap_ratio",
            "Current heap usage ratio, or -1 when unconfigured",
            REGISTRY.clone()
        )
        .expect("register memory_heap_ratio")
    });

    /// Current governor state: `0` normal, `1` throttle, `2` paused.
    pub static STATE: std::sync::LazyLock<IntGauge> = std::sync::LazyLock::new(|| {
        register_int_gauge_with_registry!(
            "memory_governor_state",
            "Memory governor state (0=normal, 1=throttle, 2=paused)",
            REGISTRY.clone()
        )
        .expect("register memory_governor_state")
    });

    /// Times `ForceGC` was invoked.
    pub static FORCE_GC_TOTAL: std::sync::LazyLock<prometheus::Counter> =
        std::sync::LazyLock::new(|| {
            prometheus::register_counter_with_registry!(
                "memory_force_gc_total",
                "Times ForceGC was invoked",
                REGISTRY.clone()
            )
            .expect("register memory_force_gc_total")
        });
}

/// Catalogue store metrics.
pub mod store {
    use super::{register_histogram_vec_with_registry, HistogramVec, REGISTRY};

    /// Write transaction duration, labeled by operation.
    pub static TRANSACTION_DURATION: std::sync::LazyLock<HistogramVec> =
        std::sync::LazyLock::new(|| {
            register_histogram_vec_with_registry!(
                "store_transaction_duration_seconds",
                "Store write transaction duration in seconds",
                &["operation"],
                REGISTRY.clone()
            )
            .expect("register store_transaction_duration_seconds")
        });
}

/// HTTP-facing metrics, registered here so the server binary does not need
/// its own registry.
pub mod http {
    use super::{
        register_histogram_vec_with_registry, register_int_counter_vec_with_registry, HistogramVec,
        IntCounterVec, REGISTRY,
    };

    /// Total HTTP requests, labeled by method, normalized path, and status.
    pub static REQUESTS_TOTAL: std::sync::LazyLock<IntCounterVec> = std::sync::LazyLock::new(|| {
        register_int_counter_vec_with_registry!(
            "http_requests_total",
            "Total HTTP requests",
            &["method", "path", "status"],
            REGISTRY.clone()
        )
        .expect("register http_requests_total")
    });

    /// Request duration, labeled by method and normalized path.
    pub static REQUEST_DURATION: std::sync::LazyLock<HistogramVec> = std::sync::LazyLock::new(|| {
        register_histogram_vec_with_registry!(
            "http_request_duration_seconds",
            "HTTP request duration in seconds",
            &["method", "path"],
            REGISTRY.clone()
        )
        .expect("register http_request_duration_seconds")
    });
}

/// Render the registry in Prometheus text exposition format.
#[must_use]
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&families, &mut buffer) {
        tracing::error!("failed to encode metrics: {err}");
        return String::from("# failed to encode metrics\n");
    }
    String::from_utf8(buffer).unwrap_or_else(|err| {
        tracing::error!("metrics buffer was not valid utf-8: {err}");
        String::from("# invalid utf-8 in metrics\n")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_includes_registered_families() {
        fs_retry::RETRY_ATTEMPTS.with_label_values(&["stat"]).inc();
        let text = gather_metrics();
        assert!(text.contains("fs_retry_attempts_total"));
    }
}
