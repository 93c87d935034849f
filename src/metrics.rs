//! Metrics and observability for filmworks-etl.

use std::sync::atomic::{AtomicU64, Ordering};

use std::time::Instant;

/// Metrics collector for migration runs.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Total runs attempted
    pub runs_total: AtomicU64,
    /// Successful runs
    pub runs_success: AtomicU64,
    /// Failed runs
    pub runs_failed: AtomicU64,
    /// Rows pulled from the source
    pub rows_extracted: AtomicU64,
    /// Rows inserted into the destination
    pub rows_inserted: AtomicU64,
    /// Rows skipped as already present
    pub rows_skipped: AtomicU64,
    /// Total run duration in milliseconds
    pub run_duration_ms: AtomicU64,
    /// Extraction call count
    pub sqlite_batches: AtomicU64,
    /// Destination statement pages issued
    pub pg_pages: AtomicU64,
    /// Retry count
    pub retries: AtomicU64,
}

impl Metrics {
    /// Create new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished run.
    pub fn record_run(&self, success: bool, duration_ms: u64) {
        self.runs_total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.runs_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.runs_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.run_duration_ms
            .fetch_add(duration_ms, Ordering::Relaxed);
    }

    /// Record one extraction call and its yield.
    pub fn record_batch(&self, rows: u64) {
        self.sqlite_batches.fetch_add(1, Ordering::Relaxed);
        self.rows_extracted.fetch_add(rows, Ordering::Relaxed);
    }

    /// Record one bulk upsert outcome.
    pub fn record_upsert(&self, inserted: u64, skipped: u64, pages: u64) {
        self.rows_inserted.fetch_add(inserted, Ordering::Relaxed);
        self.rows_skipped.fetch_add(skipped, Ordering::Relaxed);
        self.pg_pages.fetch_add(pages, Ordering::Relaxed);
    }

    /// Record a retry.
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            runs_total: self.runs_total.load(Ordering::Relaxed),
            runs_success: self.runs_success.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            rows_extracted: self.rows_extracted.load(Ordering::Relaxed),
            rows_inserted: self.rows_inserted.load(Ordering::Relaxed),
            rows_skipped: self.rows_skipped.load(Ordering::Relaxed),
            run_duration_ms: self.run_duration_ms.load(Ordering::Relaxed),
            sqlite_batches: self.sqlite_batches.load(Ordering::Relaxed),
            pg_pages: self.pg_pages.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics.
    pub fn reset(&self) {
        self.runs_total.store(0, Ordering::Relaxed);
        self.runs_success.store(0, Ordering::Relaxed);
        self.runs_failed.store(0, Ordering::Relaxed);
        self.rows_extracted.store(0, Ordering::Relaxed);
        self.rows_inserted.store(0, Ordering::Relaxed);
        self.rows_skipped.store(0, Ordering::Relaxed);
        self.run_duration_ms.store(0, Ordering::Relaxed);
        self.sqlite_batches.store(0, Ordering::Relaxed);
        self.pg_pages.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Total runs attempted
    pub runs_total: u64,
    /// Successful runs
    pub runs_success: u64,
    /// Failed runs
    pub runs_failed: u64,
    /// Rows pulled from the source
    pub rows_extracted: u64,
    /// Rows inserted into the destination
    pub rows_inserted: u64,
    /// Rows skipped as already present
    pub rows_skipped: u64,
    /// Total run duration in milliseconds
    pub run_duration_ms: u64,
    /// Extraction call count
    pub sqlite_batches: u64,
    /// Destination statement pages issued
    pub pg_pages: u64,
    /// Retry count
    pub retries: u64,
}

impl MetricsSnapshot {
    /// Calculate success rate.
    pub fn success_rate(&self) -> f64 {
        if self.runs_total == 0 {
            0.0
        } else {
            self.runs_success as f64 / self.runs_total as f64
        }
    }

    /// Calculate rows written per second.
    pub fn rows_per_second(&self) -> f64 {
        if self.run_duration_ms == 0 {
            0.0
        } else {
            (self.rows_inserted as f64 * 1000.0) / self.run_duration_ms as f64
        }
    }
}

/// Timer for measuring operation duration.
pub struct Timer {
    start: Instant,
    label: String,
}

impl Timer {
    /// Start a new timer.
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            label: label.into(),
        }
    }

    /// Get elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Stop timer and log duration.
    pub fn stop(self) -> u64 {
        let elapsed = self.elapsed_ms();
        tracing::debug!("{} completed in {}ms", self.label, elapsed);
        elapsed
    }
}
