//! Shared per-transfer progress accounting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use crate::humanize::format_speed;

/// Progress accumulator shared by every chunk task of one transfer.
///
/// Each chunk publishes into its own slot as a high-water mark, so the
/// summed total is monotonically non-decreasing even when a chunk retries
/// from its start offset.
#[derive(Debug)]
pub struct TransferProgress {
    total: u64,
    chunks: Vec<AtomicU64>,
    started: Instant,
}

impl TransferProgress {
    pub fn new(total: u64, chunk_count: usize) -> Self {
        Self {
            total,
            chunks: (0..chunk_count).map(|_| AtomicU64::new(0)).collect(),
            started: Instant::now(),
        }
    }

    /// Publish the byte count a chunk has written so far. Regressions
    /// (retry restarts) are ignored.
    pub fn record(&self, chunk: usize, bytes: u64) {
        self.chunks[chunk].fetch_max(bytes, Ordering::Relaxed);
    }

    pub fn bytes_done(&self) -> u64 {
        self.chunks.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.bytes_done() as f64 / self.total as f64 * 100.0).clamp(0.0, 100.0)
    }

    /// Average rate since the transfer started, e.g. "2.5MB/s".
    pub fn speed(&self) -> String {
        format_speed(self.bytes_done(), self.started.elapsed())
    }
}

/// Point-in-time view of a transfer's progress.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub bytes_done: u64,
    pub total: u64,
    pub percent: f64,
    pub speed: String,
}

/// Observation point handed to a handler alongside the transfer.
///
/// The caller creates the sink empty; the engine binds it to the live
/// accumulator once the chunk plan is known. Until then `snapshot`
/// returns `None`. The binding is write-once, so a handler cannot swap
/// the accumulator mid-transfer.
#[derive(Debug, Default)]
pub struct ProgressSink {
    inner: OnceLock<Arc<TransferProgress>>,
}

impl ProgressSink {
    pub fn new() -> Self {
        Self {
            inner: OnceLock::new(),
        }
    }

    pub fn bind(&self, progress: Arc<TransferProgress>) {
        let _ = self.inner.set(progress);
    }

    pub fn snapshot(&self) -> Option<ProgressSnapshot> {
        self.inner.get().map(|progress| ProgressSnapshot {
            bytes_done: progress.bytes_done(),
            total: progress.total(),
            percent: progress.percent(),
            speed: progress.speed(),
        })
    }
}
