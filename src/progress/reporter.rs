//! Progress bar for a single transfer
//!
//! The bar is refreshed from a repeating loop timer, so it reads a byte
//! count instead of being incremented by the workers themselves.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const BAR_TEMPLATE: &str =
    "{prefix:.bold.dim} [{bar:40.green/white}] {bytes}/{total_bytes} ({bytes_per_sec}, ETA {eta})";

/// Byte progress of one transfer
pub struct TransferProgress {
    bar: ProgressBar,
    start_time: Instant,
    total_bytes: AtomicU64,
    bytes_done: AtomicU64,
}

impl TransferProgress {
    /// Create a progress bar drawn to stderr
    pub fn new(label: &str) -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::default_bar()
            .template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        bar.set_style(style);
        bar.set_prefix(label.to_string());

        Self {
            bar,
            start_time: Instant::now(),
            total_bytes: AtomicU64::new(0),
            bytes_done: AtomicU64::new(0),
        }
    }

    /// Create a progress tracker that never draws (quiet mode, tests)
    pub fn hidden() -> Self {
        let progress = Self::new("");
        progress.bar.set_draw_target(ProgressDrawTarget::hidden());
        progress
    }

    /// Set the expected number of bytes
    pub fn set_total_bytes(&self, total: u64) {
        self.total_bytes.store(total, Ordering::Relaxed);
        self.bar.set_length(total);
    }

    /// Record the bytes moved so far
    pub fn set_bytes_done(&self, bytes: u64) {
        self.bytes_done.store(bytes, Ordering::Relaxed);
        self.bar.set_position(bytes);
    }

    /// Time since the transfer started
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Current throughput in bytes/second
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.bytes_done.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Finish the bar with a success message
    pub fn finish_success(&self, message: &str) {
        self.bar.finish_with_message(format!("✓ {}", message));
    }

    /// Leave the bar where it stopped, with an error message
    pub fn finish_error(&self, message: &str) {
        self.bar.abandon_with_message(format!("✗ {}", message));
    }

    /// Snapshot of the current state
    pub fn summary(&self) -> ProgressSummary {
        ProgressSummary {
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            bytes_done: self.bytes_done.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            throughput: self.throughput(),
        }
    }
}

/// Progress snapshot
#[derive(Debug, Clone)]
pub struct ProgressSummary {
    /// Expected bytes
    pub total_bytes: u64,
    /// Bytes moved so far
    pub bytes_done: u64,
    /// Elapsed time
    pub elapsed: Duration,
    /// Throughput in bytes/second
    pub throughput: f64,
}

impl ProgressSummary {
    /// Completion percentage
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            (self.bytes_done as f64 / self.total_bytes as f64) * 100.0
        }
    }
}
