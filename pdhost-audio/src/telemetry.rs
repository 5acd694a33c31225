//! Audio callback telemetry for latency and jitter monitoring.
//!
//! The audio thread is the only writer; any thread may read. All state is
//! atomic, so recording never allocates, locks, or logs.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Ring buffer size for callback duration samples.
const SAMPLE_BUFFER_SIZE: usize = 256;

/// Counters and timings for one instance's audio callback.
pub struct CallbackTelemetry {
    /// Ring buffer of callback durations in microseconds
    durations_us: [AtomicU32; SAMPLE_BUFFER_SIZE],
    /// Next write index in the ring buffer
    idx: AtomicUsize,
    /// Number of samples collected (saturates at SAMPLE_BUFFER_SIZE)
    sample_count: AtomicUsize,
    /// Maximum duration observed in the current window
    max_us: AtomicU32,
    /// Callbacks that exceeded the buffer's real-time budget
    overruns: AtomicU64,
    /// Callbacks that ran the engine
    processed: AtomicU64,
    /// Callbacks that passed the buffer through untouched
    skipped: AtomicU64,
    /// Trailing samples that did not fill a whole chunk
    partial_samples: AtomicU64,
    /// Non-zero returns from the native process call
    native_errors: AtomicU64,
}

/// Point-in-time view of [`CallbackTelemetry`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetrySummary {
    pub avg_us: u32,
    pub max_us: u32,
    pub p95_us: u32,
    pub overruns: u64,
    pub processed: u64,
    pub skipped: u64,
    pub partial_samples: u64,
    pub native_errors: u64,
}

impl Default for CallbackTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackTelemetry {
    pub fn new() -> Self {
        Self {
            durations_us: std::array::from_fn(|_| AtomicU32::new(0)),
            idx: AtomicUsize::new(0),
            sample_count: AtomicUsize::new(0),
            max_us: AtomicU32::new(0),
            overruns: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            partial_samples: AtomicU64::new(0),
            native_errors: AtomicU64::new(0),
        }
    }

    /// Record a processed callback.
    ///
    /// # Arguments
    /// * `duration` - Time taken by the callback
    /// * `budget_us` - Real-time length of the buffer in microseconds
    #[inline]
    pub fn record(&self, duration: Duration, budget_us: u32) {
        let us = duration.as_micros().min(u32::MAX as u128) as u32;

        let idx = self.idx.load(Ordering::Relaxed);
        self.durations_us[idx].store(us, Ordering::Relaxed);
        self.idx.store((idx + 1) % SAMPLE_BUFFER_SIZE, Ordering::Relaxed);

        let count = self.sample_count.load(Ordering::Relaxed);
        if count < SAMPLE_BUFFER_SIZE {
            self.sample_count.store(count + 1, Ordering::Relaxed);
        }

        self.max_us.fetch_max(us, Ordering::Relaxed);
        if us > budget_us {
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_partial(&self, samples: usize) {
        self.partial_samples.fetch_add(samples as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_native_error(&self) {
        self.native_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Summarise collected metrics and reset the max for the next window.
    /// Counters stay cumulative.
    pub fn take_summary(&self) -> TelemetrySummary {
        let count = self.sample_count.load(Ordering::Relaxed);
        let mut summary = TelemetrySummary {
            max_us: self.max_us.swap(0, Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            partial_samples: self.partial_samples.load(Ordering::Relaxed),
            native_errors: self.native_errors.load(Ordering::Relaxed),
            ..TelemetrySummary::default()
        };
        if count == 0 {
            return summary;
        }

        let mut samples: Vec<u32> = self.durations_us[..count]
            .iter()
            .map(|d| d.load(Ordering::Relaxed))
            .collect();
        let sum: u64 = samples.iter().map(|&x| x as u64).sum();
        summary.avg_us = (sum / count as u64) as u32;

        samples.sort_unstable();
        let p95_idx = (count * 95 / 100).max(1) - 1;
        summary.p95_us = samples[p95_idx.min(count - 1)];
        summary
    }
}
