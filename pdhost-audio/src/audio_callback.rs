//! Per-instance audio processing on the host's audio thread.
//!
//! The host hands every callback an interleaved stereo buffer of a fixed
//! number of frames. The engine works in fixed blocks, so each callback runs
//! `ticks = host_frames / block_size` blocks per chunk. The buffer is
//! processed in place: its input samples are replaced by the patch output.
//!
//! Nothing here allocates or logs. Failures are counted in
//! [`CallbackTelemetry`] and read back off the audio thread through
//! [`AudioCallback::take_telemetry`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use pdhost_types::CHANNELS_OUT;

use crate::engine::RawInstance;
use crate::error::ConfigError;
use crate::selection::SelectionLock;
use crate::telemetry::{CallbackTelemetry, TelemetrySummary};

/// Blocks the engine must run per host callback.
///
/// The host buffer must be a whole, non-zero multiple of the engine block.
pub fn ticks_per_callback(host_frames: u32, block_size: u32) -> Result<u32, ConfigError> {
    if block_size == 0 {
        return Err(ConfigError::ZeroBlockSize);
    }
    if host_frames == 0 || host_frames % block_size != 0 {
        return Err(ConfigError::TickRatio { host_frames, block_size });
    }
    Ok(host_frames / block_size)
}

/// State shared between an instance and its audio callbacks.
pub(crate) struct CallbackShared {
    /// Native handle, or 0 when there is none.
    handle: AtomicUsize,
    running: AtomicBool,
    ticks: u32,
    /// Samples handed to one native process call.
    chunk: usize,
    budget_us: u32,
    telemetry: CallbackTelemetry,
}

impl CallbackShared {
    pub(crate) fn new(ticks: u32, block_size: u32, host_frames: u32, sample_rate: u32) -> Self {
        let budget_us = if sample_rate == 0 {
            u32::MAX
        } else {
            (host_frames as u64 * 1_000_000 / sample_rate as u64) as u32
        };
        Self {
            handle: AtomicUsize::new(0),
            running: AtomicBool::new(false),
            ticks,
            chunk: (ticks * block_size * CHANNELS_OUT) as usize,
            budget_us,
            telemetry: CallbackTelemetry::new(),
        }
    }

    /// Publish the native handle and allow processing.
    pub(crate) fn start(&self, handle: RawInstance) {
        self.handle.store(handle.0, Ordering::Release);
        self.running.store(true, Ordering::Release);
    }

    /// Stop processing. Callers hold the selection lock, so no callback is
    /// inside the engine when this returns.
    pub(crate) fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.handle.store(0, Ordering::Release);
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn ticks(&self) -> u32 {
        self.ticks
    }
}

/// Audio thread handle for one instance.
///
/// Created by the instance manager and moved into the host's audio
/// callback. Once the instance is destroyed or has failed, `process` leaves
/// the buffer untouched.
#[derive(Clone)]
pub struct AudioCallback {
    shared: Arc<CallbackShared>,
    lock: Arc<SelectionLock>,
}

impl AudioCallback {
    pub(crate) fn new(shared: Arc<CallbackShared>, lock: Arc<SelectionLock>) -> Self {
        Self { shared, lock }
    }

    /// Run the instance over `buffer` in place.
    ///
    /// Walks the buffer in chunks of `ticks * block_size * 2` samples; a
    /// trailing partial chunk is left as is. Returns false, without touching
    /// the buffer, if the instance is not running.
    pub fn process(&self, buffer: &mut [f32]) -> bool {
        let shared = &*self.shared;
        if !shared.is_running() {
            shared.telemetry.record_skipped();
            return false;
        }

        let started = Instant::now();
        let engine = self.lock.acquire();
        // Re-check under the lock: destroy clears the flag while holding it.
        if !shared.is_running() {
            drop(engine);
            shared.telemetry.record_skipped();
            return false;
        }
        engine.set_instance(RawInstance(shared.handle.load(Ordering::Acquire)));

        let mut chunks = buffer.chunks_exact_mut(shared.chunk);
        for chunk in &mut chunks {
            if engine.process_in_place(shared.ticks, chunk) != 0 {
                shared.telemetry.record_native_error();
            }
        }
        drop(engine);

        let remainder = chunks.into_remainder().len();
        if remainder > 0 {
            shared.telemetry.record_partial(remainder);
        }
        shared.telemetry.record(started.elapsed(), shared.budget_us);
        true
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn ticks(&self) -> u32 {
        self.shared.ticks
    }

    /// Interleaved samples processed per native call.
    pub fn chunk_len(&self) -> usize {
        self.shared.chunk
    }

    pub fn take_telemetry(&self) -> TelemetrySummary {
        self.shared.telemetry.take_summary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{PdBackend, TestBackend, TestOp};

    #[test]
    fn tick_ratio_must_be_whole() {
        assert_eq!(ticks_per_callback(256, 64), Ok(4));
        assert_eq!(ticks_per_callback(64, 64), Ok(1));
        assert_eq!(
            ticks_per_callback(100, 64),
            Err(ConfigError::TickRatio { host_frames: 100, block_size: 64 })
        );
        assert_eq!(
            ticks_per_callback(0, 64),
            Err(ConfigError::TickRatio { host_frames: 0, block_size: 64 })
        );
        assert_eq!(ticks_per_callback(256, 0), Err(ConfigError::ZeroBlockSize));
    }

    fn callback(backend: &Arc<TestBackend>, ticks: u32) -> (AudioCallback, Arc<CallbackShared>) {
        let lock = Arc::new(SelectionLock::new(backend.clone()));
        let shared = Arc::new(CallbackShared::new(ticks, 64, ticks * 64, 48_000));
        (AudioCallback::new(shared.clone(), lock), shared)
    }

    #[test]
    fn stopped_callback_leaves_buffer_alone() {
        let backend = Arc::new(TestBackend::new());
        let (cb, _) = callback(&backend, 2);
        let mut buf = vec![0.5; 256];
        assert!(!cb.process(&mut buf));
        assert!(buf.iter().all(|&s| s == 0.5));
        assert_eq!(backend.count(|op| matches!(op, TestOp::Process { .. })), 0);
        assert_eq!(cb.take_telemetry().skipped, 1);
    }

    #[test]
    fn running_callback_processes_whole_chunks() {
        let backend = Arc::new(TestBackend::new());
        let handle = backend.new_instance().unwrap();
        let (cb, shared) = callback(&backend, 2);
        shared.start(handle);

        // Two full chunks of 2 ticks * 64 frames * 2 channels, plus a tail.
        let mut buf = vec![0.0; 512 + 10];
        assert!(cb.process(&mut buf));
        assert!(buf[..512].iter().all(|&s| s == 1.0));
        assert!(buf[512..].iter().all(|&s| s == 0.0));

        let processes: Vec<_> = backend
            .operations()
            .into_iter()
            .filter(|op| matches!(op, TestOp::Process { .. }))
            .collect();
        assert_eq!(
            processes,
            vec![
                TestOp::Process { instance: Some(handle), ticks: 2, len: 256 },
                TestOp::Process { instance: Some(handle), ticks: 2, len: 256 },
            ]
        );
        let t = cb.take_telemetry();
        assert_eq!(t.processed, 1);
        assert_eq!(t.partial_samples, 10);
    }

    #[test]
    fn stop_halts_processing() {
        let backend = Arc::new(TestBackend::new());
        let handle = backend.new_instance().unwrap();
        let (cb, shared) = callback(&backend, 1);
        shared.start(handle);
        shared.stop();
        let mut buf = vec![0.0; 128];
        assert!(!cb.process(&mut buf));
        assert!(!cb.is_running());
    }
}
