//! Windowed throughput estimation.
//!
//! Each block owns a [`SpeedSampler`]; the downloader owns one more for the
//! aggregate, wrapped in [`StatusStat`] together with the current and peak
//! per-second rates. Samplers are incremented by workers and read by the
//! monitor, so everything here is safe for concurrent use.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::time::Instant;

/// Width of the sampling window in seconds. Kept short so a stall shows up
/// in the reported rate within one or two monitor ticks.
const WINDOW_SECS: u64 = 2;

/// Moving per-second byte rate over a short window.
///
/// `add` is called from the owning worker's transfer loop; `per_second` is
/// called once per tick by the monitor. Output is the total bytes observed
/// in the window divided by the window width, so it reflects recent
/// activity only, never a lifetime average.
#[derive(Debug)]
pub struct SpeedSampler {
    started: Instant,
    // (whole seconds since `started`, bytes observed in that second)
    buckets: Mutex<VecDeque<(u64, u64)>>,
}

impl SpeedSampler {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            buckets: Mutex::new(VecDeque::new()),
        }
    }

    fn now_sec(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Record `bytes` as observed now.
    pub fn add(&self, bytes: u64) {
        let sec = self.now_sec();
        let mut buckets = self.buckets.lock().unwrap();
        match buckets.back_mut() {
            Some((s, b)) if *s == sec => *b += bytes,
            _ => buckets.push_back((sec, bytes)),
        }
        while buckets.front().is_some_and(|(s, _)| *s + WINDOW_SECS <= sec) {
            buckets.pop_front();
        }
    }

    /// Current rate in bytes per second.
    pub fn per_second(&self) -> u64 {
        let sec = self.now_sec();
        let mut buckets = self.buckets.lock().unwrap();
        while buckets.front().is_some_and(|(s, _)| *s + WINDOW_SECS <= sec) {
            buckets.pop_front();
        }
        let total: u64 = buckets.iter().map(|(_, b)| *b).sum();
        total / WINDOW_SECS
    }

    /// Drop all recorded activity (used when a slot is repurposed).
    pub fn reset(&self) {
        self.buckets.lock().unwrap().clear();
    }
}

impl Default for SpeedSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate throughput counters shared by all workers and the monitor.
///
/// `speeds` holds the most recent aggregate sample and `max_speeds` the
/// resettable historical peak; both are plain atomics so they are never read
/// or written under the block list's structural lock.
#[derive(Debug, Default)]
pub struct StatusStat {
    sampler: SpeedSampler,
    speeds: AtomicU64,
    max_speeds: AtomicU64,
}

impl StatusStat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record bytes transferred by any worker.
    pub fn add_bytes(&self, bytes: u64) {
        self.sampler.add(bytes);
    }

    /// Read the aggregate sampler, store the result into `speeds`, raise
    /// `max_speeds` if exceeded, and return the sample. Called once per
    /// monitor tick.
    pub fn sample_aggregate(&self) -> u64 {
        let speeds = self.sampler.per_second();
        self.speeds.store(speeds, Ordering::Relaxed);
        if speeds > self.max_speeds.load(Ordering::Relaxed) {
            self.max_speeds.store(speeds, Ordering::Relaxed);
        }
        speeds
    }

    /// Most recent aggregate rate in bytes per second.
    pub fn speeds(&self) -> u64 {
        self.speeds.load(Ordering::Relaxed)
    }

    /// Historical peak rate since the last reset.
    pub fn max_speeds(&self) -> u64 {
        self.max_speeds.load(Ordering::Relaxed)
    }

    /// Reset the peak so stall detection does not re-trigger while
    /// throughput ramps back up.
    pub fn reset_max(&self) {
        self.max_speeds.store(0, Ordering::Relaxed);
    }
}
