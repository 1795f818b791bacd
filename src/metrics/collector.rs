use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;

use super::percentiles::PercentileSet;

// ─── Configuration ───────────────────────────────────────────────

/// HdrHistogram range: 1 ms → 1 h, 3 significant figures
const HIST_LOW: u64 = 1;
const HIST_HIGH: u64 = 3_600_000;
const HIST_SIGFIG: u8 = 3;

// ─── Public types ────────────────────────────────────────────────

/// Outcome counters shared by every worker and read by the monitor.
///
/// Each line ends up in exactly one of successes, failures or discards.
/// The latency sum only ever shrinks through [`ReplayStats::drain_latency_ms`],
/// which the monitor calls once per interval.
///
/// A send adds its latency before bumping its counter (release), and
/// `totals` loads with acquire, so a drain that follows `totals` always
/// holds the latency of every send those totals counted.
pub struct ReplayStats {
    successes: AtomicU64,
    failures: AtomicU64,
    discards: AtomicU64,
    latency_sum_ms: AtomicU64,

    latency_hist: Mutex<Histogram<u64>>,

    running: AtomicBool,
    started: Instant,
}

/// Point-in-time view of the three outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub successes: u64,
    pub failures: u64,
    pub discards: u64,
}

/// Everything the status endpoint serves.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub running: bool,
    pub elapsed_secs: f64,
    pub successes: u64,
    pub failures: u64,
    pub discards: u64,
    pub total_lines: u64,
    pub total_sent: u64,
    pub requests_per_sec: f64,
    pub latency_ms: PercentileSet,
}

// ─── ReplayStats impl ────────────────────────────────────────────

impl ReplayStats {
    pub fn new() -> Self {
        Self {
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            discards: AtomicU64::new(0),
            latency_sum_ms: AtomicU64::new(0),
            latency_hist: Mutex::new(
                Histogram::<u64>::new_with_bounds(HIST_LOW, HIST_HIGH, HIST_SIGFIG)
                    .expect("histogram creation"),
            ),
            running: AtomicBool::new(false),
            started: Instant::now(),
        }
    }

    pub fn record_success(&self, latency: Duration) {
        self.record_latency(latency);
        self.successes.fetch_add(1, Ordering::Release);
    }

    pub fn record_failure(&self, latency: Duration) {
        self.record_latency(latency);
        self.failures.fetch_add(1, Ordering::Release);
    }

    /// A failure that never reached the wire (the request could not be built).
    pub fn record_unsendable(&self) {
        self.failures.fetch_add(1, Ordering::Release);
    }

    pub fn record_discard(&self) {
        self.discards.fetch_add(1, Ordering::Relaxed);
    }

    fn record_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_sum_ms.fetch_add(ms, Ordering::Relaxed);
        self.latency_hist.lock().saturating_record(ms.max(HIST_LOW));
    }

    pub fn totals(&self) -> Totals {
        Totals {
            successes: self.successes.load(Ordering::Acquire),
            failures: self.failures.load(Ordering::Acquire),
            discards: self.discards.load(Ordering::Relaxed),
        }
    }

    /// Latency accumulated since the previous call, resetting it to zero.
    pub fn drain_latency_ms(&self) -> u64 {
        self.latency_sum_ms.swap(0, Ordering::AcqRel)
    }

    pub fn latency_percentiles(&self) -> PercentileSet {
        PercentileSet::from_histogram(&self.latency_hist.lock())
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Read-only snapshot; never touches the interval latency sum.
    pub fn snapshot(&self) -> StatsSnapshot {
        let totals = self.totals();
        let elapsed_secs = self.started.elapsed().as_secs_f64();
        let requests_per_sec = if elapsed_secs > 0.0 {
            totals.sent() as f64 / elapsed_secs
        } else {
            0.0
        };

        StatsSnapshot {
            running: self.is_running(),
            elapsed_secs,
            successes: totals.successes,
            failures: totals.failures,
            discards: totals.discards,
            total_lines: totals.lines(),
            total_sent: totals.sent(),
            requests_per_sec,
            latency_ms: self.latency_percentiles(),
        }
    }
}

impl Default for ReplayStats {
    fn default() -> Self {
        Self::new()
    }
}

impl Totals {
    pub fn sent(&self) -> u64 {
        self.successes + self.failures
    }

    pub fn lines(&self) -> u64 {
        self.sent() + self.discards
    }
}
