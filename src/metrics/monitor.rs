use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::ReplayStats;

pub const MONITORING_FREQUENCY: Duration = Duration::from_secs(2);

/// One periodic report.  `avg_latency_ms` is -1 when nothing was sent in the
/// interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub successes: u64,
    pub failures: u64,
    pub discards: u64,
    pub total_lines: u64,
    pub total_sent: u64,
    pub throughput: u64,
    pub avg_latency_ms: i64,
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "STATS: success: {}, failed: {}, discarded: {}. Total lines: {}. \
             Total sent: {}. Throughput: {}/sec. Latency: {}ms",
            self.successes,
            self.failures,
            self.discards,
            self.total_lines,
            self.total_sent,
            self.throughput,
            self.avg_latency_ms,
        )
    }
}

/// Sole reader of the interval latency sum.
pub struct Monitor {
    stats: Arc<ReplayStats>,
    last_tick: Instant,
    last_sent: u64,
}

impl Monitor {
    pub fn new(stats: Arc<ReplayStats>) -> Self {
        Self {
            stats,
            last_tick: Instant::now(),
            last_sent: 0,
        }
    }

    /// Close the current interval and compute its report.
    pub fn tick(&mut self) -> StatusLine {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_tick).as_secs_f64();
        self.last_tick = now;

        // Totals first: every send they count already has its latency in
        // the sum.  A send caught between the two reads lands its latency
        // here and its count in the next interval; that skew is tolerated.
        let totals = self.stats.totals();
        let latency_ms = self.stats.drain_latency_ms();
        let sent = totals.sent();
        let delta_sent = sent.saturating_sub(self.last_sent);
        self.last_sent = sent;

        let throughput = if elapsed > 0.0 {
            (delta_sent as f64 / elapsed).round() as u64
        } else {
            0
        };

        let avg_latency_ms = if delta_sent == 0 {
            -1
        } else {
            i64::try_from(latency_ms / delta_sent).unwrap_or(i64::MAX)
        };

        StatusLine {
            successes: totals.successes,
            failures: totals.failures,
            discards: totals.discards,
            total_lines: totals.lines(),
            total_sent: sent,
            throughput,
            avg_latency_ms,
        }
    }

    /// Log a status line every `frequency` until `stop` fires, then log one
    /// last line covering the partial interval and return it.
    pub async fn run(mut self, frequency: Duration, stop: CancellationToken) -> StatusLine {
        let mut ticker = interval_at(Instant::now() + frequency, frequency);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    let last = self.tick();
                    info!("{last}");
                    return last;
                }
                _ = ticker.tick() => {
                    info!("{}", self.tick());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn tick_reports_interval_throughput_and_latency() {
        let stats = Arc::new(ReplayStats::new());
        let mut monitor = Monitor::new(Arc::clone(&stats));

        for _ in 0..4 {
            stats.record_success(Duration::from_millis(10));
        }
        stats.record_failure(Duration::from_millis(50));
        stats.record_discard();
        tokio::time::advance(Duration::from_secs(2)).await;

        let line = monitor.tick();
        assert_eq!(
            line,
            StatusLine {
                successes: 4,
                failures: 1,
                discards: 1,
                total_lines: 6,
                total_sent: 5,
                // 5 sends over 2s, rounded
                throughput: 3,
                avg_latency_ms: 18,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn each_interval_only_sees_its_own_latency() {
        let stats = Arc::new(ReplayStats::new());
        let mut monitor = Monitor::new(Arc::clone(&stats));

        stats.record_success(Duration::from_millis(100));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(monitor.tick().avg_latency_ms, 100);

        stats.record_success(Duration::from_millis(4));
        stats.record_success(Duration::from_millis(6));
        tokio::time::advance(Duration::from_secs(1)).await;
        let line = monitor.tick();
        assert_eq!(line.avg_latency_ms, 5);
        assert_eq!(line.throughput, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_interval_reports_the_sentinel() {
        let stats = Arc::new(ReplayStats::new());
        let mut monitor = Monitor::new(Arc::clone(&stats));
        stats.record_discard();
        tokio::time::advance(Duration::from_secs(2)).await;

        let line = monitor.tick();
        assert_eq!(line.avg_latency_ms, -1);
        assert_eq!(line.throughput, 0);
        assert_eq!(line.total_lines, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_emits_a_final_line() {
        let stats = Arc::new(ReplayStats::new());
        let stop = CancellationToken::new();
        let handle = tokio::spawn(
            Monitor::new(Arc::clone(&stats)).run(MONITORING_FREQUENCY, stop.clone()),
        );

        tokio::time::sleep(Duration::from_secs(5)).await;
        stats.record_success(Duration::from_millis(12));
        stop.cancel();

        let last = handle.await.unwrap();
        assert_eq!(last.successes, 1);
        assert_eq!(last.avg_latency_ms, 12);
    }

    #[test]
    fn status_line_is_human_readable() {
        let line = StatusLine {
            successes: 10,
            failures: 2,
            discards: 3,
            total_lines: 15,
            total_sent: 12,
            throughput: 6,
            avg_latency_ms: 42,
        };
        assert_eq!(
            line.to_string(),
            "STATS: success: 10, failed: 2, discarded: 3. Total lines: 15. \
             Total sent: 12. Throughput: 6/sec. Latency: 42ms"
        );
    }
}
