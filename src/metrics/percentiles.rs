use std::fmt;

use hdrhistogram::Histogram;
use serde::Serialize;

/// Round-trip latency distribution of the replayed requests, in whole
/// milliseconds (body drain included).  Failed sends that reached the wire
/// are in here too; unbuildable requests are not.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PercentileSet {
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub p999: u64,
    /// Sends recorded; zero means every other field is a placeholder.
    pub count: u64,
}

impl PercentileSet {
    /// Reads the distribution out of the collector's millisecond histogram.
    pub fn from_histogram(hist: &Histogram<u64>) -> Self {
        if hist.is_empty() {
            return Self::default();
        }

        Self {
            min: hist.min(),
            max: hist.max(),
            mean: hist.mean(),
            p50: hist.value_at_quantile(0.50),
            p95: hist.value_at_quantile(0.95),
            p99: hist.value_at_quantile(0.99),
            p999: hist.value_at_quantile(0.999),
            count: hist.len(),
        }
    }

    pub fn has_data(&self) -> bool {
        self.count > 0
    }
}

impl fmt::Display for PercentileSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "p50 {}ms, p95 {}ms, p99 {}ms, p99.9 {}ms, max {}ms over {} sends",
            self.p50, self.p95, self.p99, self.p999, self.max, self.count,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn latency_histogram() -> Histogram<u64> {
        Histogram::<u64>::new_with_bounds(1, 60_000, 3).unwrap()
    }

    #[test]
    fn no_sends_gives_a_placeholder() {
        let set = PercentileSet::from_histogram(&latency_histogram());
        assert_eq!(set, PercentileSet::default());
        assert!(!set.has_data());
    }

    #[test]
    fn a_slow_tail_shows_up_only_in_the_high_percentiles() {
        let mut hist = latency_histogram();
        for _ in 0..990 {
            hist.record(20).unwrap();
        }
        for _ in 0..10 {
            hist.record(5_000).unwrap();
        }

        let set = PercentileSet::from_histogram(&hist);
        assert_eq!(set.count, 1_000);
        assert_eq!(set.min, 20);
        assert_eq!(set.p50, 20);
        assert_eq!(set.p95, 20);
        assert!(set.p999 >= 4_990, "p99.9 was {}", set.p999);
        assert!(set.max >= 4_990, "max was {}", set.max);
    }

    #[test]
    fn display_is_a_one_line_summary() {
        let set = PercentileSet {
            min: 3,
            max: 250,
            mean: 21.5,
            p50: 18,
            p95: 60,
            p99: 120,
            p999: 240,
            count: 42,
        };
        assert_eq!(
            set.to_string(),
            "p50 18ms, p95 60ms, p99 120ms, p99.9 240ms, max 250ms over 42 sends"
        );
    }
}
