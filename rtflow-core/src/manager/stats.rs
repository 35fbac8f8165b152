//! Cycle statistics of the real-time loop.

use std::time::Duration;

/// O(1) per-cycle timing statistics.
///
/// Updated every cycle with no allocation. Provides min/max/avg/stddev
/// of the cycle duration plus overrun and missed-release counters.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleStats {
    /// Target period [ns].
    pub period_ns: i64,
    /// Total cycles executed.
    pub cycle_count: u64,
    /// Last cycle duration [ns].
    pub last_cycle_ns: i64,
    /// Minimum cycle duration [ns].
    pub min_cycle_ns: i64,
    /// Maximum cycle duration [ns].
    pub max_cycle_ns: i64,
    /// Running sum for average computation.
    pub sum_cycle_ns: i64,
    /// Running sum of squares for stddev computation.
    pub sum_sq_cycle_ns: i128,
    /// Cycles that took longer than the period.
    pub overruns: u64,
    /// Release points skipped because the loop fell behind.
    pub missed_releases: u64,
    /// Maximum wake-up latency [ns] (time between release point and cycle
    /// start).
    pub max_latency_ns: i64,
}

impl CycleStats {
    /// Create zeroed stats for a loop with the given period.
    pub fn new(period: Duration) -> Self {
        Self {
            period_ns: duration_ns(period),
            cycle_count: 0,
            last_cycle_ns: 0,
            min_cycle_ns: i64::MAX,
            max_cycle_ns: 0,
            sum_cycle_ns: 0,
            sum_sq_cycle_ns: 0,
            overruns: 0,
            missed_releases: 0,
            max_latency_ns: 0,
        }
    }

    /// Record a cycle. O(1), no allocation.
    #[inline]
    pub fn record(&mut self, duration: Duration, latency: Duration) {
        let cycle_ns = duration_ns(duration);
        let latency_ns = duration_ns(latency);

        self.cycle_count += 1;
        self.last_cycle_ns = cycle_ns;
        self.min_cycle_ns = self.min_cycle_ns.min(cycle_ns);
        self.max_cycle_ns = self.max_cycle_ns.max(cycle_ns);
        self.sum_cycle_ns += cycle_ns;
        self.sum_sq_cycle_ns += i128::from(cycle_ns) * i128::from(cycle_ns);
        self.max_latency_ns = self.max_latency_ns.max(latency_ns);
        if cycle_ns > self.period_ns {
            self.overruns += 1;
        }
    }

    /// Average cycle time [ns] (0 if no cycles).
    #[inline]
    pub fn avg_cycle_ns(&self) -> i64 {
        if self.cycle_count == 0 {
            0
        } else {
            self.sum_cycle_ns / self.cycle_count as i64
        }
    }

    /// Standard deviation of the cycle time [ns] (0 if no cycles).
    pub fn stddev_cycle_ns(&self) -> f64 {
        if self.cycle_count == 0 {
            return 0.0;
        }
        let n = self.cycle_count as f64;
        let mean = self.sum_cycle_ns as f64 / n;
        let variance = self.sum_sq_cycle_ns as f64 / n - mean * mean;
        variance.max(0.0).sqrt()
    }
}

fn duration_ns(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_stats_basic() {
        let mut stats = CycleStats::new(Duration::from_micros(1000));
        stats.record(Duration::from_nanos(100), Duration::from_nanos(10));
        stats.record(Duration::from_nanos(200), Duration::from_nanos(30));
        stats.record(Duration::from_nanos(300), Duration::from_nanos(20));

        assert_eq!(stats.cycle_count, 3);
        assert_eq!(stats.last_cycle_ns, 300);
        assert_eq!(stats.min_cycle_ns, 100);
        assert_eq!(stats.max_cycle_ns, 300);
        assert_eq!(stats.avg_cycle_ns(), 200);
        assert_eq!(stats.max_latency_ns, 30);
        assert_eq!(stats.overruns, 0);

        // Population stddev of {100, 200, 300}.
        assert!((stats.stddev_cycle_ns() - 81.6497).abs() < 1e-3);
    }

    #[test]
    fn overruns_are_counted() {
        let mut stats = CycleStats::new(Duration::from_micros(1));
        stats.record(Duration::from_nanos(999), Duration::ZERO);
        stats.record(Duration::from_nanos(1001), Duration::ZERO);
        assert_eq!(stats.overruns, 1);
    }

    #[test]
    fn empty_stats() {
        let stats = CycleStats::new(Duration::from_millis(2));
        assert_eq!(stats.period_ns, 2_000_000);
        assert_eq!(stats.avg_cycle_ns(), 0);
        assert_eq!(stats.min_cycle_ns, i64::MAX);
        assert_eq!(stats.stddev_cycle_ns(), 0.0);
    }
}
