use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic event count.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Last written value plus the highest value ever written.
#[derive(Debug, Default)]
pub struct Gauge {
    current: AtomicU64,
    high_water: AtomicU64,
}

impl Gauge {
    pub fn set(&self, value: u64) {
        self.current.store(value, Ordering::Relaxed);
        self.high_water.fetch_max(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    pub fn high_water(&self) -> u64 {
        self.high_water.load(Ordering::Relaxed)
    }
}

/// Count, sum, min and max of recorded durations; safe to record from any thread.
#[derive(Debug)]
pub struct DurationAgg {
    count: AtomicU64,
    total_ns: AtomicU64,
    min_ns: AtomicU64,
    max_ns: AtomicU64,
}

impl Default for DurationAgg {
    fn default() -> Self {
        Self {
            count: AtomicU64::new(0),
            total_ns: AtomicU64::new(0),
            min_ns: AtomicU64::new(u64::MAX),
            max_ns: AtomicU64::new(0),
        }
    }
}

impl DurationAgg {
    pub fn record(&self, dur: Duration) {
        let ns = u64::try_from(dur.as_nanos()).unwrap_or(u64::MAX);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ns.fetch_add(ns, Ordering::Relaxed);
        self.min_ns.fetch_min(ns, Ordering::Relaxed);
        self.max_ns.fetch_max(ns, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DurationAggSnapshot {
        let count = self.count.load(Ordering::Relaxed);
        DurationAggSnapshot {
            count,
            total_ns: self.total_ns.load(Ordering::Relaxed),
            min_ns: if count == 0 {
                0
            } else {
                self.min_ns.load(Ordering::Relaxed)
            },
            max_ns: self.max_ns.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DurationAggSnapshot {
    pub count: u64,
    pub total_ns: u64,
    pub min_ns: u64,
    pub max_ns: u64,
}

impl DurationAggSnapshot {
    pub fn avg(&self) -> Duration {
        match self.total_ns.checked_div(self.count) {
            Some(ns) => Duration::from_nanos(ns),
            None => Duration::ZERO,
        }
    }

    pub fn max(&self) -> Duration {
        Duration::from_nanos(self.max_ns)
    }
}

impl fmt::Display for DurationAggSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n={} avg={:?} min={:?} max={:?}",
            self.count,
            self.avg(),
            Duration::from_nanos(self.min_ns),
            self.max()
        )
    }
}

/// Records the time between construction and drop (or [`ScopedTimer::stop`]) into a
/// [`DurationAgg`].
pub struct ScopedTimer<'a> {
    start: Instant,
    agg: Option<&'a DurationAgg>,
}

impl<'a> ScopedTimer<'a> {
    pub fn new(agg: &'a DurationAgg) -> Self {
        Self {
            start: Instant::now(),
            agg: Some(agg),
        }
    }

    /// Records now and returns the measured duration.
    pub fn stop(mut self) -> Duration {
        let elapsed = self.start.elapsed();
        if let Some(agg) = self.agg.take() {
            agg.record(elapsed);
        }
        elapsed
    }
}

impl Drop for ScopedTimer<'_> {
    fn drop(&mut self) {
        if let Some(agg) = self.agg.take() {
            agg.record(self.start.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_agg_tracks_bounds_and_average() {
        let agg = DurationAgg::default();
        agg.record(Duration::from_nanos(10));
        agg.record(Duration::from_nanos(30));
        let snap = agg.snapshot();
        assert_eq!(snap.count, 2);
        assert_eq!(snap.min_ns, 10);
        assert_eq!(snap.max_ns, 30);
        assert_eq!(snap.avg(), Duration::from_nanos(20));
    }

    #[test]
    fn stopped_timer_records_once() {
        let agg = DurationAgg::default();
        let t = ScopedTimer::new(&agg);
        let _ = t.stop();
        {
            let _t = ScopedTimer::new(&agg);
        }
        assert_eq!(agg.snapshot().count, 2);
    }

    #[test]
    fn empty_snapshot_is_zero() {
        let snap = DurationAgg::default().snapshot();
        assert_eq!(snap, DurationAggSnapshot::default());
        assert_eq!(snap.avg(), Duration::ZERO);
    }

    #[test]
    fn gauge_keeps_high_water() {
        let g = Gauge::default();
        g.set(7);
        g.set(3);
        assert_eq!(g.get(), 3);
        assert_eq!(g.high_water(), 7);
    }
}
