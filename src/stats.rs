//! Running statistics over the reading stream.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::config::StatisticsSeed;

/// Minimum, maximum and count at a point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatsSnapshot {
    /// Smallest reading seen (or the seed when `count == 0`).
    pub minimum: f64,
    /// Largest reading seen (or the seed when `count == 0`).
    pub maximum: f64,
    /// Number of readings observed.
    pub count: u64,
}

/// Running min/max/count accumulator.
///
/// Never resets while the process lives, so statistics span reconnects.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleStatistics {
    minimum: f64,
    maximum: f64,
    count: u64,
}

impl SampleStatistics {
    /// Create an accumulator seeded with +inf / -inf.
    pub fn new() -> Self {
        Self::with_seed(StatisticsSeed::Unbounded)
    }

    /// Create an accumulator with the given seeding policy.
    pub fn with_seed(seed: StatisticsSeed) -> Self {
        let (minimum, maximum) = match seed {
            StatisticsSeed::Unbounded => (f64::INFINITY, f64::NEG_INFINITY),
            StatisticsSeed::Legacy => (9999.0, 0.0),
        };

        Self {
            minimum,
            maximum,
            count: 0,
        }
    }

    /// Fold one reading into the accumulator.
    pub fn observe(&mut self, value: f64) {
        if value > self.maximum {
            self.maximum = value;
        }
        if value < self.minimum {
            self.minimum = value;
        }
        self.count += 1;
    }

    /// Current values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            minimum: self.minimum,
            maximum: self.maximum,
            count: self.count,
        }
    }

    /// Number of readings observed.
    pub fn count(&self) -> u64 {
        self.count
    }
}

impl Default for SampleStatistics {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of statistics owned by a [`NotificationSink`].
///
/// Cheap to clone and safe to hand to other tasks; it can only take
/// snapshots.
///
/// [`NotificationSink`]: crate::sink::NotificationSink
#[derive(Debug, Clone)]
pub struct StatisticsReader {
    inner: Arc<RwLock<SampleStatistics>>,
}

impl StatisticsReader {
    pub(crate) fn new(inner: Arc<RwLock<SampleStatistics>>) -> Self {
        Self { inner }
    }

    /// Current values.
    pub fn snapshot(&self) -> StatsSnapshot {
        self.inner.read().snapshot()
    }
}
