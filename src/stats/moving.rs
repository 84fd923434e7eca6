//! Time-windowed statistics over a decaying series of observations.
//!
//! Writers and readers run on different tasks; the series sits behind a
//! lock and every clone shares it.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, PoisonError, RwLock};

use time::{Duration, OffsetDateTime};

use crate::error::StatsError;

type Series = BTreeMap<OffsetDateTime, f64>;

/// Observations keyed by timestamp, bounded by a retention period.
///
/// Every windowed query takes a `since` cutoff and covers observations
/// strictly after it. A cutoff further back than the retention fails with
/// [`StatsError::OutOfRange`]; an empty window within retention yields zero.
#[derive(Debug, Clone)]
pub struct MovingStats {
    values: Arc<RwLock<Series>>,
    retention: Duration,
}

impl MovingStats {
    /// Create an empty series.
    pub fn new(retention: std::time::Duration) -> Self {
        Self {
            values: Arc::new(RwLock::new(BTreeMap::new())),
            retention: Duration::try_from(retention).unwrap_or(Duration::MAX),
        }
    }

    /// Retention period.
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Record `value` at `timestamp` and evict anything older than
    /// `timestamp - retention`.
    ///
    /// A second value at the same timestamp replaces the first.
    pub fn add(&self, timestamp: OffsetDateTime, value: f64) {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values.insert(timestamp, value);

        if let Some(cutoff) = timestamp.checked_sub(self.retention) {
            let kept = values.split_off(&cutoff);
            *values = kept;
        }
    }

    /// Most recent observation, or zero if there is none.
    pub fn latest(&self) -> f64 {
        self.read()
            .last_key_value()
            .map(|(_, v)| *v)
            .unwrap_or_default()
    }

    /// Number of retained observations.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no observations are retained.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Mean of the window.
    pub fn mean(&self, since: OffsetDateTime) -> Result<f64, StatsError> {
        self.window(since, |values| {
            let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
            if count == 0 {
                0.0
            } else {
                sum / count as f64
            }
        })
    }

    /// Sum of the window.
    pub fn sum(&self, since: OffsetDateTime) -> Result<f64, StatsError> {
        self.window(since, |values| values.sum())
    }

    /// Largest value in the window.
    pub fn max(&self, since: OffsetDateTime) -> Result<f64, StatsError> {
        self.window(since, |values| values.reduce(f64::max).unwrap_or_default())
    }

    /// Smallest value in the window.
    pub fn min(&self, since: OffsetDateTime) -> Result<f64, StatsError> {
        self.window(since, |values| values.reduce(f64::min).unwrap_or_default())
    }

    /// `max - min` over the window.
    pub fn variation(&self, since: OffsetDateTime) -> Result<f64, StatsError> {
        self.window(since, |values| {
            values
                .fold(None, |acc: Option<(f64, f64)>, v| match acc {
                    None => Some((v, v)),
                    Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
                })
                .map(|(lo, hi)| hi - lo)
                .unwrap_or_default()
        })
    }

    /// Last value in the window minus the first one.
    ///
    /// An endpoint delta, not a fitted slope.
    pub fn gradient(&self, since: OffsetDateTime) -> Result<f64, StatsError> {
        self.window(since, |mut values| {
            let first = values.next();
            let last = values.last().or(first);
            match (first, last) {
                (Some(first), Some(last)) => last - first,
                _ => 0.0,
            }
        })
    }

    /// [`mean`](Self::mean) over the trailing `window`.
    pub fn mean_over(&self, window: std::time::Duration) -> Result<f64, StatsError> {
        self.mean(ago(window))
    }

    /// [`sum`](Self::sum) over the trailing `window`.
    pub fn sum_over(&self, window: std::time::Duration) -> Result<f64, StatsError> {
        self.sum(ago(window))
    }

    /// [`max`](Self::max) over the trailing `window`.
    pub fn max_over(&self, window: std::time::Duration) -> Result<f64, StatsError> {
        self.max(ago(window))
    }

    /// [`min`](Self::min) over the trailing `window`.
    pub fn min_over(&self, window: std::time::Duration) -> Result<f64, StatsError> {
        self.min(ago(window))
    }

    /// [`variation`](Self::variation) over the trailing `window`.
    pub fn variation_over(&self, window: std::time::Duration) -> Result<f64, StatsError> {
        self.variation(ago(window))
    }

    /// [`gradient`](Self::gradient) over the trailing `window`.
    pub fn gradient_over(&self, window: std::time::Duration) -> Result<f64, StatsError> {
        self.gradient(ago(window))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Series> {
        self.values.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check `since` against retention and fold the values after it in
    /// chronological order.
    fn window<F>(&self, since: OffsetDateTime, f: F) -> Result<f64, StatsError>
    where
        F: FnOnce(&mut dyn Iterator<Item = f64>) -> f64,
    {
        let requested = OffsetDateTime::now_utc() - since;
        if requested > self.retention {
            return Err(StatsError::OutOfRange {
                requested,
                retention: self.retention,
            });
        }

        let values = self.read();
        let mut iter = values
            .range((Bound::Excluded(since), Bound::Unbounded))
            .map(|(_, v)| *v);
        Ok(f(&mut iter))
    }
}

fn ago(window: std::time::Duration) -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    Duration::try_from(window)
        .ok()
        .and_then(|d| now.checked_sub(d))
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}
