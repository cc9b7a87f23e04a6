// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Counter differences and per-series rates.

use super::{Counter, Metric, Value};
use crate::error::{Error, Result};
use crate::label::LabelSet;
use std::collections::BTreeMap;
use std::time::SystemTime;
use tracing::debug;

/// Difference between two counter readings, handling wraparound.
///
/// A 64-bit counter that went backwards is assumed to have wrapped at
/// 32 bits if the old reading fit in 32 bits, otherwise at 64 bits. A
/// floating point counter that went backwards is assumed to have been
/// reset, so the new reading is the difference.
pub fn counter_diff(old: Counter, new: Counter) -> Result<f64> {
    match (old, new) {
        (Counter::U64(old), Counter::U64(new)) => Ok(u64_diff(old, new) as f64),
        (Counter::F64(old), Counter::F64(new)) => Ok(if old > new { new } else { new - old }),
        _ => Err(Error::InvalidArgument("counter type changed".into())),
    }
}

fn u64_diff(old: u64, new: u64) -> u64 {
    if old <= new {
        return new - old;
    }
    if old <= u64::from(u32::MAX) {
        (u64::from(u32::MAX) - old) + new + 1
    } else {
        (u64::MAX - old).wrapping_add(new).wrapping_add(1)
    }
}

pub fn gauge_diff(old: f64, new: f64) -> f64 {
    new - old
}

#[derive(Debug)]
struct RateEntry {
    time: SystemTime,
    counter: Counter,
}

/// Tracks the last reading of each counter series and turns consecutive
/// readings into per-second rates.
#[derive(Debug, Default)]
pub struct RateTracker {
    entries: BTreeMap<(String, LabelSet), RateEntry>,
}

impl RateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a counter sample. Returns the rate since the previous sample of
    /// the same series, or `None` for the first sample.
    ///
    /// Samples older than the last update and counter type changes are
    /// rejected with `InvalidArgument` and leave the stored reading intact.
    pub fn update(&mut self, name: &str, metric: &Metric) -> Result<Option<f64>> {
        let counter = match metric.value {
            Value::Counter(c) => c,
            _ => return Err(Error::InvalidArgument(format!("'{}' is not a counter", name))),
        };
        let time = metric
            .time
            .ok_or_else(|| Error::InvalidArgument(format!("'{}' has no timestamp", name)))?;

        let key = (name.to_string(), metric.labels.clone());
        let Some(entry) = self.entries.get_mut(&key) else {
            self.entries.insert(key, RateEntry { time, counter });
            return Ok(None);
        };

        let elapsed = match time.duration_since(entry.time) {
            Ok(d) if !d.is_zero() => d,
            _ => {
                debug!("Value too old: name = {}", name);
                return Err(Error::InvalidArgument(format!(
                    "sample for '{}' is not newer than the last update",
                    name
                )));
            }
        };

        let diff = counter_diff(entry.counter, counter)?;
        entry.counter = counter;
        entry.time = time;
        Ok(Some(diff / elapsed.as_secs_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn test_u64_wraps_at_32_bits() {
        let old = Counter::U64(u64::from(u32::MAX) - 9);
        let diff = counter_diff(old, Counter::U64(5)).expect("diff");
        assert_eq!(diff, 15.0);
    }

    #[test]
    fn test_u64_wraps_at_64_bits() {
        let old = Counter::U64(u64::MAX - 1);
        let diff = counter_diff(old, Counter::U64(3)).expect("diff");
        assert_eq!(diff, 5.0);
    }

    #[test]
    fn test_f64_reset_uses_new_value() {
        let diff = counter_diff(Counter::F64(10.0), Counter::F64(2.5)).expect("diff");
        assert_eq!(diff, 2.5);
        assert!(counter_diff(Counter::F64(1.0), Counter::U64(1)).is_err());
    }

    fn sample(v: u64, secs: u64) -> Metric {
        let mut m = Metric::new(Value::counter(v), LabelSet::new());
        m.time = Some(UNIX_EPOCH + Duration::from_secs(secs));
        m
    }

    #[test]
    fn test_rate_tracker() {
        let mut tracker = RateTracker::new();
        assert_eq!(tracker.update("bytes", &sample(100, 10)).expect("first"), None);
        let rate = tracker.update("bytes", &sample(400, 20)).expect("second");
        assert_eq!(rate, Some(30.0));

        // stale sample is rejected and does not disturb the series
        assert!(tracker.update("bytes", &sample(500, 15)).is_err());
        let rate = tracker.update("bytes", &sample(500, 30)).expect("third");
        assert_eq!(rate, Some(10.0));
        assert_eq!(tracker.len(), 1);
    }
}
