// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Last-value cache updated between the pre-cache and post-cache filters.

use crate::label::LabelSet;
use crate::metric::{MetricFamily, MetricType, RateTracker, Value};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::SystemTime;
use tracing::{debug, warn};

/// Sink for every family that passed the pre-cache filter.
pub trait MetricCache: Send + Sync {
    fn insert_family(&self, family: &MetricFamily);
}

/// Cached reading of one series.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub metric_type: MetricType,
    pub value: Value,
    pub time: Option<SystemTime>,
    /// Per-second rate for counters with at least two readings.
    pub rate: Option<f64>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<(String, LabelSet), CacheEntry>,
    rates: RateTracker,
}

/// In-memory [`MetricCache`] keyed by family name and label set.
#[derive(Debug, Default)]
pub struct ValueCache {
    inner: RwLock<Inner>,
}

impl ValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str, labels: &LabelSet) -> Option<CacheEntry> {
        self.inner
            .read()
            .entries
            .get(&(name.to_string(), labels.clone()))
            .cloned()
    }

    /// Last computed rate of a counter series.
    pub fn rate(&self, name: &str, labels: &LabelSet) -> Option<f64> {
        self.get(name, labels).and_then(|entry| entry.rate)
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove series last updated before `cutoff`. Returns how many were removed.
    pub fn prune(&self, cutoff: SystemTime) -> usize {
        let mut inner = self.inner.write();
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, entry| entry.time.map_or(true, |t| t >= cutoff));
        before - inner.entries.len()
    }
}

impl MetricCache for ValueCache {
    fn insert_family(&self, family: &MetricFamily) {
        let mut inner = self.inner.write();
        for metric in &family.metrics {
            let rate = match metric.value {
                Value::Counter(_) => match inner.rates.update(&family.name, metric) {
                    Ok(rate) => rate,
                    Err(e) => {
                        debug!("cache: skipping '{}': {}", family.name, e);
                        continue;
                    }
                },
                _ => None,
            };
            let (value, labels) = match (metric.value.try_clone(), metric.labels.try_clone()) {
                (Ok(value), Ok(labels)) => (value, labels),
                _ => {
                    warn!("cache: out of memory while caching '{}'", family.name);
                    continue;
                }
            };
            inner.entries.insert(
                (family.name.clone(), labels),
                CacheEntry {
                    metric_type: family.metric_type,
                    value,
                    time: metric.time,
                    rate,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::Metric;
    use std::time::{Duration, UNIX_EPOCH};

    fn counter_family(value: u64, secs: u64) -> MetricFamily {
        let mut fam = MetricFamily::new("requests_total", MetricType::Counter);
        let mut metric = Metric::new(
            Value::counter(value),
            LabelSet::from_pairs([("code", "200")]).expect("labels"),
        );
        metric.time = Some(UNIX_EPOCH + Duration::from_secs(secs));
        fam.push(metric).expect("push");
        fam
    }

    #[test]
    fn test_counter_rate() {
        let cache = ValueCache::new();
        let labels = LabelSet::from_pairs([("code", "200")]).expect("labels");

        cache.insert_family(&counter_family(100, 1000));
        assert_eq!(cache.rate("requests_total", &labels), None);

        cache.insert_family(&counter_family(150, 1010));
        assert_eq!(cache.rate("requests_total", &labels), Some(5.0));
        assert_eq!(cache.len(), 1);

        // stale sample keeps the previous reading
        cache.insert_family(&counter_family(999, 1005));
        let entry = cache.get("requests_total", &labels).expect("entry");
        assert_eq!(entry.value, Value::counter(150));
    }

    #[test]
    fn test_prune() {
        let cache = ValueCache::new();
        cache.insert_family(&counter_family(1, 100));
        assert_eq!(cache.prune(UNIX_EPOCH + Duration::from_secs(50)), 0);
        assert_eq!(cache.prune(UNIX_EPOCH + Duration::from_secs(200)), 1);
        assert!(cache.is_empty());
    }
}
