// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Metric values.

use super::MetricType;
use crate::error::{Error, Result};
use crate::label::LabelSet;
use serde::{Serialize, Serializer};

/// Monotonic counter, integral or floating point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Counter {
    U64(u64),
    F64(f64),
}

impl Counter {
    pub fn as_f64(&self) -> f64 {
        match *self {
            Counter::U64(v) => v as f64,
            Counter::F64(v) => v,
        }
    }
}

/// One named state of a state set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct State {
    pub name: String,
    pub enabled: bool,
}

/// A summary quantile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Quantile {
    pub quantile: f64,
    pub value: f64,
}

/// Pre-aggregated summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub sum: f64,
    pub count: u64,
    pub quantiles: Vec<Quantile>,
}

fn serialize_bound<S: Serializer>(value: &f64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    if value.is_infinite() {
        serializer.serialize_str("+Inf")
    } else {
        serializer.serialize_f64(*value)
    }
}

/// A cumulative histogram bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bucket {
    #[serde(serialize_with = "serialize_bound")]
    pub maximum: f64,
    pub counter: u64,
}

/// Cumulative histogram.
///
/// `buckets[0]` is always the `+Inf` bucket; the rest are sorted by
/// `maximum` in descending order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    pub sum: f64,
    buckets: Vec<Bucket>,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    /// Histogram with only the `+Inf` bucket.
    pub fn new() -> Self {
        Self {
            sum: 0.0,
            buckets: vec![Bucket {
                maximum: f64::INFINITY,
                counter: 0,
            }],
        }
    }

    /// `num_buckets` buckets of width `size`.
    pub fn linear(num_buckets: usize, size: f64) -> Result<Self> {
        if num_buckets == 0 || size <= 0.0 {
            return Err(Error::InvalidArgument(
                "linear histogram needs buckets and a positive size".into(),
            ));
        }
        let bounds: Vec<f64> = (1..=num_buckets).map(|i| i as f64 * size).collect();
        Self::custom(&bounds)
    }

    /// `num_buckets` buckets with bounds `factor * base^i`.
    pub fn exponential(num_buckets: usize, base: f64, factor: f64) -> Result<Self> {
        if num_buckets == 0 || base <= 1.0 || factor <= 0.0 {
            return Err(Error::InvalidArgument(
                "exponential histogram needs buckets, base > 1 and factor > 0".into(),
            ));
        }
        let bounds: Vec<f64> = (1..=num_buckets)
            .map(|i| factor * base.powi(i as i32))
            .collect();
        Self::custom(&bounds)
    }

    /// Buckets from ascending, strictly positive, finite boundaries.
    pub fn custom(bounds: &[f64]) -> Result<Self> {
        let mut previous = 0.0;
        for &bound in bounds {
            if bound <= previous || bound.is_infinite() {
                return Err(Error::InvalidArgument(format!(
                    "invalid histogram boundary {}",
                    bound
                )));
            }
            previous = bound;
        }
        let mut hist = Self::new();
        hist.buckets.try_reserve_exact(bounds.len())?;
        hist.buckets.extend(bounds.iter().rev().map(|&maximum| Bucket {
            maximum,
            counter: 0,
        }));
        Ok(hist)
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    /// Total number of observations.
    pub fn count(&self) -> u64 {
        self.buckets[0].counter
    }

    /// Record one observation.
    pub fn update(&mut self, gauge: f64) -> Result<()> {
        if gauge < 0.0 || gauge.is_nan() {
            return Err(Error::InvalidArgument(format!(
                "histogram observation {} is negative",
                gauge
            )));
        }
        self.buckets[0].counter += 1;
        for bucket in self.buckets.iter_mut().skip(1) {
            if bucket.maximum < gauge {
                break;
            }
            bucket.counter += 1;
        }
        self.sum += gauge;
        Ok(())
    }

    /// Set the counter of the bucket bounded by `maximum`, inserting it if needed.
    pub fn append_bucket(&mut self, maximum: f64, counter: u64) -> Result<()> {
        if maximum == f64::INFINITY {
            self.buckets[0].counter = counter;
            return Ok(());
        }
        if let Some(bucket) = self.buckets.iter_mut().find(|b| b.maximum == maximum) {
            bucket.counter = counter;
            return Ok(());
        }
        self.buckets.try_reserve(1)?;
        let pos = self.buckets[1..]
            .iter()
            .position(|b| b.maximum < maximum)
            .map(|p| p + 1)
            .unwrap_or(self.buckets.len());
        self.buckets.insert(pos, Bucket { maximum, counter });
        Ok(())
    }

    pub fn reset(&mut self) {
        self.sum = 0.0;
        for bucket in &mut self.buckets {
            bucket.counter = 0;
        }
    }

    pub fn try_clone(&self) -> Result<Self> {
        let mut buckets = Vec::new();
        buckets.try_reserve_exact(self.buckets.len())?;
        buckets.extend_from_slice(&self.buckets);
        Ok(Self {
            sum: self.sum,
            buckets,
        })
    }
}

/// Sample value of a metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Unknown(f64),
    Gauge(f64),
    Counter(Counter),
    StateSet(Vec<State>),
    Info(LabelSet),
    Summary(Box<Summary>),
    Histogram(Box<Histogram>),
    GaugeHistogram(Box<Histogram>),
}

impl Value {
    pub fn counter(v: u64) -> Self {
        Value::Counter(Counter::U64(v))
    }

    pub fn counter_f64(v: f64) -> Self {
        Value::Counter(Counter::F64(v))
    }

    pub fn metric_type(&self) -> MetricType {
        match self {
            Value::Unknown(_) => MetricType::Unknown,
            Value::Gauge(_) => MetricType::Gauge,
            Value::Counter(_) => MetricType::Counter,
            Value::StateSet(_) => MetricType::StateSet,
            Value::Info(_) => MetricType::Info,
            Value::Summary(_) => MetricType::Summary,
            Value::Histogram(_) => MetricType::Histogram,
            Value::GaugeHistogram(_) => MetricType::GaugeHistogram,
        }
    }

    /// Zero value for a metric type.
    pub fn zero(metric_type: MetricType) -> Self {
        match metric_type {
            MetricType::Unknown => Value::Unknown(0.0),
            MetricType::Gauge => Value::Gauge(0.0),
            MetricType::Counter => Value::counter(0),
            MetricType::StateSet => Value::StateSet(Vec::new()),
            MetricType::Info => Value::Info(LabelSet::new()),
            MetricType::Summary => Value::Summary(Box::default()),
            MetricType::Histogram => Value::Histogram(Box::default()),
            MetricType::GaugeHistogram => Value::GaugeHistogram(Box::default()),
        }
    }

    /// Deep copy. On allocation failure nothing is kept and `OutOfMemory`
    /// is returned.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(match self {
            Value::Unknown(v) => Value::Unknown(*v),
            Value::Gauge(v) => Value::Gauge(*v),
            Value::Counter(c) => Value::Counter(*c),
            Value::StateSet(states) => {
                let mut out = Vec::new();
                out.try_reserve_exact(states.len())?;
                for state in states {
                    let mut name = String::new();
                    name.try_reserve_exact(state.name.len())?;
                    name.push_str(&state.name);
                    out.push(State {
                        name,
                        enabled: state.enabled,
                    });
                }
                Value::StateSet(out)
            }
            Value::Info(labels) => Value::Info(labels.try_clone()?),
            Value::Summary(summary) => {
                let mut quantiles = Vec::new();
                quantiles.try_reserve_exact(summary.quantiles.len())?;
                quantiles.extend_from_slice(&summary.quantiles);
                Value::Summary(Box::new(Summary {
                    sum: summary.sum,
                    count: summary.count,
                    quantiles,
                }))
            }
            Value::Histogram(h) => Value::Histogram(Box::new(h.try_clone()?)),
            Value::GaugeHistogram(h) => Value::GaugeHistogram(Box::new(h.try_clone()?)),
        })
    }

    /// Reset to the zero value of the same type, releasing heap storage.
    pub fn reset(&mut self) {
        *self = Value::zero(self.metric_type());
    }

    /// Scalar view used by text writers and caches.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Unknown(v) | Value::Gauge(v) => Some(*v),
            Value::Counter(c) => Some(c.as_f64()),
            Value::Summary(s) => Some(s.sum),
            Value::Histogram(h) | Value::GaugeHistogram(h) => Some(h.sum),
            Value::StateSet(_) | Value::Info(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_layout() {
        let h = Histogram::linear(3, 10.0).expect("linear");
        let bounds: Vec<f64> = h.buckets().iter().map(|b| b.maximum).collect();
        assert_eq!(bounds, vec![f64::INFINITY, 30.0, 20.0, 10.0]);

        let h = Histogram::exponential(2, 2.0, 1.0).expect("exp");
        let bounds: Vec<f64> = h.buckets().iter().map(|b| b.maximum).collect();
        assert_eq!(bounds, vec![f64::INFINITY, 4.0, 2.0]);

        assert!(Histogram::custom(&[1.0, 1.0]).is_err());
        assert!(Histogram::custom(&[1.0, f64::INFINITY]).is_err());
    }

    #[test]
    fn test_histogram_update_is_cumulative() {
        let mut h = Histogram::custom(&[1.0, 5.0]).expect("custom");
        h.update(0.5).expect("update");
        h.update(3.0).expect("update");
        h.update(9.0).expect("update");
        let counters: Vec<u64> = h.buckets().iter().map(|b| b.counter).collect();
        assert_eq!(counters, vec![3, 2, 1]);
        assert_eq!(h.count(), 3);
        assert_eq!(h.sum, 12.5);
        assert!(h.update(-1.0).is_err());
    }

    #[test]
    fn test_append_bucket_keeps_order() {
        let mut h = Histogram::new();
        h.append_bucket(1.0, 4).expect("append");
        h.append_bucket(10.0, 7).expect("append");
        h.append_bucket(5.0, 6).expect("append");
        h.append_bucket(f64::INFINITY, 8).expect("append");
        let bounds: Vec<f64> = h.buckets().iter().map(|b| b.maximum).collect();
        assert_eq!(bounds, vec![f64::INFINITY, 10.0, 5.0, 1.0]);
        assert_eq!(h.count(), 8);
    }

    #[test]
    fn test_clone_is_deep() {
        let mut h = Histogram::custom(&[1.0]).expect("custom");
        h.update(0.1).expect("update");
        let original = Value::Histogram(Box::new(h));
        let mut copy = original.try_clone().expect("clone");
        if let Value::Histogram(h) = &mut copy {
            h.reset();
        }
        assert_ne!(original, copy);

        let states = Value::StateSet(vec![State {
            name: "up".into(),
            enabled: true,
        }]);
        assert_eq!(states.try_clone().expect("clone"), states);
    }

    #[test]
    fn test_reset_keeps_type() {
        let mut v = Value::counter(42);
        v.reset();
        assert_eq!(v, Value::counter(0));
        let mut v = Value::Info(LabelSet::from_pairs([("a", "b")]).expect("set"));
        v.reset();
        assert_eq!(v.metric_type(), MetricType::Info);
    }
}
