// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Metric model: values, metrics, families and family lists.

pub mod notification;
pub mod rate;
mod value;

pub use notification::{Notification, Severity};
pub use rate::{counter_diff, gauge_diff, RateTracker};
pub use value::{Bucket, Counter, Histogram, Quantile, State, Summary, Value};

use crate::error::{Error, Result};
use crate::label::LabelSet;
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Metric family type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Unknown,
    Gauge,
    Counter,
    StateSet,
    Info,
    Summary,
    Histogram,
    GaugeHistogram,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Unknown => "unknown",
            MetricType::Gauge => "gauge",
            MetricType::Counter => "counter",
            MetricType::StateSet => "stateset",
            MetricType::Info => "info",
            MetricType::Summary => "summary",
            MetricType::Histogram => "histogram",
            MetricType::GaugeHistogram => "gaugehistogram",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Seconds since the epoch, as used by the text and JSON renderings.
pub fn epoch_secs(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn serialize_time<S: Serializer>(
    time: &Option<SystemTime>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match time {
        Some(t) => serializer.serialize_f64(epoch_secs(*t)),
        None => serializer.serialize_none(),
    }
}

fn serialize_interval<S: Serializer>(
    interval: &Option<Duration>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match interval {
        Some(d) => serializer.serialize_f64(d.as_secs_f64()),
        None => serializer.serialize_none(),
    }
}

/// A single sample inside a family.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub value: Value,
    pub labels: LabelSet,
    #[serde(serialize_with = "serialize_time")]
    pub time: Option<SystemTime>,
    #[serde(serialize_with = "serialize_interval")]
    pub interval: Option<Duration>,
}

impl Metric {
    pub fn new(value: Value, labels: LabelSet) -> Self {
        Self {
            value,
            labels,
            time: None,
            interval: None,
        }
    }

    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            value: self.value.try_clone()?,
            labels: self.labels.try_clone()?,
            time: self.time,
            interval: self.interval,
        })
    }

    /// Drop labels and heap storage, keeping the value type.
    pub fn reset(&mut self) {
        self.labels.clear();
        self.value.reset();
        self.time = None;
        self.interval = None;
    }
}

/// Group of same-typed samples sharing a name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricFamily {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    pub metrics: Vec<Metric>,
}

impl MetricFamily {
    pub fn new(name: impl Into<String>, metric_type: MetricType) -> Self {
        Self {
            name: name.into(),
            help: None,
            unit: None,
            metric_type,
            metrics: Vec::new(),
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Empty family with the same name, help, unit and type.
    pub fn header(&self) -> Self {
        Self {
            name: self.name.clone(),
            help: self.help.clone(),
            unit: self.unit.clone(),
            metric_type: self.metric_type,
            metrics: Vec::new(),
        }
    }

    /// Append a metric whose value type must match the family type.
    pub fn push(&mut self, metric: Metric) -> Result<()> {
        if metric.value.metric_type() != self.metric_type {
            return Err(Error::InvalidArgument(format!(
                "{} value in {} family '{}'",
                metric.value.metric_type(),
                self.metric_type,
                self.name
            )));
        }
        self.metrics.try_reserve(1)?;
        self.metrics.push(metric);
        Ok(())
    }

    /// Append `value` with the given labels.
    pub fn append(&mut self, value: Value, labels: LabelSet) -> Result<()> {
        self.push(Metric::new(value, labels))
    }

    /// Append `value` with labels built from pairs.
    pub fn append_with<N, V>(
        &mut self,
        value: Value,
        labels: impl IntoIterator<Item = (N, V)>,
    ) -> Result<()>
    where
        N: AsRef<str>,
        V: AsRef<str>,
    {
        self.append(value, LabelSet::from_pairs(labels)?)
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Deep copy of the family and all of its metrics.
    pub fn try_clone(&self) -> Result<Self> {
        let mut metrics = Vec::new();
        metrics.try_reserve_exact(self.metrics.len())?;
        for metric in &self.metrics {
            metrics.push(metric.try_clone()?);
        }
        Ok(Self {
            metrics,
            ..self.header()
        })
    }

    /// Reset every metric and release the list storage.
    pub fn reset_metrics(&mut self) {
        for metric in &mut self.metrics {
            metric.reset();
        }
        self.metrics = Vec::new();
    }
}

/// Ordered families produced by a filter run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricFamilyList {
    families: Vec<MetricFamily>,
}

impl MetricFamilyList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            families: Vec::with_capacity(capacity),
        }
    }

    pub fn from_family(family: MetricFamily) -> Self {
        Self {
            families: vec![family],
        }
    }

    pub fn push(&mut self, family: MetricFamily) {
        self.families.push(family);
    }

    pub fn len(&self) -> usize {
        self.families.len()
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&MetricFamily> {
        self.families.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut MetricFamily> {
        self.families.get_mut(index)
    }

    /// Position of the family called `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.families.iter().position(|fam| fam.name == name)
    }

    pub fn find(&self, name: &str) -> Option<&MetricFamily> {
        self.families.iter().find(|fam| fam.name == name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MetricFamily> {
        self.families.iter()
    }

    pub fn into_vec(self) -> Vec<MetricFamily> {
        self.families
    }
}

impl IntoIterator for MetricFamilyList {
    type Item = MetricFamily;
    type IntoIter = std::vec::IntoIter<MetricFamily>;

    fn into_iter(self) -> Self::IntoIter {
        self.families.into_iter()
    }
}

impl<'a> IntoIterator for &'a MetricFamilyList {
    type Item = &'a MetricFamily;
    type IntoIter = std::slice::Iter<'a, MetricFamily>;

    fn into_iter(self) -> Self::IntoIter {
        self.families.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn test_push_enforces_family_type() {
        let mut fam = MetricFamily::new("up", MetricType::Gauge);
        fam.append(Value::Gauge(1.0), LabelSet::new()).expect("gauge");
        assert!(matches!(
            fam.append(Value::counter(1), LabelSet::new()),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(fam.len(), 1);
    }

    #[test]
    fn test_family_clone_is_independent() {
        let mut fam = MetricFamily::new("requests", MetricType::Counter).with_help("total");
        fam.append_with(Value::counter(3), [("code", "200")])
            .expect("append");
        let mut copy = fam.try_clone().expect("clone");
        copy.metrics[0].labels.set("code", "500").expect("set");
        assert_eq!(fam.metrics[0].labels.get("code"), Some("200"));
        assert_eq!(copy.help.as_deref(), Some("total"));
    }

    #[test]
    fn test_reset_metrics_releases_storage() {
        let mut fam = MetricFamily::new("x", MetricType::Gauge);
        fam.append_with(Value::Gauge(1.0), [("a", "b")]).expect("append");
        fam.reset_metrics();
        assert!(fam.is_empty());
        assert_eq!(fam.metrics.capacity(), 0);
    }

    #[test]
    fn test_family_list_lookup() {
        let mut list = MetricFamilyList::from_family(MetricFamily::new("a", MetricType::Gauge));
        list.push(MetricFamily::new("b", MetricType::Gauge));
        assert_eq!(list.position("b"), Some(1));
        assert!(list.find("c").is_none());
    }

    #[test]
    fn test_family_json_layout() {
        let mut fam = MetricFamily::new("requests", MetricType::Counter).with_help("total");
        let mut metric = Metric::new(
            Value::counter(3),
            LabelSet::from_pairs([("code", "200")]).expect("labels"),
        );
        metric.time = Some(UNIX_EPOCH + Duration::from_millis(1_500));
        metric.interval = Some(Duration::from_secs(10));
        fam.push(metric).expect("push");

        let json = serde_json::to_value(&fam).expect("json");
        assert_eq!(
            json,
            serde_json::json!({
                "name": "requests",
                "help": "total",
                "type": "counter",
                "metrics": [{
                    "value": {"type": "counter", "value": 3},
                    "labels": {"code": "200"},
                    "time": 1.5,
                    "interval": 10.0
                }]
            })
        );

        let unset = serde_json::to_value(Metric::new(Value::Gauge(0.5), LabelSet::new()))
            .expect("json");
        assert_eq!(unset["time"], serde_json::Value::Null);
        assert_eq!(unset["value"]["value"], 0.5);
    }
}
