// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dispatch entry point.
//!
//! A dispatched family runs through these stages, each filter possibly
//! splitting it into several families:
//!
//! 1. the plugin's own filter, if any;
//! 2. the pre-cache filter;
//! 3. the value cache;
//! 4. the post-cache filter;
//! 5. the write queue, as a broadcast.

use crate::cache::{MetricCache, ValueCache};
use crate::context;
use crate::error::{Error, Result};
use crate::filter::{Filter, WriteSink};
use crate::label::LabelSet;
use crate::metric::{MetricFamily, MetricFamilyList, MetricType, Notification, Value};
use crate::notify::NotifySubsystem;
use crate::stats::CallbackStatsSnapshot;
use crate::write::WriteSubsystem;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{error, warn};

/// Core pipeline shared by collectors.
pub struct Pipeline {
    interval: Duration,
    labels: LabelSet,
    write: Arc<WriteSubsystem>,
    notify: Arc<NotifySubsystem>,
    cache: Arc<dyn MetricCache>,
    pre_cache_filter: Option<Arc<Filter>>,
    post_cache_filter: Option<Arc<Filter>>,
}

impl Pipeline {
    /// `interval` is the default collection and flush interval. `labels` are
    /// added to every metric and notification that lacks them.
    pub fn new(interval: Duration, labels: LabelSet) -> Self {
        Self {
            interval,
            write: Arc::new(WriteSubsystem::new(interval)),
            notify: Arc::new(NotifySubsystem::new(labels.clone())),
            labels,
            cache: Arc::new(ValueCache::new()),
            pre_cache_filter: None,
            post_cache_filter: None,
        }
    }

    pub fn set_cache(&mut self, cache: Arc<dyn MetricCache>) {
        self.cache = cache;
    }

    pub fn set_pre_cache_filter(&mut self, filter: Option<Arc<Filter>>) {
        self.pre_cache_filter = filter;
    }

    pub fn set_post_cache_filter(&mut self, filter: Option<Arc<Filter>>) {
        self.post_cache_filter = filter;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn write(&self) -> &Arc<WriteSubsystem> {
        &self.write
    }

    pub fn notify(&self) -> &Arc<NotifySubsystem> {
        &self.notify
    }

    fn filtered(&self, filter: Option<&Filter>, stage: &str, family: MetricFamily) -> Vec<MetricFamily> {
        let Some(filter) = filter else {
            return vec![family];
        };
        let mut list = MetricFamilyList::from_family(family);
        let sink: &dyn WriteSink = self.write.as_ref();
        if let Err(e) = filter.process(&mut list, Some(sink)) {
            warn!("Running the {} filter failed: {}", stage, e);
        }
        list.into_iter().filter(|fam| !fam.metrics.is_empty()).collect()
    }

    fn dispatch_one(&self, family: MetricFamily, filter: Option<&Filter>) {
        for family in self.filtered(filter, "plugin", family) {
            for family in self.filtered(self.pre_cache_filter.as_deref(), "pre-cache", family) {
                self.cache.insert_family(&family);
                for family in self.filtered(self.post_cache_filter.as_deref(), "post-cache", family) {
                    match self.write.write(None, family) {
                        Ok(()) | Err(Error::NoConsumers { .. }) => {}
                        Err(e) => error!("Writing metric family failed: {}", e),
                    }
                }
            }
        }
    }

    /// Dispatch collected families.
    ///
    /// `time` defaults to now and the interval to the calling plugin's
    /// interval; both only fill metrics that have none. Families without
    /// metrics or without a name are skipped.
    pub fn dispatch_families(
        &self,
        families: Vec<MetricFamily>,
        filter: Option<&Filter>,
        time: Option<SystemTime>,
    ) -> Result<()> {
        if families.is_empty() {
            return Err(Error::InvalidArgument("no metric families to dispatch".into()));
        }
        let time = time.unwrap_or_else(SystemTime::now);
        let interval = context::current().interval.unwrap_or(self.interval);

        for mut family in families {
            if family.metrics.is_empty() {
                continue;
            }
            if family.name.is_empty() {
                family.reset_metrics();
                continue;
            }
            for metric in &mut family.metrics {
                metric.time.get_or_insert(time);
                metric.interval.get_or_insert(interval);
                if let Err(e) = metric.labels.add_set(false, &self.labels) {
                    warn!("Adding global labels to '{}' failed: {}", family.name, e);
                }
            }
            self.dispatch_one(family, filter);
        }
        Ok(())
    }

    /// Dispatch a single family without a plugin filter.
    pub fn dispatch_family(&self, family: MetricFamily) -> Result<()> {
        self.dispatch_families(vec![family], None, None)
    }

    /// Broadcast a notification.
    pub fn dispatch_notification(&self, notification: Notification) -> Result<()> {
        self.notify.dispatch(notification)
    }

    /// Self-monitoring families describing the queues and plugin callbacks.
    pub fn stats_families(&self) -> Vec<MetricFamily> {
        let mut families = Vec::with_capacity(12);

        let scalar = |name: &str, help: &str, value: Value| {
            let mut fam = MetricFamily::new(name, value.metric_type()).with_help(help);
            fam.metrics.push(crate::metric::Metric::new(value, LabelSet::new()));
            fam
        };
        families.push(scalar(
            "metricflow_write_queue_length",
            "Number of metric families waiting in the write queue.",
            Value::Gauge(self.write.queue_length() as f64),
        ));
        families.push(scalar(
            "metricflow_write_queue_dropped",
            "Number of metric families dropped from the write queue.",
            Value::counter(self.write.dropped()),
        ));
        families.push(scalar(
            "metricflow_metrics_dispatched",
            "Number of metrics handed to the write queue.",
            Value::counter(self.write.metrics_dispatched()),
        ));
        families.push(scalar(
            "metricflow_notify_queue_length",
            "Number of notifications waiting in the notify queue.",
            Value::Gauge(self.notify.queue_length() as f64),
        ));
        families.push(scalar(
            "metricflow_notify_queue_dropped",
            "Number of notifications dropped from the notify queue.",
            Value::counter(self.notify.dropped()),
        ));
        families.push(scalar(
            "metricflow_notifications_dispatched",
            "Number of notifications handed to the notify queue.",
            Value::counter(self.notify.notifications_dispatched()),
        ));

        families.extend(plugin_families("write", &self.write.stats()));
        families.extend(plugin_families("notify", &self.notify.stats()));
        families
    }

    /// Stop every writer and notifier thread.
    pub fn shutdown(&self) {
        for result in [self.write.unregister(None), self.notify.unregister(None)] {
            if let Err(e) = result {
                warn!("shutdown: {}", e);
            }
        }
    }
}

fn plugin_families(kind: &str, stats: &[CallbackStatsSnapshot]) -> [MetricFamily; 3] {
    let mut time = MetricFamily::new(
        format!("metricflow_plugin_{}_time_seconds", kind),
        MetricType::Counter,
    )
    .with_help(format!("Total time spent in {} callbacks.", kind));
    let mut calls = MetricFamily::new(format!("metricflow_plugin_{}_calls", kind), MetricType::Counter)
        .with_help(format!("Number of {} callback invocations.", kind));
    let mut failures = MetricFamily::new(
        format!("metricflow_plugin_{}_failures", kind),
        MetricType::Counter,
    )
    .with_help(format!("Number of failed {} callback invocations.", kind));

    for s in stats {
        let labels = [("plugin", s.plugin.as_str())];
        let appended = time
            .append_with(Value::counter_f64(s.time.as_secs_f64()), labels)
            .and_then(|()| calls.append_with(Value::counter(s.calls), labels))
            .and_then(|()| failures.append_with(Value::counter(s.failures), labels));
        if let Err(e) = appended {
            warn!("stats for plugin '{}': {}", s.plugin, e);
        }
    }
    [time, calls, failures]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::Metric;

    #[test]
    fn test_stats_families_without_plugins() {
        let pipeline = Pipeline::new(Duration::from_secs(10), LabelSet::new());
        let families = pipeline.stats_families();
        assert_eq!(families.len(), 12);
        assert_eq!(families[0].name, "metricflow_write_queue_length");
        assert_eq!(families[0].metric_type, MetricType::Gauge);
        assert!(families[6..].iter().all(|fam| fam.metrics.is_empty()));
    }

    #[test]
    fn test_dispatch_without_writers_is_not_fatal() {
        let pipeline = Pipeline::new(Duration::from_secs(10), LabelSet::new());
        let mut fam = MetricFamily::new("m", MetricType::Gauge);
        fam.push(Metric::new(Value::Gauge(1.0), LabelSet::new()))
            .expect("push");
        pipeline.dispatch_family(fam).expect("dispatch");
        assert_eq!(pipeline.write().metrics_dispatched(), 1);
        assert!(pipeline
            .dispatch_families(Vec::new(), None, None)
            .is_err());
    }
}
