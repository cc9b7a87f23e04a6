// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Write subsystem: one dispatch queue shared by every writer, one thread
//! per writer.

use crate::context::{self, PluginContext};
use crate::error::{Error, Result};
use crate::filter::WriteSink;
use crate::metric::MetricFamily;
use crate::queue::{ConsumerId, Dequeued, DispatchQueue};
use crate::stats::{CallbackStats, CallbackStatsSnapshot};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Error returned by output plugin callbacks.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Output plugin receiving metric families.
pub trait Writer: Send + 'static {
    fn write(&mut self, family: &MetricFamily) -> std::result::Result<(), CallbackError>;

    /// Called every flush interval when [`WriteOptions::flush_interval`] is set.
    fn flush(&mut self, _timeout: Option<Duration>) -> std::result::Result<(), CallbackError> {
        Ok(())
    }
}

/// Flush settings for a writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// `None` disables flushing, zero selects the default interval.
    pub flush_interval: Option<Duration>,
    /// Passed through to [`Writer::flush`].
    pub flush_timeout: Option<Duration>,
}

/// `group/name`, or `group` when `name` is empty.
pub(crate) fn full_name(group: &str, name: &str) -> Result<String> {
    if group.is_empty() {
        return Err(Error::InvalidArgument("group name is empty".into()));
    }
    if name.is_empty() {
        Ok(group.to_string())
    } else {
        Ok(format!("{}/{}", group, name))
    }
}

/// Registered writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterHandle {
    name: String,
    id: ConsumerId,
}

impl WriterHandle {
    /// Full plugin name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> ConsumerId {
        self.id
    }
}

struct WriterThread {
    queue: Arc<DispatchQueue<MetricFamily>>,
    id: ConsumerId,
    name: String,
    writer: Box<dyn Writer>,
    stats: Arc<CallbackStats>,
    flush: Option<(Duration, Option<Duration>)>,
}

impl WriterThread {
    fn run(mut self) {
        debug!("{}: start", self.name);

        let mut next_flush = self.flush.map(|(interval, _)| Instant::now() + interval);

        loop {
            match self.queue.dequeue(self.id, next_flush) {
                Dequeued::Stopped => break,
                Dequeued::Empty => {}
                Dequeued::Element(element) => {
                    if element.is_for(&self.name) {
                        let ctx = PluginContext {
                            name: Some(self.name.clone()),
                            ..element.context.clone()
                        };
                        let writer = &mut self.writer;
                        let start = Instant::now();
                        let result = context::scoped(ctx, || writer.write(&element.payload));
                        self.stats.record(start.elapsed(), result.is_ok());
                        if let Err(e) = result {
                            debug!("{}: write of '{}' failed: {}", self.name, element.payload.name, e);
                        }
                    }
                }
            }

            if let (Some((interval, timeout)), Some(deadline)) = (self.flush, next_flush) {
                let now = Instant::now();
                if now >= deadline {
                    if let Err(e) = self.writer.flush(timeout) {
                        warn!("{}: flush failed: {}", self.name, e);
                    }
                    next_flush = Some(now + interval);
                }
            }
        }

        debug!("{}: teardown", self.name);
    }
}

/// Fan-out of metric families to the registered writers.
pub struct WriteSubsystem {
    queue: Arc<DispatchQueue<MetricFamily>>,
    stats: Mutex<Vec<Arc<CallbackStats>>>,
    metrics_dispatched: AtomicU64,
    default_interval: Duration,
}

impl WriteSubsystem {
    /// `default_interval` replaces a zero flush interval.
    pub fn new(default_interval: Duration) -> Self {
        Self {
            queue: Arc::new(DispatchQueue::new("write")),
            stats: Mutex::new(Vec::new()),
            metrics_dispatched: AtomicU64::new(0),
            default_interval,
        }
    }

    /// See [`DispatchQueue::set_limits`].
    pub fn set_limits(&self, limit_high: usize, limit_low: Option<usize>) {
        self.queue.set_limits(limit_high, limit_low);
    }

    pub fn queue(&self) -> &DispatchQueue<MetricFamily> {
        &self.queue
    }

    /// Start a thread feeding `writer`.
    pub fn register(
        &self,
        group: &str,
        name: &str,
        writer: Box<dyn Writer>,
        options: WriteOptions,
    ) -> Result<WriterHandle> {
        let full_name = full_name(group, name)?;
        let stats = Arc::new(CallbackStats::new(full_name.clone()));
        let flush = options.flush_interval.map(|interval| {
            let interval = if interval.is_zero() {
                self.default_interval
            } else {
                interval
            };
            (interval, options.flush_timeout)
        });

        let queue = Arc::clone(&self.queue);
        let thread_name = full_name.clone();
        let thread_stats = Arc::clone(&stats);
        let id = self.queue.spawn(&full_name, move |id| {
            WriterThread {
                queue,
                id,
                name: thread_name,
                writer,
                stats: thread_stats,
                flush,
            }
            .run()
        })?;

        self.stats.lock().push(stats);
        debug!("registered writer '{}'", full_name);
        Ok(WriterHandle {
            name: full_name,
            id,
        })
    }

    /// Stop the writer called `name`, or every writer.
    pub fn unregister(&self, name: Option<&str>) -> Result<()> {
        let result = self.queue.stop(name);
        self.stats.lock().retain(|stats| match name {
            Some(name) => !stats.plugin().eq_ignore_ascii_case(name),
            None => false,
        });
        result
    }

    /// Queue `family` for `plugin`, or for every writer when `None`.
    pub fn write(&self, plugin: Option<&str>, family: MetricFamily) -> Result<()> {
        self.metrics_dispatched
            .fetch_add(family.metrics.len() as u64, Ordering::Relaxed);
        self.queue.enqueue(plugin, vec![family])
    }

    /// Like [`write`](Self::write) on a deep copy of `family`.
    pub fn write_copy(&self, plugin: Option<&str>, family: &MetricFamily) -> Result<()> {
        self.write(plugin, family.try_clone()?)
    }

    /// Names of the registered writers.
    pub fn writers(&self) -> Vec<String> {
        self.queue.consumers()
    }

    pub fn queue_length(&self) -> usize {
        self.queue.queue_length()
    }

    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    pub fn metrics_dispatched(&self) -> u64 {
        self.metrics_dispatched.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> Vec<CallbackStatsSnapshot> {
        self.stats.lock().iter().map(|s| s.snapshot()).collect()
    }
}

impl WriteSink for WriteSubsystem {
    fn write_family(&self, plugin: Option<&str>, family: MetricFamily) -> Result<()> {
        self.write(plugin, family)
    }
}

impl Drop for WriteSubsystem {
    fn drop(&mut self) {
        if let Err(e) = self.queue.stop(None) {
            debug!("stopping writer threads: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{MetricType, Value};
    use std::thread;

    #[derive(Clone, Default)]
    struct Recorder {
        seen: Arc<Mutex<Vec<(String, Option<String>)>>>,
        flushes: Arc<AtomicU64>,
        fail: bool,
    }

    impl Writer for Recorder {
        fn write(&mut self, family: &MetricFamily) -> std::result::Result<(), CallbackError> {
            self.seen.lock().push((family.name.clone(), context::current().name));
            if self.fail {
                return Err("refused".into());
            }
            Ok(())
        }

        fn flush(&mut self, _timeout: Option<Duration>) -> std::result::Result<(), CallbackError> {
            self.flushes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn family(name: &str) -> MetricFamily {
        let mut fam = MetricFamily::new(name, MetricType::Gauge);
        fam.append_with(Value::Gauge(1.0), [("a", "b")]).expect("append");
        fam
    }

    fn wait_for(cond: impl Fn() -> bool) {
        let start = Instant::now();
        while !cond() && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_full_name() {
        assert_eq!(full_name("csv", "").expect("name"), "csv");
        assert_eq!(full_name("csv", "local").expect("name"), "csv/local");
        assert!(full_name("", "x").is_err());
    }

    #[test]
    fn test_write_without_writers() {
        let subsystem = WriteSubsystem::new(Duration::from_secs(10));
        assert!(matches!(
            subsystem.write(None, family("m")),
            Err(Error::NoConsumers { .. })
        ));
        assert_eq!(subsystem.metrics_dispatched(), 1);
    }

    #[test]
    fn test_targeted_write_and_stats() {
        let subsystem = WriteSubsystem::new(Duration::from_secs(10));
        let first = Recorder::default();
        let second = Recorder {
            fail: true,
            ..Recorder::default()
        };
        let handle = subsystem
            .register("rec", "one", Box::new(first.clone()), WriteOptions::default())
            .expect("register");
        assert_eq!(handle.name(), "rec/one");
        subsystem
            .register("rec", "two", Box::new(second.clone()), WriteOptions::default())
            .expect("register");

        subsystem.write(None, family("all")).expect("write");
        subsystem.write(Some("REC/TWO"), family("only_two")).expect("write");

        wait_for(|| first.seen.lock().len() == 1 && second.seen.lock().len() == 2);
        subsystem.unregister(None).expect("stop");

        assert_eq!(
            *first.seen.lock(),
            vec![("all".to_string(), Some("rec/one".to_string()))]
        );
        let names: Vec<_> = second.seen.lock().iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(names, vec!["all", "only_two"]);
        assert_eq!(subsystem.queue().live_len(), 0);
        assert!(subsystem.stats().is_empty());
    }

    #[test]
    fn test_failures_are_counted() {
        let subsystem = WriteSubsystem::new(Duration::from_secs(10));
        let failing = Recorder {
            fail: true,
            ..Recorder::default()
        };
        subsystem
            .register("bad", "", Box::new(failing.clone()), WriteOptions::default())
            .expect("register");
        subsystem.write_copy(None, &family("m")).expect("write");
        wait_for(|| subsystem.stats()[0].calls == 1);

        let stats = &subsystem.stats()[0];
        assert_eq!(stats.plugin, "bad");
        assert_eq!(stats.failures, 1);
    }

    #[test]
    fn test_flush_interval() {
        let subsystem = WriteSubsystem::new(Duration::from_secs(3600));
        let recorder = Recorder::default();
        subsystem
            .register(
                "flushing",
                "",
                Box::new(recorder.clone()),
                WriteOptions {
                    flush_interval: Some(Duration::from_millis(10)),
                    flush_timeout: None,
                },
            )
            .expect("register");
        wait_for(|| recorder.flushes.load(Ordering::Relaxed) >= 2);
        assert!(recorder.flushes.load(Ordering::Relaxed) >= 2);
        subsystem.unregister(Some("flushing")).expect("stop");
        assert!(matches!(
            subsystem.unregister(Some("flushing")),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_drop_joins_writer_threads() {
        let subsystem = WriteSubsystem::new(Duration::from_secs(10));
        let recorder = Recorder::default();
        subsystem
            .register("rec", "", Box::new(recorder.clone()), WriteOptions::default())
            .expect("register");
        subsystem.write(None, family("m")).expect("write");
        wait_for(|| recorder.seen.lock().len() == 1);

        drop(subsystem);
        // the writer thread owned the only other handle
        assert_eq!(Arc::strong_count(&recorder.seen), 1);
    }
}
