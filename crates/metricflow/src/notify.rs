// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Notify subsystem, the notification counterpart of [`crate::write`].

use crate::context::{self, PluginContext};
use crate::error::Result;
use crate::label::LabelSet;
use crate::metric::Notification;
use crate::queue::{ConsumerId, Dequeued, DispatchQueue};
use crate::stats::{CallbackStats, CallbackStatsSnapshot};
use crate::write::{full_name, CallbackError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tracing::debug;

/// Output plugin receiving notifications.
pub trait Notifier: Send + 'static {
    fn notify(&mut self, notification: &Notification) -> std::result::Result<(), CallbackError>;
}

/// Registered notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifierHandle {
    name: String,
    id: ConsumerId,
}

impl NotifierHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> ConsumerId {
        self.id
    }
}

fn notifier_thread(
    queue: Arc<DispatchQueue<Notification>>,
    id: ConsumerId,
    name: String,
    mut notifier: Box<dyn Notifier>,
    stats: Arc<CallbackStats>,
) {
    debug!("{}: start", name);
    loop {
        let element = match queue.dequeue(id, None) {
            Dequeued::Element(element) => element,
            Dequeued::Empty => continue,
            Dequeued::Stopped => break,
        };
        if !element.is_for(&name) {
            continue;
        }
        let ctx = PluginContext {
            name: Some(name.clone()),
            ..element.context.clone()
        };
        let start = Instant::now();
        let result = context::scoped(ctx, || notifier.notify(&element.payload));
        stats.record(start.elapsed(), result.is_ok());
        if let Err(e) = result {
            debug!("{}: notification '{}' failed: {}", name, element.payload.name, e);
        }
    }
    debug!("{}: teardown", name);
}

/// Fan-out of notifications to the registered notifiers.
pub struct NotifySubsystem {
    queue: Arc<DispatchQueue<Notification>>,
    stats: Mutex<Vec<Arc<CallbackStats>>>,
    notifications_dispatched: AtomicU64,
    labels: LabelSet,
}

impl Default for NotifySubsystem {
    fn default() -> Self {
        Self::new(LabelSet::new())
    }
}

impl NotifySubsystem {
    /// `labels` are added to every notification that lacks them.
    pub fn new(labels: LabelSet) -> Self {
        Self {
            queue: Arc::new(DispatchQueue::new("notify")),
            stats: Mutex::new(Vec::new()),
            notifications_dispatched: AtomicU64::new(0),
            labels,
        }
    }

    pub fn set_limits(&self, limit_high: usize, limit_low: Option<usize>) {
        self.queue.set_limits(limit_high, limit_low);
    }

    pub fn queue(&self) -> &DispatchQueue<Notification> {
        &self.queue
    }

    pub fn register(
        &self,
        group: &str,
        name: &str,
        notifier: Box<dyn Notifier>,
    ) -> Result<NotifierHandle> {
        let full_name = full_name(group, name)?;
        let stats = Arc::new(CallbackStats::new(full_name.clone()));

        let queue = Arc::clone(&self.queue);
        let thread_name = full_name.clone();
        let thread_stats = Arc::clone(&stats);
        let id = self.queue.spawn(&full_name, move |id| {
            notifier_thread(queue, id, thread_name, notifier, thread_stats)
        })?;

        self.stats.lock().push(stats);
        debug!("registered notifier '{}'", full_name);
        Ok(NotifierHandle {
            name: full_name,
            id,
        })
    }

    pub fn unregister(&self, name: Option<&str>) -> Result<()> {
        let result = self.queue.stop(name);
        self.stats.lock().retain(|stats| match name {
            Some(name) => !stats.plugin().eq_ignore_ascii_case(name),
            None => false,
        });
        result
    }

    /// Queue `notification` for `plugin`, or for every notifier when `None`.
    ///
    /// A missing time is set to now and the global labels are added without
    /// overwriting.
    pub fn notify(&self, plugin: Option<&str>, mut notification: Notification) -> Result<()> {
        if notification.time.is_none() {
            notification.time = Some(SystemTime::now());
        }
        notification.labels.add_set(false, &self.labels)?;
        self.notifications_dispatched.fetch_add(1, Ordering::Relaxed);
        self.queue.enqueue(plugin, vec![notification])
    }

    /// Broadcast `notification`.
    pub fn dispatch(&self, notification: Notification) -> Result<()> {
        self.notify(None, notification)
    }

    pub fn notifiers(&self) -> Vec<String> {
        self.queue.consumers()
    }

    pub fn queue_length(&self) -> usize {
        self.queue.queue_length()
    }

    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    pub fn notifications_dispatched(&self) -> u64 {
        self.notifications_dispatched.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> Vec<CallbackStatsSnapshot> {
        self.stats.lock().iter().map(|s| s.snapshot()).collect()
    }
}

impl Drop for NotifySubsystem {
    fn drop(&mut self) {
        if let Err(e) = self.queue.stop(None) {
            debug!("stopping notifier threads: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::Severity;
    use std::thread;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Collect(Arc<Mutex<Vec<Notification>>>);

    impl Notifier for Collect {
        fn notify(&mut self, n: &Notification) -> std::result::Result<(), CallbackError> {
            self.0.lock().push(n.clone());
            Ok(())
        }
    }

    #[test]
    fn test_notify_fills_time_and_labels() {
        let labels = LabelSet::from_pairs([("host", "global"), ("dc", "eu1")]).expect("labels");
        let subsystem = NotifySubsystem::new(labels);
        let sink = Collect::default();
        subsystem
            .register("collect", "", Box::new(sink.clone()))
            .expect("register");

        let n = Notification::new("disk_full", Severity::Failure)
            .with_label("host", "db1")
            .expect("label");
        subsystem.dispatch(n).expect("notify");

        let start = Instant::now();
        while sink.0.lock().is_empty() && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(2));
        }
        subsystem.unregister(Some("collect")).expect("stop");

        let seen = sink.0.lock();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].time.is_some());
        assert_eq!(seen[0].labels.get("host"), Some("db1"));
        assert_eq!(seen[0].labels.get("dc"), Some("eu1"));
        assert_eq!(subsystem.notifications_dispatched(), 1);
        assert_eq!(subsystem.stats().len(), 0);
    }

    #[test]
    fn test_notify_without_notifiers() {
        let subsystem = NotifySubsystem::default();
        assert!(subsystem
            .dispatch(Notification::new("x", Severity::Okay))
            .is_err());
    }

    #[test]
    fn test_drop_joins_notifier_threads() {
        let subsystem = NotifySubsystem::default();
        let sink = Collect::default();
        subsystem
            .register("collect", "", Box::new(sink.clone()))
            .expect("register");
        drop(subsystem);
        assert_eq!(Arc::strong_count(&sink.0), 1);
    }
}
