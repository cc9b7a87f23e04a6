// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded broadcast queue with one cursor per consumer.
//!
//! All consumers walk the same chain of elements. Each element is stored
//! once together with the number of consumers that still have to pass it;
//! a consumer's view is always a suffix of the chain, described by its
//! cursor and its queue length.
//!
//! # Admission control
//!
//! When the slowest consumer holds more than `limit_high` elements, random
//! elements are dropped from positions `limit_low..len` of its view
//! (position 0 is the newest element) until it is back at `limit_high`.
//! Consumers that stay below `limit_low` never lose elements.

use crate::complain::Complaint;
use crate::context::{self, PluginContext};
use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, Level};

/// Element shared by all consumers.
#[derive(Debug)]
pub struct QueueElement<T> {
    /// Consumer this element is addressed to, `None` for every consumer.
    pub plugin: Option<String>,
    /// Plugin context of the producer.
    pub context: PluginContext,
    pub payload: T,
}

impl<T> QueueElement<T> {
    /// Whether `consumer` should act on this element.
    pub fn is_for(&self, consumer: &str) -> bool {
        match &self.plugin {
            None => true,
            Some(plugin) => plugin.eq_ignore_ascii_case(consumer),
        }
    }
}

/// Result of [`DispatchQueue::dequeue`].
#[derive(Debug)]
pub enum Dequeued<T> {
    Element(Arc<QueueElement<T>>),
    /// Nothing was available after waiting once.
    Empty,
    /// The consumer has been removed from the queue.
    Stopped,
}

/// Opaque consumer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(u64);

struct Node<T> {
    element: Arc<QueueElement<T>>,
    refs: usize,
}

struct Consumer {
    id: ConsumerId,
    name: String,
    /// Sequence number of the next element to deliver.
    cursor: u64,
    queue_length: usize,
    handle: Option<JoinHandle<()>>,
}

struct State<T> {
    chain: BTreeMap<u64, Node<T>>,
    next_seq: u64,
    next_id: u64,
    consumers: Vec<Consumer>,
    limit_high: usize,
    limit_low: usize,
    dropped: u64,
    rng: fastrand::Rng,
}

impl<T> State<T> {
    /// Release `consumer`'s references to everything it has not consumed.
    fn release(&mut self, consumer: &Consumer) {
        let keys: Vec<u64> = self.chain.range(consumer.cursor..).map(|(k, _)| *k).collect();
        for key in keys {
            if let Some(node) = self.chain.get_mut(&key) {
                node.refs -= 1;
                if node.refs == 0 {
                    self.chain.remove(&key);
                }
            }
        }
    }

    /// Drop random elements until the slowest consumer is within limits.
    /// Returns the number of elements dropped.
    fn enforce_limits(&mut self) -> u64 {
        let mut dropped = 0;
        if self.limit_high == 0 {
            return 0;
        }
        loop {
            let slowest = self
                .consumers
                .iter()
                .map(|c| c.queue_length)
                .max()
                .unwrap_or(0);
            if slowest <= self.limit_high {
                return dropped;
            }

            let drop_pos = self.rng.usize(..slowest - self.limit_low) + self.limit_low;

            // The chain holds exactly the slowest consumer's view.
            let Some(key) = self.chain.keys().rev().nth(drop_pos).copied() else {
                error!("dispatch queue chain shorter than its slowest consumer");
                return dropped;
            };
            let Some(mut node) = self.chain.remove(&key) else {
                return dropped;
            };

            for consumer in &mut self.consumers {
                // Consumers that already passed the element keep their length.
                if drop_pos < consumer.queue_length {
                    consumer.queue_length -= 1;
                    node.refs -= 1;
                }
            }
            debug_assert_eq!(node.refs, 0);

            self.dropped += 1;
            dropped += 1;
        }
    }
}

/// Multi-consumer dispatch queue shared by the write and notify paths.
pub struct DispatchQueue<T> {
    kind: &'static str,
    state: Mutex<State<T>>,
    cond: Condvar,
    no_consumers: Complaint,
    overflow: Complaint,
}

impl<T: Send + Sync + 'static> DispatchQueue<T> {
    /// Create an unbounded queue. `kind` names the queue in log messages.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            state: Mutex::new(State {
                chain: BTreeMap::new(),
                next_seq: 0,
                next_id: 0,
                consumers: Vec::new(),
                limit_high: 0,
                limit_low: 0,
                dropped: 0,
                rng: fastrand::Rng::new(),
            }),
            cond: Condvar::new(),
            no_consumers: Complaint::new(),
            overflow: Complaint::new(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Set the admission limits. `limit_high == 0` disables them and
    /// `limit_low` defaults to half of `limit_high`.
    pub fn set_limits(&self, limit_high: usize, limit_low: Option<usize>) {
        let mut low = limit_low.unwrap_or(limit_high / 2);
        if low > limit_high {
            error!(
                "{}-queue-limit-low must not be larger than {}-queue-limit-high.",
                self.kind, self.kind
            );
            low = limit_high;
        }
        let mut state = self.state.lock();
        state.limit_high = limit_high;
        state.limit_low = low;
    }

    pub fn limits(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.limit_high, state.limit_low)
    }

    /// Seed the drop position generator.
    pub fn seed(&self, seed: u64) {
        self.state.lock().rng = fastrand::Rng::with_seed(seed);
    }

    /// Register a consumer that is driven by the caller.
    ///
    /// The consumer sees every element enqueued from now on.
    pub fn register(&self, name: &str) -> ConsumerId {
        let mut state = self.state.lock();
        let id = ConsumerId(state.next_id);
        state.next_id += 1;
        let cursor = state.next_seq;
        state.consumers.push(Consumer {
            id,
            name: name.to_string(),
            cursor,
            queue_length: 0,
            handle: None,
        });
        id
    }

    /// Register a consumer and run `body` for it on a dedicated thread
    /// named after the consumer.
    pub fn spawn<F>(self: &Arc<Self>, name: &str, body: F) -> Result<ConsumerId>
    where
        F: FnOnce(ConsumerId) + Send + 'static,
    {
        let id = self.register(name);
        let spawned = thread::Builder::new()
            .name(name.chars().take(15).collect())
            .spawn(move || body(id));
        match spawned {
            Ok(handle) => {
                let mut state = self.state.lock();
                if let Some(consumer) = state.consumers.iter_mut().find(|c| c.id == id) {
                    consumer.handle = Some(handle);
                }
                Ok(id)
            }
            Err(e) => {
                error!("Failed to spawn {} thread '{}': {}", self.kind, name, e);
                let mut state = self.state.lock();
                if let Some(pos) = state.consumers.iter().position(|c| c.id == id) {
                    let consumer = state.consumers.remove(pos);
                    state.release(&consumer);
                }
                Err(Error::ThreadSpawn(e))
            }
        }
    }

    /// Append `payloads` for `plugin` (or every consumer when `None`).
    ///
    /// Fails with `NoConsumers` when nobody is registered; the payloads are
    /// discarded in that case.
    pub fn enqueue(&self, plugin: Option<&str>, payloads: Vec<T>) -> Result<()> {
        if payloads.is_empty() {
            return Err(Error::InvalidArgument("nothing to enqueue".into()));
        }
        let context = context::current();
        let num = payloads.len();

        let dropped = {
            let mut state = self.state.lock();

            if state.consumers.is_empty() {
                drop(state);
                self.no_consumers.complain_once(
                    Level::WARN,
                    format_args!(
                        "No {} callback has been registered. Please load at least one \
                         output plugin, if you want the collected data to be stored.",
                        self.kind
                    ),
                );
                return Err(Error::NoConsumers { kind: self.kind });
            }

            let refs = state.consumers.len();
            for payload in payloads {
                let seq = state.next_seq;
                state.next_seq += 1;
                let element = Arc::new(QueueElement {
                    plugin: plugin.map(str::to_string),
                    context: context.clone(),
                    payload,
                });
                state.chain.insert(seq, Node { element, refs });
            }
            for consumer in &mut state.consumers {
                consumer.queue_length += num;
            }

            let dropped = state.enforce_limits();
            self.cond.notify_all();
            dropped
        };

        if dropped > 0 {
            self.overflow.complain(
                Level::WARN,
                format_args!(
                    "{} queue over its high limit, dropped {} element(s)",
                    self.kind, dropped
                ),
            );
        }
        Ok(())
    }

    /// Take the next element for `consumer`.
    ///
    /// When nothing is pending the call waits once on the queue condition
    /// (until `deadline` if given) and returns `Empty`.
    pub fn dequeue(&self, consumer: ConsumerId, deadline: Option<Instant>) -> Dequeued<T> {
        let mut state = self.state.lock();

        let Some(idx) = state.consumers.iter().position(|c| c.id == consumer) else {
            return Dequeued::Stopped;
        };
        let cursor = state.consumers[idx].cursor;

        let next = state.chain.range_mut(cursor..).next().map(|(seq, node)| {
            node.refs -= 1;
            (*seq, node.element.clone(), node.refs == 0)
        });

        match next {
            Some((seq, element, unreferenced)) => {
                if unreferenced {
                    state.chain.remove(&seq);
                }
                let c = &mut state.consumers[idx];
                c.cursor = seq + 1;
                c.queue_length -= 1;
                Dequeued::Element(element)
            }
            None => {
                match deadline {
                    Some(deadline) => {
                        self.cond.wait_until(&mut state, deadline);
                    }
                    None => self.cond.wait(&mut state),
                }
                if state.consumers.iter().any(|c| c.id == consumer) {
                    Dequeued::Empty
                } else {
                    Dequeued::Stopped
                }
            }
        }
    }

    /// Stop the consumer called `name` (case-insensitive) or every consumer.
    ///
    /// Threads are woken and joined; references they still held are
    /// released. Fails with `NotFound` for an unknown name.
    pub fn stop(&self, name: Option<&str>) -> Result<()> {
        let stopped: Vec<Consumer> = {
            let mut state = self.state.lock();
            let (stop, keep): (Vec<Consumer>, Vec<Consumer>) = std::mem::take(&mut state.consumers)
                .into_iter()
                .partition(|c| name.map_or(true, |n| c.name.eq_ignore_ascii_case(n)));
            state.consumers = keep;
            for consumer in &stop {
                state.release(consumer);
            }
            self.cond.notify_all();
            stop
        };

        if stopped.is_empty() {
            if let Some(name) = name {
                return Err(Error::NotFound(format!("{} consumer '{}'", self.kind, name)));
            }
        }

        for consumer in stopped {
            debug!("{}: stopping {} consumer", consumer.name, self.kind);
            let Some(handle) = consumer.handle else {
                continue;
            };
            if handle.thread().id() == thread::current().id() {
                continue;
            }
            if handle.join().is_err() {
                error!("{} thread '{}' panicked", self.kind, consumer.name);
            }
        }
        Ok(())
    }

    /// Length of the longest consumer queue.
    pub fn queue_length(&self) -> usize {
        self.state
            .lock()
            .consumers
            .iter()
            .map(|c| c.queue_length)
            .max()
            .unwrap_or(0)
    }

    /// Queue length of a single consumer.
    pub fn consumer_length(&self, consumer: ConsumerId) -> Option<usize> {
        self.state
            .lock()
            .consumers
            .iter()
            .find(|c| c.id == consumer)
            .map(|c| c.queue_length)
    }

    /// Total number of elements dropped by admission control.
    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }

    /// Names of the registered consumers.
    pub fn consumers(&self) -> Vec<String> {
        self.state
            .lock()
            .consumers
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    /// Number of elements still linked in the chain.
    pub fn live_len(&self) -> usize {
        self.state.lock().chain.len()
    }
}
