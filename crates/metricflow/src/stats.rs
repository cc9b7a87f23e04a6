// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-plugin callback statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters updated by a consumer thread after every callback.
#[derive(Debug)]
pub struct CallbackStats {
    plugin: String,
    time_ns: AtomicU64,
    calls: AtomicU64,
    failures: AtomicU64,
}

impl CallbackStats {
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            time_ns: AtomicU64::new(0),
            calls: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Record one callback that took `elapsed`.
    pub fn record(&self, elapsed: Duration, ok: bool) {
        let ns = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.time_ns.fetch_add(ns, Ordering::Relaxed);
        self.calls.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> CallbackStatsSnapshot {
        CallbackStatsSnapshot {
            plugin: self.plugin.clone(),
            time: Duration::from_nanos(self.time_ns.load(Ordering::Relaxed)),
            calls: self.calls.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`CallbackStats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackStatsSnapshot {
    pub plugin: String,
    /// Total time spent in the callback.
    pub time: Duration,
    pub calls: u64,
    pub failures: u64,
}

impl CallbackStatsSnapshot {
    /// Mean callback duration, zero before the first call.
    pub fn average(&self) -> Duration {
        if self.calls == 0 {
            return Duration::ZERO;
        }
        self.time / u32::try_from(self.calls).unwrap_or(u32::MAX)
    }
}
