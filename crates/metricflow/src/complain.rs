// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Rate-limited logging for conditions that tend to repeat.
//!
//! A [`Complaint`] logs the first occurrence of a problem and then backs off
//! exponentially (capped at one day). [`Complaint::release`] logs a recovery
//! message only if a complaint was active.

use parking_lot::Mutex;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::Level;

const MAX_INTERVAL: Duration = Duration::from_secs(86_400);
const DEFAULT_BASE: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
struct State {
    last: Option<Instant>,
    /// Zero when no complaint is active.
    interval: Duration,
}

/// Log suppression state for one recurring condition.
#[derive(Debug)]
pub struct Complaint {
    base: Duration,
    state: Mutex<State>,
}

impl Default for Complaint {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn log_at(level: Level, args: fmt::Arguments<'_>) {
    if level == Level::ERROR {
        tracing::error!("{}", args);
    } else if level == Level::WARN {
        tracing::warn!("{}", args);
    } else if level == Level::INFO {
        tracing::info!("{}", args);
    } else if level == Level::DEBUG {
        tracing::debug!("{}", args);
    } else {
        tracing::trace!("{}", args);
    }
}

impl Complaint {
    pub fn new() -> Self {
        Self::with_base_interval(DEFAULT_BASE)
    }

    /// Use `base` as the first back-off step.
    pub fn with_base_interval(base: Duration) -> Self {
        Self {
            base,
            state: Mutex::new(State::default()),
        }
    }

    /// Whether a complaint is currently active.
    pub fn is_active(&self) -> bool {
        !self.state.lock().interval.is_zero()
    }

    /// Log unless a previous complaint is still within its back-off window.
    /// Returns whether the message was logged.
    pub fn complain(&self, level: Level, args: fmt::Arguments<'_>) -> bool {
        let now = Instant::now();
        {
            let mut state = self.state.lock();
            if let Some(last) = state.last {
                if now.duration_since(last) < state.interval {
                    return false;
                }
            }
            state.last = Some(now);
            state.interval = if state.interval < self.base {
                self.base
            } else {
                (state.interval * 2).min(MAX_INTERVAL)
            };
        }
        log_at(level, args);
        true
    }

    /// Log only the first time until released.
    pub fn complain_once(&self, level: Level, args: fmt::Arguments<'_>) -> bool {
        {
            let mut state = self.state.lock();
            if !state.interval.is_zero() {
                return false;
            }
            state.interval = Duration::from_nanos(1);
        }
        log_at(level, args);
        true
    }

    /// Log a recovery message if a complaint is active and reset the state.
    pub fn release(&self, level: Level, args: fmt::Arguments<'_>) -> bool {
        {
            let mut state = self.state.lock();
            if state.interval.is_zero() {
                return false;
            }
            state.interval = Duration::ZERO;
            state.last = None;
        }
        log_at(level, args);
        true
    }
}
