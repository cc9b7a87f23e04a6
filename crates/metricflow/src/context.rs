// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-thread plugin context.
//!
//! The context names the plugin on whose behalf the current thread runs and
//! its collection interval. Queue elements capture the producer's context
//! and consumer threads restore it before invoking a callback.

use std::cell::RefCell;
use std::time::Duration;

/// Plugin context of the current thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginContext {
    pub name: Option<String>,
    pub interval: Option<Duration>,
}

impl PluginContext {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            interval: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }
}

thread_local! {
    static CONTEXT: RefCell<PluginContext> = RefCell::new(PluginContext::default());
}

/// Context of the calling thread.
pub fn current() -> PluginContext {
    CONTEXT.with(|ctx| ctx.borrow().clone())
}

/// Replace the context of the calling thread, returning the old one.
pub fn set(context: PluginContext) -> PluginContext {
    CONTEXT.with(|ctx| std::mem::replace(&mut *ctx.borrow_mut(), context))
}

/// Run `f` with `context` installed, restoring the previous context after.
pub fn scoped<R>(context: PluginContext, f: impl FnOnce() -> R) -> R {
    let previous = set(context);
    let result = f();
    set(previous);
    result
}
