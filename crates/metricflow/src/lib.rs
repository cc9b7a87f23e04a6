// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! metricflow metric dispatch core
//!
//! Collectors hand metric families to a [`Pipeline`], which filters them,
//! updates a value cache and fans them out to output plugins running on
//! their own threads.
//!
//! # Features
//!
//! - **Metric model**: sorted label sets, typed values, families and
//!   notifications
//! - **Filter engine**: statement-based rewriting and routing of metrics
//! - **Dispatch queue**: bounded multi-consumer queue with random load
//!   shedding
//! - **Write/notify subsystems**: one thread per output plugin with
//!   per-plugin statistics
//!
//! # Quick Start
//!
//! ```no_run
//! use metricflow::{
//!     CallbackError, LabelSet, MetricFamily, MetricType, Pipeline, Value, WriteOptions, Writer,
//! };
//! use std::time::Duration;
//!
//! struct Print;
//!
//! impl Writer for Print {
//!     fn write(&mut self, family: &MetricFamily) -> Result<(), CallbackError> {
//!         println!("{} ({} metrics)", family.name, family.metrics.len());
//!         Ok(())
//!     }
//! }
//!
//! let pipeline = Pipeline::new(Duration::from_secs(10), LabelSet::new());
//! pipeline
//!     .write()
//!     .register("print", "", Box::new(Print), WriteOptions::default())
//!     .unwrap();
//!
//! let mut fam = MetricFamily::new("load", MetricType::Gauge);
//! fam.append_with(Value::Gauge(0.42), [("host", "db1")]).unwrap();
//! pipeline.dispatch_family(fam).unwrap();
//! pipeline.shutdown();
//! ```

pub mod cache;
pub mod complain;
pub mod config;
pub mod context;
pub mod error;
pub mod filter;
pub mod label;
pub mod matcher;
pub mod metric;
pub mod notify;
pub mod pipeline;
pub mod queue;
pub mod stats;
pub mod write;

pub use cache::{CacheEntry, MetricCache, ValueCache};
pub use complain::Complaint;
pub use config::{ConfigItem, ConfigValue};
pub use context::PluginContext;
pub use error::{ConfigError, Error, Result};
pub use filter::{Filter, FilterRegistry, FilterResult, WriteSink};
pub use label::{LabelPair, LabelSet};
pub use matcher::MetricMatch;
pub use metric::{
    Counter, Metric, MetricFamily, MetricFamilyList, MetricType, Notification, Severity, Value,
};
pub use notify::{Notifier, NotifierHandle, NotifySubsystem};
pub use pipeline::Pipeline;
pub use queue::{ConsumerId, Dequeued, DispatchQueue, QueueElement};
pub use stats::{CallbackStats, CallbackStatsSnapshot};
pub use write::{CallbackError, WriteOptions, WriteSubsystem, Writer, WriterHandle};
