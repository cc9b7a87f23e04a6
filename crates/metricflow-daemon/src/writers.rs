// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Built-in output plugins.

use crate::config::OutputFormat;
use chrono::{DateTime, SecondsFormat, Utc};
use metricflow::{
    CallbackError, Counter, Filter, Metric, MetricFamily, MetricFamilyList, Notification,
    Notifier, Severity, Value, Writer,
};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, SystemTime};

/// One JSON object per metric.
#[derive(Serialize)]
struct Record<'a> {
    name: &'a str,
    #[serde(flatten)]
    metric: &'a Metric,
}

fn format_time(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Render `name{labels} value time` into `out`.
pub fn format_metric(name: &str, metric: &Metric, out: &mut String) {
    out.push_str(name);
    if !metric.labels.is_empty() {
        out.push_str(&metric.labels.to_string());
    }
    out.push(' ');
    match &metric.value {
        Value::Counter(Counter::U64(v)) => out.push_str(&v.to_string()),
        value => match value.as_f64() {
            Some(v) => out.push_str(&v.to_string()),
            None => out.push_str(&serde_json::to_string(value).unwrap_or_default()),
        },
    }
    if let Some(time) = metric.time {
        out.push(' ');
        out.push_str(&format_time(time));
    }
}

/// Writes metrics as text or JSON lines to stdout, or to any stream in tests.
pub struct StdoutWriter {
    out: Box<dyn Write + Send>,
    format: OutputFormat,
    line: String,
}

impl StdoutWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self::with_output(format, Box::new(io::stdout()))
    }

    pub fn with_output(format: OutputFormat, out: Box<dyn Write + Send>) -> Self {
        Self {
            out,
            format,
            line: String::new(),
        }
    }
}

impl Writer for StdoutWriter {
    fn write(&mut self, family: &MetricFamily) -> Result<(), CallbackError> {
        for metric in &family.metrics {
            self.line.clear();
            match self.format {
                OutputFormat::Text => format_metric(&family.name, metric, &mut self.line),
                OutputFormat::Json => {
                    self.line = serde_json::to_string(&Record {
                        name: &family.name,
                        metric,
                    })?;
                }
            }
            self.line.push('\n');
            self.out.write_all(self.line.as_bytes())?;
        }
        self.out.flush()?;
        Ok(())
    }
}

/// Appends JSON lines to a file, flushed on the flush callback.
pub struct JsonFileWriter {
    out: BufWriter<File>,
}

impl JsonFileWriter {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self {
            out: BufWriter::new(file),
        })
    }
}

impl Writer for JsonFileWriter {
    fn write(&mut self, family: &MetricFamily) -> Result<(), CallbackError> {
        for metric in &family.metrics {
            serde_json::to_writer(
                &mut self.out,
                &Record {
                    name: &family.name,
                    metric,
                },
            )?;
            self.out.write_all(b"\n")?;
        }
        Ok(())
    }

    fn flush(&mut self, _timeout: Option<Duration>) -> Result<(), CallbackError> {
        self.out.flush()?;
        Ok(())
    }
}

/// Logs every metric at info level.
#[derive(Debug, Default)]
pub struct LogWriter {
    line: String,
}

impl Writer for LogWriter {
    fn write(&mut self, family: &MetricFamily) -> Result<(), CallbackError> {
        for metric in &family.metrics {
            self.line.clear();
            format_metric(&family.name, metric, &mut self.line);
            tracing::info!(family = %family.name, "{}", self.line);
        }
        Ok(())
    }
}

/// Logs notifications at a level following their severity.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&mut self, notification: &Notification) -> Result<(), CallbackError> {
        match notification.severity {
            Severity::Failure => tracing::error!("notification: {}", notification),
            Severity::Warning => tracing::warn!("notification: {}", notification),
            Severity::Okay => tracing::info!("notification: {}", notification),
        }
        Ok(())
    }
}

/// Runs a local filter on a copy of each family before the inner writer.
pub struct FilteredWriter {
    filter: Filter,
    inner: Box<dyn Writer>,
}

impl FilteredWriter {
    pub fn new(filter: Filter, inner: Box<dyn Writer>) -> Self {
        Self { filter, inner }
    }
}

impl Writer for FilteredWriter {
    fn write(&mut self, family: &MetricFamily) -> Result<(), CallbackError> {
        let mut list = MetricFamilyList::from_family(family.try_clone()?);
        self.filter.process(&mut list, None)?;
        for family in list.into_iter().filter(|fam| !fam.metrics.is_empty()) {
            self.inner.write(&family)?;
        }
        Ok(())
    }

    fn flush(&mut self, timeout: Option<Duration>) -> Result<(), CallbackError> {
        self.inner.flush(timeout)
    }
}
