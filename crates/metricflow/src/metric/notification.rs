// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Notifications: named events with a severity.

use super::{epoch_secs, Metric, MetricFamily};
use crate::error::Result;
use crate::label::LabelSet;
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::SystemTime;

/// Notification severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Failure,
    Warning,
    Okay,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Failure => "FAILURE",
            Severity::Warning => "WARNING",
            Severity::Okay => "OKAY",
        }
    }
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

/// An event routed through the notify queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub name: String,
    pub severity: Severity,
    #[serde(serialize_with = "serialize_time")]
    pub time: Option<SystemTime>,
    pub labels: LabelSet,
    pub annotations: LabelSet,
}

impl Notification {
    pub fn new(name: impl Into<String>, severity: Severity) -> Self {
        Self {
            name: name.into(),
            severity,
            time: None,
            labels: LabelSet::new(),
            annotations: LabelSet::new(),
        }
    }

    /// Notification about one metric of a family, carrying its labels.
    pub fn for_metric(severity: Severity, family: &MetricFamily, metric: &Metric) -> Result<Self> {
        Ok(Self {
            name: family.name.clone(),
            severity,
            time: metric.time,
            labels: metric.labels.try_clone()?,
            annotations: LabelSet::new(),
        })
    }

    pub fn with_label(mut self, name: &str, value: &str) -> Result<Self> {
        self.labels.set(name, value)?;
        Ok(self)
    }

    pub fn with_annotation(mut self, name: &str, value: &str) -> Result<Self> {
        self.annotations.set(name, value)?;
        Ok(self)
    }

    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            name: self.name.clone(),
            severity: self.severity,
            time: self.time,
            labels: self.labels.try_clone()?,
            annotations: self.annotations.try_clone()?,
        })
    }
}

/// `name{labels}{annotations} SEVERITY time`
impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let time = self.time.map(epoch_secs).unwrap_or(0.0);
        write!(
            f,
            "{}{}{} {} {:.3}",
            self.name,
            self.labels,
            self.annotations,
            self.severity.as_str(),
            time
        )
    }
}
