// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Daemon configuration.
//!
//! Loaded from TOML. Filter bodies live in separate block-config files
//! listed in `filter_files`.

use metricflow::label::is_valid_label_name;
use metricflow::{Filter, FilterRegistry, LabelSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum DaemonConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Default collection and flush interval (seconds).
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Write queue high watermark, 0 for unbounded.
    #[serde(default)]
    pub write_queue_limit_high: usize,

    /// Write queue low watermark, defaults to half the high watermark.
    #[serde(default)]
    pub write_queue_limit_low: Option<usize>,

    #[serde(default)]
    pub notify_queue_limit_high: usize,

    #[serde(default)]
    pub notify_queue_limit_low: Option<usize>,

    /// Global filter run before the value cache.
    #[serde(default)]
    pub pre_cache_filter: Option<String>,

    /// Global filter run after the value cache.
    #[serde(default)]
    pub post_cache_filter: Option<String>,

    /// Block-config files defining global filters.
    #[serde(default)]
    pub filter_files: Vec<PathBuf>,

    /// Labels added to every metric and notification.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Dispatch the daemon's own queue and plugin statistics.
    #[serde(default = "default_true")]
    pub collect_internal_stats: bool,

    #[serde(default)]
    pub writers: Vec<WriterConfig>,

    #[serde(default)]
    pub notifiers: Vec<NotifierConfig>,
}

fn default_interval() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            log_level: default_log_level(),
            write_queue_limit_high: 0,
            write_queue_limit_low: None,
            notify_queue_limit_high: 0,
            notify_queue_limit_low: None,
            pre_cache_filter: None,
            post_cache_filter: None,
            filter_files: Vec::new(),
            labels: BTreeMap::new(),
            collect_internal_stats: true,
            writers: Vec::new(),
            notifiers: Vec::new(),
        }
    }
}

/// Output plugin type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriterKind {
    Stdout,
    JsonFile,
    Log,
}

impl WriterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriterKind::Stdout => "stdout",
            WriterKind::JsonFile => "json_file",
            WriterKind::Log => "log",
        }
    }
}

/// Line format of the stdout writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// One `[[writers]]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    #[serde(rename = "type")]
    pub kind: WriterKind,

    /// Instance name, appended to the type as `type/name`.
    #[serde(default)]
    pub name: Option<String>,

    /// `stdout` only.
    #[serde(default)]
    pub format: OutputFormat,

    /// `json_file` only.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Flush interval (seconds); 0 selects the daemon interval.
    #[serde(default)]
    pub flush_interval_secs: Option<u64>,

    /// File holding a local `filter { ... }` block applied before writing.
    #[serde(default)]
    pub filter: Option<PathBuf>,
}

impl WriterConfig {
    pub fn new(kind: WriterKind) -> Self {
        Self {
            kind,
            name: None,
            format: OutputFormat::Text,
            path: None,
            flush_interval_secs: None,
            filter: None,
        }
    }

    /// Name the writer registers under.
    pub fn full_name(&self) -> String {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => format!("{}/{}", self.kind.as_str(), name),
            _ => self.kind.as_str().to_string(),
        }
    }

    pub fn flush_interval(&self) -> Option<Duration> {
        self.flush_interval_secs.map(Duration::from_secs)
    }
}

/// Notification plugin type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifierKind {
    Log,
}

/// One `[[notifiers]]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(rename = "type")]
    pub kind: NotifierKind,

    #[serde(default)]
    pub name: Option<String>,
}

impl DaemonConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, DaemonConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), DaemonConfigError> {
        if self.interval_secs == 0 {
            return Err(DaemonConfigError::Invalid(
                "interval_secs must be greater than zero".into(),
            ));
        }

        check_limits("write", self.write_queue_limit_high, self.write_queue_limit_low)?;
        check_limits(
            "notify",
            self.notify_queue_limit_high,
            self.notify_queue_limit_low,
        )?;

        for name in self.labels.keys() {
            if !is_valid_label_name(name) || name == "__name__" {
                return Err(DaemonConfigError::Invalid(format!(
                    "Invalid label name '{}'",
                    name
                )));
            }
        }

        let mut seen = HashSet::new();
        for writer in &self.writers {
            let name = writer.full_name();
            if !seen.insert(name.clone()) {
                return Err(DaemonConfigError::Invalid(format!(
                    "Writer '{}' is configured twice",
                    name
                )));
            }
            if writer.kind == WriterKind::JsonFile && writer.path.is_none() {
                return Err(DaemonConfigError::Invalid(format!(
                    "Writer '{}' requires a path",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Global labels as a label set.
    pub fn label_set(&self) -> Result<LabelSet, DaemonConfigError> {
        LabelSet::from_pairs(self.labels.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .map_err(|e| DaemonConfigError::Invalid(format!("labels: {}", e)))
    }

    /// Compile every filter file into one registry.
    pub fn load_filters(&self) -> Result<FilterRegistry, DaemonConfigError> {
        let mut registry = FilterRegistry::new();
        for path in &self.filter_files {
            registry
                .load_file(path)
                .map_err(|e| DaemonConfigError::Invalid(e.to_string()))?;
        }
        self.validate_filters(&registry)?;
        Ok(registry)
    }

    /// Check that the cache filters name loaded filters.
    pub fn validate_filters(&self, registry: &FilterRegistry) -> Result<(), DaemonConfigError> {
        for (option, name) in [
            ("pre_cache_filter", &self.pre_cache_filter),
            ("post_cache_filter", &self.post_cache_filter),
        ] {
            if let Some(name) = name {
                if !registry.contains(name) {
                    return Err(DaemonConfigError::Invalid(format!(
                        "{}: filter '{}' not found",
                        option, name
                    )));
                }
            }
        }
        Ok(())
    }
}

fn check_limits(queue: &str, high: usize, low: Option<usize>) -> Result<(), DaemonConfigError> {
    match low {
        Some(low) if high == 0 && low != 0 => Err(DaemonConfigError::Invalid(format!(
            "{}_queue_limit_low requires {}_queue_limit_high",
            queue, queue
        ))),
        Some(low) if low > high => Err(DaemonConfigError::Invalid(format!(
            "{}_queue_limit_low ({}) exceeds {}_queue_limit_high ({})",
            queue, low, queue, high
        ))),
        _ => Ok(()),
    }
}

/// Compile a file holding one local `filter { ... }` block.
pub fn load_local_filter(path: &Path) -> Result<Filter, DaemonConfigError> {
    let items = metricflow::config::parse_file(path)
        .map_err(|e| DaemonConfigError::Invalid(e.to_string()))?;
    match items.as_slice() {
        [item] if item.is("filter") => {
            Filter::local(item).map_err(|e| DaemonConfigError::Invalid(e.to_string()))
        }
        _ => Err(DaemonConfigError::Invalid(format!(
            "{}: expected exactly one 'filter' block",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config: DaemonConfig = toml::from_str("").expect("parse");
        assert_eq!(config.interval_secs, 10);
        assert_eq!(config.log_level, "info");
        assert!(config.collect_internal_stats);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_writers_and_notifiers() {
        let config: DaemonConfig = toml::from_str(
            r#"
            interval_secs = 5
            write_queue_limit_high = 100

            [labels]
            instance = "node1"

            [[writers]]
            type = "stdout"
            format = "json"

            [[writers]]
            type = "json_file"
            name = "archive"
            path = "/tmp/metrics.json"
            flush_interval_secs = 0

            [[notifiers]]
            type = "log"
            "#,
        )
        .expect("parse");
        config.validate().expect("valid");

        assert_eq!(config.writers.len(), 2);
        assert_eq!(config.writers[0].format, OutputFormat::Json);
        assert_eq!(config.writers[1].full_name(), "json_file/archive");
        assert_eq!(config.writers[1].flush_interval(), Some(Duration::ZERO));
        assert_eq!(config.notifiers[0].kind, NotifierKind::Log);
        assert_eq!(
            config.label_set().expect("labels").get("instance"),
            Some("node1")
        );
    }

    #[test]
    fn test_validation_errors() {
        let bad = [
            "interval_secs = 0",
            "write_queue_limit_high = 10\nwrite_queue_limit_low = 20",
            "notify_queue_limit_low = 5",
            "[labels]\n\"9bad\" = \"x\"",
            "[[writers]]\ntype = \"log\"\n[[writers]]\ntype = \"log\"",
            "[[writers]]\ntype = \"json_file\"",
        ];
        for text in bad {
            let config: DaemonConfig = toml::from_str(text).expect("parse");
            assert!(
                matches!(config.validate(), Err(DaemonConfigError::Invalid(_))),
                "accepted {:?}",
                text
            );
        }
    }

    #[test]
    fn test_filter_files() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "filter \"pre\" {{\n  label-unset \"tmp\"\n}}").expect("write");

        let mut config = DaemonConfig {
            filter_files: vec![file.path().to_path_buf()],
            pre_cache_filter: Some("pre".into()),
            ..Default::default()
        };
        let registry = config.load_filters().expect("filters");
        assert_eq!(registry.names(), vec!["pre"]);

        config.post_cache_filter = Some("missing".into());
        assert!(config.validate_filters(&registry).is_err());
    }

    #[test]
    fn test_local_filter_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "filter {{\n  drop\n}}").expect("write");
        let filter = load_local_filter(file.path()).expect("filter");
        assert_eq!(filter.len(), 1);

        let mut named = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(named, "filter \"x\" {{\n  drop\n}}").expect("write");
        assert!(load_local_filter(named.path()).is_err());
    }
}
