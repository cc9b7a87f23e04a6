// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Filter statement engine.
//!
//! A filter is a list of statements compiled from a `filter` configuration
//! block and evaluated once per metric. Statements can branch on a metric
//! selector, drop the metric, rewrite its name and labels, call other named
//! filters or write the metric out immediately.
//!
//! ```text
//! filter "normalize" {
//!     if "http_requests{region=~\"us-.*\"}" {
//!         label-value-match "region" /(us-\w+)/ {
//!             label-set "env" "$1"
//!         }
//!     } else {
//!         metric-rename "new_${region}"
//!     }
//! }
//! ```
//!
//! Global filters are kept in a [`FilterRegistry`] and may be referenced by
//! name from `call` statements and from the pipeline. Local filters are
//! attached to a single plugin and cannot `call` or `write`.

mod eval;
mod stmt;
mod template;

pub use template::Template;

use crate::config::{self, ConfigItem};
use crate::error::{ConfigError, Error, Result};
use crate::metric::{Metric, MetricFamily, MetricFamilyList};
use eval::Evaluator;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use stmt::{Scope, Stmt};
use tracing::debug;

/// Outcome of evaluating a filter against one metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterResult {
    /// All statements ran.
    Continue,
    /// `stop`: no further statements, the metric is kept.
    Stop,
    /// `return`: leave the current filter.
    Return,
    /// `drop`: discard the metric.
    Drop,
}

/// Destination of the `write` statement.
pub trait WriteSink: Send + Sync {
    /// Hand `family` to `plugin`, or to every writer when `None`.
    fn write_family(&self, plugin: Option<&str>, family: MetricFamily) -> Result<()>;
}

/// Compiled filter.
pub struct Filter {
    name: Option<String>,
    stmts: RwLock<Vec<Stmt>>,
}

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filter")
            .field("name", &self.name)
            .field("statements", &self.len())
            .finish()
    }
}

impl Filter {
    fn new(name: Option<&str>) -> Self {
        Self {
            name: name.map(str::to_string),
            stmts: RwLock::new(Vec::new()),
        }
    }

    /// Compile a local `filter { ... }` block.
    pub fn local(item: &ConfigItem) -> std::result::Result<Self, ConfigError> {
        let filter = Self::new(None);
        filter.configure_local(item)?;
        Ok(filter)
    }

    /// Append the statements of another local `filter { ... }` block.
    pub fn configure_local(&self, item: &ConfigItem) -> std::result::Result<(), ConfigError> {
        if !item.values.is_empty() {
            return Err(item.error("Local 'filter' cannot have arguments"));
        }
        let stmts = stmt::compile_block(item.children(), Scope::Local)?;
        self.stmts.write().extend(stmts);
        Ok(())
    }

    /// Name of a global filter, `None` for a local one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Number of top-level statements.
    pub fn len(&self) -> usize {
        self.stmts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evaluate the filter against one metric. `name` is the working family
    /// name and may be rewritten.
    pub fn evaluate(
        &self,
        family: &MetricFamily,
        name: &mut String,
        metric: &mut Metric,
        sink: Option<&dyn WriteSink>,
    ) -> FilterResult {
        let stmts = self.stmts.read_recursive();
        Evaluator::new(sink).run_metric(&stmts, family, name, metric)
    }

    /// Run the filter over the single family in `list`.
    ///
    /// Dropped metrics are removed. Metrics whose name was rewritten move to
    /// the family of that name, which is appended to `list` with the same
    /// type when missing. Remaining metrics keep their order.
    pub fn process(&self, list: &mut MetricFamilyList, sink: Option<&dyn WriteSink>) -> Result<()> {
        if list.len() != 1 {
            return Err(Error::InvalidArgument(format!(
                "filter expects exactly one family, got {}",
                list.len()
            )));
        }
        let Some(family) = list.get_mut(0) else {
            return Ok(());
        };
        let header = family.header();
        let metrics = std::mem::take(&mut family.metrics);

        let stmts = self.stmts.read_recursive();
        let mut eval = Evaluator::new(sink);
        let mut kept = Vec::with_capacity(metrics.len());
        let mut moved = Vec::new();

        for mut metric in metrics {
            let mut name = header.name.clone();
            if eval.run_metric(&stmts, &header, &mut name, &mut metric) == FilterResult::Drop {
                continue;
            }
            if name == header.name {
                kept.push(metric);
            } else {
                moved.push((name, metric));
            }
        }
        drop(stmts);

        if let Some(family) = list.get_mut(0) {
            family.metrics = kept;
        }
        for (name, metric) in moved {
            let idx = match list.position(&name) {
                Some(idx) => idx,
                None => {
                    debug!("filter: new family '{}' from '{}'", name, header.name);
                    list.push(MetricFamily::new(name, header.metric_type));
                    list.len() - 1
                }
            };
            if let Some(family) = list.get_mut(idx) {
                family.metrics.push(metric);
            }
        }
        Ok(())
    }
}

/// Named global filters.
#[derive(Debug, Default)]
pub struct FilterRegistry {
    filters: HashMap<String, Arc<Filter>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a global `filter "name" { ... }` block. A second block with
    /// the same name appends to the existing filter.
    pub fn configure(&mut self, item: &ConfigItem) -> std::result::Result<(), ConfigError> {
        let name = item
            .single_string()
            .ok_or_else(|| item.error("Global 'filter' blocks require exactly one string argument"))?;

        let created = !self.filters.contains_key(name);
        let filter = Arc::clone(
            self.filters
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Filter::new(Some(name)))),
        );

        match stmt::compile_block(item.children(), Scope::Global(self)) {
            Ok(stmts) => {
                filter.stmts.write().extend(stmts);
                Ok(())
            }
            Err(e) => {
                if created {
                    self.filters.remove(name);
                }
                Err(e)
            }
        }
    }

    /// Configure every top-level `filter` block in `items`.
    pub fn load_items(&mut self, items: &[ConfigItem]) -> std::result::Result<(), ConfigError> {
        for item in items {
            if !item.is("filter") {
                return Err(item.error(format!("Option '{}' is not allowed here", item.key)));
            }
            self.configure(item)?;
        }
        Ok(())
    }

    /// Parse a filter file and configure its blocks.
    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) -> std::result::Result<(), ConfigError> {
        let items = config::parse_file(path)?;
        self.load_items(&items)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Filter>> {
        self.filters.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    /// Sorted filter names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.filters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::eval::{self, Evaluator};
    use super::*;
    use crate::config::parse_str;
    use crate::label::LabelSet;
    use crate::metric::{MetricType, Value};
    use parking_lot::Mutex;

    fn registry(text: &str) -> FilterRegistry {
        let mut registry = FilterRegistry::new();
        let items = parse_str(text, "filters.conf").expect("parse");
        registry.load_items(&items).expect("configure");
        registry
    }

    fn gauge_family(name: &str, labels: &[&[(&str, &str)]]) -> MetricFamily {
        let mut fam = MetricFamily::new(name, MetricType::Gauge);
        for (i, pairs) in labels.iter().enumerate() {
            fam.append_with(Value::Gauge(i as f64), pairs.iter().copied())
                .expect("append");
        }
        fam
    }

    #[derive(Default)]
    struct Capture(Mutex<Vec<(Option<String>, MetricFamily)>>);

    impl WriteSink for Capture {
        fn write_family(&self, plugin: Option<&str>, family: MetricFamily) -> Result<()> {
            self.0.lock().push((plugin.map(str::to_string), family));
            Ok(())
        }
    }

    #[test]
    fn test_drop_and_keep_order() {
        let reg = registry("filter \"f\" {\n if \"cpu{mode=\\\"idle\\\"}\" {\n drop\n }\n}\n");
        let filter = reg.get("f").expect("filter");
        let mut list = MetricFamilyList::from_family(gauge_family(
            "cpu",
            &[&[("mode", "user")], &[("mode", "idle")], &[("mode", "system")]],
        ));
        filter.process(&mut list, None).expect("process");
        assert_eq!(list.len(), 1);
        let modes: Vec<_> = list.iter().next().expect("family").metrics.iter()
            .map(|m| m.labels.get("mode").expect("mode").to_string())
            .collect();
        assert_eq!(modes, vec!["user", "system"]);
    }

    #[test]
    fn test_stop_keeps_metric_and_skips_rest() {
        let reg = registry("filter \"f\" {\n stop\n label-set \"x\" \"y\"\n}\n");
        let filter = reg.get("f").expect("filter");
        let mut list = MetricFamilyList::from_family(gauge_family("m", &[&[]]));
        filter.process(&mut list, None).expect("process");
        let fam = list.get(0).expect("family");
        assert_eq!(fam.metrics.len(), 1);
        assert!(fam.metrics[0].labels.is_empty());
    }

    #[test]
    fn test_unless_elif_else() {
        let reg = registry(
            "filter \"f\" {\n\
             unless \"m{a=\\\"1\\\"}\" {\n label-set \"branch\" \"unless\"\n }\n\
             elif \"m{b=\\\"2\\\"}\" {\n label-set \"branch\" \"elif\"\n }\n\
             else {\n label-set \"branch\" \"else\"\n }\n}\n",
        );
        let filter = reg.get("f").expect("filter");
        let mut list = MetricFamilyList::from_family(gauge_family(
            "m",
            &[&[("a", "0")], &[("a", "1"), ("b", "2")], &[("a", "1")]],
        ));
        filter.process(&mut list, None).expect("process");
        let branches: Vec<_> = list.get(0).expect("family").metrics.iter()
            .map(|m| m.labels.get("branch").expect("branch").to_string())
            .collect();
        assert_eq!(branches, vec!["unless", "elif", "else"]);
    }

    #[test]
    fn test_call_propagates_drop_but_not_return() {
        let reg = registry(
            "filter \"inner\" {\n if \"{kill=\\\"yes\\\"}\" {\n drop\n }\n return\n}\n\
             filter \"outer\" {\n call \"inner\"\n label-set \"after\" \"call\"\n}\n",
        );
        let outer = reg.get("outer").expect("filter");
        let mut list = MetricFamilyList::from_family(gauge_family(
            "m",
            &[&[("kill", "yes")], &[("kill", "no")]],
        ));
        outer.process(&mut list, None).expect("process");
        let fam = list.get(0).expect("family");
        assert_eq!(fam.metrics.len(), 1);
        assert_eq!(fam.metrics[0].labels.get("after"), Some("call"));
    }

    #[test]
    fn test_global_filter_defined_twice_appends() {
        let reg = registry(
            "filter \"f\" {\n label-set \"a\" \"1\"\n}\nfilter \"f\" {\n label-set \"b\" \"2\"\n}\n",
        );
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get("f").expect("filter").len(), 2);
    }

    #[test]
    fn test_failed_definition_is_not_registered() {
        let mut reg = FilterRegistry::new();
        let items = parse_str("filter \"bad\" {\n metric-sub /(/ \"x\"\n}\n", "f.conf")
            .expect("parse");
        let err = reg.load_items(&items).expect_err("bad regex");
        assert_eq!(err.line, 2);
        assert!(err.to_string().ends_with("in f.conf:2"));
        assert!(!reg.contains("bad"));
    }

    #[test]
    fn test_label_allow_and_ignore() {
        let reg = registry(
            "filter \"allow\" {\n label-allow \"host\" /^dc_/\n}\n\
             filter \"ignore\" {\n label-ignore /^tmp/\n}\n",
        );
        let labels = [("host", "a"), ("dc_zone", "z"), ("tmp_id", "1"), ("other", "o")];

        let mut list = MetricFamilyList::from_family(gauge_family("m", &[&labels]));
        reg.get("allow").expect("allow").process(&mut list, None).expect("process");
        let kept = &list.get(0).expect("family").metrics[0].labels;
        assert_eq!(kept, &LabelSet::from_pairs([("dc_zone", "z"), ("host", "a")]).expect("set"));

        let mut list = MetricFamilyList::from_family(gauge_family("m", &[&labels]));
        reg.get("ignore").expect("ignore").process(&mut list, None).expect("process");
        let kept = &list.get(0).expect("family").metrics[0].labels;
        assert!(!kept.contains("tmp_id"));
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn test_label_sub_does_not_clobber() {
        let reg = registry("filter \"f\" {\n label-gsub /^old_/ \"\"\n}\n");
        let mut list = MetricFamilyList::from_family(gauge_family(
            "m",
            &[&[("old_host", "a"), ("old_zone", "z"), ("zone", "keep")]],
        ));
        reg.get("f").expect("filter").process(&mut list, None).expect("process");
        let labels = &list.get(0).expect("family").metrics[0].labels;
        assert_eq!(labels.get("host"), Some("a"));
        assert_eq!(labels.get("old_zone"), Some("z"));
        assert_eq!(labels.get("zone"), Some("keep"));
    }

    #[test]
    fn test_label_value_gsub() {
        let reg = registry("filter \"f\" {\n label-value-gsub \"path\" /\\// \"_\"\n}\n");
        let mut list =
            MetricFamilyList::from_family(gauge_family("m", &[&[("path", "/var/log/x")]]));
        reg.get("f").expect("filter").process(&mut list, None).expect("process");
        let labels = &list.get(0).expect("family").metrics[0].labels;
        assert_eq!(labels.get("path"), Some("_var_log_x"));
    }

    #[test]
    fn test_write_statement_targets() {
        let reg = registry(
            "filter \"f\" {\n write\n write \"stdout\" \"log\"\n metric-rename \"after\"\n}\n",
        );
        let sink = Capture::default();
        let mut list = MetricFamilyList::from_family(gauge_family("m", &[&[("a", "1")]]));
        reg.get("f").expect("filter").process(&mut list, Some(&sink)).expect("process");

        let writes = sink.0.lock();
        let targets: Vec<_> = writes.iter().map(|(p, _)| p.clone()).collect();
        assert_eq!(
            targets,
            vec![None, Some("stdout".to_string()), Some("log".to_string())]
        );
        assert!(writes.iter().all(|(_, fam)| fam.name == "m" && fam.metrics.len() == 1));
        assert_eq!(list.get(1).expect("renamed").name, "after");
    }

    #[test]
    fn test_self_call_is_bounded() {
        let reg = registry("filter \"loop\" {\n label-set \"seen\" \"1\"\n call \"loop\"\n}\n");
        let mut list = MetricFamilyList::from_family(gauge_family("m", &[&[]]));
        reg.get("loop").expect("filter").process(&mut list, None).expect("process");
        assert_eq!(list.get(0).expect("family").metrics[0].labels.get("seen"), Some("1"));
    }

    #[test]
    fn test_fan_out_self_calls_are_bounded() {
        let reg = registry(
            "filter \"fan\" {\n call \"fan\"\n call \"fan\"\n call \"fan\"\n label-set \"seen\" \"1\"\n}\n",
        );
        let filter = reg.get("fan").expect("filter");
        let stmts = filter.stmts.read();

        let family = gauge_family("m", &[&[]]);
        let mut eval = Evaluator::new(None);
        for _ in 0..2 {
            let mut name = family.name.clone();
            let mut metric = family.metrics[0].clone();
            let result = eval.run_metric(&stmts, &family, &mut name, &mut metric);
            assert_eq!(result, FilterResult::Continue);
            assert_eq!(metric.labels.get("seen"), Some("1"));
            // the budget is per metric
            assert_eq!(eval.calls(), eval::MAX_CALLS);
        }
    }

    #[test]
    fn test_local_filter() {
        let items = parse_str("filter {\n metric-sub /^node_/ \"host_\"\n}\n", "w.conf")
            .expect("parse");
        let filter = Filter::local(&items[0]).expect("local");
        assert_eq!(filter.name(), None);
        let mut list = MetricFamilyList::from_family(gauge_family("node_load", &[&[]]));
        filter.process(&mut list, None).expect("process");
        assert_eq!(list.len(), 2);
        assert!(list.get(0).expect("source").metrics.is_empty());
        assert_eq!(list.get(1).expect("moved").name, "host_load");

        let items = parse_str("filter \"named\" {\n}\n", "w.conf").expect("parse");
        assert!(Filter::local(&items[0]).is_err());
    }

    #[test]
    fn test_process_requires_single_family() {
        let reg = registry("filter \"f\" {\n}\n");
        let mut list = MetricFamilyList::new();
        assert!(reg.get("f").expect("filter").process(&mut list, None).is_err());
    }
}
