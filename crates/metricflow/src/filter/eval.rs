// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Statement evaluation for a single metric.

use super::stmt::{Alternative, MatchTarget, Stmt, SubTarget, WriteTarget};
use super::template::{Subject, Template};
use super::{FilterResult, WriteSink};
use crate::complain::Complaint;
use crate::error::{Error, Result};
use crate::label::LabelSet;
use crate::metric::{Metric, MetricFamily};
use regex::{Captures, Regex};
use tracing::{debug, Level};

/// Nesting limit for `call` chains.
const MAX_CALL_DEPTH: usize = 32;

/// Total `call` statements executed for one metric.
pub(crate) const MAX_CALLS: usize = 1024;

/// Replace matches of `regex` in `input` with `replace`, appending the
/// result to `out`. Only the first match is replaced unless `global`.
///
/// A zero-length match copies one character and moves past it. Returns the
/// number of matches; `out` is only meaningful when that is non-zero.
pub(crate) fn substitute(
    regex: &Regex,
    input: &str,
    replace: &Template,
    name: &str,
    labels: &LabelSet,
    global: bool,
    out: &mut String,
) -> usize {
    let mut pos = 0;
    let mut nmatch = 0;

    while let Some(caps) = regex.captures_at(input, pos) {
        let Some(m) = caps.get(0) else {
            break;
        };
        nmatch += 1;

        out.push_str(&input[pos..m.start()]);
        replace.expand_into(
            &Subject {
                name,
                labels,
                captures: Some(&caps),
            },
            out,
        );

        pos = m.end();
        if m.start() == m.end() {
            match input[pos..].chars().next() {
                Some(c) => {
                    out.push(c);
                    pos += c.len_utf8();
                }
                None => break,
            }
        }

        if pos >= input.len() || !global {
            break;
        }
    }

    out.push_str(&input[pos..]);
    nmatch
}

/// Per-invocation evaluation state.
pub(crate) struct Evaluator<'a> {
    sink: Option<&'a dyn WriteSink>,
    scratch: String,
    depth: usize,
    calls: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(sink: Option<&'a dyn WriteSink>) -> Self {
        Self {
            sink,
            scratch: String::new(),
            depth: 0,
            calls: 0,
        }
    }

    /// Number of `call` statements executed since the last
    /// [`run_metric`](Self::run_metric).
    pub fn calls(&self) -> usize {
        self.calls
    }

    /// Evaluate `stmts` against one metric with a fresh call budget.
    pub fn run_metric(
        &mut self,
        stmts: &[Stmt],
        family: &MetricFamily,
        name: &mut String,
        metric: &mut Metric,
    ) -> FilterResult {
        self.calls = 0;
        self.run(stmts, family, name, metric)
    }

    /// Expand `template` into the scratch buffer and hand the result to `f`.
    fn expand<R>(
        &mut self,
        template: &Template,
        name: &str,
        labels: &LabelSet,
        captures: Option<&Captures<'_>>,
        f: impl FnOnce(&str) -> R,
    ) -> R {
        if let Some(text) = template.literal() {
            return f(text);
        }
        let mut buf = std::mem::take(&mut self.scratch);
        buf.clear();
        template.expand_into(
            &Subject {
                name,
                labels,
                captures,
            },
            &mut buf,
        );
        let result = f(&buf);
        self.scratch = buf;
        result
    }

    /// Apply one of the statements allowed inside a match block.
    fn mutate(
        &mut self,
        stmt: &Stmt,
        name: &mut String,
        metric: &mut Metric,
        captures: Option<&Captures<'_>>,
    ) {
        match stmt {
            Stmt::MetricRename(to) => {
                let renamed = self.expand(to, name, &metric.labels, captures, str::to_string);
                *name = renamed;
            }
            Stmt::LabelSet { label, value } => {
                let value = self.expand(value, name, &metric.labels, captures, str::to_string);
                if let Err(e) = metric.labels.add(true, label, &value) {
                    debug!("label-set '{}' failed: {}", label, e);
                }
            }
            Stmt::LabelUnset(label) => {
                metric.labels.remove(label);
            }
            Stmt::LabelRename { from, to } => {
                let to = self.expand(to, name, &metric.labels, captures, str::to_string);
                if let Err(e) = metric.labels.rename(from, &to) {
                    debug!("label-rename '{}' to '{}' failed: {}", from, to, e);
                }
            }
            _ => {}
        }
    }

    fn write(
        &mut self,
        targets: &[WriteTarget],
        complaint: &Complaint,
        family: &MetricFamily,
        name: &str,
        metric: &Metric,
    ) {
        let single = || -> Result<MetricFamily> {
            let mut fam = family.header();
            fam.name = name.to_string();
            fam.metrics.push(metric.try_clone()?);
            Ok(fam)
        };
        let send = |plugin: Option<&str>| -> Result<()> {
            match self.sink {
                Some(sink) => sink.write_family(plugin, single()?),
                None => Err(Error::NoConsumers { kind: "write" }),
            }
        };

        if targets.is_empty() {
            match send(None) {
                Ok(()) => {
                    complaint.release(
                        Level::INFO,
                        format_args!(
                            "Filter 'write': Some write plugin is back to normal \
                             operation. 'write' succeeded."
                        ),
                    );
                }
                Err(Error::NoConsumers { .. }) => {
                    complaint.complain(
                        Level::INFO,
                        format_args!(
                            "Filter 'write': Dispatching value to all write plugins \
                             failed: no write plugin registered. Most likely this means \
                             you didn't load any write plugins."
                        ),
                    );
                }
                Err(e) => {
                    complaint.complain(
                        Level::INFO,
                        format_args!(
                            "Filter 'write': Dispatching value to all write plugins failed: {}",
                            e
                        ),
                    );
                }
            }
            return;
        }

        for target in targets {
            match send(Some(&target.plugin)) {
                Ok(()) => {
                    target.complaint.release(
                        Level::INFO,
                        format_args!(
                            "Filter 'write': Plugin '{}' is back to normal operation. \
                             'write' succeeded.",
                            target.plugin
                        ),
                    );
                }
                Err(e) => {
                    target.complaint.complain(
                        Level::INFO,
                        format_args!(
                            "Filter 'write': Dispatching value to the '{}' plugin failed: {}",
                            target.plugin, e
                        ),
                    );
                }
            }
        }
    }

    fn sub(
        &mut self,
        target: &SubTarget,
        regex: &Regex,
        replace: &Template,
        global: bool,
        name: &mut String,
        metric: &mut Metric,
    ) {
        let mut buf = std::mem::take(&mut self.scratch);
        match target {
            SubTarget::MetricName => {
                buf.clear();
                if substitute(regex, name, replace, name, &metric.labels, global, &mut buf) > 0 {
                    name.clear();
                    name.push_str(&buf);
                }
            }
            SubTarget::LabelNames => {
                let names: Vec<String> = metric.labels.iter().map(|p| p.name.clone()).collect();
                for old in names {
                    buf.clear();
                    let n = substitute(regex, &old, replace, name, &metric.labels, global, &mut buf);
                    if n > 0 && !metric.labels.contains(&buf) {
                        if let Err(e) = metric.labels.rename(&old, &buf) {
                            debug!("label-sub '{}' to '{}' failed: {}", old, buf, e);
                        }
                    }
                }
            }
            SubTarget::LabelValue(label) => {
                if let Some(value) = metric.labels.get(label) {
                    buf.clear();
                    let n = substitute(regex, value, replace, name, &metric.labels, global, &mut buf);
                    if n > 0 {
                        if let Err(e) = metric.labels.set(label, &buf) {
                            debug!("label-value-sub '{}' failed: {}", label, e);
                        }
                    }
                }
            }
        }
        self.scratch = buf;
    }

    fn run_match(
        &mut self,
        target: &MatchTarget,
        regex: &Regex,
        body: &[Stmt],
        name: &mut String,
        metric: &mut Metric,
    ) {
        let text = match target {
            MatchTarget::MetricName => name.clone(),
            MatchTarget::LabelValue(label) => match metric.labels.get(label) {
                Some(value) => value.to_string(),
                None => return,
            },
        };
        let Some(caps) = regex.captures(&text) else {
            return;
        };
        for stmt in body {
            self.mutate(stmt, name, metric, Some(&caps));
        }
    }

    /// Evaluate `stmts` against `metric`. `name` is the working family name
    /// and `family` supplies help, unit and type for `write`.
    pub fn run(
        &mut self,
        stmts: &[Stmt],
        family: &MetricFamily,
        name: &mut String,
        metric: &mut Metric,
    ) -> FilterResult {
        let mut result = FilterResult::Continue;

        for stmt in stmts {
            match stmt {
                Stmt::If {
                    negate,
                    cond,
                    body,
                    alternatives,
                } => {
                    if cond.matches(name, &metric.labels) != *negate {
                        result = self.run(body, family, name, metric);
                        if result != FilterResult::Continue {
                            return result;
                        }
                        continue;
                    }
                    for alternative in alternatives {
                        let body = match alternative {
                            Alternative::Elif(cond, body) => {
                                if !cond.matches(name, &metric.labels) {
                                    continue;
                                }
                                body
                            }
                            Alternative::Else(body) => body,
                        };
                        result = self.run(body, family, name, metric);
                        if result != FilterResult::Continue {
                            return result;
                        }
                        break;
                    }
                }
                Stmt::Drop => return FilterResult::Drop,
                Stmt::Stop => return FilterResult::Stop,
                Stmt::Return => return FilterResult::Return,
                Stmt::Call {
                    name: callee,
                    filter,
                    complaint,
                } => {
                    let Some(filter) = filter.upgrade() else {
                        continue;
                    };
                    if self.depth >= MAX_CALL_DEPTH || self.calls >= MAX_CALLS {
                        complaint.complain(
                            Level::WARN,
                            format_args!(
                                "Filter 'call': too many nested or repeated calls to '{}'",
                                callee
                            ),
                        );
                        continue;
                    }
                    self.calls += 1;
                    self.depth += 1;
                    let callee_stmts = filter.stmts.read_recursive();
                    result = self.run(&callee_stmts, family, name, metric);
                    drop(callee_stmts);
                    self.depth -= 1;
                    if matches!(result, FilterResult::Drop | FilterResult::Stop) {
                        return result;
                    }
                }
                Stmt::Write { targets, complaint } => {
                    self.write(targets, complaint, family, name, metric);
                }
                Stmt::MetricRename(_)
                | Stmt::LabelSet { .. }
                | Stmt::LabelUnset(_)
                | Stmt::LabelRename { .. } => self.mutate(stmt, name, metric, None),
                Stmt::LabelList { allow, items } => {
                    metric
                        .labels
                        .retain_names(|label| items.iter().any(|i| i.matches(label)) == *allow);
                }
                Stmt::Sub {
                    target,
                    regex,
                    replace,
                    global,
                } => self.sub(target, regex, replace, *global, name, metric),
                Stmt::Match {
                    target,
                    regex,
                    body,
                } => self.run_match(target, regex, body, name, metric),
            }
        }

        result
    }
}
