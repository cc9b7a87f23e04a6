// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Metric selectors of the form `name{label="v",other=~"re",x!="",y!~"re"}`.
//!
//! `=""` matches when the label is absent and `!=""` when it is present.
//! Regular expressions are unanchored. Conditions on `__name__` apply to the
//! family name.

use crate::error::{Error, Result};
use crate::label::{LabelSet, METRIC_NAME_LABEL};
use crate::metric::{MetricFamily, Metric};
use regex::Regex;
use std::str::FromStr;

#[derive(Debug, Clone)]
enum MatchOp {
    Eq(String),
    Ne(String),
    EqRegex(Regex),
    NeRegex(Regex),
    Exists,
    NotExists,
}

impl MatchOp {
    fn test(&self, value: Option<&str>) -> bool {
        match (self, value) {
            (MatchOp::Exists, v) => v.is_some(),
            (MatchOp::NotExists, v) => v.is_none(),
            (_, None) => false,
            (MatchOp::Eq(s), Some(v)) => v == s,
            (MatchOp::Ne(s), Some(v)) => v != s,
            (MatchOp::EqRegex(re), Some(v)) => re.is_match(v),
            (MatchOp::NeRegex(re), Some(v)) => !re.is_match(v),
        }
    }
}

#[derive(Debug, Clone)]
struct MatchPair {
    name: String,
    op: MatchOp,
}

/// Compiled metric selector.
#[derive(Debug, Clone, Default)]
pub struct MetricMatch {
    family: Vec<MatchPair>,
    labels: Vec<MatchPair>,
}

fn parse_error(offset: usize, message: impl Into<String>) -> Error {
    Error::Parse {
        offset,
        message: message.into(),
    }
}

fn metric_name_len(input: &str) -> usize {
    input
        .char_indices()
        .find(|&(i, c)| {
            let ok = c.is_ascii_alphabetic()
                || c == '_'
                || c == ':'
                || (i > 0 && (c.is_ascii_digit() || c == '.'));
            !ok
        })
        .map(|(i, _)| i)
        .unwrap_or(input.len())
}

fn label_name_len(input: &str) -> usize {
    input
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_alphabetic() || c == '_' || (i > 0 && c.is_ascii_digit())))
        .map(|(i, _)| i)
        .unwrap_or(input.len())
}

/// Quoted value; unknown escapes yield the escaped character.
fn parse_quoted(input: &str, base: usize) -> Result<(String, usize)> {
    if !input.starts_with('"') {
        return Err(parse_error(base, "expected '\"'"));
    }
    let mut value = String::new();
    let mut chars = input[1..].char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((value, i + 2)),
            '\n' | '\0' => return Err(parse_error(base + 1 + i, "control byte in value")),
            '\\' => match chars.next() {
                Some((_, 'n')) => value.push('\n'),
                Some((_, 'r')) => value.push('\r'),
                Some((_, 't')) => value.push('\t'),
                Some((_, other)) => value.push(other),
                None => return Err(parse_error(base + 1 + i, "dangling '\\'")),
            },
            c => value.push(c),
        }
    }
    Err(parse_error(base + input.len(), "unterminated quoted value"))
}

impl MetricMatch {
    /// Parse a selector.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim_end();
        let bytes = input.as_bytes();
        let mut matcher = Self::default();

        let mut pos = metric_name_len(input);
        if pos > 0 {
            matcher.add(METRIC_NAME_LABEL, MatchOp::Eq(input[..pos].to_string()));
            if pos == input.len() {
                return Ok(matcher);
            }
        }

        if bytes.get(pos) != Some(&b'{') {
            return Err(parse_error(pos, "expected '{'"));
        }
        pos += 1;
        if bytes.get(pos) == Some(&b'}') && pos + 1 == input.len() {
            return Ok(matcher);
        }

        loop {
            let len = label_name_len(&input[pos..]);
            if len == 0 {
                return Err(parse_error(pos, "expected label name"));
            }
            let name = &input[pos..pos + len];
            pos += len;

            let (negate, regex) = match (bytes.get(pos), bytes.get(pos + 1)) {
                (Some(b'='), Some(b'~')) => (false, true),
                (Some(b'='), _) => (false, false),
                (Some(b'!'), Some(b'~')) => (true, true),
                (Some(b'!'), Some(b'=')) => (true, false),
                _ => return Err(parse_error(pos, "expected '=', '=~', '!=' or '!~'")),
            };
            pos += if !negate && !regex { 1 } else { 2 };

            let (value, used) = parse_quoted(&input[pos..], pos)?;
            pos += used;

            let op = match (negate, regex) {
                (false, false) if value.is_empty() => MatchOp::NotExists,
                (true, false) if value.is_empty() => MatchOp::Exists,
                (false, false) => MatchOp::Eq(value),
                (true, false) => MatchOp::Ne(value),
                (false, true) => MatchOp::EqRegex(Regex::new(&value)?),
                (true, true) => MatchOp::NeRegex(Regex::new(&value)?),
            };
            matcher.add(name, op);

            match bytes.get(pos) {
                Some(b',') => pos += 1,
                Some(b'}') if pos + 1 == input.len() => return Ok(matcher),
                Some(b'}') => return Err(parse_error(pos + 1, "trailing characters after '}'")),
                _ => return Err(parse_error(pos, "expected ',' or '}'")),
            }
        }
    }

    fn add(&mut self, name: &str, op: MatchOp) {
        let pair = MatchPair {
            name: name.to_string(),
            op,
        };
        if name == METRIC_NAME_LABEL {
            self.family.push(pair);
        } else {
            self.labels.push(pair);
        }
    }

    /// True when `name` and `labels` satisfy every condition.
    pub fn matches(&self, name: &str, labels: &LabelSet) -> bool {
        self.matches_name(name) && self.matches_labels(labels)
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.family.iter().all(|pair| pair.op.test(Some(name)))
    }

    pub fn matches_labels(&self, labels: &LabelSet) -> bool {
        self.labels
            .iter()
            .all(|pair| pair.op.test(labels.get(&pair.name)))
    }

    /// Copy of the metrics of `family` selected by this matcher, or `None`
    /// when the family name does not match.
    pub fn select(&self, family: &MetricFamily) -> Result<Option<MetricFamily>> {
        if !self.matches_name(&family.name) {
            return Ok(None);
        }
        let mut out = family.header();
        for metric in family.metrics.iter().filter(|m| self.matches_labels(&m.labels)) {
            out.push(Metric::try_clone(metric)?)?;
        }
        Ok(Some(out))
    }
}

impl FromStr for MetricMatch {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
