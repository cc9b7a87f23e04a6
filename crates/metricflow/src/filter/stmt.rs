// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Statement tree and its compilation from configuration items.

use super::template::Template;
use super::{Filter, FilterRegistry};
use crate::complain::Complaint;
use crate::config::{ConfigItem, ConfigValue};
use crate::error::ConfigError;
use crate::label::{is_valid_label_name, METRIC_NAME_LABEL};
use crate::matcher::MetricMatch;
use regex::Regex;
use std::sync::{Arc, Weak};

/// Where compiled statements will live.
#[derive(Clone, Copy)]
pub(crate) enum Scope<'a> {
    /// A named filter; `call` and `write` are allowed.
    Global(&'a FilterRegistry),
    /// A filter attached to a single plugin.
    Local,
}

#[derive(Debug)]
pub(crate) enum Alternative {
    Elif(MetricMatch, Vec<Stmt>),
    Else(Vec<Stmt>),
}

#[derive(Debug)]
pub(crate) struct WriteTarget {
    pub plugin: String,
    pub complaint: Complaint,
}

#[derive(Debug)]
pub(crate) enum ListItem {
    Name(String),
    Regex(Regex),
}

impl ListItem {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            ListItem::Name(n) => n == name,
            ListItem::Regex(re) => re.is_match(name),
        }
    }
}

#[derive(Debug)]
pub(crate) enum SubTarget {
    MetricName,
    LabelNames,
    LabelValue(String),
}

#[derive(Debug)]
pub(crate) enum MatchTarget {
    MetricName,
    LabelValue(String),
}

#[derive(Debug)]
pub(crate) enum Stmt {
    If {
        negate: bool,
        cond: MetricMatch,
        body: Vec<Stmt>,
        alternatives: Vec<Alternative>,
    },
    Drop,
    Stop,
    Return,
    Call {
        name: String,
        filter: Weak<Filter>,
        complaint: Complaint,
    },
    Write {
        /// Empty for a broadcast.
        targets: Vec<WriteTarget>,
        complaint: Complaint,
    },
    MetricRename(Template),
    LabelSet {
        label: String,
        value: Template,
    },
    LabelUnset(String),
    LabelRename {
        from: String,
        to: Template,
    },
    LabelList {
        allow: bool,
        items: Vec<ListItem>,
    },
    Sub {
        target: SubTarget,
        regex: Regex,
        replace: Template,
        global: bool,
    },
    Match {
        target: MatchTarget,
        regex: Regex,
        body: Vec<Stmt>,
    },
}

fn template(ci: &ConfigItem, text: &str) -> Result<Template, ConfigError> {
    Template::parse(text).map_err(|e| ci.error(format!("Failed to parse '{}': {}", text, e)))
}

fn regex(ci: &ConfigItem, pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|e| ci.error(format!("regcomp '{}' failed: {}", pattern, e)))
}

fn label_target(ci: &ConfigItem, label: &str) -> Result<String, ConfigError> {
    if label == METRIC_NAME_LABEL {
        return Err(ci.error(format!(
            "'{}' cannot modify the metric name through '{}'",
            ci.key, METRIC_NAME_LABEL
        )));
    }
    if !is_valid_label_name(label) {
        return Err(ci.error(format!("Invalid label name '{}' in '{}'", label, ci.key)));
    }
    Ok(label.to_string())
}

fn no_block(ci: &ConfigItem) -> Result<(), ConfigError> {
    if ci.children.is_some() {
        return Err(ci.error(format!("'{}' statement does not take a block", ci.key)));
    }
    Ok(())
}

fn compile_if(ci: &ConfigItem, scope: Scope<'_>) -> Result<(MetricMatch, Vec<Stmt>), ConfigError> {
    let text = ci.single_string().ok_or_else(|| {
        ci.error(format!(
            "'{}' statement require exactly one string argument",
            ci.key
        ))
    })?;
    let cond = MetricMatch::parse(text).map_err(|e| {
        ci.error(format!(
            "Fail to parse match: '{}' in '{}' statement: {}",
            text, ci.key, e
        ))
    })?;
    let body = compile_block(ci.children(), scope)?;
    Ok((cond, body))
}

fn compile_write(ci: &ConfigItem) -> Result<Stmt, ConfigError> {
    no_block(ci)?;
    let targets = ci
        .strings()
        .ok_or_else(|| ci.error("'write' statement require a list of strings as argument"))?
        .into_iter()
        .map(|plugin| WriteTarget {
            plugin: plugin.to_string(),
            complaint: Complaint::new(),
        })
        .collect();
    Ok(Stmt::Write {
        targets,
        complaint: Complaint::new(),
    })
}

fn compile_call(ci: &ConfigItem, registry: &FilterRegistry) -> Result<Stmt, ConfigError> {
    no_block(ci)?;
    let name = ci
        .single_string()
        .ok_or_else(|| ci.error("'call' statement require exactly one string argument"))?;
    let filter = registry
        .get(name)
        .ok_or_else(|| ci.error(format!("Filter '{}' not found", name)))?;
    Ok(Stmt::Call {
        name: name.to_string(),
        filter: Arc::downgrade(&filter),
        complaint: Complaint::new(),
    })
}

fn compile_list(ci: &ConfigItem, allow: bool) -> Result<Stmt, ConfigError> {
    no_block(ci)?;
    if ci.values.is_empty() {
        return Err(ci.error(format!(
            "'{}' statement require a list of strings as argument",
            ci.key
        )));
    }
    let items = ci
        .values
        .iter()
        .map(|value| match value {
            ConfigValue::String(s) => Ok(ListItem::Name(s.clone())),
            ConfigValue::Regex(r) => Ok(ListItem::Regex(regex(ci, r)?)),
            _ => Err(ci.error(format!(
                "'{}' statement require a list of strings or regex as argument",
                ci.key
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Stmt::LabelList { allow, items })
}

fn compile_sub(ci: &ConfigItem, target: SubTarget, global: bool) -> Result<Stmt, ConfigError> {
    no_block(ci)?;
    let (target, pattern, replace) = match (target, ci.values.as_slice()) {
        (SubTarget::LabelValue(_), [ConfigValue::String(l), ConfigValue::Regex(p), ConfigValue::String(r)]) => {
            (SubTarget::LabelValue(l.clone()), p, r)
        }
        (SubTarget::LabelValue(_), _) => {
            return Err(ci.error(format!(
                "'{}' statement require exactly three arguments: string, regex and string",
                ci.key
            )))
        }
        (target, [ConfigValue::Regex(p), ConfigValue::String(r)]) => (target, p, r),
        _ => {
            return Err(ci.error(format!(
                "'{}' statement require exactly two arguments: regex and string",
                ci.key
            )))
        }
    };
    Ok(Stmt::Sub {
        target,
        regex: regex(ci, pattern)?,
        replace: template(ci, replace)?,
        global,
    })
}

fn compile_match(ci: &ConfigItem, target: MatchTarget) -> Result<Stmt, ConfigError> {
    let (target, pattern) = match (target, ci.values.as_slice()) {
        (MatchTarget::MetricName, [ConfigValue::Regex(p)]) => (MatchTarget::MetricName, p),
        (MatchTarget::MetricName, _) => {
            return Err(ci.error(format!("'{}' statement require exactly one regex", ci.key)))
        }
        (MatchTarget::LabelValue(_), [ConfigValue::String(l), ConfigValue::Regex(p)]) => {
            (MatchTarget::LabelValue(l.clone()), p)
        }
        (MatchTarget::LabelValue(_), _) => {
            return Err(ci.error(format!(
                "'{}' statement require exactly two arguments: string and regex",
                ci.key
            )))
        }
    };
    let regex = regex(ci, pattern)?;

    let mut body = Vec::new();
    for child in ci.children() {
        let stmt = if child.is("metric-rename") {
            compile_metric_rename(child)?
        } else if child.is("label-set") {
            compile_label_set(child)?
        } else if child.is("label-unset") {
            compile_label_unset(child)?
        } else if child.is("label-rename") {
            compile_label_rename(child)?
        } else {
            return Err(child.error(format!(
                "Option '{}' in filter match is not allowed",
                child.key
            )));
        };
        body.push(stmt);
    }
    Ok(Stmt::Match {
        target,
        regex,
        body,
    })
}

fn compile_metric_rename(ci: &ConfigItem) -> Result<Stmt, ConfigError> {
    no_block(ci)?;
    let to = ci
        .single_string()
        .ok_or_else(|| ci.error("'metric-rename' statement require exactly one string argument"))?;
    Ok(Stmt::MetricRename(template(ci, to)?))
}

fn compile_label_set(ci: &ConfigItem) -> Result<Stmt, ConfigError> {
    no_block(ci)?;
    match ci.values.as_slice() {
        [ConfigValue::String(label), ConfigValue::String(value)] => Ok(Stmt::LabelSet {
            label: label_target(ci, label)?,
            value: template(ci, value)?,
        }),
        _ => Err(ci.error("'label-set' statement require exactly two string argument")),
    }
}

fn compile_label_unset(ci: &ConfigItem) -> Result<Stmt, ConfigError> {
    no_block(ci)?;
    let label = ci
        .single_string()
        .ok_or_else(|| ci.error("'label-unset' statement require exactly one string argument"))?;
    if label == METRIC_NAME_LABEL {
        return Err(ci.error("Cannot unset metric name"));
    }
    Ok(Stmt::LabelUnset(label.to_string()))
}

fn compile_label_rename(ci: &ConfigItem) -> Result<Stmt, ConfigError> {
    no_block(ci)?;
    match ci.values.as_slice() {
        [ConfigValue::String(from), ConfigValue::String(to)] => Ok(Stmt::LabelRename {
            from: label_target(ci, from)?,
            to: template(ci, to)?,
        }),
        _ => Err(ci.error("'label-rename' statement require exactly two string argument")),
    }
}

/// Attach an `elif`/`else` to the `if`/`unless` that ends `stmts`.
fn attach(
    stmts: &mut [Stmt],
    ci: &ConfigItem,
    alternative: impl FnOnce() -> Result<Alternative, ConfigError>,
) -> Result<(), ConfigError> {
    let open = match stmts.last_mut() {
        Some(Stmt::If { alternatives, .. })
            if !matches!(alternatives.last(), Some(Alternative::Else(_))) =>
        {
            alternatives
        }
        _ => {
            return Err(ci.error(format!(
                "'{}' block without previous 'if', 'unless' or 'elif' block",
                ci.key.to_ascii_lowercase()
            )))
        }
    };
    open.push(alternative()?);
    Ok(())
}

/// Compile the children of a filter block.
pub(crate) fn compile_block(items: &[ConfigItem], scope: Scope<'_>) -> Result<Vec<Stmt>, ConfigError> {
    let mut stmts = Vec::new();

    for ci in items {
        let key = ci.key.to_ascii_lowercase();
        let stmt = match key.as_str() {
            "if" | "unless" => {
                let (cond, body) = compile_if(ci, scope)?;
                Stmt::If {
                    negate: key == "unless",
                    cond,
                    body,
                    alternatives: Vec::new(),
                }
            }
            "elif" => {
                attach(&mut stmts, ci, || {
                    let (cond, body) = compile_if(ci, scope)?;
                    Ok(Alternative::Elif(cond, body))
                })?;
                continue;
            }
            "else" => {
                attach(&mut stmts, ci, || {
                    if !ci.values.is_empty() {
                        return Err(ci.error("'else' statement does not have arguments"));
                    }
                    Ok(Alternative::Else(compile_block(ci.children(), scope)?))
                })?;
                continue;
            }
            "drop" => Stmt::Drop,
            "stop" => Stmt::Stop,
            "return" => Stmt::Return,
            "call" | "write" => match scope {
                Scope::Global(registry) if key == "call" => compile_call(ci, registry)?,
                Scope::Global(_) => compile_write(ci)?,
                Scope::Local => {
                    return Err(ci.error(format!("Error '{}' statement in local filter", key)))
                }
            },
            "metric-rename" => compile_metric_rename(ci)?,
            "label-set" => compile_label_set(ci)?,
            "label-unset" => compile_label_unset(ci)?,
            "label-rename" => compile_label_rename(ci)?,
            "label-allow" => compile_list(ci, true)?,
            "label-ignore" => compile_list(ci, false)?,
            "metric-sub" => compile_sub(ci, SubTarget::MetricName, false)?,
            "metric-gsub" => compile_sub(ci, SubTarget::MetricName, true)?,
            "label-sub" => compile_sub(ci, SubTarget::LabelNames, false)?,
            "label-gsub" => compile_sub(ci, SubTarget::LabelNames, true)?,
            "label-value-sub" => compile_sub(ci, SubTarget::LabelValue(String::new()), false)?,
            "label-value-gsub" => compile_sub(ci, SubTarget::LabelValue(String::new()), true)?,
            "metric-match" => compile_match(ci, MatchTarget::MetricName)?,
            "label-value-match" => compile_match(ci, MatchTarget::LabelValue(String::new()))?,
            _ => return Err(ci.error(format!("Option '{}' in filter is not allowed", ci.key))),
        };
        stmts.push(stmt);
    }

    Ok(stmts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_str;

    fn compile(text: &str, scope: Scope<'_>) -> Result<Vec<Stmt>, ConfigError> {
        let items = parse_str(text, "test.conf").expect("parse");
        compile_block(&items, scope)
    }

    #[test]
    fn test_if_chain() {
        let stmts = compile(
            "if \"a\" {\n drop\n}\nELIF \"b\" {\n stop\n}\nelse {\n return\n}\n",
            Scope::Local,
        )
        .expect("compile");
        assert_eq!(stmts.len(), 1);
        match &stmts[0] {
            Stmt::If { alternatives, .. } => assert_eq!(alternatives.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_elif_without_if() {
        let err = compile("drop\nelif \"a\" {\n}\n", Scope::Local).expect_err("orphan elif");
        assert_eq!(err.line, 2);
        assert!(err.message.contains("without previous 'if'"));

        let err = compile("if \"a\" {\n}\nelse {\n}\nelse {\n}\n", Scope::Local)
            .expect_err("double else");
        assert_eq!(err.line, 5);
    }

    #[test]
    fn test_call_and_write_in_local_filter() {
        let err = compile("call \"x\"\n", Scope::Local).expect_err("call");
        assert!(err.message.contains("'call' statement in local filter"));
        let err = compile("\n\nwrite\n", Scope::Local).expect_err("write");
        assert_eq!(err.line, 3);
    }

    #[test]
    fn test_argument_checks() {
        let registry = FilterRegistry::new();
        let global = Scope::Global(&registry);
        for (text, needle) in [
            ("label-set \"a\"\n", "two string"),
            ("label-unset \"__name__\"\n", "Cannot unset metric name"),
            ("metric-sub \"a\" \"b\"\n", "regex and string"),
            ("label-value-sub /a/ \"b\"\n", "three arguments"),
            ("metric-sub /(/ \"b\"\n", "regcomp"),
            ("metric-rename \"${oops\"\n", "Failed to parse"),
            ("call \"missing\"\n", "Filter 'missing' not found"),
            ("label-allow 3\n", "strings or regex"),
            ("frobnicate\n", "Option 'frobnicate' in filter is not allowed"),
            ("metric-match /a/ {\n drop\n}\n", "in filter match is not allowed"),
        ] {
            let err = compile(text, global).expect_err(text);
            assert!(err.message.contains(needle), "{}: {}", text, err);
        }
    }
}
