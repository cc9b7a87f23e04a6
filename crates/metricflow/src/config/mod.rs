// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Block-structured configuration items.
//!
//! # Syntax
//!
//! ```text
//! item   ::= key value* ( '{' NEWLINE item* '}' )? ( NEWLINE | ';' )
//! value  ::= '"' string '"' | number | 'true' | 'false' | '/' regex '/' | word
//! ```
//!
//! `#` starts a comment, a trailing `\` continues the line.
//!
//! # Example
//!
//! ```text
//! filter "normalize" {
//!     if "http_requests" {
//!         label-value-match "region" /(us-\w+)/ {
//!             label-set "env" "$1"
//!         }
//!     }
//! }
//! ```

mod parser;

pub use parser::{parse_file, parse_str};

use crate::error::ConfigError;
use std::fmt;
use std::sync::Arc;

/// Argument of a configuration item.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    String(String),
    Number(f64),
    Boolean(bool),
    Regex(String),
}

impl ConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ConfigValue::String(_) => "string",
            ConfigValue::Number(_) => "number",
            ConfigValue::Boolean(_) => "boolean",
            ConfigValue::Regex(_) => "regex",
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::String(s) => write!(f, "{:?}", s),
            ConfigValue::Number(n) => write!(f, "{}", n),
            ConfigValue::Boolean(b) => write!(f, "{}", b),
            ConfigValue::Regex(r) => write!(f, "/{}/", r.replace('/', "\\/")),
        }
    }
}

/// One `key value... { children }` entry with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigItem {
    pub key: String,
    pub values: Vec<ConfigValue>,
    /// `None` when the item has no `{ }` block.
    pub children: Option<Vec<ConfigItem>>,
    pub file: Arc<str>,
    pub line: usize,
}

impl ConfigItem {
    pub fn new(key: impl Into<String>, file: Arc<str>, line: usize) -> Self {
        Self {
            key: key.into(),
            values: Vec::new(),
            children: None,
            file,
            line,
        }
    }

    /// Error located at this item.
    pub fn error(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::new(self.file.as_ref(), self.line, message)
    }

    /// Case-insensitive key comparison.
    pub fn is(&self, key: &str) -> bool {
        self.key.eq_ignore_ascii_case(key)
    }

    pub fn children(&self) -> &[ConfigItem] {
        self.children.as_deref().unwrap_or(&[])
    }

    /// The single string argument of this item.
    pub fn single_string(&self) -> Option<&str> {
        match self.values.as_slice() {
            [ConfigValue::String(s)] => Some(s),
            _ => None,
        }
    }

    /// All arguments, if every one of them is a string.
    pub fn strings(&self) -> Option<Vec<&str>> {
        self.values.iter().map(ConfigValue::as_str).collect()
    }
}

impl fmt::Display for ConfigItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn dump(item: &ConfigItem, level: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:indent$}{}", "", item.key, indent = level * 4)?;
            for value in &item.values {
                write!(f, " {}", value)?;
            }
            match &item.children {
                Some(children) => {
                    writeln!(f, " {{")?;
                    for child in children {
                        dump(child, level + 1, f)?;
                    }
                    writeln!(f, "{:indent$}}}", "", indent = level * 4)
                }
                None => writeln!(f),
            }
        }
        dump(self, 0, f)
    }
}
