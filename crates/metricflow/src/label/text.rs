// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `{name="value",...}` text form of a label set.

use super::LabelSet;
use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Escape `\ " \n \r \t` in a label value.
pub fn escape_value(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
}

fn parse_error(offset: usize, message: impl Into<String>) -> Error {
    Error::Parse {
        offset,
        message: message.into(),
    }
}

fn name_len(input: &str) -> usize {
    input
        .char_indices()
        .find(|&(i, c)| {
            !(c.is_ascii_alphabetic() || c == '_' || (i > 0 && c.is_ascii_digit()))
        })
        .map(|(i, _)| i)
        .unwrap_or(input.len())
}

/// Parse a quoted value starting at `input[0] == '"'`. Returns the
/// unescaped value and the number of bytes consumed.
fn parse_value(input: &str, base: usize) -> Result<(String, usize)> {
    let bytes = input.as_bytes();
    if bytes.first() != Some(&b'"') {
        return Err(parse_error(base, "expected '\"'"));
    }
    let mut value = String::new();
    let mut chars = input[1..].char_indices();
    while let Some((i, c)) = chars.next() {
        let at = base + 1 + i;
        match c {
            '"' => return Ok((value, 1 + i + 1)),
            '\n' | '\0' => return Err(parse_error(at, "control byte in label value")),
            '\\' => match chars.next() {
                Some((_, 'n')) => value.push('\n'),
                Some((_, 'r')) => value.push('\r'),
                Some((_, 't')) => value.push('\t'),
                Some((_, '"')) => value.push('"'),
                Some((_, '\\')) => value.push('\\'),
                Some((_, other)) => {
                    return Err(parse_error(at, format!("bad escape '\\{}'", other)))
                }
                None => return Err(parse_error(at, "dangling '\\' at end of input")),
            },
            c => value.push(c),
        }
    }
    Err(parse_error(base + input.len(), "unterminated quoted value"))
}

impl LabelSet {
    /// Parse a `{...}` block at the start of `input` into this set,
    /// overwriting existing names. Returns the number of bytes consumed.
    /// On error the set is left unchanged.
    pub fn unmarshal(&mut self, input: &str) -> Result<usize> {
        let mut pairs = Vec::new();
        let used = parse_block(input, &mut pairs)?;
        let mut updated = self.try_clone()?;
        for (name, value) in &pairs {
            updated.add(true, name, value)?;
        }
        *self = updated;
        Ok(used)
    }
}

fn parse_block(input: &str, pairs: &mut Vec<(String, String)>) -> Result<usize> {
    let bytes = input.as_bytes();
    if bytes.first() != Some(&b'{') {
        return Err(parse_error(0, "expected '{'"));
    }
    let mut pos = 1;
    if bytes.get(pos) == Some(&b'}') {
        return Ok(pos + 1);
    }
    loop {
        let len = name_len(&input[pos..]);
        if len == 0 {
            return Err(parse_error(pos, "expected label name"));
        }
        let name = &input[pos..pos + len];
        pos += len;

        if bytes.get(pos) != Some(&b'=') {
            return Err(parse_error(pos, "expected '='"));
        }
        pos += 1;

        let (value, used) = parse_value(&input[pos..], pos)?;
        pos += used;
        pairs.push((name.to_string(), value));

        match bytes.get(pos) {
            Some(b',') => pos += 1,
            Some(b'}') => return Ok(pos + 1),
            _ => return Err(parse_error(pos, "expected ',' or '}'")),
        }
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::from("{");
        for (i, pair) in self.pairs.iter().enumerate() {
            if i != 0 {
                out.push(',');
            }
            out.push_str(&pair.name);
            out.push_str("=\"");
            escape_value(&pair.value, &mut out);
            out.push('"');
        }
        out.push('}');
        f.write_str(&out)
    }
}

impl FromStr for LabelSet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut set = LabelSet::new();
        let used = set.unmarshal(s)?;
        if used != s.len() {
            return Err(parse_error(used, "trailing characters after '}'"));
        }
        Ok(set)
    }
}
