// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Replacement templates: literal text, `$N` back-references, `${label}`
//! lookups and `$$` escapes.

use crate::label::{LabelSet, METRIC_NAME_LABEL};
use regex::Captures;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Text(String),
    Ref(usize),
    Label(String),
    Name,
}

/// Compiled replacement template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pieces: Vec<Piece>,
}

/// Text a template is expanded against.
pub(crate) struct Subject<'a> {
    /// Current metric name, used for `${__name__}`.
    pub name: &'a str,
    pub labels: &'a LabelSet,
    /// Active regex match, if any.
    pub captures: Option<&'a Captures<'a>>,
}

fn is_label_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

impl Template {
    /// Parse `input`. Fails on an unterminated or empty `${}` and on a `$`
    /// followed by a character that cannot start a reference.
    pub fn parse(input: &str) -> Result<Self, String> {
        let mut pieces = Vec::new();
        let mut text = String::new();
        let mut chars = input.char_indices().peekable();

        fn push(pieces: &mut Vec<Piece>, text: &mut String, piece: Piece) {
            if !text.is_empty() {
                pieces.push(Piece::Text(std::mem::take(text)));
            }
            pieces.push(piece);
        }

        while let Some((_, c)) = chars.next() {
            if c != '$' {
                text.push(c);
                continue;
            }
            match chars.peek().copied() {
                None => text.push('$'),
                Some((_, '$')) => {
                    chars.next();
                    text.push('$');
                }
                Some((_, d)) if d.is_ascii_digit() => {
                    chars.next();
                    push(&mut pieces, &mut text, Piece::Ref(d as usize - '0' as usize));
                }
                Some((start, '{')) => {
                    chars.next();
                    let rest = &input[start + 1..];
                    let end = rest
                        .find('}')
                        .ok_or_else(|| format!("unterminated '${{' in '{}'", input))?;
                    let name = &rest[..end];
                    for _ in 0..=name.chars().count() {
                        chars.next();
                    }
                    let mut name_chars = name.chars();
                    let piece = match (name_chars.next(), name_chars.next()) {
                        (None, _) => return Err(format!("empty '${{}}' in '{}'", input)),
                        (Some(d), None) if d.is_ascii_digit() => {
                            Piece::Ref(d as usize - '0' as usize)
                        }
                        _ if name == METRIC_NAME_LABEL => Piece::Name,
                        _ => Piece::Label(name.to_string()),
                    };
                    push(&mut pieces, &mut text, piece);
                }
                Some((start, l)) if is_label_char(l) => {
                    let rest = &input[start..];
                    let end = rest.find(|c| !is_label_char(c)).unwrap_or(rest.len());
                    let name = &rest[..end];
                    for _ in 0..name.len() {
                        chars.next();
                    }
                    let piece = if name == METRIC_NAME_LABEL {
                        Piece::Name
                    } else {
                        Piece::Label(name.to_string())
                    };
                    push(&mut pieces, &mut text, piece);
                }
                Some((_, other)) => {
                    return Err(format!("invalid character '{}' after '$' in '{}'", other, input))
                }
            }
        }
        if !text.is_empty() {
            pieces.push(Piece::Text(text));
        }
        Ok(Self { pieces })
    }

    /// The template text when it has no references.
    pub fn literal(&self) -> Option<&str> {
        match self.pieces.as_slice() {
            [] => Some(""),
            [Piece::Text(s)] => Some(s),
            _ => None,
        }
    }

    /// Append the expansion to `out`.
    pub(crate) fn expand_into(&self, subject: &Subject<'_>, out: &mut String) {
        for piece in &self.pieces {
            match piece {
                Piece::Text(s) => out.push_str(s),
                Piece::Ref(n) => {
                    if let Some(m) = subject.captures.and_then(|caps| caps.get(*n)) {
                        out.push_str(m.as_str());
                    }
                }
                Piece::Label(name) => {
                    if let Some(value) = subject.labels.get(name) {
                        out.push_str(value);
                    }
                }
                Piece::Name => out.push_str(subject.name),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    fn expand(template: &str, labels: &LabelSet, caps: Option<&Captures<'_>>) -> String {
        let t = Template::parse(template).expect("template");
        let mut out = String::new();
        t.expand_into(
            &Subject {
                name: "http_requests",
                labels,
                captures: caps,
            },
            &mut out,
        );
        out
    }

    #[test]
    fn test_literal() {
        let t = Template::parse("plain text").expect("template");
        assert_eq!(t.literal(), Some("plain text"));
        let t = Template::parse("cost $$5 $").expect("template");
        assert_eq!(t.literal(), Some("cost $5 $"));
    }

    #[test]
    fn test_labels_and_name() {
        let labels = LabelSet::from_pairs([("region", "eu"), ("host", "a1")]).expect("labels");
        assert_eq!(expand("new_${region}", &labels, None), "new_eu");
        assert_eq!(expand("$host-$region.x", &labels, None), "a1-eu.x");
        assert_eq!(expand("${__name__}_total", &labels, None), "http_requests_total");
        assert_eq!(expand("[$missing]", &labels, None), "[]");
    }

    #[test]
    fn test_back_references() {
        let re = Regex::new(r"(\w+)-(\d+)").expect("regex");
        let caps = re.captures("node-42").expect("captures");
        let labels = LabelSet::new();
        assert_eq!(expand("$2/${1}", &labels, Some(&caps)), "42/node");
        assert_eq!(expand("x$7y", &labels, Some(&caps)), "xy");
        assert_eq!(expand("x$1y", &labels, None), "xy");
    }

    #[test]
    fn test_malformed() {
        assert!(Template::parse("a${b").is_err());
        assert!(Template::parse("a${}").is_err());
        assert!(Template::parse("a$-b").is_err());
    }
}
