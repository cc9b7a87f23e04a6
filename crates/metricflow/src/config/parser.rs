// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lexer and parser for the block configuration language.

use super::{ConfigItem, ConfigValue};
use crate::error::ConfigError;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Str(String),
    Regex(String),
    LBrace,
    RBrace,
    Newline,
    Semicolon,
    Eof,
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    line: usize,
    file: Arc<str>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str, file: Arc<str>) -> Self {
        Self {
            input,
            pos: 0,
            line: 1,
            file,
        }
    }

    fn error(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::new(self.file.as_ref(), self.line, message)
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.input[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn next_char(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_blank(&mut self) {
        while let Some(ch) = self.peek_char() {
            match ch {
                ' ' | '\t' | '\r' => {
                    self.next_char();
                }
                '\\' if matches!(self.peek_second(), Some('\n')) => {
                    self.next_char();
                    self.next_char();
                    self.line += 1;
                }
                '#' => {
                    while let Some(c) = self.peek_char() {
                        if c == '\n' {
                            break;
                        }
                        self.next_char();
                    }
                }
                _ => break,
            }
        }
    }

    fn read_string(&mut self) -> Result<String, ConfigError> {
        self.next_char(); // opening quote
        let mut out = String::new();
        loop {
            match self.next_char() {
                None | Some('\n') => return Err(self.error("unterminated string")),
                Some('"') => return Ok(out),
                Some('\\') => match self.next_char() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('\n') => self.line += 1,
                    Some(c) => out.push(c),
                    None => return Err(self.error("unterminated string")),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn read_regex(&mut self) -> Result<String, ConfigError> {
        self.next_char(); // opening slash
        let mut out = String::new();
        loop {
            match self.next_char() {
                None | Some('\n') => return Err(self.error("unterminated regex")),
                Some('/') => return Ok(out),
                Some('\\') => match self.next_char() {
                    Some('/') => out.push('/'),
                    Some(c) => {
                        out.push('\\');
                        out.push(c);
                    }
                    None => return Err(self.error("unterminated regex")),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn read_word(&mut self) -> String {
        let start = self.pos;
        while let Some(ch) = self.peek_char() {
            if ch.is_whitespace() || matches!(ch, '{' | '}' | '"' | ';' | '#') {
                break;
            }
            self.next_char();
        }
        self.input[start..self.pos].to_string()
    }

    /// Next token and the line it starts on.
    fn next_token(&mut self) -> Result<(Token, usize), ConfigError> {
        self.skip_blank();
        let line = self.line;
        let ch = match self.peek_char() {
            Some(c) => c,
            None => return Ok((Token::Eof, line)),
        };

        let token = match ch {
            '\n' => {
                self.next_char();
                self.line += 1;
                Token::Newline
            }
            '{' => {
                self.next_char();
                Token::LBrace
            }
            '}' => {
                self.next_char();
                Token::RBrace
            }
            ';' => {
                self.next_char();
                Token::Semicolon
            }
            '"' => Token::Str(self.read_string()?),
            '/' => Token::Regex(self.read_regex()?),
            _ => Token::Word(self.read_word()),
        };
        Ok((token, line))
    }
}

fn word_value(word: String) -> ConfigValue {
    if word.eq_ignore_ascii_case("true") {
        return ConfigValue::Boolean(true);
    }
    if word.eq_ignore_ascii_case("false") {
        return ConfigValue::Boolean(false);
    }
    let numeric_start = word
        .chars()
        .next()
        .map(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.'))
        .unwrap_or(false);
    if numeric_start {
        if let Ok(n) = word.parse::<f64>() {
            return ConfigValue::Number(n);
        }
    }
    ConfigValue::String(word)
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    line: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str, file: Arc<str>) -> Result<Self, ConfigError> {
        let mut lexer = Lexer::new(input, file);
        let (current, line) = lexer.next_token()?;
        Ok(Self {
            lexer,
            current,
            line,
        })
    }

    fn advance(&mut self) -> Result<(), ConfigError> {
        let (token, line) = self.lexer.next_token()?;
        self.current = token;
        self.line = line;
        Ok(())
    }

    fn error(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::new(self.lexer.file.as_ref(), self.line, message)
    }

    fn parse_items(&mut self, nested: bool) -> Result<Vec<ConfigItem>, ConfigError> {
        let mut items = Vec::new();
        loop {
            match &self.current {
                Token::Newline | Token::Semicolon => self.advance()?,
                Token::Eof if nested => return Err(self.error("missing '}'")),
                Token::Eof => return Ok(items),
                Token::RBrace if nested => return Ok(items),
                Token::RBrace => return Err(self.error("unexpected '}'")),
                Token::Word(_) => items.push(self.parse_item()?),
                other => return Err(self.error(format!("expected option name, got {:?}", other))),
            }
        }
    }

    fn parse_item(&mut self) -> Result<ConfigItem, ConfigError> {
        let key = match std::mem::replace(&mut self.current, Token::Eof) {
            Token::Word(key) => key,
            other => return Err(self.error(format!("expected option name, got {:?}", other))),
        };
        let mut item = ConfigItem::new(key, self.lexer.file.clone(), self.line);
        self.advance()?;

        loop {
            match std::mem::replace(&mut self.current, Token::Eof) {
                Token::Str(s) => item.values.push(ConfigValue::String(s)),
                Token::Regex(r) => item.values.push(ConfigValue::Regex(r)),
                Token::Word(w) => item.values.push(word_value(w)),
                Token::LBrace => {
                    self.advance()?;
                    let children = self.parse_items(true)?;
                    // parse_items returns on the closing brace
                    self.advance()?;
                    item.children = Some(children);
                    return match self.current {
                        Token::Newline | Token::Semicolon | Token::Eof | Token::RBrace => Ok(item),
                        _ => Err(self.error("expected end of line after '}'")),
                    };
                }
                end @ (Token::Newline | Token::Semicolon | Token::Eof | Token::RBrace) => {
                    self.current = end;
                    return Ok(item);
                }
            }
            self.advance()?;
        }
    }
}

/// Parse configuration text. `file` is used in error positions.
pub fn parse_str(input: &str, file: &str) -> Result<Vec<ConfigItem>, ConfigError> {
    let mut parser = Parser::new(input, Arc::from(file))?;
    parser.parse_items(false)
}

/// Read and parse a configuration file.
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Vec<ConfigItem>, ConfigError> {
    let path = path.as_ref();
    let name = path.display().to_string();
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::new(name.as_str(), 0, format!("cannot read file: {}", e)))?;
    parse_str(&content, &name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_blocks_and_lines() {
        let text = "\
# leading comment
filter \"main\" {
    if \"cpu\" {   # inline comment
        drop
    }
    label-set env \"prod\"; label-unset tmp
}
";
        let items = parse_str(text, "test.conf").expect("parse");
        assert_eq!(items.len(), 1);
        let filter = &items[0];
        assert_eq!(filter.key, "filter");
        assert_eq!(filter.line, 2);
        assert_eq!(filter.single_string(), Some("main"));

        let children = filter.children();
        assert_eq!(children.len(), 3);
        assert_eq!(children[0].key, "if");
        assert_eq!(children[0].line, 3);
        assert_eq!(children[0].children()[0].key, "drop");
        assert_eq!(children[0].children()[0].line, 4);
        assert_eq!(children[1].strings(), Some(vec!["env", "prod"]));
        assert_eq!(children[2].key, "label-unset");
        assert_eq!(children[2].line, 6);
    }

    #[test]
    fn test_value_kinds() {
        let items = parse_str(r#"opt "s" 4.5 true /a\/b\d/ bare"#, "t").expect("parse");
        assert_eq!(
            items[0].values,
            vec![
                ConfigValue::String("s".into()),
                ConfigValue::Number(4.5),
                ConfigValue::Boolean(true),
                ConfigValue::Regex(r"a/b\d".into()),
                ConfigValue::String("bare".into()),
            ]
        );
    }

    #[test]
    fn test_line_continuation() {
        let items = parse_str("write \\\n  \"a\" \"b\"\nnext\n", "t").expect("parse");
        assert_eq!(items[0].strings(), Some(vec!["a", "b"]));
        assert_eq!(items[1].line, 3);
    }

    #[test]
    fn test_errors_carry_line() {
        let err = parse_str("a {\n  b\n", "f.conf").expect_err("missing brace");
        assert_eq!(err.file, "f.conf");
        assert!(err.message.contains("missing '}'"));

        let err = parse_str("a\n}\n", "f.conf").expect_err("stray brace");
        assert_eq!(err.line, 2);

        let err = parse_str("a\nb \"open\n", "f.conf").expect_err("unterminated");
        assert_eq!(err.line, 2);

        let err = parse_str("a { b } c\n", "f.conf").expect_err("junk after block");
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_dump_round_trips() {
        let text = "filter \"x\" {\n    metric-sub /^a/ \"b\"\n}\n";
        let items = parse_str(text, "t").expect("parse");
        assert_eq!(items[0].to_string(), text);
    }
}
