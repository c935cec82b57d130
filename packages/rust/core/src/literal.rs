//! Parser for the literal syntax language models emit as structured output.
//!
//! Models asked for "a list" or "a dictionary" answer with either JSON or a
//! Python-style literal (single quotes, `True`/`None`, tuples, trailing
//! commas), sometimes wrapped in a Markdown code fence. This module accepts
//! that subset and produces a [`serde_json::Value`]. It never evaluates
//! anything: unknown syntax is a parse error.

use indexmap::IndexMap;
use serde_json::{Number, Value};

use entitylens_shared::{EntityLensError, Result};

/// Deepest bracket nesting accepted before parsing gives up.
const MAX_DEPTH: usize = 128;

/// Parse a complete literal. Surrounding whitespace and a single code fence
/// are allowed; any other leading or trailing text is an error.
pub fn parse_literal(input: &str) -> Result<Value> {
    parse_complete(input, Parser::value)
}

/// Parse a list (or tuple) whose elements are all strings.
pub fn parse_string_list(input: &str) -> Result<Vec<String>> {
    match parse_literal(input)? {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::String(s) => Ok(s),
                other => Err(EntityLensError::parse(format!(
                    "element {i} is not a string: {other}"
                ))),
            })
            .collect(),
        other => Err(EntityLensError::parse(format!(
            "expected a list, found {}",
            kind(&other)
        ))),
    }
}

/// Parse a dictionary into string → text pairs, in the order written.
///
/// String values are taken as-is; any other value is rendered as JSON text.
/// A repeated key keeps its first position and its last value.
pub fn parse_string_map(input: &str) -> Result<IndexMap<String, String>> {
    if !strip_code_fence(input).starts_with('{') {
        let other = parse_literal(input)?;
        return Err(EntityLensError::parse(format!(
            "expected a dictionary, found {}",
            kind(&other)
        )));
    }
    let pairs = parse_complete(input, Parser::dict_pairs)?;
    Ok(pairs
        .into_iter()
        .map(|(k, v)| match v {
            Value::String(s) => (k, s),
            other => (k, other.to_string()),
        })
        .collect())
}

fn parse_complete<'a, T>(
    input: &'a str,
    parse: impl FnOnce(&mut Parser<'a>) -> Result<T>,
) -> Result<T> {
    let body = strip_code_fence(input);
    let mut parser = Parser::new(body);
    parser.skip_ws();
    let value = parse(&mut parser)?;
    parser.skip_ws();
    if !parser.at_end() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(value)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a dictionary",
    }
}

/// Remove one surrounding ```` ``` ```` fence (with optional language tag).
fn strip_code_fence(input: &str) -> &str {
    let trimmed = input.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (`json`, `python`, ...) up to the first newline.
    let rest = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

// ---------------------------------------------------------------------------
// Recursive-descent parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            depth: 0,
        }
    }

    fn error(&self, msg: &str) -> EntityLensError {
        EntityLensError::parse(format!("{msg} at offset {}", self.pos))
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn value(&mut self) -> Result<Value> {
        match self.peek() {
            Some('"') | Some('\'') => self.string().map(Value::String),
            Some('[' | '(' | '{') => self.nested(),
            Some(c) if c == '-' || c == '+' || c.is_ascii_digit() => self.number(),
            Some(c) if c.is_ascii_alphabetic() => self.keyword(),
            Some(_) => Err(self.error("unexpected character")),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn nested(&mut self) -> Result<Value> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }
        self.depth += 1;
        let value = match self.peek() {
            Some('(') => self.tuple(),
            Some('{') => self.dict_pairs().map(|pairs| Value::Object(pairs.into_iter().collect())),
            _ => self.items('[', ']', Self::value).map(Value::Array),
        };
        self.depth -= 1;
        value
    }

    fn keyword(&mut self) -> Result<Value> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == '_') {
            self.bump();
        }
        match &self.src[start..self.pos] {
            "True" | "true" => Ok(Value::Bool(true)),
            "False" | "false" => Ok(Value::Bool(false)),
            "None" | "null" => Ok(Value::Null),
            word => {
                self.pos = start;
                Err(self.error(&format!("unknown identifier `{word}`")))
            }
        }
    }

    fn number(&mut self) -> Result<Value> {
        let start = self.pos;
        if matches!(self.peek(), Some('-') | Some('+')) {
            self.bump();
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' => {}
                '.' | 'e' | 'E' => is_float = true,
                '+' | '-' if is_float => {}
                _ => break,
            }
            self.bump();
        }
        let text = &self.src[start..self.pos];
        let number = if is_float {
            text.parse::<f64>().ok().and_then(Number::from_f64)
        } else {
            text.parse::<i64>().ok().map(Number::from)
        };
        number
            .map(Value::Number)
            .ok_or_else(|| {
                EntityLensError::parse(format!("invalid number `{text}` at offset {start}"))
            })
    }

    fn string(&mut self) -> Result<String> {
        let quote = self.bump().ok_or_else(|| self.error("expected string"))?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => self.escape(&mut out)?,
                Some(c) => out.push(c),
            }
        }
    }

    fn escape(&mut self, out: &mut String) -> Result<()> {
        match self.bump() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('0') => out.push('\0'),
            Some(c @ ('\\' | '\'' | '"' | '/')) => out.push(c),
            Some('u') => out.push(self.unicode_escape()?),
            // Unknown escapes keep the backslash.
            Some(c) => {
                out.push('\\');
                out.push(c);
            }
            None => return Err(self.error("unterminated escape")),
        }
        Ok(())
    }

    fn unicode_escape(&mut self) -> Result<char> {
        let high = self.hex4()?;
        if (0xD800..0xDC00).contains(&high) {
            // Surrogate pair, as JSON encodes astral characters.
            if self.src[self.pos..].starts_with("\\u") {
                self.pos += 2;
                let low = self.hex4()?;
                if (0xDC00..0xE000).contains(&low) {
                    let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
                    return char::from_u32(code).ok_or_else(|| self.error("invalid surrogate pair"));
                }
            }
            return Err(self.error("unpaired surrogate"));
        }
        char::from_u32(high).ok_or_else(|| self.error("invalid unicode escape"))
    }

    fn hex4(&mut self) -> Result<u32> {
        let end = self.pos + 4;
        let digits = self
            .src
            .get(self.pos..end)
            .ok_or_else(|| self.error("truncated unicode escape"))?;
        let code =
            u32::from_str_radix(digits, 16).map_err(|_| self.error("invalid unicode escape"))?;
        self.pos = end;
        Ok(code)
    }

    /// `(a, b)` is a sequence; `(a)` is just a parenthesized value.
    fn tuple(&mut self) -> Result<Value> {
        self.eat('(');
        self.skip_ws();
        if self.eat(')') {
            return Ok(Value::Array(Vec::new()));
        }
        let first = self.value()?;
        self.skip_ws();
        if self.eat(')') {
            return Ok(first);
        }
        if !self.eat(',') {
            return Err(self.error("expected `,` or `)`"));
        }
        self.rest_of_items(')', vec![first], Self::value).map(Value::Array)
    }

    fn dict_pairs(&mut self) -> Result<Vec<(String, Value)>> {
        self.items('{', '}', |p| {
            let key = match p.peek() {
                Some('"') | Some('\'') => p.string()?,
                _ => return Err(p.error("dictionary keys must be strings")),
            };
            p.skip_ws();
            if !p.eat(':') {
                return Err(p.error("expected `:`"));
            }
            p.skip_ws();
            let value = p.value()?;
            Ok((key, value))
        })
    }

    /// Comma-separated items between `open` and `close`, trailing comma allowed.
    fn items<T>(
        &mut self,
        open: char,
        close: char,
        item: impl FnMut(&mut Self) -> Result<T>,
    ) -> Result<Vec<T>> {
        if !self.eat(open) {
            return Err(self.error(&format!("expected `{open}`")));
        }
        self.rest_of_items(close, Vec::new(), item)
    }

    fn rest_of_items<T>(
        &mut self,
        close: char,
        mut out: Vec<T>,
        mut item: impl FnMut(&mut Self) -> Result<T>,
    ) -> Result<Vec<T>> {
        loop {
            self.skip_ws();
            if self.eat(close) {
                return Ok(out);
            }
            out.push(item(self)?);
            self.skip_ws();
            if self.eat(',') {
                continue;
            }
            if self.eat(close) {
                return Ok(out);
            }
            return Err(self.error(&format!("expected `,` or `{close}`")));
        }
    }
}
