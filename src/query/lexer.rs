//! Filter expression scanner.
//!
//! Turns a `where` string such as
//! `name=="Miles Davis" OR name=="Bill Evans", born>=1920` into an ordered
//! list of [`FilterToken`]s. The grammar is fixed:
//!
//! ```text
//! expr      := clause (sep clause)*
//! clause    := field op value
//! field     := [A-Za-z0-9_-]+
//! op        := "==" | "!=" | "<" | "<=" | ">" | ">=" | "IN" | "NOT IN" | "LIKE" | "=~" | "!~"
//! value     := '"' .*? '"' | number | '[' number (',' number)* ']' | "null"
//! sep       := "," | "AND" | "OR" | "NOT" | ""
//! ```
//!
//! Whitespace between segments is ignored. Anything outside the grammar is
//! rejected with [`DbError::MalformedFilter`].

use std::fmt;
use std::str::FromStr;

use serde_json::Number;

use crate::error::{DbError, DbResult};
use crate::storage::document::{Document, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equal,         // ==
    NotEqual,      // !=
    LessThan,      // <
    LessThanEq,    // <=
    GreaterThan,   // >
    GreaterThanEq, // >=
    In,            // IN
    NotIn,         // NOT IN
    Like,          // LIKE
    RegEx,         // =~
    NotRegEx,      // !~
}

impl Operator {
    pub const ALL: [Operator; 11] = [
        Operator::Equal,
        Operator::NotEqual,
        Operator::LessThan,
        Operator::LessThanEq,
        Operator::GreaterThan,
        Operator::GreaterThanEq,
        Operator::In,
        Operator::NotIn,
        Operator::Like,
        Operator::RegEx,
        Operator::NotRegEx,
    ];

    /// The lexeme, which is also the AQL operator.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::LessThan => "<",
            Operator::LessThanEq => "<=",
            Operator::GreaterThan => ">",
            Operator::GreaterThanEq => ">=",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::Like => "LIKE",
            Operator::RegEx => "=~",
            Operator::NotRegEx => "!~",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = DbError;

    fn from_str(s: &str) -> DbResult<Self> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        Operator::ALL
            .into_iter()
            .find(|op| op.as_str() == normalized)
            .ok_or_else(|| DbError::MalformedFilter(format!("unknown operator '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Separator {
    /// End of expression
    None,
    /// Closes the current clause; clauses are AND-ed
    Comma,
    And,
    Or,
    Not,
}

impl Separator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Separator::None => "",
            Separator::Comma => ",",
            Separator::And => "AND",
            Separator::Or => "OR",
            Separator::Not => "NOT",
        }
    }
}

impl FromStr for Separator {
    type Err = DbError;

    fn from_str(s: &str) -> DbResult<Self> {
        match s.trim() {
            "" => Ok(Separator::None),
            "," => Ok(Separator::Comma),
            "AND" => Ok(Separator::And),
            "OR" => Ok(Separator::Or),
            "NOT" => Ok(Separator::Not),
            other => Err(DbError::MalformedFilter(format!(
                "unknown separator '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Number(Number),
    NumericArray(Vec<Number>),
    Null,
    /// Only reachable from JSON example filters.
    Bool(bool),
}

impl Literal {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Literal::String(s) => serde_json::Value::String(s.clone()),
            Literal::Number(n) => serde_json::Value::Number(n.clone()),
            Literal::NumericArray(items) => serde_json::Value::Array(
                items.iter().cloned().map(serde_json::Value::Number).collect(),
            ),
            Literal::Null => serde_json::Value::Null,
            Literal::Bool(b) => serde_json::Value::Bool(*b),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterToken {
    pub field: String,
    pub operator: Operator,
    pub value: Literal,
    pub separator: Separator,
}

impl FilterToken {
    pub fn new(field: impl Into<String>, operator: Operator, value: Literal) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
            separator: Separator::None,
        }
    }

    /// Reject operator/value pairs the engine would silently coerce.
    pub(crate) fn validate(&self) -> DbResult<()> {
        let ok = match self.operator {
            Operator::In | Operator::NotIn => matches!(self.value, Literal::NumericArray(_)),
            Operator::Like | Operator::RegEx | Operator::NotRegEx => {
                matches!(self.value, Literal::String(_))
            }
            _ => true,
        };
        if ok {
            Ok(())
        } else {
            Err(DbError::MalformedFilter(format!(
                "operator {} cannot be applied to {:?} on field '{}'",
                self.operator, self.value, self.field
            )))
        }
    }
}

pub fn is_field_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '-'
}

pub fn is_valid_field(field: &str) -> bool {
    !field.is_empty() && field.chars().all(is_field_char)
}

/// Scan a `where` string. A string starting with `{` is read as a JSON
/// example document, anything else with the filter grammar.
pub fn scan_where(input: &str) -> DbResult<Vec<FilterToken>> {
    if input.trim_start().starts_with('{') {
        let value: serde_json::Value = serde_json::from_str(input)
            .map_err(|e| DbError::MalformedFilter(format!("invalid JSON filter: {}", e)))?;
        let doc = Document::from_json(value)
            .map_err(|_| DbError::MalformedFilter("JSON filter must be an object".to_string()))?;
        example_tokens(&doc)
    } else {
        scan(input)
    }
}

/// Scan a filter expression.
pub fn scan(input: &str) -> DbResult<Vec<FilterToken>> {
    Lexer::new(input).tokenize()
}

/// One equality clause per attribute of `example`.
pub fn example_tokens(example: &Document) -> DbResult<Vec<FilterToken>> {
    let mut tokens = Vec::with_capacity(example.len());
    for (field, value) in example.iter() {
        if !is_valid_field(field) {
            return Err(DbError::MalformedFilter(format!(
                "invalid field name '{}'",
                field
            )));
        }
        let literal = match value {
            Value::String(s) => Literal::String(s.clone()),
            Value::Number(n) => Literal::Number(n.clone()),
            Value::Bool(b) => Literal::Bool(*b),
            Value::Null => Literal::Null,
            Value::DateTime(dt) => Literal::String(dt.to_rfc3339()),
            Value::Array(items) => Literal::NumericArray(
                items
                    .iter()
                    .map(|item| match item {
                        Value::Number(n) => Ok(n.clone()),
                        _ => Err(DbError::MalformedFilter(format!(
                            "field '{}': only numeric arrays are supported",
                            field
                        ))),
                    })
                    .collect::<DbResult<_>>()?,
            ),
            Value::Object(_) => {
                return Err(DbError::MalformedFilter(format!(
                    "field '{}': nested documents are not supported",
                    field
                )))
            }
        };
        let mut token = FilterToken::new(field.clone(), Operator::Equal, literal);
        token.separator = Separator::Comma;
        tokens.push(token);
    }
    if let Some(last) = tokens.last_mut() {
        last.separator = Separator::None;
    }
    Ok(tokens)
}

pub struct Lexer {
    input: Vec<char>,
    position: usize,
    current_char: Option<char>,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        let chars: Vec<char> = input.chars().collect();
        let current_char = chars.first().copied();

        Self {
            input: chars,
            position: 0,
            current_char,
        }
    }

    pub fn tokenize(mut self) -> DbResult<Vec<FilterToken>> {
        let mut tokens = Vec::new();

        self.skip_whitespace();
        while self.current_char.is_some() {
            let token = self.read_clause()?;
            let last = token.separator == Separator::None;
            tokens.push(token);
            if last {
                break;
            }
        }

        Ok(tokens)
    }

    fn advance(&mut self) {
        self.position += 1;
        self.current_char = self.input.get(self.position).copied();
    }

    fn advance_by(&mut self, n: usize) {
        for _ in 0..n {
            self.advance();
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current_char {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn starts_with(&self, lexeme: &str) -> bool {
        let mut pos = self.position;
        for expected in lexeme.chars() {
            if self.input.get(pos) != Some(&expected) {
                return false;
            }
            pos += 1;
        }
        true
    }

    fn error(&self, expected: &str) -> DbError {
        match self.current_char {
            Some(ch) => DbError::MalformedFilter(format!(
                "expected {} but found '{}' at position {}",
                expected, ch, self.position
            )),
            None => DbError::MalformedFilter(format!(
                "expected {} but reached end of expression",
                expected
            )),
        }
    }

    fn read_clause(&mut self) -> DbResult<FilterToken> {
        let (field, operator) = self.read_field_and_operator()?;
        self.skip_whitespace();
        let value = self.read_value()?;
        self.skip_whitespace();
        let separator = self.read_separator()?;
        self.skip_whitespace();

        let token = FilterToken {
            field,
            operator,
            value,
            // A trailing separator with nothing after it is dropped.
            separator: if self.current_char.is_none() {
                Separator::None
            } else {
                separator
            },
        };
        token.validate()?;
        Ok(token)
    }

    fn read_field_and_operator(&mut self) -> DbResult<(String, Operator)> {
        let mut word = String::new();
        while let Some(ch) = self.current_char {
            if is_field_char(ch) {
                word.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        if word.is_empty() {
            return Err(self.error("field name"));
        }

        let had_space = self.current_char.is_some_and(char::is_whitespace);
        self.skip_whitespace();

        // `NOT IN` only when NOT is a word of its own; `KNOT IN` is field `KNOT`.
        if let Some(op) = self.read_operator() {
            return Ok((word, op));
        }

        // Keyword operator glued to the field: `nameLIKE"%Davis"`, `ageIN[1,2]`
        if !had_space {
            for op in [Operator::Like, Operator::In] {
                let lexeme = op.as_str();
                if word.len() > lexeme.len() && word.ends_with(lexeme) {
                    word.truncate(word.len() - lexeme.len());
                    return Ok((word, op));
                }
            }
        }

        Err(self.error("operator"))
    }

    fn read_operator(&mut self) -> Option<Operator> {
        // Longest lexemes first so `<=` wins over `<`.
        const SYMBOLS: [(&str, Operator); 8] = [
            ("==", Operator::Equal),
            ("!=", Operator::NotEqual),
            ("<=", Operator::LessThanEq),
            (">=", Operator::GreaterThanEq),
            ("=~", Operator::RegEx),
            ("!~", Operator::NotRegEx),
            ("<", Operator::LessThan),
            (">", Operator::GreaterThan),
        ];
        for (lexeme, op) in SYMBOLS {
            if self.starts_with(lexeme) {
                self.advance_by(lexeme.chars().count());
                return Some(op);
            }
        }

        if self.starts_with("NOT") {
            let saved = self.position;
            self.advance_by(3);
            let had_space = self.current_char.is_some_and(char::is_whitespace);
            self.skip_whitespace();
            if had_space && self.starts_with("IN") {
                self.advance_by(2);
                return Some(Operator::NotIn);
            }
            self.position = saved;
            self.current_char = self.input.get(saved).copied();
            return None;
        }
        if self.starts_with("LIKE") {
            self.advance_by(4);
            return Some(Operator::Like);
        }
        if self.starts_with("IN") {
            self.advance_by(2);
            return Some(Operator::In);
        }
        None
    }

    fn read_value(&mut self) -> DbResult<Literal> {
        match self.current_char {
            Some('"') => self.read_string(),
            Some('[') => self.read_array(),
            Some(ch) if ch.is_ascii_digit() => self.read_number().map(Literal::Number),
            Some('n') if self.starts_with("null") => {
                self.advance_by(4);
                Ok(Literal::Null)
            }
            _ => Err(self.error("value")),
        }
    }

    /// Quotes are stripped; no escape processing.
    fn read_string(&mut self) -> DbResult<Literal> {
        let start = self.position;
        self.advance(); // Skip opening quote

        let mut string = String::new();
        while let Some(ch) = self.current_char {
            if ch == '"' {
                self.advance(); // Skip closing quote
                return Ok(Literal::String(string));
            }
            string.push(ch);
            self.advance();
        }

        Err(DbError::MalformedFilter(format!(
            "unterminated string starting at position {}",
            start
        )))
    }

    fn read_array(&mut self) -> DbResult<Literal> {
        self.advance(); // Skip [
        let mut items = Vec::new();

        self.skip_whitespace();
        if self.current_char == Some(']') {
            self.advance();
            return Ok(Literal::NumericArray(items));
        }

        loop {
            self.skip_whitespace();
            items.push(self.read_number()?);
            self.skip_whitespace();
            match self.current_char {
                Some(',') => self.advance(),
                Some(']') => {
                    self.advance();
                    return Ok(Literal::NumericArray(items));
                }
                _ => return Err(self.error("',' or ']' in array")),
            }
        }
    }

    /// `digits ('.' digits)?`
    fn read_number(&mut self) -> DbResult<Number> {
        let start = self.position;
        let mut num_str = String::new();
        let mut has_dot = false;

        while let Some(ch) = self.current_char {
            if ch.is_ascii_digit() {
                num_str.push(ch);
                self.advance();
            } else if ch == '.' {
                if has_dot {
                    return Err(DbError::MalformedFilter(format!(
                        "invalid number '{}.' at position {}",
                        num_str, start
                    )));
                }
                has_dot = true;
                num_str.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        let well_formed = !num_str.is_empty()
            && !num_str.starts_with('.')
            && !num_str.ends_with('.');
        if !well_formed {
            return Err(DbError::MalformedFilter(format!(
                "invalid number '{}' at position {}",
                num_str, start
            )));
        }

        if !has_dot {
            if let Ok(n) = num_str.parse::<i64>() {
                return Ok(Number::from(n));
            }
        }
        num_str
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .ok_or_else(|| {
                DbError::MalformedFilter(format!("invalid number '{}' at position {}", num_str, start))
            })
    }

    fn read_separator(&mut self) -> DbResult<Separator> {
        let separator = match self.current_char {
            None => return Ok(Separator::None),
            Some(',') => Separator::Comma,
            Some(_) if self.starts_with("AND") => Separator::And,
            Some(_) if self.starts_with("OR") => Separator::Or,
            Some(_) if self.starts_with("NOT") => Separator::Not,
            Some(_) => return Err(self.error("separator")),
        };
        self.advance_by(separator.as_str().len());
        Ok(separator)
    }
}
