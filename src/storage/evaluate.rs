//! Predicate evaluation for the in-process engine.
//!
//! Mirrors AQL semantics closely enough for the filter grammar:
//! - missing attributes read as `null`
//! - ordering across types is `null < bool < number < string < array < object`
//! - `LIKE` supports `%`, `_` and backslash escapes, case-sensitive

use std::cmp::Ordering;

use regex::Regex;

use crate::error::{DbError, DbResult};
use crate::query::compiler::{BindVars, FilterClause, Predicate};
use crate::query::lexer::Operator;
use crate::query::sort::SortKey;

use super::document::{Document, Value};

const MAX_REGEX_PATTERN_LEN: usize = 1024;
const MAX_REGEX_SIZE: usize = 1 << 20;

/// Build a regex with size limits
pub fn safe_regex(pattern: &str) -> DbResult<Regex> {
    if pattern.len() > MAX_REGEX_PATTERN_LEN {
        return Err(DbError::MalformedFilter(format!(
            "Regex pattern too long: {} bytes (max {})",
            pattern.len(),
            MAX_REGEX_PATTERN_LEN
        )));
    }

    regex::RegexBuilder::new(pattern)
        .size_limit(MAX_REGEX_SIZE)
        .build()
        .map_err(|e| DbError::MalformedFilter(format!("Invalid regex pattern: {}", e)))
}

/// Translate an AQL `LIKE` pattern into an anchored regex.
pub fn like_to_regex(pattern: &str) -> String {
    let mut regex_pattern = String::with_capacity(pattern.len() + 2);
    regex_pattern.push('^');
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => regex_pattern.push_str(".*"),
            '_' => regex_pattern.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    regex_pattern.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            _ => regex_pattern.push_str(&regex::escape(&c.to_string())),
        }
    }
    regex_pattern.push('$');
    regex_pattern
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) | Value::DateTime(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

#[inline]
pub fn values_equal(left: &Value, right: &Value) -> bool {
    compare_values(left, right) == Ordering::Equal
}

pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }

    match (a, b) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => {
            let a_f64 = a.as_f64().unwrap_or(0.0);
            let b_f64 = b.as_f64().unwrap_or(0.0);
            a_f64.partial_cmp(&b_f64).unwrap_or(Ordering::Equal)
        }
        (Value::Array(a), Value::Array(b)) => {
            for (x, y) in a.iter().zip(b.iter()) {
                let ord = compare_values(x, y);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            a.len().cmp(&b.len())
        }
        (Value::Object(a), Value::Object(b)) => {
            let mut a_keys: Vec<&String> = a.iter().map(|(k, _)| k).collect();
            let mut b_keys: Vec<&String> = b.iter().map(|(k, _)| k).collect();
            a_keys.sort();
            b_keys.sort();
            let ord = a_keys.cmp(&b_keys);
            if ord != Ordering::Equal {
                return ord;
            }
            for key in a_keys {
                let ord = compare_values(
                    a.get(key).unwrap_or(&Value::Null),
                    b.get(key).unwrap_or(&Value::Null),
                );
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        }
        _ => string_form(a).cmp(&string_form(b)),
    }
}

fn string_form(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::DateTime(dt) => dt.to_rfc3339(),
        other => other.to_json().to_string(),
    }
}

fn bound<'a>(bind_vars: &'a BindVars, name: &str) -> DbResult<&'a serde_json::Value> {
    bind_vars
        .get(name)
        .ok_or_else(|| DbError::ProtocolError(format!("bind parameter '@{}' is not set", name)))
}

pub fn evaluate_predicate(doc: &Document, predicate: &Predicate, bind_vars: &BindVars) -> DbResult<bool> {
    let field = bound(bind_vars, &predicate.field_param)?
        .as_str()
        .ok_or_else(|| {
            DbError::ProtocolError(format!("@{} must be a string", predicate.field_param))
        })?;
    let right = Value::from(bound(bind_vars, &predicate.value_param)?.clone());
    let left = doc.get(field).cloned().unwrap_or(Value::Null);

    let result = match predicate.operator {
        Operator::Equal => values_equal(&left, &right),
        Operator::NotEqual => !values_equal(&left, &right),
        Operator::LessThan => compare_values(&left, &right) == Ordering::Less,
        Operator::LessThanEq => compare_values(&left, &right) != Ordering::Greater,
        Operator::GreaterThan => compare_values(&left, &right) == Ordering::Greater,
        Operator::GreaterThanEq => compare_values(&left, &right) != Ordering::Less,
        Operator::In | Operator::NotIn => {
            let found = match &right {
                Value::Array(items) => items.iter().any(|item| values_equal(&left, item)),
                _ => false,
            };
            found == (predicate.operator == Operator::In)
        }
        Operator::Like => match (&left, right.as_str()) {
            (Value::String(s), Some(pattern)) => safe_regex(&like_to_regex(pattern))?.is_match(s),
            _ => false,
        },
        Operator::RegEx | Operator::NotRegEx => {
            let pattern = right.as_str().ok_or_else(|| {
                DbError::MalformedFilter("regex operand must be a string".to_string())
            })?;
            let re = safe_regex(pattern)?;
            let is_match = match &left {
                Value::String(s) => re.is_match(s),
                _ => false,
            };
            is_match == (predicate.operator == Operator::RegEx)
        }
    };

    Ok(if predicate.negated { !result } else { result })
}

pub fn evaluate_clause(doc: &Document, clause: &FilterClause, bind_vars: &BindVars) -> DbResult<bool> {
    for group in &clause.any_of {
        let mut all = true;
        for predicate in group {
            if !evaluate_predicate(doc, predicate, bind_vars)? {
                all = false;
                break;
            }
        }
        if all {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn matches_all(doc: &Document, clauses: &[FilterClause], bind_vars: &BindVars) -> DbResult<bool> {
    for clause in clauses {
        if !evaluate_clause(doc, clause, bind_vars)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Stable multi-key sort; the first key is primary.
pub fn sort_documents(docs: &mut [Document], keys: &[SortKey]) {
    if keys.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        for key in keys {
            let ord = compare_values(
                a.get(&key.field).unwrap_or(&Value::Null),
                b.get(&key.field).unwrap_or(&Value::Null),
            );
            let ord = if key.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}
