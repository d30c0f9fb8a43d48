//! Minimal condition expressions for transitions and config-built predicates.
//!
//! Supported forms, each over a single context key (the `data.` prefix is optional):
//! - `always`, or an empty string
//! - `data.key == "value"` / `data.key != "value"`
//! - `data.key` (key present and truthy)
//! - `!data.key` (key absent or falsy)
//!
//! Literals may be quoted strings, `true`/`false`, `null`, numbers, or bare
//! words (read as strings). Nothing else is supported on purpose: no boolean
//! connectives, no arithmetic, no nested paths.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::Value;

use waypoint_core::config::ALWAYS;
use waypoint_core::context::ExecutionContext;
use waypoint_core::error::{Result, WaypointError};

use crate::action::{Predicate, PredicateRef};

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Always,
    Equals { key: String, value: Value },
    NotEquals { key: String, value: Value },
    Truthy { key: String },
    Falsy { key: String },
}

impl Expression {
    pub fn parse(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        if expr.is_empty() || expr.eq_ignore_ascii_case(ALWAYS) {
            return Ok(Self::Always);
        }

        if let Some((key, op, value)) = split_comparison(expr) {
            let key = parse_key(key, expr)?;
            let value = parse_literal(value);
            return Ok(match op {
                "!=" => Self::NotEquals { key, value },
                _ => Self::Equals { key, value },
            });
        }

        if let Some(rest) = expr.strip_prefix('!') {
            return Ok(Self::Falsy {
                key: parse_key(rest, expr)?,
            });
        }

        Ok(Self::Truthy {
            key: parse_key(expr, expr)?,
        })
    }

    /// Evaluate against the context. Never fails once parsed.
    pub fn matches(&self, ctx: &ExecutionContext) -> bool {
        match self {
            Self::Always => true,
            Self::Equals { key, value } => ctx.get(key).is_some_and(|v| values_equal(&v, value)),
            Self::NotEquals { key, value } => !ctx.get(key).is_some_and(|v| values_equal(&v, value)),
            Self::Truthy { key } => ctx.get(key).is_some_and(|v| is_truthy(&v)),
            Self::Falsy { key } => !ctx.get(key).is_some_and(|v| is_truthy(&v)),
        }
    }

    /// The context key this expression reads, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Always => None,
            Self::Equals { key, .. }
            | Self::NotEquals { key, .. }
            | Self::Truthy { key }
            | Self::Falsy { key } => Some(key),
        }
    }
}

impl FromStr for Expression {
    type Err = WaypointError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => f.write_str(ALWAYS),
            Self::Equals { key, value } => write!(f, "data.{} == {}", key, value),
            Self::NotEquals { key, value } => write!(f, "data.{} != {}", key, value),
            Self::Truthy { key } => write!(f, "data.{}", key),
            Self::Falsy { key } => write!(f, "!data.{}", key),
        }
    }
}

impl Predicate for Expression {
    fn evaluate(&self, ctx: &ExecutionContext) -> Result<bool> {
        Ok(self.matches(ctx))
    }
}

/// Parse `expr` into a shareable predicate.
pub fn predicate(expr: &str) -> Result<PredicateRef> {
    Ok(Arc::new(Expression::parse(expr)?))
}

/// Split `key OP value` at the first `==` or `!=` outside a quoted string.
fn split_comparison(expr: &str) -> Option<(&str, &'static str, &str)> {
    let bytes = expr.as_bytes();
    let mut quote: Option<u8> = None;
    for (i, &b) in bytes.iter().enumerate() {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if bytes.get(i + 1) == Some(&b'=') && (b == b'=' || b == b'!') => {
                let op = if b == b'!' { "!=" } else { "==" };
                return Some((expr[..i].trim(), op, expr[i + 2..].trim()));
            }
            None => {}
        }
    }
    None
}

fn parse_key(raw: &str, expr: &str) -> Result<String> {
    let raw = raw.trim();
    let key = raw.strip_prefix("data.").unwrap_or(raw);
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if !valid {
        return Err(WaypointError::Expression(expr.to_string()));
    }
    Ok(key.to_string())
}

fn parse_literal(raw: &str) -> Value {
    let raw = raw.trim();
    for quote in ['"', '\''] {
        if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
            return Value::String(raw[1..raw.len() - 1].to_string());
        }
    }
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if f.is_finite() {
            return Value::from(f);
        }
    }
    Value::String(raw.to_string())
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => actual == expected,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
