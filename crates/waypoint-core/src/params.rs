//! Typed access to loosely-typed action parameters.
//!
//! Config-sourced parameters arrive as JSON values. `Params` gives each
//! primitive a required and an optional accessor with fixed coercion rules:
//!
//! - integers accept integral floats (`3.0`), floats accept integers
//! - durations accept a suffixed string (`"250ms"`, `"2s"`, `"1.5m"`, `"1h"`)
//!   or a bare number of seconds
//!
//! Every failure is a [`WaypointError::Parameter`] naming the parameter.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;

use crate::config::ActionSpec;
use crate::error::{ParamErrorKind, Result, WaypointError};

pub struct Params<'a> {
    owner: &'a str,
    values: &'a HashMap<String, Value>,
}

impl<'a> Params<'a> {
    pub fn new(owner: &'a str, values: &'a HashMap<String, Value>) -> Self {
        Self { owner, values }
    }

    fn missing(&self, key: &str) -> WaypointError {
        WaypointError::Parameter {
            name: format!("{}.{}", self.owner, key),
            kind: ParamErrorKind::Missing,
        }
    }

    /// Error for a present parameter whose value is not one of `expected`.
    pub fn mismatch(&self, key: &str, expected: &'static str) -> WaypointError {
        WaypointError::Parameter {
            name: format!("{}.{}", self.owner, key),
            kind: ParamErrorKind::TypeMismatch { expected },
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn optional_value(&self, key: &str) -> Option<&'a Value> {
        self.values.get(key)
    }

    pub fn required_value(&self, key: &str) -> Result<&'a Value> {
        self.values.get(key).ok_or_else(|| self.missing(key))
    }

    pub fn optional_str(&self, key: &str) -> Result<Option<&'a str>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(self.mismatch(key, "string")),
        }
    }

    pub fn required_str(&self, key: &str) -> Result<&'a str> {
        self.optional_str(key)?.ok_or_else(|| self.missing(key))
    }

    pub fn optional_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(self.mismatch(key, "bool")),
        }
    }

    pub fn required_bool(&self, key: &str) -> Result<bool> {
        self.optional_bool(key)?.ok_or_else(|| self.missing(key))
    }

    pub fn optional_i64(&self, key: &str) -> Result<Option<i64>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(Value::Number(n)) => {
                if let Some(i) = n.as_i64() {
                    return Ok(Some(i));
                }
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(Some(f as i64)),
                    _ => Err(self.mismatch(key, "integer")),
                }
            }
            Some(_) => Err(self.mismatch(key, "integer")),
        }
    }

    pub fn required_i64(&self, key: &str) -> Result<i64> {
        self.optional_i64(key)?.ok_or_else(|| self.missing(key))
    }

    /// Non-negative integer that fits in `u32`.
    pub fn optional_u32(&self, key: &str) -> Result<Option<u32>> {
        match self.optional_i64(key)? {
            None => Ok(None),
            Some(i) => u32::try_from(i)
                .map(Some)
                .map_err(|_| self.mismatch(key, "non-negative integer")),
        }
    }

    pub fn optional_f64(&self, key: &str) -> Result<Option<f64>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_f64()
                .map(Some)
                .ok_or_else(|| self.mismatch(key, "number")),
            Some(_) => Err(self.mismatch(key, "number")),
        }
    }

    pub fn required_f64(&self, key: &str) -> Result<f64> {
        self.optional_f64(key)?.ok_or_else(|| self.missing(key))
    }

    pub fn optional_duration(&self, key: &str) -> Result<Option<Duration>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => parse_duration(s)
                .map(Some)
                .ok_or_else(|| self.mismatch(key, "duration")),
            Some(Value::Number(n)) => n
                .as_f64()
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .map(|secs| Some(Duration::from_nanos((secs * 1e9).round() as u64)))
                .ok_or_else(|| self.mismatch(key, "duration")),
            Some(_) => Err(self.mismatch(key, "duration")),
        }
    }

    pub fn optional_str_list(&self, key: &str) -> Result<Option<Vec<String>>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| self.mismatch(key, "list of strings"))
                })
                .collect::<Result<Vec<_>>>()
                .map(Some),
            Some(_) => Err(self.mismatch(key, "list of strings")),
        }
    }

    /// Nested action specs under `key` (an array of tables).
    pub fn action_list(&self, key: &str) -> Result<Vec<ActionSpec>> {
        match self.values.get(key) {
            None => Err(self.missing(key)),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    serde_json::from_value::<ActionSpec>(v.clone())
                        .map_err(|_| self.mismatch(key, "list of actions"))
                })
                .collect(),
            Some(_) => Err(self.mismatch(key, "list of actions")),
        }
    }

    /// A single nested action spec under `key`, if present.
    pub fn optional_action(&self, key: &str) -> Result<Option<ActionSpec>> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v @ Value::Object(_)) => serde_json::from_value::<ActionSpec>(v.clone())
                .map(Some)
                .map_err(|_| self.mismatch(key, "action")),
            Some(_) => Err(self.mismatch(key, "action")),
        }
    }

    pub fn required_action(&self, key: &str) -> Result<ActionSpec> {
        self.optional_action(key)?.ok_or_else(|| self.missing(key))
    }

    /// Array of tables under `key`, each exposed as its own `Params`.
    pub fn table_list(&self, key: &str) -> Result<Vec<HashMap<String, Value>>> {
        match self.values.get(key) {
            None => Err(self.missing(key)),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Value::Object(map) => Ok(map
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect()),
                    _ => Err(self.mismatch(key, "list of tables")),
                })
                .collect(),
            Some(_) => Err(self.mismatch(key, "list of tables")),
        }
    }
}

/// Parse `"250ms"`, `"2s"`, `"1.5m"`, `"1h"`, or a bare number of seconds.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let s = input.trim();
    let (number, millis_per_unit) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1.0)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1_000.0)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60_000.0)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3_600_000.0)
    } else {
        (s, 1_000.0)
    };
    let value: f64 = number.trim().parse().ok()?;
    let millis = value * millis_per_unit;
    if !millis.is_finite() || millis < 0.0 {
        return None;
    }
    Some(Duration::from_nanos((millis * 1_000_000.0).round() as u64))
}
