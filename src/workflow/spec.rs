//! Block specification and evaluation criteria decoding
//!
//! Upstream configuration arrives either as JSON lists or as JSON text
//! holding a list. Anything undecodable becomes an empty list and a warning;
//! malformed configuration never fails a session.

use serde::Serialize;
use serde_json::{Map, Value};

/// A named, point-weighted evaluation dimension
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Criterion {
    pub name: String,
    /// Never negative
    pub max_points: f64,
    pub summary_instructions: String,
    pub grading_instructions: String,
}

impl Criterion {
    /// Decode one criterion record; non-objects are skipped
    fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let name = text_field(obj, "criterion_name")
            .or_else(|| text_field(obj, "name"))
            .unwrap_or_default();

        let max_points = match obj.get("max_points") {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
            _ => 0.0,
        };

        Some(Self {
            name,
            max_points: if max_points.is_finite() {
                max_points.max(0.0)
            } else {
                0.0
            },
            summary_instructions: text_field(obj, "summary_instructions").unwrap_or_default(),
            grading_instructions: text_field(obj, "grading_instructions").unwrap_or_default(),
        })
    }
}

fn text_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Null | Value::String(_) => None,
        other => Some(other.to_string()),
    }
}

/// Decode a list that may be stored as JSON text
fn decode_list(raw: &Value, what: &str) -> Vec<Value> {
    match raw {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        Value::String(text) if text.trim().is_empty() => Vec::new(),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Array(items)) => items,
            Ok(other) => {
                tracing::warn!(what, found = %type_name(&other), "Expected a list, using empty list");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(what, error = %e, "Failed to decode list, using empty list");
                Vec::new()
            }
        },
        other => {
            tracing::warn!(what, found = %type_name(other), "Expected a list, using empty list");
            Vec::new()
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Decode a block's specification records
pub fn parse_specifications(raw: &Value) -> Vec<Value> {
    decode_list(raw, "specifications")
}

/// Decode a block's evaluation criteria
pub fn parse_criteria(raw: &Value) -> Vec<Criterion> {
    decode_list(raw, "criteria")
        .iter()
        .filter_map(Criterion::from_value)
        .collect()
}

/// Sum of `max_points` across criteria
pub fn total_points(criteria: &[Criterion]) -> f64 {
    criteria.iter().map(|c| c.max_points).sum()
}

/// Render a point value without a trailing `.0` for whole numbers
pub fn format_points(points: f64) -> String {
    if points.fract().abs() < f64::EPSILON {
        format!("{points:.0}")
    } else {
        format!("{points}")
    }
}

/// Read-only view over the first specification record
///
/// Most workflows configure themselves from a single record of named text
/// fields; missing fields read as empty strings.
#[derive(Debug, Default)]
pub struct SpecRecord<'a> {
    fields: Option<&'a Map<String, Value>>,
}

impl<'a> SpecRecord<'a> {
    pub fn first(questions: &'a [Value]) -> Self {
        Self {
            fields: questions.first().and_then(Value::as_object),
        }
    }

    /// Field as text; non-string values are rendered as JSON
    pub fn text(&self, key: &str) -> String {
        self.fields
            .and_then(|f| text_field(f, key))
            .unwrap_or_default()
    }

    pub fn text_or(&self, key: &str, default: &str) -> String {
        let value = self.text(key);
        if value.is_empty() {
            default.to_string()
        } else {
            value
        }
    }

    /// Raw field value
    pub fn value(&self, key: &str) -> Option<&'a Value> {
        self.fields.and_then(|f| f.get(key))
    }
}
