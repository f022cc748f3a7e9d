//! Sanitizer Module
//!
//! Coerces raw key/value pairs to the type registered in the [`Schema`] and
//! applies field-specific rules. Sanitization never fails: anything that
//! cannot be coerced falls back to the registered default and is reported
//! as a [`ValidationIssue`].

mod rules;

#[cfg(test)]
mod property_tests;

use std::sync::Arc;

use serde_json::Value;

use crate::error::SyncError;
use crate::models::SettingsMap;
use crate::schema::{Schema, SchemaType, SettingDef};

pub use rules::{is_color_key, is_hex_color, is_style_key, strip_script_injection};

// == Validation Issue ==
/// A value that was replaced by its default during sanitization.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub key: String,
    pub reason: String,
}

impl From<ValidationIssue> for SyncError {
    fn from(issue: ValidationIssue) -> Self {
        SyncError::Validation {
            key: issue.key,
            reason: issue.reason,
        }
    }
}

// == Sanitizer ==
/// Schema-driven sanitizer, cheap to clone.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    schema: Arc<Schema>,
}

impl Sanitizer {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Sanitizes a single value for `key`.
    pub fn sanitize_value(&self, key: &str, raw: &Value) -> Value {
        let mut issues = Vec::new();
        sanitize_setting(key, raw, self.schema.get(key), &mut issues)
    }

    /// Sanitizes a whole map; unknown keys are kept as trimmed strings.
    pub fn sanitize(&self, raw: &SettingsMap) -> SettingsMap {
        self.sanitize_with_issues(raw).0
    }

    /// Like [`Sanitizer::sanitize`], also returning every fallback taken.
    pub fn sanitize_with_issues(&self, raw: &SettingsMap) -> (SettingsMap, Vec<ValidationIssue>) {
        let mut issues = Vec::new();
        let clean = raw
            .iter()
            .map(|(key, value)| {
                let clean = sanitize_setting(key, value, self.schema.get(key), &mut issues);
                (key.clone(), clean)
            })
            .collect();
        (clean, issues)
    }
}

// == Pure Sanitization ==
/// Sanitizes `raw` for `key` against its definition.
///
/// Pure function of its inputs: issues are appended to `issues`, nothing
/// else is touched.
pub fn sanitize_setting(
    key: &str,
    raw: &Value,
    def: Option<&SettingDef>,
    issues: &mut Vec<ValidationIssue>,
) -> Value {
    match def {
        Some(def) => sanitize_typed(key, key, raw, &def.schema_type, &def.default, issues),
        None => sanitize_unknown(key, raw, issues),
    }
}

fn sanitize_typed(
    key: &str,
    field: &str,
    raw: &Value,
    ty: &SchemaType,
    default: &Value,
    issues: &mut Vec<ValidationIssue>,
) -> Value {
    let coerced = match ty {
        SchemaType::Bool => coerce_bool(raw),
        SchemaType::Number => coerce_number(raw),
        SchemaType::String => coerce_string(raw).and_then(|s| apply_string_rules(field, s)),
        SchemaType::StringEnum(variants) => coerce_string(raw).and_then(|s| {
            variants
                .iter()
                .find(|variant| variant.eq_ignore_ascii_case(&s))
                .map(|variant| Value::String(variant.clone()))
                .ok_or_else(|| format!("'{}' is not one of {:?}", s, variants))
        }),
        SchemaType::Array(element) => {
            return match parse_embedded(raw) {
                Some(Value::Array(items)) => Value::Array(
                    items
                        .iter()
                        .enumerate()
                        .map(|(index, item)| {
                            let item_default = element_default(default, index, element);
                            sanitize_typed(key, field, item, element, &item_default, issues)
                        })
                        .collect(),
                ),
                _ => fallback(key, default, format!("expected array, got {}", kind(raw)), issues),
            };
        }
        SchemaType::Object(fields) => {
            return match parse_embedded(raw) {
                Some(Value::Object(map)) => Value::Object(
                    fields
                        .iter()
                        .map(|(name, field_ty)| {
                            let field_default = default
                                .get(name)
                                .cloned()
                                .unwrap_or_else(|| field_ty.zero_value());
                            let value = match map.get(name) {
                                Some(raw_field) => sanitize_typed(
                                    key,
                                    name,
                                    raw_field,
                                    field_ty,
                                    &field_default,
                                    issues,
                                ),
                                None => field_default,
                            };
                            (name.clone(), value)
                        })
                        .collect(),
                ),
                _ => fallback(key, default, format!("expected object, got {}", kind(raw)), issues),
            };
        }
    };

    match coerced {
        Ok(value) => value,
        Err(reason) => fallback(key, default, reason, issues),
    }
}

fn sanitize_unknown(key: &str, raw: &Value, issues: &mut Vec<ValidationIssue>) -> Value {
    let text = match raw {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        Value::Array(_) | Value::Object(_) => raw.to_string(),
        other => other.to_string(),
    };
    match apply_string_rules(key, text) {
        Ok(value) => value,
        Err(reason) => fallback(key, &Value::String(String::new()), reason, issues),
    }
}

fn fallback(key: &str, default: &Value, reason: String, issues: &mut Vec<ValidationIssue>) -> Value {
    issues.push(ValidationIssue {
        key: key.to_string(),
        reason,
    });
    default.clone()
}

// == Coercions ==
fn coerce_bool(raw: &Value) -> Result<Value, String> {
    match raw {
        Value::Bool(b) => Ok(Value::Bool(*b)),
        Value::Number(n) => Ok(Value::Bool(n.as_f64().map(|f| f != 0.0).unwrap_or(false))),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
            "false" | "0" | "no" | "off" | "" => Ok(Value::Bool(false)),
            other => Err(format!("'{}' is not a boolean", other)),
        },
        other => Err(format!("expected boolean, got {}", kind(other))),
    }
}

fn coerce_number(raw: &Value) -> Result<Value, String> {
    match raw {
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(raw.clone()),
        Value::Number(n) => n
            .as_f64()
            .and_then(normalize_number)
            .ok_or_else(|| format!("{} is not a finite number", n)),
        Value::Bool(b) => Ok(Value::from(u8::from(*b))),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(normalize_number)
            .ok_or_else(|| format!("'{}' is not a number", s)),
        other => Err(format!("expected number, got {}", kind(other))),
    }
}

/// Integral values become JSON integers so `"200"` and `200` compare equal.
fn normalize_number(n: f64) -> Option<Value> {
    if !n.is_finite() {
        return None;
    }
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Some(Value::from(n as i64))
    } else {
        serde_json::Number::from_f64(n).map(Value::Number)
    }
}

fn coerce_string(raw: &Value) -> Result<String, String> {
    match raw {
        Value::String(s) => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(format!("expected string, got {}", kind(other))),
    }
}

fn apply_string_rules(field: &str, text: String) -> Result<Value, String> {
    if is_color_key(field) && !is_hex_color(&text) {
        return Err(format!("'{}' is not a hex color", text));
    }
    if is_style_key(field) {
        return Ok(Value::String(strip_script_injection(&text)));
    }
    Ok(Value::String(text))
}

/// Accepts JSON-encoded arrays/objects passed as strings.
fn parse_embedded(raw: &Value) -> Option<Value> {
    match raw {
        Value::String(s) => serde_json::from_str(s.trim()).ok(),
        other => Some(other.clone()),
    }
}

fn element_default(default: &Value, index: usize, element: &SchemaType) -> Value {
    default
        .as_array()
        .and_then(|items| items.get(index).or_else(|| items.first()))
        .cloned()
        .unwrap_or_else(|| element.zero_value())
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
