//! Property-Based Tests for the Sanitizer
//!
//! Uses proptest to check that sanitization is total, idempotent and always
//! yields values of the registered type.

use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::models::SettingsMap;
use crate::sanitize::{is_hex_color, Sanitizer};
use crate::schema::{Schema, SchemaType};

// == Strategies ==
/// Arbitrary JSON values, a few levels deep
fn json_value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        (-1.0e6f64..1.0e6f64).prop_map(|f| json!(f)),
        "[ a-zA-Z0-9#<>:;(){}=./_-]{0,40}".prop_map(Value::String),
        "#[0-9a-fA-F]{3}|#[0-9a-fA-F]{6}".prop_map(Value::String),
        prop_oneof![
            Just("true"),
            Just("off"),
            Just(" 200 "),
            Just("1e3"),
            Just("left"),
            Just("<script>x</script>"),
            Just("[\"a\", 1]"),
        ]
        .prop_map(|s| Value::String(s.to_string())),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z_]{1,12}", inner, 0..4)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

/// Registered keys plus a handful of unknown ones
fn key_strategy() -> impl Strategy<Value = String> {
    let schema = Schema::admin_defaults();
    let mut keys: Vec<String> = schema.keys().cloned().collect();
    keys.extend(
        ["widget_color", "widget_style", "widget_label"]
            .iter()
            .map(|k| k.to_string()),
    );
    prop::sample::select(keys)
}

fn settings_strategy() -> impl Strategy<Value = SettingsMap> {
    prop::collection::btree_map(key_strategy(), json_value_strategy(), 0..8)
        .prop_map(|map| map.into_iter().collect())
}

fn sanitizer() -> Sanitizer {
    Sanitizer::new(Arc::new(Schema::admin_defaults()))
}

fn matches_type(value: &Value, ty: &SchemaType) -> bool {
    match ty {
        SchemaType::Bool => value.is_boolean(),
        SchemaType::Number => value.is_number(),
        SchemaType::String => value.is_string(),
        SchemaType::StringEnum(variants) => value
            .as_str()
            .map(|s| variants.iter().any(|v| v == s))
            .unwrap_or(false),
        SchemaType::Array(element) => value
            .as_array()
            .map(|items| items.iter().all(|item| matches_type(item, element)))
            .unwrap_or(false),
        SchemaType::Object(fields) => value
            .as_object()
            .map(|map| {
                map.len() == fields.len()
                    && fields
                        .iter()
                        .all(|(name, ty)| map.get(name).map(|v| matches_type(v, ty)).unwrap_or(false))
            })
            .unwrap_or(false),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    // Sanitizing an already sanitized map changes nothing.
    #[test]
    fn prop_sanitize_is_idempotent(raw in settings_strategy()) {
        let s = sanitizer();
        let once = s.sanitize(&raw);
        let twice = s.sanitize(&once);
        prop_assert_eq!(once, twice);
    }

    // Every registered key comes out with its registered type.
    #[test]
    fn prop_sanitize_respects_schema(raw in settings_strategy()) {
        let s = sanitizer();
        let clean = s.sanitize(&raw);

        prop_assert_eq!(clean.len(), raw.len(), "No keys dropped or added");
        for (key, value) in &clean {
            match s.schema().get(key) {
                Some(def) => prop_assert!(
                    matches_type(value, &def.schema_type),
                    "{} = {} does not match {}", key, value, def.schema_type.name()
                ),
                None => prop_assert!(value.is_string(), "Unknown key {} must be a string", key),
            }
        }
    }

    // Colour keys only ever hold hex colours (or the empty unknown default).
    #[test]
    fn prop_color_keys_hold_hex(raw in json_value_strategy()) {
        let s = sanitizer();
        let clean = s.sanitize_value("primary_color", &raw);
        prop_assert!(is_hex_color(clean.as_str().unwrap_or_default()));

        let unknown = s.sanitize_value("widget_color", &raw);
        let text = unknown.as_str().unwrap_or_default();
        prop_assert!(text.is_empty() || is_hex_color(text));
    }

    // Style keys never retain a script tag.
    #[test]
    fn prop_style_keys_strip_scripts(prefix in "[a-z{}:; ]{0,20}", body in "[a-z()0-9]{0,10}") {
        let s = sanitizer();
        let raw = Value::String(format!("{}<script>{}</script>", prefix, body));
        let clean = s.sanitize_value("custom_css", &raw);
        prop_assert!(!clean.as_str().unwrap_or_default().to_lowercase().contains("<script"));
    }
}
