//! Settings Schema
//!
//! Explicit key → type map built once at startup. Sanitization is a total
//! function over these tags, so value types are never guessed at runtime.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::SettingsMap;

// == Schema Type ==
/// Type tag for a single setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "of", rename_all = "snake_case")]
pub enum SchemaType {
    Bool,
    Number,
    String,
    /// String restricted to a fixed set of variants
    StringEnum(Vec<String>),
    Array(Box<SchemaType>),
    Object(BTreeMap<String, SchemaType>),
}

impl SchemaType {
    /// Infers a type tag from a default value.
    ///
    /// Arrays take their element type from the first element; empty arrays
    /// and nulls are treated as strings.
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Bool(_) => SchemaType::Bool,
            Value::Number(_) => SchemaType::Number,
            Value::String(_) | Value::Null => SchemaType::String,
            Value::Array(items) => SchemaType::Array(Box::new(
                items.first().map(Self::infer).unwrap_or(SchemaType::String),
            )),
            Value::Object(fields) => SchemaType::Object(
                fields
                    .iter()
                    .map(|(name, v)| (name.clone(), Self::infer(v)))
                    .collect(),
            ),
        }
    }

    /// Value used when neither the raw input nor a default is usable.
    pub fn zero_value(&self) -> Value {
        match self {
            SchemaType::Bool => Value::Bool(false),
            SchemaType::Number => json!(0),
            SchemaType::String => Value::String(String::new()),
            SchemaType::StringEnum(variants) => variants
                .first()
                .map(|v| Value::String(v.clone()))
                .unwrap_or_else(|| Value::String(String::new())),
            SchemaType::Array(_) => Value::Array(Vec::new()),
            SchemaType::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(name, ty)| (name.clone(), ty.zero_value()))
                    .collect(),
            ),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SchemaType::Bool => "boolean",
            SchemaType::Number => "number",
            SchemaType::String => "string",
            SchemaType::StringEnum(_) => "enum",
            SchemaType::Array(_) => "array",
            SchemaType::Object(_) => "object",
        }
    }
}

// == Setting Definition ==
/// Registered type and default for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingDef {
    pub schema_type: SchemaType,
    pub default: Value,
}

// == Schema ==
/// Registry of every known setting.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    defs: BTreeMap<String, SettingDef>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a schema by inferring each key's type from its default.
    pub fn from_defaults(defaults: &SettingsMap) -> Self {
        let mut schema = Self::new();
        for (key, default) in defaults {
            schema.register(key.clone(), SchemaType::infer(default), default.clone());
        }
        schema
    }

    /// Registers (or replaces) a key with an explicit type.
    pub fn register(
        &mut self,
        key: impl Into<String>,
        schema_type: SchemaType,
        default: Value,
    ) -> &mut Self {
        self.defs.insert(
            key.into(),
            SettingDef {
                schema_type,
                default,
            },
        );
        self
    }

    /// Builder-style variant of [`Schema::register`].
    pub fn with_setting(
        mut self,
        key: impl Into<String>,
        schema_type: SchemaType,
        default: Value,
    ) -> Self {
        self.register(key, schema_type, default);
        self
    }

    pub fn get(&self, key: &str) -> Option<&SettingDef> {
        self.defs.get(key)
    }

    pub fn default_for(&self, key: &str) -> Option<&Value> {
        self.defs.get(key).map(|def| &def.default)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.defs.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.defs.keys()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Returns every registered default as a settings map.
    pub fn defaults(&self) -> SettingsMap {
        self.defs
            .iter()
            .map(|(key, def)| (key.clone(), def.default.clone()))
            .collect()
    }

    // == Built-in Defaults ==
    /// Admin appearance settings shipped with the engine.
    pub fn admin_defaults() -> Self {
        let defaults = json!({
            "primary_color": "#0073aa",
            "secondary_color": "#23282d",
            "background_color": "#f1f1f1",
            "text_color": "#1d2327",
            "accent_color": "#72aee6",
            "menu_width": 160,
            "font_size": 14,
            "border_radius": 4,
            "compact_mode": false,
            "animations_enabled": true,
            "font_family": "system-ui",
            "custom_css": "",
            "typography": {
                "heading_font": "system-ui",
                "body_font": "system-ui",
                "line_height": 1.5
            }
        });

        let mut schema = match defaults {
            Value::Object(map) => Self::from_defaults(&map),
            _ => Self::new(),
        };
        schema.register(
            "menu_position",
            SchemaType::StringEnum(vec!["left".into(), "right".into()]),
            json!("left"),
        );
        schema.register(
            "theme_mode",
            SchemaType::StringEnum(vec!["light".into(), "dark".into(), "auto".into()]),
            json!("light"),
        );
        // An empty default carries no element type to infer from.
        schema.register(
            "hidden_menu_items",
            SchemaType::Array(Box::new(SchemaType::String)),
            json!([]),
        );
        schema
    }
}
