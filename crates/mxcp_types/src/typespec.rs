//! The `TypeSpec` schema model.
//!
//! Field names follow the JSON-Schema spellings (`minLength`,
//! `additionalProperties`, ...) so endpoint YAML stays bit-compatible with
//! the documented surface. Unknown annotation keys are ignored on parse,
//! matching JSON-Schema's treatment of unrecognized keywords.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Closed set of base kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl TypeKind {
    /// Display name as used in endpoint YAML.
    pub fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

impl std::fmt::Display for TypeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Supported string formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StringFormat {
    Email,
    Uri,
    Date,
    Time,
    DateTime,
    Duration,
    Timestamp,
}

impl StringFormat {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Uri => "uri",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateTime => "date-time",
            Self::Duration => "duration",
            Self::Timestamp => "timestamp",
        }
    }
}

/// A restricted JSON-Schema node.
///
/// `sensitive: true` may appear on any node; sensitivity applies to the
/// value at that path (see [`crate::sensitive`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeSpec {
    #[serde(rename = "type")]
    pub kind: TypeKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub examples: Option<Vec<Value>>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(default)]
    pub sensitive: bool,

    // string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<StringFormat>,
    #[serde(rename = "minLength", default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(rename = "maxLength", default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,

    // numeric
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(
        rename = "exclusiveMinimum",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub exclusive_minimum: Option<f64>,
    #[serde(
        rename = "exclusiveMaximum",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub exclusive_maximum: Option<f64>,
    #[serde(rename = "multipleOf", default, skip_serializing_if = "Option::is_none")]
    pub multiple_of: Option<f64>,

    // array
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<TypeSpec>>,
    #[serde(rename = "minItems", default, skip_serializing_if = "Option::is_none")]
    pub min_items: Option<usize>,
    #[serde(rename = "maxItems", default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
    #[serde(rename = "uniqueItems", default)]
    pub unique_items: bool,

    // object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, TypeSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
    #[serde(
        rename = "additionalProperties",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub additional_properties: Option<bool>,
}

impl TypeSpec {
    /// Bare spec of the given kind with no annotations.
    pub fn of_kind(kind: TypeKind) -> Self {
        Self {
            kind,
            description: None,
            default: None,
            examples: None,
            enum_values: None,
            sensitive: false,
            format: None,
            min_length: None,
            max_length: None,
            minimum: None,
            maximum: None,
            exclusive_minimum: None,
            exclusive_maximum: None,
            multiple_of: None,
            items: None,
            min_items: None,
            max_items: None,
            unique_items: false,
            properties: None,
            required: None,
            additional_properties: None,
        }
    }

    pub fn string() -> Self {
        Self::of_kind(TypeKind::String)
    }

    pub fn number() -> Self {
        Self::of_kind(TypeKind::Number)
    }

    pub fn integer() -> Self {
        Self::of_kind(TypeKind::Integer)
    }

    pub fn boolean() -> Self {
        Self::of_kind(TypeKind::Boolean)
    }

    pub fn array(items: TypeSpec) -> Self {
        let mut spec = Self::of_kind(TypeKind::Array);
        spec.items = Some(Box::new(items));
        spec
    }

    pub fn object<K, I, R>(properties: I, required: R) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, TypeSpec)>,
        R: IntoIterator<Item = K>,
    {
        let mut spec = Self::of_kind(TypeKind::Object);
        spec.properties = Some(
            properties
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect(),
        );
        let required: Vec<String> = required.into_iter().map(Into::into).collect();
        if !required.is_empty() {
            spec.required = Some(required);
        }
        spec
    }

    /// Mark this node sensitive.
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Set a string format.
    pub fn with_format(mut self, format: StringFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Set a default value.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Effective `additionalProperties` (defaults to true at every level).
    pub fn allows_additional_properties(&self) -> bool {
        self.additional_properties.unwrap_or(true)
    }

    /// Whether any node in this spec (including this one) is sensitive.
    pub fn has_sensitive(&self) -> bool {
        if self.sensitive {
            return true;
        }
        if let Some(items) = &self.items {
            if items.has_sensitive() {
                return true;
            }
        }
        if let Some(props) = &self.properties {
            if props.values().any(TypeSpec::has_sensitive) {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_json_schema_spellings() {
        let spec: TypeSpec = serde_json::from_value(json!({
            "type": "string",
            "format": "date-time",
            "minLength": 1,
            "maxLength": 64,
            "sensitive": true
        }))
        .unwrap();
        assert_eq!(spec.kind, TypeKind::String);
        assert_eq!(spec.format, Some(StringFormat::DateTime));
        assert_eq!(spec.min_length, Some(1));
        assert!(spec.sensitive);
    }

    #[test]
    fn test_additional_properties_defaults_true() {
        let spec: TypeSpec = serde_json::from_value(json!({"type": "object"})).unwrap();
        assert!(spec.allows_additional_properties());

        let spec: TypeSpec =
            serde_json::from_value(json!({"type": "object", "additionalProperties": false}))
                .unwrap();
        assert!(!spec.allows_additional_properties());
    }

    #[test]
    fn test_has_sensitive_nested() {
        let spec = TypeSpec::object(
            [
                ("name", TypeSpec::string()),
                ("ssn", TypeSpec::string().sensitive()),
            ],
            [],
        );
        assert!(spec.has_sensitive());

        let plain = TypeSpec::object([("name", TypeSpec::string())], []);
        assert!(!plain.has_sensitive());
    }

    #[test]
    fn test_unknown_annotations_are_ignored() {
        let spec: TypeSpec = serde_json::from_value(json!({
            "type": "integer",
            "x-internal": true
        }))
        .unwrap();
        assert_eq!(spec.kind, TypeKind::Integer);
    }
}
