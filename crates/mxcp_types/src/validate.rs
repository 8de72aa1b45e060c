//! Value validation and coercion against a [`TypeSpec`].
//!
//! Coercion is deliberately narrow: temporal formats are parsed from
//! strings and re-serialized canonically, integers are accepted where a
//! number is expected, defaults fill absent properties. Everything else is
//! strict. Coercion is idempotent: feeding a coerced value back through
//! yields the same value.

use crate::error::{TypeError, TypeErrorKind};
use crate::typespec::{StringFormat, TypeKind, TypeSpec};
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

/// Validate `value` against `spec`, returning the coerced value or every
/// failure found (validation does not stop at the first error).
pub fn validate_and_coerce(value: &Value, spec: &TypeSpec) -> Result<Value, Vec<TypeError>> {
    let mut errors = Vec::new();
    let coerced = coerce_node("$", value, spec, &mut errors);
    if errors.is_empty() {
        Ok(coerced)
    } else {
        Err(errors)
    }
}

/// Validate an endpoint result against its declared return type.
///
/// The rules are identical to the input side; row-to-value shaping happens
/// in the runner before this is called. Failures here surface as
/// `BadOutput` rather than `BadInput`.
pub fn validate_output(value: &Value, spec: &TypeSpec) -> Result<Value, Vec<TypeError>> {
    validate_and_coerce(value, spec)
}

fn coerce_node(path: &str, value: &Value, spec: &TypeSpec, errors: &mut Vec<TypeError>) -> Value {
    let before = errors.len();
    let coerced = match spec.kind {
        TypeKind::String => coerce_string(path, value, spec, errors),
        TypeKind::Integer => coerce_integer(path, value, spec, errors),
        TypeKind::Number => coerce_number(path, value, spec, errors),
        TypeKind::Boolean => coerce_boolean(path, value, errors),
        TypeKind::Array => coerce_array(path, value, spec, errors),
        TypeKind::Object => coerce_object(path, value, spec, errors),
    };

    // Enum membership is checked on the coerced value so that, e.g., a
    // canonicalized timestamp compares against canonical enum members.
    if errors.len() == before {
        if let Some(members) = &spec.enum_values {
            if !members.contains(&coerced) {
                errors.push(TypeError::new(
                    TypeErrorKind::EnumViolation,
                    path,
                    format!("value is not one of {} allowed values", members.len()),
                ));
            }
        }
    }

    coerced
}

fn coerce_string(path: &str, value: &Value, spec: &TypeSpec, errors: &mut Vec<TypeError>) -> Value {
    let s = match value.as_str() {
        Some(s) => s,
        None => {
            errors.push(type_mismatch(path, "string", value));
            return value.clone();
        }
    };

    if let Some(min) = spec.min_length {
        if s.chars().count() < min {
            errors.push(TypeError::new(
                TypeErrorKind::RangeViolation,
                path,
                format!("string is shorter than minLength {}", min),
            ));
        }
    }
    if let Some(max) = spec.max_length {
        if s.chars().count() > max {
            errors.push(TypeError::new(
                TypeErrorKind::RangeViolation,
                path,
                format!("string is longer than maxLength {}", max),
            ));
        }
    }

    match spec.format {
        Some(format) => match coerce_format(s, format) {
            Ok(canonical) => Value::String(canonical),
            Err(msg) => {
                errors.push(TypeError::new(TypeErrorKind::FormatViolation, path, msg));
                value.clone()
            }
        },
        None => value.clone(),
    }
}

fn coerce_integer(path: &str, value: &Value, spec: &TypeSpec, errors: &mut Vec<TypeError>) -> Value {
    let n = match value.as_i64() {
        Some(n) => n,
        None => {
            errors.push(type_mismatch(path, "integer", value));
            return value.clone();
        }
    };
    check_numeric_bounds(path, n as f64, spec, errors);
    Value::from(n)
}

fn coerce_number(path: &str, value: &Value, spec: &TypeSpec, errors: &mut Vec<TypeError>) -> Value {
    // Integers are accepted for `number` and preserved as-is.
    let n = match value.as_f64() {
        Some(n) if value.is_number() => n,
        _ => {
            errors.push(type_mismatch(path, "number", value));
            return value.clone();
        }
    };
    check_numeric_bounds(path, n, spec, errors);
    value.clone()
}

fn coerce_boolean(path: &str, value: &Value, errors: &mut Vec<TypeError>) -> Value {
    if !value.is_boolean() {
        errors.push(type_mismatch(path, "boolean", value));
    }
    value.clone()
}

fn coerce_array(path: &str, value: &Value, spec: &TypeSpec, errors: &mut Vec<TypeError>) -> Value {
    let arr = match value.as_array() {
        Some(arr) => arr,
        None => {
            errors.push(type_mismatch(path, "array", value));
            return value.clone();
        }
    };

    if let Some(min) = spec.min_items {
        if arr.len() < min {
            errors.push(TypeError::new(
                TypeErrorKind::RangeViolation,
                path,
                format!("array has fewer than minItems {}", min),
            ));
        }
    }
    if let Some(max) = spec.max_items {
        if arr.len() > max {
            errors.push(TypeError::new(
                TypeErrorKind::RangeViolation,
                path,
                format!("array has more than maxItems {}", max),
            ));
        }
    }

    let coerced: Vec<Value> = match &spec.items {
        Some(items) => arr
            .iter()
            .enumerate()
            .map(|(i, v)| coerce_node(&format!("{}[{}]", path, i), v, items, errors))
            .collect(),
        // The loader rejects array specs without `items`; treat a missing
        // spec here as pass-through.
        None => arr.clone(),
    };

    if spec.unique_items {
        for i in 1..coerced.len() {
            if coerced[..i].contains(&coerced[i]) {
                errors.push(TypeError::new(
                    TypeErrorKind::RangeViolation,
                    &format!("{}[{}]", path, i),
                    "array items are not unique",
                ));
                break;
            }
        }
    }

    Value::Array(coerced)
}

fn coerce_object(path: &str, value: &Value, spec: &TypeSpec, errors: &mut Vec<TypeError>) -> Value {
    let obj = match value.as_object() {
        Some(obj) => obj,
        None => {
            errors.push(type_mismatch(path, "object", value));
            return value.clone();
        }
    };

    let mut out = Map::new();
    let empty = Default::default();
    let properties = spec.properties.as_ref().unwrap_or(&empty);

    for (name, prop_spec) in properties {
        let child_path = format!("{}.{}", path, name);
        match obj.get(name) {
            Some(v) => {
                out.insert(name.clone(), coerce_node(&child_path, v, prop_spec, errors));
            }
            None => {
                if let Some(default) = &prop_spec.default {
                    // Defaults pass through coercion too so format defaults
                    // land canonicalized.
                    out.insert(
                        name.clone(),
                        coerce_node(&child_path, default, prop_spec, errors),
                    );
                }
            }
        }
    }

    if let Some(required) = &spec.required {
        for name in required {
            if !out.contains_key(name) && !obj.contains_key(name) {
                errors.push(TypeError::new(
                    TypeErrorKind::MissingRequired,
                    &format!("{}.{}", path, name),
                    "required property is missing",
                ));
            }
        }
    }

    for (name, v) in obj {
        if properties.contains_key(name) {
            continue;
        }
        if spec.allows_additional_properties() {
            out.insert(name.clone(), v.clone());
        } else {
            errors.push(TypeError::new(
                TypeErrorKind::UnknownProperty,
                &format!("{}.{}", path, name),
                "property is not declared and additionalProperties is false",
            ));
        }
    }

    Value::Object(out)
}

fn check_numeric_bounds(path: &str, n: f64, spec: &TypeSpec, errors: &mut Vec<TypeError>) {
    if let Some(min) = spec.minimum {
        if n < min {
            errors.push(range(path, format!("value is below minimum {}", min)));
        }
    }
    if let Some(max) = spec.maximum {
        if n > max {
            errors.push(range(path, format!("value is above maximum {}", max)));
        }
    }
    if let Some(min) = spec.exclusive_minimum {
        if n <= min {
            errors.push(range(path, format!("value must be above {}", min)));
        }
    }
    if let Some(max) = spec.exclusive_maximum {
        if n >= max {
            errors.push(range(path, format!("value must be below {}", max)));
        }
    }
    if let Some(step) = spec.multiple_of {
        if step > 0.0 {
            let ratio = n / step;
            if (ratio - ratio.round()).abs() > 1e-9 {
                errors.push(range(path, format!("value is not a multiple of {}", step)));
            }
        }
    }
}

fn range(path: &str, message: String) -> TypeError {
    TypeError::new(TypeErrorKind::RangeViolation, path, message)
}

fn type_mismatch(path: &str, expected: &str, got: &Value) -> TypeError {
    TypeError::new(
        TypeErrorKind::TypeMismatch,
        path,
        format!("expected {}, got {}", expected, json_kind(got)),
    )
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Parse a string for its declared format and return the canonical form.
fn coerce_format(s: &str, format: StringFormat) -> Result<String, String> {
    match format {
        StringFormat::Email => {
            let (local, domain) = s
                .split_once('@')
                .ok_or_else(|| "not a valid email address".to_string())?;
            if local.is_empty() || domain.is_empty() || !domain.contains('.') {
                return Err("not a valid email address".to_string());
            }
            Ok(s.to_string())
        }
        StringFormat::Uri => {
            let scheme_end = s.find(':').ok_or_else(|| "not a valid URI".to_string())?;
            let scheme = &s[..scheme_end];
            let mut chars = scheme.chars();
            let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '-'));
            if !valid || s.len() == scheme_end + 1 {
                return Err("not a valid URI".to_string());
            }
            Ok(s.to_string())
        }
        StringFormat::Date => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(|d| d.format("%Y-%m-%d").to_string())
            .map_err(|e| format!("not a valid date: {}", e)),
        StringFormat::Time => NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
            .map(|t| {
                if t.format("%.f").to_string().is_empty() {
                    t.format("%H:%M:%S").to_string()
                } else {
                    t.format("%H:%M:%S%.f").to_string()
                }
            })
            .map_err(|e| format!("not a valid time: {}", e)),
        StringFormat::DateTime => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, false))
            .map_err(|e| format!("not a valid date-time: {}", e)),
        StringFormat::Duration => parse_iso8601_duration(s).map(|()| s.to_string()),
        StringFormat::Timestamp => {
            // RFC3339 or integer Unix seconds; canonical form is RFC3339 UTC.
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(dt
                    .with_timezone(&Utc)
                    .to_rfc3339_opts(SecondsFormat::AutoSi, true));
            }
            if let Ok(epoch) = s.parse::<i64>() {
                if let Some(dt) = DateTime::from_timestamp(epoch, 0) {
                    return Ok(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true));
                }
            }
            Err("not a valid timestamp (RFC3339 or Unix seconds)".to_string())
        }
    }
}

/// Validate an ISO-8601 duration (`PnYnMnWnDTnHnMnS`).
///
/// At least one component is required; fractions are only allowed on the
/// final component.
fn parse_iso8601_duration(s: &str) -> Result<(), String> {
    let err = || format!("'{}' is not a valid ISO-8601 duration", s);
    let rest = s.strip_prefix('P').ok_or_else(err)?;
    if rest.is_empty() {
        return Err(err());
    }

    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, t)) => {
            if t.is_empty() {
                return Err(err());
            }
            (d, Some(t))
        }
        None => (rest, None),
    };

    let mut components = 0usize;
    let mut scan = |part: &str, designators: &[char]| -> Result<(), String> {
        let mut value = String::new();
        let mut allowed = designators;
        for ch in part.chars() {
            if ch.is_ascii_digit() || ch == '.' {
                value.push(ch);
            } else if let Some(pos) = allowed.iter().position(|&d| d == ch) {
                if value.is_empty() || value.parse::<f64>().is_err() {
                    return Err(err());
                }
                components += 1;
                value.clear();
                // Designators must appear in order, each at most once.
                allowed = &allowed[pos + 1..];
            } else {
                return Err(err());
            }
        }
        if !value.is_empty() {
            return Err(err());
        }
        Ok(())
    };

    scan(date_part, &['Y', 'M', 'W', 'D'])?;
    if let Some(t) = time_part {
        scan(t, &['H', 'M', 'S'])?;
    }
    if components == 0 {
        return Err(err());
    }
    Ok(())
}
