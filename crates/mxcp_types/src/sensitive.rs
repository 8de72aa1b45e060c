//! Sensitive-path traversal and redaction.
//!
//! A node is sensitive when its declared [`TypeSpec`] carries
//! `sensitive: true`. Sensitivity applies to the whole value at that path;
//! traversal does not descend below a sensitive node. Undeclared extra
//! properties have no spec and are therefore never sensitive.

use crate::typespec::TypeSpec;
use serde_json::{Map, Value};

/// Replacement written into audit records for sensitive values.
pub const REDACTED: &str = "[REDACTED]";

/// Depth-first walk invoking `visitor(path, value)` exactly at the
/// sensitive nodes present in `value`. Paths are dotted, `$`-rooted;
/// array indices are not part of the path (the same field path covers
/// every element).
pub fn walk_sensitive<F>(value: &Value, spec: &TypeSpec, visitor: &mut F)
where
    F: FnMut(&str, &Value),
{
    walk_node("$", value, spec, visitor);
}

fn walk_node<F>(path: &str, value: &Value, spec: &TypeSpec, visitor: &mut F)
where
    F: FnMut(&str, &Value),
{
    if spec.sensitive {
        visitor(path, value);
        return;
    }
    match value {
        Value::Array(items) => {
            if let Some(item_spec) = &spec.items {
                for item in items {
                    walk_node(path, item, item_spec, visitor);
                }
            }
        }
        Value::Object(fields) => {
            if let Some(props) = &spec.properties {
                for (name, prop_spec) in props {
                    if let Some(v) = fields.get(name) {
                        walk_node(&format!("{}.{}", path, name), v, prop_spec, visitor);
                    }
                }
            }
        }
        _ => {}
    }
}

/// Return a copy of `value` with every sensitive value replaced by
/// [`REDACTED`]. Applied to audit payloads before serialization.
pub fn redact_sensitive(value: &Value, spec: &TypeSpec) -> Value {
    if spec.sensitive {
        return Value::String(REDACTED.to_string());
    }
    match value {
        Value::Array(items) => match &spec.items {
            Some(item_spec) => Value::Array(
                items
                    .iter()
                    .map(|item| redact_sensitive(item, item_spec))
                    .collect(),
            ),
            None => value.clone(),
        },
        Value::Object(fields) => {
            let mut out = Map::with_capacity(fields.len());
            for (name, v) in fields {
                let replaced = spec
                    .properties
                    .as_ref()
                    .and_then(|props| props.get(name))
                    .map(|prop_spec| redact_sensitive(v, prop_spec))
                    .unwrap_or_else(|| v.clone());
                out.insert(name.clone(), replaced);
            }
            Value::Object(out)
        }
        _ => value.clone(),
    }
}

/// Return a copy of `value` with every sensitive value removed. Object
/// keys are dropped, array elements with a sensitive item spec are
/// dropped, and a sensitive top-level scalar becomes null.
pub fn strip_sensitive(value: &Value, spec: &TypeSpec) -> Value {
    if spec.sensitive {
        return Value::Null;
    }
    match value {
        Value::Array(items) => match &spec.items {
            Some(item_spec) if item_spec.sensitive => Value::Array(Vec::new()),
            Some(item_spec) => Value::Array(
                items
                    .iter()
                    .map(|item| strip_sensitive(item, item_spec))
                    .collect(),
            ),
            None => value.clone(),
        },
        Value::Object(fields) => {
            let mut out = Map::new();
            for (name, v) in fields {
                match spec.properties.as_ref().and_then(|props| props.get(name)) {
                    Some(prop_spec) if prop_spec.sensitive => {}
                    Some(prop_spec) => {
                        out.insert(name.clone(), strip_sensitive(v, prop_spec));
                    }
                    None => {
                        out.insert(name.clone(), v.clone());
                    }
                }
            }
            Value::Object(out)
        }
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typespec::TypeSpec;
    use serde_json::json;

    fn employee_spec() -> TypeSpec {
        TypeSpec::object(
            [
                ("name", TypeSpec::string()),
                ("ssn", TypeSpec::string().sensitive()),
                ("salary", TypeSpec::number()),
            ],
            [],
        )
    }

    #[test]
    fn test_walk_visits_only_sensitive_nodes() {
        let value = json!({"name": "ada", "ssn": "123-45-6789", "salary": 10});
        let mut seen = Vec::new();
        walk_sensitive(&value, &employee_spec(), &mut |path, v| {
            seen.push((path.to_string(), v.clone()));
        });
        assert_eq!(seen, vec![("$.ssn".to_string(), json!("123-45-6789"))]);
    }

    #[test]
    fn test_walk_arrays_share_field_path() {
        let spec = TypeSpec::array(employee_spec());
        let value = json!([{"ssn": "a"}, {"ssn": "b"}]);
        let mut paths = Vec::new();
        walk_sensitive(&value, &spec, &mut |path, _| paths.push(path.to_string()));
        assert_eq!(paths, vec!["$.ssn", "$.ssn"]);
    }

    #[test]
    fn test_redact_replaces_values() {
        let value = json!({"name": "ada", "ssn": "123-45-6789"});
        let redacted = redact_sensitive(&value, &employee_spec());
        assert_eq!(redacted, json!({"name": "ada", "ssn": REDACTED}));
    }

    #[test]
    fn test_redact_whole_sensitive_subtree() {
        let spec = TypeSpec::object(
            [(
                "credentials",
                TypeSpec::object([("token", TypeSpec::string())], []).sensitive(),
            )],
            [],
        );
        let value = json!({"credentials": {"token": "t"}});
        assert_eq!(
            redact_sensitive(&value, &spec),
            json!({"credentials": REDACTED})
        );
    }

    #[test]
    fn test_strip_removes_keys_and_elements() {
        let value = json!({"name": "ada", "ssn": "123-45-6789"});
        assert_eq!(
            strip_sensitive(&value, &employee_spec()),
            json!({"name": "ada"})
        );

        let list_spec = TypeSpec::array(TypeSpec::string().sensitive());
        assert_eq!(strip_sensitive(&json!(["a", "b"]), &list_spec), json!([]));
    }

    #[test]
    fn test_undeclared_properties_pass_through() {
        let value = json!({"name": "ada", "extra": "kept"});
        let out = redact_sensitive(&value, &employee_spec());
        assert_eq!(out, json!({"name": "ada", "extra": "kept"}));
    }
}
