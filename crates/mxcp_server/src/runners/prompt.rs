//! Prompt rendering.
//!
//! Prompt endpoints have no runner body; their result is the declared
//! message list with `{{ param }}` placeholders substituted from the
//! validated arguments. Rendering is pure with respect to the parameters:
//! the loader guarantees every template variable is declared, so
//! substitution cannot fail at request time.

use mxcp_endpoints::PromptMessage;
use serde_json::{json, Map, Value};

/// Render prompt messages with the validated arguments.
pub fn render_prompt(messages: &[PromptMessage], args: &Map<String, Value>) -> Value {
    let rendered: Vec<Value> = messages
        .iter()
        .map(|message| {
            json!({
                "role": message.role,
                "type": message.content_type,
                "prompt": substitute(&message.prompt, args),
            })
        })
        .collect();
    json!({ "messages": rendered })
}

fn substitute(template: &str, args: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let name = after[..end].trim();
                match args.get(name) {
                    Some(value) => out.push_str(&value_to_text(value)),
                    // Unknown variables are a load-time error; leave the
                    // placeholder visible if one slips through.
                    None => out.push_str(&rest[start..start + 2 + end + 2]),
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(prompt: &str) -> PromptMessage {
        PromptMessage {
            role: "user".to_string(),
            content_type: "text".to_string(),
            prompt: prompt.to_string(),
        }
    }

    fn args(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_substitution() {
        let rendered = render_prompt(
            &[message("Hello {{ name }}, you have {{ count }} items")],
            &args(&[("name", json!("ada")), ("count", json!(3))]),
        );
        assert_eq!(
            rendered["messages"][0]["prompt"],
            json!("Hello ada, you have 3 items")
        );
        assert_eq!(rendered["messages"][0]["role"], json!("user"));
    }

    #[test]
    fn test_rendering_is_pure() {
        let messages = vec![message("{{ a }}")];
        let a = args(&[("a", json!("x"))]);
        assert_eq!(render_prompt(&messages, &a), render_prompt(&messages, &a));
    }

    #[test]
    fn test_whitespace_in_braces() {
        let rendered = render_prompt(&[message("{{name}} and {{  name  }}")], &args(&[("name", json!("x"))]));
        assert_eq!(rendered["messages"][0]["prompt"], json!("x and x"));
    }

    #[test]
    fn test_unterminated_placeholder_left_alone() {
        let rendered = render_prompt(&[message("broken {{ name")], &args(&[("name", json!("x"))]));
        assert_eq!(rendered["messages"][0]["prompt"], json!("broken {{ name"));
    }
}
