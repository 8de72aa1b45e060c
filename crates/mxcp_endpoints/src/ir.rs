//! Internal representation of loaded endpoints.
//!
//! Built by the loader, held immutably by the registry. Policies are
//! compiled, source code is resolved, and host function signatures are
//! introspected by the time an `Endpoint` exists.

use crate::uri::UriTemplate;
use mxcp_policy::Policy;
use mxcp_types::TypeSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Endpoint variant tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    Tool,
    Resource,
    Prompt,
}

impl EndpointKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Resource => "resource",
            Self::Prompt => "prompt",
        }
    }
}

impl std::fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Behavioral hints surfaced to MCP clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destructive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotent: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_world: Option<bool>,
}

/// A declared parameter: a name plus its type spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(flatten)]
    pub spec: TypeSpec,
}

/// Resolved endpoint body.
#[derive(Debug, Clone)]
pub enum EndpointSource {
    /// Inline or file-loaded SQL, executed against the session.
    Sql { code: String },
    /// A registered host function, introspected at load time.
    Host {
        file: String,
        function: String,
        param_names: Vec<String>,
    },
}

/// One prompt message template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    #[serde(rename = "type", default = "default_content_type")]
    pub content_type: String,
    pub prompt: String,
}

fn default_content_type() -> String {
    "text".to_string()
}

/// Declared test case, retained in the IR for reference tooling. Not used
/// on the request path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointTest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// Variant-specific fields.
#[derive(Debug, Clone)]
pub enum EndpointDetail {
    Tool,
    Resource {
        uri: UriTemplate,
        mime_type: Option<String>,
    },
    Prompt {
        messages: Vec<PromptMessage>,
    },
}

/// A fully loaded, validated endpoint.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Unique identifier: tool name, resource URI template, or prompt name.
    pub id: String,
    pub kind: EndpointKind,
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub tags: Vec<String>,
    pub annotations: Annotations,
    pub parameters: Vec<Parameter>,
    /// Absent for prompts.
    pub return_type: Option<TypeSpec>,
    pub input_policies: Vec<Policy>,
    pub output_policies: Vec<Policy>,
    /// Absent for prompts (their body is `messages`).
    pub source: Option<EndpointSource>,
    /// Endpoint-level timeout in seconds, if declared.
    pub timeout_secs: Option<u64>,
    pub detail: EndpointDetail,
    pub tests: Vec<EndpointTest>,
    /// Defining file, for diagnostics.
    pub path: PathBuf,
}

impl Endpoint {
    /// Parameter spec by name.
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// The parameters as a single object spec, used to validate the
    /// argument map of an invocation. Every declared parameter without a
    /// default is required; undeclared arguments are rejected.
    pub fn parameters_spec(&self) -> TypeSpec {
        let mut spec = TypeSpec::object(
            self.parameters
                .iter()
                .map(|p| (p.name.clone(), p.spec.clone())),
            self.parameters
                .iter()
                .filter(|p| p.spec.default.is_none())
                .map(|p| p.name.clone()),
        );
        spec.additional_properties = Some(false);
        spec
    }

    /// Whether any declared type (parameters or return) carries a
    /// sensitive node.
    pub fn has_sensitive(&self) -> bool {
        self.parameters.iter().any(|p| p.spec.has_sensitive())
            || self
                .return_type
                .as_ref()
                .map(TypeSpec::has_sensitive)
                .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint_with_params(parameters: Vec<Parameter>) -> Endpoint {
        Endpoint {
            id: "t".to_string(),
            kind: EndpointKind::Tool,
            name: "t".to_string(),
            description: None,
            enabled: true,
            tags: Vec::new(),
            annotations: Annotations::default(),
            parameters,
            return_type: None,
            input_policies: Vec::new(),
            output_policies: Vec::new(),
            source: Some(EndpointSource::Sql {
                code: "SELECT 1".to_string(),
            }),
            timeout_secs: None,
            detail: EndpointDetail::Tool,
            tests: Vec::new(),
            path: PathBuf::from("t.yml"),
        }
    }

    #[test]
    fn test_parameters_spec_requires_defaultless() {
        use serde_json::json;

        let endpoint = endpoint_with_params(vec![
            Parameter {
                name: "a".to_string(),
                spec: TypeSpec::integer(),
            },
            Parameter {
                name: "b".to_string(),
                spec: TypeSpec::integer().with_default(json!(0)),
            },
        ]);
        let spec = endpoint.parameters_spec();
        assert_eq!(spec.required, Some(vec!["a".to_string()]));
        assert_eq!(spec.additional_properties, Some(false));
    }

    #[test]
    fn test_parameter_lookup() {
        let endpoint = endpoint_with_params(vec![Parameter {
            name: "a".to_string(),
            spec: TypeSpec::integer(),
        }]);
        assert!(endpoint.parameter("a").is_some());
        assert!(endpoint.parameter("z").is_none());
    }
}
