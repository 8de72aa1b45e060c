//! YAML endpoint discovery and loading.
//!
//! Walks the project tree for `*.yml`/`*.yaml` files, classifies each by
//! its root key, validates it against the endpoint schema, resolves source
//! code, and builds [`Endpoint`] IR. A partial load yields the valid
//! subset plus precise per-file errors; the caller decides whether to
//! publish it.

use crate::ir::{
    Annotations, Endpoint, EndpointDetail, EndpointKind, EndpointSource, EndpointTest, Parameter,
    PromptMessage,
};
use crate::uri::UriTemplate;
use mxcp_policy::{Policy, PolicyDef, PolicyStage};
use mxcp_types::{validate_and_coerce, TypeKind, TypeSpec};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Schema version accepted on endpoint documents.
const SCHEMA_VERSION: u64 = 1;

/// File names that belong to the site config, not the endpoint set.
const SITE_CONFIG_NAMES: &[&str] = &["mxcp-site.yml", "mxcp-site.yaml"];

fn param_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"))
}

fn template_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("static regex")
    })
}

/// Loader failure for one file.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}:{}:{}: {}", .path.display(), .line, .column, .message)]
    Parse {
        path: PathBuf,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("{}: {}", .path.display(), .message)]
    Invalid { path: PathBuf, message: String },
}

impl LoadError {
    fn invalid(path: &Path, message: impl Into<String>) -> Self {
        Self::Invalid {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    fn from_yaml(path: &Path, err: serde_yaml::Error) -> Self {
        match err.location() {
            Some(loc) => Self::Parse {
                path: path.to_path_buf(),
                line: loc.line(),
                column: loc.column(),
                message: err.to_string(),
            },
            None => Self::Invalid {
                path: path.to_path_buf(),
                message: err.to_string(),
            },
        }
    }
}

/// Host function signature lookup, supplied by the embedding layer.
///
/// The loader never executes host code; it only needs the positional
/// parameter names of the referenced function to check they are declared.
pub trait HostIntrospect {
    fn function_params(&self, file: &str, function: &str) -> Option<Vec<String>>;
}

/// Introspector for projects with no host modules registered.
pub struct NoHostModules;

impl HostIntrospect for NoHostModules {
    fn function_params(&self, _file: &str, _function: &str) -> Option<Vec<String>> {
        None
    }
}

/// Result of loading a project tree.
pub struct LoadOutcome {
    pub loaded: Vec<Arc<Endpoint>>,
    pub errors: Vec<LoadError>,
    pub warnings: Vec<String>,
    /// Digest over the sorted file contents that produced `loaded`.
    pub schema_hash: String,
}

impl LoadOutcome {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

// ---------------------------------------------------------------------------
// YAML document shapes (bit-compatible with the declared surface)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceDef {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    function: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Language {
    Sql,
    Host,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PoliciesDef {
    #[serde(default)]
    input: Vec<PolicyDef>,
    #[serde(default)]
    output: Vec<PolicyDef>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ToolDef {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    annotations: Annotations,
    #[serde(default)]
    parameters: Vec<Parameter>,
    #[serde(rename = "return", default)]
    return_type: Option<TypeSpec>,
    #[serde(default)]
    language: Option<Language>,
    source: Option<SourceDef>,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    tests: Vec<EndpointTest>,
    #[serde(default)]
    policies: PoliciesDef,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResourceDef {
    uri: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    annotations: Annotations,
    #[serde(default)]
    parameters: Vec<Parameter>,
    #[serde(rename = "return", default)]
    return_type: Option<TypeSpec>,
    #[serde(default)]
    language: Option<Language>,
    source: Option<SourceDef>,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    tests: Vec<EndpointTest>,
    #[serde(default)]
    policies: PoliciesDef,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PromptDef {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    parameters: Vec<Parameter>,
    messages: Vec<PromptMessage>,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    policies: PoliciesDef,
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Load every endpoint YAML under `root`.
pub fn load_dir(root: &Path, introspect: &dyn HostIntrospect) -> LoadOutcome {
    let mut outcome = LoadOutcome {
        loaded: Vec::new(),
        errors: Vec::new(),
        warnings: Vec::new(),
        schema_hash: String::new(),
    };
    let mut sources: Vec<(PathBuf, String)> = Vec::new();

    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_hidden(e.path()))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yml") | Some("yaml")
            )
        })
        .filter(|path| {
            !path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| SITE_CONFIG_NAMES.contains(&n))
                .unwrap_or(false)
        })
        .collect();
    files.sort();

    for path in files {
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(source) => {
                outcome.errors.push(LoadError::Io {
                    path: path.clone(),
                    source,
                });
                continue;
            }
        };

        match load_file(&path, &text, introspect) {
            Ok(Some(endpoint)) => {
                if let Some(existing) = outcome.loaded.iter().find(|e| e.id == endpoint.id) {
                    outcome.errors.push(LoadError::invalid(
                        &path,
                        format!(
                            "duplicate endpoint id '{}' (first defined in {})",
                            endpoint.id,
                            existing.path.display()
                        ),
                    ));
                } else {
                    debug!(id = %endpoint.id, kind = %endpoint.kind, path = %path.display(), "loaded endpoint");
                    sources.push((path.clone(), text));
                    outcome.loaded.push(Arc::new(endpoint));
                }
            }
            Ok(None) => {
                let message = format!(
                    "{}: no tool/resource/prompt root key, file ignored",
                    path.display()
                );
                warn!("{}", message);
                outcome.warnings.push(message);
            }
            Err(err) => outcome.errors.push(err),
        }
    }

    // Digest sorted contents so the hash is independent of walk order.
    sources.sort_by(|a, b| a.0.cmp(&b.0));
    let mut hasher = Sha256::new();
    for (path, text) in &sources {
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update([0]);
        hasher.update(text.as_bytes());
    }
    outcome.schema_hash = hex::encode(hasher.finalize());

    outcome
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.') && n != "." && n != "..")
        .unwrap_or(false)
}

/// Parse and build one file. `Ok(None)` means the file carries none of the
/// endpoint root keys and is ignored with a warning.
fn load_file(
    path: &Path,
    text: &str,
    introspect: &dyn HostIntrospect,
) -> Result<Option<Endpoint>, LoadError> {
    let doc: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|e| LoadError::from_yaml(path, e))?;

    if !doc.is_mapping() {
        return Ok(None);
    }

    let present: Vec<&str> = ["tool", "resource", "prompt"]
        .into_iter()
        .filter(|key| doc.get(*key).is_some())
        .collect();

    let kind = match present.as_slice() {
        [] => return Ok(None),
        [kind] => *kind,
        _ => {
            return Err(LoadError::invalid(
                path,
                format!("multiple root keys: {}", present.join(", ")),
            ));
        }
    };

    match doc.get("mxcp").and_then(serde_yaml::Value::as_u64) {
        Some(SCHEMA_VERSION) => {}
        Some(other) => {
            return Err(LoadError::invalid(
                path,
                format!("unsupported schema version {} (expected {})", other, SCHEMA_VERSION),
            ));
        }
        None => {
            return Err(LoadError::invalid(path, "missing schema version key 'mxcp: 1'"));
        }
    }

    let body = doc
        .get(kind)
        .cloned()
        .expect("classified root key present");

    let endpoint = match kind {
        "tool" => {
            let def: ToolDef =
                serde_yaml::from_value(body).map_err(|e| LoadError::from_yaml(path, e))?;
            build_tool(path, def, introspect)?
        }
        "resource" => {
            let def: ResourceDef =
                serde_yaml::from_value(body).map_err(|e| LoadError::from_yaml(path, e))?;
            build_resource(path, def, introspect)?
        }
        _ => {
            let def: PromptDef =
                serde_yaml::from_value(body).map_err(|e| LoadError::from_yaml(path, e))?;
            build_prompt(path, def)?
        }
    };

    Ok(Some(endpoint))
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

fn build_tool(
    path: &Path,
    def: ToolDef,
    introspect: &dyn HostIntrospect,
) -> Result<Endpoint, LoadError> {
    validate_parameters(path, &def.parameters)?;
    validate_return_type(path, def.return_type.as_ref())?;

    let source = resolve_source(
        path,
        def.language.unwrap_or(Language::Sql),
        def.source,
        &def.parameters,
        introspect,
    )?;
    let (input_policies, output_policies) = compile_policies(path, &def.policies)?;
    validate_tests(path, &def.tests, &def.parameters)?;

    Ok(Endpoint {
        id: def.name.clone(),
        kind: EndpointKind::Tool,
        name: def.name,
        description: def.description,
        enabled: def.enabled,
        tags: def.tags,
        annotations: def.annotations,
        parameters: def.parameters,
        return_type: def.return_type,
        input_policies,
        output_policies,
        source: Some(source),
        timeout_secs: def.timeout,
        detail: EndpointDetail::Tool,
        tests: def.tests,
        path: path.to_path_buf(),
    })
}

fn build_resource(
    path: &Path,
    def: ResourceDef,
    introspect: &dyn HostIntrospect,
) -> Result<Endpoint, LoadError> {
    validate_parameters(path, &def.parameters)?;
    validate_return_type(path, def.return_type.as_ref())?;

    let uri = UriTemplate::parse(&def.uri).map_err(|e| LoadError::invalid(path, e.to_string()))?;
    for param in uri.params() {
        if !def.parameters.iter().any(|p| p.name == param) {
            return Err(LoadError::invalid(
                path,
                format!("URI template parameter '{{{}}}' is not declared in parameters", param),
            ));
        }
    }

    let source = resolve_source(
        path,
        def.language.unwrap_or(Language::Sql),
        def.source,
        &def.parameters,
        introspect,
    )?;
    let (input_policies, output_policies) = compile_policies(path, &def.policies)?;
    validate_tests(path, &def.tests, &def.parameters)?;

    Ok(Endpoint {
        id: def.uri.clone(),
        kind: EndpointKind::Resource,
        name: def.name.unwrap_or_else(|| def.uri.clone()),
        description: def.description,
        enabled: def.enabled,
        tags: def.tags,
        annotations: def.annotations,
        parameters: def.parameters,
        return_type: def.return_type,
        input_policies,
        output_policies,
        source: Some(source),
        timeout_secs: def.timeout,
        detail: EndpointDetail::Resource {
            uri,
            mime_type: def.mime_type,
        },
        tests: def.tests,
        path: path.to_path_buf(),
    })
}

fn build_prompt(path: &Path, def: PromptDef) -> Result<Endpoint, LoadError> {
    validate_parameters(path, &def.parameters)?;

    if def.messages.is_empty() {
        return Err(LoadError::invalid(path, "prompt has no messages"));
    }
    for message in &def.messages {
        for capture in template_var_pattern().captures_iter(&message.prompt) {
            let var = &capture[1];
            if !def.parameters.iter().any(|p| p.name == var) {
                return Err(LoadError::invalid(
                    path,
                    format!("template variable '{{{{ {} }}}}' is not declared in parameters", var),
                ));
            }
        }
    }

    let (input_policies, output_policies) = compile_policies(path, &def.policies)?;

    Ok(Endpoint {
        id: def.name.clone(),
        kind: EndpointKind::Prompt,
        name: def.name,
        description: def.description,
        enabled: def.enabled,
        tags: def.tags,
        annotations: Annotations::default(),
        parameters: def.parameters,
        return_type: None,
        input_policies,
        output_policies,
        source: None,
        timeout_secs: None,
        detail: EndpointDetail::Prompt {
            messages: def.messages,
        },
        tests: Vec::new(),
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

fn validate_parameters(path: &Path, parameters: &[Parameter]) -> Result<(), LoadError> {
    for (i, param) in parameters.iter().enumerate() {
        if !param_name_pattern().is_match(&param.name) {
            return Err(LoadError::invalid(
                path,
                format!("invalid parameter name '{}'", param.name),
            ));
        }
        if parameters[..i].iter().any(|p| p.name == param.name) {
            return Err(LoadError::invalid(
                path,
                format!("duplicate parameter name '{}'", param.name),
            ));
        }
        validate_spec(path, &param.spec, &format!("parameter '{}'", param.name))?;

        if let Some(default) = &param.spec.default {
            if let Err(errors) = validate_and_coerce(default, &param.spec) {
                return Err(LoadError::invalid(
                    path,
                    format!(
                        "default for parameter '{}' does not satisfy its type: {}",
                        param.name, errors[0]
                    ),
                ));
            }
        }
    }
    Ok(())
}

fn validate_return_type(path: &Path, return_type: Option<&TypeSpec>) -> Result<(), LoadError> {
    if let Some(spec) = return_type {
        validate_spec(path, spec, "return type")?;
    }
    Ok(())
}

/// Structural checks the serde shape cannot express.
fn validate_spec(path: &Path, spec: &TypeSpec, what: &str) -> Result<(), LoadError> {
    if spec.kind == TypeKind::Array && spec.items.is_none() {
        return Err(LoadError::invalid(
            path,
            format!("{}: array type requires 'items'", what),
        ));
    }
    if let Some(items) = &spec.items {
        validate_spec(path, items, what)?;
    }
    if let Some(props) = &spec.properties {
        for (name, prop) in props {
            validate_spec(path, prop, &format!("{}.{}", what, name))?;
        }
    }
    Ok(())
}

fn resolve_source(
    path: &Path,
    language: Language,
    source: Option<SourceDef>,
    parameters: &[Parameter],
    introspect: &dyn HostIntrospect,
) -> Result<EndpointSource, LoadError> {
    let source = source.ok_or_else(|| LoadError::invalid(path, "missing source"))?;

    match language {
        Language::Sql => {
            let code = match (source.code, source.file) {
                (Some(code), None) => code,
                (None, Some(file)) => {
                    let resolved = path.parent().unwrap_or(Path::new(".")).join(&file);
                    std::fs::read_to_string(&resolved).map_err(|e| LoadError::Io {
                        path: resolved,
                        source: e,
                    })?
                }
                (Some(_), Some(_)) => {
                    return Err(LoadError::invalid(
                        path,
                        "source must declare either 'code' or 'file', not both",
                    ));
                }
                (None, None) => {
                    return Err(LoadError::invalid(
                        path,
                        "source must declare either 'code' or 'file'",
                    ));
                }
            };
            if source.function.is_some() {
                return Err(LoadError::invalid(
                    path,
                    "source.function is only valid for host-language endpoints",
                ));
            }
            Ok(EndpointSource::Sql { code })
        }
        Language::Host => {
            let file = source
                .file
                .ok_or_else(|| LoadError::invalid(path, "host source requires 'file'"))?;
            if source.code.is_some() {
                return Err(LoadError::invalid(
                    path,
                    "host source takes 'file' and 'function', not inline code",
                ));
            }
            let function = source
                .function
                .ok_or_else(|| LoadError::invalid(path, "host source requires 'function'"))?;

            let param_names = introspect.function_params(&file, &function).ok_or_else(|| {
                LoadError::invalid(
                    path,
                    format!("host function '{}' not found in module '{}'", function, file),
                )
            })?;
            for name in &param_names {
                if !parameters.iter().any(|p| &p.name == name) {
                    return Err(LoadError::invalid(
                        path,
                        format!(
                            "host function '{}' takes parameter '{}' which is not declared",
                            function, name
                        ),
                    ));
                }
            }

            Ok(EndpointSource::Host {
                file,
                function,
                param_names,
            })
        }
    }
}

fn compile_policies(
    path: &Path,
    policies: &PoliciesDef,
) -> Result<(Vec<Policy>, Vec<Policy>), LoadError> {
    let compile = |defs: &[PolicyDef], stage: PolicyStage| {
        defs.iter()
            .map(|def| {
                Policy::compile(def, stage).map_err(|e| {
                    LoadError::invalid(
                        path,
                        format!("policy condition '{}': {}", def.condition, e),
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()
    };
    Ok((
        compile(&policies.input, PolicyStage::Input)?,
        compile(&policies.output, PolicyStage::Output)?,
    ))
}

fn validate_tests(
    path: &Path,
    tests: &[EndpointTest],
    parameters: &[Parameter],
) -> Result<(), LoadError> {
    if tests.is_empty() {
        return Ok(());
    }
    let mut spec = TypeSpec::object(
        parameters.iter().map(|p| (p.name.clone(), p.spec.clone())),
        parameters
            .iter()
            .filter(|p| p.spec.default.is_none())
            .map(|p| p.name.clone()),
    );
    spec.additional_properties = Some(false);

    for test in tests {
        let args = JsonValue::Object(
            test.arguments
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );
        if let Err(errors) = validate_and_coerce(&args, &spec) {
            return Err(LoadError::invalid(
                path,
                format!("test '{}': arguments do not satisfy parameters: {}", test.name, errors[0]),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    struct FakeModules(HashMap<(String, String), Vec<String>>);

    impl HostIntrospect for FakeModules {
        fn function_params(&self, file: &str, function: &str) -> Option<Vec<String>> {
            self.0.get(&(file.to_string(), function.to_string())).cloned()
        }
    }

    fn write(dir: &TempDir, name: &str, contents: &str) {
        std::fs::write(dir.path().join(name), contents).unwrap();
    }

    const ADD_TOOL: &str = r#"
mxcp: 1
tool:
  name: add
  description: Add two integers
  parameters:
    - name: a
      type: integer
    - name: b
      type: integer
  return:
    type: integer
  source:
    code: "SELECT $a + $b AS r"
"#;

    #[test]
    fn test_load_tool() {
        let dir = TempDir::new().unwrap();
        write(&dir, "add.yml", ADD_TOOL);

        let outcome = load_dir(dir.path(), &NoHostModules);
        assert!(outcome.is_clean(), "{:?}", outcome.errors);
        assert_eq!(outcome.loaded.len(), 1);

        let endpoint = &outcome.loaded[0];
        assert_eq!(endpoint.id, "add");
        assert_eq!(endpoint.kind, EndpointKind::Tool);
        assert_eq!(endpoint.parameters.len(), 2);
        assert!(matches!(
            endpoint.source,
            Some(EndpointSource::Sql { ref code }) if code.contains("$a + $b")
        ));
        assert!(!outcome.schema_hash.is_empty());
    }

    #[test]
    fn test_files_without_root_key_warn() {
        let dir = TempDir::new().unwrap();
        write(&dir, "notes.yml", "some: document\n");
        write(&dir, "add.yml", ADD_TOOL);

        let outcome = load_dir(dir.path(), &NoHostModules);
        assert!(outcome.is_clean());
        assert_eq!(outcome.loaded.len(), 1);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("notes.yml"));
    }

    #[test]
    fn test_missing_schema_version() {
        let dir = TempDir::new().unwrap();
        write(&dir, "bad.yml", "tool:\n  name: x\n  source:\n    code: SELECT 1\n");

        let outcome = load_dir(dir.path(), &NoHostModules);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].to_string().contains("mxcp: 1"));
    }

    #[test]
    fn test_invalid_parameter_name() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "bad.yml",
            r#"
mxcp: 1
tool:
  name: bad
  parameters:
    - name: "1bad"
      type: string
  source:
    code: SELECT 1
"#,
        );
        let outcome = load_dir(dir.path(), &NoHostModules);
        assert!(outcome.errors[0].to_string().contains("invalid parameter name"));
    }

    #[test]
    fn test_duplicate_parameter_name() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "bad.yml",
            r#"
mxcp: 1
tool:
  name: bad
  parameters:
    - name: a
      type: string
    - name: a
      type: integer
  source:
    code: SELECT 1
"#,
        );
        let outcome = load_dir(dir.path(), &NoHostModules);
        assert!(outcome.errors[0].to_string().contains("duplicate parameter"));
    }

    #[test]
    fn test_source_code_xor_file() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "bad.yml",
            r#"
mxcp: 1
tool:
  name: bad
  source:
    code: SELECT 1
    file: query.sql
"#,
        );
        let outcome = load_dir(dir.path(), &NoHostModules);
        assert!(outcome.errors[0].to_string().contains("not both"));
    }

    #[test]
    fn test_source_from_file() {
        let dir = TempDir::new().unwrap();
        write(&dir, "query.sql", "SELECT 42 AS answer");
        write(
            &dir,
            "tool.yml",
            r#"
mxcp: 1
tool:
  name: answer
  return:
    type: integer
  source:
    file: query.sql
"#,
        );
        let outcome = load_dir(dir.path(), &NoHostModules);
        assert!(outcome.is_clean(), "{:?}", outcome.errors);
        assert!(matches!(
            outcome.loaded[0].source,
            Some(EndpointSource::Sql { ref code }) if code.contains("42")
        ));
    }

    #[test]
    fn test_resource_uri_params_must_be_declared() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "res.yml",
            r#"
mxcp: 1
resource:
  uri: "data://employees/{id}"
  source:
    code: "SELECT * FROM employees WHERE id = $id"
"#,
        );
        let outcome = load_dir(dir.path(), &NoHostModules);
        assert!(outcome.errors[0].to_string().contains("'{id}'"));
    }

    #[test]
    fn test_resource_valid() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "res.yml",
            r#"
mxcp: 1
resource:
  uri: "data://employees/{id}"
  mime_type: application/json
  parameters:
    - name: id
      type: string
  return:
    type: object
    properties:
      id:
        type: string
  source:
    code: "SELECT id FROM employees WHERE id = $id"
"#,
        );
        let outcome = load_dir(dir.path(), &NoHostModules);
        assert!(outcome.is_clean(), "{:?}", outcome.errors);
        assert_eq!(outcome.loaded[0].id, "data://employees/{id}");
        assert_eq!(outcome.loaded[0].kind, EndpointKind::Resource);
    }

    #[test]
    fn test_prompt_template_vars_must_be_declared() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "prompt.yml",
            r#"
mxcp: 1
prompt:
  name: greet
  parameters:
    - name: who
      type: string
  messages:
    - role: user
      prompt: "Hello {{ who }}, today is {{ day }}"
"#,
        );
        let outcome = load_dir(dir.path(), &NoHostModules);
        assert!(outcome.errors[0].to_string().contains("day"));
    }

    #[test]
    fn test_prompt_valid() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "prompt.yml",
            r#"
mxcp: 1
prompt:
  name: greet
  parameters:
    - name: who
      type: string
  messages:
    - role: user
      prompt: "Hello {{ who }}"
"#,
        );
        let outcome = load_dir(dir.path(), &NoHostModules);
        assert!(outcome.is_clean(), "{:?}", outcome.errors);
        assert_eq!(outcome.loaded[0].kind, EndpointKind::Prompt);
        assert!(outcome.loaded[0].return_type.is_none());
    }

    #[test]
    fn test_host_function_introspection() {
        let mut modules = HashMap::new();
        modules.insert(
            ("tools.rs".to_string(), "lookup".to_string()),
            vec!["id".to_string()],
        );
        let introspect = FakeModules(modules);

        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "host.yml",
            r#"
mxcp: 1
tool:
  name: lookup
  language: host
  parameters:
    - name: id
      type: string
  return:
    type: object
  source:
    file: tools.rs
    function: lookup
"#,
        );
        let outcome = load_dir(dir.path(), &introspect);
        assert!(outcome.is_clean(), "{:?}", outcome.errors);
        assert!(matches!(
            outcome.loaded[0].source,
            Some(EndpointSource::Host { ref param_names, .. }) if param_names == &["id"]
        ));
    }

    #[test]
    fn test_host_function_unknown_parameter() {
        let mut modules = HashMap::new();
        modules.insert(
            ("tools.rs".to_string(), "lookup".to_string()),
            vec!["id".to_string(), "verbose".to_string()],
        );
        let introspect = FakeModules(modules);

        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "host.yml",
            r#"
mxcp: 1
tool:
  name: lookup
  language: host
  parameters:
    - name: id
      type: string
  source:
    file: tools.rs
    function: lookup
"#,
        );
        let outcome = load_dir(dir.path(), &introspect);
        assert!(outcome.errors[0].to_string().contains("verbose"));
    }

    #[test]
    fn test_partial_load_keeps_valid_subset() {
        let dir = TempDir::new().unwrap();
        write(&dir, "add.yml", ADD_TOOL);
        write(&dir, "broken.yml", "mxcp: 1\ntool:\n  no_name: true\n");

        let outcome = load_dir(dir.path(), &NoHostModules);
        assert_eq!(outcome.loaded.len(), 1);
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn test_duplicate_endpoint_id() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.yml", ADD_TOOL);
        write(&dir, "b.yml", ADD_TOOL);

        let outcome = load_dir(dir.path(), &NoHostModules);
        assert_eq!(outcome.loaded.len(), 1);
        assert!(outcome.errors[0].to_string().contains("duplicate endpoint id"));
    }

    #[test]
    fn test_array_requires_items() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "bad.yml",
            r#"
mxcp: 1
tool:
  name: bad
  parameters:
    - name: xs
      type: array
  source:
    code: SELECT 1
"#,
        );
        let outcome = load_dir(dir.path(), &NoHostModules);
        assert!(outcome.errors[0].to_string().contains("items"));
    }

    #[test]
    fn test_test_arguments_validated() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "bad.yml",
            r#"
mxcp: 1
tool:
  name: add
  parameters:
    - name: a
      type: integer
  return:
    type: integer
  source:
    code: "SELECT $a"
  tests:
    - name: wrong type
      arguments:
        a: "not a number"
"#,
        );
        let outcome = load_dir(dir.path(), &NoHostModules);
        assert!(outcome.errors[0].to_string().contains("wrong type"));
    }

    #[test]
    fn test_policy_conditions_compile() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "bad.yml",
            r#"
mxcp: 1
tool:
  name: gated
  source:
    code: SELECT 1
  policies:
    input:
      - condition: "user.role =="
        action: deny
"#,
        );
        let outcome = load_dir(dir.path(), &NoHostModules);
        assert!(outcome.errors[0].to_string().contains("policy condition"));
    }
}
