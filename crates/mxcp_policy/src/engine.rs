//! Policy evaluation and response mutation.

use crate::expr::{Bindings, Expr, ParseError};
use mxcp_types::{strip_sensitive, TypeSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Replacement value written by `mask_fields`.
pub const MASKED: &str = "****";

/// Stage at which a policy applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStage {
    Input,
    Output,
}

/// Policy action, as declared in endpoint YAML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    Deny,
    FilterFields,
    MaskFields,
    FilterSensitiveFields,
}

/// Declarative policy shape (`{condition, action, reason?, fields?}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDef {
    pub condition: String,
    pub action: PolicyAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
}

/// A compiled policy: parsed condition plus its action.
#[derive(Debug, Clone)]
pub struct Policy {
    pub stage: PolicyStage,
    pub condition: Expr,
    pub source: String,
    pub action: PolicyAction,
    pub reason: Option<String>,
    pub fields: Vec<String>,
}

impl Policy {
    /// Compile a declared policy for the given stage.
    pub fn compile(def: &PolicyDef, stage: PolicyStage) -> Result<Self, ParseError> {
        let condition = Expr::parse(&def.condition)?;
        Ok(Self {
            stage,
            condition,
            source: def.condition.clone(),
            action: def.action,
            reason: def.reason.clone(),
            fields: def.fields.clone().unwrap_or_default(),
        })
    }
}

/// Composite decision recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    Allow,
    Deny,
    Filter,
    Mask,
    None,
}

/// Outcome of the input stage.
#[derive(Debug, Clone, PartialEq)]
pub enum InputDecision {
    /// No policy denied; `evaluated` is the number of policies present.
    Allow { evaluated: usize },
    /// A policy matched with action `deny`.
    Deny { reason: String },
}

impl InputDecision {
    pub fn decision(&self) -> PolicyDecision {
        match self {
            Self::Allow { evaluated: 0 } => PolicyDecision::None,
            Self::Allow { .. } => PolicyDecision::Allow,
            Self::Deny { .. } => PolicyDecision::Deny,
        }
    }
}

/// Outcome of the output stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputDecision {
    pub evaluated: usize,
    pub filtered_fields: Vec<String>,
    pub masked_fields: Vec<String>,
    pub sensitive_stripped: bool,
}

impl OutputDecision {
    pub fn decision(&self) -> PolicyDecision {
        if !self.filtered_fields.is_empty() || self.sensitive_stripped {
            PolicyDecision::Filter
        } else if !self.masked_fields.is_empty() {
            PolicyDecision::Mask
        } else if self.evaluated > 0 {
            PolicyDecision::Allow
        } else {
            PolicyDecision::None
        }
    }
}

/// Evaluate input-stage policies in declared order. The first policy whose
/// condition holds decides the stage; only `deny` has an effect on input.
pub fn evaluate_input(policies: &[Policy], user: &Value, input: &Value) -> InputDecision {
    let mut bindings: Bindings = Bindings::new();
    bindings.insert("user", user);
    bindings.insert("input", input);

    for policy in policies {
        if !policy.condition.matches(&bindings) {
            continue;
        }
        if policy.action == PolicyAction::Deny {
            let reason = policy
                .reason
                .clone()
                .unwrap_or_else(|| "denied by policy".to_string());
            debug!(condition = %policy.source, %reason, "input policy denied request");
            return InputDecision::Deny { reason };
        }
        // A non-deny action is a no-op at the input stage, but it still
        // decides the stage.
        break;
    }

    InputDecision::Allow {
        evaluated: policies.len(),
    }
}

/// Apply output-stage policies in declared order; every matching policy's
/// mutation composes on `response`.
pub fn apply_output(
    policies: &[Policy],
    user: &Value,
    input: &Value,
    response: &mut Value,
    return_type: Option<&TypeSpec>,
) -> OutputDecision {
    let mut decision = OutputDecision {
        evaluated: policies.len(),
        ..Default::default()
    };

    for policy in policies {
        let matched = {
            let mut bindings: Bindings = Bindings::new();
            bindings.insert("user", user);
            bindings.insert("input", input);
            bindings.insert("response", response);
            policy.condition.matches(&bindings)
        };
        if !matched {
            continue;
        }

        match policy.action {
            PolicyAction::Deny => {
                // Deny is an input-stage action; at output it degrades to
                // removing the entire response body.
                *response = Value::Null;
                decision.filtered_fields.push("$".to_string());
            }
            PolicyAction::FilterFields => {
                for field in &policy.fields {
                    if remove_path(response, field) {
                        decision.filtered_fields.push(field.clone());
                    }
                }
            }
            PolicyAction::MaskFields => {
                for field in &policy.fields {
                    if mask_path(response, field) {
                        decision.masked_fields.push(field.clone());
                    }
                }
            }
            PolicyAction::FilterSensitiveFields => {
                if let Some(spec) = return_type {
                    *response = strip_sensitive(response, spec);
                    decision.sensitive_stripped = true;
                }
            }
        }
    }

    decision
}

/// Remove the value at a dotted path. On arrays the path applies to the
/// same-named field of each element. Missing paths are silently ignored;
/// returns whether anything was removed.
fn remove_path(value: &mut Value, path: &str) -> bool {
    mutate_path(value, &split_path(path), &mut |map, key| {
        map.remove(key).is_some()
    })
}

/// Replace the value at a dotted path with [`MASKED`].
fn mask_path(value: &mut Value, path: &str) -> bool {
    mutate_path(value, &split_path(path), &mut |map, key| {
        match map.get_mut(key) {
            Some(slot) => {
                *slot = Value::String(MASKED.to_string());
                true
            }
            None => false,
        }
    })
}

fn split_path(path: &str) -> Vec<&str> {
    path.trim_start_matches("$.").split('.').collect()
}

fn mutate_path(
    value: &mut Value,
    segments: &[&str],
    apply: &mut dyn FnMut(&mut serde_json::Map<String, Value>, &str) -> bool,
) -> bool {
    let Some((head, rest)) = segments.split_first() else {
        return false;
    };

    match value {
        Value::Array(items) => {
            let mut changed = false;
            for item in items {
                changed |= mutate_path(item, segments, apply);
            }
            changed
        }
        Value::Object(map) => {
            if rest.is_empty() {
                apply(map, head)
            } else {
                match map.get_mut(*head) {
                    Some(child) => mutate_path(child, rest, apply),
                    None => false,
                }
            }
        }
        _ => false,
    }
}
