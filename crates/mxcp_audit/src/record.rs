//! The audit record schema.

use chrono::{DateTime, Utc};
use mxcp_policy::PolicyDecision;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Schema identifier embedded in every line.
pub const SCHEMA_ID: &str = "mxcp-audit";

/// Current record schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Final request outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Error,
    Denied,
}

/// The caller identity subset persisted with each record. Claims beyond
/// these are deliberately not recorded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserSubset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// One line of the audit log.
///
/// `input_redacted` and `output_redacted_summary` must already have every
/// sensitive value replaced with `[REDACTED]` when the record is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub schema_id: String,
    pub schema_version: u32,
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub endpoint_kind: String,
    pub endpoint_id: String,
    pub user: UserSubset,
    pub duration_ms: u64,
    pub status: AuditStatus,
    pub policy_decision: PolicyDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub input_redacted: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_redacted_summary: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl AuditRecord {
    /// Start a record with schema header and timestamp filled in.
    pub fn new(request_id: impl Into<String>, endpoint_kind: &str, endpoint_id: &str) -> Self {
        Self {
            schema_id: SCHEMA_ID.to_string(),
            schema_version: SCHEMA_VERSION,
            timestamp: Utc::now(),
            request_id: request_id.into(),
            endpoint_kind: endpoint_kind.to_string(),
            endpoint_id: endpoint_id.to_string(),
            user: UserSubset::default(),
            duration_ms: 0,
            status: AuditStatus::Error,
            policy_decision: PolicyDecision::None,
            policy_reason: None,
            error_kind: None,
            error_message: None,
            input_redacted: Value::Null,
            output_redacted_summary: None,
            trace_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serializes_one_line_with_schema_header() {
        let mut record = AuditRecord::new("req-1", "tool", "add");
        record.status = AuditStatus::Success;
        record.input_redacted = json!({"a": 2});

        let line = serde_json::to_string(&record).unwrap();
        assert!(!line.contains('\n'));
        assert!(line.contains("\"schema_id\":\"mxcp-audit\""));
        assert!(line.contains("\"schema_version\":1"));
        assert!(line.contains("\"status\":\"success\""));

        let parsed: AuditRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.endpoint_id, "add");
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let record = AuditRecord::new("req-1", "tool", "add");
        let line = serde_json::to_string(&record).unwrap();
        assert!(!line.contains("policy_reason"));
        assert!(!line.contains("error_kind"));
        assert!(!line.contains("trace_id"));
    }
}
