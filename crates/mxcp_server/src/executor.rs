//! The request executor.
//!
//! Drives one invocation through the strict stage order:
//!
//! ```text
//! NEW → VALIDATING_INPUT → INPUT_POLICY → RUNNING → VALIDATING_OUTPUT
//!     → OUTPUT_POLICY → AUDITING → DONE
//! ```
//!
//! Any stage may fail; the failure is classified, audited, and surfaced.
//! Exactly one audit record is produced per request regardless of which
//! stage failed, and the runner is never invoked after an input denial.

use crate::context::{RequestContext, ServerContext};
use crate::error::{ErrorKind, ServerError};
use crate::runners::host::{HostCall, HostRuntime};
use crate::runners::{render_prompt, run_sql};
use mxcp_audit::{AuditRecord, AuditStatus};
use mxcp_endpoints::{EndpointDetail, EndpointSource};
use mxcp_policy::{apply_output, evaluate_input, InputDecision, PolicyDecision};
use mxcp_types::{redact_sensitive, validate_and_coerce, validate_output};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info_span, Instrument};

/// Execute one request end to end, producing its audit record.
pub async fn execute(ctx: &Arc<ServerContext>, req: &RequestContext) -> Result<Value, ServerError> {
    let span = info_span!(
        "request",
        request_id = %req.request_id,
        endpoint = %req.endpoint.id,
    );

    let mut trace = StageTrace::default();
    let result = run_stages(ctx, req, &mut trace).instrument(span).await;

    audit(ctx, req, &trace, &result).await;

    result
}

struct StageTrace {
    coerced_input: Option<Value>,
    decision: PolicyDecision,
    policy_reason: Option<String>,
    response: Option<Value>,
}

impl Default for StageTrace {
    fn default() -> Self {
        Self {
            coerced_input: None,
            decision: PolicyDecision::None,
            policy_reason: None,
            response: None,
        }
    }
}

async fn run_stages(
    ctx: &Arc<ServerContext>,
    req: &RequestContext,
    trace: &mut StageTrace,
) -> Result<Value, ServerError> {
    let endpoint = &req.endpoint;

    // VALIDATING_INPUT: resolve defaults, coerce, reject unknowns.
    let params_spec = endpoint.parameters_spec();
    let raw = Value::Object(req.args_raw.clone());
    let coerced = validate_and_coerce(&raw, &params_spec).map_err(|errors| {
        debug!(endpoint = %endpoint.id, "input validation failed");
        ServerError::bad_input(&errors)
    })?;
    trace.coerced_input = Some(coerced.clone());
    let input_map = coerced
        .as_object()
        .cloned()
        .unwrap_or_default();

    // INPUT_POLICY: the runner is never reached after a denial.
    let user_binding = req.user.binding();
    match evaluate_input(&endpoint.input_policies, &user_binding, &coerced) {
        InputDecision::Deny { reason } => {
            trace.decision = PolicyDecision::Deny;
            trace.policy_reason = Some(reason.clone());
            return Err(ServerError::policy_denied(&reason));
        }
        allow => trace.decision = allow.decision(),
    }

    // RUNNING: dispatch by body kind; the deadline is enforced here and
    // only here.
    let run = dispatch(ctx, req, &input_map);
    let mut response = match req.deadline {
        Some(deadline) => {
            match tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), run).await {
                Ok(result) => result?,
                Err(_) => {
                    req.cancel.cancel();
                    return Err(ServerError::new(ErrorKind::Cancelled, "deadline exceeded"));
                }
            }
        }
        None => run.await?,
    };

    // VALIDATING_OUTPUT: coerce the result against the declared shape.
    if let Some(return_type) = &endpoint.return_type {
        response = validate_output(&response, return_type)
            .map_err(|errors| ServerError::bad_output(&errors))?;
    }

    // OUTPUT_POLICY: matching mutations compose; the response may shrink.
    let output_decision = apply_output(
        &endpoint.output_policies,
        &user_binding,
        &coerced,
        &mut response,
        endpoint.return_type.as_ref(),
    );
    trace.decision = combine(trace.decision, output_decision.decision());

    trace.response = Some(response.clone());
    Ok(response)
}

async fn dispatch(
    ctx: &Arc<ServerContext>,
    req: &RequestContext,
    input: &Map<String, Value>,
) -> Result<Value, ServerError> {
    let endpoint = &req.endpoint;

    if let EndpointDetail::Prompt { messages } = &endpoint.detail {
        return Ok(render_prompt(messages, input));
    }

    match endpoint.source.as_ref() {
        Some(EndpointSource::Sql { code }) => {
            run_sql(
                code.clone(),
                input.clone(),
                ctx.session(),
                endpoint.return_type.as_ref(),
                &req.cancel,
            )
            .await
        }
        Some(EndpointSource::Host { file, function, .. }) => {
            let call = HostCall {
                args: input.clone(),
                user: req.user.clone(),
                runtime: HostRuntime::new(
                    ctx.session(),
                    ctx.host_config_view(),
                    req.cancel.clone(),
                ),
            };
            ctx.host_modules().run(file, function, call).await
        }
        None => Err(ServerError::internal(format!(
            "endpoint '{}' has no body",
            endpoint.id
        ))),
    }
}

/// Later, stronger mutations override the input-stage decision; an
/// already-recorded deny is final.
fn combine(input: PolicyDecision, output: PolicyDecision) -> PolicyDecision {
    match (input, output) {
        (PolicyDecision::Deny, _) => PolicyDecision::Deny,
        (_, PolicyDecision::Filter) => PolicyDecision::Filter,
        (_, PolicyDecision::Mask) => PolicyDecision::Mask,
        (PolicyDecision::None, PolicyDecision::Allow) => PolicyDecision::Allow,
        (input, PolicyDecision::None | PolicyDecision::Allow) => input,
        (_, PolicyDecision::Deny) => PolicyDecision::Deny,
    }
}

/// AUDITING: build and enqueue the one record for this request. Redaction
/// is applied before the record leaves this function; the response is
/// never blocked on durable persistence.
async fn audit(
    ctx: &Arc<ServerContext>,
    req: &RequestContext,
    trace: &StageTrace,
    result: &Result<Value, ServerError>,
) {
    let Some(writer) = ctx.audit() else {
        return;
    };

    let endpoint = &req.endpoint;
    let params_spec = endpoint.parameters_spec();

    let mut record = AuditRecord::new(
        req.request_id.clone(),
        endpoint.kind.name(),
        &endpoint.id,
    );
    record.user = req.user.audit_subset();
    record.duration_ms = req.received_at.elapsed().as_millis() as u64;
    record.policy_decision = trace.decision;
    record.policy_reason = trace.policy_reason.clone();
    record.trace_id = req.trace_id.clone();

    let input_for_audit = trace
        .coerced_input
        .clone()
        .unwrap_or_else(|| Value::Object(req.args_raw.clone()));
    record.input_redacted = redact_sensitive(&input_for_audit, &params_spec);

    match result {
        Ok(_) => {
            record.status = AuditStatus::Success;
            if let Some(response) = &trace.response {
                let summary = match &endpoint.return_type {
                    Some(return_type) => redact_sensitive(response, return_type),
                    None => response.clone(),
                };
                record.output_redacted_summary = Some(summary);
            }
        }
        Err(err) => {
            record.status = match err.kind {
                ErrorKind::PolicyDenied => AuditStatus::Denied,
                _ => AuditStatus::Error,
            };
            record.error_kind = Some(err.kind.as_str().to_string());
            record.error_message = Some(err.message.clone());
        }
    }

    writer.enqueue(record).await;
}
