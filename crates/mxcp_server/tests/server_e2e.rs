//! End-to-end scenarios over the full pipeline: loader, registry,
//! executor, runners, policies, audit, and reload.

use mxcp_audit::AuditRecord;
use mxcp_db::Secret;
use mxcp_server::config::ConfigProvider;
use mxcp_server::{
    ErrorKind, HostFunction, HostModule, HostModuleTable, LifecycleHooks, Server, ServerConfig,
    ServerContext, StaticSecrets, UserContext,
};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

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

const EMPLOYEE_TOOL: &str = r#"
mxcp: 1
tool:
  name: employee
  parameters:
    - name: id
      type: integer
  return:
    type: object
    properties:
      ssn:
        type: string
        sensitive: true
      salary:
        type: number
  source:
    code: "SELECT '123-45-6789' AS ssn, 90000 AS salary"
  policies:
    input:
      - condition: "user.role == 'guest'"
        action: deny
        reason: "no guests"
    output:
      - condition: "user.role != 'hr'"
        action: mask_fields
        fields: [ssn]
"#;

const GREET_PROMPT: &str = r#"
mxcp: 1
prompt:
  name: greet
  parameters:
    - name: who
      type: string
  messages:
    - role: user
      prompt: "Hello {{ who }}!"
"#;

const SECRET_PEEK_TOOL: &str = r#"
mxcp: 1
tool:
  name: secret_peek
  language: host
  return:
    type: string
  source:
    file: tools.rs
    function: secret_peek
"#;

const SLOW_TOOL: &str = r#"
mxcp: 1
tool:
  name: slow
  language: host
  return:
    type: string
  source:
    file: tools.rs
    function: slow
"#;

const COUNTED_TOOL: &str = r#"
mxcp: 1
tool:
  name: counted
  parameters:
    - name: run
      type: boolean
  return:
    type: integer
  language: host
  source:
    file: tools.rs
    function: counted
  policies:
    input:
      - condition: "user.role == 'guest'"
        action: deny
        reason: "no guests"
"#;

fn test_config(root: &Path) -> ServerConfig {
    ServerConfig {
        project: "test-project".to_string(),
        profile: "test".to_string(),
        repo_root: root.to_path_buf(),
        database: None,
        readonly: false,
        extensions: Vec::new(),
        secret_names: vec!["api".to_string()],
        sql_tools_enabled: false,
        audit_enabled: true,
        audit_path: root.join("audit.jsonl"),
        audit_retention_days: 30,
        drift_path: None,
        admin_enabled: false,
        admin_socket: root.join("admin.sock"),
        debug: false,
        disable_analytics: true,
        request_timeout: Duration::from_secs(30),
        drain_timeout: Duration::from_secs(60),
    }
}

fn host_modules(counter: Arc<AtomicUsize>) -> HostModuleTable {
    HostModuleTable::new().with(
        "tools.rs",
        HostModule::new()
            .with(HostFunction::sync("secret_peek", &[], |call| {
                Ok(Value::String(
                    call.runtime
                        .secret("api", "value")
                        .unwrap_or_else(|| "<none>".to_string()),
                ))
            }))
            .with(HostFunction::cooperative("slow", &[], |call| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(Value::String(
                        call.runtime
                            .secret("api", "value")
                            .unwrap_or_else(|| "<none>".to_string()),
                    ))
                })
            }))
            .with(HostFunction::sync("counted", &["run"], move |_| {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(json!(n))
            })),
    )
}

fn static_provider(token: &str) -> Box<dyn ConfigProvider> {
    Box::new(StaticSecrets(vec![Secret {
        name: "api".to_string(),
        kind: None,
        values: [("value".to_string(), token.to_string())].into(),
    }]))
}

struct TestServer {
    server: Server,
    audit_path: PathBuf,
    _dir: TempDir,
}

fn build_server(files: &[(&str, &str)], provider: Box<dyn ConfigProvider>) -> TestServer {
    build_server_with_counter(files, provider, Arc::new(AtomicUsize::new(0)))
}

fn build_server_with_counter(
    files: &[(&str, &str)],
    provider: Box<dyn ConfigProvider>,
    counter: Arc<AtomicUsize>,
) -> TestServer {
    let dir = TempDir::new().unwrap();
    for (name, contents) in files {
        std::fs::write(dir.path().join(name), contents).unwrap();
    }
    let config = test_config(dir.path());
    let audit_path = config.audit_path.clone();
    let ctx = ServerContext::initialize(
        config,
        provider,
        host_modules(counter),
        LifecycleHooks::new(),
    )
    .unwrap();
    TestServer {
        server: Server::new(ctx),
        audit_path,
        _dir: dir,
    }
}

fn args(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn user_with_role(role: &str) -> UserContext {
    UserContext {
        user_id: Some("u1".to_string()),
        role: Some(role.to_string()),
        ..Default::default()
    }
}

/// The audit writer is asynchronous; poll the file until `n` records are
/// visible.
async fn audit_records(path: &Path, n: usize) -> Vec<AuditRecord> {
    for _ in 0..200 {
        if let Ok(contents) = std::fs::read_to_string(path) {
            let records: Vec<AuditRecord> = contents
                .lines()
                .map(|line| serde_json::from_str(line).expect("valid audit line"))
                .collect();
            if records.len() >= n {
                return records;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("audit log never reached {} records", n);
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s1_happy_sql_tool() {
    let t = build_server(&[("add.yml", ADD_TOOL)], static_provider("t0"));

    let result = t
        .server
        .invoke("add", args(&[("a", json!(2)), ("b", json!(3))]), UserContext::default())
        .await
        .unwrap();
    assert_eq!(result, json!(5));

    let records = audit_records(&t.audit_path, 1).await;
    let record = &records[0];
    assert_eq!(record.endpoint_id, "add");
    assert_eq!(record.endpoint_kind, "tool");
    assert!(matches!(record.status, mxcp_audit::AuditStatus::Success));
    assert_eq!(record.policy_decision, mxcp_policy::PolicyDecision::None);
    assert_eq!(record.input_redacted, json!({"a": 2, "b": 3}));
}

#[tokio::test]
async fn s2_input_validation_failure() {
    let t = build_server(&[("add.yml", ADD_TOOL)], static_provider("t0"));

    let err = t
        .server
        .invoke("add", args(&[("a", json!("x")), ("b", json!(3))]), UserContext::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::BadInput);
    assert!(err.message.contains("$.a"), "message was: {}", err.message);

    let records = audit_records(&t.audit_path, 1).await;
    assert!(matches!(records[0].status, mxcp_audit::AuditStatus::Error));
    assert_eq!(records[0].error_kind.as_deref(), Some("BadInput"));
}

#[tokio::test]
async fn s3_policy_deny_skips_runner() {
    let counter = Arc::new(AtomicUsize::new(0));
    let t = build_server_with_counter(
        &[("counted.yml", COUNTED_TOOL)],
        static_provider("t0"),
        counter.clone(),
    );

    let err = t
        .server
        .invoke("counted", args(&[("run", json!(true))]), user_with_role("guest"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::PolicyDenied);
    assert!(err.message.contains("no guests"));
    // The runner was never invoked.
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    let records = audit_records(&t.audit_path, 1).await;
    assert!(matches!(records[0].status, mxcp_audit::AuditStatus::Denied));
    assert_eq!(records[0].policy_reason.as_deref(), Some("no guests"));
    assert_eq!(records[0].policy_decision, mxcp_policy::PolicyDecision::Deny);

    // A permitted caller reaches the runner.
    let result = t
        .server
        .invoke("counted", args(&[("run", json!(true))]), user_with_role("admin"))
        .await
        .unwrap();
    assert_eq!(result, json!(1));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn s4_output_mask_and_audit_redaction() {
    let t = build_server(&[("employee.yml", EMPLOYEE_TOOL)], static_provider("t0"));

    let result = t
        .server
        .invoke("employee", args(&[("id", json!(1))]), user_with_role("engineer"))
        .await
        .unwrap();
    assert_eq!(result["ssn"], json!("****"));
    assert_eq!(result["salary"], json!(90000));

    let records = audit_records(&t.audit_path, 1).await;
    let record = &records[0];
    assert_eq!(record.policy_decision, mxcp_policy::PolicyDecision::Mask);
    let summary = record.output_redacted_summary.as_ref().unwrap();
    // The sensitive path is redacted in the audit copy, masked or not.
    assert_eq!(summary["ssn"], json!("[REDACTED]"));
    assert_eq!(summary["salary"], json!(90000));

    // HR sees the value unmasked.
    let result = t
        .server
        .invoke("employee", args(&[("id", json!(1))]), user_with_role("hr"))
        .await
        .unwrap();
    assert_eq!(result["ssn"], json!("123-45-6789"));
}

#[tokio::test]
async fn s5_reload_swaps_secrets_for_new_requests_only() {
    struct Rotating {
        calls: AtomicUsize,
    }
    impl ConfigProvider for Rotating {
        fn resolve_secrets(&self, names: &[String]) -> anyhow::Result<Vec<Secret>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(names
                .iter()
                .map(|name| Secret {
                    name: name.clone(),
                    kind: None,
                    values: [("value".to_string(), format!("token-{}", n))].into(),
                })
                .collect())
        }
    }

    let t = build_server(
        &[("slow.yml", SLOW_TOOL), ("peek.yml", SECRET_PEEK_TOOL)],
        Box::new(Rotating {
            calls: AtomicUsize::new(0),
        }),
    );
    let ctx = t.server.context().clone();

    // One long-running request in flight.
    let slow_ctx = ctx.clone();
    let slow = tokio::spawn(async move {
        Server::new(slow_ctx)
            .invoke("slow", Map::new(), UserContext::default())
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Reload while it runs; the drain waits it out.
    mxcp_server::reload::run(&ctx, false).await.unwrap();

    // The in-flight request observed the old session throughout.
    let old = slow.await.unwrap().unwrap();
    assert_eq!(old, json!("token-0"));

    // A subsequent invocation observes refreshed secrets.
    let fresh = t
        .server
        .invoke("secret_peek", Map::new(), UserContext::default())
        .await
        .unwrap();
    assert_eq!(fresh, json!("token-1"));

    let status = ctx.reload_status();
    assert_eq!(status.last_reload_status.as_deref(), Some("success"));
    assert!(!status.draining);
    assert!(!status.in_progress);
    assert!(mxcp_server::signals::exit_status(&ctx).is_ok());
}

#[tokio::test]
async fn s6_reload_failure_rolls_back() {
    struct FailsAfterFirst {
        calls: AtomicUsize,
    }
    impl ConfigProvider for FailsAfterFirst {
        fn resolve_secrets(&self, names: &[String]) -> anyhow::Result<Vec<Secret>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
                anyhow::bail!("vault unreachable");
            }
            Ok(names
                .iter()
                .map(|name| Secret {
                    name: name.clone(),
                    kind: None,
                    values: [("value".to_string(), "original".to_string())].into(),
                })
                .collect())
        }
    }

    let t = build_server(
        &[("peek.yml", SECRET_PEEK_TOOL)],
        Box::new(FailsAfterFirst {
            calls: AtomicUsize::new(0),
        }),
    );
    let ctx = t.server.context().clone();

    let err = mxcp_server::reload::run(&ctx, false).await.unwrap_err();
    assert!(err.to_string().contains("vault unreachable"));

    let status = ctx.reload_status();
    assert_eq!(status.last_reload_status.as_deref(), Some("error"));
    assert!(status
        .last_reload_error
        .as_deref()
        .unwrap()
        .contains("vault unreachable"));
    assert!(!status.draining);

    // The server still works with the previous configuration.
    let result = t
        .server
        .invoke("secret_peek", Map::new(), UserContext::default())
        .await
        .unwrap();
    assert_eq!(result, json!("original"));

    // A later shutdown reports the failed state through the exit code.
    let exit = mxcp_server::signals::exit_status(&ctx);
    assert!(exit.unwrap_err().to_string().contains("vault unreachable"));
}

// ---------------------------------------------------------------------------
// Universal properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn audit_exactly_one_record_per_invocation() {
    let t = build_server(&[("add.yml", ADD_TOOL)], static_provider("t0"));

    for i in 0..5 {
        let _ = t
            .server
            .invoke("add", args(&[("a", json!(i)), ("b", json!(1))]), UserContext::default())
            .await;
    }
    // A failing invocation also gets exactly one record.
    let _ = t
        .server
        .invoke("add", args(&[("a", json!("bad")), ("b", json!(1))]), UserContext::default())
        .await;
    let _ = t
        .server
        .invoke("nope", Map::new(), UserContext::default())
        .await;

    let records = audit_records(&t.audit_path, 7).await;
    assert_eq!(records.len(), 7);
}

#[tokio::test]
async fn unknown_endpoint_is_not_found_and_audited() {
    let t = build_server(&[("add.yml", ADD_TOOL)], static_provider("t0"));

    let err = t
        .server
        .invoke("missing", Map::new(), UserContext::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);

    let records = audit_records(&t.audit_path, 1).await;
    assert_eq!(records[0].error_kind.as_deref(), Some("NotFound"));
}

#[tokio::test]
async fn prompt_renders_messages() {
    let t = build_server(&[("greet.yml", GREET_PROMPT)], static_provider("t0"));

    let result = t
        .server
        .invoke("greet", args(&[("who", json!("ada"))]), UserContext::default())
        .await
        .unwrap();
    assert_eq!(result["messages"][0]["prompt"], json!("Hello ada!"));
    assert_eq!(result["messages"][0]["role"], json!("user"));
}

#[tokio::test]
async fn defaults_are_applied_before_running() {
    const DEFAULTED: &str = r#"
mxcp: 1
tool:
  name: scaled
  parameters:
    - name: x
      type: integer
    - name: factor
      type: integer
      default: 10
  return:
    type: integer
  source:
    code: "SELECT $x * $factor AS r"
"#;
    let t = build_server(&[("scaled.yml", DEFAULTED)], static_provider("t0"));

    let result = t
        .server
        .invoke("scaled", args(&[("x", json!(4))]), UserContext::default())
        .await
        .unwrap();
    assert_eq!(result, json!(40));
}

#[tokio::test]
async fn undeclared_arguments_are_rejected() {
    let t = build_server(&[("add.yml", ADD_TOOL)], static_provider("t0"));

    let err = t
        .server
        .invoke(
            "add",
            args(&[("a", json!(1)), ("b", json!(2)), ("c", json!(3))]),
            UserContext::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::BadInput);
    assert!(err.message.contains("$.c"));
}

#[tokio::test]
async fn sql_cardinality_errors_surface() {
    const MANY: &str = r#"
mxcp: 1
tool:
  name: many
  return:
    type: integer
  source:
    code: "SELECT * FROM (VALUES (1), (2)) AS t(n)"
"#;
    let t = build_server(&[("many.yml", MANY)], static_provider("t0"));

    let err = t
        .server
        .invoke("many", Map::new(), UserContext::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TooManyRows);
}

#[tokio::test]
async fn audit_never_contains_sensitive_values() {
    // Shape the response in host code so sensitive values land at several
    // depths.
    const NESTED_HOST: &str = r#"
mxcp: 1
tool:
  name: profile2
  parameters:
    - name: token
      type: string
      sensitive: true
  return:
    type: object
    properties:
      owner:
        type: object
        properties:
          email:
            type: string
            sensitive: true
      keys:
        type: array
        items:
          type: string
          sensitive: true
      plain:
        type: string
  language: host
  source:
    file: tools.rs
    function: profile2
"#;
    let table_counter = Arc::new(AtomicUsize::new(0));
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("profile2.yml"), NESTED_HOST).unwrap();

    let config = test_config(dir.path());
    let audit_path = config.audit_path.clone();
    let modules = host_modules(table_counter).with(
        "tools.rs",
        HostModule::new().with(HostFunction::sync("profile2", &["token"], |_| {
            Ok(json!({
                "owner": {"email": "ada@example.com"},
                "keys": ["key-one", "key-two"],
                "plain": "visible",
            }))
        })),
    );
    let ctx = ServerContext::initialize(
        config,
        static_provider("t0"),
        modules,
        LifecycleHooks::new(),
    )
    .unwrap();
    let server = Server::new(ctx);

    let result = server
        .invoke(
            "profile2",
            args(&[("token", json!("super-secret"))]),
            UserContext::default(),
        )
        .await
        .unwrap();
    assert_eq!(result["plain"], json!("visible"));

    let records = audit_records(&audit_path, 1).await;
    let line = serde_json::to_string(&records[0]).unwrap();
    assert!(!line.contains("super-secret"));
    assert!(!line.contains("ada@example.com"));
    assert!(!line.contains("key-one"));
    assert!(line.contains("visible"));
    assert_eq!(records[0].input_redacted["token"], json!("[REDACTED]"));
}

#[tokio::test]
async fn admin_endpoints_respond() {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    let t = build_server(&[("add.yml", ADD_TOOL)], static_provider("t0"));
    let app = mxcp_server::admin::router(t.server.context().clone());

    let res = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = axum::body::to_bytes(res.into_body(), 64 * 1024).await.unwrap();
    let health: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], json!("ok"));

    let res = app
        .clone()
        .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = axum::body::to_bytes(res.into_body(), 64 * 1024).await.unwrap();
    let status: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(status["mode"], json!("readwrite"));
    assert_eq!(status["endpoints"]["tools"], json!(1));
    assert_eq!(status["profile"], json!("test"));

    let res = app
        .clone()
        .oneshot(Request::builder().uri("/config").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = axum::body::to_bytes(res.into_body(), 64 * 1024).await.unwrap();
    let config: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(config["project"], json!("test-project"));
    // Metadata only; never secret material.
    assert!(config.get("secrets").is_none());

    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/reload")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = axum::body::to_bytes(res.into_body(), 64 * 1024).await.unwrap();
    let reload: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(reload["status"], json!("reload_initiated"));
    assert!(reload["reload_request_id"].is_string());

    let res = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/drift")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = axum::body::to_bytes(res.into_body(), 64 * 1024).await.unwrap();
    let drift: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(drift["status"], json!("drift_written"));
    let drift_file = PathBuf::from(drift["path"].as_str().unwrap());
    let snapshot: Value =
        serde_json::from_str(&std::fs::read_to_string(&drift_file).unwrap()).unwrap();
    assert_eq!(snapshot["version"], json!(1));
    assert!(snapshot["resources"].as_array().unwrap().len() >= 1);
}

#[tokio::test]
async fn requests_during_drain_wait_for_reload() {
    let t = build_server(
        &[("slow.yml", SLOW_TOOL), ("add.yml", ADD_TOOL)],
        static_provider("t0"),
    );
    let ctx = t.server.context().clone();

    let slow_ctx = ctx.clone();
    let slow = tokio::spawn(async move {
        Server::new(slow_ctx)
            .invoke("slow", Map::new(), UserContext::default())
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let reload_ctx = ctx.clone();
    let reload = tokio::spawn(async move { mxcp_server::reload::run(&reload_ctx, false).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Accepted during the drain: pauses on the gate, then completes.
    let result = t
        .server
        .invoke("add", args(&[("a", json!(1)), ("b", json!(1))]), UserContext::default())
        .await
        .unwrap();
    assert_eq!(result, json!(2));

    slow.await.unwrap().unwrap();
    reload.await.unwrap().unwrap();
}
