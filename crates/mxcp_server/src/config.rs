//! Site configuration and secret resolution.
//!
//! One YAML document per project (`mxcp-site.yml`) selects a profile;
//! environment variables override file values. Secret *names* live in the
//! site config; secret *values* come from a [`ConfigProvider`] and are
//! re-resolved on every reload.

use anyhow::{bail, Context, Result};
use mxcp_db::Secret;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Schema version accepted on the site config document.
const SCHEMA_VERSION: u64 = 1;

/// Environment selectors (spec'd surface, all optional).
pub mod env_vars {
    pub const PROFILE: &str = "MXCP_PROFILE";
    pub const ADMIN_ENABLED: &str = "MXCP_ADMIN_ENABLED";
    pub const ADMIN_SOCKET: &str = "MXCP_ADMIN_SOCKET";
    pub const DEBUG: &str = "MXCP_DEBUG";
    pub const READONLY: &str = "MXCP_READONLY";
    pub const DB_PATH: &str = "MXCP_DB_PATH";
    pub const DISABLE_ANALYTICS: &str = "MXCP_DISABLE_ANALYTICS";
    /// Prefix for environment-backed secret values.
    pub const SECRET_PREFIX: &str = "MXCP_SECRET_";
}

/// Default per-request deadline when neither the edge nor the endpoint
/// declares one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound for waiting out in-flight requests during reload.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Site config document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SiteConfig {
    pub mxcp: u64,
    pub project: String,
    pub profile: String,
    #[serde(default)]
    pub secrets: Vec<String>,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileConfig>,
    #[serde(default)]
    pub sql_tools: SqlToolsConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    #[serde(default)]
    pub database: Option<PathBuf>,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub drift: Option<PathBuf>,
    #[serde(default)]
    pub audit: Option<AuditConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub retention_days: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqlToolsConfig {
    #[serde(default)]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl SiteConfig {
    /// Parse and check a site config document.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read site config {}", path.display()))?;
        let config: SiteConfig = serde_yaml::from_str(&text)
            .with_context(|| format!("failed to parse site config {}", path.display()))?;
        if config.mxcp != SCHEMA_VERSION {
            bail!(
                "{}: unsupported site config schema version {} (expected {})",
                path.display(),
                config.mxcp,
                SCHEMA_VERSION
            );
        }
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Effective server config (file + environment)
// ---------------------------------------------------------------------------

/// Resolved configuration the server actually runs with.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub project: String,
    pub profile: String,
    /// Project root used for endpoint discovery.
    pub repo_root: PathBuf,
    pub database: Option<PathBuf>,
    pub readonly: bool,
    pub extensions: Vec<String>,
    pub secret_names: Vec<String>,
    pub sql_tools_enabled: bool,
    pub audit_enabled: bool,
    pub audit_path: PathBuf,
    pub audit_retention_days: u32,
    pub drift_path: Option<PathBuf>,
    pub admin_enabled: bool,
    pub admin_socket: PathBuf,
    pub debug: bool,
    pub disable_analytics: bool,
    pub request_timeout: Duration,
    pub drain_timeout: Duration,
}

impl ServerConfig {
    /// Combine the site document with environment overrides.
    pub fn resolve(site: &SiteConfig, config_path: &Path) -> Result<Self> {
        let repo_root = config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf();

        let profile_name =
            env_string(env_vars::PROFILE).unwrap_or_else(|| site.profile.clone());
        let profile = site
            .profiles
            .get(&profile_name)
            .cloned()
            .unwrap_or_default();

        let database = env_string(env_vars::DB_PATH)
            .map(PathBuf::from)
            .or(profile.database);
        let readonly = env_flag(env_vars::READONLY).unwrap_or(profile.readonly);

        let audit = profile.audit;
        let audit_enabled = audit.as_ref().map(|a| a.enabled).unwrap_or(false);
        let audit_path = audit
            .as_ref()
            .and_then(|a| a.path.clone())
            .unwrap_or_else(|| repo_root.join(format!("audit-{}.jsonl", profile_name)));
        let audit_retention_days = audit
            .as_ref()
            .and_then(|a| a.retention_days)
            .unwrap_or(30);

        let admin_enabled = env_flag(env_vars::ADMIN_ENABLED).unwrap_or(false);
        let admin_socket = env_string(env_vars::ADMIN_SOCKET)
            .map(PathBuf::from)
            .unwrap_or_else(|| repo_root.join("mxcp-admin.sock"));

        Ok(Self {
            project: site.project.clone(),
            profile: profile_name,
            repo_root,
            database,
            readonly,
            extensions: site.extensions.clone(),
            secret_names: site.secrets.clone(),
            sql_tools_enabled: site.sql_tools.enabled,
            audit_enabled,
            audit_path,
            audit_retention_days,
            drift_path: profile.drift,
            admin_enabled,
            admin_socket,
            debug: env_flag(env_vars::DEBUG).unwrap_or(false),
            disable_analytics: env_flag(env_vars::DISABLE_ANALYTICS).unwrap_or(false),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        })
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_flag(name: &str) -> Option<bool> {
    env_string(name).map(|v| matches!(v.as_str(), "1" | "true" | "yes" | "on"))
}

// ---------------------------------------------------------------------------
// Secret resolution
// ---------------------------------------------------------------------------

/// Resolves declared secret names to values. Called at startup and on
/// every reload; a resolution failure aborts the reload and keeps the
/// previous state.
pub trait ConfigProvider: Send + Sync {
    fn resolve_secrets(&self, names: &[String]) -> Result<Vec<Secret>>;
}

/// Environment-backed provider: `MXCP_SECRET_<NAME>` holds either a bare
/// value or a JSON object of key/value pairs; `MXCP_SECRET_<NAME>_TYPE`
/// optionally names the engine secret type.
pub struct EnvConfigProvider;

impl ConfigProvider for EnvConfigProvider {
    fn resolve_secrets(&self, names: &[String]) -> Result<Vec<Secret>> {
        names
            .iter()
            .map(|name| {
                let var = format!("{}{}", env_vars::SECRET_PREFIX, name.to_uppercase());
                let raw = std::env::var(&var)
                    .with_context(|| format!("secret '{}' not found in environment ({})", name, var))?;

                let values: BTreeMap<String, String> = match serde_json::from_str(&raw) {
                    Ok(map) => map,
                    Err(_) => [("value".to_string(), raw)].into(),
                };
                let kind = std::env::var(format!("{}_TYPE", var)).ok().filter(|v| !v.is_empty());

                Ok(Secret {
                    name: name.clone(),
                    kind,
                    values,
                })
            })
            .collect()
    }
}

/// Fixed-map provider for tests and embedding.
pub struct StaticSecrets(pub Vec<Secret>);

impl ConfigProvider for StaticSecrets {
    fn resolve_secrets(&self, names: &[String]) -> Result<Vec<Secret>> {
        names
            .iter()
            .map(|name| {
                self.0
                    .iter()
                    .find(|s| &s.name == name)
                    .cloned()
                    .with_context(|| format!("secret '{}' is not configured", name))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SITE: &str = r#"
mxcp: 1
project: payroll
profile: dev
secrets:
  - api
extensions:
  - json
profiles:
  dev:
    database: data/dev.duckdb
    audit:
      path: logs/audit.jsonl
      retention_days: 7
  prod:
    readonly: true
sql_tools:
  enabled: true
"#;

    #[test]
    fn test_load_and_resolve() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mxcp-site.yml");
        std::fs::write(&path, SITE).unwrap();

        let site = SiteConfig::load(&path).unwrap();
        assert_eq!(site.project, "payroll");
        assert_eq!(site.secrets, vec!["api"]);

        let config = ServerConfig::resolve(&site, &path).unwrap();
        assert_eq!(config.profile, "dev");
        assert_eq!(config.database, Some(PathBuf::from("data/dev.duckdb")));
        assert!(!config.readonly);
        assert!(config.audit_enabled);
        assert_eq!(config.audit_retention_days, 7);
        assert!(config.sql_tools_enabled);
        assert_eq!(config.repo_root, dir.path());
    }

    #[test]
    fn test_unknown_profile_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mxcp-site.yml");
        std::fs::write(
            &path,
            "mxcp: 1\nproject: p\nprofile: nonexistent\n",
        )
        .unwrap();

        let site = SiteConfig::load(&path).unwrap();
        let config = ServerConfig::resolve(&site, &path).unwrap();
        assert_eq!(config.database, None);
        assert!(!config.audit_enabled);
    }

    #[test]
    fn test_schema_version_checked() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mxcp-site.yml");
        std::fs::write(&path, "mxcp: 2\nproject: p\nprofile: dev\n").unwrap();
        assert!(SiteConfig::load(&path).is_err());
    }

    #[test]
    fn test_static_secrets_provider() {
        let provider = StaticSecrets(vec![Secret {
            name: "api".to_string(),
            kind: None,
            values: [("token".to_string(), "t".to_string())].into(),
        }]);

        let resolved = provider.resolve_secrets(&["api".to_string()]).unwrap();
        assert_eq!(resolved.len(), 1);

        let err = provider.resolve_secrets(&["missing".to_string()]);
        assert!(err.is_err());
    }
}
