//! Runtime configuration for tenant scoping.
//!
//! Configuration can be deserialized (e.g. from a `[scope]` table in TOML),
//! built with the builder-style setters, or read from the environment:
//!
//! - `ORGSCOPE_ACQUIRE_TIMEOUT_MS` - bounded wait for a pool connection
//! - `ORGSCOPE_VERIFY_RESIDUAL` - check leased connections for leftover session state
//! - `ORGSCOPE_ALLOW_HEADER_ONLY` - accept unauthenticated header assertions
//! - `ORGSCOPE_ALLOWED_ORGS` - comma-separated allow-list for header-only requests
//! - `ORGSCOPE_ORG_HEADER` - name of the organization header

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ScopeError, ScopeResult};
use crate::tenant::OrgId;

/// Default header carrying the candidate organization id.
pub const DEFAULT_ORG_HEADER: &str = "x-org-id";

/// Default bounded wait for a pooled connection.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Source for environment variables.
pub trait EnvSource: Send + Sync {
    /// Get an environment variable value.
    fn get(&self, name: &str) -> Option<String>;
}

/// Default environment source using std::env.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdEnvSource;

impl EnvSource for StdEnvSource {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Environment source backed by a HashMap.
#[derive(Debug, Clone, Default)]
pub struct MapEnvSource {
    vars: HashMap<String, String>,
}

impl MapEnvSource {
    /// Create a new map-based environment source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }
}

impl EnvSource for MapEnvSource {
    fn get(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

/// Tenant scoping configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    /// Maximum wait for a pooled connection, in milliseconds.
    pub acquire_timeout_ms: u64,
    /// Read back the session variable on every fresh lease and refuse
    /// connections that still carry a value.
    pub verify_residual: bool,
    /// Accept requests that assert an organization by header alone.
    /// Only organizations in `allowed_orgs` are accepted in that mode.
    pub allow_header_only: bool,
    /// Allow-list for header-only requests.
    pub allowed_orgs: Vec<OrgId>,
    /// Name of the organization header.
    pub org_header: String,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT.as_millis() as u64,
            verify_residual: true,
            allow_header_only: false,
            allowed_orgs: Vec::new(),
            org_header: DEFAULT_ORG_HEADER.to_string(),
        }
    }
}

impl ScopeConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the process environment.
    pub fn from_env() -> ScopeResult<Self> {
        Self::from_env_source(&StdEnvSource)
    }

    /// Load configuration from an arbitrary environment source.
    pub fn from_env_source(env: &dyn EnvSource) -> ScopeResult<Self> {
        let mut config = Self::default();

        if let Some(ms) = env.get("ORGSCOPE_ACQUIRE_TIMEOUT_MS") {
            config.acquire_timeout_ms = ms
                .trim()
                .parse()
                .map_err(|_| ScopeError::config("invalid ORGSCOPE_ACQUIRE_TIMEOUT_MS"))?;
        }
        if let Some(v) = env.get("ORGSCOPE_VERIFY_RESIDUAL") {
            config.verify_residual = parse_bool("ORGSCOPE_VERIFY_RESIDUAL", &v)?;
        }
        if let Some(v) = env.get("ORGSCOPE_ALLOW_HEADER_ONLY") {
            config.allow_header_only = parse_bool("ORGSCOPE_ALLOW_HEADER_ONLY", &v)?;
        }
        if let Some(list) = env.get("ORGSCOPE_ALLOWED_ORGS") {
            config.allowed_orgs = list
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(OrgId::parse)
                .collect::<ScopeResult<Vec<_>>>()
                .map_err(|e| ScopeError::config(format!("invalid ORGSCOPE_ALLOWED_ORGS: {e}")))?;
        }
        if let Some(header) = env.get("ORGSCOPE_ORG_HEADER") {
            config.org_header = header.trim().to_ascii_lowercase();
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values that cannot work.
    pub fn validate(&self) -> ScopeResult<()> {
        if self.acquire_timeout_ms == 0 {
            return Err(ScopeError::config("acquire timeout must be greater than zero"));
        }
        if self.org_header.is_empty() {
            return Err(ScopeError::config("organization header name is empty"));
        }
        if self.allow_header_only && self.allowed_orgs.is_empty() {
            return Err(ScopeError::config(
                "header-only resolution requires a non-empty allow-list",
            ));
        }
        Ok(())
    }

    /// Set the acquire timeout.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Enable or disable residual-state verification.
    pub fn with_verify_residual(mut self, verify: bool) -> Self {
        self.verify_residual = verify;
        self
    }

    /// Accept header-only requests for the given organizations.
    pub fn with_header_only<I>(mut self, orgs: I) -> Self
    where
        I: IntoIterator<Item = OrgId>,
    {
        self.allow_header_only = true;
        self.allowed_orgs.extend(orgs);
        self
    }

    /// Set the organization header name.
    pub fn with_org_header(mut self, header: impl Into<String>) -> Self {
        self.org_header = header.into();
        self
    }

    /// The acquire timeout as a duration.
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

fn parse_bool(name: &str, value: &str) -> ScopeResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ScopeError::config(format!("invalid boolean for {name}"))),
    }
}
