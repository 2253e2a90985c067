//! CLI configuration handling.

use serde::Deserialize;
use std::path::Path;

use orgscope_core::tenant::RlsConfig;
use orgscope_core::tenant::rls::DEFAULT_TENANT_COLUMN;

use crate::cli::RlsTableArgs;
use crate::error::{CliError, CliResult};

/// Default config file name (lives in project root)
pub const CONFIG_FILE_NAME: &str = "orgscope.toml";

/// orgscope CLI configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Policy generation settings
    pub rls: RlsSection,

    /// Live probe settings
    pub probe: ProbeSection,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load an explicit config file, or `orgscope.toml` from the current
    /// directory if it exists, or the defaults.
    pub fn discover(explicit: Option<&Path>) -> CliResult<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let default = std::env::current_dir()?.join(CONFIG_FILE_NAME);
        if default.exists() {
            Self::load(&default)
        } else {
            Ok(Self::default())
        }
    }
}

/// `[rls]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RlsSection {
    /// Column holding the owning organization id
    pub tenant_column: String,
    /// Role the policies apply to
    pub application_role: Option<String>,
    /// Tenant-owned tables
    pub tables: Vec<String>,
    /// Tables to leave unprotected
    pub exclude: Vec<String>,
    /// Create a BYPASSRLS admin role
    pub admin_role: bool,
    /// Policy name prefix
    pub policy_prefix: Option<String>,
}

impl Default for RlsSection {
    fn default() -> Self {
        Self {
            tenant_column: DEFAULT_TENANT_COLUMN.to_string(),
            application_role: None,
            tables: Vec::new(),
            exclude: Vec::new(),
            admin_role: false,
            policy_prefix: None,
        }
    }
}

/// `[probe]` section
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProbeSection {
    /// Application role name
    pub role: Option<String>,
}

impl RlsSection {
    /// Merge command-line flags over this section. Flags win; table lists add up.
    pub fn merge(&self, args: &RlsTableArgs) -> CliResult<RlsConfig> {
        let column = args.column.as_deref().unwrap_or(&self.tenant_column);
        let mut config = RlsConfig::new(column)
            .add_tables(self.tables.iter().chain(&args.tables).map(|t| t.trim()));

        for table in self.exclude.iter().chain(&args.exclude) {
            config = config.exclude_table(table.trim());
        }
        if let Some(role) = args.role.as_ref().or(self.application_role.as_ref()) {
            config = config.with_role(role.clone());
        }
        if let Some(prefix) = args.policy_prefix.as_ref().or(self.policy_prefix.as_ref()) {
            config = config.with_policy_prefix(prefix.clone());
        }
        if args.admin_role || self.admin_role {
            config = config.with_admin_role();
        }

        config.tables.retain(|t| !t.is_empty());
        if config.protected_tables().next().is_none() {
            return Err(CliError::Usage(
                "no tables given; pass --table or list them under [rls] in orgscope.toml".into(),
            ));
        }
        if config.create_admin_role && config.application_role.is_none() {
            return Err(CliError::Usage("--admin-role requires --role".into()));
        }
        Ok(config)
    }
}
