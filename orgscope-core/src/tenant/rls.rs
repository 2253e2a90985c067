//! PostgreSQL row-level security DDL.
//!
//! Every tenant-owned table gets a single `FOR ALL` policy that compares its
//! organization column with `current_org_id()`:
//!
//! ```sql
//! CREATE POLICY org_isolation_units ON units
//!     AS PERMISSIVE
//!     FOR ALL
//!     TO app_user
//!     USING (organization_id = current_org_id())
//!     WITH CHECK (organization_id = current_org_id());
//! ```
//!
//! `current_org_id()` reads the session variable and returns NULL when it is
//! unset, empty or not a UUID. A NULL comparison matches no row and accepts
//! no write, so an unbound connection sees nothing.
//!
//! # Example
//!
//! ```rust
//! use orgscope_core::tenant::{RlsConfig, RlsManager};
//!
//! let rls = RlsManager::new(
//!     RlsConfig::new("organization_id")
//!         .with_role("app_user")
//!         .add_tables(["units", "leases"]),
//! );
//! let ddl = rls.setup_sql();
//! assert!(ddl.contains("FORCE ROW LEVEL SECURITY"));
//! ```

use std::collections::BTreeSet;

use crate::session::ORG_SESSION_VARIABLE;

/// Default organization column.
pub const DEFAULT_TENANT_COLUMN: &str = "organization_id";

/// Default name of the fail-closed lookup function.
pub const DEFAULT_FUNCTION_NAME: &str = "current_org_id";

/// Configuration for the generated policies.
#[derive(Debug, Clone)]
pub struct RlsConfig {
    /// Organization column on every tenant-owned table.
    pub tenant_column: String,
    /// Role the policies apply to. `PUBLIC` when unset.
    pub application_role: Option<String>,
    /// Tables to protect.
    pub tables: BTreeSet<String>,
    /// Tables skipped even if listed (shared lookup tables).
    pub excluded_tables: BTreeSet<String>,
    /// Whether to create a `<role>_admin` role with `BYPASSRLS`.
    pub create_admin_role: bool,
    /// Policy name prefix.
    pub policy_prefix: String,
    /// Name of the lookup function.
    pub function_name: String,
}

impl Default for RlsConfig {
    fn default() -> Self {
        Self {
            tenant_column: DEFAULT_TENANT_COLUMN.to_string(),
            application_role: None,
            tables: BTreeSet::new(),
            excluded_tables: BTreeSet::new(),
            create_admin_role: false,
            policy_prefix: "org_isolation".to_string(),
            function_name: DEFAULT_FUNCTION_NAME.to_string(),
        }
    }
}

impl RlsConfig {
    /// Create a config for the given organization column.
    pub fn new(tenant_column: impl Into<String>) -> Self {
        Self {
            tenant_column: tenant_column.into(),
            ..Default::default()
        }
    }

    /// Set the application role.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.application_role = Some(role.into());
        self
    }

    /// Add a table.
    pub fn add_table(mut self, table: impl Into<String>) -> Self {
        self.tables.insert(table.into());
        self
    }

    /// Add several tables.
    pub fn add_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables.extend(tables.into_iter().map(Into::into));
        self
    }

    /// Exclude a table.
    pub fn exclude_table(mut self, table: impl Into<String>) -> Self {
        self.excluded_tables.insert(table.into());
        self
    }

    /// Also create a `BYPASSRLS` admin role for the privileged pool.
    pub fn with_admin_role(mut self) -> Self {
        self.create_admin_role = true;
        self
    }

    /// Set the policy prefix.
    pub fn with_policy_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.policy_prefix = prefix.into();
        self
    }

    /// Set the lookup function name.
    pub fn with_function_name(mut self, name: impl Into<String>) -> Self {
        self.function_name = name.into();
        self
    }

    /// Configured tables minus the excluded ones.
    pub fn protected_tables(&self) -> impl Iterator<Item = &String> {
        self.tables
            .iter()
            .filter(|t| !self.excluded_tables.contains(*t))
    }
}

/// Generates row-level security DDL.
#[derive(Debug, Clone)]
pub struct RlsManager {
    config: RlsConfig,
}

impl RlsManager {
    /// Create a manager.
    pub fn new(config: RlsConfig) -> Self {
        Self { config }
    }

    /// The configuration.
    pub fn config(&self) -> &RlsConfig {
        &self.config
    }

    fn policy_name(&self, table: &str) -> String {
        format!("{}_{}", self.config.policy_prefix, table)
    }

    fn role(&self) -> String {
        self.config
            .application_role
            .as_deref()
            .map_or_else(|| "PUBLIC".to_string(), quote_ident)
    }

    /// `ALTER TABLE ... ENABLE ROW LEVEL SECURITY`.
    pub fn enable_rls_sql(&self, table: &str) -> String {
        format!("ALTER TABLE {} ENABLE ROW LEVEL SECURITY;", quote_ident(table))
    }

    /// `ALTER TABLE ... FORCE ROW LEVEL SECURITY`, so the table owner is filtered too.
    pub fn force_rls_sql(&self, table: &str) -> String {
        format!("ALTER TABLE {} FORCE ROW LEVEL SECURITY;", quote_ident(table))
    }

    /// The fail-closed lookup function.
    pub fn current_org_function_sql(&self) -> String {
        format!(
            r#"CREATE OR REPLACE FUNCTION {function}() RETURNS uuid
    LANGUAGE plpgsql STABLE
AS $$
DECLARE
    raw text := current_setting('{variable}', true);
BEGIN
    IF raw IS NULL OR btrim(raw) = '' THEN
        RETURN NULL;
    END IF;
    RETURN btrim(raw)::uuid;
EXCEPTION WHEN invalid_text_representation THEN
    RETURN NULL;
END;
$$;"#,
            function = quote_ident(&self.config.function_name),
            variable = ORG_SESSION_VARIABLE,
        )
    }

    /// The isolation policy for one table.
    pub fn create_policy_sql(&self, table: &str) -> String {
        let predicate = format!(
            "{} = {}()",
            quote_ident(&self.config.tenant_column),
            quote_ident(&self.config.function_name)
        );
        RlsPolicy::new(self.policy_name(table), table)
            .command(PolicyCommand::All)
            .role(self.role())
            .using(predicate.clone())
            .with_check(predicate)
            .to_sql()
    }

    /// `DROP POLICY IF EXISTS` for one table.
    pub fn drop_policy_sql(&self, table: &str) -> String {
        format!(
            "DROP POLICY IF EXISTS {} ON {};",
            quote_ident(&self.policy_name(table)),
            quote_ident(table)
        )
    }

    fn admin_role_sql(&self) -> Option<String> {
        if !self.config.create_admin_role {
            return None;
        }
        let role = self.config.application_role.as_deref()?;
        Some(format!(
            "DO $$\nBEGIN\n    CREATE ROLE {} WITH BYPASSRLS;\nEXCEPTION WHEN duplicate_object THEN NULL;\nEND $$;\n",
            quote_ident(&format!("{role}_admin"))
        ))
    }

    /// Complete setup script for every configured table.
    pub fn setup_sql(&self) -> String {
        let mut sql = String::with_capacity(4096);
        sql.push_str("-- orgscope row-level security setup\n");
        sql.push_str(&format!("-- column: {}\n", self.config.tenant_column));
        sql.push_str(&format!("-- session variable: {ORG_SESSION_VARIABLE}\n\n"));

        if let Some(admin) = self.admin_role_sql() {
            sql.push_str(&admin);
            sql.push('\n');
        }

        sql.push_str(&self.current_org_function_sql());
        sql.push_str("\n\n");

        for table in self.config.protected_tables() {
            sql.push_str(&format!("-- table: {table}\n"));
            sql.push_str(&self.table_up(table));
            sql.push('\n');
        }

        sql
    }

    fn table_up(&self, table: &str) -> String {
        [
            self.enable_rls_sql(table),
            self.force_rls_sql(table),
            self.drop_policy_sql(table),
            self.create_policy_sql(table),
        ]
        .join("\n")
            + "\n"
    }

    /// Migration adding protection to one table.
    ///
    /// Includes the lookup function so the migration stands alone.
    pub fn migration_up_sql(&self, table: &str) -> String {
        format!(
            "-- protect {table}\n{}\n{}",
            self.current_org_function_sql(),
            self.table_up(table)
        )
    }

    /// Migration removing protection from one table.
    pub fn migration_down_sql(&self, table: &str) -> String {
        format!(
            "-- unprotect {table}\n{}\nALTER TABLE {} NO FORCE ROW LEVEL SECURITY;\nALTER TABLE {} DISABLE ROW LEVEL SECURITY;\n",
            self.drop_policy_sql(table),
            quote_ident(table),
            quote_ident(table)
        )
    }
}

/// Builder for [`RlsManager`].
#[derive(Debug, Default)]
pub struct RlsManagerBuilder {
    config: RlsConfig,
}

impl RlsManagerBuilder {
    /// Create a builder with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the organization column.
    pub fn tenant_column(mut self, column: impl Into<String>) -> Self {
        self.config.tenant_column = column.into();
        self
    }

    /// Set the application role.
    pub fn application_role(mut self, role: impl Into<String>) -> Self {
        self.config.application_role = Some(role.into());
        self
    }

    /// Add tables.
    pub fn tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.tables.extend(tables.into_iter().map(Into::into));
        self
    }

    /// Exclude tables.
    pub fn exclude<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config
            .excluded_tables
            .extend(tables.into_iter().map(Into::into));
        self
    }

    /// Create the admin role as well.
    pub fn admin_role(mut self, enabled: bool) -> Self {
        self.config.create_admin_role = enabled;
        self
    }

    /// Set the policy prefix.
    pub fn policy_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.policy_prefix = prefix.into();
        self
    }

    /// Build the manager.
    pub fn build(self) -> RlsManager {
        RlsManager::new(self.config)
    }
}

/// A single `CREATE POLICY` statement.
#[derive(Debug, Clone)]
pub struct RlsPolicy {
    /// Policy name.
    pub name: String,
    /// Table the policy applies to.
    pub table: String,
    /// Command the policy applies to.
    pub command: PolicyCommand,
    /// Role clause, already quoted. `PUBLIC` when unset.
    pub role: Option<String>,
    /// `USING` expression.
    pub using_expr: Option<String>,
    /// `WITH CHECK` expression.
    pub with_check_expr: Option<String>,
    /// Permissive or restrictive.
    pub permissive: bool,
}

/// SQL command a policy applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyCommand {
    /// Every command.
    All,
    /// `SELECT` only.
    Select,
    /// `INSERT` only.
    Insert,
    /// `UPDATE` only.
    Update,
    /// `DELETE` only.
    Delete,
}

impl PolicyCommand {
    /// SQL keyword.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "ALL",
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl RlsPolicy {
    /// Create a permissive `FOR ALL` policy with no clauses.
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            command: PolicyCommand::All,
            role: None,
            using_expr: None,
            with_check_expr: None,
            permissive: true,
        }
    }

    /// Set the command.
    pub fn command(mut self, cmd: PolicyCommand) -> Self {
        self.command = cmd;
        self
    }

    /// Set the role clause.
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Set the `USING` expression.
    pub fn using(mut self, expr: impl Into<String>) -> Self {
        self.using_expr = Some(expr.into());
        self
    }

    /// Set the `WITH CHECK` expression.
    pub fn with_check(mut self, expr: impl Into<String>) -> Self {
        self.with_check_expr = Some(expr.into());
        self
    }

    /// Make the policy restrictive.
    pub fn restrictive(mut self) -> Self {
        self.permissive = false;
        self
    }

    /// Render the statement.
    pub fn to_sql(&self) -> String {
        let kind = if self.permissive {
            "PERMISSIVE"
        } else {
            "RESTRICTIVE"
        };

        let mut sql = format!(
            "CREATE POLICY {} ON {}\n    AS {}\n    FOR {}\n    TO {}",
            quote_ident(&self.name),
            quote_ident(&self.table),
            kind,
            self.command.as_str(),
            self.role.as_deref().unwrap_or("PUBLIC"),
        );
        if let Some(using) = &self.using_expr {
            sql.push_str(&format!("\n    USING ({using})"));
        }
        if let Some(check) = &self.with_check_expr {
            sql.push_str(&format!("\n    WITH CHECK ({check})"));
        }
        sql.push(';');
        sql
    }
}

/// Quote a PostgreSQL identifier when it is not a plain lowercase name.
pub fn quote_ident(name: &str) -> String {
    let plain = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}
