//! `orgscope rls` commands - row-level security DDL generation.

use std::path::Path;

use orgscope_core::tenant::RlsManager;

use crate::cli::{RlsArgs, RlsSubcommand, RlsTableArgs};
use crate::config::Config;
use crate::error::CliResult;
use crate::output::{self, success, warn};

/// Run the rls command
pub async fn run(args: RlsArgs, config_path: Option<&Path>) -> CliResult<()> {
    let config = Config::discover(config_path)?;

    let (table_args, kind) = match &args.command {
        RlsSubcommand::Setup(a) => (a, DdlKind::Setup),
        RlsSubcommand::Up(a) => (a, DdlKind::Up),
        RlsSubcommand::Down(a) => (a, DdlKind::Down),
    };

    if table_args.role.is_none() && config.rls.application_role.is_none() {
        warn("no --role given, policies apply to PUBLIC");
    }

    let sql = render(&config, table_args, kind)?;
    emit(&sql, table_args.output.as_deref()).await
}

/// Which script to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdlKind {
    /// Full setup script
    Setup,
    /// Per-table protect migrations
    Up,
    /// Per-table unprotect migrations
    Down,
}

/// Build the requested DDL.
pub fn render(config: &Config, args: &RlsTableArgs, kind: DdlKind) -> CliResult<String> {
    let rls = RlsManager::new(config.rls.merge(args)?);

    let sql = match kind {
        DdlKind::Setup => rls.setup_sql(),
        DdlKind::Up => rls
            .config()
            .protected_tables()
            .map(|t| rls.migration_up_sql(t))
            .collect::<Vec<_>>()
            .join("\n"),
        DdlKind::Down => rls
            .config()
            .protected_tables()
            .map(|t| rls.migration_down_sql(t))
            .collect::<Vec<_>>()
            .join("\n"),
    };
    Ok(sql)
}

async fn emit(sql: &str, path: Option<&Path>) -> CliResult<()> {
    match path {
        Some(path) => {
            tokio::fs::write(path, sql).await?;
            success(&format!("Wrote {}", path.display()));
        }
        None => output::raw(sql),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables(names: &[&str]) -> RlsTableArgs {
        RlsTableArgs {
            tables: names.iter().map(|s| s.to_string()).collect(),
            role: Some("app_user".into()),
            ..RlsTableArgs::default()
        }
    }

    #[test]
    fn test_setup_covers_every_table() {
        let sql = render(&Config::default(), &tables(&["units", "leases"]), DdlKind::Setup).unwrap();
        assert!(sql.contains("CREATE OR REPLACE FUNCTION"));
        assert!(sql.contains("ALTER TABLE units FORCE ROW LEVEL SECURITY"));
        assert!(sql.contains("ALTER TABLE leases FORCE ROW LEVEL SECURITY"));
    }

    #[test]
    fn test_excluded_table_is_skipped() {
        let mut args = tables(&["units", "countries"]);
        args.exclude = vec!["countries".into()];

        let sql = render(&Config::default(), &args, DdlKind::Up).unwrap();
        assert!(sql.contains("-- protect units"));
        assert!(!sql.contains("countries"));
    }

    #[test]
    fn test_down_disables() {
        let sql = render(&Config::default(), &tables(&["units"]), DdlKind::Down).unwrap();
        assert!(sql.contains("DISABLE ROW LEVEL SECURITY"));
        assert!(!sql.contains("CREATE POLICY"));
    }
}
