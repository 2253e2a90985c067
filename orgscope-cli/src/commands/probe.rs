//! `orgscope probe` command - live tenant isolation proofs.

use std::path::Path;

use crate::cli::ProbeArgs;
use crate::error::{CliError, CliResult};

/// Run the probe command
#[cfg(feature = "postgres")]
pub async fn run(args: ProbeArgs, config_path: Option<&Path>) -> CliResult<()> {
    use orgscope_core::ScopeConfig;
    use orgscope_postgres::{PgConfig, PgPool, PoolConfig, Probe};

    use crate::config::Config;
    use crate::output::{self, kv};

    let config = Config::discover(config_path)?;
    output::header("Isolation Probe");

    let app_config = match args.url {
        Some(url) => PgConfig::from_url(url)?,
        None => return Err(CliError::Usage("--url or DATABASE_URL is required".into())),
    };
    let admin_config = match args.admin_url {
        Some(url) => PgConfig::from_url(url)?,
        None => {
            return Err(CliError::Usage(
                "--admin-url or ORGSCOPE_ADMIN_DATABASE_URL is required".into(),
            ));
        }
    };
    let role = args
        .role
        .or(config.probe.role)
        .unwrap_or_else(|| app_config.user.clone());

    kv("Application", &app_config.redacted_url());
    kv("Admin", &admin_config.redacted_url());
    kv("Role", &role);
    output::newline();

    let scope = ScopeConfig::from_env()?;
    // One connection, so the reuse proof sees the same backend twice.
    let app_pool = PgPool::with_pool_config(
        app_config,
        PoolConfig {
            max_connections: 1,
            ..PoolConfig::from_scope(&scope)
        },
    )
    .await?
    .into_tenant_pool(&scope);
    let admin_pool = PgPool::with_pool_config(admin_config, PoolConfig::from_scope(&scope)).await?;

    let report = Probe::new(admin_pool, app_pool, role).run().await?;

    for outcome in &report.outcomes {
        let line = format!("{:<24} {}", outcome.name, outcome.detail);
        if outcome.passed {
            output::success(&line);
        } else {
            output::error(&line);
        }
    }
    output::newline();

    if report.all_passed() {
        output::success("Tenant isolation holds");
        Ok(())
    } else {
        let failed = report.outcomes.iter().filter(|o| !o.passed).count();
        Err(CliError::ProbeFailed(format!(
            "{failed} of {} proofs failed",
            report.outcomes.len()
        )))
    }
}

/// Run the probe command
#[cfg(not(feature = "postgres"))]
pub async fn run(_args: ProbeArgs, _config_path: Option<&Path>) -> CliResult<()> {
    Err(CliError::Config(
        "this build has no PostgreSQL support; rebuild with --features postgres".into(),
    ))
}
