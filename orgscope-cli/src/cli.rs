//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// orgscope - organization-scoped row-level security for Postgres
#[derive(Parser, Debug)]
#[command(name = "orgscope")]
#[command(author = "Pegasus Heavy Industries LLC")]
#[command(version)]
#[command(
    about = "orgscope - organization-scoped row-level security for Postgres",
    long_about = None
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to an orgscope.toml file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate row-level security DDL
    Rls(RlsArgs),

    /// Prove tenant isolation against a live database
    Probe(ProbeArgs),

    /// Display version information
    Version,
}

// =============================================================================
// Rls Command
// =============================================================================

/// Arguments for the `rls` command
#[derive(Args, Debug)]
pub struct RlsArgs {
    /// Rls subcommand
    #[command(subcommand)]
    pub command: RlsSubcommand,
}

/// Rls subcommands
#[derive(Subcommand, Debug)]
pub enum RlsSubcommand {
    /// Full setup script: helper function, admin role and every table's policy
    Setup(RlsTableArgs),

    /// Per-table migration that enables and forces the policy
    Up(RlsTableArgs),

    /// Per-table migration that removes the policy
    Down(RlsTableArgs),
}

/// Table selection shared by the `rls` subcommands
#[derive(Args, Debug, Default)]
pub struct RlsTableArgs {
    /// Tenant-owned tables (repeat or comma-separate)
    #[arg(short, long = "table", value_delimiter = ',')]
    pub tables: Vec<String>,

    /// Tables to leave unprotected
    #[arg(long = "exclude", value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Role the policies apply to (defaults to PUBLIC)
    #[arg(short, long)]
    pub role: Option<String>,

    /// Column holding the owning organization id
    #[arg(long)]
    pub column: Option<String>,

    /// Policy name prefix
    #[arg(long)]
    pub policy_prefix: Option<String>,

    /// Also create a `<role>_admin` role with BYPASSRLS
    #[arg(long)]
    pub admin_role: bool,

    /// Write the DDL to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

// =============================================================================
// Probe Command
// =============================================================================

/// Arguments for the `probe` command
#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Connection URL for the application role
    #[arg(long, env = "DATABASE_URL")]
    pub url: Option<String>,

    /// Connection URL for a role allowed to create tables and bypass RLS
    #[arg(long, env = "ORGSCOPE_ADMIN_DATABASE_URL")]
    pub admin_url: Option<String>,

    /// Application role name (defaults to the user in --url)
    #[arg(short, long)]
    pub role: Option<String>,
}
