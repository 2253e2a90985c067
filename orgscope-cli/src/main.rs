//! orgscope CLI entry point.

use clap::Parser;

use orgscope_cli::cli::{Cli, Command};
use orgscope_cli::commands;
use orgscope_cli::error::CliResult;
use orgscope_cli::output;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        output::newline();
        output::error(&e.to_string());
        std::process::exit(1);
    }
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();
    orgscope_core::logging::init();

    match cli.command {
        Command::Rls(args) => commands::rls::run(args, cli.config.as_deref()).await,
        Command::Probe(args) => commands::probe::run(args, cli.config.as_deref()).await,
        Command::Version => commands::version::run().await,
    }
}
