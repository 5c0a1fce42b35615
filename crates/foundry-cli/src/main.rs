//! Foundry CLI - submit package specs to the job orchestrator
#![cfg_attr(
    test,
    allow(
        dead_code,
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::missing_errors_doc,
        clippy::print_stdout,
        clippy::print_stderr,
        reason = "Allow for tests"
    )
)]

use anyhow::Result;
use clap::Parser as _;
use cli::{Cli, Commands};

mod cli;
mod handlers;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Create(args) => handlers::handle_create(config_path, cli.log_file, &args).await,
        Commands::Check { spec } => handlers::handle_check(config_path, cli.log_file, &spec),
        Commands::Config { action } => handlers::handle_config(config_path, action),
    }
}
