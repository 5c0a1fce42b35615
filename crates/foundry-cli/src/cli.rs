use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for the foundry CLI
#[derive(Debug, Parser)]
#[command(name = "foundry")]
#[command(about = "Generate, build and validate npm packages from a spec", long_about = None)]
pub struct Cli {
    /// Config file to use instead of ~/.foundry/config.toml
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Write logs to <data_root>/foundry.log instead of stderr
    #[arg(long, global = true)]
    pub log_file: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Submit a package spec and wait for the job to finish
    Create(CreateArgs),

    /// Check a spec's name and print where its output would go
    Check {
        /// Package spec (JSON)
        #[arg(long, value_name = "FILE")]
        spec: PathBuf,
    },

    /// Manage the configuration file
    Config {
        /// What to do with the configuration
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Arguments for `foundry create`
#[derive(Debug, Args)]
pub struct CreateArgs {
    /// Package spec (JSON)
    #[arg(long, value_name = "FILE")]
    pub spec: PathBuf,

    /// Seed the workspace from the configured template
    #[arg(long)]
    pub template: bool,

    /// Report admission and exit without waiting; the job is cancelled on exit
    #[arg(long)]
    pub no_wait: bool,

    /// Print the final job record as JSON
    #[arg(long)]
    pub json: bool,
}

/// `foundry config` actions
#[derive(Debug, Clone, Copy, Subcommand)]
pub enum ConfigAction {
    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the configuration in effect
    Show,
}
