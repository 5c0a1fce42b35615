//! Hand-off of finished packages to the host.

use async_trait::async_trait;
use foundry_core::InstallerConfig;
use foundry_tooling::{ProcessHarness, ProcessSlot};
use std::path::Path;
use std::sync::Arc;

use crate::error::{OrchestratorError, Result};

/// Registers a completed package with whatever hosts it.
#[async_trait]
pub trait PluginInstaller: Send + Sync {
    /// Install the package at `output_path`.
    ///
    /// # Errors
    /// Returns an error if the package could not be registered.
    async fn install(&self, output_path: &Path) -> Result<()>;
}

/// Runs a configured host command with the output path appended.
pub struct CommandInstaller {
    program: String,
    args: Vec<String>,
    harness: Arc<ProcessHarness>,
}

impl CommandInstaller {
    /// Build an installer from config; `None` when no command is configured.
    pub fn from_config(config: &InstallerConfig, harness: Arc<ProcessHarness>) -> Option<Self> {
        let (program, args) = config.command.as_ref()?.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            harness,
        })
    }
}

#[async_trait]
impl PluginInstaller for CommandInstaller {
    async fn install(&self, output_path: &Path) -> Result<()> {
        let mut args = self.args.clone();
        args.push(output_path.display().to_string());
        let slot = ProcessSlot::new();
        let output = self
            .harness
            .run_program(output_path, &self.program, &args, "install plugin", &slot)
            .await;
        if output.success {
            Ok(())
        } else {
            Err(OrchestratorError::Install(format!(
                "{} exited with {}: {}",
                self.program,
                output
                    .exit_code
                    .map_or_else(|| "no status".to_owned(), |code| code.to_string()),
                output.tail(1024).trim()
            )))
        }
    }
}
