//! Configuration types for the orchestrator, harness, tooling, provider and workspace.

use crate::error::{Error, Result};
use chrono::TimeDelta;
use dirs::{data_local_dir, home_dir};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable consulted when no API key is configured.
pub const ENV_ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";

/// Complete foundry configuration.
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FoundryConfig {
    /// Job admission and lifecycle limits
    pub orchestrator: OrchestratorConfig,
    /// Child process limits
    pub harness: HarnessConfig,
    /// Build tool selection
    pub tooling: ToolingConfig,
    /// Generation provider settings
    pub provider: ProviderConfig,
    /// Workspace preparation
    pub workspace: WorkspaceConfig,
    /// Plugin host installation
    pub installer: InstallerConfig,
}

/// Job admission and lifecycle limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Every job output directory lives under this root
    pub data_root: PathBuf,
    /// Iteration budget per job
    pub max_iterations: u32,
    /// Jobs tracked in memory at once, regardless of status
    pub max_tracked_jobs: usize,
    /// Admitted creations per rate window
    pub max_jobs_per_window: u32,
    /// Length of the rate window in seconds
    pub rate_window_seconds: u64,
    /// Absolute per-job timeout in seconds
    pub job_timeout_seconds: u64,
    /// How long finished jobs are kept before the sweep removes them
    pub retention_days: u64,
    /// Interval between retention sweeps in seconds
    pub sweep_interval_seconds: u64,
    /// Bytes of failure output kept per ledger entry
    pub error_detail_bytes: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            max_iterations: 5,
            max_tracked_jobs: 10,
            max_jobs_per_window: 10,
            rate_window_seconds: 60 * 60,
            job_timeout_seconds: 30 * 60,
            retention_days: 7,
            sweep_interval_seconds: 60 * 60,
            error_detail_bytes: 4096,
        }
    }
}

impl OrchestratorConfig {
    /// Rate window as a duration.
    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window_seconds)
    }

    /// Absolute job timeout as a duration.
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_seconds)
    }

    /// Retention window measured against `completed_at`.
    pub fn retention(&self) -> TimeDelta {
        i64::try_from(self.retention_days)
            .ok()
            .and_then(TimeDelta::try_days)
            .unwrap_or(TimeDelta::MAX)
    }

    /// Sweep period as a duration.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

fn default_data_root() -> PathBuf {
    data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("foundry")
        .join("packages")
}

/// Child process limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Hard wall-clock limit per command in seconds
    pub command_timeout_seconds: u64,
    /// Cap on combined stdout/stderr bytes kept per command
    pub max_output_bytes: usize,
    /// How long to wait for exit after the termination signal, in seconds
    pub termination_grace_seconds: u64,
    /// Directories searched before the standard locations
    pub extra_path: Vec<PathBuf>,
    /// Variables copied from the parent environment into every child
    pub passthrough_env: Vec<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            command_timeout_seconds: 5 * 60,
            max_output_bytes: 1024 * 1024,
            termination_grace_seconds: 10,
            extra_path: Vec::new(),
            passthrough_env: ["HOME", "USER", "LANG", "TMPDIR"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
        }
    }
}

impl HarnessConfig {
    /// Command timeout as a duration.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_seconds)
    }

    /// Grace period as a duration.
    pub fn termination_grace(&self) -> Duration {
        Duration::from_secs(self.termination_grace_seconds)
    }
}

/// Interchangeable package build tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildTool {
    /// `bun`
    Bun,
    /// `pnpm`
    Pnpm,
    /// `yarn`
    Yarn,
    /// `npm`
    Npm,
}

impl BuildTool {
    /// Executable name searched on the PATH.
    pub fn program(self) -> &'static str {
        match self {
            Self::Bun => "bun",
            Self::Pnpm => "pnpm",
            Self::Yarn => "yarn",
            Self::Npm => "npm",
        }
    }
}

impl fmt::Display for BuildTool {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.program())
    }
}

/// Build tool selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolingConfig {
    /// Candidates probed in order
    pub preference: Vec<BuildTool>,
    /// Tool used unchanged when no candidate is installed
    pub default_tool: BuildTool,
    /// Script run by the build phase
    pub build_script: String,
    /// Script run by the lint phase
    pub lint_script: String,
    /// Directories removed between iterations
    pub artifact_dirs: Vec<PathBuf>,
}

impl Default for ToolingConfig {
    fn default() -> Self {
        Self {
            preference: vec![BuildTool::Bun, BuildTool::Pnpm, BuildTool::Yarn, BuildTool::Npm],
            default_tool: BuildTool::Npm,
            build_script: "build".to_owned(),
            lint_script: "lint".to_owned(),
            artifact_dirs: vec![PathBuf::from("dist"), PathBuf::from("coverage")],
        }
    }
}

/// Generation provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Model identifier
    pub model: String,
    /// Token limit for generation requests
    pub max_tokens: u32,
    /// Token limit for validation requests
    pub validation_max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// API key; falls back to `ANTHROPIC_API_KEY`
    pub api_key: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_owned(),
            max_tokens: 8192,
            validation_max_tokens: 2048,
            temperature: 0.2,
            api_key: None,
        }
    }
}

/// Workspace preparation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Template copied into new workspaces when requested
    pub template_dir: Option<PathBuf>,
}

/// Plugin host installation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    /// Program and arguments; the output path is appended as the last argument
    pub command: Option<Vec<String>>,
}

impl FoundryConfig {
    /// Get the default config directory path (`~/.foundry`)
    ///
    /// # Errors
    /// Returns an error if the home directory cannot be determined
    pub fn config_dir() -> Result<PathBuf> {
        let home = home_dir()
            .ok_or_else(|| Error::Config("Could not determine home directory".to_owned()))?;
        Ok(home.join(".foundry"))
    }

    /// Get the default config file path (`~/.foundry/config.toml`)
    ///
    /// # Errors
    /// Returns an error if the home directory cannot be determined
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load config from the default location, creating it with defaults if missing
    ///
    /// # Errors
    /// Returns an error if the config cannot be read or created
    pub fn load_or_create() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            let config = Self::default();
            config.save_to_file(&config_path)?;
            tracing::info!(path = %config_path.display(), "wrote default configuration");
            Ok(config)
        }
    }

    /// Load config from a specific file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|error| Error::Config(format!("Failed to read config: {error}")))?;
        Ok(toml::from_str(&contents)?)
    }

    /// Save config to a specific file
    ///
    /// # Errors
    /// Returns an error if the file cannot be written
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|error| Error::Config(format!("Failed to serialize config: {error}")))?;

        let header = "# Foundry Configuration File\n\
                      # This file is automatically generated on first run\n\
                      # Edit this file to customize your settings\n\n";

        fs::write(path, format!("{header}{contents}"))?;
        Ok(())
    }

    /// Provider API key, checking config first, then the environment
    pub fn api_key(&self) -> Option<String> {
        self.provider
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .or_else(|| env::var(ENV_ANTHROPIC_API_KEY).ok())
            .filter(|key| !key.is_empty())
    }
}
