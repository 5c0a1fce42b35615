//! Command handlers for CLI operations

use anyhow::{Context as _, Result, bail};
use foundry_core::{CreateRequest, FoundryConfig, Job, JobStatus, PackageSpec};
use foundry_orchestrator::Orchestrator;
use foundry_orchestrator::governor::{resolve_output_path, validate_name};
use foundry_providers::AnthropicProvider;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write as _};
use std::path::{Path, absolute};
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{
    EnvFilter, Registry, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _,
};

use crate::cli::{ConfigAction, CreateArgs};

const DEFAULT_LOG_FILTER: &str =
    "foundry=info,foundry_orchestrator=info,foundry_tooling=info,foundry_providers=info";

/// Load the config from `path`, or from `~/.foundry/config.toml` when none is given.
fn load_config(path: Option<&Path>) -> Result<FoundryConfig> {
    match path {
        Some(file) => FoundryConfig::load_from_file(file)
            .with_context(|| format!("could not load config from {}", file.display())),
        None => FoundryConfig::load_or_create().context("could not load ~/.foundry/config.toml"),
    }
}

fn open_log_file(config: &FoundryConfig) -> Result<File> {
    let root = &config.orchestrator.data_root;
    fs::create_dir_all(root).with_context(|| format!("could not create {}", root.display()))?;
    Ok(OpenOptions::new()
        .create(true)
        .append(true)
        .open(root.join("foundry.log"))?)
}

/// Install the tracing subscriber, writing to stderr or to `<data_root>/foundry.log`.
fn init_logging(config: &FoundryConfig, log_file: bool) -> Result<()> {
    let file_layer = log_file
        .then(|| open_log_file(config))
        .transpose()?
        .map(|file| {
            fmt::layer()
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .with_target(true)
                .with_level(true)
        });
    let stderr_layer =
        (!log_file).then(|| fmt::layer().with_writer(io::stderr).with_target(false));

    Registry::default()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
        .with(file_layer)
        .with(stderr_layer)
        .try_init()?;
    Ok(())
}

fn write_report(job: &Job) -> Result<()> {
    let mut out = io::stdout().lock();
    writeln!(out, "Job {} {}", job.id, job.status)?;
    writeln!(out, "Package: {}", job.spec.name)?;
    writeln!(out, "Output: {}", job.output_path.display())?;
    writeln!(
        out,
        "Iterations: {}/{}",
        job.current_iteration, job.max_iterations
    )?;
    if let Some(results) = job.test_results {
        writeln!(
            out,
            "Tests: {} passed, {} failed, {} skipped",
            results.passed, results.failed, results.skipped
        )?;
    }
    if let Some(score) = job.validation_score {
        writeln!(out, "Validation score: {score:.0}")?;
    }
    for failure in &job.errors {
        let summary = failure.error.lines().next().unwrap_or_default();
        writeln!(
            out,
            "  iteration {} {}: {summary}",
            failure.iteration, failure.phase
        )?;
    }
    if let Some(result) = &job.result {
        writeln!(out, "{result}")?;
    }
    if let Some(error) = &job.error {
        writeln!(out, "Error: {error}")?;
    }
    Ok(())
}

fn write_json(job: &Job) -> Result<()> {
    let mut out = io::stdout().lock();
    writeln!(out, "{}", serde_json::to_string_pretty(job)?)?;
    Ok(())
}

/// Handle `foundry create`
///
/// # Errors
/// Returns an error if the spec is rejected or the job does not complete
pub async fn handle_create(
    config_path: Option<&Path>,
    log_file: bool,
    args: &CreateArgs,
) -> Result<()> {
    let config = load_config(config_path)?;
    init_logging(&config, log_file)?;

    let spec = PackageSpec::load_from_file(&args.spec)
        .with_context(|| format!("could not load spec from {}", args.spec.display()))?;

    let mut builder = Orchestrator::builder(config.clone());
    match config.api_key() {
        Some(key) => {
            builder = builder.with_provider(Arc::new(AnthropicProvider::new(key)?));
        }
        None => tracing::warn!("no API key configured; generation will fail"),
    }
    let orchestrator = builder.with_retention_sweeper().build()?;

    let id = orchestrator.create(CreateRequest::new(spec).with_template(args.template))?;
    tracing::info!(job_id = %id, "job admitted");

    if args.no_wait {
        // Jobs live in this process, so leaving now stops the job.
        orchestrator.shutdown();
        let Some(job) = orchestrator.get(id) else {
            bail!("job {id} disappeared after admission");
        };
        return if args.json { write_json(&job) } else { write_report(&job) };
    }

    let job = tokio::select! {
        finished = orchestrator.wait(id) => finished?,
        interrupted = signal::ctrl_c() => {
            interrupted.context("could not listen for Ctrl-C")?;
            tracing::warn!(job_id = %id, "interrupted; cancelling outstanding jobs");
            orchestrator.shutdown();
            orchestrator.wait(id).await?
        }
    };
    orchestrator.shutdown();

    if args.json {
        write_json(&job)?;
    } else {
        write_report(&job)?;
    }

    if job.status != JobStatus::Completed {
        bail!("job {id} finished as {}", job.status);
    }
    Ok(())
}

/// Handle `foundry check`
///
/// # Errors
/// Returns an error if the spec cannot be loaded or its name is rejected
pub fn handle_check(config_path: Option<&Path>, log_file: bool, spec_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    init_logging(&config, log_file)?;

    let spec = PackageSpec::load_from_file(spec_path)
        .with_context(|| format!("could not load spec from {}", spec_path.display()))?;
    validate_name(&spec.name)?;
    let data_root = absolute(&config.orchestrator.data_root)?;
    let output_path = resolve_output_path(&data_root, &spec.name)?;

    let mut out = io::stdout().lock();
    writeln!(
        out,
        "{} is valid; output would be written to {}",
        spec.name,
        output_path.display()
    )?;
    Ok(())
}

/// Handle `foundry config`
///
/// # Errors
/// Returns an error if the config cannot be read or written
pub fn handle_config(config_path: Option<&Path>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path.to_path_buf(),
                None => FoundryConfig::config_path()?,
            };
            if path.exists() && !force {
                bail!(
                    "{} already exists; pass --force to overwrite it",
                    path.display()
                );
            }
            FoundryConfig::default().save_to_file(&path)?;
            let mut out = io::stdout().lock();
            writeln!(out, "Wrote default configuration to {}", path.display())?;
        }
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            let mut out = io::stdout().lock();
            write!(out, "{}", toml::to_string_pretty(&config)?)?;
        }
    }
    Ok(())
}
