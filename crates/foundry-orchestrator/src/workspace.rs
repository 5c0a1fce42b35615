//! Output directory preparation.
//!
//! A job's directory is seeded once, before the first generation, either by
//! copying a template project or by writing a minimal TypeScript scaffold.

use async_trait::async_trait;
use core::result::Result as CoreResult;
use foundry_core::PackageSpec;
use serde_json::{Map, Value, json};
use std::fmt;
use std::fs;
use std::io::{Error as IoError, ErrorKind};
use std::path::{Path, PathBuf};
use tokio::fs::remove_dir_all;
use tokio::task::spawn_blocking;
use walkdir::{DirEntry, WalkDir};

use crate::error::{OrchestratorError, Result};

/// Directories never copied out of a template.
pub const TEMPLATE_SKIP_DIRS: &[&str] = &["node_modules", ".git", "target", "dist"];

const SCAFFOLD_TSCONFIG: &str = r#"{
  "compilerOptions": {
    "target": "ES2022",
    "module": "NodeNext",
    "moduleResolution": "NodeNext",
    "rootDir": "src",
    "outDir": "dist",
    "declaration": true,
    "strict": true,
    "esModuleInterop": true,
    "skipLibCheck": true
  },
  "include": ["src"],
  "exclude": ["src/**/*.test.ts"]
}
"#;

const SCAFFOLD_ENTRY: &str = "export {};\n";

/// How a workspace was seeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceOrigin {
    /// Copied from the configured template.
    Template,
    /// Written from the built-in scaffold.
    Scaffold,
}

impl fmt::Display for WorkspaceOrigin {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Template => "template",
            Self::Scaffold => "scaffold",
        })
    }
}

/// Prepares a job's output directory before generation.
#[async_trait]
pub trait WorkspaceManager: Send + Sync {
    /// Seed `output_path` for `spec`.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created or populated.
    async fn prepare(
        &self,
        spec: &PackageSpec,
        output_path: &Path,
        use_template: bool,
    ) -> Result<WorkspaceOrigin>;
}

/// Template copier with a scaffold fallback.
#[derive(Debug, Clone, Default)]
pub struct TemplateWorkspace {
    template_dir: Option<PathBuf>,
}

impl TemplateWorkspace {
    /// Create a manager; without a template directory every job is scaffolded.
    pub fn new(template_dir: Option<PathBuf>) -> Self {
        Self { template_dir }
    }

    fn usable_template(&self, use_template: bool) -> Option<PathBuf> {
        if !use_template {
            return None;
        }
        match &self.template_dir {
            Some(dir) if dir.is_dir() => Some(dir.clone()),
            Some(dir) => {
                tracing::warn!(
                    template = %dir.display(),
                    "template directory missing, scaffolding instead"
                );
                None
            }
            None => {
                tracing::warn!("no template directory configured, scaffolding instead");
                None
            }
        }
    }
}

#[async_trait]
impl WorkspaceManager for TemplateWorkspace {
    async fn prepare(
        &self,
        spec: &PackageSpec,
        output_path: &Path,
        use_template: bool,
    ) -> Result<WorkspaceOrigin> {
        let template = self.usable_template(use_template);
        let spec = spec.clone();
        let output_path = output_path.to_path_buf();

        spawn_blocking(move || -> Result<WorkspaceOrigin> {
            fs::create_dir_all(&output_path)?;
            if let Some(template) = template {
                let copied = copy_template(&template, &output_path)?;
                merge_package_json(&output_path.join("package.json"), &spec)?;
                ensure_entry_point(&output_path)?;
                tracing::debug!(files = copied, "template copied");
                Ok(WorkspaceOrigin::Template)
            } else {
                write_scaffold(&output_path, &spec)?;
                Ok(WorkspaceOrigin::Scaffold)
            }
        })
        .await
        .map_err(|error| {
            OrchestratorError::Workspace(format!("preparation task failed: {error}"))
        })?
    }
}

fn is_skipped(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && TEMPLATE_SKIP_DIRS
            .iter()
            .any(|skipped| entry.file_name() == *skipped)
}

/// Copy `template` into `destination`, skipping dependency and build output.
///
/// # Errors
/// Returns an IO error if any entry cannot be read or written.
pub fn copy_template(template: &Path, destination: &Path) -> CoreResult<usize, IoError> {
    let mut copied = 0;
    for entry in WalkDir::new(template)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !is_skipped(entry))
    {
        let entry = entry.map_err(IoError::other)?;
        let Ok(relative) = entry.path().strip_prefix(template) else {
            continue;
        };
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

fn write_json(path: &Path, value: &Value) -> Result<()> {
    let mut text = serde_json::to_string_pretty(value).map_err(|error| {
        OrchestratorError::Workspace(format!("cannot encode {}: {error}", path.display()))
    })?;
    text.push('\n');
    fs::write(path, text)?;
    Ok(())
}

/// Write the spec's name, version, description and dependencies into `path`.
///
/// An absent file is created; existing dependencies the spec does not name
/// are kept.
///
/// # Errors
/// Returns an error if the file is not a JSON object or cannot be written.
pub fn merge_package_json(path: &Path, spec: &PackageSpec) -> Result<()> {
    let mut manifest = match fs::read_to_string(path) {
        Ok(text) => serde_json::from_str::<Value>(&text).map_err(|error| {
            OrchestratorError::Workspace(format!("template package.json is invalid: {error}"))
        })?,
        Err(error) if error.kind() == ErrorKind::NotFound => Value::Object(Map::new()),
        Err(error) => return Err(error.into()),
    };
    let Some(fields) = manifest.as_object_mut() else {
        return Err(OrchestratorError::Workspace(
            "template package.json is not an object".to_owned(),
        ));
    };

    fields.insert("name".to_owned(), Value::String(spec.name.clone()));
    fields.insert("version".to_owned(), Value::String(spec.version.clone()));
    fields.insert(
        "description".to_owned(),
        Value::String(spec.description.clone()),
    );
    let dependencies = fields
        .entry("dependencies")
        .or_insert_with(|| Value::Object(Map::new()));
    if !dependencies.is_object() {
        *dependencies = Value::Object(Map::new());
    }
    if let Some(dependencies) = dependencies.as_object_mut() {
        for (name, version) in &spec.dependencies {
            dependencies.insert(name.clone(), Value::String(version.clone()));
        }
    }

    write_json(path, &manifest)
}

fn ensure_entry_point(root: &Path) -> CoreResult<(), IoError> {
    let entry = root.join("src").join("index.ts");
    if entry.exists() {
        return Ok(());
    }
    fs::create_dir_all(root.join("src"))?;
    fs::write(entry, SCAFFOLD_ENTRY)
}

/// Write the built-in TypeScript scaffold.
///
/// # Errors
/// Returns an error if any scaffold file cannot be written.
pub fn write_scaffold(root: &Path, spec: &PackageSpec) -> Result<()> {
    let manifest = json!({
        "name": spec.name,
        "version": spec.version,
        "description": spec.description,
        "main": "dist/index.js",
        "types": "dist/index.d.ts",
        "scripts": {
            "build": "tsc",
            "lint": "tsc --noEmit",
            "test": "vitest run"
        },
        "dependencies": spec.dependencies,
        "devDependencies": {
            "@types/node": "^20.11.0",
            "typescript": "^5.4.0",
            "vitest": "^1.6.0"
        }
    });
    fs::create_dir_all(root)?;
    write_json(&root.join("package.json"), &manifest)?;
    fs::write(root.join("tsconfig.json"), SCAFFOLD_TSCONFIG)?;
    ensure_entry_point(root)?;
    Ok(())
}

/// Remove build output between iterations. Missing directories are fine.
///
/// # Errors
/// Returns the first removal failure other than not-found.
pub async fn clear_artifacts(root: &Path, dirs: &[PathBuf]) -> Result<usize> {
    let mut removed = 0;
    for dir in dirs {
        match remove_dir_all(root.join(dir)).await {
            Ok(()) => removed += 1,
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => return Err(error.into()),
        }
    }
    Ok(removed)
}
