use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::{Error, Result};

/// Immutable description of the package a job should produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSpec {
    /// Scoped artifact name, e.g. `acme/weather`.
    pub name: String,
    /// Human readable description of what the package does.
    pub description: String,
    /// Semantic version for the generated package.
    #[serde(default = "default_version")]
    pub version: String,
    /// Capabilities the package must expose.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Runtime dependencies keyed by package name with a version requirement.
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    /// Environment variables the package expects at runtime.
    #[serde(default)]
    pub environment: Vec<String>,
}

fn default_version() -> String {
    "0.1.0".to_owned()
}

impl PackageSpec {
    /// Create a spec with the given name and description and no extras.
    pub fn new<N: Into<String>, D: Into<String>>(name: N, description: D) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            version: default_version(),
            capabilities: Vec::new(),
            dependencies: BTreeMap::new(),
            environment: Vec::new(),
        }
    }

    /// Add a capability.
    #[must_use]
    pub fn with_capability<T: Into<String>>(mut self, capability: T) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    /// Add a dependency with a version requirement.
    #[must_use]
    pub fn with_dependency<N: Into<String>, V: Into<String>>(mut self, name: N, version: V) -> Self {
        self.dependencies.insert(name.into(), version.into());
        self
    }

    /// Declare a required environment variable.
    #[must_use]
    pub fn with_environment<T: Into<String>>(mut self, variable: T) -> Self {
        self.environment.push(variable.into());
        self
    }

    /// Load a spec from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a valid spec.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|error| {
            Error::Config(format!("Failed to read spec {}: {error}", path.display()))
        })?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Render the spec as a markdown-ish block for prompts.
    pub fn render(&self) -> String {
        let mut out = format!(
            "Name: {}\nVersion: {}\nDescription: {}\n",
            self.name, self.version, self.description
        );
        if !self.capabilities.is_empty() {
            out.push_str("Capabilities:\n");
            for capability in &self.capabilities {
                out.push_str("- ");
                out.push_str(capability);
                out.push('\n');
            }
        }
        if !self.dependencies.is_empty() {
            out.push_str("Dependencies:\n");
            for (name, version) in &self.dependencies {
                out.push_str(&format!("- {name}@{version}\n"));
            }
        }
        if !self.environment.is_empty() {
            out.push_str("Required environment variables:\n");
            for variable in &self.environment {
                out.push_str("- ");
                out.push_str(variable);
                out.push('\n');
            }
        }
        out
    }
}

/// A request to create a package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRequest {
    /// What to build.
    pub spec: PackageSpec,
    /// Whether the workspace should start from the configured template.
    #[serde(default)]
    pub use_template: bool,
}

impl CreateRequest {
    /// Create a request that uses the fallback scaffold.
    pub fn new(spec: PackageSpec) -> Self {
        Self {
            spec,
            use_template: false,
        }
    }

    /// Start from the configured template when one is available.
    #[must_use]
    pub fn with_template(mut self, use_template: bool) -> Self {
        self.use_template = use_template;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::write;
    use tempfile::TempDir;

    #[test]
    fn test_spec_defaults_from_json() {
        let spec: PackageSpec = match serde_json::from_str(
            r#"{"name":"acme/weather","description":"Weather lookups"}"#,
        ) {
            Ok(spec) => spec,
            Err(error) => panic!("failed to parse spec: {error}"),
        };
        assert_eq!(spec.version, "0.1.0");
        assert!(spec.capabilities.is_empty());
        assert!(spec.dependencies.is_empty());
    }

    #[test]
    fn test_render_lists_everything() {
        let spec = PackageSpec::new("acme/weather", "Weather lookups")
            .with_capability("forecast command")
            .with_dependency("zod", "^3.23.0")
            .with_environment("WEATHER_API_KEY");
        let rendered = spec.render();
        assert!(rendered.contains("Name: acme/weather"));
        assert!(rendered.contains("- forecast command"));
        assert!(rendered.contains("- zod@^3.23.0"));
        assert!(rendered.contains("- WEATHER_API_KEY"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap_or_else(|error| panic!("temp dir: {error}"));
        let path = dir.path().join("spec.json");
        if let Err(error) = write(
            &path,
            r#"{"name":"acme/notes","description":"Notes","dependencies":{"zod":"^3"}}"#,
        ) {
            panic!("write spec: {error}");
        }
        let spec = match PackageSpec::load_from_file(&path) {
            Ok(spec) => spec,
            Err(error) => panic!("load failed: {error}"),
        };
        assert_eq!(spec.name, "acme/notes");
        assert_eq!(spec.dependencies.get("zod").map(String::as_str), Some("^3"));
    }
}
