use foundry_core::{BuildTool, ToolingConfig};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::command::{LogicalCommand, ToolInvocation};

/// Picks the first installed build tool and maps logical commands onto it.
///
/// Detection runs once, on the first resolution, and is cached for the
/// lifetime of the resolver.
#[derive(Debug)]
pub struct ToolResolver {
    preference: Vec<BuildTool>,
    default_tool: BuildTool,
    search_path: Vec<PathBuf>,
    detected: OnceLock<Option<(BuildTool, PathBuf)>>,
}

impl ToolResolver {
    /// Create a resolver probing `search_path` in order.
    pub fn new(config: &ToolingConfig, search_path: Vec<PathBuf>) -> Self {
        Self {
            preference: config.preference.clone(),
            default_tool: config.default_tool,
            search_path,
            detected: OnceLock::new(),
        }
    }

    /// Directories probed for executables.
    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    /// The installed tool, if any candidate was found.
    pub fn detected_tool(&self) -> Option<BuildTool> {
        self.detect().map(|(tool, _)| *tool)
    }

    /// Tool that will actually be used: the detected one or the default.
    pub fn effective_tool(&self) -> BuildTool {
        self.detected_tool().unwrap_or(self.default_tool)
    }

    /// Map a logical command to a concrete invocation.
    ///
    /// Falls back to the default tool by bare name when nothing was found;
    /// the spawn then fails with a not-found message.
    pub fn resolve(&self, command: &LogicalCommand) -> ToolInvocation {
        let (tool, program) = match self.detect() {
            Some((tool, path)) => (*tool, path.display().to_string()),
            None => (self.default_tool, self.default_tool.program().to_owned()),
        };
        ToolInvocation {
            tool,
            program,
            args: command.arguments(tool),
        }
    }

    fn detect(&self) -> Option<&(BuildTool, PathBuf)> {
        self.detected.get_or_init(|| self.probe()).as_ref()
    }

    fn probe(&self) -> Option<(BuildTool, PathBuf)> {
        let found = self.preference.iter().find_map(|tool| {
            find_executable(&self.search_path, tool.program()).map(|path| (*tool, path))
        });
        match &found {
            Some((tool, path)) => {
                tracing::debug!(tool = %tool, path = %path.display(), "detected build tool");
            }
            None => tracing::warn!(
                default = %self.default_tool,
                "no preferred build tool found on search path"
            ),
        }
        found
    }
}

/// First executable file called `name` in `search_path`.
pub fn find_executable(search_path: &[PathBuf], name: &str) -> Option<PathBuf> {
    search_path
        .iter()
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt as _;
    path.metadata()
        .is_ok_and(|metadata| metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("cmd").is_file() || path.with_extension("exe").is_file()
}
