use foundry_core::BuildTool;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tool-independent command the pipeline asks for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalCommand {
    /// Install the package's dependencies.
    Install,
    /// Run a named script from `package.json`.
    RunScript(String),
    /// Run the package's test script.
    Test,
}

impl LogicalCommand {
    /// Shorthand for [`LogicalCommand::RunScript`].
    pub fn script<S: Into<String>>(name: S) -> Self {
        Self::RunScript(name.into())
    }

    /// Argument list this command takes for the given tool.
    pub fn arguments(&self, tool: BuildTool) -> Vec<String> {
        match (self, tool) {
            (Self::Install, _) => vec!["install".to_owned()],
            (Self::RunScript(name), _) => vec!["run".to_owned(), name.clone()],
            // `bun test` is bun's own runner, not the package script
            (Self::Test, BuildTool::Bun) => vec!["run".to_owned(), "test".to_owned()],
            (Self::Test, _) => vec!["test".to_owned()],
        }
    }
}

impl fmt::Display for LogicalCommand {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Install => formatter.write_str("install"),
            Self::RunScript(name) => write!(formatter, "run {name}"),
            Self::Test => formatter.write_str("test"),
        }
    }
}

/// Concrete program and arguments for a logical command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    /// Tool the invocation was resolved for.
    pub tool: BuildTool,
    /// Program to execute, absolute when the tool was found on the search path.
    pub program: String,
    /// Explicit argument list; never passed through a shell.
    pub args: Vec<String>,
}

impl fmt::Display for ToolInvocation {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{} {}", self.tool, self.args.join(" "))
    }
}
