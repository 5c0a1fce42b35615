//! Scripted [`CommandRunner`] for driving the pipeline without real tools.

use async_trait::async_trait;
use foundry_core::IgnoreLock as _;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;

use crate::command::LogicalCommand;
use crate::harness::{CANCELLED_MARKER, CommandOutput, CommandRunner, ProcessSlot};

/// One call the runner received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// Directory the command ran in.
    pub working_dir: PathBuf,
    /// Command requested.
    pub command: LogicalCommand,
    /// Caller's description.
    pub description: String,
}

/// Returns queued outputs per command and records every call.
///
/// Each command has a queue of outputs; the last one repeats once the
/// queue is drained. Commands with no script succeed with empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    scripts: Mutex<HashMap<LogicalCommand, VecDeque<CommandOutput>>>,
    calls: Mutex<Vec<RecordedCall>>,
    delay: Option<Duration>,
}

impl ScriptedRunner {
    /// Runner where every command succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an output for `command`.
    #[must_use]
    pub fn with_output(self, command: LogicalCommand, output: CommandOutput) -> Self {
        self.scripts
            .lock_ignore_poison()
            .entry(command)
            .or_default()
            .push_back(output);
        self
    }

    /// Make every command take `delay`, honouring termination meanwhile.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock_ignore_poison().clone()
    }

    /// How many times `command` was run.
    pub fn call_count(&self, command: &LogicalCommand) -> usize {
        self.calls
            .lock_ignore_poison()
            .iter()
            .filter(|call| &call.command == command)
            .count()
    }

    fn next_output(&self, command: &LogicalCommand) -> CommandOutput {
        let mut scripts = self.scripts.lock_ignore_poison();
        match scripts.get_mut(command) {
            Some(queue) if queue.len() > 1 => queue
                .pop_front()
                .unwrap_or_else(|| CommandOutput::success("")),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| CommandOutput::success("")),
            None => CommandOutput::success(""),
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        working_dir: &Path,
        command: &LogicalCommand,
        description: &str,
        slot: &ProcessSlot,
    ) -> CommandOutput {
        self.calls.lock_ignore_poison().push(RecordedCall {
            working_dir: working_dir.to_path_buf(),
            command: command.clone(),
            description: description.to_owned(),
        });

        if let Some(delay) = self.delay {
            tokio::select! {
                () = sleep(delay) => {}
                () = slot.wait_terminated() => {
                    return CommandOutput::failure(143, CANCELLED_MARKER);
                }
            }
        }
        self.next_output(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_then_repeat_last() {
        let runner = ScriptedRunner::new()
            .with_output(LogicalCommand::Test, CommandOutput::failure(1, "first"))
            .with_output(LogicalCommand::Test, CommandOutput::success("second"));
        let slot = ProcessSlot::new();
        let dir = Path::new("/tmp");

        let outputs = [
            runner.run(dir, &LogicalCommand::Test, "test", &slot).await,
            runner.run(dir, &LogicalCommand::Test, "test", &slot).await,
            runner.run(dir, &LogicalCommand::Test, "test", &slot).await,
        ];
        assert_eq!(outputs[0].output, "first");
        assert_eq!(outputs[1].output, "second");
        assert_eq!(outputs[2].output, "second");
        assert_eq!(runner.call_count(&LogicalCommand::Test), 3);
        assert_eq!(runner.call_count(&LogicalCommand::Install), 0);
    }

    #[tokio::test]
    async fn test_unscripted_commands_succeed() {
        let runner = ScriptedRunner::new();
        let slot = ProcessSlot::new();
        let output = runner
            .run(Path::new("/tmp"), &LogicalCommand::script("lint"), "lint", &slot)
            .await;
        assert!(output.success);
        assert_eq!(runner.calls()[0].description, "lint");
    }

    #[tokio::test]
    async fn test_delay_honours_termination() {
        let runner = ScriptedRunner::new().with_delay(Duration::from_secs(60));
        let slot = ProcessSlot::new();
        slot.terminate();
        let output = runner
            .run(Path::new("/tmp"), &LogicalCommand::Install, "install", &slot)
            .await;
        assert!(!output.success);
    }
}
