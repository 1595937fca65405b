// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The executor: how the agent runs external binaries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use slog::{debug, error, Logger};

use crate::command::{Command, CommandOutput, INTERNAL_ERROR_EXIT_CODE};

/// The commonly-used "safe-to-reference" form of the executor.
pub type BoxedExecutor = Arc<dyn Executor>;

/// Runs [`Command`]s and returns their output.
///
/// In production this is a [`HostExecutor`]; under test, a [`FakeExecutor`].
/// A process that ran to completion is always `Ok`, whatever its exit status
/// -- probes routinely consume non-zero exits -- so `Err` is reserved for
/// commands that could not run at all.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        command: &Command,
    ) -> Result<CommandOutput, ExecutionError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("failed to start execution of [{command}]: {err}")]
    ExecutionStart {
        command: String,
        #[source]
        err: std::io::Error,
    },

    /// Raised by [`FakeExecutor`] when a command arrives that the test did
    /// not expect.
    #[error("unexpected command [{0}]")]
    UnexpectedCommand(String),
}

fn log_input(log: &Logger, id: u64, command: &Command) {
    debug!(log, "running command"; "id" => id, "command" => command.line());
    if !command.get_env().is_empty() {
        debug!(
            log,
            "running command";
            "id" => id,
            "envs" => format!("{:?}", command.get_env()),
        );
    }
}

fn log_output(log: &Logger, id: u64, output: &CommandOutput) {
    debug!(
        log,
        "finished command";
        "id" => id,
        "exit_code" => output.exit_code,
    );
    if !output.stdout.is_empty() {
        debug!(log, "finished command stdout"; "id" => id, "stdout" => &output.stdout);
    }
    if !output.stderr.is_empty() {
        debug!(log, "finished command stderr"; "id" => id, "stderr" => &output.stderr);
    }
}

/// Spawns real processes.
pub struct HostExecutor {
    log: Logger,
    counter: AtomicU64,
}

impl HostExecutor {
    pub fn new(log: Logger) -> Arc<Self> {
        Arc::new(Self { log, counter: AtomicU64::new(0) })
    }

    /// Perform some type coercion to access a commonly-used trait object.
    pub fn as_executor(self: Arc<Self>) -> BoxedExecutor {
        self
    }
}

#[async_trait]
impl Executor for HostExecutor {
    async fn execute(
        &self,
        command: &Command,
    ) -> Result<CommandOutput, ExecutionError> {
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        log_input(&self.log, id, command);

        let mut process = tokio::process::Command::new(command.program());
        process
            .args(command.get_args())
            .envs(
                command
                    .get_env()
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str())),
            )
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true);

        let output = process.output().await.map_err(|err| {
            error!(self.log, "could not start program"; "id" => id);
            ExecutionError::ExecutionStart { command: command.line(), err }
        })?;

        let output = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            // A missing code means the process died to a signal; no probe
            // distinguishes that from any other internal failure.
            exit_code: output
                .status
                .code()
                .unwrap_or(INTERNAL_ERROR_EXIT_CODE),
        };
        log_output(&self.log, id, &output);
        Ok(output)
    }
}

/// Handler invoked by [`FakeExecutor`] for each command.
pub type BoxedCommandFn =
    Box<dyn FnMut(&Command) -> Result<CommandOutput, ExecutionError> + Send>;

/// An executor which answers commands from a caller-supplied handler instead
/// of spawning processes.
pub struct FakeExecutor {
    log: Logger,
    counter: AtomicU64,
    handler: Mutex<BoxedCommandFn>,
}

impl FakeExecutor {
    pub fn new(log: Logger) -> Arc<FakeExecutor> {
        Arc::new(Self {
            log,
            counter: AtomicU64::new(0),
            handler: Mutex::new(Box::new(|command| {
                Err(ExecutionError::UnexpectedCommand(command.line()))
            })),
        })
    }

    /// Answer commands with an arbitrary function. This is the right shape
    /// when commands arrive in nondeterministic order, e.g. from parallel
    /// probes; for deterministic tests prefer [`CommandSequence`].
    pub fn set_handler(&self, f: BoxedCommandFn) {
        *self.handler.lock().unwrap() = f;
    }

    /// Perform some type coercion to access a commonly-used trait object.
    pub fn as_executor(self: Arc<Self>) -> BoxedExecutor {
        self
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn execute(
        &self,
        command: &Command,
    ) -> Result<CommandOutput, ExecutionError> {
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        log_input(&self.log, id, command);
        let result = self.handler.lock().unwrap()(command);
        if let Ok(output) = &result {
            log_output(&self.log, id, output);
        }
        result
    }
}

struct ExpectedCommand {
    line: String,
    output: CommandOutput,
}

/// An ordered expectation queue for [`FakeExecutor`], for tests whose
/// commands arrive deterministically.
///
/// Dropping a sequence with unmet expectations panics, so a test cannot
/// silently skip commands it claimed would run.
pub struct CommandSequence {
    expected: Vec<ExpectedCommand>,
    index: usize,
}

impl CommandSequence {
    pub fn new() -> Self {
        Self { expected: Vec::new(), index: 0 }
    }

    /// Expect `line` (the rendered command, see [`Command::line`]) and
    /// produce `output` for it.
    pub fn expect<S: Into<String>>(&mut self, line: S, output: CommandOutput) {
        self.expected.push(ExpectedCommand { line: line.into(), output });
    }

    /// A helper for [`Self::expect`] which succeeds with `stdout`.
    pub fn expect_ok<S: Into<String>, O: Into<String>>(
        &mut self,
        line: S,
        stdout: O,
    ) {
        self.expect(line, CommandOutput::success().set_stdout(stdout));
    }

    /// A helper for [`Self::expect`] which fails with an exit code and
    /// stderr.
    pub fn expect_fail<S: Into<String>, E: Into<String>>(
        &mut self,
        line: S,
        exit_code: i32,
        stderr: E,
    ) {
        self.expect(
            line,
            CommandOutput::failure(exit_code).set_stderr(stderr),
        );
    }

    /// Convenience function to register the sequence with a [`FakeExecutor`],
    /// transferring ownership of the queue.
    pub fn register(mut self, executor: &FakeExecutor) {
        executor.set_handler(Box::new(move |command| Ok(self.execute(command))));
    }

    fn execute(&mut self, command: &Command) -> CommandOutput {
        let observed = command.line();
        let Some(expected) = self.expected.get(self.index) else {
            panic!("unexpected command: {observed}");
        };
        self.index += 1;
        assert_eq!(observed, expected.line, "unexpected input command");
        expected.output.clone()
    }
}

impl Default for CommandSequence {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CommandSequence {
    fn drop(&mut self) {
        let expected = self.expected.len();
        let actual = self.index;
        if actual < expected {
            let next = &self.expected[actual].line;
            let errmsg = format!(
                "only saw {actual} calls, expected {expected}\n\
                 next would have been: {next}"
            );
            if !std::thread::panicking() {
                panic!("{errmsg}");
            } else {
                eprintln!("{errmsg}");
            }
        }
    }
}
