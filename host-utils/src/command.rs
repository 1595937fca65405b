// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Command descriptions accepted by [`crate::Executor`], and helpers for
//! assembling the host-namespace and time-bounded variants the agent uses.

use std::fmt;

/// Exit code `timeout(1)` reports when it kills the wrapped command.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code recorded when a process could not be run at all or died to a
/// signal.
pub const INTERNAL_ERROR_EXIT_CODE: i32 = -1;

/// A command to run, described as plain data so fakes can introspect it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl Command {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self { program: program.into(), args: Vec::new(), env: Vec::new() }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_env(&self) -> &[(String, String)] {
        &self.env
    }

    /// Render the command the way it is logged and matched by fakes:
    /// program and arguments joined by single spaces, verbatim.
    pub fn line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line())
    }
}

/// What an executed command produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    /// An empty, successful output.
    pub fn success() -> Self {
        Self { stdout: String::new(), stderr: String::new(), exit_code: 0 }
    }

    /// An empty output with the given exit code.
    pub fn failure(exit_code: i32) -> Self {
        Self { stdout: String::new(), stderr: String::new(), exit_code }
    }

    pub fn set_stdout<S: Into<String>>(mut self, stdout: S) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn set_stderr<S: Into<String>>(mut self, stderr: S) -> Self {
        self.stderr = stderr.into();
        self
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    pub fn timed_out(&self) -> bool {
        self.exit_code == TIMEOUT_EXIT_CODE
    }
}

/// Wrap `command` so it runs in the host's mount/ipc/net namespaces instead
/// of the agent's container.
pub fn host_command(command: Command) -> Command {
    Command::new("nsenter")
        .args(["-t", "1", "-m", "-i", "-n", "--"])
        .arg(command.program)
        .args(command.args)
        .carry_env(command.env)
}

/// Bound `command`'s runtime with `timeout(1)`. When the budget elapses the
/// process group is killed and the exit code is [`TIMEOUT_EXIT_CODE`].
pub fn timed(seconds: u64, command: Command) -> Command {
    Command::new("timeout")
        .arg(seconds.to_string())
        .arg(command.program)
        .args(command.args)
        .carry_env(command.env)
}

impl Command {
    fn carry_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env.extend(env);
        self
    }
}

/// Quote `s` for safe interpolation into a POSIX shell word.
///
/// Empty strings become `''`, strings made only of unambiguous characters
/// pass through, and everything else is single-quoted with embedded single
/// quotes rewritten to `'\''`. Validation of step arguments happens before
/// quoting; this helper is the second line of defense, not the first.
pub fn quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.chars().all(is_shell_safe) {
        return s.to_string();
    }
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('\'');
    for c in s.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(c, '_' | '@' | '%' | '+' | '=' | ':' | ',' | '.' | '/' | '-')
}

/// Quote every word and join with spaces, yielding a string safe to embed in
/// an `sh -c` argument.
pub fn join_quoted<I, S>(words: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    words
        .into_iter()
        .map(|word| quote(word.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}
