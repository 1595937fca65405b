// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common code for error handling in command-line binaries.

use std::process::exit;

/// Exit code when a binary is invoked with bad arguments. -1 reads back as
/// 255 from the wait status, distinct from any runtime failure code.
pub const EXIT_USAGE: i32 = -1;

/// Exit code for unexpected runtime failures.
pub const EXIT_FAILURE: i32 = 1;

/// Represents a failure from a command-line program.
#[derive(Debug)]
pub enum CmdError {
    /// Incorrect command-line arguments.
    Usage(String),
    /// All other errors.
    Failure(anyhow::Error),
}

/// Print a message and exit appropriately for the kind of error.
pub fn fatal(cmd_error: CmdError) -> ! {
    let arg0_owned = std::env::args().next();
    let arg0 = arg0_owned.as_deref().unwrap_or("command");
    let (exit_code, message) = match cmd_error {
        CmdError::Usage(m) => (EXIT_USAGE, m),
        CmdError::Failure(e) => (EXIT_FAILURE, format!("{e:#}")),
    };
    eprintln!("{arg0}: {message}");
    exit(exit_code);
}
