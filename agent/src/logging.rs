// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Log drain assembly.
//!
//! The command line selects up to three sinks: a plain-text file, the
//! systemd journal, and stdout. Only the stdout sink honors `RUST_LOG`
//! filtering; the file and journal keep everything so post-mortem debugging
//! of a host does not depend on how the agent was launched.

use anyhow::Context;
use foundry_common::FileKv;
use slog::{Drain, Logger};

use crate::config::Config;

const TEXT_LOG_PATH: &str = "/var/log/foundry-agent.log";

type BoxedDrain = Box<dyn Drain<Ok = (), Err = slog::Never> + Send>;

pub fn setup_log(config: &Config) -> Result<Logger, anyhow::Error> {
    let mut drains: Vec<BoxedDrain> = Vec::new();

    if config.with_text_logging {
        // Append: agent restarts must not wipe the history of earlier runs.
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(TEXT_LOG_PATH)
            .with_context(|| format!("error opening log file {TEXT_LOG_PATH}"))?;
        let decorator = slog_term::PlainDecorator::new(file);
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        drains.push(Box::new(drain));
    }

    if config.with_journal_logging {
        // The journal socket may be absent (containers); drop records
        // rather than taking the agent down.
        drains.push(Box::new(slog_journald::JournaldDrain.ignore_res()));
    }

    if config.with_stdout_logging {
        drains.push(Box::new(stdout_env_drain("RUST_LOG")));
    }

    let drain = match drains.into_iter().reduce(|a, b| {
        Box::new(slog::Duplicate::new(a, b).ignore_res()) as BoxedDrain
    }) {
        Some(drain) => drain,
        None => Box::new(slog::Discard),
    };
    let drain = slog_async::Async::new(drain).build().fuse();
    Ok(Logger::root(drain, slog::o!(FileKv)))
}

fn stdout_env_drain(env_var: &str) -> impl Drain<Ok = (), Err = slog::Never> {
    let decorator = slog_term::TermDecorator::new().stdout().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let mut builder = slog_envlogger::LogBuilder::new(drain);
    if let Ok(s) = std::env::var(env_var) {
        builder = builder.parse(&s);
    } else {
        // Log at the info level by default.
        builder = builder.filter(None, slog::FilterLevel::Info);
    }
    builder.build()
}
