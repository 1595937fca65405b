// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `ntp-synchronizer`: register an extra NTP server with chrony and report
//! the state of every source it tracks.

use std::sync::LazyLock;

use async_trait::async_trait;
use foundry_common::api::steps::{
    NtpSource, NtpSourceState, NtpSynchronizationRequest,
    NtpSynchronizationResponse,
};
use foundry_host_utils::{host_command, Command, CommandOutput};
use regex::Regex;
use slog::{warn, Logger};

use crate::actions::{require_host_or_ip, single_json_arg, Action};
use crate::dispatch::StepContext;

/// One row of `chronyc -n sources`: mode character, state character, then
/// the source address.
static SOURCE_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[\^=#]([*+?x~-]) +(\S+)").unwrap()
});

#[derive(Debug)]
pub struct NtpSynchronizer {
    ntp_source: Option<String>,
}

impl NtpSynchronizer {
    pub fn validate(args: &[String]) -> Result<Self, anyhow::Error> {
        let request: NtpSynchronizationRequest =
            single_json_arg(args, "NTP synchronization")?;
        let ntp_source = match request.ntp_source {
            Some(source) if !source.is_empty() => {
                require_host_or_ip(&source, "NTP source")?;
                Some(source)
            }
            _ => None,
        };
        Ok(Self { ntp_source })
    }
}

#[async_trait]
impl Action for NtpSynchronizer {
    async fn run(
        &self,
        ctx: &StepContext,
        log: &Logger,
    ) -> Result<CommandOutput, anyhow::Error> {
        if let Some(source) = &self.ntp_source {
            // Adding a server that chrony already tracks fails; that is not
            // worth failing the step over.
            let add = host_command(
                Command::new("chronyc")
                    .args(["add", "server"])
                    .arg(source)
                    .arg("iburst"),
            );
            let output = ctx.executor.execute(&add).await?;
            if !output.succeeded() {
                warn!(
                    log, "could not add NTP server";
                    "source" => source,
                    "stderr" => &output.stderr,
                );
            }
        }

        let sources = host_command(Command::new("chronyc").args(["-n", "sources"]));
        let output = ctx.executor.execute(&sources).await?;
        if !output.succeeded() {
            return Ok(output);
        }

        let response = parse_sources(&output.stdout);
        Ok(CommandOutput::success()
            .set_stdout(serde_json::to_string(&response)?))
    }
}

fn parse_sources(stdout: &str) -> NtpSynchronizationResponse {
    let mut ntp_sources = Vec::new();
    for row in SOURCE_ROW.captures_iter(stdout) {
        let state = match &row[1] {
            "*" => NtpSourceState::Synced,
            "+" => NtpSourceState::Combined,
            "-" => NtpSourceState::NotCombined,
            "x" => NtpSourceState::Error,
            "~" => NtpSourceState::Variable,
            _ => NtpSourceState::Unreachable,
        };
        ntp_sources.push(NtpSource {
            source_name: row[2].to_string(),
            source_state: state,
        });
    }
    NtpSynchronizationResponse { ntp_sources }
}
