// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `stop-installation`: halt and remove the installer container.

use async_trait::async_trait;
use foundry_host_utils::{host_command, Command, CommandOutput};
use slog::{info, Logger};

use crate::actions::{no_args, Action};
use crate::dispatch::StepContext;

/// Name under which the installer runs on the host.
const INSTALLER_CONTAINER: &str = "foundry-installer";

pub struct StopInstallation;

impl StopInstallation {
    pub fn validate(args: &[String]) -> Result<Self, anyhow::Error> {
        no_args(args)?;
        Ok(Self)
    }
}

#[async_trait]
impl Action for StopInstallation {
    async fn run(
        &self,
        ctx: &StepContext,
        log: &Logger,
    ) -> Result<CommandOutput, anyhow::Error> {
        // `-i` keeps "not running" from being an error; a missing container
        // still fails, which the service wants to see verbatim.
        let stop = host_command(
            Command::new("podman")
                .args(["stop", "-i", "-t", "5"])
                .arg(INSTALLER_CONTAINER),
        );
        let output = ctx.executor.execute(&stop).await?;
        if !output.succeeded() {
            return Ok(output);
        }

        info!(log, "installer stopped, removing container");
        let rm = host_command(
            Command::new("podman")
                .args(["rm", "-f"])
                .arg(INSTALLER_CONTAINER),
        );
        Ok(ctx.executor.execute(&rm).await?)
    }
}
