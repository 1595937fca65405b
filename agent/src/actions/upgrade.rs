// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `upgrade-agent`: pull the next agent image so the step runner can swap
//! to it on the following start.
//!
//! Only the pull happens here. The runner script on the host notices the
//! freshly-tagged image and restarts the agent from it; replacing our own
//! running container from inside is not survivable.

use async_trait::async_trait;
use foundry_common::api::steps::{
    UpgradeAgentRequest, UpgradeAgentResponse, UpgradeAgentResult,
};
use foundry_host_utils::{host_command, timed, Command, CommandOutput};
use slog::{info, warn, Logger};

use crate::actions::{
    annotate_timeout, require_image_reference, single_json_arg, Action,
};
use crate::dispatch::StepContext;

const PULL_TIMEOUT_SECONDS: u64 = 300;

pub struct UpgradeAgent {
    request: UpgradeAgentRequest,
}

impl UpgradeAgent {
    pub fn validate(args: &[String]) -> Result<Self, anyhow::Error> {
        let request: UpgradeAgentRequest =
            single_json_arg(args, "agent upgrade")?;
        require_image_reference(&request.agent_image)?;
        Ok(Self { request })
    }
}

#[async_trait]
impl Action for UpgradeAgent {
    async fn run(
        &self,
        ctx: &StepContext,
        log: &Logger,
    ) -> Result<CommandOutput, anyhow::Error> {
        let Ok(_permit) = ctx.singletons.upgrade.try_acquire() else {
            info!(log, "upgrade already in progress, skipping");
            return Ok(CommandOutput::success());
        };

        let image = &self.request.agent_image;
        let pull = timed(
            PULL_TIMEOUT_SECONDS,
            host_command(Command::new("podman").arg("pull").arg(image)),
        );
        let output = annotate_timeout(
            ctx.executor.execute(&pull).await?,
            PULL_TIMEOUT_SECONDS,
        );

        let result = if output.succeeded() {
            info!(log, "upgrade image pulled"; "image" => image.as_str());
            UpgradeAgentResult::Success
        } else {
            warn!(
                log, "upgrade image pull failed";
                "image" => image.as_str(),
                "exit_code" => output.exit_code,
                "stderr" => &output.stderr,
            );
            UpgradeAgentResult::Failure
        };
        let response = UpgradeAgentResponse {
            agent_image: image.clone(),
            result,
        };
        Ok(CommandOutput::success()
            .set_stdout(serde_json::to_string(&response)?)
            .set_stderr(output.stderr))
    }
}
