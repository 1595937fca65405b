// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The Foundry discovery agent.
//!
//! The agent lives on a host being considered for installation. It
//! registers with the Foundry service, then polls for instructions --
//! hardware inventory, connectivity probes, image pulls, and the rest of
//! the validations the service wants before it will install the host --
//! executes them, and posts the results back. The agent never decides
//! anything itself: the service owns all policy, the agent owns execution.

use std::sync::Arc;

use slog::{debug, error, info};

pub mod actions;
pub mod config;
pub mod connectivity;
pub mod dispatch;
pub mod instructions;
pub mod logging;
pub mod registration;
pub mod reply;
pub mod shutdown;

use config::Config;
use dispatch::StepContext;
use instructions::{poll_instructions, PollExit};
use registration::{register_host, RegistrationOutcome};
use shutdown::Shutdown;

/// Drive the agent to completion: register, poll instructions, and repeat
/// when the service asks for a fresh registration. Returns when the process
/// should exit.
///
/// An authoritative registration rejection or a vanished infra-env parks
/// the agent instead of returning: exiting would make the supervisor
/// restart it into the same refusal, so the agent holds its state until an
/// operator restarts it deliberately.
pub async fn run_agent(
    config: &Config,
    ctx: &Arc<StepContext>,
    shutdown: &mut Shutdown,
) {
    let log = &ctx.log;
    loop {
        match register_host(&ctx.client, config.interval(), shutdown, log)
            .await
        {
            RegistrationOutcome::Cancelled => return,
            RegistrationOutcome::Rejected(status) => {
                error!(
                    log, "host may not register; holding until restarted";
                    "status" => %status,
                );
                shutdown.triggered().await;
                return;
            }
            RegistrationOutcome::Registered(response) => {
                info!(log, "host registered"; "host_id" => %response.host_id);
                if let Some(runner) = response.next_step_runner_command {
                    // This agent is its own step runner; the service's
                    // suggested command is informational.
                    debug!(
                        log, "service sent a runner command";
                        "command" => ?runner.command,
                        "args" => ?runner.args,
                        "retry_seconds" => ?runner.retry_seconds,
                    );
                }
            }
        }

        match poll_instructions(ctx, shutdown, log).await {
            PollExit::ExitRequested => {
                info!(log, "re-registering after service-requested exit");
            }
            PollExit::InfraEnvGone => {
                error!(log, "infra-env is gone; holding until restarted");
                shutdown.triggered().await;
                return;
            }
            PollExit::Cancelled => return,
        }
    }
}
