// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Executable entry point for the Foundry discovery agent.

use std::sync::Arc;

use clap::Parser;
use foundry_agent::config::{determine_host_id, Config};
use foundry_agent::dispatch::StepContext;
use foundry_agent::logging::setup_log;
use foundry_agent::run_agent;
use foundry_agent::shutdown::{trigger_on_signals, Shutdown};
use foundry_client::{Client, ClientConfig};
use foundry_common::cmd::{fatal, CmdError};
use foundry_host_utils::HostExecutor;
use slog::info;

#[tokio::main]
async fn main() {
    if let Err(cmd_error) = do_run().await {
        fatal(cmd_error);
    }
}

async fn do_run() -> Result<(), CmdError> {
    let config = match Config::try_parse() {
        Ok(config) => config,
        Err(err) => {
            if err.use_stderr() {
                return Err(CmdError::Usage(err.to_string()));
            }
            // --help and --version print to stdout and exit zero.
            err.exit();
        }
    };
    config.validate().map_err(CmdError::Usage)?;

    let log = setup_log(&config).map_err(CmdError::Failure)?;

    let host_id =
        determine_host_id(&config, &log).map_err(CmdError::Failure)?;
    let client_config = ClientConfig {
        url: config.url.clone(),
        infra_env_id: config.infra_env_id,
        pull_secret_token: config.pull_secret_token.clone(),
        agent_version: config.agent_version.clone(),
        cacert: config.cacert.clone(),
        insecure: config.insecure,
    };
    let client = Client::new(&client_config, host_id, &log)
        .map_err(|err| CmdError::Failure(err.into()))?;

    let (shutdown_tx, mut shutdown) = Shutdown::new();
    trigger_on_signals(shutdown_tx, &log).map_err(CmdError::Failure)?;

    let executor = HostExecutor::new(log.clone()).as_executor();
    let ctx = Arc::new(StepContext::new(
        &config,
        Arc::new(client),
        executor,
        log.clone(),
    ));

    info!(
        log, "agent starting";
        "host_id" => %host_id,
        "infra_env_id" => %config.infra_env_id,
        "version" => &config.agent_version,
        "dry_run" => config.dry_run,
    );
    run_agent(&config, &ctx, &mut shutdown).await;
    info!(log, "agent stopped");
    Ok(())
}
