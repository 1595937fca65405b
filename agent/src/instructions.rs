// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The instruction-polling loop.
//!
//! Each poll fetches an envelope of steps and spawns every step as its own
//! task; a slow inventory must not delay a connectivity check. The loop
//! paces itself by the service's `next_instruction_seconds` hint, with a
//! one-second floor so a confused service cannot turn the agent into a
//! busy-loop. On exit -- requested, infra-env gone, or shutdown -- in-flight
//! steps get a grace period to deliver their replies before being dropped.

use std::sync::Arc;
use std::time::Duration;

use foundry_client::StatusCode;
use foundry_common::api::PostStepAction;
use foundry_common::backoff::{retry_policy_instructions, Backoff};
use slog::{debug, info, warn, Logger};
use tokio::task::JoinSet;

use crate::dispatch::{execute_step, StepContext};
use crate::reply::post_reply;
use crate::shutdown::Shutdown;

/// Floor for the poll pacing, whatever the service hints.
const MINIMUM_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How long in-flight steps may keep running once the loop is ending.
const DRAIN_GRACE: Duration = Duration::from_secs(10);

/// Why the polling loop returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollExit {
    /// The service asked the agent to stop polling and register anew.
    ExitRequested,
    /// The service no longer knows the infra-env (or this host in it).
    InfraEnvGone,
    /// Process shutdown was requested.
    Cancelled,
}

pub async fn poll_instructions(
    ctx: &Arc<StepContext>,
    shutdown: &mut Shutdown,
    log: &Logger,
) -> PollExit {
    let mut retry_policy = retry_policy_instructions();
    let mut in_flight: JoinSet<()> = JoinSet::new();

    loop {
        if shutdown.is_triggered() {
            drain(&mut in_flight, log).await;
            return PollExit::Cancelled;
        }
        reap(&mut in_flight, log);

        let ts = chrono::Utc::now().timestamp();
        let delay = match ctx.client.next_steps(ts).await {
            Ok(envelope) => {
                retry_policy.reset();
                debug!(
                    log, "received instructions";
                    "count" => envelope.instructions.len(),
                    "post_step_action" => ?envelope.post_step_action,
                );
                for step in envelope.instructions {
                    let ctx = ctx.clone();
                    in_flight.spawn(async move {
                        let reply = execute_step(&ctx, &step).await;
                        post_reply(&ctx.client, &ctx.cache, &reply, &ctx.log)
                            .await;
                    });
                }
                if envelope.post_step_action == Some(PostStepAction::Exit) {
                    info!(log, "service requested an exit");
                    drain(&mut in_flight, log).await;
                    return PollExit::ExitRequested;
                }
                pace(envelope.next_instruction_seconds)
            }
            Err(err) if err.status() == Some(StatusCode::NOT_FOUND) => {
                warn!(log, "infra-env is gone"; "err" => %err);
                drain(&mut in_flight, log).await;
                return PollExit::InfraEnvGone;
            }
            Err(err) => {
                // The policy has no elapsed-time limit.
                let delay = retry_policy
                    .next_backoff()
                    .expect("instruction retry policy never gives up");
                warn!(
                    log, "fetching instructions failed";
                    "err" => %err,
                    "retry_after" => ?delay,
                );
                delay
            }
        };

        tokio::select! {
            _ = shutdown.triggered() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

fn pace(next_instruction_seconds: u64) -> Duration {
    Duration::from_secs(next_instruction_seconds).max(MINIMUM_POLL_INTERVAL)
}

/// Collect finished step tasks without blocking the poll cadence.
fn reap(in_flight: &mut JoinSet<()>, log: &Logger) {
    while let Some(joined) = in_flight.try_join_next() {
        if let Err(err) = joined {
            warn!(log, "step task failed"; "err" => %err);
        }
    }
}

/// Give in-flight steps a grace period to post their replies.
async fn drain(in_flight: &mut JoinSet<()>, log: &Logger) {
    if in_flight.is_empty() {
        return;
    }
    info!(log, "waiting for in-flight steps"; "count" => in_flight.len());
    let flushed = tokio::time::timeout(DRAIN_GRACE, async {
        while let Some(joined) = in_flight.join_next().await {
            if let Err(err) = joined {
                warn!(log, "step task failed"; "err" => %err);
            }
        }
    })
    .await;
    if flushed.is_err() {
        warn!(log, "abandoning in-flight steps"; "count" => in_flight.len());
        in_flight.abort_all();
    }
}
