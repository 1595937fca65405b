// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Translates one received step into an executed action and its reply.
//!
//! The dispatcher itself is stateless; everything shared between steps
//! (client, executor, singleton permits, reply cache) lives in
//! [`StepContext`], injected so tests can swap the edges out.

use std::sync::Arc;

use anyhow::anyhow;
use foundry_client::Client;
use foundry_common::api::{Step, StepReply, StepType};
use foundry_host_utils::{BoxedExecutor, CommandOutput};
use slog::{debug, o, warn, Logger};
use tokio::sync::Semaphore;

use crate::actions;
use crate::config::{Config, DryRunConfig};
use crate::reply::ReplyCache;

/// Process-wide single-permit locks for the two actions that must never
/// overlap themselves.
pub struct Singletons {
    pub image_availability: Semaphore,
    pub upgrade: Semaphore,
}

impl Singletons {
    pub fn new() -> Singletons {
        Singletons {
            image_availability: Semaphore::new(1),
            upgrade: Semaphore::new(1),
        }
    }
}

/// Shared dependencies of every dispatched step.
pub struct StepContext {
    pub log: Logger,
    pub client: Arc<Client>,
    pub executor: BoxedExecutor,
    pub agent_version: String,
    pub agent_image: Option<String>,
    pub dry_run: Option<DryRunConfig>,
    pub singletons: Singletons,
    pub cache: ReplyCache,
}

impl StepContext {
    pub fn new(
        config: &Config,
        client: Arc<Client>,
        executor: BoxedExecutor,
        log: Logger,
    ) -> StepContext {
        StepContext {
            log,
            client,
            executor,
            agent_version: config.agent_version.clone(),
            agent_image: config.agent_image.clone(),
            dry_run: config.dry_run_config(),
            singletons: Singletons::new(),
            cache: ReplyCache::new(),
        }
    }

    /// The helper image actions shell out to, or a validation error for
    /// actions that cannot run without one.
    pub fn require_agent_image(&self) -> Result<&str, anyhow::Error> {
        self.agent_image
            .as_deref()
            .ok_or_else(|| anyhow!("no agent image configured (AGENT_IMAGE)"))
    }
}

/// Run one step to completion and shape its reply. Never fails: every
/// internal error becomes an `exit_code = -1` reply so the service sees the
/// classification.
pub async fn execute_step(ctx: &StepContext, step: &Step) -> StepReply {
    let log = ctx.log.new(o!(
        "step_type" => step.step_type.clone(),
        "step_id" => step.step_id.clone(),
    ));
    debug!(log, "dispatching step"; "args" => ?step.args);

    let reply = match run_step(ctx, &log, step).await {
        Ok(output) => StepReply {
            step_type: step.step_type.clone(),
            step_id: step.step_id.clone(),
            exit_code: i64::from(output.exit_code),
            output: output.stdout,
            error: output.stderr,
        },
        Err(err) => {
            warn!(log, "step failed"; "err" => %err);
            StepReply {
                step_type: step.step_type.clone(),
                step_id: step.step_id.clone(),
                exit_code: -1,
                output: String::new(),
                error: format!("{err:#}"),
            }
        }
    };
    debug!(log, "step finished"; "exit_code" => reply.exit_code);
    reply
}

async fn run_step(
    ctx: &StepContext,
    log: &Logger,
    step: &Step,
) -> Result<CommandOutput, anyhow::Error> {
    let Ok(step_type) = step.step_type.parse::<StepType>() else {
        return Err(anyhow!(
            "failed to find action for step type {}",
            step.step_type
        ));
    };
    let action = actions::plan(step_type, &step.args)?;
    action.run(ctx, log).await
}


#[cfg(test)]
mod tests {
    use super::test_helpers::test_context;
    use super::*;
    use foundry_host_utils::CommandSequence;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn step(step_type: &str, step_id: &str, args: &[&str]) -> Step {
        Step {
            step_type: step_type.to_string(),
            step_id: step_id.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn unknown_step_type_is_classified() {
        let (ctx, _executor) = test_context();
        let reply = execute_step(
            &ctx,
            &step("Step-not-exists", "wrong-step", &[]),
        )
        .await;
        assert_eq!(
            reply,
            StepReply {
                step_type: "Step-not-exists".to_string(),
                step_id: "wrong-step".to_string(),
                exit_code: -1,
                output: String::new(),
                error: "failed to find action for step type Step-not-exists"
                    .to_string(),
            }
        );
    }

    #[tokio::test]
    async fn arity_violations_are_validation_failures() {
        let (ctx, _executor) = test_context();
        let reply = execute_step(
            &ctx,
            &step("ntp-synchronizer", "ntp-1", &["{}", "unexpected"]),
        )
        .await;
        assert_eq!(reply.exit_code, -1);
        assert_eq!(reply.output, "");
        assert!(reply.error.contains("argument"), "error: {}", reply.error);
        assert_eq!(reply.step_id, "ntp-1");
        assert_eq!(reply.step_type, "ntp-synchronizer");
    }

    #[tokio::test]
    async fn subprocess_exit_codes_pass_through_verbatim() {
        let (ctx, executor) = test_context();
        let mut sequence = CommandSequence::new();
        sequence.expect_fail(
            "nsenter -t 1 -m -i -n -- podman stop -i -t 5 foundry-installer",
            2,
            "no such container",
        );
        sequence.register(&executor);

        let reply =
            execute_step(&ctx, &step("stop-installation", "stop-1", &[]))
                .await;
        assert_eq!(reply.exit_code, 2);
        assert_eq!(reply.error, "no such container");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn image_availability_is_a_singleton() {
        let (ctx, executor) = test_context();
        let pulls = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        {
            let pulls = pulls.clone();
            executor.set_handler(Box::new(move |command| {
                let line = command.line();
                if line.contains("podman pull") {
                    pulls.fetch_add(1, Ordering::SeqCst);
                    // Hold the first pull until the test releases it.
                    release_rx.recv().unwrap();
                    Ok(CommandOutput::success())
                } else if line.contains("podman image inspect") {
                    Ok(CommandOutput::success().set_stdout("123456"))
                } else {
                    panic!("unexpected command: {line}");
                }
            }));
        }
        let ctx = Arc::new(ctx);
        let request = r#"{"images":["quay.io/foundry/probe:v1"],"timeout":60}"#;

        let first = tokio::spawn({
            let ctx = ctx.clone();
            let request = request.to_string();
            async move {
                execute_step(
                    &ctx,
                    &Step {
                        step_type: "container-image-availability".to_string(),
                        step_id: "avail-1".to_string(),
                        args: vec![request],
                    },
                )
                .await
            }
        });

        // Wait until the first dispatch holds the permit inside the pull.
        while pulls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let second = execute_step(
            &ctx,
            &step("container-image-availability", "avail-2", &[request]),
        )
        .await;
        assert_eq!(second.exit_code, 0);
        assert_eq!(second.output, "");
        assert_eq!(second.error, "");

        release_tx.send(()).unwrap();
        let first = first.await.unwrap();
        assert_eq!(first.exit_code, 0);
        assert!(first.output.contains("quay.io/foundry/probe:v1"));
        assert_eq!(pulls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn replies_echo_step_identity() {
        let (ctx, _executor) = test_context();
        // Bad JSON: the reply still names the step that produced it.
        let reply = execute_step(
            &ctx,
            &step("domain-resolution", "dns-7", &["not json"]),
        )
        .await;
        assert_eq!(reply.step_type, "domain-resolution");
        assert_eq!(reply.step_id, "dns-7");
        assert_eq!(reply.exit_code, -1);
    }
}
