// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end tests of the agent's control flow against a mock service:
//! registration, instruction polling, step execution, and reply delivery
//! all run through the same code paths the production binary uses, with
//! only the HTTP server and the process executor replaced.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use foundry_agent::config::Config;
use foundry_agent::dispatch::StepContext;
use foundry_agent::run_agent;
use foundry_agent::shutdown::Shutdown;
use foundry_client::{Client, ClientConfig};
use foundry_host_utils::{CommandOutput, FakeExecutor};
use httptest::{matchers::*, responders::*, Expectation, Server};
use serde_json::json;
use slog::Logger;
use tokio::task::JoinHandle;

const INFRA_ENV_ID: &str = "11111111-2222-3333-4444-555555555555";
const HOST_ID: &str = "00000000-0000-0000-0000-000000000001";
const HOSTS_PATH: &str =
    "/infra-envs/11111111-2222-3333-4444-555555555555/hosts";
const INSTRUCTIONS_PATH: &str =
    "/infra-envs/11111111-2222-3333-4444-555555555555\
     /hosts/00000000-0000-0000-0000-000000000001/instructions";

fn test_log() -> Logger {
    Logger::root(slog::Discard, slog::o!())
}

struct TestAgent {
    config: Config,
    ctx: Arc<StepContext>,
    executor: Arc<FakeExecutor>,
}

impl TestAgent {
    /// Wire a full agent at `server`, identical to the production binary
    /// except for the [`FakeExecutor`] standing in for subprocesses.
    fn at(server: &Server) -> TestAgent {
        let url = server.url("/").to_string();
        let config = Config::try_parse_from([
            "foundry-agent",
            "--url",
            &url,
            "--infra-env-id",
            INFRA_ENV_ID,
            "--host-id",
            HOST_ID,
            "--pull-secret-token",
            "sekrit",
            "--agent-image",
            "quay.io/foundry/agent:v1",
            "--interval",
            "1",
        ])
        .unwrap();

        let log = test_log();
        let client_config = ClientConfig {
            url: config.url.clone(),
            infra_env_id: config.infra_env_id,
            pull_secret_token: config.pull_secret_token.clone(),
            agent_version: config.agent_version.clone(),
            cacert: None,
            insecure: false,
        };
        let client =
            Client::new(&client_config, HOST_ID.parse().unwrap(), &log)
                .unwrap();
        let executor = FakeExecutor::new(log.clone());
        let ctx = Arc::new(StepContext::new(
            &config,
            Arc::new(client),
            executor.clone().as_executor(),
            log,
        ));
        TestAgent { config, ctx, executor }
    }

    /// Run the agent on its own task so the test can watch the wire.
    fn spawn(&self, mut shutdown: Shutdown) -> JoinHandle<()> {
        let config = self.config.clone();
        let ctx = self.ctx.clone();
        tokio::spawn(
            async move { run_agent(&config, &ctx, &mut shutdown).await },
        )
    }
}

fn registered() -> serde_json::Value {
    json!({ "host_id": HOST_ID, "next_step_runner_command": null })
}

fn envelope(
    seconds: i64,
    action: &str,
    instructions: serde_json::Value,
) -> serde_json::Value {
    json!({
        "next_instruction_seconds": seconds,
        "post_step_action": action,
        "instructions": instructions,
    })
}

#[tokio::test]
async fn registers_then_polls_for_instructions() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("POST", HOSTS_PATH))
            .times(1)
            .respond_with(
                status_code(201)
                    .append_header("content-type", "application/json")
                    .body(registered().to_string()),
            ),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", INSTRUCTIONS_PATH))
            .times(1..)
            .respond_with(json_encoded(envelope(1, "continue", json!([])))),
    );

    let agent = TestAgent::at(&server);
    let (trigger, shutdown) = Shutdown::new();
    let run = agent.spawn(shutdown);

    // Registration and the first poll happen without delay; an empty
    // envelope posts no replies, so any POST to the instructions path
    // would fail the expectations when the server is torn down.
    tokio::time::sleep(Duration::from_millis(500)).await;
    trigger.send(true).unwrap();
    run.await.unwrap();
}

#[tokio::test]
async fn authoritative_rejection_stops_all_requests() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("POST", HOSTS_PATH))
            .times(1)
            .respond_with(status_code(403).body("host is not allowed")),
    );

    let agent = TestAgent::at(&server);
    let (trigger, shutdown) = Shutdown::new();
    let run = agent.spawn(shutdown);

    // The agent must neither retry registration nor start polling. The
    // lone expectation above turns any further request into a failure.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!run.is_finished(), "agent exited instead of holding");

    trigger.send(true).unwrap();
    run.await.unwrap();
}

#[tokio::test]
async fn exit_action_triggers_reregistration() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("POST", HOSTS_PATH))
            .times(2)
            .respond_with(json_encoded(registered())),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", INSTRUCTIONS_PATH))
            .times(2)
            .respond_with(cycle![
                json_encoded(envelope(1, "exit", json!([]))),
                json_encoded(envelope(3600, "continue", json!([]))),
            ]),
    );

    let agent = TestAgent::at(&server);
    let (trigger, shutdown) = Shutdown::new();
    let run = agent.spawn(shutdown);

    // First poll returns the exit action, so the agent registers a second
    // time and polls again; the long envelope then parks it until the
    // trigger fires.
    tokio::time::sleep(Duration::from_millis(500)).await;
    trigger.send(true).unwrap();
    run.await.unwrap();
}

#[tokio::test]
async fn unknown_step_reply_reaches_the_service() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("POST", HOSTS_PATH))
            .times(1)
            .respond_with(json_encoded(registered())),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", INSTRUCTIONS_PATH))
            .times(1..)
            .respond_with(cycle![
                json_encoded(envelope(
                    1,
                    "continue",
                    json!([{
                        "step_type": "Step-not-exists",
                        "step_id": "wrong-step",
                        "args": [],
                    }]),
                )),
                json_encoded(envelope(3600, "continue", json!([]))),
            ]),
    );
    server.expect(
        Expectation::matching(all_of![
            request::method_path("POST", INSTRUCTIONS_PATH),
            request::body(json_decoded(eq(json!({
                "step_type": "Step-not-exists",
                "step_id": "wrong-step",
                "exit_code": -1,
                "output": "",
                "error": "failed to find action for step type Step-not-exists",
            })))),
        ])
        .times(1)
        .respond_with(status_code(204)),
    );

    let agent = TestAgent::at(&server);
    let (trigger, shutdown) = Shutdown::new();
    let run = agent.spawn(shutdown);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    trigger.send(true).unwrap();
    run.await.unwrap();
}

#[tokio::test]
async fn repeated_inventory_output_posts_once() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("POST", HOSTS_PATH))
            .times(1)
            .respond_with(json_encoded(registered())),
    );
    // Two polls each carry an inventory step; the third idles the loop.
    server.expect(
        Expectation::matching(request::method_path("GET", INSTRUCTIONS_PATH))
            .times(3)
            .respond_with(cycle![
                json_encoded(envelope(
                    1,
                    "continue",
                    json!([{
                        "step_type": "inventory",
                        "step_id": "inventory-first",
                        "args": [],
                    }]),
                )),
                json_encoded(envelope(
                    1,
                    "continue",
                    json!([{
                        "step_type": "inventory",
                        "step_id": "inventory-second",
                        "args": [],
                    }]),
                )),
                json_encoded(envelope(3600, "continue", json!([]))),
            ]),
    );
    // Identical output means only the first reply hits the wire; a
    // second POST would carry `inventory-second` and match nothing.
    server.expect(
        Expectation::matching(all_of![
            request::method_path("POST", INSTRUCTIONS_PATH),
            request::body(json_decoded(eq(json!({
                "step_type": "inventory",
                "step_id": "inventory-first",
                "exit_code": 0,
                "output": r#"{"hostname":"worker-0"}"#,
                "error": "",
            })))),
        ])
        .times(1)
        .respond_with(status_code(204)),
    );

    let agent = TestAgent::at(&server);
    agent.executor.set_handler(Box::new(|command| {
        let line = command.line();
        assert!(line.contains("inventory"), "unexpected command: {line}");
        Ok(CommandOutput::success()
            .set_stdout(r#"{"hostname":"worker-0"}"#))
    }));

    let (trigger, shutdown) = Shutdown::new();
    let run = agent.spawn(shutdown);

    // Polls run a second apart; 2.5s covers both steps and the idle poll.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    trigger.send(true).unwrap();
    run.await.unwrap();
}
