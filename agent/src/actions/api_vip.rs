// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `api-vip-connectivity-check`: fetch worker ignition through the cluster's
//! API VIP.
//!
//! curl runs unwrapped: the agent container shares the host network
//! namespace, and the optional CA bundle is a temp file in our own mount
//! namespace. An unreachable VIP is an answer (`is_success: false`), not a
//! step failure.

use std::sync::LazyLock;

use anyhow::{bail, Context};
use async_trait::async_trait;
use base64::Engine;
use foundry_common::api::steps::{
    ApiVipConnectivityRequest, ApiVipConnectivityResponse,
};
use foundry_host_utils::{Command, CommandOutput};
use regex::Regex;
use slog::{info, Logger};

use crate::actions::{require_http_url, single_json_arg, Action};
use crate::dispatch::StepContext;

static HEADER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9-]+$").unwrap());

pub struct ApiVipConnectivityCheck {
    request: ApiVipConnectivityRequest,
}

impl ApiVipConnectivityCheck {
    pub fn validate(args: &[String]) -> Result<Self, anyhow::Error> {
        let request: ApiVipConnectivityRequest =
            single_json_arg(args, "API VIP connectivity")?;
        require_http_url(&request.url, "ignition URL")?;
        for header in &request.request_headers {
            if !HEADER_NAME.is_match(&header.key) {
                bail!("invalid header name {:?}", header.key);
            }
            require_header_value(&header.value)?;
        }
        if let Some(token) = &request.ignition_endpoint_token {
            require_header_value(token)?;
        }
        Ok(Self { request })
    }
}

fn require_header_value(value: &str) -> Result<(), anyhow::Error> {
    if value.chars().any(char::is_control) {
        bail!("header value contains control characters");
    }
    Ok(())
}

#[async_trait]
impl Action for ApiVipConnectivityCheck {
    async fn run(
        &self,
        ctx: &StepContext,
        log: &Logger,
    ) -> Result<CommandOutput, anyhow::Error> {
        let mut command = Command::new("curl")
            .args(["-s", "-S", "--fail", "--max-time", "10"]);

        // Lives until the fetch finishes, then the bundle is removed.
        let mut _ca_file = None;
        if let Some(encoded) = &self.request.ca_certificate {
            let pem = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .context("failed to decode CA certificate")?;
            let file = camino_tempfile::Builder::new()
                .prefix("ignition-ca-")
                .suffix(".pem")
                .tempfile()
                .context("failed to stage CA certificate")?;
            std::fs::write(file.path(), &pem)
                .context("failed to write CA certificate")?;
            command = command.arg("--cacert").arg(file.path().as_str());
            _ca_file = Some(file);
        }
        if let Some(token) = &self.request.ignition_endpoint_token {
            command = command
                .arg("-H")
                .arg(format!("Authorization: Bearer {token}"));
        }
        for header in &self.request.request_headers {
            command = command
                .arg("-H")
                .arg(format!("{}: {}", header.key, header.value));
        }
        command = command.arg(&self.request.url);

        let output = ctx.executor.execute(&command).await?;
        let response = if output.succeeded() {
            info!(log, "ignition fetched"; "url" => &self.request.url);
            ApiVipConnectivityResponse {
                ignition: output.stdout,
                is_success: true,
            }
        } else {
            info!(
                log, "ignition fetch failed";
                "url" => &self.request.url,
                "exit_code" => output.exit_code,
            );
            ApiVipConnectivityResponse {
                ignition: String::new(),
                is_success: false,
            }
        };
        Ok(CommandOutput::success()
            .set_stdout(serde_json::to_string(&response)?)
            .set_stderr(output.stderr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::test_helpers::test_context;
    use foundry_host_utils::CommandSequence;
    use std::sync::{Arc, Mutex};

    const IGNITION: &str = r#"{"ignition": {"version": "3.2.0"}}"#;

    #[tokio::test]
    async fn fetches_ignition_with_token_and_headers() {
        let (ctx, fake) = test_context();
        let mut sequence = CommandSequence::new();
        sequence.expect_ok(
            "curl -s -S --fail --max-time 10 \
             -H Authorization: Bearer secret-token \
             -H Accept: application/vnd.coreos.ignition+json; version=3.2.0 \
             https://192.168.111.5:22624/config/worker",
            IGNITION,
        );
        sequence.register(&fake);

        let action = ApiVipConnectivityCheck::validate(&[serde_json::json!({
            "url": "https://192.168.111.5:22624/config/worker",
            "ignition_endpoint_token": "secret-token",
            "request_headers": [{
                "key": "Accept",
                "value": "application/vnd.coreos.ignition+json; version=3.2.0",
            }],
        })
        .to_string()])
        .unwrap();
        let output = action.run(&ctx, &ctx.log).await.unwrap();
        assert!(output.succeeded());

        let response: ApiVipConnectivityResponse =
            serde_json::from_str(&output.stdout).unwrap();
        assert!(response.is_success);
        assert_eq!(response.ignition, IGNITION);
    }

    #[tokio::test]
    async fn stages_and_cleans_up_the_ca_bundle() {
        let (ctx, fake) = test_context();
        let seen_path = Arc::new(Mutex::new(None::<String>));
        {
            let seen_path = seen_path.clone();
            fake.set_handler(Box::new(move |command| {
                let args = command.get_args();
                let cacert = args
                    .iter()
                    .position(|a| a.as_str() == "--cacert")
                    .map(|i| args[i + 1].clone())
                    .expect("--cacert missing");
                let pem = std::fs::read_to_string(&cacert).unwrap();
                assert!(pem.contains("BEGIN CERTIFICATE"));
                *seen_path.lock().unwrap() = Some(cacert);
                Ok(CommandOutput::success().set_stdout(IGNITION))
            }));
        }

        let encoded = base64::engine::general_purpose::STANDARD
            .encode("-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n");
        let action = ApiVipConnectivityCheck::validate(&[serde_json::json!({
            "url": "https://192.168.111.5:22624/config/worker",
            "ca_certificate": encoded,
        })
        .to_string()])
        .unwrap();
        let output = action.run(&ctx, &ctx.log).await.unwrap();
        assert!(output.succeeded());

        let path = seen_path.lock().unwrap().clone().unwrap();
        assert!(!std::path::Path::new(&path).exists(), "CA bundle left behind");
    }

    #[tokio::test]
    async fn unreachable_vip_is_a_negative_answer() {
        let (ctx, fake) = test_context();
        let mut sequence = CommandSequence::new();
        sequence.expect_fail(
            "curl -s -S --fail --max-time 10 \
             https://192.168.111.5:22624/config/worker",
            7,
            "Failed to connect to 192.168.111.5 port 22624",
        );
        sequence.register(&fake);

        let action = ApiVipConnectivityCheck::validate(&[serde_json::json!({
            "url": "https://192.168.111.5:22624/config/worker",
        })
        .to_string()])
        .unwrap();
        let output = action.run(&ctx, &ctx.log).await.unwrap();
        assert!(output.succeeded());
        assert!(output.stderr.contains("Failed to connect"));

        let response: ApiVipConnectivityResponse =
            serde_json::from_str(&output.stdout).unwrap();
        assert!(!response.is_success);
        assert_eq!(response.ignition, "");
    }

    #[test]
    fn rejects_header_injection() {
        let raw = serde_json::json!({
            "url": "https://192.168.111.5:22624/config/worker",
            "ignition_endpoint_token": "tok\r\nX-Injected: 1",
        })
        .to_string();
        assert!(ApiVipConnectivityCheck::validate(&[raw]).is_err());
    }
}
