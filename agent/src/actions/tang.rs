// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `tang-connectivity-check`: fetch the advertisement from every configured
//! tang server.
//!
//! Disk encryption enrollment dies half-way if any server is unreachable,
//! so unlike most checks this one fails the whole step on the first bad
//! server rather than reporting partial success.

use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use foundry_common::api::steps::{
    TangConnectivityRequest, TangConnectivityResponse, TangServer,
    TangServerResponse,
};
use foundry_host_utils::CommandOutput;
use slog::{info, Logger};

use crate::actions::{require_http_url, single_json_arg, Action};
use crate::dispatch::StepContext;

const ADVERTISEMENT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct TangConnectivityCheck {
    servers: Vec<TangServer>,
}

impl TangConnectivityCheck {
    pub fn validate(args: &[String]) -> Result<Self, anyhow::Error> {
        let request: TangConnectivityRequest =
            single_json_arg(args, "tang connectivity")?;
        let servers =
            request.servers().context("failed to parse tang server list")?;
        if servers.is_empty() {
            return Err(anyhow!("no tang servers to check"));
        }
        for server in &servers {
            require_http_url(&server.url, "tang server URL")?;
        }
        Ok(Self { servers })
    }
}

#[async_trait]
impl Action for TangConnectivityCheck {
    async fn run(
        &self,
        _ctx: &StepContext,
        log: &Logger,
    ) -> Result<CommandOutput, anyhow::Error> {
        let client = reqwest::Client::builder()
            .timeout(ADVERTISEMENT_TIMEOUT)
            .build()
            .context("failed to build tang client")?;

        let mut responses = Vec::new();
        for server in &self.servers {
            let url = format!("{}/adv", server.url.trim_end_matches('/'));
            let payload = fetch_advertisement(&client, &url).await?;
            info!(log, "tang advertisement fetched"; "url" => &url);
            responses.push(TangServerResponse {
                tang_url: server.url.clone(),
                payload,
            });
        }

        let response = TangConnectivityResponse {
            is_success: true,
            tang_server_response: responses,
        };
        Ok(CommandOutput::success()
            .set_stdout(serde_json::to_string(&response)?))
    }
}

async fn fetch_advertisement(
    client: &reqwest::Client,
    url: &str,
) -> Result<String, anyhow::Error> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("GET {url} failed"))?;
    let status = response.status();
    if !status.is_success() {
        return Err(anyhow!("GET {url} returned {status}"));
    }
    let payload = response
        .text()
        .await
        .with_context(|| format!("failed to read advertisement from {url}"))?;

    // An advertisement without keys cannot bind a disk; treat it like an
    // unreachable server.
    let advertisement: serde_json::Value = serde_json::from_str(&payload)
        .with_context(|| format!("advertisement from {url} is not JSON"))?;
    match advertisement.get("keys").and_then(|keys| keys.as_array()) {
        Some(keys) if !keys.is_empty() => Ok(payload),
        _ => Err(anyhow!("advertisement from {url} contains no keys")),
    }
}
