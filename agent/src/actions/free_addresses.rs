// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `free-network-addresses`: scan networks for unassigned addresses.
//!
//! The scan itself is the `free_addresses` helper in the agent image; it can
//! take minutes on a large network, so a still-running scanner from the last
//! round makes this round a no-op instead of a pile-up.

use anyhow::Context;
use async_trait::async_trait;
use foundry_host_utils::{host_command, Command, CommandOutput};
use ipnet::IpNet;
use slog::{info, Logger};

use crate::actions::{single_json_arg, Action};
use crate::dispatch::StepContext;

const SCANNER_CONTAINER: &str = "free_addresses_scanner";

#[derive(Debug)]
pub struct FreeAddresses {
    networks: Vec<IpNet>,
}

impl FreeAddresses {
    pub fn validate(args: &[String]) -> Result<Self, anyhow::Error> {
        let cidrs: Vec<String> =
            single_json_arg(args, "free network addresses")?;
        let networks = cidrs
            .iter()
            .map(|cidr| {
                cidr.parse::<IpNet>()
                    .with_context(|| format!("invalid network {cidr:?}"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { networks })
    }

    /// The helper's argument, rebuilt from the parsed networks so nothing
    /// from the raw step argument reaches a command line.
    fn scanner_request(&self) -> String {
        let cidrs: Vec<String> =
            self.networks.iter().map(|net| net.to_string()).collect();
        serde_json::to_string(&cidrs).unwrap_or_else(|_| "[]".to_string())
    }
}

#[async_trait]
impl Action for FreeAddresses {
    async fn run(
        &self,
        ctx: &StepContext,
        log: &Logger,
    ) -> Result<CommandOutput, anyhow::Error> {
        let ps = host_command(
            Command::new("podman")
                .args(["ps", "--filter"])
                .arg(format!("name={SCANNER_CONTAINER}"))
                .args(["--format", "{{.Names}}"]),
        );
        let running = ctx.executor.execute(&ps).await?;
        if !running.succeeded() {
            return Ok(running);
        }
        if running.stdout.contains(SCANNER_CONTAINER) {
            info!(log, "previous scan still running, skipping this round");
            return Ok(CommandOutput::success());
        }

        let image = ctx.require_agent_image()?;
        let scan = host_command(
            Command::new("podman")
                .args(["run", "--rm", "--quiet", "--name"])
                .arg(SCANNER_CONTAINER)
                .arg("--net=host")
                .arg(image)
                .arg("free_addresses")
                .arg(self.scanner_request()),
        );
        Ok(ctx.executor.execute(&scan).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::test_helpers::test_context;
    use foundry_host_utils::CommandSequence;

    fn args(raw: &str) -> Vec<String> {
        vec![raw.to_string()]
    }

    #[test]
    fn rejects_hostile_cidrs() {
        let err = FreeAddresses::validate(&args(r#"["10.0.0.0/24; reboot"]"#))
            .unwrap_err()
            .to_string();
        assert!(err.contains("invalid network"), "{err}");
    }

    #[tokio::test]
    async fn scans_when_no_scanner_is_running() {
        let (ctx, fake) = test_context();
        let mut sequence = CommandSequence::new();
        sequence.expect_ok(
            "nsenter -t 1 -m -i -n -- podman ps --filter \
             name=free_addresses_scanner --format {{.Names}}",
            "",
        );
        sequence.expect_ok(
            "nsenter -t 1 -m -i -n -- podman run --rm --quiet --name \
             free_addresses_scanner --net=host quay.io/foundry/agent:v1 \
             free_addresses [\"192.168.1.0/24\"]",
            r#"[{"network": "192.168.1.0/24", "free_addresses": ["192.168.1.7"]}]"#,
        );
        sequence.register(&fake);

        let action =
            FreeAddresses::validate(&args(r#"["192.168.1.0/24"]"#)).unwrap();
        let output = action.run(&ctx, &ctx.log).await.unwrap();
        assert!(output.succeeded());
        assert!(output.stdout.contains("192.168.1.7"));
    }

    #[tokio::test]
    async fn running_scanner_short_circuits() {
        let (ctx, fake) = test_context();
        let mut sequence = CommandSequence::new();
        sequence.expect_ok(
            "nsenter -t 1 -m -i -n -- podman ps --filter \
             name=free_addresses_scanner --format {{.Names}}",
            "free_addresses_scanner\n",
        );
        sequence.register(&fake);

        let action =
            FreeAddresses::validate(&args(r#"["192.168.1.0/24"]"#)).unwrap();
        let output = action.run(&ctx, &ctx.log).await.unwrap();
        assert!(output.succeeded());
        assert_eq!(output.stdout, "");
    }
}
