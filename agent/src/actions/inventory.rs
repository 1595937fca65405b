// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `inventory`: collect the host's hardware description.
//!
//! The heavy lifting (dmidecode, smartctl, BMC queries) lives in the agent
//! image's `inventory` helper, which needs host devices mounted in. The
//! step itself just runs that helper and relays its JSON.

use async_trait::async_trait;
use foundry_host_utils::{host_command, Command, CommandOutput};
use slog::Logger;

use crate::actions::{no_args, Action};
use crate::dispatch::StepContext;

#[derive(Debug)]
pub struct Inventory;

impl Inventory {
    pub fn validate(args: &[String]) -> Result<Self, anyhow::Error> {
        no_args(args)?;
        Ok(Self)
    }
}

#[async_trait]
impl Action for Inventory {
    async fn run(
        &self,
        ctx: &StepContext,
        _log: &Logger,
    ) -> Result<CommandOutput, anyhow::Error> {
        if let Some(dry_run) = &ctx.dry_run {
            // No hardware to inspect; answer with a minimal inventory that
            // carries the forced identity.
            let inventory = serde_json::json!({
                "bmc_address": "0.0.0.0",
                "bmc_v6address": "::/0",
                "boot": { "current_boot_mode": "bios" },
                "cpu": { "architecture": "x86_64", "count": 4 },
                "disks": [],
                "hostname": format!("dry-run-{}", dry_run.forced_host_id),
                "interfaces": [{
                    "name": "eth0",
                    "mac_address": dry_run.forced_mac.to_string(),
                    "ipv4_addresses": [],
                    "ipv6_addresses": [],
                }],
                "memory": { "physical_bytes": 17_179_869_184u64 },
            });
            return Ok(CommandOutput::success()
                .set_stdout(inventory.to_string()));
        }

        let image = ctx.require_agent_image()?;
        let command = host_command(
            Command::new("podman")
                .args([
                    "run", "--privileged", "--net=host", "--pid=host", "--rm",
                    "--quiet",
                ])
                .args(["-v", "/var/log:/var/log"])
                .args(["-v", "/run/udev:/run/udev"])
                .args(["-v", "/dev/disk:/dev/disk"])
                .arg(image)
                .arg("inventory"),
        );
        Ok(ctx.executor.execute(&command).await?)
    }
}
