// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `dhcp-lease-allocate`: obtain DHCP leases for the API and ingress VIPs.
//!
//! The `dhcp_lease_allocate` helper in the agent image does the DHCP
//! exchange. Lease files live under `/etc/keepalived`, which the runner
//! script bind-mounts into the agent and this step bind-mounts into the
//! helper: writing the service-provided lease content there first lets the
//! DHCP server re-offer the same addresses across reboots.

use anyhow::Context;
use async_trait::async_trait;
use camino::Utf8Path;
use foundry_common::api::steps::DhcpAllocationRequest;
use foundry_host_utils::{host_command, Command, CommandOutput};
use slog::{debug, Logger};

use crate::actions::{require_interface_name, single_json_arg, Action};
use crate::dispatch::StepContext;

const LEASE_DIR: &str = "/etc/keepalived";

#[derive(Debug)]
pub struct DhcpLeaseAllocate {
    request: DhcpAllocationRequest,
}

impl DhcpLeaseAllocate {
    pub fn validate(args: &[String]) -> Result<Self, anyhow::Error> {
        let request: DhcpAllocationRequest =
            single_json_arg(args, "DHCP lease allocation")?;
        require_interface_name(&request.interface)?;
        Ok(Self { request })
    }

    async fn run_with_lease_dir(
        &self,
        ctx: &StepContext,
        log: &Logger,
        lease_dir: &Utf8Path,
    ) -> Result<CommandOutput, anyhow::Error> {
        tokio::fs::create_dir_all(lease_dir)
            .await
            .with_context(|| format!("failed to create {lease_dir}"))?;
        for (name, lease) in [
            ("lease-api", &self.request.api_vip_lease),
            ("lease-ingress", &self.request.ingress_vip_lease),
        ] {
            if lease.is_empty() {
                continue;
            }
            let path = lease_dir.join(name);
            debug!(log, "replaying stored lease"; "path" => %path);
            tokio::fs::write(&path, lease)
                .await
                .with_context(|| format!("failed to write {path}"))?;
        }

        // Round-trip through the typed request so only vetted fields reach
        // the helper.
        let helper_arg = serde_json::to_string(&self.request)?;
        let image = ctx.require_agent_image()?;
        let allocate = host_command(
            Command::new("podman")
                .args(["run", "--rm", "--quiet", "--net=host"])
                .arg("-v")
                .arg(format!("{lease_dir}:{LEASE_DIR}"))
                .arg(image)
                .arg("dhcp_lease_allocate")
                .arg(helper_arg),
        );
        Ok(ctx.executor.execute(&allocate).await?)
    }
}

#[async_trait]
impl Action for DhcpLeaseAllocate {
    async fn run(
        &self,
        ctx: &StepContext,
        log: &Logger,
    ) -> Result<CommandOutput, anyhow::Error> {
        self.run_with_lease_dir(ctx, log, Utf8Path::new(LEASE_DIR)).await
    }
}
