// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `verify-vips`: confirm the cluster's virtual IPs are still unclaimed.
//!
//! A VIP verifies as `Succeeded` when nothing on the network answers for
//! it: duplicate-address detection for IPv4, a ping that gets no reply for
//! IPv6. An answer means some other machine already holds the address.

use std::net::IpAddr;

use async_trait::async_trait;
use foundry_common::api::steps::{
    VerifiedVip, VerifyVip, VerifyVipsRequest, VerifyVipsResponse,
    VipVerification,
};
use foundry_host_utils::{
    list_outgoing_nics, Command, CommandOutput, OutgoingNic,
};
use slog::{warn, Logger};

use crate::actions::{single_json_arg, Action};
use crate::dispatch::StepContext;

pub struct VerifyVips {
    request: VerifyVipsRequest,
}

impl VerifyVips {
    pub fn validate(args: &[String]) -> Result<Self, anyhow::Error> {
        // `IpAddr` fields make the addresses safe to interpolate.
        let request: VerifyVipsRequest =
            single_json_arg(args, "VIP verification")?;
        Ok(Self { request })
    }
}

#[async_trait]
impl Action for VerifyVips {
    async fn run(
        &self,
        ctx: &StepContext,
        log: &Logger,
    ) -> Result<CommandOutput, anyhow::Error> {
        let mut verified = if ctx.dry_run.is_some() {
            self.request
                .iter()
                .map(|vip| VerifiedVip {
                    vip: vip.vip,
                    vip_type: vip.vip_type,
                    verification: VipVerification::Succeeded,
                })
                .collect()
        } else {
            let nics = list_outgoing_nics(&ctx.executor, log).await?;
            let mut verified = Vec::new();
            for vip in &self.request {
                verified.push(verify_one(ctx, log, vip, &nics).await);
            }
            verified
        };
        verified.sort_by_key(|v| (v.vip_type, v.vip));

        let response: VerifyVipsResponse = verified;
        Ok(CommandOutput::success()
            .set_stdout(serde_json::to_string(&response)?))
    }
}

async fn verify_one(
    ctx: &StepContext,
    log: &Logger,
    vip: &VerifyVip,
    nics: &[OutgoingNic],
) -> VerifiedVip {
    let probe = match vip.vip {
        IpAddr::V4(addr) => {
            let Some(nic) = nics.iter().find(|nic| nic.has_ipv4_addresses())
            else {
                warn!(
                    log, "no IPv4-capable interface to probe from";
                    "vip" => %addr,
                );
                return failed(vip);
            };
            // Duplicate-address detection: exit 0 means nobody answered.
            Command::new("arping")
                .args(["-D", "-c", "2", "-w", "3", "-I"])
                .arg(&nic.name)
                .arg(addr.to_string())
        }
        IpAddr::V6(addr) => Command::new("ping")
            .args(["-c", "3", "-W", "3"])
            .arg(addr.to_string()),
    };

    let verification = match ctx.executor.execute(&probe).await {
        Ok(output) => {
            let unclaimed = match vip.vip {
                IpAddr::V4(_) => output.succeeded(),
                // For ping the polarity flips: a reply means the address
                // is taken.
                IpAddr::V6(_) => !output.succeeded(),
            };
            if unclaimed {
                VipVerification::Succeeded
            } else {
                VipVerification::Failed
            }
        }
        Err(err) => {
            warn!(log, "VIP probe failed to run"; "vip" => %vip.vip, "err" => %err);
            VipVerification::Failed
        }
    };
    VerifiedVip { vip: vip.vip, vip_type: vip.vip_type, verification }
}

fn failed(vip: &VerifyVip) -> VerifiedVip {
    VerifiedVip {
        vip: vip.vip,
        vip_type: vip.vip_type,
        verification: VipVerification::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::test_helpers::test_context;
    use foundry_common::api::steps::VipType;
    use foundry_host_utils::CommandOutput;

    const IP_ADDR_SHOW: &str = r#"[
        {
            "ifname": "ens3",
            "link_type": "ether",
            "address": "52:54:00:09:de:4c",
            "mtu": 1500,
            "addr_info": [
                {"family": "inet", "local": "192.168.111.20", "prefixlen": 24, "scope": "global"}
            ]
        }
    ]"#;

    fn args(vips: serde_json::Value) -> Vec<String> {
        vec![vips.to_string()]
    }

    #[tokio::test]
    async fn unclaimed_vips_verify() {
        let (ctx, fake) = test_context();
        fake.set_handler(Box::new(|command| {
            let line = command.line();
            if line == "ip -j addr show" {
                Ok(CommandOutput::success().set_stdout(IP_ADDR_SHOW))
            } else if line == "arping -D -c 2 -w 3 -I ens3 192.168.111.5" {
                // No reply: the address is free.
                Ok(CommandOutput::success())
            } else if line == "ping -c 3 -W 3 fd2e:6f44:5dd8:c956::16" {
                // No reply either.
                Ok(CommandOutput::failure(1))
            } else {
                panic!("unexpected command: {line}");
            }
        }));

        let action = VerifyVips::validate(&args(serde_json::json!([
            {"vip": "fd2e:6f44:5dd8:c956::16", "vip_type": "ingress"},
            {"vip": "192.168.111.5", "vip_type": "api"},
        ])))
        .unwrap();
        let output = action.run(&ctx, &ctx.log).await.unwrap();

        let response: VerifyVipsResponse =
            serde_json::from_str(&output.stdout).unwrap();
        assert_eq!(response.len(), 2);
        // Sorted: api before ingress.
        assert_eq!(response[0].vip_type, VipType::Api);
        assert_eq!(response[0].verification, VipVerification::Succeeded);
        assert_eq!(response[1].vip_type, VipType::Ingress);
        assert_eq!(response[1].verification, VipVerification::Succeeded);
    }

    #[tokio::test]
    async fn claimed_vips_fail_verification() {
        let (ctx, fake) = test_context();
        fake.set_handler(Box::new(|command| {
            let line = command.line();
            if line == "ip -j addr show" {
                Ok(CommandOutput::success().set_stdout(IP_ADDR_SHOW))
            } else if line.starts_with("arping") {
                // Somebody answered the DAD probe.
                Ok(CommandOutput::failure(1))
            } else {
                panic!("unexpected command: {line}");
            }
        }));

        let action = VerifyVips::validate(&args(serde_json::json!([
            {"vip": "192.168.111.5", "vip_type": "api"},
        ])))
        .unwrap();
        let output = action.run(&ctx, &ctx.log).await.unwrap();
        let response: VerifyVipsResponse =
            serde_json::from_str(&output.stdout).unwrap();
        assert_eq!(response[0].verification, VipVerification::Failed);
    }

    #[tokio::test]
    async fn dry_run_verifies_without_probing() {
        let (ctx, _fake) = crate::dispatch::test_helpers::dry_run_context();
        let action = VerifyVips::validate(&args(serde_json::json!([
            {"vip": "192.168.111.5", "vip_type": "api"},
        ])))
        .unwrap();
        let output = action.run(&ctx, &ctx.log).await.unwrap();
        let response: VerifyVipsResponse =
            serde_json::from_str(&output.stdout).unwrap();
        assert_eq!(response[0].verification, VipVerification::Succeeded);
    }
}
