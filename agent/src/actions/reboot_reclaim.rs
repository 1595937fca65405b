// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `reboot-for-reclaim`: regenerate the host's bootloader config and
//! reboot into the discovery artifacts staged by `download-boot-artifacts`.
//!
//! The reply for this step races the reboot; the service tolerates never
//! hearing back.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use foundry_common::api::steps::RebootForReclaimRequest;
use foundry_host_utils::{host_command, Command, CommandOutput};
use slog::{info, Logger};

use crate::actions::{single_json_arg, Action};
use crate::dispatch::StepContext;

pub struct RebootForReclaim {
    request: RebootForReclaimRequest,
}

impl RebootForReclaim {
    pub fn validate(args: &[String]) -> Result<Self, anyhow::Error> {
        let request: RebootForReclaimRequest =
            single_json_arg(args, "reboot for reclaim")?;
        if !request.host_fs_mount_dir.is_absolute() {
            return Err(anyhow!(
                "host filesystem mount {:?} is not absolute",
                request.host_fs_mount_dir
            ));
        }
        Ok(Self { request })
    }
}

#[async_trait]
impl Action for RebootForReclaim {
    async fn run(
        &self,
        ctx: &StepContext,
        log: &Logger,
    ) -> Result<CommandOutput, anyhow::Error> {
        if let Some(dry_run) = &ctx.dry_run {
            let Some(marker) = &dry_run.fake_reboot_marker_path else {
                info!(log, "dry run without a reboot marker, doing nothing");
                return Ok(CommandOutput::success());
            };
            tokio::fs::write(marker, "rebooted\n")
                .await
                .with_context(|| format!("failed to write {marker}"))?;
            info!(log, "dry-run reboot recorded"; "marker" => %marker);
            return Ok(CommandOutput::success());
        }

        let regenerate = host_command(
            Command::new("chroot")
                .arg(self.request.host_fs_mount_dir.as_str())
                .args(["grub2-mkconfig", "-o", "/boot/grub2/grub.cfg"]),
        );
        let output = ctx.executor.execute(&regenerate).await?;
        if !output.succeeded() {
            return Ok(output);
        }

        info!(log, "bootloader config regenerated, rebooting");
        Ok(ctx
            .executor
            .execute(&host_command(
                Command::new("systemctl").arg("reboot"),
            ))
            .await?)
    }
}
