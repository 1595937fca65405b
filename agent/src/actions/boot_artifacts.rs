// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `download-boot-artifacts`: stage a discovery kernel and initrd on the
//! host and add a bootloader entry for them.
//!
//! First half of host reclaim; `reboot-for-reclaim` finishes the job. The
//! rootfs is not downloaded: its URL goes into the kernel command line and
//! the live system fetches it at boot.

use anyhow::anyhow;
use async_trait::async_trait;
use camino::Utf8PathBuf;
use foundry_common::api::steps::DownloadBootArtifactsRequest;
use foundry_host_utils::{
    host_command, quote, timed, Command, CommandOutput,
};
use slog::{info, Logger};

use crate::actions::{
    annotate_timeout, require_http_url, single_json_arg, Action,
};
use crate::dispatch::StepContext;

/// Download staging area on the host.
const STAGING_DIR: &str = "/tmp/boot";
const DOWNLOAD_TIMEOUT_SECONDS: u64 = 300;

#[derive(Debug)]
pub struct DownloadBootArtifacts {
    request: DownloadBootArtifactsRequest,
}

impl DownloadBootArtifacts {
    pub fn validate(args: &[String]) -> Result<Self, anyhow::Error> {
        let request: DownloadBootArtifactsRequest =
            single_json_arg(args, "boot artifact download")?;
        require_http_url(&request.kernel_url, "kernel URL")?;
        require_http_url(&request.initrd_url, "initrd URL")?;
        require_http_url(&request.rootfs_url, "rootfs URL")?;
        if !request.host_fs_mount_dir.is_absolute() {
            return Err(anyhow!(
                "host filesystem mount {:?} is not absolute",
                request.host_fs_mount_dir
            ));
        }
        Ok(Self { request })
    }

    fn bootloader_entry(&self) -> String {
        format!(
            "title Foundry Discovery\n\
             linux /discovery/vmlinuz\n\
             initrd /discovery/initrd.img\n\
             options random.trust_cpu=on rd.neednet=1 \
             coreos.live.rootfs_url={}\n",
            self.request.rootfs_url
        )
    }
}

#[async_trait]
impl Action for DownloadBootArtifacts {
    async fn run(
        &self,
        ctx: &StepContext,
        log: &Logger,
    ) -> Result<CommandOutput, anyhow::Error> {
        let boot_dir = self.request.host_fs_mount_dir.join("boot");

        let stage =
            host_command(Command::new("mkdir").args(["-p", STAGING_DIR]));
        let output = ctx.executor.execute(&stage).await?;
        if !output.succeeded() {
            return Ok(output);
        }

        for (name, url) in [
            ("vmlinuz", &self.request.kernel_url),
            ("initrd.img", &self.request.initrd_url),
        ] {
            let download = timed(
                DOWNLOAD_TIMEOUT_SECONDS,
                host_command(
                    Command::new("curl")
                        .args(["-s", "-S", "-o"])
                        .arg(format!("{STAGING_DIR}/{name}"))
                        .arg(url),
                ),
            );
            let output = annotate_timeout(
                ctx.executor.execute(&download).await?,
                DOWNLOAD_TIMEOUT_SECONDS,
            );
            if !output.succeeded() {
                return Ok(output);
            }
            info!(log, "boot artifact downloaded"; "artifact" => name);
        }

        // /boot usually mounts read-only once installation finishes.
        let remount = host_command(
            Command::new("mount")
                .args(["-o", "remount,rw"])
                .arg(boot_dir.as_str()),
        );
        let output = ctx.executor.execute(&remount).await?;
        if !output.succeeded() {
            return Ok(output);
        }

        let artifact_dir = boot_dir.join("discovery");
        let place = host_command(
            Command::new("mkdir").arg("-p").arg(artifact_dir.as_str()),
        );
        let output = ctx.executor.execute(&place).await?;
        if !output.succeeded() {
            return Ok(output);
        }
        let mv = host_command(
            Command::new("mv")
                .arg(format!("{STAGING_DIR}/vmlinuz"))
                .arg(format!("{STAGING_DIR}/initrd.img"))
                .arg(artifact_dir.as_str()),
        );
        let output = ctx.executor.execute(&mv).await?;
        if !output.succeeded() {
            return Ok(output);
        }

        let entry_dir = boot_dir.join("loader/entries");
        let entry_path = entry_dir.join("discovery.conf");
        let output = ctx
            .executor
            .execute(&write_via_shell(
                &entry_dir,
                &entry_path,
                &self.bootloader_entry(),
            ))
            .await?;
        if output.succeeded() {
            info!(log, "bootloader entry written"; "path" => %entry_path);
        }
        Ok(output)
    }
}

/// Write `content` to `path` on the host. There is no file API across the
/// namespace boundary, so this goes through `sh -c` with every interpolated
/// word quoted.
fn write_via_shell(
    dir: &Utf8PathBuf,
    path: &Utf8PathBuf,
    content: &str,
) -> Command {
    let script = format!(
        "mkdir -p {} && printf '%s' {} > {}",
        quote(dir.as_str()),
        quote(content),
        quote(path.as_str()),
    );
    host_command(Command::new("sh").args(["-c"]).arg(script))
}
