// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `logs-gather`: bundle journal and kernel logs and ship them to the
//! service.
//!
//! Collection is best-effort. A log source that fails to dump is skipped;
//! only a failed tar or upload fails the step.

use anyhow::Context;
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use foundry_host_utils::{host_command, Command, CommandOutput};
use slog::{info, warn, Logger};

use crate::actions::{no_args, Action};
use crate::dispatch::StepContext;

const ARCHIVE_PATH: &str = "/var/log/logs.tar.gz";

pub struct LogsGather;

impl LogsGather {
    pub fn validate(args: &[String]) -> Result<Self, anyhow::Error> {
        no_args(args)?;
        Ok(Self)
    }

    async fn run_with_paths(
        &self,
        ctx: &StepContext,
        log: &Logger,
        staging: &Utf8Path,
        archive: &Utf8Path,
    ) -> Result<CommandOutput, anyhow::Error> {
        tokio::fs::create_dir_all(staging)
            .await
            .with_context(|| format!("failed to create {staging}"))?;

        let sources: [(&str, Command); 2] = [
            (
                "journal.log",
                Command::new("journalctl").args(["--no-pager", "--all"]),
            ),
            ("dmesg.log", Command::new("dmesg")),
        ];
        for (name, command) in sources {
            match ctx.executor.execute(&host_command(command)).await {
                Ok(output) if output.succeeded() => {
                    tokio::fs::write(staging.join(name), &output.stdout)
                        .await
                        .with_context(|| format!("failed to write {name}"))?;
                }
                Ok(output) => {
                    warn!(
                        log, "log source failed, skipping";
                        "source" => name,
                        "exit_code" => output.exit_code,
                    );
                }
                Err(err) => {
                    warn!(
                        log, "log source failed to run, skipping";
                        "source" => name, "err" => %err,
                    );
                }
            }
        }

        // The archive must contain a directory named for the host, so tar
        // from the staging parent.
        let parent = staging.parent().unwrap_or(Utf8Path::new("/"));
        let member = staging.file_name().unwrap_or("logs");
        let tar = host_command(
            Command::new("tar")
                .arg("-C")
                .arg(parent.as_str())
                .args(["-czf", archive.as_str(), member]),
        );
        let output = ctx.executor.execute(&tar).await?;
        if !output.succeeded() {
            cleanup(log, staging, archive).await;
            return Ok(output);
        }

        let uploaded = ctx.client.upload_logs(archive).await;
        cleanup(log, staging, archive).await;
        uploaded.context("failed to upload logs")?;
        info!(log, "logs uploaded");
        Ok(CommandOutput::success())
    }
}

async fn cleanup(log: &Logger, staging: &Utf8Path, archive: &Utf8Path) {
    if let Err(err) = tokio::fs::remove_dir_all(staging).await {
        warn!(log, "failed to remove staging dir"; "err" => %err);
    }
    match tokio::fs::remove_file(archive).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            warn!(log, "failed to remove archive"; "err" => %err);
        }
    }
}

#[async_trait]
impl Action for LogsGather {
    async fn run(
        &self,
        ctx: &StepContext,
        log: &Logger,
    ) -> Result<CommandOutput, anyhow::Error> {
        let staging = Utf8PathBuf::from(format!(
            "/var/log/logs_host_{}",
            ctx.client.host_id()
        ));
        self.run_with_paths(ctx, log, &staging, Utf8Path::new(ARCHIVE_PATH))
            .await
    }
}
