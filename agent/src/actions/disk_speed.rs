// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `installation-disk-speed-check`: measure fdatasync latency on the
//! installation disk with fio.
//!
//! WARNING: this writes to the raw device. The service only schedules it
//! before the installer touches the disk.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use camino::Utf8PathBuf;
use foundry_common::api::steps::{
    DiskSpeedCheckRequest, DiskSpeedCheckResponse,
};
use foundry_host_utils::{host_command, timed, Command, CommandOutput};
use slog::{info, Logger};

use crate::actions::{annotate_timeout, single_json_arg, Action};
use crate::dispatch::StepContext;

/// fio writes 22 MiB with an fdatasync per block; two minutes is generous
/// even for badly degraded media.
const FIO_TIMEOUT_SECONDS: u64 = 120;

#[derive(Debug)]
pub struct DiskSpeedCheck {
    path: Utf8PathBuf,
}

impl DiskSpeedCheck {
    pub fn validate(args: &[String]) -> Result<Self, anyhow::Error> {
        let request: DiskSpeedCheckRequest =
            single_json_arg(args, "disk speed check")?;
        if !request.path.as_str().starts_with("/dev/") {
            return Err(anyhow!(
                "disk speed check path {:?} is not a device",
                request.path
            ));
        }
        Ok(Self { path: request.path })
    }
}

#[async_trait]
impl Action for DiskSpeedCheck {
    async fn run(
        &self,
        ctx: &StepContext,
        log: &Logger,
    ) -> Result<CommandOutput, anyhow::Error> {
        if ctx.dry_run.is_some() {
            let response = DiskSpeedCheckResponse {
                path: self.path.clone(),
                io_sync_duration: 10,
            };
            return Ok(CommandOutput::success()
                .set_stdout(serde_json::to_string(&response)?));
        }

        let fio = timed(
            FIO_TIMEOUT_SECONDS,
            host_command(
                Command::new("fio")
                    .arg(format!("--filename={}", self.path))
                    .args([
                        "--size=22m",
                        "--bs=2300",
                        "--rw=write",
                        "--ioengine=sync",
                        "--fdatasync=1",
                        "--name=test",
                        "--output-format=json",
                    ]),
            ),
        );
        let output = ctx.executor.execute(&fio).await?;
        if !output.succeeded() {
            return Ok(annotate_timeout(output, FIO_TIMEOUT_SECONDS));
        }

        let duration_ms = parse_sync_duration(&output.stdout)?;
        info!(
            log, "disk speed check finished";
            "path" => self.path.as_str(),
            "p99_fdatasync_ms" => duration_ms,
        );
        let response = DiskSpeedCheckResponse {
            path: self.path.clone(),
            io_sync_duration: duration_ms,
        };
        Ok(CommandOutput::success()
            .set_stdout(serde_json::to_string(&response)?))
    }
}

/// Pull the 99th-percentile fdatasync latency out of fio's JSON and convert
/// nanoseconds to milliseconds.
fn parse_sync_duration(stdout: &str) -> Result<u64, anyhow::Error> {
    let report: serde_json::Value =
        serde_json::from_str(stdout).context("failed to parse fio output")?;
    let nanos = report
        .pointer("/jobs/0/sync/lat_ns/percentile/99.000000")
        .and_then(serde_json::Value::as_f64)
        .ok_or_else(|| anyhow!("fio output is missing sync latency"))?;
    Ok((nanos / 1_000_000.0) as u64)
}
