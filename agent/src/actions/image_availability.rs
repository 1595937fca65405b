// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `container-image-availability`: pre-pull release images and measure how
//! fast they came down.
//!
//! Pulls are serialized behind a process-wide permit. A second request
//! arriving while one runs answers immediately with an empty success; the
//! service treats that as "still working" and asks again later.

use std::time::Instant;

use async_trait::async_trait;
use foundry_common::api::steps::{
    ContainerImageAvailability, ImageAvailabilityRequest,
    ImageAvailabilityResponse, ImagePullResult,
};
use foundry_host_utils::{host_command, timed, Command, CommandOutput};
use slog::{info, warn, Logger};

use crate::actions::{
    annotate_timeout, require_image_reference, single_json_arg, Action,
};
use crate::dispatch::StepContext;

#[derive(Debug)]
pub struct ImageAvailability {
    request: ImageAvailabilityRequest,
}

impl ImageAvailability {
    pub fn validate(args: &[String]) -> Result<Self, anyhow::Error> {
        let request: ImageAvailabilityRequest =
            single_json_arg(args, "image availability")?;
        for image in &request.images {
            require_image_reference(image)?;
        }
        Ok(Self { request })
    }
}

#[async_trait]
impl Action for ImageAvailability {
    async fn run(
        &self,
        ctx: &StepContext,
        log: &Logger,
    ) -> Result<CommandOutput, anyhow::Error> {
        let Ok(_permit) = ctx.singletons.image_availability.try_acquire()
        else {
            info!(log, "image availability check already running, skipping");
            return Ok(CommandOutput::success());
        };

        let mut images = Vec::new();
        let mut errors = Vec::new();
        for image in &self.request.images {
            images.push(
                pull_one(ctx, log, image, self.request.timeout, &mut errors)
                    .await?,
            );
        }

        let response = ImageAvailabilityResponse { images };
        Ok(CommandOutput::success()
            .set_stdout(serde_json::to_string(&response)?)
            .set_stderr(errors.join("\n")))
    }
}

async fn pull_one(
    ctx: &StepContext,
    log: &Logger,
    image: &str,
    timeout: u64,
    errors: &mut Vec<String>,
) -> Result<ContainerImageAvailability, anyhow::Error> {
    let pull =
        timed(timeout, host_command(Command::new("podman").arg("pull").arg(image)));
    let started = Instant::now();
    let output =
        annotate_timeout(ctx.executor.execute(&pull).await?, timeout);
    let elapsed = started.elapsed().as_secs_f64();

    if !output.succeeded() {
        warn!(
            log, "image pull failed";
            "image" => image,
            "exit_code" => output.exit_code,
            "stderr" => &output.stderr,
        );
        errors.push(format!("pull of {image} failed: {}", output.stderr));
        return Ok(ContainerImageAvailability {
            name: image.to_string(),
            result: ImagePullResult::Failure,
            size_bytes: None,
            time: None,
            download_rate: None,
        });
    }

    let inspect = host_command(
        Command::new("podman")
            .args(["image", "inspect"])
            .arg(image)
            .args(["--format", "{{.Size}}"]),
    );
    let size_bytes = match ctx.executor.execute(&inspect).await {
        Ok(inspected) if inspected.succeeded() => {
            inspected.stdout.trim().parse::<u64>().ok()
        }
        _ => None,
    };

    let download_rate = match size_bytes {
        Some(size) if elapsed > f64::EPSILON => Some(size as f64 / elapsed),
        _ => None,
    };
    info!(
        log, "image pulled";
        "image" => image,
        "seconds" => elapsed,
        "size_bytes" => ?size_bytes,
    );
    Ok(ContainerImageAvailability {
        name: image.to_string(),
        result: ImagePullResult::Success,
        size_bytes,
        time: Some(elapsed),
        download_rate,
    })
}
