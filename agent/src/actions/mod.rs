// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The closed set of actions the service can request.
//!
//! Every action follows the same two-phase contract: [`plan`] validates the
//! step arguments without touching the host, and [`Action::run`] performs
//! the work. Anything interpolated into a privileged command line must be
//! vetted here first; the quoting helpers are a second line, not the
//! defense.

mod api_vip;
mod boot_artifacts;
mod connectivity_check;
mod dhcp_lease;
mod disk_speed;
mod domain_resolution;
mod free_addresses;
mod image_availability;
mod inventory;
mod logs_gather;
mod ntp;
mod reboot_reclaim;
mod stop_installation;
mod tang;
mod upgrade;
mod verify_vips;

use std::sync::LazyLock;

use anyhow::{bail, Context};
use async_trait::async_trait;
use foundry_common::api::StepType;
use foundry_host_utils::CommandOutput;
use regex::Regex;
use serde::de::DeserializeOwned;
use slog::Logger;

use crate::dispatch::StepContext;

/// One validated, executable step.
#[async_trait]
pub trait Action: Send + Sync {
    /// Execute. A returned `CommandOutput` becomes the reply verbatim
    /// (including non-zero exit codes); an `Err` is classified as an
    /// internal failure and replied with exit code `-1`.
    async fn run(
        &self,
        ctx: &StepContext,
        log: &Logger,
    ) -> Result<CommandOutput, anyhow::Error>;
}

/// Construct the action for a step, validating its arguments. Errors are
/// validation failures, replied with exit code `-1`.
pub fn plan(
    step_type: StepType,
    args: &[String],
) -> Result<Box<dyn Action>, anyhow::Error> {
    let action: Box<dyn Action> = match step_type {
        StepType::ApiVipConnectivityCheck => {
            Box::new(api_vip::ApiVipConnectivityCheck::validate(args)?)
        }
        StepType::ConnectivityCheck => {
            Box::new(connectivity_check::ConnectivityCheck::validate(args)?)
        }
        StepType::ContainerImageAvailability => {
            Box::new(image_availability::ImageAvailability::validate(args)?)
        }
        StepType::DhcpLeaseAllocate => {
            Box::new(dhcp_lease::DhcpLeaseAllocate::validate(args)?)
        }
        StepType::DomainResolution => {
            Box::new(domain_resolution::DomainResolution::validate(args)?)
        }
        StepType::DownloadBootArtifacts => {
            Box::new(boot_artifacts::DownloadBootArtifacts::validate(args)?)
        }
        StepType::FreeNetworkAddresses => {
            Box::new(free_addresses::FreeAddresses::validate(args)?)
        }
        StepType::InstallationDiskSpeedCheck => {
            Box::new(disk_speed::DiskSpeedCheck::validate(args)?)
        }
        StepType::Inventory => Box::new(inventory::Inventory::validate(args)?),
        StepType::LogsGather => {
            Box::new(logs_gather::LogsGather::validate(args)?)
        }
        StepType::NtpSynchronizer => {
            Box::new(ntp::NtpSynchronizer::validate(args)?)
        }
        StepType::RebootForReclaim => {
            Box::new(reboot_reclaim::RebootForReclaim::validate(args)?)
        }
        StepType::StopInstallation => {
            Box::new(stop_installation::StopInstallation::validate(args)?)
        }
        StepType::TangConnectivityCheck => {
            Box::new(tang::TangConnectivityCheck::validate(args)?)
        }
        StepType::UpgradeAgent => {
            Box::new(upgrade::UpgradeAgent::validate(args)?)
        }
        StepType::VerifyVips => {
            Box::new(verify_vips::VerifyVips::validate(args)?)
        }
    };
    Ok(action)
}

/// Deserialize the single JSON argument an action expects.
fn single_json_arg<T: DeserializeOwned>(
    args: &[String],
    what: &str,
) -> Result<T, anyhow::Error> {
    let [raw] = args else {
        bail!("expected 1 argument, got {}", args.len());
    };
    serde_json::from_str(raw)
        .with_context(|| format!("failed to parse {what} request"))
}

fn no_args(args: &[String]) -> Result<(), anyhow::Error> {
    if !args.is_empty() {
        bail!("expected no arguments, got {}", args.len());
    }
    Ok(())
}

/// Container image references as podman accepts them: registry, repository,
/// optional tag or digest. Notably free of shell metacharacters.
static IMAGE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9._/:@-]*$").unwrap()
});

pub fn is_valid_image_reference(image: &str) -> bool {
    IMAGE_REFERENCE.is_match(image)
}

fn require_image_reference(image: &str) -> Result<(), anyhow::Error> {
    if !is_valid_image_reference(image) {
        bail!("invalid image reference {image:?}");
    }
    Ok(())
}

/// Hostnames, IPv4, or bracketless IPv6 literals.
static HOST_OR_IP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9._:-]*$").unwrap()
});

fn require_host_or_ip(value: &str, what: &str) -> Result<(), anyhow::Error> {
    if !HOST_OR_IP.is_match(value) {
        bail!("invalid {what} {value:?}");
    }
    Ok(())
}

/// Interface names as the kernel allows them.
static INTERFACE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_.-]{1,15}$").unwrap());

fn require_interface_name(value: &str) -> Result<(), anyhow::Error> {
    if !INTERFACE_NAME.is_match(value) {
        bail!("invalid interface name {value:?}");
    }
    Ok(())
}

fn require_http_url(value: &str, what: &str) -> Result<(), anyhow::Error> {
    let url = url::Url::parse(value)
        .with_context(|| format!("invalid {what} {value:?}"))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        bail!("{what} {value:?} must be http or https");
    }
    Ok(())
}

/// Replace the stderr of a `timeout`-terminated command with the
/// conventional message; other outputs pass through untouched.
fn annotate_timeout(mut output: CommandOutput, seconds: u64) -> CommandOutput {
    if output.timed_out() {
        output.stderr = format!("timed out after {seconds} s");
    }
    output
}
