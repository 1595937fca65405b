// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Agent command line and derived configuration.

use std::time::Duration;

use anyhow::{anyhow, Context};
use camino::Utf8PathBuf;
use clap::Parser;
use foundry_common::api::MacAddr;
use slog::{debug, Logger};
use uuid::Uuid;

/// Stable identifier sources, in preference order, for hosts that were not
/// given an explicit id.
const PRODUCT_UUID_PATH: &str = "/sys/class/dmi/id/product_uuid";
const MACHINE_ID_PATH: &str = "/etc/machine-id";

#[derive(Clone, Debug, Parser)]
#[command(name = "foundry-agent", version)]
pub struct Config {
    /// Base URL of the Foundry service, including any path prefix.
    #[arg(long)]
    pub url: String,

    /// Infra-env this host registers under.
    #[arg(long)]
    pub infra_env_id: Uuid,

    /// Version reported to the service at registration.
    #[arg(long, default_value = "latest")]
    pub agent_version: String,

    /// Base retry interval in seconds for registration attempts.
    #[arg(long, default_value_t = 60)]
    pub interval: u64,

    /// Use this host id instead of deriving one from the hardware.
    #[arg(long)]
    pub host_id: Option<Uuid>,

    /// Path to an additional CA certificate bundle (PEM).
    #[arg(long)]
    pub cacert: Option<Utf8PathBuf>,

    /// Skip TLS certificate verification.
    #[arg(long)]
    pub insecure: bool,

    /// Pull secret presented to the service as `X-Secret-Key`.
    #[arg(long, env = "PULL_SECRET_TOKEN", hide_env_values = true)]
    pub pull_secret_token: String,

    /// Container image holding this agent's helpers (inventory, scanners).
    #[arg(long, env = "AGENT_IMAGE")]
    pub agent_image: Option<String>,

    #[arg(
        long,
        default_value_t = true,
        action = clap::ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true",
    )]
    pub with_journal_logging: bool,

    #[arg(
        long,
        default_value_t = true,
        action = clap::ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true",
    )]
    pub with_text_logging: bool,

    #[arg(
        long,
        default_value_t = false,
        action = clap::ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true",
    )]
    pub with_stdout_logging: bool,

    /// Load-test mode: skip real probes and produce synthetic results.
    #[arg(long, requires = "force_id", requires = "force_mac")]
    pub dry_run: bool,

    /// Host id to impersonate in dry-run mode.
    #[arg(long, requires = "dry_run")]
    pub force_id: Option<Uuid>,

    /// MAC address to impersonate in dry-run mode.
    #[arg(long, requires = "dry_run")]
    pub force_mac: Option<MacAddr>,

    /// Where `reboot-for-reclaim` records that it would have rebooted, in
    /// dry-run mode.
    #[arg(long, requires = "dry_run")]
    pub fake_reboot_marker_path: Option<Utf8PathBuf>,
}

/// Dry-run knobs, present only when `--dry-run` was given.
#[derive(Clone, Debug)]
pub struct DryRunConfig {
    pub forced_host_id: Uuid,
    pub forced_mac: MacAddr,
    pub fake_reboot_marker_path: Option<Utf8PathBuf>,
}

impl Config {
    /// Checks the flag combinations clap cannot express. Errors here are
    /// argument errors and exit with the usage code.
    pub fn validate(&self) -> Result<(), String> {
        if let Err(err) = url::Url::parse(&self.url) {
            return Err(format!("invalid --url {:?}: {}", self.url, err));
        }
        if let Some(image) = &self.agent_image {
            if !crate::actions::is_valid_image_reference(image) {
                return Err(format!(
                    "AGENT_IMAGE {:?} is not a valid image reference",
                    image
                ));
            }
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn dry_run_config(&self) -> Option<DryRunConfig> {
        if !self.dry_run {
            return None;
        }
        // clap enforces that both forced values accompany --dry-run.
        match (self.force_id, self.force_mac) {
            (Some(forced_host_id), Some(forced_mac)) => Some(DryRunConfig {
                forced_host_id,
                forced_mac,
                fake_reboot_marker_path: self.fake_reboot_marker_path.clone(),
            }),
            _ => None,
        }
    }
}

/// Settle the host id the agent registers as. Priority: operator override,
/// dry-run forced id, firmware product UUID, and finally a UUID derived
/// from the machine id. Each source is stable across reboots.
pub fn determine_host_id(
    config: &Config,
    log: &Logger,
) -> Result<Uuid, anyhow::Error> {
    if let Some(host_id) = config.host_id {
        debug!(log, "using host id from the command line"; "host_id" => %host_id);
        return Ok(host_id);
    }
    if let Some(dry_run) = config.dry_run_config() {
        debug!(
            log, "using forced dry-run host id";
            "host_id" => %dry_run.forced_host_id,
        );
        return Ok(dry_run.forced_host_id);
    }

    match std::fs::read_to_string(PRODUCT_UUID_PATH) {
        Ok(raw) => {
            let host_id = raw
                .trim()
                .parse::<Uuid>()
                .with_context(|| format!("parsing {PRODUCT_UUID_PATH}"))?;
            debug!(log, "derived host id from product UUID"; "host_id" => %host_id);
            return Ok(host_id);
        }
        Err(err) => {
            debug!(
                log, "product UUID unavailable";
                "path" => PRODUCT_UUID_PATH,
                "err" => %err,
            );
        }
    }

    let machine_id = std::fs::read_to_string(MACHINE_ID_PATH)
        .with_context(|| format!("reading {MACHINE_ID_PATH}"))?;
    let machine_id = machine_id.trim();
    if machine_id.is_empty() {
        return Err(anyhow!("{MACHINE_ID_PATH} is empty"));
    }
    let host_id = host_id_from_machine_id(machine_id);
    debug!(log, "derived host id from machine id"; "host_id" => %host_id);
    Ok(host_id)
}

fn host_id_from_machine_id(machine_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, machine_id.as_bytes())
}
