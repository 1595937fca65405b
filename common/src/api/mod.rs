// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wire model for the Foundry service API.
//!
//! These types mirror the service's OpenAPI models field for field; the
//! service owns the schema and the agent follows it. Everything here is plain
//! serde data. Behavior (validation, dispatch, probing) lives in the agent.

pub mod connectivity;
pub mod steps;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A MAC address as it appears on the wire: lower-case, colon-separated.
///
/// Wraps [`macaddr::MacAddr6`] so equality works on the raw bytes (and is
/// therefore case-insensitive) while serialization always produces the
/// canonical lower-case form the service stores.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddr(pub macaddr::MacAddr6);

impl FromStr for MacAddr {
    type Err = macaddr::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(MacAddr)
    }
}

impl TryFrom<String> for MacAddr {
    type Error = macaddr::ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddr> for String {
    fn from(mac: MacAddr) -> String {
        mac.to_string()
    }
}

impl std::ops::Deref for MacAddr {
    type Target = macaddr::MacAddr6;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // `MacAddr6` formats upper-case; the service stores lower-case.
        let formatted = self.0.to_string().to_lowercase();
        f.write_str(&formatted)
    }
}

/// Every instruction kind the service can hand to the agent.
///
/// The wire carries step types as free-form strings (see [`Step`]); the
/// dispatcher parses them into this closed set and rejects anything else
/// with a `-1` reply.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum StepType {
    ApiVipConnectivityCheck,
    ConnectivityCheck,
    ContainerImageAvailability,
    DhcpLeaseAllocate,
    DomainResolution,
    DownloadBootArtifacts,
    FreeNetworkAddresses,
    InstallationDiskSpeedCheck,
    Inventory,
    LogsGather,
    NtpSynchronizer,
    RebootForReclaim,
    StopInstallation,
    TangConnectivityCheck,
    UpgradeAgent,
    VerifyVips,
}

impl StepType {
    pub const ALL: [StepType; 16] = [
        StepType::ApiVipConnectivityCheck,
        StepType::ConnectivityCheck,
        StepType::ContainerImageAvailability,
        StepType::DhcpLeaseAllocate,
        StepType::DomainResolution,
        StepType::DownloadBootArtifacts,
        StepType::FreeNetworkAddresses,
        StepType::InstallationDiskSpeedCheck,
        StepType::Inventory,
        StepType::LogsGather,
        StepType::NtpSynchronizer,
        StepType::RebootForReclaim,
        StepType::StopInstallation,
        StepType::TangConnectivityCheck,
        StepType::UpgradeAgent,
        StepType::VerifyVips,
    ];

    /// The wire name for this step type.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::ApiVipConnectivityCheck => "api-vip-connectivity-check",
            StepType::ConnectivityCheck => "connectivity-check",
            StepType::ContainerImageAvailability => {
                "container-image-availability"
            }
            StepType::DhcpLeaseAllocate => "dhcp-lease-allocate",
            StepType::DomainResolution => "domain-resolution",
            StepType::DownloadBootArtifacts => "download-boot-artifacts",
            StepType::FreeNetworkAddresses => "free-network-addresses",
            StepType::InstallationDiskSpeedCheck => {
                "installation-disk-speed-check"
            }
            StepType::Inventory => "inventory",
            StepType::LogsGather => "logs-gather",
            StepType::NtpSynchronizer => "ntp-synchronizer",
            StepType::RebootForReclaim => "reboot-for-reclaim",
            StepType::StopInstallation => "stop-installation",
            StepType::TangConnectivityCheck => "tang-connectivity-check",
            StepType::UpgradeAgent => "upgrade-agent",
            StepType::VerifyVips => "verify-vips",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepType {
    type Err = UnknownStepType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepType::ALL
            .iter()
            .find(|step_type| step_type.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownStepType(s.to_string()))
    }
}

/// Error returned when parsing a step type the agent does not know.
#[derive(Clone, Debug, thiserror::Error)]
#[error("unknown step type \"{0}\"")]
pub struct UnknownStepType(pub String);

/// One directive from the service.
///
/// `step_type` stays a string here: the service may know step types this
/// agent version does not, and the reply must echo the original value even
/// then.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub step_type: String,
    pub step_id: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// The agent's answer to one [`Step`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReply {
    pub step_type: String,
    pub step_id: String,
    pub exit_code: i64,
    pub output: String,
    pub error: String,
}

/// What the polling loop should do once the current envelope is handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStepAction {
    Continue,
    Exit,
}

/// What `GetNextSteps` returns.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StepsEnvelope {
    /// Pacing hint: how long to wait before the next poll.
    #[serde(default)]
    pub next_instruction_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_step_action: Option<PostStepAction>,
    #[serde(default)]
    pub instructions: Vec<Step>,
}

/// Body of `Register`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub host_id: Uuid,
    pub discovery_agent_version: String,
}

/// Successful `Register` response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub host_id: Uuid,
    /// Legacy field: how an external runner would be told to launch the
    /// step loop. This agent is the runner, so the field is informational.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step_runner_command: Option<NextStepRunnerCommand>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NextStepRunnerCommand {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub retry_seconds: Option<u32>,
}
