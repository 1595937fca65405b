// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed payloads carried inside step arguments and replies.
//!
//! Argument #0 of most steps is one of the `*Request` types, JSON-encoded.
//! A reply's `output` field carries the JSON encoding of the matching
//! `*Response` type. Field names and casing must track the service exactly.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::api::MacAddr;

/// Argument to `free-network-addresses`: the network CIDRs to scan.
pub type FreeAddressesRequest = Vec<String>;

/// Argument to `ntp-synchronizer`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NtpSynchronizationRequest {
    /// Additional NTP server to register before listing sources.
    #[serde(default)]
    pub ntp_source: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NtpSource {
    pub source_name: String,
    pub source_state: NtpSourceState,
}

/// Chrony source states, keyed off the mode column of `chronyc sources`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NtpSourceState {
    Synced,
    Combined,
    NotCombined,
    Error,
    Variable,
    Unreachable,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NtpSynchronizationResponse {
    pub ntp_sources: Vec<NtpSource>,
}

/// Argument to `installation-disk-speed-check`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiskSpeedCheckRequest {
    pub path: Utf8PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskSpeedCheckResponse {
    pub path: Utf8PathBuf,
    /// 99th-percentile fdatasync latency, in milliseconds.
    pub io_sync_duration: u64,
}

/// Argument to `api-vip-connectivity-check`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiVipConnectivityRequest {
    pub url: String,
    /// Legacy flag, retained for wire compatibility; ignored.
    #[serde(default)]
    pub verify_cidr: bool,
    #[serde(default)]
    pub request_headers: Vec<RequestHeader>,
    /// Bearer token for the ignition endpoint, sent as `Authorization`.
    #[serde(default)]
    pub ignition_endpoint_token: Option<String>,
    /// Extra CA bundle to trust for this fetch, base64-encoded PEM.
    #[serde(default)]
    pub ca_certificate: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    pub key: String,
    pub value: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiVipConnectivityResponse {
    pub ignition: String,
    pub is_success: bool,
}

/// Argument to `dhcp-lease-allocate`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DhcpAllocationRequest {
    pub interface: String,
    pub api_vip_mac: MacAddr,
    pub ingress_vip_mac: MacAddr,
    /// Previously-held leases, replayed so the DHCP server re-offers the
    /// same addresses across reboots. Empty on the first allocation.
    #[serde(default)]
    pub api_vip_lease: String,
    #[serde(default)]
    pub ingress_vip_lease: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DhcpAllocationResponse {
    pub api_vip_address: IpAddr,
    pub ingress_vip_address: IpAddr,
    #[serde(default)]
    pub api_vip_lease: String,
    #[serde(default)]
    pub ingress_vip_lease: String,
}

/// Argument to `domain-resolution`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DomainResolutionRequest {
    pub domains: Vec<DomainResolutionRequestDomain>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DomainResolutionRequestDomain {
    pub domain_name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainResolutionResponse {
    pub resolutions: Vec<DomainResolution>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainResolution {
    pub domain_name: String,
    #[serde(default)]
    pub ipv4_addresses: Vec<Ipv4Addr>,
    #[serde(default)]
    pub ipv6_addresses: Vec<Ipv6Addr>,
}

/// Argument to `container-image-availability`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageAvailabilityRequest {
    pub images: Vec<String>,
    /// Per-image pull budget, in seconds.
    #[serde(default = "default_pull_timeout")]
    pub timeout: u64,
}

fn default_pull_timeout() -> u64 {
    300
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImagePullResult {
    Success,
    Failure,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContainerImageAvailability {
    pub name: String,
    pub result: ImagePullResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    /// Wall-clock pull time, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    /// Bytes per second, derived from the two fields above.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_rate: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageAvailabilityResponse {
    pub images: Vec<ContainerImageAvailability>,
}

/// Argument to `upgrade-agent`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpgradeAgentRequest {
    pub agent_image: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeAgentResult {
    Success,
    Failure,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpgradeAgentResponse {
    pub agent_image: String,
    pub result: UpgradeAgentResult,
}

/// Argument to `download-boot-artifacts`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadBootArtifactsRequest {
    pub kernel_url: String,
    pub initrd_url: String,
    pub rootfs_url: String,
    /// Where the host's root filesystem is mounted, as seen from the host
    /// mount namespace.
    pub host_fs_mount_dir: Utf8PathBuf,
}

/// Argument to `reboot-for-reclaim`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RebootForReclaimRequest {
    pub host_fs_mount_dir: Utf8PathBuf,
}

/// Argument to `tang-connectivity-check`. `tang_servers` is itself a
/// JSON-encoded array of [`TangServer`]; the service stores it that way.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TangConnectivityRequest {
    pub tang_servers: String,
}

impl TangConnectivityRequest {
    /// Decode the nested server list.
    pub fn servers(&self) -> Result<Vec<TangServer>, serde_json::Error> {
        serde_json::from_str(&self.tang_servers)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TangServer {
    pub url: String,
    #[serde(default)]
    pub thumbprint: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TangServerResponse {
    pub tang_url: String,
    /// The raw advertisement body returned by the server.
    pub payload: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TangConnectivityResponse {
    pub is_success: bool,
    pub tang_server_response: Vec<TangServerResponse>,
}

/// One VIP the service wants verified as still unclaimed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerifyVip {
    pub vip: IpAddr,
    pub vip_type: VipType,
}

pub type VerifyVipsRequest = Vec<VerifyVip>;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum VipType {
    Api,
    Ingress,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VipVerification {
    Succeeded,
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerifiedVip {
    pub vip: IpAddr,
    pub vip_type: VipType,
    pub verification: VipVerification,
}

pub type VerifyVipsResponse = Vec<VerifiedVip>;
