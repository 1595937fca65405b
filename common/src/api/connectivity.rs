// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connectivity-check plan and report models.
//!
//! The request side describes the peer hosts the service wants probed. The
//! report side is what the engine sends back; the service diffs successive
//! reports textually, so every list is sorted before serialization (the
//! engine owns that ordering contract) and addresses stay strings on the
//! wire.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::MacAddr;

/// One peer host the service wants this agent to probe.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectivityCheckHost {
    pub host_id: Uuid,
    #[serde(default)]
    pub nics: Vec<ConnectivityCheckNic>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectivityCheckNic {
    pub name: String,
    pub mac: MacAddr,
    /// CIDR-notation addresses advertised for this NIC.
    #[serde(default)]
    pub ip_addresses: Vec<String>,
}

pub type ConnectivityCheckRequest = Vec<ConnectivityCheckHost>;

/// One ARP/NDP observation: did `remote_mac` answer for `remote_ip_address`
/// when probed out of `outgoing_nic`?
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct L2Connectivity {
    pub outgoing_nic: String,
    pub outgoing_ip_address: String,
    pub remote_ip_address: String,
    pub remote_mac: String,
    pub successful: bool,
}

/// Ping statistics for one remote IP.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct L3Connectivity {
    pub remote_ip_address: String,
    pub successful: bool,
    #[serde(default)]
    pub average_rtt_ms: f64,
    #[serde(default)]
    pub packet_loss_percentage: f64,
}

/// MTU verdict for one (outgoing NIC, remote IP) pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MtuReport {
    pub outgoing_nic: String,
    pub remote_ip_address: String,
    pub mtu_successful: bool,
}

/// Aggregated result for one peer host.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectivityRemoteHost {
    pub host_id: Uuid,
    #[serde(default)]
    pub l2_connectivity: Vec<L2Connectivity>,
    #[serde(default)]
    pub l3_connectivity: Vec<L3Connectivity>,
    #[serde(default)]
    pub mtu_report: Vec<MtuReport>,
}

impl ConnectivityRemoteHost {
    pub fn new(host_id: Uuid) -> Self {
        Self {
            host_id,
            l2_connectivity: Vec::new(),
            l3_connectivity: Vec::new(),
            mtu_report: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConnectivityReport {
    pub remote_hosts: Vec<ConnectivityRemoteHost>,
}
