// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! L2 reachability for IPv6 peers.
//!
//! There is no arping for IPv6; an `nmap` neighbor-discovery ping scan in
//! XML mode reports the MAC that answered instead.

use std::net::IpAddr;

use async_trait::async_trait;
use foundry_common::api::connectivity::{ConnectivityRemoteHost, L2Connectivity};
use foundry_common::api::MacAddr;
use foundry_host_utils::{BoxedExecutor, Command};
use serde::Deserialize;
use slog::{warn, Logger};

use super::{sort_l2, CheckAttributes, Checker, Features, Reporter};

#[derive(Debug, Deserialize)]
struct NmapRun {
    #[serde(default, rename = "host")]
    hosts: Vec<NmapHost>,
}

#[derive(Debug, Deserialize)]
struct NmapHost {
    status: Option<NmapStatus>,
    #[serde(default, rename = "address")]
    addresses: Vec<NmapAddress>,
}

#[derive(Debug, Deserialize)]
struct NmapStatus {
    #[serde(rename = "@state")]
    state: String,
}

#[derive(Debug, Deserialize)]
struct NmapAddress {
    #[serde(rename = "@addr")]
    addr: String,
    #[serde(rename = "@addrtype")]
    addrtype: String,
}

pub struct NmapChecker;

#[async_trait]
impl Checker for NmapChecker {
    fn features(&self) -> Features {
        Features::REMOTE_IP | Features::REMOTE_MAC | Features::OUTGOING_NIC
    }

    async fn check(
        &self,
        executor: &BoxedExecutor,
        log: &Logger,
        attributes: &CheckAttributes,
    ) -> Option<Reporter> {
        let IpAddr::V6(remote_ip) = attributes.remote_ip else {
            return None;
        };
        let nic = attributes.outgoing_nic.as_ref()?;
        if !nic.has_ipv6_addresses() {
            return None;
        }

        let command = Command::new("nmap")
            .args(["-6", "-sn", "-n", "-oX", "-", "-e", &nic.name])
            .arg(remote_ip.to_string());
        let output = match executor.execute(&command).await {
            Ok(output) => output,
            Err(err) => {
                warn!(
                    log,
                    "nmap failed to run";
                    "remote_ip" => %remote_ip,
                    "nic" => &nic.name,
                    "err" => %err,
                );
                return None;
            }
        };
        if !output.succeeded() {
            warn!(
                log,
                "nmap failed";
                "remote_ip" => %remote_ip,
                "nic" => &nic.name,
                "exit_code" => output.exit_code,
            );
            return None;
        }

        let run: NmapRun = match quick_xml::de::from_str(&output.stdout) {
            Ok(run) => run,
            Err(err) => {
                warn!(
                    log,
                    "nmap produced unparseable XML";
                    "remote_ip" => %remote_ip,
                    "err" => %err,
                );
                return None;
            }
        };

        let mac = answering_mac(log, &run)?;
        let record = L2Connectivity {
            outgoing_nic: nic.name.clone(),
            outgoing_ip_address: String::new(),
            remote_ip_address: remote_ip.to_string(),
            remote_mac: mac.to_string(),
            successful: attributes.remote_macs.contains(&mac),
        };
        Some(Box::new(move |report: &mut ConnectivityRemoteHost| {
            report.l2_connectivity.push(record);
            Ok(())
        }))
    }

    fn finalize(&self, report: &mut ConnectivityRemoteHost) {
        sort_l2(report);
    }
}

/// The MAC attached to the first host nmap saw as up, if any.
fn answering_mac(log: &Logger, run: &NmapRun) -> Option<MacAddr> {
    for host in &run.hosts {
        let up = host
            .status
            .as_ref()
            .map(|status| status.state == "up")
            .unwrap_or(false);
        if !up {
            continue;
        }
        for address in &host.addresses {
            if address.addrtype != "mac" {
                continue;
            }
            match address.addr.parse::<MacAddr>() {
                Ok(mac) => return Some(mac),
                Err(_) => {
                    warn!(
                        log,
                        "skipping malformed nmap MAC";
                        "mac" => &address.addr,
                    );
                }
            }
        }
    }
    None
}
