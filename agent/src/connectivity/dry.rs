// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Checkers for `--dry-run` installs: no probes leave the machine and every
//! peer is reported reachable, so a simulated cluster converges.

use std::net::IpAddr;

use async_trait::async_trait;
use foundry_common::api::connectivity::{
    ConnectivityRemoteHost, L2Connectivity, L3Connectivity,
};
use foundry_host_utils::{BoxedExecutor, OutgoingNic};
use slog::Logger;

use super::{sort_l2, sort_l3, CheckAttributes, Checker, Features, Reporter};

pub struct DryL2Checker;

#[async_trait]
impl Checker for DryL2Checker {
    fn features(&self) -> Features {
        Features::REMOTE_IP | Features::REMOTE_MAC | Features::OUTGOING_NIC
    }

    async fn check(
        &self,
        _executor: &BoxedExecutor,
        _log: &Logger,
        attributes: &CheckAttributes,
    ) -> Option<Reporter> {
        let nic = attributes.outgoing_nic.as_ref()?;
        let record = L2Connectivity {
            outgoing_nic: nic.name.clone(),
            outgoing_ip_address: source_address(nic, attributes.remote_ip),
            remote_ip_address: attributes.remote_ip.to_string(),
            remote_mac: attributes.remote_mac.to_string(),
            successful: true,
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

pub struct DryL3Checker;

#[async_trait]
impl Checker for DryL3Checker {
    fn features(&self) -> Features {
        Features::REMOTE_IP
    }

    async fn check(
        &self,
        _executor: &BoxedExecutor,
        _log: &Logger,
        attributes: &CheckAttributes,
    ) -> Option<Reporter> {
        let record = L3Connectivity {
            remote_ip_address: attributes.remote_ip.to_string(),
            successful: true,
            average_rtt_ms: 0.0,
            packet_loss_percentage: 0.0,
        };
        Some(Box::new(move |report: &mut ConnectivityRemoteHost| {
            report.l3_connectivity.push(record);
            Ok(())
        }))
    }

    fn finalize(&self, report: &mut ConnectivityRemoteHost) {
        sort_l3(report);
    }
}

fn source_address(nic: &OutgoingNic, remote_ip: IpAddr) -> String {
    match remote_ip {
        IpAddr::V4(_) => nic
            .ipv4_addresses
            .first()
            .map(|net| net.addr().to_string())
            .unwrap_or_default(),
        IpAddr::V6(_) => nic
            .ipv6_addresses
            .first()
            .map(|net| net.addr().to_string())
            .unwrap_or_default(),
    }
}
