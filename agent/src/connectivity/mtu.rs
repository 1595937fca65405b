// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Path-MTU verification for jumbo-frame NICs.
//!
//! A NIC configured above the standard 1500 only works if the path to each
//! peer actually carries frames that size. We ping with don't-fragment
//! packets padded to the local MTU; if the small control ping gets through
//! but the padded one does not, the path drops jumbo frames.

use std::net::IpAddr;

use async_trait::async_trait;
use foundry_common::api::connectivity::{ConnectivityRemoteHost, MtuReport};
use foundry_host_utils::{BoxedExecutor, Command, OutgoingNic};
use slog::{warn, Logger};

use super::{sort_mtu, CheckAttributes, Checker, Features, Reporter};

const STANDARD_MTU: u32 = 1500;

// IP header plus ICMP echo header.
const V4_OVERHEAD: u32 = 28;
const V6_OVERHEAD: u32 = 48;

pub struct MtuChecker;

#[async_trait]
impl Checker for MtuChecker {
    fn features(&self) -> Features {
        Features::OUTGOING_NIC
    }

    async fn check(
        &self,
        executor: &BoxedExecutor,
        log: &Logger,
        attributes: &CheckAttributes,
    ) -> Option<Reporter> {
        let nic = attributes.outgoing_nic.as_ref()?;
        if nic.mtu == STANDARD_MTU {
            return None;
        }
        let remote_ip = attributes.remote_ip;
        let (sources, overhead): (Vec<String>, u32) = match remote_ip {
            IpAddr::V4(_) => (
                nic.ipv4_addresses
                    .iter()
                    .map(|net| net.addr().to_string())
                    .collect(),
                V4_OVERHEAD,
            ),
            IpAddr::V6(_) => (
                nic.ipv6_addresses
                    .iter()
                    .map(|net| net.addr().to_string())
                    .collect(),
                V6_OVERHEAD,
            ),
        };

        let payload = nic.mtu.saturating_sub(overhead);
        let mut records = Vec::new();
        for source in &sources {
            // A small ping first: if that already fails the peer is plain
            // unreachable from this address and MTU proves nothing.
            let control = Command::new("ping")
                .args(["-c", "3", "-W", "3", "-I", source])
                .arg(remote_ip.to_string());
            match executor.execute(&control).await {
                Ok(output) if output.succeeded() => {}
                Ok(_) => continue,
                Err(err) => {
                    warn!(
                        log,
                        "MTU control ping failed to run";
                        "remote_ip" => %remote_ip,
                        "err" => %err,
                    );
                    continue;
                }
            }

            let padded = Command::new("ping")
                .args(["-c", "3", "-W", "3", "-I", source])
                .args(["-M", "do", "-s", &payload.to_string()])
                .arg(remote_ip.to_string());
            match executor.execute(&padded).await {
                Ok(output) => {
                    records.push(record_for(nic, remote_ip, output.succeeded()));
                }
                Err(err) => {
                    warn!(
                        log,
                        "MTU padded ping failed to run";
                        "remote_ip" => %remote_ip,
                        "err" => %err,
                    );
                }
            }
        }

        if records.is_empty() {
            return None;
        }
        Some(Box::new(move |report: &mut ConnectivityRemoteHost| {
            report.mtu_report.extend(records);
            Ok(())
        }))
    }

    fn finalize(&self, report: &mut ConnectivityRemoteHost) {
        sort_mtu(report);
    }
}

fn record_for(
    nic: &OutgoingNic,
    remote_ip: IpAddr,
    mtu_successful: bool,
) -> MtuReport {
    MtuReport {
        outgoing_nic: nic.name.clone(),
        remote_ip_address: remote_ip.to_string(),
        mtu_successful,
    }
}
