// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! L3 reachability via `ping`.

use std::net::IpAddr;
use std::sync::LazyLock;

use async_trait::async_trait;
use foundry_common::api::connectivity::{ConnectivityRemoteHost, L3Connectivity};
use foundry_host_utils::{BoxedExecutor, Command};
use regex::Regex;
use slog::{warn, Logger};

use super::{sort_l3, CheckAttributes, Checker, Features, Reporter};

static PACKET_LOSS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\d.]+)% packet loss").unwrap());
static AVERAGE_RTT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"rtt min/avg/max/mdev = [\d.]+/([\d.]+)/").unwrap()
});

pub struct PingChecker;

#[async_trait]
impl Checker for PingChecker {
    fn features(&self) -> Features {
        Features::REMOTE_IP
    }

    async fn check(
        &self,
        executor: &BoxedExecutor,
        log: &Logger,
        attributes: &CheckAttributes,
    ) -> Option<Reporter> {
        let remote_ip = attributes.remote_ip;
        // ping exits 0 as long as any probe was answered; partial loss
        // still counts as reachable, the loss figure tells the story.
        let command = Command::new("ping")
            .args(["-c", "10", "-W", "3"])
            .arg(remote_ip.to_string());
        let record = match executor.execute(&command).await {
            Ok(output) if output.succeeded() => {
                match parse_statistics(&output.stdout) {
                    Some((average_rtt_ms, packet_loss_percentage)) => {
                        L3Connectivity {
                            remote_ip_address: remote_ip.to_string(),
                            successful: true,
                            average_rtt_ms,
                            packet_loss_percentage,
                        }
                    }
                    None => {
                        warn!(
                            log,
                            "ping reported no statistics";
                            "remote_ip" => %remote_ip,
                        );
                        unreachable_record(remote_ip)
                    }
                }
            }
            Ok(_) => unreachable_record(remote_ip),
            Err(err) => {
                warn!(
                    log,
                    "ping failed to run";
                    "remote_ip" => %remote_ip,
                    "err" => %err,
                );
                unreachable_record(remote_ip)
            }
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

fn unreachable_record(remote_ip: IpAddr) -> L3Connectivity {
    L3Connectivity {
        remote_ip_address: remote_ip.to_string(),
        successful: false,
        average_rtt_ms: 0.0,
        packet_loss_percentage: 0.0,
    }
}

fn parse_statistics(stdout: &str) -> Option<(f64, f64)> {
    let loss = PACKET_LOSS
        .captures(stdout)?
        .get(1)?
        .as_str()
        .parse::<f64>()
        .ok()?;
    let rtt = AVERAGE_RTT
        .captures(stdout)?
        .get(1)?
        .as_str()
        .parse::<f64>()
        .ok()?;
    Some((rtt, loss))
}
