// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! L2 reachability for IPv4 peers via `arping`.

use std::net::IpAddr;
use std::sync::LazyLock;

use async_trait::async_trait;
use foundry_common::api::connectivity::{ConnectivityRemoteHost, L2Connectivity};
use foundry_common::api::MacAddr;
use foundry_host_utils::{BoxedExecutor, Command};
use regex::Regex;
use slog::{warn, Logger};

use super::{sort_l2, CheckAttributes, Checker, Features, Reporter};

/// `Unicast reply from 192.168.1.1 [74:D0:2B:1C:C6:42]  2.857ms`
static UNICAST_REPLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Unicast reply from ([\d.]+) \[([0-9a-fA-F:]+)\]").unwrap()
});

pub struct ArpingChecker;

#[async_trait]
impl Checker for ArpingChecker {
    fn features(&self) -> Features {
        Features::REMOTE_IP | Features::REMOTE_MAC | Features::OUTGOING_NIC
    }

    async fn check(
        &self,
        executor: &BoxedExecutor,
        log: &Logger,
        attributes: &CheckAttributes,
    ) -> Option<Reporter> {
        let IpAddr::V4(remote_ip) = attributes.remote_ip else {
            return None;
        };
        let nic = attributes.outgoing_nic.as_ref()?;
        if !nic.has_ipv4_addresses() {
            return None;
        }

        let command = Command::new("arping")
            .args(["-c", "10", "-w", "5", "-I", &nic.name])
            .arg(remote_ip.to_string());
        let output = match executor.execute(&command).await {
            Ok(output) => output,
            Err(err) => {
                warn!(
                    log,
                    "arping failed to run";
                    "remote_ip" => %remote_ip,
                    "nic" => &nic.name,
                    "err" => %err,
                );
                return None;
            }
        };
        // Exit 1 just means nothing answered within the deadline.
        if output.exit_code != 0 && output.exit_code != 1 {
            warn!(
                log,
                "arping failed";
                "remote_ip" => %remote_ip,
                "nic" => &nic.name,
                "exit_code" => output.exit_code,
            );
            return None;
        }

        let records = parse_replies(
            log,
            &output.stdout,
            &nic.name,
            &attributes.remote_macs,
        );
        if records.is_empty() {
            return None;
        }
        Some(Box::new(move |report: &mut ConnectivityRemoteHost| {
            report.l2_connectivity.extend(records);
            Ok(())
        }))
    }

    fn finalize(&self, report: &mut ConnectivityRemoteHost) {
        sort_l2(report);
    }
}

/// One record per distinct answering MAC. A reply from a MAC the peer never
/// advertised is recorded as unsuccessful: something else owns that address.
fn parse_replies(
    log: &Logger,
    stdout: &str,
    nic_name: &str,
    remote_macs: &[MacAddr],
) -> Vec<L2Connectivity> {
    // `ARPING 192.168.1.1 from 192.168.1.133 ens3`
    let outgoing_ip = stdout
        .lines()
        .find(|line| line.starts_with("ARPING"))
        .and_then(|line| line.split_whitespace().nth(3))
        .unwrap_or("")
        .to_string();

    let mut seen: Vec<MacAddr> = Vec::new();
    let mut records = Vec::new();
    for captures in UNICAST_REPLY.captures_iter(stdout) {
        let reply_ip = &captures[1];
        let raw_mac = &captures[2];
        let mac = match raw_mac.parse::<MacAddr>() {
            Ok(mac) => mac,
            Err(_) => {
                warn!(log, "skipping malformed reply MAC"; "mac" => raw_mac);
                continue;
            }
        };
        if seen.contains(&mac) {
            continue;
        }
        seen.push(mac);
        records.push(L2Connectivity {
            outgoing_nic: nic_name.to_string(),
            outgoing_ip_address: outgoing_ip.clone(),
            remote_ip_address: reply_ip.to_string(),
            remote_mac: mac.to_string(),
            successful: remote_macs.contains(&mac),
        });
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::test_helpers::test_log;
    use foundry_host_utils::{CommandOutput, FakeExecutor, OutgoingNic};

    const REPLIES: &str = "\
ARPING 192.168.1.1 from 192.168.1.133 ens3
Unicast reply from 192.168.1.1 [00:50:56:95:BA:55]  1.912ms
Unicast reply from 192.168.1.1 [74:D0:2B:1C:C6:42]  2.857ms
Unicast reply from 192.168.1.1 [74:D0:2B:1C:C6:42]  2.618ms
Sent 10 probes (1 broadcast(s))
Received 3 response(s)
";

    fn v4_nic() -> OutgoingNic {
        OutgoingNic {
            name: "ens3".to_string(),
            mac: "52:54:00:09:de:4c".parse().unwrap(),
            mtu: 1500,
            ipv4_addresses: vec!["192.168.1.133/24".parse().unwrap()],
            ipv6_addresses: Vec::new(),
        }
    }

    fn attributes(nic: Option<OutgoingNic>) -> CheckAttributes {
        CheckAttributes {
            remote_ip: "192.168.1.1".parse().unwrap(),
            remote_mac: "74:d0:2b:1c:c6:42".parse().unwrap(),
            remote_macs: vec!["74:d0:2b:1c:c6:42".parse().unwrap()],
            outgoing_nic: nic,
        }
    }

    #[tokio::test]
    async fn replies_dedup_and_attribute_by_advertised_mac() {
        let fake = FakeExecutor::new(test_log());
        fake.set_handler(Box::new(|command| {
            assert_eq!(command.line(), "arping -c 10 -w 5 -I ens3 192.168.1.1");
            // Replies came in, so arping exits 0.
            Ok(CommandOutput::success().set_stdout(REPLIES))
        }));
        let executor = fake.as_executor();
        let reporter = ArpingChecker
            .check(&executor, &test_log(), &attributes(Some(v4_nic())))
            .await
            .unwrap();
        let mut report = ConnectivityRemoteHost::new(
            "b7ce4af2-9b81-4fc5-a2bf-04a5c034f34b".parse().unwrap(),
        );
        reporter(&mut report).unwrap();
        ArpingChecker.finalize(&mut report);

        assert_eq!(
            report.l2_connectivity,
            vec![
                L2Connectivity {
                    outgoing_nic: "ens3".to_string(),
                    outgoing_ip_address: "192.168.1.133".to_string(),
                    remote_ip_address: "192.168.1.1".to_string(),
                    remote_mac: "00:50:56:95:ba:55".to_string(),
                    successful: false,
                },
                L2Connectivity {
                    outgoing_nic: "ens3".to_string(),
                    outgoing_ip_address: "192.168.1.133".to_string(),
                    remote_ip_address: "192.168.1.1".to_string(),
                    remote_mac: "74:d0:2b:1c:c6:42".to_string(),
                    successful: true,
                },
            ]
        );
    }

    #[tokio::test]
    async fn no_answer_yields_no_records() {
        let fake = FakeExecutor::new(test_log());
        fake.set_handler(Box::new(|_command| {
            Ok(CommandOutput::failure(1).set_stdout(
                "ARPING 192.168.1.1 from 192.168.1.133 ens3\n\
                 Sent 10 probes (10 broadcast(s))\n\
                 Received 0 response(s)\n",
            ))
        }));
        let executor = fake.as_executor();
        let reporter = ArpingChecker
            .check(&executor, &test_log(), &attributes(Some(v4_nic())))
            .await;
        assert!(reporter.is_none());
    }

    #[tokio::test]
    async fn ipv6_only_nic_is_skipped() {
        let nic = OutgoingNic {
            name: "ens4".to_string(),
            mac: "52:54:00:09:de:4d".parse().unwrap(),
            mtu: 1500,
            ipv4_addresses: Vec::new(),
            ipv6_addresses: vec!["fd00::5/64".parse().unwrap()],
        };
        // No handler: the checker must bail before running anything.
        let executor = FakeExecutor::new(test_log()).as_executor();
        let reporter = ArpingChecker
            .check(&executor, &test_log(), &attributes(Some(nic)))
            .await;
        assert!(reporter.is_none());
    }
}
