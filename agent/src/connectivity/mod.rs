// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The connectivity-check engine.
//!
//! The service sends a plan: peer hosts, each with NICs, MACs, and
//! addresses. For every peer address the engine fans out one probe per
//! checker (and per local NIC, for checkers that care which interface they
//! leave through). Probes run in parallel per host; their observations come
//! back as [`Reporter`] closures applied by a single consumer, so the host
//! report is never written concurrently. Checkers sort what they produced
//! in `finalize`, which makes the report deterministic however the probes
//! interleaved -- the service diffs successive reports textually and must
//! not see phantom changes.

mod arping;
mod dry;
mod mtu;
mod nmap;
mod ping;

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use foundry_common::api::connectivity::{
    ConnectivityCheckHost, ConnectivityRemoteHost, ConnectivityReport,
};
use foundry_common::api::MacAddr;
use foundry_host_utils::{BoxedExecutor, OutgoingNic};
use slog::{o, warn, Logger};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

pub use arping::ArpingChecker;
pub use dry::{DryL2Checker, DryL3Checker};
pub use mtu::MtuChecker;
pub use nmap::NmapChecker;
pub use ping::PingChecker;

bitflags::bitflags! {
    /// What the engine must supply for each invocation of a checker.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Features: u8 {
        const REMOTE_IP = 1 << 0;
        const REMOTE_MAC = 1 << 1;
        /// Fan the probe out once per local NIC.
        const OUTGOING_NIC = 1 << 2;
    }
}

/// One probe opportunity.
#[derive(Clone, Debug)]
pub struct CheckAttributes {
    pub remote_ip: IpAddr,
    /// MAC advertised for the NIC that owns `remote_ip`.
    pub remote_mac: MacAddr,
    /// Every MAC the peer host advertises, for answer attribution.
    pub remote_macs: Vec<MacAddr>,
    /// Present iff the checker asked for [`Features::OUTGOING_NIC`].
    pub outgoing_nic: Option<OutgoingNic>,
}

/// A deferred observation: applied to the peer's report by the engine's
/// single consumer.
pub type Reporter =
    Box<dyn FnOnce(&mut ConnectivityRemoteHost) -> Result<(), anyhow::Error> + Send>;

#[async_trait]
pub trait Checker: Send + Sync {
    fn features(&self) -> Features;

    /// Probe once. `None` means "nothing to record": the probe did not
    /// apply (wrong address family, unusable NIC) or its answer carries no
    /// information.
    async fn check(
        &self,
        executor: &BoxedExecutor,
        log: &Logger,
        attributes: &CheckAttributes,
    ) -> Option<Reporter>;

    /// Order everything this checker contributed to `report`.
    fn finalize(&self, report: &mut ConnectivityRemoteHost);
}

pub fn production_checkers() -> Vec<Arc<dyn Checker>> {
    vec![
        Arc::new(PingChecker),
        Arc::new(ArpingChecker),
        Arc::new(NmapChecker),
        Arc::new(MtuChecker),
    ]
}

/// Checkers for `--dry-run`: no probes leave the machine, every peer
/// "answers".
pub fn dry_run_checkers() -> Vec<Arc<dyn Checker>> {
    vec![Arc::new(DryL2Checker), Arc::new(DryL3Checker)]
}

/// Run the plan and aggregate per-host reports, plus any reporter errors
/// (worth surfacing, not worth failing the step).
pub async fn build_report(
    executor: &BoxedExecutor,
    log: &Logger,
    plan: &[ConnectivityCheckHost],
    nics: &[OutgoingNic],
    checkers: &[Arc<dyn Checker>],
) -> (ConnectivityReport, Vec<String>) {
    let mut tasks = JoinSet::new();
    for host in plan {
        let executor = executor.clone();
        let log = log.new(o!("remote_host_id" => host.host_id.to_string()));
        let host = host.clone();
        let nics = nics.to_vec();
        let checkers = checkers.to_vec();
        tasks.spawn(async move {
            check_host(executor, log, host, nics, checkers).await
        });
    }

    let mut hosts = Vec::new();
    let mut errors = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((host, mut errs)) => {
                hosts.push(host);
                errors.append(&mut errs);
            }
            Err(err) => errors.push(format!("host check task failed: {err}")),
        }
    }
    hosts.sort_by_key(|host| host.host_id);
    (ConnectivityReport { remote_hosts: hosts }, errors)
}

async fn check_host(
    executor: BoxedExecutor,
    log: Logger,
    host: ConnectivityCheckHost,
    nics: Vec<OutgoingNic>,
    checkers: Vec<Arc<dyn Checker>>,
) -> (ConnectivityRemoteHost, Vec<String>) {
    let mut report = ConnectivityRemoteHost::new(host.host_id);
    let remote_macs: Vec<MacAddr> =
        host.nics.iter().map(|nic| nic.mac).collect();

    let (tx, mut rx) = mpsc::unbounded_channel::<Reporter>();
    let mut probes = JoinSet::new();
    for nic in &host.nics {
        for cidr in &nic.ip_addresses {
            let Some(remote_ip) = ip_part(&log, cidr) else { continue };
            for checker in &checkers {
                let fan_out: Vec<Option<OutgoingNic>> =
                    if checker.features().contains(Features::OUTGOING_NIC) {
                        nics.iter().cloned().map(Some).collect()
                    } else {
                        vec![None]
                    };
                for outgoing_nic in fan_out {
                    let attributes = CheckAttributes {
                        remote_ip,
                        remote_mac: nic.mac,
                        remote_macs: remote_macs.clone(),
                        outgoing_nic,
                    };
                    let checker = checker.clone();
                    let executor = executor.clone();
                    let log = log.clone();
                    let tx = tx.clone();
                    probes.spawn(async move {
                        if let Some(reporter) = checker
                            .check(&executor, &log, &attributes)
                            .await
                        {
                            // The receiver outlives every probe.
                            let _ = tx.send(reporter);
                        }
                    });
                }
            }
        }
    }
    drop(tx);

    // Sole consumer: observations land one at a time, in arrival order.
    // Arrival order is racy; finalize imposes the real one.
    let mut errors = Vec::new();
    while let Some(reporter) = rx.recv().await {
        if let Err(err) = reporter(&mut report) {
            warn!(log, "reporter failed"; "err" => format!("{err:#}"));
            errors.push(format!("{err:#}"));
        }
    }
    while probes.join_next().await.is_some() {}

    for checker in &checkers {
        checker.finalize(&mut report);
    }
    (report, errors)
}

fn ip_part(log: &Logger, cidr: &str) -> Option<IpAddr> {
    let raw = cidr.split('/').next().unwrap_or(cidr);
    match raw.parse::<IpAddr>() {
        Ok(ip) => Some(ip),
        Err(_) => {
            warn!(log, "skipping unparseable peer address"; "address" => cidr);
            None
        }
    }
}

pub(crate) fn sort_l2(report: &mut ConnectivityRemoteHost) {
    report.l2_connectivity.sort_by(|a, b| {
        (
            a.remote_ip_address.as_str(),
            a.remote_mac.as_str(),
            a.outgoing_nic.as_str(),
            a.outgoing_ip_address.as_str(),
        )
            .cmp(&(
                b.remote_ip_address.as_str(),
                b.remote_mac.as_str(),
                b.outgoing_nic.as_str(),
                b.outgoing_ip_address.as_str(),
            ))
    });
}

pub(crate) fn sort_l3(report: &mut ConnectivityRemoteHost) {
    report
        .l3_connectivity
        .sort_by(|a, b| a.remote_ip_address.cmp(&b.remote_ip_address));
}

pub(crate) fn sort_mtu(report: &mut ConnectivityRemoteHost) {
    report.mtu_report.sort_by(|a, b| {
        (a.remote_ip_address.as_str(), a.outgoing_nic.as_str())
            .cmp(&(b.remote_ip_address.as_str(), b.outgoing_nic.as_str()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::test_helpers::test_log;
    use foundry_common::api::connectivity::ConnectivityCheckNic;
    use foundry_host_utils::FakeExecutor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn local_nic(name: &str, mac: &str, v4: &[&str]) -> OutgoingNic {
        OutgoingNic {
            name: name.to_string(),
            mac: mac.parse().unwrap(),
            mtu: 1500,
            ipv4_addresses: v4.iter().map(|a| a.parse().unwrap()).collect(),
            ipv6_addresses: Vec::new(),
        }
    }

    fn peer(host_id: &str, ips: &[&str]) -> ConnectivityCheckHost {
        ConnectivityCheckHost {
            host_id: host_id.parse().unwrap(),
            nics: vec![ConnectivityCheckNic {
                name: "ens3".to_string(),
                mac: "74:d0:2b:1c:c6:42".parse().unwrap(),
                ip_addresses: ips.iter().map(|s| s.to_string()).collect(),
            }],
        }
    }

    struct CountingChecker {
        features: Features,
        invocations: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Checker for CountingChecker {
        fn features(&self) -> Features {
            self.features
        }

        async fn check(
            &self,
            _executor: &BoxedExecutor,
            _log: &Logger,
            _attributes: &CheckAttributes,
        ) -> Option<Reporter> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            None
        }

        fn finalize(&self, _report: &mut ConnectivityRemoteHost) {}
    }

    async fn run_counting(features: Features) -> usize {
        let invocations = Arc::new(AtomicUsize::new(0));
        let checkers: Vec<Arc<dyn Checker>> = vec![Arc::new(CountingChecker {
            features,
            invocations: invocations.clone(),
        })];
        let executor = FakeExecutor::new(test_log()).as_executor();
        let nics = vec![
            local_nic("ens3", "52:54:00:09:de:4c", &["192.168.1.133/24"]),
            local_nic("ens4", "52:54:00:09:de:4d", &["10.0.0.5/24"]),
        ];
        let plan = vec![peer(
            "b7ce4af2-9b81-4fc5-a2bf-04a5c034f34b",
            &["192.168.1.1/24", "10.0.0.1/24"],
        )];
        build_report(&executor, &test_log(), &plan, &nics, &checkers).await;
        invocations.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn probes_run_once_per_remote_address() {
        assert_eq!(run_counting(Features::REMOTE_IP).await, 2);
    }

    #[tokio::test]
    async fn nic_checkers_fan_out_per_local_nic() {
        assert_eq!(
            run_counting(Features::REMOTE_IP | Features::OUTGOING_NIC).await,
            4
        );
    }

    #[tokio::test]
    async fn unparseable_addresses_are_skipped() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let checkers: Vec<Arc<dyn Checker>> = vec![Arc::new(CountingChecker {
            features: Features::REMOTE_IP,
            invocations: invocations.clone(),
        })];
        let executor = FakeExecutor::new(test_log()).as_executor();
        let plan = vec![peer(
            "b7ce4af2-9b81-4fc5-a2bf-04a5c034f34b",
            &["not-an-address", "", "192.168.1.1/24"],
        )];
        build_report(&executor, &test_log(), &plan, &[], &checkers).await;
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    struct FailingReporterChecker;

    #[async_trait]
    impl Checker for FailingReporterChecker {
        fn features(&self) -> Features {
            Features::REMOTE_IP
        }

        async fn check(
            &self,
            _executor: &BoxedExecutor,
            _log: &Logger,
            _attributes: &CheckAttributes,
        ) -> Option<Reporter> {
            Some(Box::new(|_report| Err(anyhow::anyhow!("scribe dropped pen"))))
        }

        fn finalize(&self, _report: &mut ConnectivityRemoteHost) {}
    }

    #[tokio::test]
    async fn reporter_errors_accumulate_without_failing() {
        let checkers: Vec<Arc<dyn Checker>> =
            vec![Arc::new(FailingReporterChecker)];
        let executor = FakeExecutor::new(test_log()).as_executor();
        let plan =
            vec![peer("b7ce4af2-9b81-4fc5-a2bf-04a5c034f34b", &["10.0.0.1/24"])];
        let (report, errors) =
            build_report(&executor, &test_log(), &plan, &[], &checkers).await;
        assert_eq!(report.remote_hosts.len(), 1);
        assert_eq!(errors, vec!["scribe dropped pen".to_string()]);
    }

    #[tokio::test]
    async fn hosts_sort_by_id_regardless_of_completion_order() {
        let checkers = dry_run_checkers();
        let executor = FakeExecutor::new(test_log()).as_executor();
        let nics =
            vec![local_nic("ens3", "52:54:00:09:de:4c", &["192.168.1.133/24"])];
        // Deliberately unsorted.
        let plan = vec![
            peer("ffffffff-0000-0000-0000-000000000001", &["192.168.1.2/24"]),
            peer("00000000-0000-0000-0000-000000000002", &["192.168.1.1/24"]),
        ];
        let (report, errors) =
            build_report(&executor, &test_log(), &plan, &nics, &checkers).await;
        assert!(errors.is_empty());
        let ids: Vec<Uuid> =
            report.remote_hosts.iter().map(|h| h.host_id).collect();
        assert_eq!(
            ids,
            vec![
                "00000000-0000-0000-0000-000000000002".parse::<Uuid>().unwrap(),
                "ffffffff-0000-0000-0000-000000000001".parse::<Uuid>().unwrap(),
            ]
        );
    }

    #[tokio::test]
    async fn identical_runs_serialize_identically() {
        let checkers = dry_run_checkers();
        let executor = FakeExecutor::new(test_log()).as_executor();
        let nics = vec![
            local_nic("ens3", "52:54:00:09:de:4c", &["192.168.1.133/24"]),
            local_nic("ens4", "52:54:00:09:de:4d", &["192.168.1.134/24"]),
        ];
        let plan = vec![
            peer(
                "b7ce4af2-9b81-4fc5-a2bf-04a5c034f34b",
                &["192.168.1.1/24", "192.168.1.9/24"],
            ),
            peer("00000000-0000-0000-0000-000000000002", &["192.168.1.2/24"]),
        ];

        let (first, _) =
            build_report(&executor, &test_log(), &plan, &nics, &checkers).await;
        let (second, _) =
            build_report(&executor, &test_log(), &plan, &nics, &checkers).await;
        let first = serde_json::to_string_pretty(&first).unwrap();
        let second = serde_json::to_string_pretty(&second).unwrap();
        assert_eq!(first, second);
        expectorate::assert_contents(
            "tests/output/connectivity-report-dry-run.json",
            &first,
        );
    }
}
