// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Enumerates the local interfaces usable as probe sources.
//!
//! The source of truth is iproute2's JSON output (`ip -j addr show`), which
//! keeps the agent out of netlink bindings and means fakes can feed fixture
//! output through the same [`Executor`] the probes use.
//!
//! [`Executor`]: crate::executor::Executor

use std::net::IpAddr;

use ipnet::{Ipv4Net, Ipv6Net};
use serde::Deserialize;
use slog::{debug, warn, Logger};

use crate::command::Command;
use crate::executor::{BoxedExecutor, ExecutionError};
use foundry_common::api::MacAddr;

/// A local network interface suitable as a probe source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingNic {
    pub name: String,
    pub mac: MacAddr,
    pub mtu: u32,
    /// Addresses with their prefixes, host bits preserved.
    pub ipv4_addresses: Vec<Ipv4Net>,
    pub ipv6_addresses: Vec<Ipv6Net>,
}

impl OutgoingNic {
    pub fn has_ipv4_addresses(&self) -> bool {
        !self.ipv4_addresses.is_empty()
    }

    pub fn has_ipv6_addresses(&self) -> bool {
        !self.ipv6_addresses.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InterfaceError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("listing interfaces failed with exit code {exit_code}: {stderr}")]
    Listing { exit_code: i32, stderr: String },

    #[error("could not parse `{command}` output: {err}")]
    Parse {
        command: &'static str,
        #[source]
        err: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
struct IpLink {
    ifname: String,
    #[serde(default)]
    mtu: u32,
    link_type: String,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    addr_info: Vec<IpAddrInfo>,
    #[serde(default)]
    linkinfo: Option<IpLinkInfo>,
}

#[derive(Debug, Deserialize)]
struct IpAddrInfo {
    family: String,
    local: IpAddr,
    prefixlen: u8,
    #[serde(default)]
    scope: String,
}

#[derive(Debug, Deserialize)]
struct IpLinkInfo {
    #[serde(default)]
    info_kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IpRoute {
    dst: String,
}

/// Enumerate interfaces fit to source probes: physical, bond, or VLAN links
/// carrying at least one usable address. Everything else -- loopback,
/// bridges, veths, addressless bond slaves -- is excluded, both because
/// probing through them is meaningless and because ARP traffic on an
/// enslaved interface poisons the host's neighbor table.
pub async fn list_outgoing_nics(
    executor: &BoxedExecutor,
    log: &Logger,
) -> Result<Vec<OutgoingNic>, InterfaceError> {
    let output = executor
        .execute(&Command::new("ip").args(["-j", "addr", "show"]))
        .await?;
    if !output.succeeded() {
        return Err(InterfaceError::Listing {
            exit_code: output.exit_code,
            stderr: output.stderr,
        });
    }
    let links: Vec<IpLink> = serde_json::from_str(&output.stdout)
        .map_err(|err| InterfaceError::Parse { command: "ip -j addr show", err })?;

    let mut nics = Vec::new();
    for link in links {
        if !is_probe_source(&link) {
            continue;
        }
        let Some(mac) =
            link.address.as_deref().and_then(|a| a.parse::<MacAddr>().ok())
        else {
            debug!(log, "skipping interface without a MAC"; "ifname" => &link.ifname);
            continue;
        };
        let (ipv4_addresses, mut ipv6_addresses) = collect_addresses(&link);
        if ipv4_addresses.is_empty() && ipv6_addresses.is_empty() {
            continue;
        }
        enrich_ipv6_prefixes(executor, log, &link.ifname, &mut ipv6_addresses)
            .await;
        nics.push(OutgoingNic {
            name: link.ifname,
            mac,
            mtu: link.mtu,
            ipv4_addresses,
            ipv6_addresses,
        });
    }
    debug!(log, "enumerated outgoing NICs"; "count" => nics.len());
    Ok(nics)
}

fn is_probe_source(link: &IpLink) -> bool {
    // `loopback`, tunnels, and everything else non-ethernet is out.
    if link.link_type != "ether" {
        return false;
    }
    match link.linkinfo.as_ref().and_then(|info| info.info_kind.as_deref()) {
        // Plain physical NICs carry no linkinfo kind at all.
        None => true,
        Some("bond") | Some("vlan") => true,
        Some(_) => false,
    }
}

fn collect_addresses(link: &IpLink) -> (Vec<Ipv4Net>, Vec<Ipv6Net>) {
    let mut ipv4 = Vec::new();
    let mut ipv6 = Vec::new();
    for info in &link.addr_info {
        // Link-local and host-scope addresses are not usable probe sources.
        if info.scope == "link" || info.scope == "host" {
            continue;
        }
        match (info.family.as_str(), info.local) {
            ("inet", IpAddr::V4(addr)) => {
                if let Ok(net) = Ipv4Net::new(addr, info.prefixlen) {
                    ipv4.push(net);
                }
            }
            ("inet6", IpAddr::V6(addr)) => {
                if let Ok(net) = Ipv6Net::new(addr, info.prefixlen) {
                    ipv6.push(net);
                }
            }
            _ => {}
        }
    }
    (ipv4, ipv6)
}

/// SLAAC addresses surface as /128. Recover the on-link prefix length from
/// the router-advertised route covering the address, so remote-host family
/// matching sees the real network.
async fn enrich_ipv6_prefixes(
    executor: &BoxedExecutor,
    log: &Logger,
    ifname: &str,
    addresses: &mut [Ipv6Net],
) {
    if !addresses.iter().any(|net| net.prefix_len() == 128) {
        return;
    }
    let command = Command::new("ip")
        .args(["-j", "-6", "route", "show", "dev"])
        .arg(ifname)
        .args(["proto", "ra"]);
    let output = match executor.execute(&command).await {
        Ok(output) if output.succeeded() => output,
        Ok(output) => {
            warn!(
                log,
                "listing RA routes failed";
                "ifname" => ifname,
                "exit_code" => output.exit_code,
            );
            return;
        }
        Err(err) => {
            warn!(log, "listing RA routes failed"; "ifname" => ifname, "err" => %err);
            return;
        }
    };
    let routes: Vec<IpRoute> = match serde_json::from_str(&output.stdout) {
        Ok(routes) => routes,
        Err(err) => {
            warn!(log, "could not parse RA routes"; "ifname" => ifname, "err" => %err);
            return;
        }
    };

    for address in addresses.iter_mut() {
        if address.prefix_len() != 128 {
            continue;
        }
        for route in &routes {
            // Non-CIDR destinations ("default") simply fail to parse.
            let Ok(prefix) = route.dst.parse::<Ipv6Net>() else {
                continue;
            };
            if prefix.contains(&address.addr()) {
                if let Ok(replaced) =
                    Ipv6Net::new(address.addr(), prefix.prefix_len())
                {
                    *address = replaced;
                }
                break;
            }
        }
    }
}

/// Load-test mode runs many simulated agents on one fabric; forcing the MAC
/// on a single v4-capable interface and dropping the rest keeps those
/// simulated hosts from advertising duplicate MACs.
pub fn apply_forced_mac(
    nics: Vec<OutgoingNic>,
    mac: MacAddr,
) -> Vec<OutgoingNic> {
    match nics.into_iter().find(|nic| nic.has_ipv4_addresses()) {
        Some(mut nic) => {
            nic.mac = mac;
            vec![nic]
        }
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{CommandSequence, FakeExecutor};

    const IP_ADDR_FIXTURE: &str = r#"[
        {
            "ifindex": 1, "ifname": "lo", "flags": ["LOOPBACK", "UP"],
            "mtu": 65536, "link_type": "loopback",
            "addr_info": [
                {"family": "inet", "local": "127.0.0.1", "prefixlen": 8, "scope": "host"}
            ]
        },
        {
            "ifindex": 2, "ifname": "ens3", "flags": ["BROADCAST", "MULTICAST", "UP"],
            "mtu": 1500, "link_type": "ether", "address": "52:54:00:09:de:2a",
            "addr_info": [
                {"family": "inet", "local": "192.168.1.133", "prefixlen": 24, "scope": "global"},
                {"family": "inet6", "local": "fe80::5054:ff:fe09:de2a", "prefixlen": 64, "scope": "link"}
            ]
        },
        {
            "ifindex": 3, "ifname": "bond0", "flags": ["BROADCAST", "MASTER", "UP"],
            "mtu": 9000, "link_type": "ether", "address": "52:54:00:aa:bb:cc",
            "linkinfo": {"info_kind": "bond"},
            "addr_info": [
                {"family": "inet", "local": "10.0.0.7", "prefixlen": 16, "scope": "global"}
            ]
        },
        {
            "ifindex": 4, "ifname": "ens4", "flags": ["BROADCAST", "MULTICAST", "UP"],
            "mtu": 1500, "link_type": "ether", "address": "52:54:00:11:22:33",
            "addr_info": [
                {"family": "inet6", "local": "2001:db8:1::21", "prefixlen": 128, "scope": "global"}
            ]
        },
        {
            "ifindex": 5, "ifname": "veth0", "flags": ["BROADCAST", "UP"],
            "mtu": 1500, "link_type": "ether", "address": "aa:bb:cc:dd:ee:ff",
            "linkinfo": {"info_kind": "veth"},
            "addr_info": [
                {"family": "inet", "local": "172.17.0.2", "prefixlen": 16, "scope": "global"}
            ]
        },
        {
            "ifindex": 6, "ifname": "ens5", "flags": ["BROADCAST", "SLAVE", "UP"],
            "mtu": 9000, "link_type": "ether", "address": "52:54:00:aa:bb:cc",
            "addr_info": []
        }
    ]"#;

    const RA_ROUTE_FIXTURE: &str = r#"[
        {"dst": "default", "gateway": "fe80::1", "dev": "ens4", "protocol": "ra", "metric": 100},
        {"dst": "2001:db8:1::/64", "dev": "ens4", "protocol": "ra", "metric": 100}
    ]"#;

    fn test_log() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    async fn enumerate_fixture() -> Vec<OutgoingNic> {
        let executor = FakeExecutor::new(test_log());
        let mut sequence = CommandSequence::new();
        sequence.expect_ok("ip -j addr show", IP_ADDR_FIXTURE);
        sequence.expect_ok(
            "ip -j -6 route show dev ens4 proto ra",
            RA_ROUTE_FIXTURE,
        );
        sequence.register(&executor);
        let executor = executor.as_executor();
        list_outgoing_nics(&executor, &test_log()).await.unwrap()
    }

    #[tokio::test]
    async fn filters_to_probe_source_roles() {
        let nics = enumerate_fixture().await;
        let names: Vec<_> = nics.iter().map(|nic| nic.name.as_str()).collect();
        // lo (loopback), veth0 (wrong kind), and ens5 (no addresses) are out.
        assert_eq!(names, vec!["ens3", "bond0", "ens4"]);
    }

    #[tokio::test]
    async fn drops_link_local_addresses() {
        let nics = enumerate_fixture().await;
        let ens3 = nics.iter().find(|nic| nic.name == "ens3").unwrap();
        assert_eq!(
            ens3.ipv4_addresses,
            vec!["192.168.1.133/24".parse().unwrap()]
        );
        assert!(ens3.ipv6_addresses.is_empty());
        assert_eq!(ens3.mac.to_string(), "52:54:00:09:de:2a");
        assert_eq!(ens3.mtu, 1500);
    }

    #[tokio::test]
    async fn recovers_slaac_prefix_from_ra_routes() {
        let nics = enumerate_fixture().await;
        let ens4 = nics.iter().find(|nic| nic.name == "ens4").unwrap();
        assert_eq!(
            ens4.ipv6_addresses,
            vec!["2001:db8:1::21/64".parse().unwrap()]
        );
    }

    #[tokio::test]
    async fn listing_failure_surfaces_stderr() {
        let executor = FakeExecutor::new(test_log());
        let mut sequence = CommandSequence::new();
        sequence.expect_fail("ip -j addr show", 255, "netlink: no such device");
        sequence.register(&executor);
        let executor = executor.as_executor();

        let err = list_outgoing_nics(&executor, &test_log()).await.unwrap_err();
        match err {
            InterfaceError::Listing { exit_code, stderr } => {
                assert_eq!(exit_code, 255);
                assert_eq!(stderr, "netlink: no such device");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn forced_mac_keeps_one_v4_interface() {
        let nics = enumerate_fixture().await;
        let forced: MacAddr = "00:1a:4a:00:00:01".parse().unwrap();
        let rewritten = apply_forced_mac(nics, forced);
        assert_eq!(rewritten.len(), 1);
        assert_eq!(rewritten[0].name, "ens3");
        assert_eq!(rewritten[0].mac, forced);
    }
}
