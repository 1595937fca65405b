// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `domain-resolution`: resolve service-chosen names with the host's
//! configured resolvers.
//!
//! Resolution happens in-process. A name that does not resolve is an answer
//! (empty address lists), not a failure; the service uses exactly that to
//! detect wildcard DNS misconfiguration.

use std::sync::LazyLock;

use anyhow::Context;
use async_trait::async_trait;
use foundry_common::api::steps::{
    DomainResolution as ResolvedDomain, DomainResolutionRequest,
    DomainResolutionResponse,
};
use foundry_host_utils::CommandOutput;
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;
use regex::Regex;
use slog::{warn, Logger};

use crate::actions::{single_json_arg, Action};
use crate::dispatch::StepContext;

static DOMAIN_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9_]([a-zA-Z0-9._-]*[a-zA-Z0-9_])?\.?$").unwrap()
});

#[derive(Debug)]
pub struct DomainResolution {
    request: DomainResolutionRequest,
}

impl DomainResolution {
    pub fn validate(args: &[String]) -> Result<Self, anyhow::Error> {
        let request: DomainResolutionRequest =
            single_json_arg(args, "domain resolution")?;
        for domain in &request.domains {
            if !DOMAIN_NAME.is_match(&domain.domain_name) {
                anyhow::bail!(
                    "invalid domain name {:?}",
                    domain.domain_name
                );
            }
        }
        Ok(Self { request })
    }
}

#[async_trait]
impl Action for DomainResolution {
    async fn run(
        &self,
        _ctx: &StepContext,
        log: &Logger,
    ) -> Result<CommandOutput, anyhow::Error> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .context("failed to build resolver from system configuration")?;

        let mut resolutions = Vec::new();
        for domain in &self.request.domains {
            let name = &domain.domain_name;

            let mut ipv4_addresses = match resolver.ipv4_lookup(name).await {
                Ok(lookup) => lookup.iter().map(|a| a.0).collect(),
                Err(err) => {
                    if !matches!(
                        err.kind(),
                        ResolveErrorKind::NoRecordsFound { .. }
                    ) {
                        warn!(
                            log, "IPv4 resolution failed";
                            "domain" => name, "err" => %err,
                        );
                    }
                    Vec::new()
                }
            };
            let mut ipv6_addresses = match resolver.ipv6_lookup(name).await {
                Ok(lookup) => lookup.iter().map(|aaaa| aaaa.0).collect(),
                Err(err) => {
                    if !matches!(
                        err.kind(),
                        ResolveErrorKind::NoRecordsFound { .. }
                    ) {
                        warn!(
                            log, "IPv6 resolution failed";
                            "domain" => name, "err" => %err,
                        );
                    }
                    Vec::new()
                }
            };
            // Resolver answer order is server-dependent; the service diffs
            // reports textually.
            ipv4_addresses.sort_unstable();
            ipv6_addresses.sort_unstable();

            resolutions.push(ResolvedDomain {
                domain_name: name.clone(),
                ipv4_addresses,
                ipv6_addresses,
            });
        }

        let response = DomainResolutionResponse { resolutions };
        Ok(CommandOutput::success()
            .set_stdout(serde_json::to_string(&response)?))
    }
}
