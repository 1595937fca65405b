// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `connectivity-check`: probe the other hosts in the cluster and report
//! L2/L3 reachability and path-MTU health. The heavy lifting lives in
//! [`crate::connectivity`]; this step validates the plan, enumerates the
//! local NICs, and serializes the report.

use std::sync::Arc;

use async_trait::async_trait;
use foundry_common::api::connectivity::ConnectivityCheckRequest;
use foundry_host_utils::{apply_forced_mac, list_outgoing_nics, CommandOutput};
use slog::Logger;

use crate::actions::{single_json_arg, Action};
use crate::connectivity::{self, Checker};
use crate::dispatch::StepContext;

#[derive(Debug)]
pub struct ConnectivityCheck {
    plan: ConnectivityCheckRequest,
}

impl ConnectivityCheck {
    pub fn validate(args: &[String]) -> Result<Self, anyhow::Error> {
        let plan: ConnectivityCheckRequest =
            single_json_arg(args, "connectivity check")?;
        Ok(Self { plan })
    }
}

#[async_trait]
impl Action for ConnectivityCheck {
    async fn run(
        &self,
        ctx: &StepContext,
        log: &Logger,
    ) -> Result<CommandOutput, anyhow::Error> {
        let nics = list_outgoing_nics(&ctx.executor, log).await?;
        let (nics, checkers): (_, Vec<Arc<dyn Checker>>) = match &ctx.dry_run {
            Some(dry_run) => (
                apply_forced_mac(nics, dry_run.forced_mac),
                connectivity::dry_run_checkers(),
            ),
            None => (nics, connectivity::production_checkers()),
        };
        let (report, errors) = connectivity::build_report(
            &ctx.executor,
            log,
            &self.plan,
            &nics,
            &checkers,
        )
        .await;
        // Probe failures already show up as unsuccessful records; reporter
        // errors ride along on stderr without failing the step.
        Ok(CommandOutput::success()
            .set_stdout(serde_json::to_string(&report)?)
            .set_stderr(errors.join("\n")))
    }
}
