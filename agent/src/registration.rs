// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host registration against the service.
//!
//! Registration retries forever on transport and server errors: the service
//! being down or not yet provisioned is the normal state of a host that
//! booted early. A 401/403/404/409 is different -- the service has decided
//! this host may not register, and repeating the request cannot change
//! that, so the attempt ends with [`RegistrationOutcome::Rejected`].

use std::time::Duration;

use foundry_client::{Client, StatusCode};
use foundry_common::api::RegisterResponse;
use foundry_common::backoff::{
    retry_notify, retry_policy_registration, BackoffError,
};
use slog::{error, warn, Logger};

use crate::shutdown::Shutdown;

pub enum RegistrationOutcome {
    Registered(RegisterResponse),
    /// The service authoritatively refused this host. The caller must not
    /// retry; only operator action (or a service-side change) can help.
    Rejected(StatusCode),
    /// Shutdown was requested while we were still trying.
    Cancelled,
}

pub async fn register_host(
    client: &Client,
    interval: Duration,
    shutdown: &mut Shutdown,
    log: &Logger,
) -> RegistrationOutcome {
    let policy = retry_policy_registration(interval);
    let attempt = || async {
        match client.register().await {
            Ok(response) => Ok(RegistrationOutcome::Registered(response)),
            Err(err) => match err.status() {
                Some(status) if err.is_authoritative_rejection() => {
                    error!(
                        log, "registration rejected by the service";
                        "status" => %status,
                        "err" => %err,
                    );
                    Ok(RegistrationOutcome::Rejected(status))
                }
                _ => Err(BackoffError::transient(err)),
            },
        }
    };
    let notify = |err, delay: Duration| {
        warn!(
            log, "registration failed, will retry";
            "err" => %err,
            "retry_after" => ?delay,
        );
    };

    tokio::select! {
        _ = shutdown.triggered() => RegistrationOutcome::Cancelled,
        outcome = retry_notify(policy, attempt, notify) => {
            // The policy has no elapsed-time limit, so transient errors
            // never surface here.
            outcome.expect("registration policy never gives up")
        }
    }
}
