// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Retry policies used when talking to the Foundry service.

use std::time::Duration;

pub use ::backoff::future::{retry, retry_notify};
pub use ::backoff::Error as BackoffError;
pub use ::backoff::{backoff::Backoff, ExponentialBackoff, Notify};

/// Longest the registration loop will wait between attempts, no matter how
/// long the service has been unreachable.
const MAX_REGISTRATION_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Ceiling for the instruction-poll backoff when the service keeps failing.
const MAX_INSTRUCTIONS_INTERVAL: Duration = Duration::from_secs(60);

/// Return a policy for registering against a service that may not know about
/// this host for a long time (still provisioning, mid-upgrade, partitioned).
/// The first retry waits the operator-configured interval; later retries grow
/// from there and the policy never gives up.
pub fn retry_policy_registration(interval: Duration) -> ExponentialBackoff {
    policy_with_max(interval, interval.max(MAX_REGISTRATION_INTERVAL))
}

/// Return a policy for re-polling instructions after a transport failure.
/// Driven manually through [`Backoff::next_backoff`] so the poll loop can
/// [`Backoff::reset`] it on the first success.
pub fn retry_policy_instructions() -> ExponentialBackoff {
    policy_with_max(Duration::from_secs(1), MAX_INSTRUCTIONS_INTERVAL)
}

fn policy_with_max(
    initial_interval: Duration,
    max_interval: Duration,
) -> ExponentialBackoff {
    let current_interval = initial_interval;
    ExponentialBackoff {
        current_interval,
        initial_interval,
        multiplier: 2.0,
        max_interval,
        max_elapsed_time: None,
        ..ExponentialBackoff::default()
    }
}
