// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reply posting and the duplicate-suppression cache.
//!
//! A handful of step types produce large, slowly-changing replies
//! (inventory and friends). Re-posting a byte-identical reply tells the
//! service nothing, so those are suppressed until the output changes or a
//! TTL lapses. Failed replies always go out; the classification is the
//! signal there.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use foundry_client::Client;
use foundry_common::api::{StepReply, StepType};
use slog::{debug, warn, Logger};
use tokio::time::Instant;

const CACHE_TTL: Duration = Duration::from_secs(60 * 60);

fn cacheable(step_type: &str) -> bool {
    matches!(
        step_type.parse::<StepType>(),
        Ok(StepType::Inventory
            | StepType::NtpSynchronizer
            | StepType::FreeNetworkAddresses
            | StepType::DomainResolution)
    )
}

struct CacheEntry {
    output: String,
    expires_at: Instant,
}

/// Remembers the last delivered output per cacheable step type.
pub struct ReplyCache {
    ttl: Duration,
    entries: Mutex<HashMap<StepType, CacheEntry>>,
}

impl ReplyCache {
    pub fn new() -> ReplyCache {
        ReplyCache::with_ttl(CACHE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> ReplyCache {
        ReplyCache { ttl, entries: Mutex::new(HashMap::new()) }
    }

    /// Whether this reply needs to go on the wire.
    pub fn should_post(&self, reply: &StepReply) -> bool {
        if reply.exit_code != 0 || !cacheable(&reply.step_type) {
            return true;
        }
        let step_type = match reply.step_type.parse::<StepType>() {
            Ok(step_type) => step_type,
            Err(_) => return true,
        };
        let mut entries = self.entries.lock().unwrap();
        match entries.get(&step_type) {
            Some(entry) if entry.expires_at <= Instant::now() => {
                entries.remove(&step_type);
                true
            }
            Some(entry) => entry.output != reply.output,
            None => true,
        }
    }

    /// Note a successfully delivered reply. Failed replies never enter the
    /// cache; the service wants to see each of those.
    pub fn record(&self, reply: &StepReply) {
        if reply.exit_code != 0 || !cacheable(&reply.step_type) {
            return;
        }
        let step_type = match reply.step_type.parse::<StepType>() {
            Ok(step_type) => step_type,
            Err(_) => return,
        };
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            step_type,
            CacheEntry {
                output: reply.output.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
    }
}

impl Default for ReplyCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Deliver one reply, consulting the cache. Post failures are logged; the
/// service re-issues the step, so there is no local retry.
pub async fn post_reply(
    client: &Client,
    cache: &ReplyCache,
    reply: &StepReply,
    log: &Logger,
) {
    if !cache.should_post(reply) {
        debug!(
            log, "suppressing duplicate reply";
            "step_type" => &reply.step_type,
            "step_id" => &reply.step_id,
        );
        return;
    }
    match client.post_step_reply(reply).await {
        Ok(()) => cache.record(reply),
        Err(err) => {
            warn!(
                log, "failed to post step reply";
                "step_type" => &reply.step_type,
                "step_id" => &reply.step_id,
                "err" => %err,
            );
        }
    }
}
