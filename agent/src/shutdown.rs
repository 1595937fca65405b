// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cooperative shutdown, fanned out from the signal handler to every loop.

use anyhow::Context;
use futures::StreamExt;
use libc::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use slog::{info, Logger};
use tokio::sync::watch;

/// A handle the control loops poll to learn that the process should wind
/// down. Clones observe the same trigger.
#[derive(Clone, Debug)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> (watch::Sender<bool>, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (tx, Shutdown { rx })
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested. If the trigger side is
    /// gone the process is tearing down anyway, so that also resolves.
    pub async fn triggered(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Have SIGTERM and SIGINT request shutdown through `tx`.
pub fn trigger_on_signals(
    tx: watch::Sender<bool>,
    log: &Logger,
) -> Result<(), anyhow::Error> {
    let signals = Signals::new([SIGTERM, SIGINT])
        .context("installing signal handlers")?;
    let log = log.clone();
    tokio::spawn(async move {
        let mut stream = signals.fuse();
        if let Some(signal) = stream.next().await {
            info!(log, "caught signal, shutting down"; "signal" => signal);
            let _ = tx.send(true);
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn resolves_after_trigger() {
        let (tx, mut shutdown) = Shutdown::new();
        assert!(!shutdown.is_triggered());
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), shutdown.triggered())
            .await
            .unwrap();
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn resolves_when_trigger_dropped() {
        let (tx, mut shutdown) = Shutdown::new();
        drop(tx);
        tokio::time::timeout(Duration::from_secs(5), shutdown.triggered())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn clones_share_the_trigger() {
        let (tx, shutdown) = Shutdown::new();
        let mut observer = shutdown.clone();
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), observer.triggered())
            .await
            .unwrap();
        assert!(shutdown.is_triggered());
    }
}
