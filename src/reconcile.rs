// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Benjamin Chess
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::metrics;
use crate::publish::{Publisher, TargetSet};
use crate::ring::{select_targets, PeerSet};

/// Fuses the membership and catalogue streams: on any update, re-runs the
/// sharding engine over the latest (peers, targets) pair and pushes the
/// result into the scraper. Only this task calls the sharding engine, so
/// reconciliations never run concurrently with themselves.
pub struct Reconciler {
    peers_rx: watch::Receiver<Option<PeerSet>>,
    targets_rx: watch::Receiver<Option<TargetSet>>,
    publisher: Publisher,
    identity: String,
    shard_enable: bool,
    last_shard: Option<TargetSet>,
}

impl Reconciler {
    pub fn new(
        peers_rx: watch::Receiver<Option<PeerSet>>,
        targets_rx: watch::Receiver<Option<TargetSet>>,
        publisher: Publisher,
        identity: String,
        shard_enable: bool,
    ) -> Self {
        Reconciler {
            peers_rx,
            targets_rx,
            publisher,
            identity,
            shard_enable,
            last_shard: None,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                changed = self.peers_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                changed = self.targets_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
            self.reconcile().await;
        }
    }

    async fn reconcile(&mut self) {
        let peers = self.peers_rx.borrow_and_update().clone();
        let targets = self.targets_rx.borrow_and_update().clone();

        // Still bootstrapping until at least one side has reported; after
        // that a missing side is just its empty value.
        if peers.is_none() && targets.is_none() {
            return;
        }
        let peers = peers.unwrap_or_default();
        let targets = targets.unwrap_or_default();

        log::debug!(
            "reconciling {} peers against {} targets. peers={peers:?}",
            peers.len(),
            targets.len()
        );
        metrics::RECONCILE_COUNT.inc();
        metrics::PEER_COUNT.set(peers.len() as i64);

        let shard = select_targets(&targets, &peers, &self.identity, self.shard_enable);
        if self.last_shard.as_ref() == Some(&shard) {
            log::debug!("local shard unchanged ({} targets)", shard.len());
            return;
        }

        metrics::SHARD_TARGET_COUNT.set(shard.len() as i64);
        match self.publisher.publish(shard.clone()).await {
            Ok(()) => {
                log::debug!("published {} of {} targets", shard.len(), targets.len());
                self.last_shard = Some(shard);
            }
            Err(err) => {
                // Leave last_shard untouched so the next update retries.
                metrics::PUBLISH_FAILURES.inc();
                log::warn!("couldn't update scraper targets. err={err}");
            }
        }
    }
}
