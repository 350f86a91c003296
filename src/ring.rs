// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Benjamin Chess
use std::collections::{BTreeMap, BTreeSet};

use sha2::{Digest, Sha512};

use crate::publish::ScrapeTarget;

pub type PeerSet = BTreeSet<String>;

// Positions each peer occupies on the ring. Spreads ownership evenly enough
// that adding one peer to a cluster of n moves roughly 1/(n+1) of the keys.
const RING_REPLICAS: usize = 160;

type RingPoint = [u8; 64];

fn digest(data: &str) -> RingPoint {
    Sha512::digest(data.as_bytes()).into()
}

/// Immutable mapping from the SHA-512 digest space onto a peer set. Rebuilt
/// on every membership change, never mutated in place.
pub struct HashRing {
    positions: BTreeMap<RingPoint, String>,
}

impl HashRing {
    pub fn build(peers: &PeerSet) -> Self {
        let mut positions = BTreeMap::new();
        for peer in peers {
            for replica in 0..RING_REPLICAS {
                positions.insert(digest(&format!("{peer}-{replica}")), peer.clone());
            }
        }
        HashRing { positions }
    }

    /// Owner of `key`: the first peer position at or after the key's digest,
    /// wrapping around to the start of the ring.
    pub fn lookup(&self, key: &str) -> Option<&str> {
        if self.positions.is_empty() {
            return None;
        }
        let point = digest(key);
        self.positions
            .range(point..)
            .next()
            .or_else(|| self.positions.iter().next())
            .map(|(_, peer)| peer.as_str())
    }
}

/// Pick the subset of `targets` this instance must scrape. Pure: identical
/// inputs yield identical outputs on every peer, which is what lets the
/// cluster converge on a partition without talking to each other.
pub fn select_targets(
    targets: &[ScrapeTarget],
    peers: &PeerSet,
    self_id: &str,
    sharding_enabled: bool,
) -> Vec<ScrapeTarget> {
    if !sharding_enabled {
        return targets.to_vec();
    }
    if peers.is_empty() || !peers.contains(self_id) {
        // Not registered yet, or evicted from the membership view.
        return Vec::new();
    }

    let ring = HashRing::build(peers);
    let mut selected = Vec::new();
    for target in targets {
        let Some(key) = target.targets.first() else {
            log::warn!(
                "skipping scrape target without addresses. labels={:?}",
                target.labels
            );
            continue;
        };
        if ring.lookup(key) == Some(self_id) {
            selected.push(target.clone());
        }
    }
    selected
}
