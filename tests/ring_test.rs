use std::collections::BTreeSet;

use promshard::publish::ScrapeTarget;
use promshard::ring::{select_targets, HashRing, PeerSet};

fn peers(ids: &[&str]) -> PeerSet {
    ids.iter().map(|s| s.to_string()).collect()
}

fn target(addr: &str) -> ScrapeTarget {
    ScrapeTarget {
        targets: vec![addr.to_string()],
        labels: Default::default(),
    }
}

fn many_targets(n: usize) -> Vec<ScrapeTarget> {
    (0..n).map(|i| target(&format!("host-{i}:9100"))).collect()
}

#[test]
fn test_solo_peer_owns_everything() {
    let p = peers(&["a:9090"]);
    let t = vec![target("x:1")];
    assert_eq!(select_targets(&t, &p, "a:9090", true), t);
}

#[test]
fn test_sharding_disabled_returns_everything() {
    let p = peers(&["a", "b", "c"]);
    let t = many_targets(10);
    assert_eq!(select_targets(&t, &p, "a", false), t);
    // Even for a peer outside the set.
    assert_eq!(select_targets(&t, &p, "z", false), t);
}

#[test]
fn test_evicted_peer_selects_nothing() {
    let p = peers(&["b", "c"]);
    let t = many_targets(5);
    assert!(select_targets(&t, &p, "a", true).is_empty());
}

#[test]
fn test_empty_peer_set_selects_nothing() {
    let t = many_targets(5);
    assert!(select_targets(&t, &PeerSet::new(), "a", true).is_empty());
}

#[test]
fn test_selection_is_deterministic() {
    let p = peers(&["a:9090", "b:9090", "c:9090"]);
    let t = many_targets(50);
    let first = select_targets(&t, &p, "b:9090", true);
    for _ in 0..5 {
        assert_eq!(select_targets(&t, &p, "b:9090", true), first);
    }
}

// Every target is owned by exactly one peer: the per-peer selections are
// disjoint and their union covers the whole set.
#[test]
fn test_peers_partition_the_target_set() {
    let ids = ["a:9090", "b:9090", "c:9090"];
    let p = peers(&ids);
    let t = many_targets(300);

    let mut seen = BTreeSet::new();
    let mut total = 0;
    for id in &ids {
        let shard = select_targets(&t, &p, id, true);
        // No instance should be left idle with 300 well-spread keys.
        assert!(!shard.is_empty(), "{id} owns nothing");
        total += shard.len();
        for target in shard {
            assert!(
                seen.insert(target.targets[0].clone()),
                "{} selected twice",
                target.targets[0]
            );
        }
    }
    assert_eq!(total, 300);
    assert_eq!(seen.len(), 300);
}

#[test]
fn test_duplicate_targets_shard_identically() {
    let p = peers(&["a:9090", "b:9090"]);
    let t = vec![target("x:1"), target("x:1")];
    for id in ["a:9090", "b:9090"] {
        let shard = select_targets(&t, &p, id, true);
        assert!(shard.len() == 0 || shard.len() == 2);
    }
}

// Adding one peer may only move ownership toward the new peer, and only
// for a bounded fraction of the keys.
#[test]
fn test_growth_moves_keys_only_to_the_new_peer() {
    let before = peers(&["a:9090", "b:9090", "c:9090"]);
    let after = peers(&["a:9090", "b:9090", "c:9090", "d:9090"]);
    let ring_before = HashRing::build(&before);
    let ring_after = HashRing::build(&after);

    let mut moved = 0;
    for i in 0..300 {
        let key = format!("host-{i}:9100");
        let owner_before = ring_before.lookup(&key).unwrap();
        let owner_after = ring_after.lookup(&key).unwrap();
        if owner_before != owner_after {
            assert_eq!(owner_after, "d:9090", "{key} moved to an old peer");
            moved += 1;
        }
    }
    // Expected churn is |P2 \ P1| / |P2| = 1/4; allow generous slack.
    assert!(moved > 0, "the new peer took nothing");
    assert!(moved < 150, "{moved} of 300 keys moved");
}
