// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Benjamin Chess
use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter, IntCounterVec,
    IntGauge,
};

/// A collection of Prometheus metrics for this application.
pub struct Metrics;

impl Metrics {
    /// Force initialization of all static metrics.
    /// Call this in main() to ensure the metrics are registered.
    pub fn init() {
        // Accessing a static ref triggers registration.
        let _ = &*RECONCILE_COUNT;
        let _ = &*PUBLISH_FAILURES;
        let _ = &*RELOAD_FAILURES;
        let _ = &*WATCH_EMISSIONS;
        let _ = &*REGISTRATION_RETRIES;
        let _ = &*PEER_COUNT;
        let _ = &*SHARD_TARGET_COUNT;
    }
}

/// Reconciliations run over the (peers, targets) caches.
pub static RECONCILE_COUNT: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "promshard_reconciliations_total",
        "Total reconciliations over membership and target updates"
    )
    .expect("cannot create metric: promshard_reconciliations_total")
});

pub static PUBLISH_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "promshard_publish_failures_total",
        "Failed writes of the scraper target file"
    )
    .expect("cannot create metric: promshard_publish_failures_total")
});

pub static RELOAD_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "promshard_reload_failures_total",
        "Failed live-reload requests against the scraper"
    )
    .expect("cannot create metric: promshard_reload_failures_total")
});

/// Full prefix reads emitted downstream, labeled by stream (members, targets).
pub static WATCH_EMISSIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "promshard_watch_emissions_total",
        "Prefix reads emitted to the reconciler, labeled by stream",
        &["stream"]
    )
    .expect("cannot create metric: promshard_watch_emissions_total")
});

pub static REGISTRATION_RETRIES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "promshard_registration_retries_total",
        "Times the self-registration session was rebuilt from scratch"
    )
    .expect("cannot create metric: promshard_registration_retries_total")
});

pub static PEER_COUNT: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "promshard_peer_count",
        "Live peers in the last observed membership view"
    )
    .expect("cannot create metric: promshard_peer_count")
});

pub static SHARD_TARGET_COUNT: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "promshard_shard_target_count",
        "Scrape targets in the last published local shard"
    )
    .expect("cannot create metric: promshard_shard_target_count")
});
