// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Benjamin Chess
use std::path::Path;
use std::time::Duration;

use axum::{routing::get, Router};
use clap::Parser;
use prometheus::{Encoder, TextEncoder};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use promshard::config::{Cli, Config};
use promshard::publish::{Publisher, TARGET_FILE, RELOAD_URL};
use promshard::reconcile::Reconciler;
use promshard::ring::PeerSet;
use promshard::store::{StoreClient, StoreError};
use promshard::{identity, metrics, publish, registry, render, watcher};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = Config::from_cli(&cli)?;
    env_logger::Builder::new()
        .filter_level(config.log_level)
        .parse_default_env()
        .init();

    log::info!("==== Starting promshard ====");

    let identity = identity::self_identity()?;
    log::info!("local peer identity: {identity}");

    // The scraper needs its static configuration before anything reaches it.
    log::debug!("rendering scraper configuration...");
    render::write_prometheus_config(Path::new(render::PROMETHEUS_CONFIG_FILE), &config)?;
    render::write_rules_from_env(Path::new(render::RULES_FILE))?;

    metrics::Metrics::init();

    // Build the Axum metrics app
    let metrics_app = Router::new().route(
        "/metrics",
        get(|| async {
            let metric_families = prometheus::gather();
            let mut buf = Vec::new();
            let encoder = TextEncoder::new();
            encoder.encode(&metric_families, &mut buf).unwrap();
            String::from_utf8(buf).unwrap()
        }),
    );
    let metrics_listener =
        tokio::net::TcpListener::bind(format!("[::]:{}", config.metrics_port)).await?;
    tokio::spawn(async move {
        axum::serve(metrics_listener, metrics_app).await.unwrap();
    });

    let publisher = Publisher::new(TARGET_FILE, RELOAD_URL);
    // Nudge the scraper to pick up the freshly rendered configuration; it
    // may not be up yet, which is fine.
    publisher.reload().await;

    let cancel = CancellationToken::new();
    let (peers_tx, peers_rx) = watch::channel::<Option<PeerSet>>(None);
    let (targets_tx, targets_rx) = watch::channel::<Option<publish::TargetSet>>(None);

    let mut watchers: JoinSet<Result<(), StoreError>> = JoinSet::new();
    let mut registrar = None;
    let mut solo_tx = None;
    match config.registry.clone() {
        Some(reg) => {
            log::debug!("initializing registry etcd client. endpoints={:?}", reg.endpoints);
            let store = StoreClient::connect(&reg.endpoints).await?;
            let prefix = reg.service_prefix();
            log::info!("keeping this instance registered under {prefix}...");
            registrar = Some(tokio::spawn(registry::run(
                store.clone(),
                reg,
                identity.clone(),
                cancel.clone(),
            )));
            log::info!("watching registered peers...");
            watchers.spawn(watcher::watch_members(store, prefix, peers_tx, cancel.clone()));
        }
        None => {
            log::info!("registration disabled, acting as the sole peer");
            peers_tx.send_replace(Some(PeerSet::from([identity.clone()])));
            solo_tx = Some(peers_tx);
        }
    }
    // Keeps the membership channel open when there is no membership watcher.
    let _solo_tx = solo_tx;

    log::debug!(
        "initializing catalogue etcd client. endpoints={:?}",
        config.scrape_endpoints
    );
    let store = StoreClient::connect(&config.scrape_endpoints).await?;
    log::info!("watching scrape catalogue under {}", config.catalogue_prefix);
    watchers.spawn(watcher::watch_targets(
        store,
        config.catalogue_prefix.clone(),
        targets_tx,
        cancel.clone(),
    ));

    let reconciler = Reconciler::new(
        peers_rx,
        targets_rx,
        publisher,
        identity,
        config.shard_enable,
    );
    let reconcile_task = tokio::spawn(reconciler.run(cancel.clone()));

    let mut fault = None;
    tokio::select! {
        _ = shutdown_signal() => {
            log::info!("shutdown signal received");
        }
        Some(result) = watchers.join_next() => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    log::error!("terminal coordination-store fault: {err}");
                    fault = Some(err.to_string());
                }
                Err(err) => {
                    log::error!("watcher task failed: {err}");
                    fault = Some(err.to_string());
                }
            }
        }
    }

    cancel.cancel();
    if let Some(task) = registrar {
        // Bounded: the registrar revokes its lease on the way out.
        let _ = tokio::time::timeout(Duration::from_secs(6), task).await;
    }
    while watchers.join_next().await.is_some() {}
    let _ = reconcile_task.await;

    match fault {
        Some(fault) => Err(fault.into()),
        None => {
            log::info!("shutdown complete");
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                log::warn!("could not install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
