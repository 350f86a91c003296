// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Benjamin Chess
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::RegistryConfig;
use crate::metrics;
use crate::store::{StoreClient, StoreError};
use crate::watcher::{BACKOFF_INITIAL, BACKOFF_MAX};

const REVOKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Keep this instance registered under `<base>/<service>/<identity>` with a
/// TTL-backed lease. The lease is the failure detector: a crashed instance
/// vanishes from the membership view after at most `node_ttl` seconds
/// without anybody else doing anything.
///
/// Runs until cancelled. Transient failures re-register from scratch after
/// a bounded backoff; they are never surfaced to the reconciliation loop.
pub async fn run(
    mut store: StoreClient,
    config: RegistryConfig,
    identity: String,
    cancel: CancellationToken,
) {
    let key = format!("{}{}", config.service_prefix(), identity);
    let mut backoff = BACKOFF_INITIAL;
    loop {
        if cancel.is_cancelled() {
            return;
        }
        match register_session(&mut store, &key, &identity, config.node_ttl, &cancel, &mut backoff)
            .await
        {
            Ok(()) => return, // cancelled
            Err(err) => {
                metrics::REGISTRATION_RETRIES.inc();
                log::warn!("registration of {key} lost, retrying in {backoff:?}. err={err}");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(BACKOFF_MAX);
            }
        }
    }
}

// One lease lifetime: grant + put, then heartbeat until the lease is lost
// or we are cancelled. The key's value is irrelevant; identity lives in the
// key itself.
async fn register_session(
    store: &mut StoreClient,
    key: &str,
    identity: &str,
    ttl: i64,
    cancel: &CancellationToken,
    backoff: &mut Duration,
) -> Result<(), StoreError> {
    let lease_id = store.put_with_lease(key, identity, ttl).await?;
    log::info!("registered {key} under lease {lease_id} (ttl {ttl}s)");

    let (mut keeper, mut stream) = store.keep_alive(lease_id).await?;
    let interval = heartbeat_interval(ttl);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Best effort: let peers drop us now instead of after the TTL.
                let revoke = tokio::time::timeout(REVOKE_TIMEOUT, store.revoke(lease_id)).await;
                match revoke {
                    Ok(Ok(())) => log::info!("revoked lease {lease_id}"),
                    Ok(Err(err)) => log::warn!("could not revoke lease {lease_id}: {err}"),
                    Err(_) => log::warn!("revoking lease {lease_id} timed out"),
                }
                return Ok(());
            }
            _ = tokio::time::sleep(interval) => {
                keeper.keep_alive().await?;
                match stream.message().await? {
                    Some(resp) if resp.ttl() > 0 => {
                        *backoff = BACKOFF_INITIAL;
                        log::debug!("lease {lease_id} refreshed, ttl {}s", resp.ttl());
                    }
                    // TTL 0 means the lease expired before the heartbeat landed.
                    Some(_) | None => return Err(StoreError::LeaseLost(lease_id)),
                }
            }
        }
    }
}

// Heartbeat strictly inside the TTL or the key expires between beats.
fn heartbeat_interval(ttl: i64) -> Duration {
    let max = (ttl - 1).max(1);
    Duration::from_secs((ttl / 3).clamp(1, max) as u64)
}
