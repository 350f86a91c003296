// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Benjamin Chess
use std::time::Duration;

use etcd_client::{
    Client, ConnectOptions, GetOptions, LeaseKeepAliveStream, LeaseKeeper, PutOptions,
    WatchOptions, WatchStream, Watcher,
};
use thiserror::Error;

pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("etcd request failed: {0}")]
    Transport(#[from] etcd_client::Error),
    #[error("watch stream on {0} closed by the server")]
    WatchClosed(String),
    #[error("lease {0} expired or was revoked")]
    LeaseLost(i64),
}

/// Thin adapter over the etcd client. Clones share one underlying
/// connection, so each task can own a handle without re-dialing.
#[derive(Clone)]
pub struct StoreClient {
    client: Client,
}

impl StoreClient {
    pub async fn connect(endpoints: &[String]) -> Result<Self, StoreError> {
        let options = ConnectOptions::new().with_connect_timeout(DIAL_TIMEOUT);
        let client = Client::connect(endpoints, Some(options)).await?;
        Ok(StoreClient { client })
    }

    /// Grant a lease of `ttl` seconds and write `key` under it. The key
    /// vanishes from the store when the lease expires or is revoked.
    pub async fn put_with_lease(
        &mut self,
        key: &str,
        value: &str,
        ttl: i64,
    ) -> Result<i64, StoreError> {
        let lease = self.client.lease_grant(ttl, None).await?;
        let lease_id = lease.id();
        self.client
            .put(key, value, Some(PutOptions::new().with_lease(lease_id)))
            .await?;
        Ok(lease_id)
    }

    pub async fn keep_alive(
        &mut self,
        lease_id: i64,
    ) -> Result<(LeaseKeeper, LeaseKeepAliveStream), StoreError> {
        Ok(self.client.lease_keep_alive(lease_id).await?)
    }

    pub async fn revoke(&mut self, lease_id: i64) -> Result<(), StoreError> {
        self.client.lease_revoke(lease_id).await?;
        Ok(())
    }

    /// Read every key under `prefix`. A missing prefix comes back as an
    /// empty list, never as an error.
    pub async fn get_prefix(&mut self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let resp = self
            .client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await?;
        let mut kvs = Vec::with_capacity(resp.kvs().len());
        for kv in resp.kvs() {
            kvs.push((kv.key_str()?.to_string(), kv.value().to_vec()));
        }
        Ok(kvs)
    }

    pub async fn watch_prefix(
        &mut self,
        prefix: &str,
    ) -> Result<(Watcher, WatchStream), StoreError> {
        Ok(self
            .client
            .watch(prefix, Some(WatchOptions::new().with_prefix()))
            .await?)
    }
}
