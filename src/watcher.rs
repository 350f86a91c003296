// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Benjamin Chess
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::metrics;
use crate::publish::{ScrapeTarget, TargetSet};
use crate::ring::PeerSet;
use crate::store::{StoreClient, StoreError};

/// Label carrying the catalogue service name on every derived target
/// ("prometheus source name").
pub const SOURCE_NAME_LABEL: &str = "prsn";

pub const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
pub const BACKOFF_MAX: Duration = Duration::from_secs(30);

// Transport failures lasting longer than this without a single successful
// read are terminal; the process exits and the supervisor takes over.
const FAULT_WINDOW: Duration = Duration::from_secs(300);

/// Stream the live peer set: one registry key per instance, the identity in
/// the final path segment.
pub async fn watch_members(
    store: StoreClient,
    service_prefix: String,
    out: watch::Sender<Option<PeerSet>>,
    cancel: CancellationToken,
) -> Result<(), StoreError> {
    run_prefix_watch(store, service_prefix, out, cancel, "members", derive_members).await
}

/// Stream the scrape catalogue: keys shaped `<prefix>/<service>/<address>`,
/// one target per key.
pub async fn watch_targets(
    store: StoreClient,
    catalogue_prefix: String,
    out: watch::Sender<Option<TargetSet>>,
    cancel: CancellationToken,
) -> Result<(), StoreError> {
    run_prefix_watch(store, catalogue_prefix, out, cancel, "targets", derive_targets).await
}

/// Shared watcher scaffolding. Emits one full prefix read immediately, then
/// re-reads on every watch notification. Reads, not event deltas, are the
/// source of truth: a missed event is recovered by the next read.
async fn run_prefix_watch<T: Debug>(
    mut store: StoreClient,
    prefix: String,
    out: watch::Sender<Option<T>>,
    cancel: CancellationToken,
    stream_name: &'static str,
    derive: fn(&[(String, Vec<u8>)], &str) -> T,
) -> Result<(), StoreError> {
    let mut backoff = BACKOFF_INITIAL;
    let mut failing_since: Option<Instant> = None;
    loop {
        let err = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            err = watch_session(
                &mut store,
                &prefix,
                &out,
                stream_name,
                derive,
                &mut backoff,
                &mut failing_since,
            ) => err,
        };

        let since = *failing_since.get_or_insert_with(Instant::now);
        if since.elapsed() >= FAULT_WINDOW {
            log::error!(
                "{stream_name} watch on {prefix} unrecoverable for {:?}: {err}",
                since.elapsed()
            );
            return Err(err);
        }

        log::warn!("{stream_name} watch on {prefix} failed, retrying in {backoff:?}. err={err}");
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(BACKOFF_MAX);
    }
}

// One read-then-watch session. Runs until something breaks; the caller
// decides whether to back off and retry or give up.
async fn watch_session<T: Debug>(
    store: &mut StoreClient,
    prefix: &str,
    out: &watch::Sender<Option<T>>,
    stream_name: &'static str,
    derive: fn(&[(String, Vec<u8>)], &str) -> T,
    backoff: &mut Duration,
    failing_since: &mut Option<Instant>,
) -> StoreError {
    if let Err(err) = read_and_emit(store, prefix, out, stream_name, derive, backoff, failing_since).await
    {
        return err;
    }

    // The handle must outlive the stream; dropping it cancels the watch.
    let (_watcher, mut stream) = match store.watch_prefix(prefix).await {
        Ok(pair) => pair,
        Err(err) => return err,
    };

    loop {
        match stream.message().await {
            Ok(Some(resp)) => {
                if resp.canceled() {
                    return StoreError::WatchClosed(prefix.to_string());
                }
                if resp.created() {
                    continue;
                }
                log::debug!("{stream_name} under {prefix} updated");
                if let Err(err) =
                    read_and_emit(store, prefix, out, stream_name, derive, backoff, failing_since)
                        .await
                {
                    return err;
                }
            }
            Ok(None) => return StoreError::WatchClosed(prefix.to_string()),
            Err(err) => return err.into(),
        }
    }
}

async fn read_and_emit<T: Debug>(
    store: &mut StoreClient,
    prefix: &str,
    out: &watch::Sender<Option<T>>,
    stream_name: &'static str,
    derive: fn(&[(String, Vec<u8>)], &str) -> T,
    backoff: &mut Duration,
    failing_since: &mut Option<Instant>,
) -> Result<(), StoreError> {
    let kvs = store.get_prefix(prefix).await?;
    if kvs.is_empty() {
        log::debug!("nothing found under {prefix}");
    }
    let value = derive(&kvs, prefix);
    log::debug!("{stream_name} read under {prefix}: {value:?}");
    metrics::WATCH_EMISSIONS.with_label_values(&[stream_name]).inc();
    // Latest-read-wins: a slow reconciler only ever observes the newest set.
    out.send_replace(Some(value));
    *backoff = BACKOFF_INITIAL;
    *failing_since = None;
    Ok(())
}

fn derive_members(kvs: &[(String, Vec<u8>)], _prefix: &str) -> PeerSet {
    kvs.iter()
        .map(|(key, _)| base_name(key).to_string())
        .collect()
}

fn derive_targets(kvs: &[(String, Vec<u8>)], prefix: &str) -> TargetSet {
    let mut targets = Vec::with_capacity(kvs.len());
    for (key, _) in kvs {
        match parse_catalogue_key(key, prefix) {
            Some(target) => targets.push(target),
            None => {
                log::warn!(
                    "catalogue key {key} does not look like <prefix>/<service>/<address>, skipping"
                );
            }
        }
    }
    targets
}

fn parse_catalogue_key(key: &str, prefix: &str) -> Option<ScrapeTarget> {
    let rel = key.strip_prefix(prefix)?;
    let segments: Vec<&str> = rel.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < 2 {
        return None;
    }
    let address = segments[segments.len() - 1];
    let service = segments[segments.len() - 2];
    Some(ScrapeTarget {
        targets: vec![address.to_string()],
        labels: BTreeMap::from([(SOURCE_NAME_LABEL.to_string(), service.to_string())]),
    })
}

fn base_name(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv(key: &str) -> (String, Vec<u8>) {
        (key.to_string(), Vec::new())
    }

    #[test]
    fn test_derive_members() {
        let kvs = vec![
            kv("/registry/proml1/10.0.0.1:9090"),
            kv("/registry/proml1/10.0.0.2:9090"),
        ];
        let peers = derive_members(&kvs, "/registry/proml1/");
        assert_eq!(peers.len(), 2);
        assert!(peers.contains("10.0.0.1:9090"));
        assert!(peers.contains("10.0.0.2:9090"));
    }

    #[test]
    fn test_derive_members_empty() {
        assert!(derive_members(&[], "/registry/proml1/").is_empty());
    }

    #[test]
    fn test_derive_targets() {
        let kvs = vec![
            kv("/services/svc1/host1:9100"),
            kv("/services/svc1/host2:9100"),
            kv("/services/svc2/host3:9100"),
        ];
        let targets = derive_targets(&kvs, "/services/");
        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0].targets, vec!["host1:9100".to_string()]);
        assert_eq!(targets[0].labels.get(SOURCE_NAME_LABEL).unwrap(), "svc1");
        assert_eq!(targets[2].labels.get(SOURCE_NAME_LABEL).unwrap(), "svc2");
    }

    #[test]
    fn test_derive_targets_nested_key_uses_last_two_segments() {
        let kvs = vec![kv("/services/region/svc1/host1:9100")];
        let targets = derive_targets(&kvs, "/services/");
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].targets, vec!["host1:9100".to_string()]);
        assert_eq!(targets[0].labels.get(SOURCE_NAME_LABEL).unwrap(), "svc1");
    }

    #[test]
    fn test_malformed_catalogue_key_is_skipped() {
        let kvs = vec![kv("/services/orphan"), kv("/services/svc1/host1:9100")];
        let targets = derive_targets(&kvs, "/services/");
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].targets, vec!["host1:9100".to_string()]);
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("/a/b/c"), "c");
        assert_eq!(base_name("/a/b/c/"), "c");
        assert_eq!(base_name("c"), "c");
    }
}
