// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Benjamin Chess
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::metrics;

/// File-SD target file consumed by the scraper.
pub const TARGET_FILE: &str = "/servers.json";
/// Live-reload endpoint of the co-located scraper.
pub const RELOAD_URL: &str = "http://localhost:9090/-/reload";

const RELOAD_TIMEOUT: Duration = Duration::from_secs(5);

/// One scrape target record in the scraper's file-SD format. The first
/// address is the sharding key. BTreeMap keeps label order canonical so the
/// serialized form is deterministic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeTarget {
    pub targets: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

pub type TargetSet = Vec<ScrapeTarget>;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("could not serialize targets: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("could not write target file: {0}")]
    Write(#[from] std::io::Error),
}

/// Materializes a target subset for the scraper and pokes it to reload.
pub struct Publisher {
    target_file: PathBuf,
    reload_url: String,
    http: reqwest::Client,
}

impl Publisher {
    pub fn new(target_file: impl Into<PathBuf>, reload_url: impl Into<String>) -> Self {
        Publisher {
            target_file: target_file.into(),
            reload_url: reload_url.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Write `subset` to the target file and trigger a scraper reload.
    /// Publishing the same subset twice produces byte-identical content.
    /// Reload failures are downgraded to warnings; the scraper picks the
    /// file up on its next natural load anyway.
    pub async fn publish(&self, subset: TargetSet) -> Result<(), PublishError> {
        let contents = encode(subset)?;
        log::debug!(
            "writing {}: '{}'",
            self.target_file.display(),
            String::from_utf8_lossy(&contents)
        );
        self.write_atomic(&contents)?;
        self.reload().await;
        Ok(())
    }

    // Write to a sibling temp file and rename over the destination so the
    // scraper never observes a partial file.
    fn write_atomic(&self, contents: &[u8]) -> Result<(), std::io::Error> {
        let dir = self.target_file.parent().unwrap_or(Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(contents)?;
        tmp.persist(&self.target_file).map_err(|e| e.error)?;
        Ok(())
    }

    /// Force the scraper to pick up its configuration live.
    pub async fn reload(&self) {
        let result = self
            .http
            .post(&self.reload_url)
            .timeout(RELOAD_TIMEOUT)
            .body("")
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {
                log::debug!("scraper reload triggered");
            }
            Ok(resp) => {
                metrics::RELOAD_FAILURES.inc();
                log::warn!("scraper reload returned {}. Ignoring.", resp.status());
            }
            Err(err) => {
                metrics::RELOAD_FAILURES.inc();
                log::warn!(
                    "couldn't reload the scraper. Maybe it isn't up yet and will \
                     read the target file as soon as it starts. err={err}"
                );
            }
        }
    }
}

/// Canonical serialized form: records ordered by first target address,
/// labels ordered by key.
fn encode(mut subset: TargetSet) -> Result<Vec<u8>, serde_json::Error> {
    subset.sort_by(|a, b| a.targets.cmp(&b.targets));
    serde_json::to_vec(&subset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(addr: &str, labels: &[(&str, &str)]) -> ScrapeTarget {
        ScrapeTarget {
            targets: vec![addr.to_string()],
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_encode_is_canonical() {
        let a = target("a:1", &[]);
        let b = target("b:2", &[("prsn", "svc1")]);
        let one = encode(vec![a.clone(), b.clone()]).unwrap();
        let two = encode(vec![b, a]).unwrap();
        assert_eq!(one, two);
        assert_eq!(
            String::from_utf8(one).unwrap(),
            r#"[{"targets":["a:1"]},{"targets":["b:2"],"labels":{"prsn":"svc1"}}]"#
        );
    }

    #[test]
    fn test_encode_empty_subset() {
        assert_eq!(encode(vec![]).unwrap(), b"[]");
    }

    #[test]
    fn test_empty_labels_are_omitted() {
        let encoded = encode(vec![target("h:9100", &[])]).unwrap();
        assert_eq!(
            String::from_utf8(encoded).unwrap(),
            r#"[{"targets":["h:9100"]}]"#
        );
    }
}
