// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Benjamin Chess
use clap::{Parser, ValueEnum};
use log::LevelFilter;
use thiserror::Error;

#[derive(Copy, Clone, Debug, ValueEnum, PartialEq)]
pub enum CliLogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl From<CliLogLevel> for LevelFilter {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Debug => Self::Debug,
            CliLogLevel::Info => Self::Info,
            CliLogLevel::Warning => Self::Warn,
            CliLogLevel::Error => Self::Error,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "promshard", version, about = "Self-clustering scrape-sharding sidecar", long_about = None)]
pub struct Cli {
    #[arg(long = "loglevel", value_enum, env = "PROMSHARD_LOGLEVEL", default_value_t = CliLogLevel::Info)]
    pub loglevel: CliLogLevel,

    /// etcd URLs for the peer registry. When empty, registration is skipped
    /// and this instance acts as the sole peer.
    #[arg(long = "registry-etcd-url", env = "REGISTRY_ETCD_URL", default_value = "")]
    pub registry_etcd_url: String,

    /// etcd base path for registered services
    #[arg(long = "registry-etcd-base", env = "REGISTRY_ETCD_BASE", default_value = "/registry")]
    pub registry_etcd_base: String,

    /// Logical service name that groups peer instances. Ex.: proml1
    #[arg(long = "registry-service-name", env = "REGISTRY_SERVICE_NAME", default_value = "")]
    pub registry_service_name: String,

    /// Registration TTL in seconds. A killed instance vanishes from the
    /// registry after this time.
    #[arg(long = "registry-node-ttl", env = "REGISTRY_NODE_TTL", default_value_t = -1)]
    pub registry_node_ttl: i64,

    /// etcd URLs for the scrape catalogue. Ex.: http://etcd0:2379
    #[arg(long = "scrape-etcd-url", env = "SCRAPE_ETCD_URL", default_value = "")]
    pub scrape_etcd_url: String,

    /// Base etcd path for the servers to be scraped
    #[arg(long = "scrape-etcd-path", env = "SCRAPE_ETCD_PATH", default_value = "")]
    pub scrape_etcd_path: String,

    /// Distribute scrape targets among instances with consistent hashing so
    /// that each instance scrapes a different subset.
    #[arg(long = "scrape-shard-enable", env = "SCRAPE_SHARD_ENABLE")]
    pub scrape_shard_enable: bool,

    /// URI for scrape of each target. May contain a list separated by ','.
    #[arg(long = "scrape-paths", env = "SCRAPE_PATHS", default_value = "/metrics")]
    pub scrape_paths: String,

    #[arg(long = "scrape-interval", env = "SCRAPE_INTERVAL", default_value = "30s")]
    pub scrape_interval: String,

    #[arg(long = "scrape-timeout", env = "SCRAPE_TIMEOUT", default_value = "30s")]
    pub scrape_timeout: String,

    /// Metrics regex filter applied on scraped targets. Commonly used in
    /// conjunction with a /federate metrics endpoint.
    #[arg(long = "scrape-match", env = "SCRAPE_MATCH", default_value = "")]
    pub scrape_match: String,

    #[arg(long = "evaluation-interval", env = "EVALUATION_INTERVAL", default_value = "30s")]
    pub evaluation_interval: String,

    /// Port the sidecar serves its own /metrics on
    #[arg(long = "metrics-port", env = "PROMSHARD_METRICS_PORT", default_value_t = 9091)]
    pub metrics_port: u16,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("--{0} should be defined")]
    Missing(&'static str),
}

/// Peer-registry settings, present only when registration is enabled.
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    pub endpoints: Vec<String>,
    pub base: String,
    pub service_name: String,
    pub node_ttl: i64,
}

impl RegistryConfig {
    /// Prefix holding one key per live instance of this service.
    pub fn service_prefix(&self) -> String {
        format!("{}/{}/", self.base.trim_end_matches('/'), self.service_name)
    }
}

/// Validated configuration record handed to each component.
#[derive(Clone, Debug)]
pub struct Config {
    pub log_level: LevelFilter,
    pub registry: Option<RegistryConfig>,
    pub scrape_endpoints: Vec<String>,
    pub catalogue_prefix: String,
    pub shard_enable: bool,
    pub scrape_paths: Vec<String>,
    pub scrape_interval: String,
    pub scrape_timeout: String,
    pub scrape_match: String,
    pub evaluation_interval: String,
    pub metrics_port: u16,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        if cli.scrape_etcd_url.is_empty() {
            return Err(ConfigError::Missing("scrape-etcd-url"));
        }
        if cli.scrape_etcd_path.is_empty() {
            return Err(ConfigError::Missing("scrape-etcd-path"));
        }

        let registry = if cli.registry_etcd_url.is_empty() {
            None
        } else {
            if cli.registry_etcd_base.is_empty() {
                return Err(ConfigError::Missing("registry-etcd-base"));
            }
            if cli.registry_service_name.is_empty() {
                return Err(ConfigError::Missing("registry-service-name"));
            }
            if cli.registry_node_ttl <= 0 {
                return Err(ConfigError::Missing("registry-node-ttl"));
            }
            Some(RegistryConfig {
                endpoints: split_list(&cli.registry_etcd_url),
                base: cli.registry_etcd_base.clone(),
                service_name: cli.registry_service_name.clone(),
                node_ttl: cli.registry_node_ttl,
            })
        };

        Ok(Config {
            log_level: cli.loglevel.into(),
            registry,
            scrape_endpoints: split_list(&cli.scrape_etcd_url),
            catalogue_prefix: format!("{}/", cli.scrape_etcd_path.trim_end_matches('/')),
            shard_enable: cli.scrape_shard_enable,
            scrape_paths: split_list(&cli.scrape_paths),
            scrape_interval: cli.scrape_interval.clone(),
            scrape_timeout: cli.scrape_timeout.clone(),
            scrape_match: cli.scrape_match.clone(),
            evaluation_interval: cli.evaluation_interval.clone(),
            metrics_port: cli.metrics_port,
        })
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}
