// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Benjamin Chess
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;

use crate::config::Config;
use crate::publish::TARGET_FILE;

pub const PROMETHEUS_CONFIG_FILE: &str = "/prometheus.yml";
pub const RULES_FILE: &str = "/rules.yml";

/// Render the scraper's static configuration: one file-SD job per scrape
/// path, all pointed at the target file this sidecar maintains.
pub fn write_prometheus_config(path: &Path, config: &Config) -> std::io::Result<()> {
    let contents = prometheus_config(config);
    log::debug!("{}: '{contents}'", path.display());
    std::fs::write(path, contents)
}

fn prometheus_config(config: &Config) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "global:");
    let _ = writeln!(out, "  scrape_interval: {}", config.scrape_interval);
    let _ = writeln!(out, "  scrape_timeout: {}", config.scrape_timeout);
    let _ = writeln!(out, "  evaluation_interval: {}", config.evaluation_interval);
    let _ = writeln!(out);
    let _ = writeln!(out, "rule_files:");
    let _ = writeln!(out, "  - {RULES_FILE}");
    let _ = writeln!(out);
    let _ = writeln!(out, "scrape_configs:");
    for (i, scrape_path) in config.scrape_paths.iter().enumerate() {
        let _ = writeln!(out, "  - job_name: targets-{i}");
        let _ = writeln!(out, "    metrics_path: {scrape_path}");
        let _ = writeln!(out, "    honor_labels: true");
        if !config.scrape_match.is_empty() {
            let _ = writeln!(out, "    params:");
            let _ = writeln!(out, "      'match[]':");
            let _ = writeln!(out, "        - '{{__name__=~\"{}\"}}'", config.scrape_match);
        }
        let _ = writeln!(out, "    file_sd_configs:");
        let _ = writeln!(out, "      - files:");
        let _ = writeln!(out, "          - {TARGET_FILE}");
    }
    out
}

/// Collect RECORD_RULE_<i>_NAME / RECORD_RULE_<i>_EXPR pairs from the
/// environment into a recording-rule group. No pairs means no file.
pub fn write_rules_from_env(path: &Path) -> std::io::Result<()> {
    let rules = rules_from_env(std::env::vars());
    if rules.is_empty() {
        log::info!("no recording rules found in environment variables");
        return Ok(());
    }
    log::debug!("found {} recording rules", rules.len());
    let contents = rules_file(&rules);
    log::debug!("{}: '{contents}'", path.display());
    std::fs::write(path, contents)
}

fn rules_from_env(vars: impl Iterator<Item = (String, String)>) -> Vec<(String, String)> {
    let env: HashMap<String, String> = vars.collect();
    let mut rules = Vec::new();
    for i in 1.. {
        // Numbering must be contiguous; the first gap ends the scan.
        let name = env.get(&format!("RECORD_RULE_{i}_NAME"));
        let expr = env.get(&format!("RECORD_RULE_{i}_EXPR"));
        let (Some(name), Some(expr)) = (name, expr) else {
            break;
        };
        rules.push((name.clone(), expr.clone()));
    }
    rules
}

fn rules_file(rules: &[(String, String)]) -> String {
    let mut out = String::from("groups:\n  - name: env-rules\n    rules:\n");
    for (name, expr) in rules {
        let _ = writeln!(out, "      - record: {name}");
        let _ = writeln!(out, "        expr: {expr}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Cli, Config};
    use clap::Parser;

    fn config(extra: &[&str]) -> Config {
        let base = [
            "promshard",
            "--scrape-etcd-url",
            "http://etcd0:2379",
            "--scrape-etcd-path",
            "/services",
        ];
        let cli = Cli::parse_from(base.iter().chain(extra.iter()).copied());
        Config::from_cli(&cli).unwrap()
    }

    #[test]
    fn test_prometheus_config_basics() {
        let rendered = prometheus_config(&config(&[]));
        assert!(rendered.contains("scrape_interval: 30s"));
        assert!(rendered.contains("job_name: targets-0"));
        assert!(rendered.contains("metrics_path: /metrics"));
        assert!(rendered.contains("- /servers.json"));
        assert!(!rendered.contains("match[]"));
    }

    #[test]
    fn test_prometheus_config_one_job_per_scrape_path() {
        let rendered = prometheus_config(&config(&["--scrape-paths", "/metrics,/federate"]));
        assert!(rendered.contains("job_name: targets-0"));
        assert!(rendered.contains("metrics_path: /metrics"));
        assert!(rendered.contains("job_name: targets-1"));
        assert!(rendered.contains("metrics_path: /federate"));
    }

    #[test]
    fn test_prometheus_config_scrape_match() {
        let rendered = prometheus_config(&config(&["--scrape-match", "job:.*"]));
        assert!(rendered.contains(r#"- '{__name__=~"job:.*"}'"#));
    }

    #[test]
    fn test_rules_from_env_stops_at_first_gap() {
        let vars = vec![
            ("RECORD_RULE_1_NAME".to_string(), "r1".to_string()),
            ("RECORD_RULE_1_EXPR".to_string(), "sum(up)".to_string()),
            ("RECORD_RULE_2_NAME".to_string(), "r2".to_string()),
            ("RECORD_RULE_2_EXPR".to_string(), "avg(up)".to_string()),
            // rule 3 missing, rule 4 must be ignored
            ("RECORD_RULE_4_NAME".to_string(), "r4".to_string()),
            ("RECORD_RULE_4_EXPR".to_string(), "max(up)".to_string()),
        ];
        let rules = rules_from_env(vars.into_iter());
        assert_eq!(
            rules,
            vec![
                ("r1".to_string(), "sum(up)".to_string()),
                ("r2".to_string(), "avg(up)".to_string()),
            ]
        );
    }

    #[test]
    fn test_rules_from_env_requires_expr() {
        let vars = vec![("RECORD_RULE_1_NAME".to_string(), "r1".to_string())];
        assert!(rules_from_env(vars.into_iter()).is_empty());
    }

    #[test]
    fn test_rules_file_shape() {
        let rendered = rules_file(&[("r1".to_string(), "sum(up)".to_string())]);
        assert_eq!(
            rendered,
            "groups:\n  - name: env-rules\n    rules:\n      - record: r1\n        expr: sum(up)\n"
        );
    }
}
