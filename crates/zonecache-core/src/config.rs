//! Runtime configuration.
//!
//! Read from the environment once and cached:
//!
//! - `ZONECACHE_NODES`: memory nodes (default 1)
//! - `ZONECACHE_CPUS_PER_NODE`: execution units per node (default 4)
//! - `ZONECACHE_ZONES`: optional zones, e.g. `dma,dma32,highmem`
//! - `ZONECACHE_MAX_RETRIES`, `ZONECACHE_RETRY_BACKOFF_US`: retry tuning
//! - `ZONECACHE_GROUPING`: mobility grouping on/off
//! - `ZONECACHE_KMALLOC`: build the size-class caches on/off
//! - `ZONECACHE_PAGES_PER_ZONE`, `ZONECACHE_MIN_WATERMARK`: simulated backend
//!
//! Unparseable values are ignored. The same structure can be loaded from
//! JSON.

use crate::error::AllocError;
use crate::page_alloc::RetryConfig;
use crate::simulated::SimulatedConfig;
use crate::topology::Topology;
use crate::zone::ZoneConfig;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub nodes: u16,
    pub cpus_per_node: usize,
    pub zones: ZoneConfig,
    pub max_retries: u32,
    pub retry_backoff_us: u64,
    /// Group pages by mobility.
    pub grouping: bool,
    /// Build the `kmalloc-*` caches at boot.
    pub kmalloc: bool,
    pub simulated: SimulatedConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            nodes: 1,
            cpus_per_node: 4,
            zones: ZoneConfig::default(),
            max_retries: retry.max_retries,
            retry_backoff_us: retry.backoff.as_micros() as u64,
            grouping: true,
            kmalloc: true,
            simulated: SimulatedConfig::default(),
        }
    }
}

/// Parse a boolean switch (case-insensitive). Unknown values yield `None`.
#[must_use]
pub fn parse_bool_loose(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "on" | "true" | "yes" | "enabled" => Some(true),
        "0" | "off" | "false" | "no" | "disabled" => Some(false),
        _ => None,
    }
}

fn parse<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

impl RuntimeConfig {
    /// Defaults overridden by `ZONECACHE_*` variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(v) = parse(lookup("ZONECACHE_NODES")) {
            cfg.nodes = v;
        }
        if let Some(v) = parse(lookup("ZONECACHE_CPUS_PER_NODE")) {
            cfg.cpus_per_node = v;
        }
        if let Some(v) = lookup("ZONECACHE_ZONES") {
            cfg.zones = ZoneConfig::from_list(&v);
        }
        if let Some(v) = parse(lookup("ZONECACHE_MAX_RETRIES")) {
            cfg.max_retries = v;
        }
        if let Some(v) = parse(lookup("ZONECACHE_RETRY_BACKOFF_US")) {
            cfg.retry_backoff_us = v;
        }
        if let Some(v) = lookup("ZONECACHE_GROUPING").and_then(|v| parse_bool_loose(&v)) {
            cfg.grouping = v;
        }
        if let Some(v) = lookup("ZONECACHE_KMALLOC").and_then(|v| parse_bool_loose(&v)) {
            cfg.kmalloc = v;
        }
        if let Some(v) = parse(lookup("ZONECACHE_PAGES_PER_ZONE")) {
            cfg.simulated.pages_per_zone = v;
        }
        if let Some(v) = parse(lookup("ZONECACHE_MIN_WATERMARK")) {
            cfg.simulated.min_watermark = v;
        }
        cfg
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    #[must_use]
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            backoff: Duration::from_micros(self.retry_backoff_us),
        }
    }

    pub fn topology(&self) -> Result<Topology, AllocError> {
        Topology::new(self.nodes, self.cpus_per_node, self.zones)
    }
}

static GLOBAL_CONFIG: OnceLock<RuntimeConfig> = OnceLock::new();

/// Process configuration (reads the environment on first call, caches
/// thereafter).
#[must_use]
pub fn runtime_config() -> &'static RuntimeConfig {
    GLOBAL_CONFIG.get_or_init(RuntimeConfig::from_env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.nodes, 1);
        assert_eq!(cfg.retry(), RetryConfig::default());
        assert!(cfg.grouping);
        assert_eq!(cfg.topology().unwrap().cpu_count(), 4);
    }

    #[test]
    fn env_overrides() {
        let cfg = RuntimeConfig::from_lookup(lookup(&[
            ("ZONECACHE_NODES", "2"),
            ("ZONECACHE_CPUS_PER_NODE", " 3 "),
            ("ZONECACHE_ZONES", "dma32,highmem"),
            ("ZONECACHE_GROUPING", "OFF"),
            ("ZONECACHE_RETRY_BACKOFF_US", "0"),
            ("ZONECACHE_PAGES_PER_ZONE", "128"),
        ]));
        assert_eq!((cfg.nodes, cfg.cpus_per_node), (2, 3));
        assert_eq!(
            cfg.zones,
            ZoneConfig {
                dma: false,
                dma32: true,
                highmem: true
            }
        );
        assert!(!cfg.grouping);
        assert!(cfg.retry().backoff.is_zero());
        assert_eq!(cfg.simulated.pages_per_zone, 128);
    }

    #[test]
    fn junk_values_are_ignored() {
        let cfg = RuntimeConfig::from_lookup(lookup(&[
            ("ZONECACHE_NODES", "many"),
            ("ZONECACHE_GROUPING", "maybe"),
        ]));
        assert_eq!(cfg, RuntimeConfig::default());
    }

    #[test]
    fn json_round_trip_and_partial_documents() {
        let cfg = RuntimeConfig::from_json(r#"{"nodes": 4, "zones": {"highmem": true}}"#).unwrap();
        assert_eq!(cfg.nodes, 4);
        assert!(cfg.zones.highmem);
        assert!(cfg.zones.dma);
        let back = RuntimeConfig::from_json(&cfg.to_json().unwrap()).unwrap();
        assert_eq!(back, cfg);
        assert!(RuntimeConfig::from_json("{").is_err());
    }

    #[test]
    fn bool_parsing() {
        assert_eq!(parse_bool_loose("Yes"), Some(true));
        assert_eq!(parse_bool_loose("0"), Some(false));
        assert_eq!(parse_bool_loose("sometimes"), None);
    }
}
