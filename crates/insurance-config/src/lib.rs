//! Layered YAML configuration for the worker engine, plus the environment
//! secrets it needs alongside it.

pub mod secrets;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::fs;

pub use secrets::{resolve_secrets, ResolvedSecrets};

/// The recognized configuration options of the worker engine, with the
/// documented defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub batch_size: i64,
    pub tick_microseconds: u64,
    pub timeout_seconds: u64,
    pub maximum_number_of_retries: i32,
    pub keep_alive: bool,
    pub use_db_reconnect: bool,
    pub base_delay_ms: u64,
    pub retry_ceiling_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 100,
            tick_microseconds: 2_000_000,
            timeout_seconds: 5,
            maximum_number_of_retries: 10,
            keep_alive: true,
            use_db_reconnect: true,
            base_delay_ms: 1_000,
            retry_ceiling_seconds: 3_600,
        }
    }
}

impl WorkerConfig {
    /// Build a `WorkerConfig` from a merged config JSON value, falling back
    /// to defaults for anything absent or malformed.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value.get("worker") {
            Some(worker_section) => serde_json::from_value(worker_section.clone())
                .context("parsing the `worker` config section"),
            None => Ok(Self::default()),
        }
    }
}

/// Result of loading and deep-merging a sequence of YAML config files.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_json: Value,
}

impl LoadedConfig {
    pub fn worker_config(&self) -> Result<WorkerConfig> {
        WorkerConfig::from_value(&self.config_json)
    }
}

/// Load and deep-merge YAML files in order; later files override earlier
/// ones. Missing optional layers are the caller's responsibility to filter
/// before calling this (mirrors the teacher's layered config loader, minus
/// the canonicalization/hashing step that existed only for reproducibility
/// auditing of trading runs and has no use here).
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());

    for path in paths {
        let raw = fs::read_to_string(path).with_context(|| format!("reading config file: {path}"))?;
        let yaml_value: serde_yaml::Value =
            serde_yaml::from_str(&raw).with_context(|| format!("parsing config file as YAML: {path}"))?;
        let json_value =
            serde_json::to_value(yaml_value).context("converting YAML config to JSON")?;
        deep_merge(&mut merged, json_value);
    }

    Ok(LoadedConfig { config_json: merged })
}

/// Objects merge recursively; arrays and scalars are overwritten wholesale
/// by the later layer.
fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (key, value) in src_map {
                match dst_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        dst_map.insert(key, value);
                    }
                }
            }
        }
        (dst_slot, src_value) => {
            *dst_slot = src_value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = WorkerConfig::default();
        assert!(cfg.enabled);
        assert_eq!(cfg.batch_size, 100);
        assert_eq!(cfg.tick_microseconds, 2_000_000);
        assert_eq!(cfg.timeout_seconds, 5);
        assert_eq!(cfg.maximum_number_of_retries, 10);
        assert!(cfg.keep_alive);
        assert!(cfg.use_db_reconnect);
    }

    #[test]
    fn from_value_falls_back_to_defaults_when_worker_section_absent() {
        let cfg = WorkerConfig::from_value(&serde_json::json!({})).unwrap();
        assert_eq!(cfg.batch_size, 100);
    }

    #[test]
    fn from_value_honors_overrides() {
        let cfg = WorkerConfig::from_value(&serde_json::json!({
            "worker": { "batch_size": 25, "enabled": false }
        }))
        .unwrap();
        assert_eq!(cfg.batch_size, 25);
        assert!(!cfg.enabled);
        // Untouched fields still take their defaults.
        assert_eq!(cfg.timeout_seconds, 5);
    }

    #[test]
    fn deep_merge_overrides_scalars_and_merges_nested_objects() {
        let mut base = serde_json::json!({"worker": {"batch_size": 100, "enabled": true}});
        let overlay = serde_json::json!({"worker": {"batch_size": 50}});
        deep_merge(&mut base, overlay);
        assert_eq!(base["worker"]["batch_size"], 50);
        assert_eq!(base["worker"]["enabled"], true);
    }
}
