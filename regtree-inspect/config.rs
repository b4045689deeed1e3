//! Runtime configuration, loaded from an optional TOML file

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{RegtreeError, Result};

/// Default bound on busy-wait polls in procedural accessors
pub const DEFAULT_POLL_LIMIT: u32 = 1000;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Prefix prepended to /proc, /sys and /dev paths
    pub root_prefix: PathBuf,
    /// CPU list like "0-3,8"; detected when absent
    pub cpus: Option<String>,
    pub poll_limit: u32,
    /// Drivers to run discovery for
    pub drivers: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_prefix: std::env::var_os("REGTREE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/")),
            cpus: None,
            poll_limit: DEFAULT_POLL_LIMIT,
            drivers: vec!["cpuid".into(), "pci".into(), "msr".into()],
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RegtreeError::ConfigError(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(text).map_err(|e| RegtreeError::ConfigError(e.to_string()))?;
        if config.poll_limit == 0 {
            return Err(RegtreeError::ConfigError(
                "poll_limit must be at least 1".into(),
            ));
        }
        Ok(config)
    }

    /// Resolve an absolute system path under the configured prefix
    pub fn system_path(&self, path: &str) -> PathBuf {
        self.root_prefix.join(path.trim_start_matches('/'))
    }

    /// CPUs to describe, from the config or detected from sysfs
    pub fn cpu_list(&self) -> Result<Vec<u32>> {
        match &self.cpus {
            Some(list) => parse_cpu_list(list).ok_or_else(|| {
                RegtreeError::ConfigError(format!("Invalid CPU list '{list}'"))
            }),
            None => Ok(self.detect_online_cpus()),
        }
    }

    /// Detect online CPUs from /sys/devices/system/cpu/online
    pub fn detect_online_cpus(&self) -> Vec<u32> {
        std::fs::read_to_string(self.system_path("/sys/devices/system/cpu/online"))
            .ok()
            .and_then(|s| parse_cpu_list(&s))
            .unwrap_or_else(|| {
                tracing::warn!("Failed to detect online CPUs, using default: 0-7");
                (0..8).collect()
            })
    }

    pub fn driver_enabled(&self, name: &str) -> bool {
        self.drivers.iter().any(|d| d == name)
    }
}

/// Parse CPU list like "0-3,8-11" into Vec<u32>
pub fn parse_cpu_list(s: &str) -> Option<Vec<u32>> {
    let mut cpus = Vec::new();
    for part in s.trim().split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((start, end)) = part.split_once('-') {
            let start: u32 = start.trim().parse().ok()?;
            let end: u32 = end.trim().parse().ok()?;
            if end < start {
                return None;
            }
            cpus.extend(start..=end);
        } else {
            cpus.push(part.parse().ok()?);
        }
    }
    cpus.sort_unstable();
    cpus.dedup();
    (!cpus.is_empty()).then_some(cpus)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_list() {
        assert_eq!(parse_cpu_list("0-3,8"), Some(vec![0, 1, 2, 3, 8]));
        assert_eq!(parse_cpu_list("5\n"), Some(vec![5]));
        assert_eq!(parse_cpu_list("2,1,2"), Some(vec![1, 2]));
        assert_eq!(parse_cpu_list("3-1"), None);
        assert_eq!(parse_cpu_list("x"), None);
        assert_eq!(parse_cpu_list(""), None);
    }

    #[test]
    fn test_from_toml() {
        let config = Config::from_toml(
            r#"
            root_prefix = "/pcm"
            cpus = "0-1"
            poll_limit = 10
            drivers = ["cpuid"]
            "#,
        )
        .unwrap();
        assert_eq!(config.cpu_list().unwrap(), vec![0, 1]);
        assert_eq!(config.poll_limit, 10);
        assert!(config.driver_enabled("cpuid"));
        assert!(!config.driver_enabled("pci"));
        assert_eq!(
            config.system_path("/proc/bus/pci"),
            PathBuf::from("/pcm/proc/bus/pci")
        );
    }

    #[test]
    fn test_defaults_and_validation() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.poll_limit, DEFAULT_POLL_LIMIT);
        assert_eq!(config.drivers.len(), 3);

        assert!(Config::from_toml("poll_limit = 0").is_err());
        assert!(Config::from_toml("bogus = 1").is_err());
        let bad = Config {
            cpus: Some("a-b".into()),
            ..Config::default()
        };
        assert!(bad.cpu_list().is_err());
    }
}
