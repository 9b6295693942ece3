use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::consolidation::ConsolidationConfig;
use crate::error::{EideticError, Result};
use crate::fanout::FanoutConfig;
use crate::memory::weight::{WeightBands, WeightConfig};
use crate::router::RoutingConfig;
use crate::synthesis::SynthesisConfig;

/// Main configuration structure for Eidetic
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Weight engine parameters
    #[serde(default)]
    pub weight: WeightConfig,
    /// Weight band lower bounds used for statistics
    #[serde(default)]
    pub bands: WeightBands,
    /// Routing thresholds and decision cache
    #[serde(default)]
    pub routing: RoutingConfig,
    /// Fan-out concurrency and timeouts
    #[serde(default)]
    pub fanout: FanoutConfig,
    /// Recall defaults and access tracking
    #[serde(default)]
    pub recall: RecallConfig,
    /// Result ranking and association strength
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    /// Background consolidation cycles
    #[serde(default)]
    pub consolidation: ConsolidationConfig,
    /// Snapshot location
    #[serde(default)]
    pub storage: StorageConfig,
    /// Admin HTTP server
    #[serde(default)]
    pub admin: AdminConfig,
}

/// Recall request defaults
#[derive(Debug, Clone, Deserialize)]
pub struct RecallConfig {
    /// Weight floor when the request names none
    #[serde(default = "default_min_weight")]
    pub min_weight: f32,
    /// Result count when the request names none
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Upper bound on any requested result count
    #[serde(default = "default_max_results_cap")]
    pub max_results_cap: usize,
    /// Entries kept by the access tracker for association discovery
    #[serde(default = "default_tracker_capacity")]
    pub tracker_capacity: usize,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            min_weight: default_min_weight(),
            max_results: default_max_results(),
            max_results_cap: default_max_results_cap(),
            tracker_capacity: default_tracker_capacity(),
        }
    }
}

fn default_min_weight() -> f32 {
    0.5
}

fn default_max_results() -> usize {
    10
}

fn default_max_results_cap() -> usize {
    50
}

fn default_tracker_capacity() -> usize {
    crate::memory::DEFAULT_TRACKER_CAPACITY
}

/// Snapshot storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Base directory for the record snapshot
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Write a snapshot after every completed consolidation cycle
    #[serde(default = "default_snapshot_after_cycle")]
    pub snapshot_after_cycle: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            snapshot_after_cycle: default_snapshot_after_cycle(),
        }
    }
}

impl StorageConfig {
    /// Path of the record snapshot inside the data directory
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(crate::storage::SNAPSHOT_FILE)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".eidetic"))
        .unwrap_or_else(|| PathBuf::from(".eidetic"))
}

fn default_snapshot_after_cycle() -> bool {
    true
}

/// Admin HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    /// Address to listen on (e.g., "127.0.0.1:9797")
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:9797".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Load from an explicit path, or from the first default location that exists
    ///
    /// Default locations, in order: `~/.eidetic/config.toml`,
    /// `<config_dir>/eidetic/config.toml`, `./config.toml`. With none present
    /// the defaults are used.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            tracing::info!("Loading config from: {}", path.display());
            return Self::from_file(&path);
        }

        let default_paths = [
            dirs::home_dir().map(|h| h.join(".eidetic").join("config.toml")),
            dirs::config_dir().map(|c| c.join("eidetic").join("config.toml")),
            Some(PathBuf::from("config.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }

    /// Parse and validate a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EideticError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no component can work with
    pub fn validate(&self) -> Result<()> {
        self.weight.validate()?;

        let recall = &self.recall;
        if !(0.0..=1.0).contains(&recall.min_weight) {
            return Err(EideticError::Config(format!(
                "recall.min_weight must be within [0, 1], got {}",
                recall.min_weight
            )));
        }
        if recall.max_results == 0 || recall.max_results > recall.max_results_cap {
            return Err(EideticError::Config(format!(
                "recall.max_results must be within [1, {}], got {}",
                recall.max_results_cap, recall.max_results
            )));
        }

        let consolidation = &self.consolidation;
        if consolidation.demotion_threshold >= consolidation.promotion_threshold {
            return Err(EideticError::Config(format!(
                "consolidation.demotion_threshold ({}) must be below promotion_threshold ({})",
                consolidation.demotion_threshold, consolidation.promotion_threshold
            )));
        }
        if consolidation.batch_size == 0 {
            return Err(EideticError::Config(
                "consolidation.batch_size must be at least 1".to_string(),
            ));
        }

        if self.fanout.max_concurrency == 0 {
            return Err(EideticError::Config(
                "fanout.max_concurrency must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.weight.decay_rate_per_day, 0.95);
        assert_eq!(config.weight.min_weight, 0.001);
        assert_eq!(config.routing.cache_ttl_secs, 3600);
        assert_eq!(config.fanout.max_concurrency, 8);
        assert_eq!(config.recall.min_weight, 0.5);
        assert_eq!(config.recall.max_results, 10);
        assert_eq!(config.recall.max_results_cap, 50);
        assert_eq!(config.consolidation.fast_interval_mins, 90);
        assert_eq!(config.consolidation.slow_interval_mins, 360);
        assert_eq!(config.consolidation.working_capacity, 1024);
        assert_eq!(config.admin.listen_addr, "127.0.0.1:9797");
        assert!(config.storage.data_dir.ends_with(".eidetic"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
[weight]
decay_rate_per_day = 0.9
min_weight = 0.01

[routing]
cache_ttl_secs = 60

[fanout]
max_concurrency = 2
call_timeout_ms = 500

[recall]
min_weight = 0.3
max_results = 20

[consolidation]
fast_interval_mins = 30
working_capacity = 16

[storage]
data_dir = "/tmp/eidetic"

[admin]
listen_addr = "0.0.0.0:8080"
"#;

        let config = Config::from_toml_str(toml_str).expect("Failed to parse TOML");

        assert_eq!(config.weight.decay_rate_per_day, 0.9);
        assert_eq!(config.weight.min_weight, 0.01);
        assert_eq!(config.weight.boost_factor, 1.2);
        assert_eq!(config.routing.cache_ttl_secs, 60);
        assert_eq!(config.fanout.max_concurrency, 2);
        assert_eq!(config.fanout.call_timeout_ms, 500);
        assert_eq!(config.recall.min_weight, 0.3);
        assert_eq!(config.recall.max_results, 20);
        assert_eq!(config.consolidation.fast_interval_mins, 30);
        assert_eq!(config.consolidation.slow_interval_mins, 360);
        assert_eq!(config.consolidation.working_capacity, 16);
        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/eidetic"));
        assert_eq!(
            config.storage.snapshot_path(),
            PathBuf::from("/tmp/eidetic/records.json")
        );
        assert_eq!(config.admin.listen_addr, "0.0.0.0:8080");
    }

    #[test]
    fn test_toml_partial_deserialization() {
        let toml_str = r#"
[consolidation]
enabled = false
"#;

        let config = Config::from_toml_str(toml_str).expect("Failed to parse partial TOML");

        assert!(!config.consolidation.enabled);
        assert_eq!(config.consolidation.promotion_threshold, 0.7);
        assert_eq!(config.routing.preview_chars, 100);
        assert_eq!(config.synthesis.score_weight, 0.7);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = Config::from_toml_str("[recall]\nmin_weight = 1.5\n").unwrap_err();
        assert!(matches!(err, EideticError::Config(_)));

        let err = Config::from_toml_str(
            "[consolidation]\npromotion_threshold = 0.2\ndemotion_threshold = 0.5\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("demotion_threshold"));

        let err = Config::from_toml_str("[recall]\nmax_results = 100\n").unwrap_err();
        assert!(err.to_string().contains("max_results"));
    }

    #[test]
    fn test_malformed_toml() {
        let err = Config::from_toml_str("[weight\nbroken").unwrap_err();
        assert!(matches!(err, EideticError::Config(_)));
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[admin]\nlisten_addr = \"127.0.0.1:1234\"\n").unwrap();

        let config = Config::load(Some(path)).unwrap();
        assert_eq!(config.admin.listen_addr, "127.0.0.1:1234");

        let missing = Config::load(Some(dir.path().join("missing.toml")));
        assert!(matches!(missing, Err(EideticError::Config(_))));
    }
}
