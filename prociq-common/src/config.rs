//! Configuration loading for ProcIQ services
//!
//! Resolution priority for every setting: environment variable, then TOML
//! config file, then compiled default. The config file location itself
//! follows the same priority (`PROCIQ_CONFIG` env var, then the platform
//! config directory).

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Service-level settings for the ingestion service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// SQLite database file path
    pub database_path: PathBuf,

    /// HTTP bind address, e.g. "127.0.0.1:5810"
    pub bind_address: String,

    /// Pipeline tunables
    pub pipeline: PipelineConfig,
}

/// Pipeline tunables
///
/// The match thresholds and weights are product-documented defaults, not
/// derived constants; deployments may tune them per organization corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Composite score at or above which a candidate auto-matches
    pub auto_match_threshold: f64,

    /// Composite score at or above which (but below auto) a candidate
    /// routes to the conflict queue for human review
    pub review_threshold: f64,

    /// Weight of the token-set overlap component in name scoring
    pub token_overlap_weight: f64,

    /// Weight of the character-similarity component in name scoring
    pub edit_distance_weight: f64,

    /// Per-dimension weights for the composite quality score
    pub quality_weights: QualityWeights,

    /// Business dates within this many days of ingestion score full
    /// timeliness
    pub recency_window_days: i64,

    /// Timeliness decays linearly to zero at this many days
    pub recency_outer_bound_days: i64,

    /// Bounded worker pool size for per-record processing
    pub worker_count: usize,

    /// Per-record processing timeout (seconds); a record exceeding it is
    /// marked errored and picked up on the next pipeline pass
    pub record_timeout_secs: u64,
}

/// Weights for the six quality dimensions (normalized at scoring time)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityWeights {
    pub completeness: f64,
    pub consistency: f64,
    pub validity: f64,
    pub timeliness: f64,
    pub uniqueness: f64,
    pub accuracy: f64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database_path: default_data_dir().join("ingest.db"),
            bind_address: "127.0.0.1:5810".to_string(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            auto_match_threshold: 0.95,
            review_threshold: 0.75,
            token_overlap_weight: 0.5,
            edit_distance_weight: 0.4,
            quality_weights: QualityWeights::default(),
            recency_window_days: 730,
            recency_outer_bound_days: 1825,
            worker_count: 4,
            record_timeout_secs: 30,
        }
    }
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            completeness: 1.0,
            consistency: 1.0,
            validity: 1.0,
            timeliness: 1.0,
            uniqueness: 1.0,
            accuracy: 1.0,
        }
    }
}

impl IngestConfig {
    /// Load configuration with env > TOML > default priority
    pub fn load() -> Result<Self> {
        let mut config = match config_file_path() {
            Some(path) if path.exists() => {
                let config = read_toml_config(&path)?;
                info!(path = %path.display(), "Configuration loaded from TOML");
                config
            }
            _ => {
                info!("No config file found, using compiled defaults");
                Self::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides (highest priority)
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("PROCIQ_DATABASE_PATH") {
            self.database_path = PathBuf::from(path);
            info!("Database path overridden from environment");
        }
        if let Ok(addr) = std::env::var("PROCIQ_BIND_ADDRESS") {
            self.bind_address = addr;
            info!("Bind address overridden from environment");
        }
        if let Ok(n) = std::env::var("PROCIQ_WORKER_COUNT") {
            match n.parse::<usize>() {
                Ok(n) if n > 0 => self.pipeline.worker_count = n,
                _ => warn!(value = %n, "Ignoring invalid PROCIQ_WORKER_COUNT"),
            }
        }
    }

    /// Validate settings that have hard constraints
    pub fn validate(&self) -> Result<()> {
        let p = &self.pipeline;
        if !(0.0..=1.0).contains(&p.auto_match_threshold)
            || !(0.0..=1.0).contains(&p.review_threshold)
        {
            return Err(Error::Config(
                "Match thresholds must be within [0.0, 1.0]".to_string(),
            ));
        }
        if p.review_threshold >= p.auto_match_threshold {
            return Err(Error::Config(format!(
                "Review threshold ({}) must be below auto-match threshold ({})",
                p.review_threshold, p.auto_match_threshold
            )));
        }
        if p.worker_count == 0 {
            return Err(Error::Config("Worker count must be at least 1".to_string()));
        }
        if p.recency_outer_bound_days <= p.recency_window_days {
            return Err(Error::Config(
                "Recency outer bound must exceed the recency window".to_string(),
            ));
        }
        Ok(())
    }
}

/// Read and parse a TOML config file
pub fn read_toml_config(path: &Path) -> Result<IngestConfig> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| Error::Config(format!("Invalid TOML in {}: {}", path.display(), e)))
}

/// Write config to a TOML file (used by tests and setup tooling)
pub fn write_toml_config(config: &IngestConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

/// Resolve the config file path: env var, then platform config dir
fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("PROCIQ_CONFIG") {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|d| d.join("prociq").join("ingest.toml"))
}

/// Platform data directory for service-owned files (database)
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("prociq"))
        .unwrap_or_else(|| PathBuf::from("./prociq_data"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = IngestConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.auto_match_threshold, 0.95);
        assert_eq!(config.pipeline.review_threshold, 0.75);
    }

    #[test]
    fn test_toml_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ingest.toml");

        let mut config = IngestConfig::default();
        config.pipeline.worker_count = 8;
        config.pipeline.auto_match_threshold = 0.97;

        write_toml_config(&config, &path).unwrap();
        let loaded = read_toml_config(&path).unwrap();

        assert_eq!(loaded.pipeline.worker_count, 8);
        assert_eq!(loaded.pipeline.auto_match_threshold, 0.97);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ingest.toml");
        std::fs::write(&path, "bind_address = \"0.0.0.0:9000\"\n").unwrap();

        let loaded = read_toml_config(&path).unwrap();
        assert_eq!(loaded.bind_address, "0.0.0.0:9000");
        assert_eq!(loaded.pipeline.review_threshold, 0.75);
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let mut config = IngestConfig::default();
        config.pipeline.review_threshold = 0.96;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = IngestConfig::default();
        config.pipeline.worker_count = 0;
        assert!(config.validate().is_err());
    }
}
