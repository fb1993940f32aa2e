// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tourguard

//! Configuration module

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory
    pub data_dir: PathBuf,

    /// Directory for persisted model blobs
    pub model_dir: PathBuf,

    /// Log level
    pub log_level: String,

    /// Geofence configuration
    pub geofence: GeofenceConfig,

    /// Feature extraction configuration
    pub features: FeatureConfig,

    /// Isolation forest configuration
    pub anomaly: AnomalyConfig,

    /// Temporal heuristics configuration
    pub temporal: TemporalConfig,

    /// Score fusion configuration
    pub scoring: ScoringConfig,

    /// Model retraining configuration
    pub lifecycle: LifecycleConfig,

    /// Real-time processing configuration
    pub realtime: RealtimeConfig,

    /// Database configuration
    pub database: DatabaseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            model_dir: PathBuf::from("./data/models"),
            log_level: "info".to_string(),
            geofence: GeofenceConfig::default(),
            features: FeatureConfig::default(),
            anomaly: AnomalyConfig::default(),
            temporal: TemporalConfig::default(),
            scoring: ScoringConfig::default(),
            lifecycle: LifecycleConfig::default(),
            realtime: RealtimeConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Load or create default configuration
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            config.save(path)?;
            Ok(config)
        }
    }

    /// Get configuration directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("tourguard"))
            .unwrap_or_else(|| PathBuf::from("./config"))
    }

    /// Get default configuration path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Point data, database and models under a new root
    pub fn with_data_dir(mut self, data_dir: PathBuf) -> Self {
        self.model_dir = data_dir.join("models");
        self.database.path = data_dir.join("tourguard.db");
        self.data_dir = data_dir;
        self
    }
}

/// Geofence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeofenceConfig {
    /// Zone snapshot lifetime in seconds
    pub zone_cache_ttl_secs: u64,
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self {
            zone_cache_ttl_secs: 300,
        }
    }
}

impl GeofenceConfig {
    pub fn zone_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.zone_cache_ttl_secs)
    }
}

/// Feature extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Most recent history points fed to the extractor
    pub history_window: usize,

    /// Minimum history points before features are meaningful
    pub min_history: usize,

    /// Speed below which an interval counts as inactive (km/h)
    pub inactivity_speed_kmh: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            history_window: 50,
            min_history: 2,
            inactivity_speed_kmh: 0.1,
        }
    }
}

/// Isolation forest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Number of isolation trees
    pub n_estimators: usize,

    /// Sub-sample size per tree
    pub max_samples: usize,

    /// Expected outlier fraction
    pub contamination: f64,

    /// RNG seed
    pub seed: u64,

    /// Anomaly score above which an alert is raised
    pub alert_threshold: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_samples: 256,
            contamination: 0.1,
            seed: 42,
            alert_threshold: 0.7,
        }
    }
}

/// Temporal heuristics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemporalConfig {
    /// Points required before any risk is computed
    pub min_points: usize,

    /// Speed variance considered erratic when untrained
    pub erratic_variance: f64,

    /// Temporal risk above which an alert is raised
    pub alert_threshold: f64,
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            min_points: 5,
            erratic_variance: 5.0,
            alert_threshold: 0.7,
        }
    }
}

/// Score fusion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Flat penalty inside a restricted zone
    pub geofence_penalty: i64,

    /// Points for an anomaly score of 1.0
    pub anomaly_weight: f64,

    /// Points for a temporal risk of 1.0
    pub temporal_weight: f64,

    /// Bonus when nothing looks wrong
    pub clean_bonus: i64,

    /// Anomaly score below which the bonus applies
    pub bonus_max_anomaly: f64,

    /// Temporal risk below which the bonus applies
    pub bonus_max_temporal: f64,

    /// Penalty applied by an SOS
    pub sos_penalty: i64,

    /// Score below which a low-score alert is raised
    pub low_score_alert: u8,

    /// Danger level at which geofence alerts become HIGH
    pub high_danger_level: u8,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            geofence_penalty: 30,
            anomaly_weight: 25.0,
            temporal_weight: 20.0,
            clean_bonus: 5,
            bonus_max_anomaly: 0.2,
            bonus_max_temporal: 0.3,
            sos_penalty: 40,
            low_score_alert: 40,
            high_danger_level: 4,
        }
    }
}

/// Model retraining configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Seconds between scheduled retrains
    pub retrain_interval_secs: u64,

    /// Trailing window for scheduled retrains
    pub days_back: u32,

    /// Trailing window for forced retrains
    pub force_days_back: u32,

    /// Training row cap
    pub row_limit: usize,

    /// Minimum rows before training is attempted
    pub min_data_points: usize,

    /// Pause after a failed training pass
    pub failure_backoff_secs: u64,

    /// Train every model once at startup
    pub initial_training: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            retrain_interval_secs: 300,
            days_back: 1,
            force_days_back: 3,
            row_limit: 5000,
            min_data_points: 25,
            failure_backoff_secs: 30,
            initial_training: true,
        }
    }
}

/// Real-time processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Sweep period for unassessed locations
    pub sweep_interval_secs: u64,

    /// How far back the sweep looks
    pub sweep_lookback_secs: u64,

    /// Locations claimed per sweep
    pub sweep_limit: usize,

    /// Wall-clock budget for model inference
    pub inference_timeout_ms: u64,

    /// Work queue capacity
    pub queue_capacity: usize,

    /// Age after which an unfinished claim may be taken over
    pub claim_lease_secs: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 15,
            sweep_lookback_secs: 120,
            sweep_limit: 50,
            inference_timeout_ms: 750,
            queue_capacity: 1024,
            claim_lease_secs: 60,
        }
    }
}

impl RealtimeConfig {
    pub fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.inference_timeout_ms)
    }

    /// Claims taken before this instant are considered abandoned.
    pub fn claim_cutoff(&self, now: chrono::DateTime<chrono::Utc>) -> chrono::DateTime<chrono::Utc> {
        now - chrono::Duration::seconds(self.claim_lease_secs as i64)
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database path
    pub path: PathBuf,

    /// Busy timeout in milliseconds
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/tourguard.db"),
            busy_timeout_ms: 5000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_round_trip_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.lifecycle.min_data_points, 25);
        assert_eq!(parsed.realtime.inference_timeout_ms, 750);
        assert_eq!(parsed.scoring.geofence_penalty, 30);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let parsed: Config = toml::from_str("[lifecycle]\nmin_data_points = 10\n").unwrap();
        assert_eq!(parsed.lifecycle.min_data_points, 10);
        assert_eq!(parsed.lifecycle.retrain_interval_secs, 300);
        assert_eq!(parsed.features.history_window, 50);
    }

    #[test]
    fn test_old_top_level_keys_are_ignored() {
        let parsed: Config = toml::from_str("app_name = \"TourGuard\"\nversion = \"0.1.0\"\n").unwrap();
        assert_eq!(parsed.realtime.claim_lease_secs, 60);

        let text = toml::to_string_pretty(&Config::default()).unwrap();
        assert!(!text.contains("app_name"));
    }

    #[test]
    fn test_with_data_dir() {
        let config = Config::default().with_data_dir(PathBuf::from("/tmp/tg"));
        assert_eq!(config.database.path, PathBuf::from("/tmp/tg/tourguard.db"));
        assert_eq!(config.model_dir, PathBuf::from("/tmp/tg/models"));
    }
}
