//! # Configuration Module
//!
//! This module handles data directory setup and the detection parameters for
//! Muse Patterns.
//!
//! ## Data Storage
//!
//! The imported feature table is cached in the platform-standard data
//! directory:
//! - Linux: `~/.local/share/muse-patterns/`
//! - macOS: `~/Library/Application Support/muse-patterns/`
//! - Windows: `%APPDATA%\muse-patterns\`
//!
//! ## Detection Parameters
//!
//! [`DetectionConfig`] carries every threshold the detectors use. It has
//! built-in defaults, can be partially overridden from a JSON file (missing
//! keys keep their default), and is validated once before a detection run.
//! Nothing here is global: the value is passed explicitly into each detector.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::habits::SlotSchema;
use crate::play::{CategoricalFeature, NumericFeature};

/// Name of the subdirectory under the platform data directory.
const APP_DIR: &str = "muse-patterns";

/// File name of the feature-table cache.
const CACHE_FILE: &str = "plays.db";

/// Returns the platform-appropriate cache file path.
///
/// Creates the `muse-patterns` data directory if it doesn't exist yet.
///
/// # Errors
///
/// Fails if the system data directory cannot be determined or the
/// subdirectory cannot be created.
///
/// # Examples
///
/// ```no_run
/// use muse_patterns::config::get_cache_path;
///
/// let cache = get_cache_path()?;
/// println!("Cache location: {}", cache.display());
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn get_cache_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join(CACHE_FILE))
}

/// Returns the platform-appropriate data directory, creating it if needed.
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| {
        anyhow::anyhow!(
            "Could not determine system data directory. Please ensure your platform supports standard data directories."
        )
    })?;

    let app_dir = data_dir.join(APP_DIR);
    fs::create_dir_all(&app_dir).with_context(|| {
        format!(
            "Failed to create data directory at {}. Please check file permissions.",
            app_dir.display()
        )
    })?;

    Ok(app_dir)
}

/// Configuration for runtime behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Path to the feature-table cache
    pub cache_path: PathBuf,
}

impl RuntimeConfig {
    /// Runtime configuration rooted in the platform data directory
    pub fn new() -> Result<Self> {
        Ok(Self {
            cache_path: get_cache_path()?,
        })
    }

    /// Use `cache_path` if given, otherwise the platform default
    pub fn with_cache_path(cache_path: Option<PathBuf>) -> Result<Self> {
        match cache_path {
            Some(cache_path) => Ok(Self { cache_path }),
            None => Self::new(),
        }
    }
}

/// Invalid detection parameters, reported before any detection runs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field} must be at least 1")]
    ZeroValue { field: &'static str },

    #[error("{field} must be a positive, finite number (got {value})")]
    InvalidThreshold { field: &'static str, value: f64 },

    #[error("{field} must lie in [0, 1] (got {value})")]
    InvalidShare { field: &'static str, value: f64 },

    #[error("candidate weight {field} must be a non-negative, finite number (got {value})")]
    InvalidWeight { field: &'static str, value: f64 },

    #[error("at least one candidate weight must be non-zero")]
    AllWeightsZero,

    #[error("no features configured for {detector} detection")]
    NoFeatures { detector: &'static str },

    #[error("no habit schemas configured")]
    NoSchemas,

    #[error("{feature} is not an audio feature and cannot be used for audio clustering")]
    NonAudioClusterFeature { feature: NumericFeature },
}

/// Period detector parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodConfig {
    pub window_size_days: u32,
    pub step_size_days: u32,
    /// Shortest period kept after merging and refinement
    pub min_days: u32,
    pub zscore_threshold: f64,
    pub numeric_features: Vec<NumericFeature>,
    pub categorical_features: Vec<CategoricalFeature>,
}

impl Default for PeriodConfig {
    fn default() -> Self {
        Self {
            window_size_days: 7,
            step_size_days: 1,
            min_days: 2,
            zscore_threshold: 2.0,
            numeric_features: vec![
                NumericFeature::Valence,
                NumericFeature::Energy,
                NumericFeature::Danceability,
                NumericFeature::Speechiness,
            ],
            categorical_features: vec![CategoricalFeature::Country],
        }
    }
}

/// Audio sub-clustering of habit slots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioClusterConfig {
    pub enabled: bool,
    /// Number of clusters (K)
    pub k: usize,
    /// Minimum share of the slot's plays a cluster must hold
    pub min_share: f64,
    pub min_weeks: usize,
    pub features: Vec<NumericFeature>,
    pub seed: u64,
    pub max_iterations: usize,
}

impl Default for AudioClusterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            k: 3,
            min_share: 0.25,
            min_weeks: 3,
            features: vec![
                NumericFeature::Speechiness,
                NumericFeature::Energy,
                NumericFeature::Danceability,
                NumericFeature::Valence,
            ],
            seed: 42,
            max_iterations: 100,
        }
    }
}

/// Habit detector parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HabitConfig {
    /// Schemas to evaluate, in output order
    pub schemas: Vec<SlotSchema>,
    pub min_weeks: usize,
    pub min_streams_per_slot: usize,
    /// Threshold for audio features
    pub zscore_threshold: f64,
    /// Threshold for skip rate, attention span, session gap and artist loyalty
    pub behavioral_zscore_threshold: f64,
    pub min_num_features: usize,
    pub max_slots_per_schema: usize,
    /// Devices kept by name in the `day_device` schema; the rest become "Other"
    pub top_platforms: usize,
    pub numeric_features: Vec<NumericFeature>,
    pub categorical_features: Vec<CategoricalFeature>,
    pub audio: AudioClusterConfig,
}

impl Default for HabitConfig {
    fn default() -> Self {
        Self {
            schemas: SlotSchema::ALL.to_vec(),
            min_weeks: 4,
            min_streams_per_slot: 20,
            zscore_threshold: 1.0,
            behavioral_zscore_threshold: 0.8,
            min_num_features: 2,
            max_slots_per_schema: 5,
            top_platforms: 3,
            numeric_features: vec![
                NumericFeature::Valence,
                NumericFeature::Energy,
                NumericFeature::Danceability,
                NumericFeature::Speechiness,
                NumericFeature::SkipRate,
                NumericFeature::AttentionSpan,
            ],
            categorical_features: vec![CategoricalFeature::Device, CategoricalFeature::Country],
            audio: AudioClusterConfig::default(),
        }
    }
}

impl HabitConfig {
    /// Threshold that applies to `feature`.
    #[must_use]
    pub fn threshold_for(&self, feature: NumericFeature) -> f64 {
        if feature.is_behavioral() {
            self.behavioral_zscore_threshold
        } else {
            self.zscore_threshold
        }
    }
}

/// Label selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    pub top_artist_share: f64,
    pub min_device_share: f64,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            top_artist_share: 0.5,
            min_device_share: 0.6,
        }
    }
}

/// Linear coefficients of the candidate score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateWeights {
    pub count: f64,
    pub skip_rate: f64,
    pub attention_span: f64,
}

impl Default for CandidateWeights {
    fn default() -> Self {
        Self {
            count: 0.5,
            skip_rate: 0.3,
            attention_span: 0.2,
        }
    }
}

/// Every parameter of one detection run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum play events a pattern needs to be worth a playlist
    pub min_tracks_for_playlist: usize,
    pub period: PeriodConfig,
    pub habit: HabitConfig,
    pub naming: NamingConfig,
    pub weights: CandidateWeights,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_tracks_for_playlist: 15,
            period: PeriodConfig::default(),
            habit: HabitConfig::default(),
            naming: NamingConfig::default(),
            weights: CandidateWeights::default(),
        }
    }
}

impl DetectionConfig {
    /// Load a configuration file. Keys the file leaves out keep their default.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    /// Load `path` if given, otherwise the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Check every parameter. The first problem found is returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let period = &self.period;
        non_zero("period.window_size_days", period.window_size_days as usize)?;
        non_zero("period.step_size_days", period.step_size_days as usize)?;
        non_zero("period.min_days", period.min_days as usize)?;
        threshold("period.zscore_threshold", period.zscore_threshold)?;
        if period.numeric_features.is_empty() && period.categorical_features.is_empty() {
            return Err(ConfigError::NoFeatures { detector: "period" });
        }

        let habit = &self.habit;
        if habit.schemas.is_empty() {
            return Err(ConfigError::NoSchemas);
        }
        non_zero("habit.min_num_features", habit.min_num_features)?;
        non_zero("habit.max_slots_per_schema", habit.max_slots_per_schema)?;
        threshold("habit.zscore_threshold", habit.zscore_threshold)?;
        threshold(
            "habit.behavioral_zscore_threshold",
            habit.behavioral_zscore_threshold,
        )?;
        if habit.numeric_features.is_empty() && habit.categorical_features.is_empty() {
            return Err(ConfigError::NoFeatures { detector: "habit" });
        }

        let audio = &habit.audio;
        non_zero("habit.audio.k", audio.k)?;
        share("habit.audio.min_share", audio.min_share)?;
        if let Some(&feature) = audio.features.iter().find(|f| f.is_behavioral()) {
            return Err(ConfigError::NonAudioClusterFeature { feature });
        }

        share("naming.top_artist_share", self.naming.top_artist_share)?;
        share("naming.min_device_share", self.naming.min_device_share)?;

        let weights = &self.weights;
        for (field, value) in [
            ("count", weights.count),
            ("skip_rate", weights.skip_rate),
            ("attention_span", weights.attention_span),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidWeight { field, value });
            }
        }
        if weights.count + weights.skip_rate + weights.attention_span == 0.0 {
            return Err(ConfigError::AllWeightsZero);
        }

        Ok(())
    }
}

fn non_zero(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::ZeroValue { field })
    } else {
        Ok(())
    }
}

fn threshold(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidThreshold { field, value })
    }
}

fn share(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidShare { field, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_get_cache_path_structure() {
        let path = get_cache_path().expect("Should get valid path");

        assert_eq!(path.file_name().unwrap(), "plays.db");
        let parent = path.parent().expect("Should have parent directory");
        assert_eq!(parent.file_name().unwrap(), "muse-patterns");
        assert!(parent.is_dir());
    }

    #[test]
    fn test_runtime_config_explicit_cache_path() {
        let config = RuntimeConfig::with_cache_path(Some(PathBuf::from("/tmp/x.db"))).unwrap();
        assert_eq!(config.cache_path, PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(DetectionConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_zero_window_rejected() {
        let mut config = DetectionConfig::default();
        config.period.window_size_days = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroValue { field: "period.window_size_days" })
        );
    }

    #[test]
    fn test_non_finite_threshold_rejected() {
        let mut config = DetectionConfig::default();
        config.habit.zscore_threshold = f64::NAN;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidThreshold { field: "habit.zscore_threshold", .. })
        ));

        let mut config = DetectionConfig::default();
        config.period.zscore_threshold = -1.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidThreshold { .. })));
    }

    #[test]
    fn test_weights_validation() {
        let mut config = DetectionConfig::default();
        config.weights = CandidateWeights { count: 0.0, skip_rate: 0.0, attention_span: 0.0 };
        assert_eq!(config.validate(), Err(ConfigError::AllWeightsZero));

        config.weights.count = -0.5;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidWeight { field: "count", .. })));
    }

    #[test]
    fn test_share_and_cluster_validation() {
        let mut config = DetectionConfig::default();
        config.naming.min_device_share = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidShare { .. })));

        let mut config = DetectionConfig::default();
        config.habit.audio.k = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroValue { field: "habit.audio.k" }));

        let mut config = DetectionConfig::default();
        config.habit.audio.features.push(NumericFeature::SkipRate);
        assert_eq!(
            config.validate(),
            Err(ConfigError::NonAudioClusterFeature { feature: NumericFeature::SkipRate })
        );
    }

    #[test]
    fn test_empty_features_and_schemas_rejected() {
        let mut config = DetectionConfig::default();
        config.habit.schemas.clear();
        assert_eq!(config.validate(), Err(ConfigError::NoSchemas));

        let mut config = DetectionConfig::default();
        config.period.numeric_features.clear();
        config.period.categorical_features.clear();
        assert_eq!(config.validate(), Err(ConfigError::NoFeatures { detector: "period" }));
    }

    #[test]
    fn test_partial_config_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{ "period": {{ "window_size_days": 14 }}, "min_tracks_for_playlist": 30 }}"#).unwrap();

        let config = DetectionConfig::from_file(file.path()).unwrap();
        assert_eq!(config.period.window_size_days, 14);
        assert_eq!(config.period.step_size_days, 1);
        assert_eq!(config.min_tracks_for_playlist, 30);
        assert_eq!(config.habit, HabitConfig::default());
    }

    #[test]
    fn test_invalid_config_file_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{ "habit": {{ "schemas": [] }} }}"#).unwrap();
        assert!(DetectionConfig::from_file(file.path()).is_err());
    }
}
