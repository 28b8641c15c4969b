//! Tunables for the forecast engine.
//!
//! Every struct has a `bon` builder whose defaults match `Default`, and deserializes with
//! `#[serde(default)]` so a JSON document only needs the fields it changes.
//! [`ForecastConfig::validate`] rejects values the engine cannot run with.

use bon::Builder;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

/// Lags and rolling windows used to build model features, in periods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(default)]
pub struct FeatureSpec {
    #[builder(default = vec![1, 2, 3, 7, 14, 28, 365])]
    pub lags: Vec<usize>,
    #[builder(default = vec![3, 7, 14, 30])]
    pub windows: Vec<usize>,
}

impl Default for FeatureSpec {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl FeatureSpec {
    /// Number of preceding periods a target needs before features can be built.
    pub fn max_lookback(&self) -> usize {
        self.lags
            .iter()
            .chain(self.windows.iter())
            .copied()
            .max()
            .unwrap_or(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(default)]
pub struct SeasonalArConfig {
    #[builder(default = vec![1, 2])]
    pub lags: Vec<usize>,
    #[builder(default = vec![7, 14])]
    pub seasonal_lags: Vec<usize>,
    /// Added to the diagonal of the normal equations.
    #[builder(default = 1e-6)]
    pub ridge: f64,
    /// Fewer usable training rows than this and the family is skipped.
    #[builder(default = 30)]
    pub min_rows: usize,
}

impl Default for SeasonalArConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(default)]
pub struct GradientBoostingConfig {
    #[builder(default = 50)]
    pub n_stages: usize,
    #[builder(default = 3)]
    pub max_depth: usize,
    #[builder(default = 0.1)]
    pub learning_rate: f64,
    #[builder(default = 0.8)]
    pub subsample: f64,
    #[builder(default = 1)]
    pub min_samples_leaf: usize,
}

impl Default for GradientBoostingConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(default)]
pub struct RandomForestConfig {
    #[builder(default = 50)]
    pub n_trees: usize,
    #[builder(default = 10)]
    pub max_depth: usize,
    #[builder(default = 5)]
    pub min_samples_split: usize,
    #[builder(default = 2)]
    pub min_samples_leaf: usize,
    /// Share of features considered at each split.
    #[builder(default = 1.0 / 3.0)]
    pub max_feature_fraction: f64,
}

impl Default for RandomForestConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(default)]
pub struct TrainerConfig {
    #[builder(default = 42)]
    pub seed: u64,
    /// Share of dataset rows, taken from the end, held out for validation.
    #[builder(default = 0.4)]
    pub validation_fraction: f64,
    /// Minimum training samples the tree families need.
    #[builder(default = 20)]
    pub min_training_samples: usize,
    #[builder(default)]
    pub seasonal_ar: SeasonalArConfig,
    #[builder(default)]
    pub gradient_boosting: GradientBoostingConfig,
    #[builder(default)]
    pub random_forest: RandomForestConfig,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Top-level engine configuration.
///
/// # Example
///
/// ```
/// use rain_forecast::ForecastConfig;
///
/// let config = ForecastConfig::from_json_str(r#"{"years_back": 3}"#).unwrap();
/// assert_eq!(config.years_back, 3);
/// assert_eq!(config.min_row_fraction, 0.5);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(default)]
pub struct ForecastConfig {
    #[builder(default = 6)]
    pub years_back: u32,
    #[builder(default = 0.5)]
    pub min_row_fraction: f64,
    /// Variables trained concurrently per request.
    #[builder(default = 2)]
    pub training_parallelism: usize,
    #[builder(default = 25)]
    pub request_timeout_secs: u64,
    /// Where the history cache lives. `None` disables caching.
    pub cache_folder: Option<PathBuf>,
    /// Days of history averaged for the diurnal temperature amplitude.
    #[builder(default = 30)]
    pub diurnal_window_days: usize,
    /// Half-amplitude used when the history carries no max/min temperatures.
    #[builder(default = 4.0)]
    pub default_half_amplitude: f64,
    #[builder(default)]
    pub features: FeatureSpec,
    #[builder(default)]
    pub trainer: TrainerConfig,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ForecastConfig {
    /// Parses a (partial) JSON document and validates the result.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the values the engine depends on. Nothing is clamped or corrected.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.years_back == 0 {
            return Err(invalid("years_back", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.min_row_fraction) {
            return Err(invalid(
                "min_row_fraction",
                format!("{} is outside [0, 1]", self.min_row_fraction),
            ));
        }
        if self.training_parallelism == 0 {
            return Err(invalid("training_parallelism", "must be at least 1"));
        }
        let validation = self.trainer.validation_fraction;
        if !(validation > 0.0 && validation < 1.0) {
            return Err(invalid(
                "trainer.validation_fraction",
                format!("{validation} is outside (0, 1)"),
            ));
        }
        if self.features.lags.contains(&0) || self.features.windows.contains(&0) {
            return Err(invalid("features", "lags and windows must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ForecastConfig::default();
        assert_eq!(config.years_back, 6);
        assert_eq!(config.training_parallelism, 2);
        assert_eq!(config.features.lags, vec![1, 2, 3, 7, 14, 28, 365]);
        assert_eq!(config.features.max_lookback(), 365);
        assert_eq!(config.trainer.seed, 42);
        assert_eq!(config.trainer.random_forest.n_trees, 50);
        assert_eq!(config.trainer.gradient_boosting.subsample, 0.8);
        assert!(config.cache_folder.is_none());
    }

    #[test]
    fn test_partial_json_keeps_nested_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let config = ForecastConfig::from_json_str(
            r#"{"trainer": {"random_forest": {"n_trees": 5}}, "features": {"lags": [1, 7]}}"#,
        )?;
        assert_eq!(config.trainer.random_forest.n_trees, 5);
        assert_eq!(config.trainer.random_forest.max_depth, 10);
        assert_eq!(config.features.lags, vec![1, 7]);
        assert_eq!(config.features.windows, vec![3, 7, 14, 30]);
        Ok(())
    }

    #[test]
    fn test_zero_years_back_is_rejected() {
        assert!(ForecastConfig::default().validate().is_ok());

        let config = ForecastConfig::builder().years_back(0).build();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "years_back", .. })
        ));
        assert!(matches!(
            ForecastConfig::from_json_str(r#"{"years_back": 0}"#),
            Err(ConfigError::InvalidValue { field: "years_back", .. })
        ));
        assert!(matches!(
            ForecastConfig::from_json_str(r#"{"training_parallelism": 0}"#),
            Err(ConfigError::InvalidValue { field: "training_parallelism", .. })
        ));
        assert!(matches!(
            ForecastConfig::from_json_str(r#"{"years_back": "six"}"#),
            Err(ConfigError::Json(_))
        ));
    }
}
