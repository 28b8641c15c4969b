//! Model-ready feature vectors built strictly from data preceding the target.

use crate::config::FeatureSpec;
use crate::dataset::error::DatasetError;
use crate::dataset::historical::HistoricalDataset;
use crate::dataset::series::VariableSeries;
use crate::types::observation::ObservationKey;
use crate::types::prediction::Granularity;
use crate::types::variable::Variable;
use std::f64::consts::PI;
use thiserror::Error;

pub const DAY_OF_YEAR_PERIOD: f64 = 365.25;
pub const HOUR_PERIOD: f64 = 24.0;

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("Insufficient history: target needs {required} preceding periods, {available} available")]
    InsufficientHistory { required: usize, available: usize },

    #[error("Target {0:?} lies before the start of the series")]
    TargetBeforeSeries(ObservationKey),

    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

/// Features for one (timestamp, variable) target.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    pub lags: Vec<f64>,
    pub rolling_mean: Vec<f64>,
    pub rolling_std: Vec<f64>,
    pub day_of_year_sin: f64,
    pub day_of_year_cos: f64,
    pub hour_sin: f64,
    pub hour_cos: f64,
}

impl FeatureVector {
    /// Flattened in a fixed order: lags, means, stds, day-of-year pair, hour pair.
    pub fn to_row(&self) -> Vec<f64> {
        let mut row = Vec::with_capacity(self.len());
        row.extend_from_slice(&self.lags);
        row.extend_from_slice(&self.rolling_mean);
        row.extend_from_slice(&self.rolling_std);
        row.extend_from_slice(&[
            self.day_of_year_sin,
            self.day_of_year_cos,
            self.hour_sin,
            self.hour_cos,
        ]);
        row
    }

    pub fn len(&self) -> usize {
        self.lags.len() + self.rolling_mean.len() + self.rolling_std.len() + 4
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `(sin, cos)` of `x` on a cycle of `period`.
pub fn cyclical(x: f64, period: f64) -> (f64, f64) {
    let angle = 2.0 * PI * x / period;
    (angle.sin(), angle.cos())
}

#[derive(Debug, Clone, Default)]
pub struct FeatureBuilder {
    spec: FeatureSpec,
}

impl FeatureBuilder {
    pub fn new(spec: FeatureSpec) -> Self {
        Self { spec }
    }

    /// Builds the features for `variable` at `target` from `dataset`.
    ///
    /// The target may lie past the end of the dataset; lags then resolve to the most
    /// recent known value.
    ///
    /// # Errors
    ///
    /// [`FeatureError::InsufficientHistory`] when fewer periods than the longest lag or
    /// window precede the target, or when no value precedes it at all.
    pub fn build(
        &self,
        dataset: &HistoricalDataset,
        variable: Variable,
        target: ObservationKey,
    ) -> Result<FeatureVector, FeatureError> {
        let series = dataset.series(variable)?;
        let index = series
            .offset_of(&target)
            .ok_or(FeatureError::TargetBeforeSeries(target))?;
        self.build_at(&series, index)
    }

    /// Same as [`FeatureBuilder::build`] for a grid position of an existing series.
    pub fn build_at(
        &self,
        series: &VariableSeries,
        index: usize,
    ) -> Result<FeatureVector, FeatureError> {
        let required = self.spec.max_lookback();
        if index < required || !series.has_history_before(index) {
            return Err(FeatureError::InsufficientHistory {
                required,
                available: index,
            });
        }

        let fallback = series.value_before(index, 1);
        let mut lags = Vec::with_capacity(self.spec.lags.len());
        for &lag in &self.spec.lags {
            let value = series.value_before(index, lag).or(fallback).ok_or(
                FeatureError::InsufficientHistory {
                    required,
                    available: index,
                },
            )?;
            lags.push(value);
        }

        let mut rolling_mean = Vec::with_capacity(self.spec.windows.len());
        let mut rolling_std = Vec::with_capacity(self.spec.windows.len());
        for &window in &self.spec.windows {
            let (mean, std) = mean_and_population_std(&series.window_before(index, window))
                .unwrap_or((fallback.unwrap_or(0.0), 0.0));
            rolling_mean.push(mean);
            rolling_std.push(std);
        }

        let key = series.key_at(index);
        let (day_of_year_sin, day_of_year_cos) =
            cyclical(series.day_of_year(index) as f64, DAY_OF_YEAR_PERIOD);
        let (hour_sin, hour_cos) = match (series.granularity(), key.hour) {
            (Granularity::Hourly, Some(hour)) => cyclical(hour as f64, HOUR_PERIOD),
            _ => (0.0, 0.0),
        };

        Ok(FeatureVector {
            lags,
            rolling_mean,
            rolling_std,
            day_of_year_sin,
            day_of_year_cos,
            hour_sin,
            hour_cos,
        })
    }
}

/// Arithmetic mean and population standard deviation; `None` for an empty slice.
pub fn mean_and_population_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, variance.sqrt()))
}
