//! Candidate model families and the registry the trainer iterates over.

pub mod gradient_boosting;
pub mod metrics;
pub mod random_forest;
pub mod seasonal_ar;
pub mod tree;

use crate::config::TrainerConfig;
use crate::dataset::series::VariableSeries;
use crate::features::{FeatureBuilder, FeatureError};
use crate::trainer::TrainingError;
use crate::types::prediction::FamilyMetrics;
use crate::types::variable::Variable;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModelFamily {
    #[serde(rename = "SeasonalAR")]
    SeasonalAr,
    GradientBoosting,
    RandomForest,
}

impl ModelFamily {
    pub fn name(self) -> &'static str {
        match self {
            ModelFamily::SeasonalAr => "SeasonalAR",
            ModelFamily::GradientBoosting => "GradientBoosting",
            ModelFamily::RandomForest => "RandomForest",
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A trained model that predicts one period of a series from the values before it.
pub trait FittedModel: Send + Sync + fmt::Debug {
    fn family(&self) -> ModelFamily;

    /// Prediction for grid position `index`, using only values before it.
    fn predict_at(&self, series: &VariableSeries, index: usize) -> Result<f64, FeatureError>;
}

/// Inputs handed to a family's training function.
pub struct TrainingData<'a> {
    pub series: &'a VariableSeries,
    pub features: &'a FeatureBuilder,
    /// Grid positions of training targets; every one carries a value.
    pub targets: &'a [usize],
}

pub type TrainFn = fn(&TrainingData<'_>, &TrainerConfig) -> Result<Box<dyn FittedModel>, TrainingError>;
pub type ScoreFn =
    fn(&dyn FittedModel, &VariableSeries, &[usize]) -> Result<ValidationScore, TrainingError>;

/// One entry of the family registry.
pub struct FamilyStrategy {
    pub family: ModelFamily,
    pub train: TrainFn,
    pub score: ScoreFn,
}

static REGISTRY: [FamilyStrategy; 3] = [
    FamilyStrategy {
        family: ModelFamily::SeasonalAr,
        train: seasonal_ar::train,
        score: one_step_score,
    },
    FamilyStrategy {
        family: ModelFamily::GradientBoosting,
        train: gradient_boosting::train,
        score: one_step_score,
    },
    FamilyStrategy {
        family: ModelFamily::RandomForest,
        train: random_forest::train,
        score: one_step_score,
    },
];

pub fn registry() -> &'static [FamilyStrategy] {
    &REGISTRY
}

/// Validation error of a candidate on the held-out partition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationScore {
    pub rmse: f64,
    pub mae: f64,
    /// Only for the occurrence variable.
    pub f1: Option<f64>,
    pub samples: usize,
}

impl ValidationScore {
    pub fn to_metrics(&self) -> FamilyMetrics {
        FamilyMetrics {
            rmse: self.rmse,
            mae: self.mae,
            f1: self.f1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CandidateModel {
    pub family: ModelFamily,
    pub variable: Variable,
    pub model: Arc<dyn FittedModel>,
    pub score: ValidationScore,
}

/// Scores one-step-ahead predictions at each validation position.
pub fn one_step_score(
    model: &dyn FittedModel,
    series: &VariableSeries,
    targets: &[usize],
) -> Result<ValidationScore, TrainingError> {
    let variable = series.variable();
    let mut truth = Vec::with_capacity(targets.len());
    let mut predicted = Vec::with_capacity(targets.len());
    for &index in targets {
        let Some(actual) = series.value(index) else {
            continue;
        };
        let prediction = model.predict_at(series, index)?;
        truth.push(actual);
        predicted.push(variable.clamp(prediction));
    }
    if truth.is_empty() {
        return Err(TrainingError::InsufficientHistory {
            family: model.family(),
            required: 1,
            available: 0,
        });
    }

    Ok(ValidationScore {
        rmse: metrics::rmse(&truth, &predicted),
        mae: metrics::mae(&truth, &predicted),
        f1: variable
            .is_occurrence()
            .then(|| metrics::f1_score(&truth, &predicted, metrics::RAIN_EVENT_MM)),
        samples: truth.len(),
    })
}

/// Feature rows and targets for the tree families. Targets without enough history are
/// skipped.
pub(crate) fn feature_matrix(
    data: &TrainingData<'_>,
) -> Result<(Vec<Vec<f64>>, Vec<f64>), FeatureError> {
    let mut x = Vec::with_capacity(data.targets.len());
    let mut y = Vec::with_capacity(data.targets.len());
    for &index in data.targets {
        let Some(target) = data.series.value(index) else {
            continue;
        };
        match data.features.build_at(data.series, index) {
            Ok(features) => {
                x.push(features.to_row());
                y.push(target);
            }
            Err(FeatureError::InsufficientHistory { .. }) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok((x, y))
}

/// True when every target is the same value.
pub(crate) fn is_constant(y: &[f64]) -> bool {
    match y.first() {
        Some(first) => y.iter().all(|v| (v - first).abs() < 1e-12),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lists_each_family_once() {
        let families: Vec<ModelFamily> = registry().iter().map(|s| s.family).collect();
        assert_eq!(
            families,
            vec![
                ModelFamily::SeasonalAr,
                ModelFamily::GradientBoosting,
                ModelFamily::RandomForest
            ]
        );
    }

    #[test]
    fn test_family_serialized_names() {
        for family in [
            ModelFamily::SeasonalAr,
            ModelFamily::GradientBoosting,
            ModelFamily::RandomForest,
        ] {
            let json = serde_json::to_string(&family).unwrap();
            assert_eq!(json, format!("\"{}\"", family.name()));
        }
    }

    #[test]
    fn test_is_constant() {
        assert!(is_constant(&[0.0, 0.0, 0.0]));
        assert!(!is_constant(&[0.0, 0.1]));
        assert!(is_constant(&[]));
    }
}
