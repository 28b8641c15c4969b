//! Fits every registered model family for one variable and scores it on a held-out tail.

use crate::config::{FeatureSpec, TrainerConfig};
use crate::dataset::error::DatasetError;
use crate::dataset::historical::HistoricalDataset;
use crate::dataset::series::VariableSeries;
use crate::features::{FeatureBuilder, FeatureError};
use crate::models::{registry, CandidateModel, ModelFamily, TrainingData};
use crate::types::observation::ObservationRecord;
use crate::types::variable::Variable;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("{family} has insufficient history: {available} usable rows, {required} required")]
    InsufficientHistory {
        family: ModelFamily,
        required: usize,
        available: usize,
    },

    #[error("{family} cannot be fitted to a constant target")]
    Degenerate { family: ModelFamily },

    #[error("{family} normal equations are singular")]
    Singular { family: ModelFamily },

    #[error("No usable model for {variable}: {reasons}")]
    NoUsableModel { variable: Variable, reasons: String },

    #[error(transparent)]
    Feature(#[from] FeatureError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

/// Chronological train/validation split over dataset rows.
///
/// The validation partition is exactly the last `ceil(fraction * total)` rows, kept
/// within `1..total` so both sides are non-empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemporalSplit {
    pub total: usize,
    pub validation: usize,
}

impl TemporalSplit {
    pub fn new(total: usize, validation_fraction: f64) -> Self {
        let raw = (total as f64 * validation_fraction - 1e-9).ceil().max(0.0) as usize;
        let validation = if total < 2 { 0 } else { raw.clamp(1, total - 1) };
        Self { total, validation }
    }

    pub fn training(&self) -> usize {
        self.total - self.validation
    }
}

/// Result of training one variable.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub variable: Variable,
    pub split: TemporalSplit,
    /// The full history on a regular grid, the starting point for forecasting.
    pub series: VariableSeries,
    pub candidates: BTreeMap<ModelFamily, CandidateModel>,
    /// Families that failed, with the reason.
    pub failures: BTreeMap<ModelFamily, String>,
}

#[derive(Debug, Clone, Default)]
pub struct ModelTrainer {
    config: TrainerConfig,
    features: FeatureBuilder,
}

impl ModelTrainer {
    pub fn new(config: TrainerConfig, features: FeatureSpec) -> Self {
        Self {
            config,
            features: FeatureBuilder::new(features),
        }
    }

    /// Trains every registered family for `variable`.
    ///
    /// # Errors
    ///
    /// [`TrainingError::NoUsableModel`] when every family failed or the dataset is too
    /// short to split. Individual family failures are reported in
    /// [`TrainingOutcome::failures`].
    pub fn train(
        &self,
        dataset: &HistoricalDataset,
        variable: Variable,
    ) -> Result<TrainingOutcome, TrainingError> {
        let split = TemporalSplit::new(dataset.len(), self.config.validation_fraction);
        if split.validation == 0 {
            return Err(TrainingError::NoUsableModel {
                variable,
                reasons: format!("dataset has {} rows", dataset.len()),
            });
        }
        let series = dataset.series(variable)?;

        let (training_rows, validation_rows) = dataset.records().split_at(split.training());
        let positions = |rows: &[ObservationRecord]| -> Vec<usize> {
            rows.iter()
                .filter(|r| r.get(variable).is_some())
                .filter_map(|r| series.offset_of(&r.key))
                .collect()
        };
        let train_targets = positions(training_rows);
        let validation_targets = positions(validation_rows);
        debug!(
            "{}: {} training targets, {} validation targets",
            variable,
            train_targets.len(),
            validation_targets.len()
        );

        let data = TrainingData {
            series: &series,
            features: &self.features,
            targets: &train_targets,
        };

        let mut candidates = BTreeMap::new();
        let mut failures = BTreeMap::new();
        for strategy in registry() {
            let scored = (strategy.train)(&data, &self.config).and_then(|model| {
                let score = (strategy.score)(model.as_ref(), &series, &validation_targets)?;
                Ok((model, score))
            });
            match scored {
                Ok((model, score)) => {
                    debug!(
                        "{} {}: RMSE {:.3}, MAE {:.3}, F1 {:?}",
                        variable, strategy.family, score.rmse, score.mae, score.f1
                    );
                    candidates.insert(
                        strategy.family,
                        CandidateModel {
                            family: strategy.family,
                            variable,
                            model: Arc::from(model),
                            score,
                        },
                    );
                }
                Err(e) => {
                    warn!("{} {} excluded: {}", variable, strategy.family, e);
                    failures.insert(strategy.family, e.to_string());
                }
            }
        }

        if candidates.is_empty() {
            let reasons = failures
                .iter()
                .map(|(family, reason)| format!("{family}: {reason}"))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(TrainingError::NoUsableModel { variable, reasons });
        }

        Ok(TrainingOutcome {
            variable,
            split,
            series,
            candidates,
            failures,
        })
    }
}
