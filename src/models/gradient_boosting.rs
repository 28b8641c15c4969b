use crate::config::{GradientBoostingConfig, TrainerConfig};
use crate::dataset::series::VariableSeries;
use crate::features::{FeatureBuilder, FeatureError};
use crate::models::tree::{RegressionTree, TreeParams};
use crate::models::{feature_matrix, is_constant, FittedModel, ModelFamily, TrainingData};
use crate::trainer::TrainingError;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;

/// Least-squares gradient boosting over shallow regression trees.
#[derive(Debug, Clone)]
pub struct GradientBoostingModel {
    init: f64,
    learning_rate: f64,
    trees: Vec<RegressionTree>,
    features: FeatureBuilder,
}

impl GradientBoostingModel {
    pub fn fit(
        x: &[Vec<f64>],
        y: &[f64],
        config: &GradientBoostingConfig,
        seed: u64,
        features: FeatureBuilder,
    ) -> Self {
        let n = y.len();
        let init = if n == 0 { 0.0 } else { y.iter().sum::<f64>() / n as f64 };
        let mut current = vec![init; n];
        let mut residuals = vec![0.0; n];
        let mut rng = StdRng::seed_from_u64(seed);
        let params = TreeParams {
            max_depth: config.max_depth,
            min_samples_split: 2,
            min_samples_leaf: config.min_samples_leaf,
            max_features: None,
        };
        let batch = ((n as f64 * config.subsample.clamp(0.0, 1.0)).ceil() as usize).clamp(1, n.max(1));

        let mut trees = Vec::with_capacity(config.n_stages);
        for _ in 0..config.n_stages {
            if n == 0 {
                break;
            }
            for i in 0..n {
                residuals[i] = y[i] - current[i];
            }
            let mut rows = sample(&mut rng, n, batch).into_vec();
            rows.sort_unstable();
            let tree = RegressionTree::fit(x, &residuals, &rows, &params, &mut rng);
            for (i, row) in x.iter().enumerate() {
                current[i] += config.learning_rate * tree.predict(row);
            }
            trees.push(tree);
        }

        Self {
            init,
            learning_rate: config.learning_rate,
            trees,
            features,
        }
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.init
            + self
                .trees
                .iter()
                .map(|t| self.learning_rate * t.predict(row))
                .sum::<f64>()
    }

    pub fn stages(&self) -> usize {
        self.trees.len()
    }
}

impl FittedModel for GradientBoostingModel {
    fn family(&self) -> ModelFamily {
        ModelFamily::GradientBoosting
    }

    fn predict_at(&self, series: &VariableSeries, index: usize) -> Result<f64, FeatureError> {
        let features = self.features.build_at(series, index)?;
        Ok(self.predict_row(&features.to_row()))
    }
}

pub fn train(
    data: &TrainingData<'_>,
    config: &TrainerConfig,
) -> Result<Box<dyn FittedModel>, TrainingError> {
    let family = ModelFamily::GradientBoosting;
    let (x, y) = feature_matrix(data)?;
    if y.len() < config.min_training_samples {
        return Err(TrainingError::InsufficientHistory {
            family,
            required: config.min_training_samples,
            available: y.len(),
        });
    }
    if is_constant(&y) {
        return Err(TrainingError::Degenerate { family });
    }
    Ok(Box::new(GradientBoostingModel::fit(
        &x,
        &y,
        &config.gradient_boosting,
        config.seed,
        data.features.clone(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy() -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..80).map(|i| vec![(i % 20) as f64, (i / 20) as f64]).collect();
        let y: Vec<f64> = x.iter().map(|r| 2.0 * r[0] + if r[1] > 1.5 { 10.0 } else { 0.0 }).collect();
        (x, y)
    }

    #[test]
    fn test_boosting_reduces_training_error() {
        let (x, y) = toy();
        let config = GradientBoostingConfig::default();
        let model = GradientBoostingModel::fit(&x, &y, &config, 42, FeatureBuilder::default());
        assert_eq!(model.stages(), 50);

        let mean = y.iter().sum::<f64>() / y.len() as f64;
        let baseline: f64 = y.iter().map(|v| (v - mean).powi(2)).sum();
        let fitted: f64 = x
            .iter()
            .zip(&y)
            .map(|(row, v)| (v - model.predict_row(row)).powi(2))
            .sum();
        assert!(fitted < baseline * 0.1, "fitted {fitted} vs baseline {baseline}");
    }

    #[test]
    fn test_same_seed_same_model() {
        let (x, y) = toy();
        let config = GradientBoostingConfig::builder().n_stages(10).build();
        let a = GradientBoostingModel::fit(&x, &y, &config, 7, FeatureBuilder::default());
        let b = GradientBoostingModel::fit(&x, &y, &config, 7, FeatureBuilder::default());
        for row in &x {
            assert_eq!(a.predict_row(row), b.predict_row(row));
        }
    }
}
