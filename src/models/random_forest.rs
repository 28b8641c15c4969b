use crate::config::{RandomForestConfig, TrainerConfig};
use crate::dataset::series::VariableSeries;
use crate::features::{FeatureBuilder, FeatureError};
use crate::models::tree::{RegressionTree, TreeParams};
use crate::models::{feature_matrix, is_constant, FittedModel, ModelFamily, TrainingData};
use crate::trainer::TrainingError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Bagged regression trees with per-split feature subsampling.
#[derive(Debug, Clone)]
pub struct RandomForestModel {
    trees: Vec<RegressionTree>,
    features: FeatureBuilder,
}

impl RandomForestModel {
    pub fn fit(
        x: &[Vec<f64>],
        y: &[f64],
        config: &RandomForestConfig,
        seed: u64,
        features: FeatureBuilder,
    ) -> Self {
        let n = y.len();
        let n_features = x.first().map_or(0, Vec::len);
        let max_features =
            ((n_features as f64 * config.max_feature_fraction).round() as usize).clamp(1, n_features.max(1));
        let params = TreeParams {
            max_depth: config.max_depth,
            min_samples_split: config.min_samples_split,
            min_samples_leaf: config.min_samples_leaf,
            max_features: Some(max_features),
        };
        let mut rng = StdRng::seed_from_u64(seed);

        let mut trees = Vec::with_capacity(config.n_trees);
        if n > 0 {
            for _ in 0..config.n_trees {
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                trees.push(RegressionTree::fit(x, y, &bootstrap, &params, &mut rng));
            }
        }
        Self { trees, features }
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|t| t.predict(row)).sum::<f64>() / self.trees.len() as f64
    }

    pub fn size(&self) -> usize {
        self.trees.len()
    }
}

impl FittedModel for RandomForestModel {
    fn family(&self) -> ModelFamily {
        ModelFamily::RandomForest
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
    let family = ModelFamily::RandomForest;
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
    // Offset the seed so the forest and the booster draw different streams.
    Ok(Box::new(RandomForestModel::fit(
        &x,
        &y,
        &config.random_forest,
        config.seed.wrapping_add(1),
        data.features.clone(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forest_is_deterministic_and_fits_signal() {
        let x: Vec<Vec<f64>> = (0..120)
            .map(|i| vec![(i % 30) as f64, ((i * 7) % 11) as f64, (i % 2) as f64])
            .collect();
        let y: Vec<f64> = x.iter().map(|r| 3.0 * r[0] + r[2]).collect();
        let config = RandomForestConfig::builder().n_trees(20).build();

        let a = RandomForestModel::fit(&x, &y, &config, 42, FeatureBuilder::default());
        let b = RandomForestModel::fit(&x, &y, &config, 42, FeatureBuilder::default());
        assert_eq!(a.size(), 20);

        let mut sse = 0.0;
        let mean = y.iter().sum::<f64>() / y.len() as f64;
        let mut sst = 0.0;
        for (row, target) in x.iter().zip(&y) {
            assert_eq!(a.predict_row(row), b.predict_row(row));
            sse += (target - a.predict_row(row)).powi(2);
            sst += (target - mean).powi(2);
        }
        assert!(sse < sst * 0.2, "sse {sse} vs sst {sst}");
    }

    #[test]
    fn test_empty_forest_predicts_zero() {
        let model = RandomForestModel::fit(&[], &[], &RandomForestConfig::default(), 1, FeatureBuilder::default());
        assert_eq!(model.size(), 0);
        assert_eq!(model.predict_row(&[1.0]), 0.0);
    }
}
