//! Seasonal autoregression fitted by ordinary least squares.
//!
//! Regressors: intercept, linear trend (in years), short lags, weekly seasonal lags and an
//! annual sin/cos pair.

use crate::config::{SeasonalArConfig, TrainerConfig};
use crate::dataset::series::VariableSeries;
use crate::features::{cyclical, FeatureError, DAY_OF_YEAR_PERIOD};
use crate::models::{is_constant, FittedModel, ModelFamily, TrainingData};
use crate::trainer::TrainingError;

const PIVOT_TOLERANCE: f64 = 1e-10;

#[derive(Debug, Clone)]
pub struct SeasonalArModel {
    lags: Vec<usize>,
    coefficients: Vec<f64>,
}

impl SeasonalArModel {
    fn max_lag(&self) -> usize {
        self.lags.iter().copied().max().unwrap_or(1)
    }
}

/// Regressor row for grid position `index`, or `None` when a lag has no earlier value.
fn design_row(series: &VariableSeries, index: usize, lags: &[usize]) -> Option<Vec<f64>> {
    let mut row = Vec::with_capacity(lags.len() + 4);
    row.push(1.0);
    row.push(index as f64 / DAY_OF_YEAR_PERIOD);
    for &lag in lags {
        row.push(series.value_before(index, lag)?);
    }
    let (sin, cos) = cyclical(series.day_of_year(index) as f64, DAY_OF_YEAR_PERIOD);
    row.push(sin);
    row.push(cos);
    Some(row)
}

impl FittedModel for SeasonalArModel {
    fn family(&self) -> ModelFamily {
        ModelFamily::SeasonalAr
    }

    fn predict_at(&self, series: &VariableSeries, index: usize) -> Result<f64, FeatureError> {
        let insufficient = FeatureError::InsufficientHistory {
            required: self.max_lag(),
            available: index,
        };
        if index < self.max_lag() {
            return Err(insufficient);
        }
        let row = design_row(series, index, &self.lags).ok_or(insufficient)?;
        Ok(row
            .iter()
            .zip(&self.coefficients)
            .map(|(x, b)| x * b)
            .sum())
    }
}

pub fn fit(
    series: &VariableSeries,
    targets: &[usize],
    config: &SeasonalArConfig,
) -> Result<SeasonalArModel, TrainingError> {
    let family = ModelFamily::SeasonalAr;
    let lags: Vec<usize> = config
        .lags
        .iter()
        .chain(config.seasonal_lags.iter())
        .copied()
        .collect();
    let max_lag = lags.iter().copied().max().unwrap_or(1);

    let mut rows = Vec::with_capacity(targets.len());
    let mut y = Vec::with_capacity(targets.len());
    for &index in targets {
        if index < max_lag {
            continue;
        }
        let (Some(target), Some(row)) = (series.value(index), design_row(series, index, &lags))
        else {
            continue;
        };
        rows.push(row);
        y.push(target);
    }

    let required = config.min_rows.max(lags.len() + 5);
    if y.len() < required {
        return Err(TrainingError::InsufficientHistory {
            family,
            required,
            available: y.len(),
        });
    }
    if is_constant(&y) {
        return Err(TrainingError::Degenerate { family });
    }

    let width = rows[0].len();
    let mut xtx = vec![vec![0.0; width]; width];
    let mut xty = vec![0.0; width];
    for (row, target) in rows.iter().zip(&y) {
        for a in 0..width {
            xty[a] += row[a] * target;
            for b in 0..width {
                xtx[a][b] += row[a] * row[b];
            }
        }
    }
    for (a, row) in xtx.iter_mut().enumerate().skip(1) {
        row[a] += config.ridge;
    }

    let coefficients = solve(xtx, xty).ok_or(TrainingError::Singular { family })?;
    Ok(SeasonalArModel { lags, coefficients })
}

pub fn train(
    data: &TrainingData<'_>,
    config: &TrainerConfig,
) -> Result<Box<dyn FittedModel>, TrainingError> {
    Ok(Box::new(fit(data.series, data.targets, &config.seasonal_ar)?))
}

/// Gaussian elimination with partial pivoting. `None` when the system is singular.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    let scale = (0..n).map(|i| a[i][i].abs()).fold(0.0, f64::max).max(1.0);

    for col in 0..n {
        let pivot_row = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot_row][col].abs() < PIVOT_TOLERANCE * scale {
            return None;
        }
        a.swap(col, pivot_row);
        b.swap(col, pivot_row);

        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}
