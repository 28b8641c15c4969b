//! Picks the best candidate per variable, forecasts with it and rates its accuracy.

use crate::dataset::series::VariableSeries;
use crate::features::FeatureError;
use crate::models::{CandidateModel, FittedModel, ModelFamily, ValidationScore};
use crate::types::observation::ObservationKey;
use crate::types::variable::Variable;
use ordered_float::OrderedFloat;
use std::collections::BTreeMap;

/// The chosen family, its forecast for the target and the accuracy rating.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection {
    pub family: ModelFamily,
    pub value: f64,
    pub accuracy_pct: f64,
    pub score: ValidationScore,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ModelSelector;

impl ModelSelector {
    /// Lowest RMSE wins for continuous variables. For precipitation the highest F1 wins,
    /// ties going to the lower RMSE. Non-finite errors rank last.
    pub fn choose(
        variable: Variable,
        candidates: &BTreeMap<ModelFamily, CandidateModel>,
    ) -> Option<&CandidateModel> {
        candidates
            .values()
            .min_by_key(|candidate| rank_key(variable, &candidate.score))
    }

    /// Accuracy percentage for a validation score.
    pub fn accuracy(variable: Variable, score: &ValidationScore) -> f64 {
        match (variable.is_occurrence(), score.f1) {
            (true, Some(f1)) if f1.is_finite() => round1(f1.clamp(0.0, 1.0) * 100.0),
            _ => accuracy_from_rmse(score.rmse, variable.default_tolerance()),
        }
    }

    /// Chooses a candidate and forecasts every target with it.
    ///
    /// `known` holds real observations past the end of `series`; they replace the
    /// model's own output when rolling forward. Returns one [`Selection`] per target, in
    /// the order given.
    pub fn select(
        variable: Variable,
        candidates: &BTreeMap<ModelFamily, CandidateModel>,
        series: &VariableSeries,
        targets: &[ObservationKey],
        known: &BTreeMap<ObservationKey, f64>,
    ) -> Result<Option<Vec<Selection>>, FeatureError> {
        let Some(best) = Self::choose(variable, candidates) else {
            return Ok(None);
        };
        let accuracy_pct = Self::accuracy(variable, &best.score);
        let values = roll_forward(best.model.as_ref(), series, targets, known)?;
        Ok(Some(
            values
                .into_iter()
                .map(|value| Selection {
                    family: best.family,
                    value,
                    accuracy_pct,
                    score: best.score,
                })
                .collect(),
        ))
    }
}

fn finite_or_max(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        f64::MAX
    }
}

/// Smaller is better.
fn rank_key(variable: Variable, score: &ValidationScore) -> (OrderedFloat<f64>, OrderedFloat<f64>) {
    let rmse = OrderedFloat(finite_or_max(score.rmse));
    if variable.is_occurrence() {
        let f1 = score.f1.filter(|v| v.is_finite()).unwrap_or(-1.0);
        (OrderedFloat(-f1), rmse)
    } else {
        (OrderedFloat(0.0), rmse)
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Maps RMSE to a 0–100 rating, piecewise linear in `rmse / tolerance`:
/// 0 → 100, 1 → 75, 2 → 40, 4 and beyond → 0. Non-finite RMSE rates 0.
pub fn accuracy_from_rmse(rmse: f64, tolerance: f64) -> f64 {
    if !rmse.is_finite() || !(tolerance > 0.0) {
        return 0.0;
    }
    let ratio = rmse.max(0.0) / tolerance;
    let pct = if ratio <= 1.0 {
        100.0 - 25.0 * ratio
    } else if ratio <= 2.0 {
        75.0 - 35.0 * (ratio - 1.0)
    } else if ratio <= 4.0 {
        40.0 - 20.0 * (ratio - 2.0)
    } else {
        0.0
    };
    round1(pct.clamp(0.0, 100.0))
}

/// Forecasts each target by stepping the model forward one period at a time, feeding
/// predictions (or `known` observations) back into the series.
///
/// Targets inside the existing series are predicted one step ahead from real history.
pub fn roll_forward(
    model: &dyn FittedModel,
    series: &VariableSeries,
    targets: &[ObservationKey],
    known: &BTreeMap<ObservationKey, f64>,
) -> Result<Vec<f64>, FeatureError> {
    let variable = series.variable();
    let mut extended = series.clone();
    let mut predictions = BTreeMap::new();

    let mut ordered: Vec<(usize, ObservationKey)> = Vec::with_capacity(targets.len());
    for target in targets {
        let index = extended
            .offset_of(target)
            .ok_or(FeatureError::TargetBeforeSeries(*target))?;
        ordered.push((index, *target));
    }
    ordered.sort();

    for (index, _) in &ordered {
        if *index < extended.len() {
            let value = variable.clamp(model.predict_at(&extended, *index)?);
            predictions.insert(*index, value);
            continue;
        }
        while extended.len() <= *index {
            let next = extended.len();
            let value = variable.clamp(model.predict_at(&extended, next)?);
            if next == *index {
                predictions.insert(next, value);
            }
            let key = extended.key_at(next);
            extended.push(Some(known.get(&key).copied().unwrap_or(value)));
        }
    }

    Ok(targets
        .iter()
        .filter_map(|t| extended.offset_of(t))
        .map(|index| predictions.get(&index).copied().unwrap_or(f64::NAN))
        .collect())
}
