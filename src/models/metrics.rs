//! Validation error measures.

/// Daily total at or above which a day counts as rainy.
pub const RAIN_EVENT_MM: f64 = 1.0;

pub fn rmse(truth: &[f64], predicted: &[f64]) -> f64 {
    if truth.is_empty() || truth.len() != predicted.len() {
        return f64::NAN;
    }
    let sum: f64 = truth
        .iter()
        .zip(predicted)
        .map(|(t, p)| (t - p).powi(2))
        .sum();
    (sum / truth.len() as f64).sqrt()
}

pub fn mae(truth: &[f64], predicted: &[f64]) -> f64 {
    if truth.is_empty() || truth.len() != predicted.len() {
        return f64::NAN;
    }
    let sum: f64 = truth.iter().zip(predicted).map(|(t, p)| (t - p).abs()).sum();
    sum / truth.len() as f64
}

/// F1 of the "value ≥ threshold" event.
///
/// When neither the truth nor the prediction contains a single event the prediction is
/// perfect and the score is 1.0.
pub fn f1_score(truth: &[f64], predicted: &[f64], threshold: f64) -> f64 {
    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut fn_ = 0usize;
    for (t, p) in truth.iter().zip(predicted) {
        match (*t >= threshold, *p >= threshold) {
            (true, true) => tp += 1,
            (false, true) => fp += 1,
            (true, false) => fn_ += 1,
            (false, false) => {}
        }
    }
    if tp + fp + fn_ == 0 {
        return 1.0;
    }
    (2 * tp) as f64 / (2 * tp + fp + fn_) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rmse_and_mae() {
        let truth = [1.0, 2.0, 3.0, 4.0];
        let predicted = [1.0, 2.0, 3.0, 6.0];
        assert_eq!(rmse(&truth, &predicted), 1.0);
        assert_eq!(mae(&truth, &predicted), 0.5);
        assert!(rmse(&[], &[]).is_nan());
        assert!(mae(&[1.0], &[]).is_nan());
    }

    #[test]
    fn test_f1() {
        let truth = [0.0, 2.0, 5.0, 0.5, 1.0];
        let predicted = [1.2, 3.0, 0.0, 0.0, 1.0];
        // tp = 2 (idx 1, 4), fp = 1 (idx 0), fn = 1 (idx 2)
        assert!((f1_score(&truth, &predicted, RAIN_EVENT_MM) - 4.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_f1_without_events_is_perfect() {
        assert_eq!(f1_score(&[0.0, 0.2], &[0.1, 0.0], RAIN_EVENT_MM), 1.0);
        assert_eq!(f1_score(&[0.0, 0.2], &[1.5, 0.0], RAIN_EVENT_MM), 0.0);
    }
}
