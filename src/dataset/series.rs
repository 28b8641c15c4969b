use crate::types::observation::ObservationKey;
use crate::types::prediction::Granularity;
use crate::types::variable::Variable;
use chrono::{Datelike, Duration, NaiveDate};

/// One variable laid out on a regular daily or hourly grid.
///
/// Gaps in the underlying records become `None`. Index `i` maps to the key `i` periods
/// after the first record. Forecasting appends to the end with [`VariableSeries::push`].
#[derive(Debug, Clone, PartialEq)]
pub struct VariableSeries {
    variable: Variable,
    granularity: Granularity,
    origin: ObservationKey,
    values: Vec<Option<f64>>,
    // Most recent present value at or before each index.
    last_known: Vec<Option<f64>>,
}

impl VariableSeries {
    pub fn new(
        variable: Variable,
        granularity: Granularity,
        origin: ObservationKey,
        values: Vec<Option<f64>>,
    ) -> Self {
        let mut series = Self {
            variable,
            granularity,
            origin,
            values: Vec::with_capacity(values.len()),
            last_known: Vec::with_capacity(values.len()),
        };
        for value in values {
            series.push(value);
        }
        series
    }

    pub fn variable(&self) -> Variable {
        self.variable
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    pub fn value(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied().flatten()
    }

    pub fn push(&mut self, value: Option<f64>) {
        let value = value.filter(|v| v.is_finite());
        let carried = value.or_else(|| self.last_known.last().copied().flatten());
        self.values.push(value);
        self.last_known.push(carried);
    }

    /// Value `lag` periods before `index`, carrying the most recent earlier value forward
    /// over gaps. Never looks at `index` itself or anything after it; positions past the
    /// end of the series resolve to the last known value.
    pub fn value_before(&self, index: usize, lag: usize) -> Option<f64> {
        if lag == 0 || lag > index {
            return None;
        }
        let last = self.last_known.len().checked_sub(1)?;
        self.last_known[(index - lag).min(last)]
    }

    /// Whether any value precedes `index`.
    pub fn has_history_before(&self, index: usize) -> bool {
        index > 0 && self.value_before(index, 1).is_some()
    }

    /// Present values in `index - window .. index` (exclusive of `index`).
    pub fn window_before(&self, index: usize, window: usize) -> Vec<f64> {
        let from = index.saturating_sub(window);
        let to = index.min(self.values.len());
        if from >= to {
            return Vec::new();
        }
        self.values[from..to].iter().flatten().copied().collect()
    }

    pub fn key_at(&self, index: usize) -> ObservationKey {
        match self.granularity {
            Granularity::Daily => ObservationKey::daily(self.origin.date + Duration::days(index as i64)),
            Granularity::Hourly => {
                let total = self.origin.hour.unwrap_or(0) as i64 + index as i64;
                ObservationKey::hourly(
                    self.origin.date + Duration::days(total.div_euclid(24)),
                    total.rem_euclid(24) as u32,
                )
            }
        }
    }

    /// Grid offset of `key`, possibly past the end. `None` when `key` precedes the origin
    /// or does not fit the grid.
    pub fn offset_of(&self, key: &ObservationKey) -> Option<usize> {
        let days = (key.date - self.origin.date).num_days();
        let offset = match (self.granularity, key.hour) {
            (Granularity::Daily, None) => days,
            (Granularity::Hourly, Some(hour)) => {
                days * 24 + hour as i64 - self.origin.hour.unwrap_or(0) as i64
            }
            _ => return None,
        };
        usize::try_from(offset).ok()
    }

    pub fn date_at(&self, index: usize) -> NaiveDate {
        self.key_at(index).date
    }

    pub fn day_of_year(&self, index: usize) -> u32 {
        self.date_at(index).ordinal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> ObservationKey {
        ObservationKey::daily(NaiveDate::from_ymd_opt(2024, 12, 30).unwrap())
    }

    #[test]
    fn test_value_before_carries_forward_only() {
        let series = VariableSeries::new(
            Variable::Temperature,
            Granularity::Daily,
            origin(),
            vec![Some(1.0), None, None, Some(4.0), Some(5.0)],
        );
        assert_eq!(series.value_before(3, 1), Some(1.0));
        assert_eq!(series.value_before(4, 1), Some(4.0));
        assert_eq!(series.value_before(2, 2), Some(1.0));
        assert_eq!(series.value_before(2, 3), None);
        assert_eq!(series.value_before(4, 0), None);
        assert!(!series.has_history_before(0));
    }

    #[test]
    fn test_key_and_offset_round_trip_across_year_end() {
        let series = VariableSeries::new(
            Variable::Temperature,
            Granularity::Daily,
            origin(),
            vec![None; 5],
        );
        let key = series.key_at(3);
        assert_eq!(key.date, NaiveDate::from_ymd_opt(2025, 1, 2).unwrap());
        assert_eq!(series.offset_of(&key), Some(3));
        assert_eq!(series.day_of_year(3), 2);
        assert_eq!(series.offset_of(&ObservationKey::daily(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())), None);
    }

    #[test]
    fn test_hourly_grid_wraps_days() {
        let date = NaiveDate::from_ymd_opt(2025, 10, 4).unwrap();
        let series = VariableSeries::new(
            Variable::WindSpeed,
            Granularity::Hourly,
            ObservationKey::hourly(date, 22),
            vec![None; 4],
        );
        assert_eq!(series.key_at(3), ObservationKey::hourly(date.succ_opt().unwrap(), 1));
        assert_eq!(series.offset_of(&ObservationKey::hourly(date.succ_opt().unwrap(), 1)), Some(3));
        assert_eq!(series.offset_of(&ObservationKey::daily(date)), None);
    }

    #[test]
    fn test_window_before_excludes_target() {
        let series = VariableSeries::new(
            Variable::Precipitation,
            Granularity::Daily,
            origin(),
            vec![Some(1.0), Some(2.0), None, Some(4.0), Some(100.0)],
        );
        assert_eq!(series.window_before(4, 3), vec![2.0, 4.0]);
        assert_eq!(series.window_before(1, 5), vec![1.0]);
        assert!(series.window_before(0, 3).is_empty());
    }
}
