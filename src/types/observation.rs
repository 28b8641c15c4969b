use crate::types::variable::Variable;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Missing-value marker NASA POWER writes in place of absent measurements.
pub const SENTINEL: f64 = -999.0;

/// Position of an observation on the time axis. `hour == None` marks a daily aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObservationKey {
    pub date: NaiveDate,
    pub hour: Option<u32>,
}

impl ObservationKey {
    pub fn daily(date: NaiveDate) -> Self {
        Self { date, hour: None }
    }

    pub fn hourly(date: NaiveDate, hour: u32) -> Self {
        Self {
            date,
            hour: Some(hour),
        }
    }
}

/// One optional value per [`Variable`], indexed by [`Variable::index`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableValues([Option<f64>; Variable::COUNT]);

impl VariableValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, variable: Variable) -> Option<f64> {
        self.0[variable.index()]
    }

    pub fn set(&mut self, variable: Variable, value: Option<f64>) {
        self.0[variable.index()] = value;
    }

    pub fn with(mut self, variable: Variable, value: f64) -> Self {
        self.set(variable, Some(value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }

    /// True when every listed variable carries a value.
    pub fn has_all(&self, variables: &[Variable]) -> bool {
        variables.iter().all(|v| self.get(*v).is_some())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Variable, Option<f64>)> + '_ {
        Variable::ALL.iter().map(move |v| (*v, self.get(*v)))
    }

    /// Replaces sentinel, fill and non-finite values with `None`.
    pub fn cleaned(&self, fill_value: Option<f64>) -> Self {
        let mut out = Self::default();
        for (variable, value) in self.iter() {
            out.set(variable, value.and_then(|v| clean_value(v, fill_value)));
        }
        out
    }
}

/// Returns `None` for values that only stand in for a missing measurement.
pub fn clean_value(value: f64, fill_value: Option<f64>) -> Option<f64> {
    if !value.is_finite() || is_marker(value, SENTINEL) {
        return None;
    }
    match fill_value {
        Some(fill) if is_marker(value, fill) => None,
        _ => Some(value),
    }
}

fn is_marker(value: f64, marker: f64) -> bool {
    (value - marker).abs() < 1e-9
}

/// A cleansed observation: no sentinel or non-finite value survives construction,
/// deserialization included.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "UncleanedRecord")]
pub struct ObservationRecord {
    pub key: ObservationKey,
    values: VariableValues,
}

#[derive(Deserialize)]
struct UncleanedRecord {
    key: ObservationKey,
    values: VariableValues,
}

impl From<UncleanedRecord> for ObservationRecord {
    fn from(raw: UncleanedRecord) -> Self {
        ObservationRecord::from_raw(raw.key, &raw.values, None)
    }
}

impl ObservationRecord {
    pub fn from_raw(key: ObservationKey, raw: &VariableValues, fill_value: Option<f64>) -> Self {
        Self {
            key,
            values: raw.cleaned(fill_value),
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.key.date
    }

    pub fn hour(&self) -> Option<u32> {
        self.key.hour
    }

    pub fn get(&self, variable: Variable) -> Option<f64> {
        self.values.get(variable)
    }

    pub fn values(&self) -> &VariableValues {
        &self.values
    }
}
