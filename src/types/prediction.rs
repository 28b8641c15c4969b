//! Consumer-facing output records.

use crate::models::ModelFamily;
use crate::types::observation::{ObservationKey, VariableValues};
use crate::types::variable::Variable;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const RAIN_RISK_MM: f64 = 1.0;
pub const WIND_CAUTION_MS: f64 = 9.0;
pub const HEAT_CAUTION_C: f64 = 34.0;

/// Boolean risk indicators derived from a record's values with fixed thresholds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeatherFlags {
    pub rain_risk: bool,
    pub wind_caution: bool,
    pub heat_caution: bool,
}

impl WeatherFlags {
    /// Absent values never raise a flag.
    pub fn from_values(values: &VariableValues) -> Self {
        let at_least = |variable: Variable, threshold: f64| {
            values.get(variable).is_some_and(|v| v >= threshold)
        };
        Self {
            rain_risk: at_least(Variable::Precipitation, RAIN_RISK_MM),
            wind_caution: at_least(Variable::WindSpeed, WIND_CAUTION_MS),
            heat_caution: at_least(Variable::Temperature, HEAT_CAUTION_C)
                || at_least(Variable::TemperatureMax, HEAT_CAUTION_C),
        }
    }
}

/// Provenance of a value or record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataSource {
    #[serde(rename = "POWER")]
    Power,
    #[serde(rename = "AI Prediction")]
    AiPrediction,
    #[serde(rename = "Synthetic")]
    Synthetic,
}

impl DataSource {
    /// The least trustworthy part wins: any synthetic part makes the whole synthetic,
    /// otherwise any predicted part makes it a prediction. No parts at all is synthetic.
    pub fn combine(parts: impl IntoIterator<Item = DataSource>) -> DataSource {
        parts
            .into_iter()
            .max_by_key(|part| part.rank())
            .unwrap_or(DataSource::Synthetic)
    }

    fn rank(self) -> u8 {
        match self {
            DataSource::Power => 0,
            DataSource::AiPrediction => 1,
            DataSource::Synthetic => 2,
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataSource::Power => "POWER",
            DataSource::AiPrediction => "AI Prediction",
            DataSource::Synthetic => "Synthetic",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Daily,
    Hourly,
}

impl Granularity {
    /// Variables a point of this granularity must carry to count as real data.
    pub fn required_variables(self) -> &'static [Variable] {
        match self {
            Granularity::Daily => &Variable::ALL,
            Granularity::Hourly => &Variable::HOURLY,
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Daily => f.write_str("daily"),
            Granularity::Hourly => f.write_str("hourly"),
        }
    }
}

/// One output row: a day, an hour, or an aggregate over an hour interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub date: NaiveDate,
    pub hour: Option<u32>,
    pub hour_end: Option<u32>,
    pub t2m: Option<f64>,
    pub t2m_max: Option<f64>,
    pub t2m_min: Option<f64>,
    pub ws10m: Option<f64>,
    pub precip_mm: Option<f64>,
    pub flags: WeatherFlags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<BTreeMap<Variable, f64>>,
    pub source: DataSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<BTreeMap<Variable, DataSource>>,
}

impl PredictionRecord {
    /// Builds a record whose flags are derived from `values`.
    ///
    /// `sources` holds the provenance of each present variable. The record tag follows
    /// [`DataSource::combine`]; the per-variable map is only kept for non-POWER records.
    pub fn new(
        key: ObservationKey,
        values: VariableValues,
        sources: BTreeMap<Variable, DataSource>,
        accuracy: Option<BTreeMap<Variable, f64>>,
    ) -> Self {
        let source = DataSource::combine(sources.values().copied());
        let accuracy = if source == DataSource::Power {
            None
        } else {
            accuracy
        };
        let sources = (source != DataSource::Power && !sources.is_empty()).then_some(sources);
        Self {
            date: key.date,
            hour: key.hour,
            hour_end: None,
            t2m: values.get(Variable::Temperature),
            t2m_max: values.get(Variable::TemperatureMax),
            t2m_min: values.get(Variable::TemperatureMin),
            ws10m: values.get(Variable::WindSpeed),
            precip_mm: values.get(Variable::Precipitation),
            flags: WeatherFlags::from_values(&values),
            accuracy,
            source,
            sources,
        }
    }

    pub fn values(&self) -> VariableValues {
        let mut values = VariableValues::new();
        values.set(Variable::Temperature, self.t2m);
        values.set(Variable::TemperatureMax, self.t2m_max);
        values.set(Variable::TemperatureMin, self.t2m_min);
        values.set(Variable::WindSpeed, self.ws10m);
        values.set(Variable::Precipitation, self.precip_mm);
        values
    }

    /// Collapses an hour interval into one record of per-variable means.
    ///
    /// `hour` is the first record's hour and `hour_end` the last one's. Flags are
    /// recomputed from the aggregated values, and each variable keeps the lowest accuracy
    /// any record reports for it. Returns `None` for an empty slice.
    pub fn aggregate(records: &[PredictionRecord]) -> Option<PredictionRecord> {
        let first = records.first()?;
        let last = records.last()?;

        let mut values = VariableValues::new();
        for variable in Variable::ALL {
            let present: Vec<f64> = records
                .iter()
                .filter_map(|r| r.values().get(variable))
                .collect();
            if !present.is_empty() {
                values.set(variable, Some(present.iter().sum::<f64>() / present.len() as f64));
            }
        }

        let mut sources = BTreeMap::new();
        for variable in Variable::ALL {
            let parts: Vec<DataSource> = records
                .iter()
                .filter(|r| r.values().get(variable).is_some())
                .map(|r| r.source_of(variable))
                .collect();
            if !parts.is_empty() {
                sources.insert(variable, DataSource::combine(parts));
            }
        }

        let mut accuracy: BTreeMap<Variable, f64> = BTreeMap::new();
        for (variable, pct) in records.iter().flat_map(|r| r.accuracy.iter().flatten()) {
            accuracy
                .entry(*variable)
                .and_modify(|lowest| *lowest = lowest.min(*pct))
                .or_insert(*pct);
        }
        let accuracy = (!accuracy.is_empty()).then_some(accuracy);
        let mut record = PredictionRecord::new(
            ObservationKey {
                date: first.date,
                hour: first.hour,
            },
            values,
            sources,
            accuracy,
        );
        record.hour_end = last.hour;
        Some(record)
    }

    /// Provenance of one variable of this record.
    pub fn source_of(&self, variable: Variable) -> DataSource {
        self.sources
            .as_ref()
            .and_then(|s| s.get(&variable).copied())
            .unwrap_or(self.source)
    }
}

/// Provider metadata echoed back to the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastMeta {
    pub service: Option<String>,
    pub version: Option<String>,
    pub time_standard: Option<String>,
    pub available_start: Option<NaiveDate>,
    pub available_end: Option<NaiveDate>,
    pub units: BTreeMap<String, Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiPredictionInput {
    pub latitude: f64,
    pub longitude: f64,
    pub dates: Vec<NaiveDate>,
    pub years_back: u32,
}

/// Validation error of one family.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FamilyMetrics {
    #[serde(rename = "RMSE")]
    pub rmse: f64,
    #[serde(rename = "MAE")]
    pub mae: f64,
    #[serde(rename = "F1", default, skip_serializing_if = "Option::is_none")]
    pub f1: Option<f64>,
}

/// The model picked for one variable and its first forecast value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChosenModel {
    pub best_model: ModelFamily,
    pub value: f64,
    #[serde(flatten)]
    pub metrics: FamilyMetrics,
}

/// Diagnostics block attached to results that went through the forecast path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiPrediction {
    pub execution_time: f64,
    pub input: AiPredictionInput,
    pub chosen: BTreeMap<Variable, ChosenModel>,
    pub metrics: BTreeMap<Variable, BTreeMap<ModelFamily, FamilyMetrics>>,
    pub predictions: BTreeMap<Variable, BTreeMap<ModelFamily, f64>>,
    pub fallbacks: BTreeMap<Variable, String>,
}

/// States visited by the orchestrator while serving one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForecastStage {
    CheckRealData,
    RealDataSufficient,
    NeedsForecast,
    HistoricalLoadOk,
    HistoricalLoadFailed,
    RunEnsemble,
    SyntheticFallback,
    AssembleResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    pub meta: ForecastMeta,
    pub granularity: Granularity,
    pub data: Vec<PredictionRecord>,
    pub series: Option<Vec<PredictionRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_prediction: Option<AiPrediction>,
    #[serde(skip)]
    pub trace: Vec<ForecastStage>,
}

impl ForecastResult {
    pub fn visited(&self, stage: ForecastStage) -> bool {
        self.trace.contains(&stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, 4).unwrap()
    }

    fn all_sources(source: DataSource) -> BTreeMap<Variable, DataSource> {
        Variable::ALL.iter().map(|v| (*v, source)).collect()
    }

    #[test]
    fn test_flag_thresholds_are_inclusive() {
        let values = VariableValues::new()
            .with(Variable::Precipitation, 1.0)
            .with(Variable::WindSpeed, 9.0)
            .with(Variable::TemperatureMax, 34.0);
        let flags = WeatherFlags::from_values(&values);
        assert!(flags.rain_risk && flags.wind_caution && flags.heat_caution);

        let values = VariableValues::new()
            .with(Variable::Precipitation, 0.99)
            .with(Variable::WindSpeed, 8.99)
            .with(Variable::Temperature, 33.9);
        assert_eq!(WeatherFlags::from_values(&values), WeatherFlags::default());
    }

    #[test]
    fn test_absent_values_never_flag() {
        assert_eq!(
            WeatherFlags::from_values(&VariableValues::new()),
            WeatherFlags::default()
        );
    }

    #[test]
    fn test_combine_sources() {
        use DataSource::*;
        assert_eq!(DataSource::combine([Power, Power]), Power);
        assert_eq!(DataSource::combine([Power, AiPrediction]), AiPrediction);
        assert_eq!(DataSource::combine([Power, Synthetic]), Synthetic);
        assert_eq!(DataSource::combine([AiPrediction, Synthetic, Power]), Synthetic);
        assert_eq!(DataSource::combine([Synthetic, AiPrediction]), Synthetic);
        assert_eq!(DataSource::combine([]), Synthetic);
    }

    #[test]
    fn test_power_record_drops_accuracy_and_sources() {
        let accuracy: BTreeMap<Variable, f64> = [(Variable::Temperature, 80.0)].into();
        let record = PredictionRecord::new(
            ObservationKey::daily(date()),
            VariableValues::new().with(Variable::Temperature, 25.0),
            all_sources(DataSource::Power),
            Some(accuracy),
        );
        assert_eq!(record.source, DataSource::Power);
        assert!(record.accuracy.is_none());
        assert!(record.sources.is_none());

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("accuracy").is_none());
        assert_eq!(json["source"], "POWER");
        assert_eq!(json["date"], "2025-10-04");
    }

    #[test]
    fn test_aggregate_means_and_recomputed_flags() {
        let key = |h| ObservationKey::hourly(date(), h);
        let records: Vec<PredictionRecord> = [(10, 0.5, 30.0), (11, 2.5, 36.0)]
            .iter()
            .map(|(h, p, t)| {
                PredictionRecord::new(
                    key(*h),
                    VariableValues::new()
                        .with(Variable::Precipitation, *p)
                        .with(Variable::Temperature, *t)
                        .with(Variable::WindSpeed, 2.0),
                    all_sources(DataSource::Power),
                    None,
                )
            })
            .collect();

        let aggregate = PredictionRecord::aggregate(&records).unwrap();
        assert_eq!(aggregate.hour, Some(10));
        assert_eq!(aggregate.hour_end, Some(11));
        assert_eq!(aggregate.precip_mm, Some(1.5));
        assert_eq!(aggregate.t2m, Some(33.0));
        assert_eq!(aggregate.flags, WeatherFlags::from_values(&aggregate.values()));
        assert!(aggregate.flags.rain_risk);
        assert!(!aggregate.flags.heat_caution);
        assert_eq!(aggregate.source, DataSource::Power);
        assert!(PredictionRecord::aggregate(&[]).is_none());
    }

    #[test]
    fn test_aggregate_merges_accuracy_and_sources_per_variable() {
        let key = |h| ObservationKey::hourly(date(), h);
        let first = PredictionRecord::new(
            key(10),
            VariableValues::new()
                .with(Variable::Temperature, 28.0)
                .with(Variable::Precipitation, 0.2),
            [
                (Variable::Temperature, DataSource::AiPrediction),
                (Variable::Precipitation, DataSource::Power),
            ]
            .into(),
            Some([(Variable::Temperature, 80.0)].into()),
        );
        let second = PredictionRecord::new(
            key(11),
            VariableValues::new()
                .with(Variable::Temperature, 29.0)
                .with(Variable::Precipitation, 0.4),
            [
                (Variable::Temperature, DataSource::AiPrediction),
                (Variable::Precipitation, DataSource::Synthetic),
            ]
            .into(),
            Some([(Variable::Temperature, 70.0), (Variable::Precipitation, 0.0)].into()),
        );
        assert_eq!(first.source, DataSource::AiPrediction);
        assert_eq!(second.source, DataSource::Synthetic);

        let aggregate = PredictionRecord::aggregate(&[first, second]).unwrap();
        let accuracy = aggregate.accuracy.as_ref().unwrap();
        assert_eq!(accuracy[&Variable::Temperature], 70.0);
        assert_eq!(accuracy[&Variable::Precipitation], 0.0);
        assert_eq!(aggregate.source_of(Variable::Precipitation), DataSource::Synthetic);
        assert_eq!(aggregate.source_of(Variable::Temperature), DataSource::AiPrediction);
        assert_eq!(aggregate.source, DataSource::Synthetic);
    }

    #[test]
    fn test_chosen_model_serializes_upper_case_metrics() {
        let chosen = ChosenModel {
            best_model: ModelFamily::RandomForest,
            value: 1.2,
            metrics: FamilyMetrics {
                rmse: 2.0,
                mae: 1.0,
                f1: Some(0.5),
            },
        };
        let json = serde_json::to_value(chosen).unwrap();
        assert_eq!(json["best_model"], "RandomForest");
        assert_eq!(json["RMSE"], 2.0);
        assert_eq!(json["F1"], 0.5);
    }
}
