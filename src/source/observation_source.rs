use crate::source::error::SourceError;
use crate::types::location::Location;
use crate::types::observation::{ObservationKey, ObservationRecord, VariableValues};
use crate::types::prediction::{ForecastMeta, Granularity};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// What to ask an observation provider for. Dates are inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceQuery {
    pub location: Location,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub granularity: Granularity,
    /// Inclusive hour filter for hourly queries.
    pub hours: Option<(u32, u32)>,
}

impl SourceQuery {
    pub fn daily(location: Location, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            location,
            start,
            end,
            granularity: Granularity::Daily,
            hours: None,
        }
    }

    /// True when `key` falls inside the queried dates and hours.
    pub fn covers(&self, key: &ObservationKey) -> bool {
        if key.date < self.start || key.date > self.end {
            return false;
        }
        match (self.granularity, key.hour) {
            (Granularity::Daily, None) => true,
            (Granularity::Hourly, Some(hour)) => self
                .hours
                .map_or(true, |(first, last)| (first..=last).contains(&hour)),
            _ => false,
        }
    }
}

/// Provider metadata, including the fill value used for missing measurements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceMeta {
    pub service: Option<String>,
    pub version: Option<String>,
    pub time_standard: Option<String>,
    pub available_start: Option<NaiveDate>,
    pub available_end: Option<NaiveDate>,
    pub units: BTreeMap<String, Option<String>>,
    pub fill_value: Option<f64>,
}

impl SourceMeta {
    pub fn to_forecast_meta(&self) -> ForecastMeta {
        ForecastMeta {
            service: self.service.clone(),
            version: self.version.clone(),
            time_standard: self.time_standard.clone(),
            available_start: self.available_start,
            available_end: self.available_end,
            units: self.units.clone(),
        }
    }
}

/// An uncleaned provider row; values may still hold sentinels.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub key: ObservationKey,
    pub values: VariableValues,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawObservations {
    pub meta: SourceMeta,
    pub rows: Vec<RawRow>,
}

impl RawObservations {
    /// Cleansed records, skipping rows that carry no value at all.
    pub fn records(&self) -> Vec<ObservationRecord> {
        self.rows
            .iter()
            .map(|row| ObservationRecord::from_raw(row.key, &row.values, self.meta.fill_value))
            .filter(|record| !record.values().is_empty())
            .collect()
    }
}

/// A provider of point observations, such as NASA POWER.
///
/// Implementations report transport problems as [`SourceError`]; callers treat any error
/// as "no data available" and never retry.
#[async_trait]
pub trait ObservationSource: Send + Sync {
    async fn fetch(&self, query: &SourceQuery) -> Result<RawObservations, SourceError>;
}
