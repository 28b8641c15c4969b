//! Multi-year observation history for one location.

use crate::dataset::error::DatasetError;
use crate::dataset::series::VariableSeries;
use crate::source::observation_source::{ObservationSource, RawObservations, SourceQuery};
use crate::types::location::Location;
use crate::types::observation::{
    clean_value, ObservationKey, ObservationRecord, VariableValues, SENTINEL,
};
use crate::types::prediction::Granularity;
use crate::types::variable::Variable;
use bon::bon;
use chrono::{Datelike, Months, NaiveDate};
use log::{debug, info, warn};
use polars::prelude::*;
use std::sync::Arc;
use tokio::task;

const DATE_COLUMN: &str = "date";
const HOUR_COLUMN: &str = "hour";
const SEQ_COLUMN: &str = "seq";
const FILL_COLUMN: &str = "fill_value";

/// Cleansed observations for one location, strictly increasing by (date, hour) with no
/// duplicate keys.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalDataset {
    location: Location,
    granularity: Granularity,
    records: Vec<ObservationRecord>,
}

#[bon]
impl HistoricalDataset {
    /// Loads the daily history ending at `end` from an observation source.
    ///
    /// The window `[end - years_back, end]` is requested one calendar year at a time. A
    /// failing chunk is logged and skipped, so a partial outage only lowers coverage.
    ///
    /// # Arguments
    ///
    /// * `source` - Where observations come from.
    /// * `location` - The point to load.
    /// * `end` - Last day of the window, inclusive.
    /// * `years_back` - Length of the look-back window in years.
    /// * `min_row_fraction` - Fraction of expected days that must carry at least one value.
    ///
    /// # Errors
    ///
    /// [`DatasetError::DataUnavailable`] when coverage stays under `min_row_fraction`
    /// (including when every chunk failed), [`DatasetError::InvalidWindow`] for a window
    /// that cannot be represented, and frame processing errors.
    #[builder]
    pub async fn load(
        source: Arc<dyn ObservationSource>,
        location: Location,
        end: NaiveDate,
        years_back: u32,
        min_row_fraction: f64,
    ) -> Result<Self, DatasetError> {
        if years_back == 0 {
            return Err(DatasetError::InvalidWindow(format!(
                "zero years of history requested before {end}"
            )));
        }
        let start = years_back
            .checked_mul(12)
            .and_then(|months| end.checked_sub_months(Months::new(months)))
            .ok_or_else(|| {
                DatasetError::InvalidWindow(format!("{years_back} years before {end}"))
            })?;
        info!(
            "Loading history for {} from {} to {} ({} years)",
            location, start, end, years_back
        );

        let mut chunks = Vec::new();
        for (chunk_start, chunk_end) in yearly_chunks(start, end) {
            let query = SourceQuery::daily(location, chunk_start, chunk_end);
            match source.fetch(&query).await {
                Ok(observations) => {
                    debug!(
                        "History chunk {}..{} returned {} rows",
                        chunk_start,
                        chunk_end,
                        observations.rows.len()
                    );
                    chunks.push(observations);
                }
                Err(e) => warn!(
                    "History chunk {}..{} for {} failed, skipping: {}",
                    chunk_start, chunk_end, location, e
                ),
            }
        }

        let dataset = task::spawn_blocking(move || {
            Self::from_observations(location, Granularity::Daily, &chunks)
        })
        .await??;

        let expected = ((end - start).num_days() + 1) as usize;
        dataset.check_coverage(expected, min_row_fraction)?;
        info!(
            "Loaded {} history rows for {} ({} expected)",
            dataset.len(),
            location,
            expected
        );
        Ok(dataset)
    }
}

impl HistoricalDataset {
    /// Builds a dataset from raw provider rows through the cleansing pipeline.
    ///
    /// Sentinel and fill values become nulls, rows are sorted by (date, hour) and, for
    /// duplicate keys, the row delivered last wins. Rows without any value are dropped.
    pub fn from_observations(
        location: Location,
        granularity: Granularity,
        chunks: &[RawObservations],
    ) -> Result<Self, DatasetError> {
        let raw = raw_frame(chunks)?;
        let cleaned = raw
            .lazy()
            .with_columns(
                Variable::ALL
                    .iter()
                    .map(|v| null_markers(v.column_name()))
                    .collect::<Vec<_>>(),
            )
            .sort(
                [DATE_COLUMN, HOUR_COLUMN, SEQ_COLUMN],
                SortMultipleOptions::default(),
            )
            .select(output_columns())
            .collect()?;

        let records = dedup_last(records_from_frame(&cleaned)?);
        Ok(Self {
            location,
            granularity,
            records,
        })
    }

    /// Rebuilds a dataset from a frame produced by [`HistoricalDataset::to_frame`].
    pub fn from_frame(
        location: Location,
        granularity: Granularity,
        frame: &DataFrame,
    ) -> Result<Self, DatasetError> {
        let mut records = records_from_frame(frame)?;
        records.sort_by_key(|r| r.key);
        Ok(Self {
            location,
            granularity,
            records: dedup_last(records),
        })
    }

    /// The cleansed records as a frame: `date` (days from the common era), `hour`
    /// (nullable) and one Float64 column per variable.
    pub fn to_frame(&self) -> Result<DataFrame, DatasetError> {
        let mut dates = Vec::with_capacity(self.records.len());
        let mut hours = Vec::with_capacity(self.records.len());
        let mut values: Vec<Vec<Option<f64>>> =
            vec![Vec::with_capacity(self.records.len()); Variable::COUNT];
        for record in &self.records {
            dates.push(record.date().num_days_from_ce());
            hours.push(record.hour().map(|h| h as i32));
            for variable in Variable::ALL {
                values[variable.index()].push(record.get(variable));
            }
        }

        let mut columns = vec![
            Column::new(DATE_COLUMN.into(), dates),
            Column::new(HOUR_COLUMN.into(), hours),
        ];
        for variable in Variable::ALL {
            columns.push(Column::new(
                variable.column_name().into(),
                std::mem::take(&mut values[variable.index()]),
            ));
        }
        Ok(DataFrame::new(columns)?)
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn records(&self) -> &[ObservationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Fails with [`DatasetError::DataUnavailable`] when fewer than
    /// `min_row_fraction * expected` rows are present.
    pub fn check_coverage(&self, expected: usize, min_row_fraction: f64) -> Result<(), DatasetError> {
        let returned = self.records.len();
        let required = (expected as f64 * min_row_fraction).ceil() as usize;
        if returned == 0 || returned < required {
            return Err(DatasetError::DataUnavailable {
                expected,
                returned,
                min_fraction: min_row_fraction,
            });
        }
        Ok(())
    }

    /// One variable on a regular grid spanning the first to the last record.
    pub fn series(&self, variable: Variable) -> Result<VariableSeries, DatasetError> {
        let first = self.records.first().ok_or(DatasetError::Empty)?;
        let mut series = VariableSeries::new(variable, self.granularity, first.key, Vec::new());
        let mut grid: Vec<Option<f64>> = Vec::new();
        for record in &self.records {
            let offset = series.offset_of(&record.key).ok_or_else(|| {
                DatasetError::UnexpectedData(format!(
                    "record {:?} does not fit the {} grid",
                    record.key, self.granularity
                ))
            })?;
            if offset >= grid.len() {
                grid.resize(offset + 1, None);
            }
            grid[offset] = record.get(variable);
        }
        for value in grid {
            series.push(value);
        }
        Ok(series)
    }

    /// Mean of `(T2M_MAX - T2M_MIN) / 2` over the last `days` records that carry both.
    pub fn recent_half_range(&self, days: usize) -> Option<f64> {
        let halves: Vec<f64> = self
            .records
            .iter()
            .rev()
            .take(days)
            .filter_map(|r| {
                Some((r.get(Variable::TemperatureMax)? - r.get(Variable::TemperatureMin)?) / 2.0)
            })
            .collect();
        if halves.is_empty() {
            return None;
        }
        Some(halves.iter().sum::<f64>() / halves.len() as f64)
    }
}

/// Calendar-year pieces of `[start, end]`.
fn yearly_chunks(start: NaiveDate, end: NaiveDate) -> Vec<(NaiveDate, NaiveDate)> {
    let mut chunks = Vec::new();
    let mut chunk_start = start;
    while chunk_start <= end {
        let year_end = NaiveDate::from_ymd_opt(chunk_start.year(), 12, 31).unwrap_or(end);
        let chunk_end = year_end.min(end);
        chunks.push((chunk_start, chunk_end));
        match chunk_end.succ_opt() {
            Some(next) => chunk_start = next,
            None => break,
        }
    }
    chunks
}

fn raw_frame(chunks: &[RawObservations]) -> PolarsResult<DataFrame> {
    let row_count: usize = chunks.iter().map(|c| c.rows.len()).sum();
    let mut seq = Vec::with_capacity(row_count);
    let mut dates = Vec::with_capacity(row_count);
    let mut hours = Vec::with_capacity(row_count);
    let mut fills = Vec::with_capacity(row_count);
    let mut values: Vec<Vec<Option<f64>>> = vec![Vec::with_capacity(row_count); Variable::COUNT];

    for chunk in chunks {
        let fill = chunk.meta.fill_value.unwrap_or(SENTINEL);
        for row in &chunk.rows {
            seq.push(seq.len() as u32);
            dates.push(row.key.date.num_days_from_ce());
            hours.push(row.key.hour.map(|h| h as i32));
            fills.push(fill);
            for (variable, value) in row.values.iter() {
                values[variable.index()].push(value);
            }
        }
    }

    let mut columns = vec![
        Column::new(SEQ_COLUMN.into(), seq),
        Column::new(DATE_COLUMN.into(), dates),
        Column::new(HOUR_COLUMN.into(), hours),
        Column::new(FILL_COLUMN.into(), fills),
    ];
    for variable in Variable::ALL {
        columns.push(Column::new(
            variable.column_name().into(),
            std::mem::take(&mut values[variable.index()]),
        ));
    }
    DataFrame::new(columns)
}

fn null_markers(name: &str) -> Expr {
    when(
        col(name)
            .eq(lit(SENTINEL))
            .or(col(name).eq(col(FILL_COLUMN))),
    )
    .then(lit(NULL).cast(DataType::Float64))
    .otherwise(col(name))
    .alias(name)
}

fn output_columns() -> Vec<Expr> {
    let mut exprs = vec![col(DATE_COLUMN), col(HOUR_COLUMN)];
    exprs.extend(Variable::ALL.iter().map(|v| col(v.column_name())));
    exprs
}

fn records_from_frame(frame: &DataFrame) -> Result<Vec<ObservationRecord>, DatasetError> {
    let column = |name: &str| {
        frame
            .column(name)
            .map_err(|e| DatasetError::ColumnNotFound(name.to_string(), e))
    };
    let dates: Vec<Option<i32>> = column(DATE_COLUMN)?.i32()?.into_iter().collect();
    let hours: Vec<Option<i32>> = column(HOUR_COLUMN)?.i32()?.into_iter().collect();
    let mut values = Vec::with_capacity(Variable::COUNT);
    for variable in Variable::ALL {
        let series: Vec<Option<f64>> = column(variable.column_name())?.f64()?.into_iter().collect();
        values.push(series);
    }

    let mut records = Vec::with_capacity(dates.len());
    for (row, (date, hour)) in dates.into_iter().zip(hours).enumerate() {
        let date = date
            .and_then(NaiveDate::from_num_days_from_ce_opt)
            .ok_or_else(|| DatasetError::UnexpectedData(format!("row {row} has no valid date")))?;
        let hour = match hour {
            Some(h) if (0..24).contains(&h) => Some(h as u32),
            Some(h) => {
                return Err(DatasetError::UnexpectedData(format!(
                    "row {row} has hour {h}"
                )))
            }
            None => None,
        };
        let mut raw = VariableValues::new();
        for variable in Variable::ALL {
            let value = values[variable.index()][row].and_then(|v| clean_value(v, None));
            raw.set(variable, value);
        }
        let record = ObservationRecord::from_raw(ObservationKey { date, hour }, &raw, None);
        if !record.values().is_empty() {
            records.push(record);
        }
    }
    Ok(records)
}

/// Collapses runs of equal keys in a sorted record list, keeping the last of each run.
fn dedup_last(records: Vec<ObservationRecord>) -> Vec<ObservationRecord> {
    let mut out: Vec<ObservationRecord> = Vec::with_capacity(records.len());
    for record in records {
        match out.last_mut() {
            Some(previous) if previous.key == record.key => *previous = record,
            _ => out.push(record),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::memory::InMemorySource;
    use crate::source::observation_source::{RawRow, SourceMeta};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn row(date: NaiveDate, t2m: f64, precip: f64) -> RawRow {
        RawRow {
            key: ObservationKey::daily(date),
            values: VariableValues::new()
                .with(Variable::Temperature, t2m)
                .with(Variable::Precipitation, precip),
        }
    }

    fn location() -> Location {
        Location::new(-7.12, -34.88).unwrap()
    }

    #[test]
    fn test_cleansing_sort_and_last_row_wins() -> Result<(), Box<dyn std::error::Error>> {
        let chunk_a = RawObservations {
            meta: SourceMeta {
                fill_value: Some(-777.0),
                ..Default::default()
            },
            rows: vec![
                row(d(2025, 1, 3), 25.0, -777.0),
                row(d(2025, 1, 1), SENTINEL, 2.0),
                row(d(2025, 1, 2), 24.0, 0.0),
            ],
        };
        let chunk_b = RawObservations {
            meta: SourceMeta::default(),
            rows: vec![row(d(2025, 1, 2), 26.5, f64::NAN)],
        };

        let dataset =
            HistoricalDataset::from_observations(location(), Granularity::Daily, &[chunk_a, chunk_b])?;

        let keys: Vec<NaiveDate> = dataset.records().iter().map(|r| r.date()).collect();
        assert_eq!(keys, vec![d(2025, 1, 1), d(2025, 1, 2), d(2025, 1, 3)]);
        assert_eq!(dataset.records()[0].get(Variable::Temperature), None);
        assert_eq!(dataset.records()[1].get(Variable::Temperature), Some(26.5));
        assert_eq!(dataset.records()[1].get(Variable::Precipitation), None);
        assert_eq!(dataset.records()[2].get(Variable::Precipitation), None);

        for record in dataset.records() {
            for (_, value) in record.values().iter() {
                if let Some(v) = value {
                    assert!(v.is_finite() && v != SENTINEL && v != -777.0);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_frame_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let chunk = RawObservations {
            meta: SourceMeta::default(),
            rows: vec![row(d(2024, 2, 28), 20.0, 1.0), row(d(2024, 2, 29), 21.0, 0.0)],
        };
        let dataset = HistoricalDataset::from_observations(location(), Granularity::Daily, &[chunk])?;
        let frame = dataset.to_frame()?;
        assert_eq!(frame.height(), 2);
        let restored = HistoricalDataset::from_frame(location(), Granularity::Daily, &frame)?;
        assert_eq!(restored, dataset);
        Ok(())
    }

    #[test]
    fn test_series_fills_gaps() -> Result<(), Box<dyn std::error::Error>> {
        let chunk = RawObservations {
            meta: SourceMeta::default(),
            rows: vec![row(d(2025, 3, 1), 20.0, 1.0), row(d(2025, 3, 4), 23.0, 0.0)],
        };
        let dataset = HistoricalDataset::from_observations(location(), Granularity::Daily, &[chunk])?;
        let series = dataset.series(Variable::Temperature)?;
        assert_eq!(series.values(), &[Some(20.0), None, None, Some(23.0)]);
        assert!(matches!(
            HistoricalDataset::from_observations(location(), Granularity::Daily, &[])?
                .series(Variable::Temperature),
            Err(DatasetError::Empty)
        ));
        Ok(())
    }

    #[test]
    fn test_yearly_chunks() {
        let chunks = yearly_chunks(d(2023, 10, 1), d(2025, 2, 1));
        assert_eq!(
            chunks,
            vec![
                (d(2023, 10, 1), d(2023, 12, 31)),
                (d(2024, 1, 1), d(2024, 12, 31)),
                (d(2025, 1, 1), d(2025, 2, 1)),
            ]
        );
    }

    #[tokio::test]
    async fn test_load_queries_each_year_and_checks_coverage() -> Result<(), Box<dyn std::error::Error>> {
        let end = d(2025, 10, 1);
        let rows: Vec<RawRow> = d(2023, 10, 1)
            .iter_days()
            .take_while(|day| *day <= end)
            .map(|day| row(day, 26.0, 0.0))
            .collect();
        let source = Arc::new(InMemorySource::new().with_rows(rows));

        let dataset = HistoricalDataset::load()
            .source(source.clone())
            .location(location())
            .end(end)
            .years_back(2)
            .min_row_fraction(0.5)
            .call()
            .await?;
        assert_eq!(dataset.len(), 732);
        assert_eq!(source.calls(), 3);
        assert_eq!(dataset.records().last().map(|r| r.key), Some(ObservationKey::daily(end)));

        // Three years requested, two available: under 0.9 coverage.
        let sparse = HistoricalDataset::load()
            .source(source)
            .location(location())
            .end(end)
            .years_back(3)
            .min_row_fraction(0.9)
            .call()
            .await;
        assert!(matches!(sparse, Err(DatasetError::DataUnavailable { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_load_rejects_empty_window() {
        let source = Arc::new(InMemorySource::new());
        let result = HistoricalDataset::load()
            .source(source.clone())
            .location(location())
            .end(d(2025, 10, 1))
            .years_back(0)
            .min_row_fraction(0.5)
            .call()
            .await;
        assert!(matches!(result, Err(DatasetError::InvalidWindow(_))));
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_load_with_zero_rows_is_unavailable() {
        let source = Arc::new(InMemorySource::new().failing());
        let result = HistoricalDataset::load()
            .source(source)
            .location(location())
            .end(d(2025, 10, 1))
            .years_back(1)
            .min_row_fraction(0.0)
            .call()
            .await;
        assert!(matches!(
            result,
            Err(DatasetError::DataUnavailable { returned: 0, .. })
        ));
    }

    #[test]
    fn test_recent_half_range() -> Result<(), Box<dyn std::error::Error>> {
        let rows = vec![
            RawRow {
                key: ObservationKey::daily(d(2025, 1, 1)),
                values: VariableValues::new()
                    .with(Variable::TemperatureMax, 30.0)
                    .with(Variable::TemperatureMin, 20.0),
            },
            RawRow {
                key: ObservationKey::daily(d(2025, 1, 2)),
                values: VariableValues::new()
                    .with(Variable::TemperatureMax, 28.0)
                    .with(Variable::TemperatureMin, 22.0),
            },
        ];
        let dataset = HistoricalDataset::from_observations(
            location(),
            Granularity::Daily,
            &[RawObservations {
                meta: SourceMeta::default(),
                rows,
            }],
        )?;
        assert_eq!(dataset.recent_half_range(30), Some(4.0));
        assert_eq!(dataset.recent_half_range(1), Some(3.0));
        Ok(())
    }
}
