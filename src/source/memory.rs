use crate::source::error::SourceError;
use crate::source::observation_source::{
    ObservationSource, RawObservations, RawRow, SourceMeta, SourceQuery,
};
use crate::types::observation::{ObservationKey, VariableValues};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// An [`ObservationSource`] backed by rows held in memory.
///
/// Useful offline and in tests. Rows after `available_end` are withheld, mimicking the
/// provider's publication lag.
#[derive(Debug, Default)]
pub struct InMemorySource {
    rows: BTreeMap<ObservationKey, VariableValues>,
    meta: SourceMeta,
    failing: bool,
    calls: AtomicUsize,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(mut self, rows: impl IntoIterator<Item = RawRow>) -> Self {
        for row in rows {
            self.rows.insert(row.key, row.values);
        }
        self
    }

    pub fn with_meta(mut self, meta: SourceMeta) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_available_end(mut self, date: NaiveDate) -> Self {
        self.meta.available_end = Some(date);
        self
    }

    /// Every fetch fails with [`SourceError::Unavailable`].
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    /// Number of `fetch` calls served so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ObservationSource for InMemorySource {
    async fn fetch(&self, query: &SourceQuery) -> Result<RawObservations, SourceError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.failing {
            return Err(SourceError::Unavailable(
                "in-memory source configured to fail".to_string(),
            ));
        }

        let published = |key: &ObservationKey| {
            self.meta
                .available_end
                .map_or(true, |end| key.date <= end)
        };
        let rows = self
            .rows
            .range(ObservationKey::daily(query.start)..)
            .take_while(|(key, _)| key.date <= query.end)
            .filter(|(key, _)| query.covers(key) && published(key))
            .map(|(key, values)| RawRow {
                key: *key,
                values: *values,
            })
            .collect();

        Ok(RawObservations {
            meta: self.meta.clone(),
            rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::location::Location;
    use crate::types::prediction::Granularity;
    use crate::types::variable::Variable;

    fn row(key: ObservationKey, t2m: f64) -> RawRow {
        RawRow {
            key,
            values: VariableValues::new().with(Variable::Temperature, t2m),
        }
    }

    #[tokio::test]
    async fn test_filters_by_range_granularity_and_publication() -> Result<(), Box<dyn std::error::Error>> {
        let d = |day| NaiveDate::from_ymd_opt(2025, 1, day).unwrap();
        let source = InMemorySource::new()
            .with_rows([
                row(ObservationKey::daily(d(1)), 1.0),
                row(ObservationKey::daily(d(2)), 2.0),
                row(ObservationKey::hourly(d(2), 12), 2.5),
                row(ObservationKey::daily(d(3)), 3.0),
                row(ObservationKey::daily(d(4)), 4.0),
            ])
            .with_available_end(d(3));
        let location = Location::new(1.0, 1.0)?;

        let daily = source.fetch(&SourceQuery::daily(location, d(2), d(4))).await?;
        let dates: Vec<NaiveDate> = daily.rows.iter().map(|r| r.key.date).collect();
        assert_eq!(dates, vec![d(2), d(3)]);

        let hourly = source
            .fetch(&SourceQuery {
                location,
                start: d(1),
                end: d(4),
                granularity: Granularity::Hourly,
                hours: Some((10, 13)),
            })
            .await?;
        assert_eq!(hourly.rows.len(), 1);
        assert_eq!(source.calls(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_failing_source() -> Result<(), Box<dyn std::error::Error>> {
        let source = InMemorySource::new().failing();
        let d = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let result = source
            .fetch(&SourceQuery::daily(Location::new(0.0, 0.0)?, d, d))
            .await;
        assert!(matches!(result, Err(SourceError::Unavailable(_))));
        Ok(())
    }
}
