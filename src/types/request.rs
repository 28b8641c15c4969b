use crate::error::ForecastError;
use crate::types::location::Location;
use crate::types::observation::ObservationKey;
use crate::types::prediction::Granularity;
use bon::bon;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A validated lookup: a location, an inclusive date range and an optional hour interval.
///
/// Without `hour_start` the request is daily. With it, every date in the range
/// contributes the hours `hour_start..=hour_end`. When `hour_end` is omitted it equals
/// `hour_start` for a single day and 23 for a multi-day range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRequest {
    location: Location,
    start: NaiveDate,
    end: NaiveDate,
    hours: Option<(u32, u32)>,
}

#[bon]
impl ForecastRequest {
    /// Validates and normalizes a request.
    ///
    /// # Errors
    ///
    /// [`ForecastError::InvalidRequest`] when `end < start`, when `hour_end` is given
    /// without `hour_start`, when an hour is outside `0..=23`, or when a single-day
    /// interval ends before it starts.
    ///
    /// # Example
    ///
    /// ```
    /// use chrono::NaiveDate;
    /// use rain_forecast::{ForecastRequest, Location};
    ///
    /// let request = ForecastRequest::builder()
    ///     .location(Location::new(-7.12, -34.88).unwrap())
    ///     .start(NaiveDate::from_ymd_opt(2025, 10, 4).unwrap())
    ///     .hour_start(10)
    ///     .hour_end(13)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(request.points().len(), 4);
    /// ```
    #[builder]
    pub fn new(
        location: Location,
        start: NaiveDate,
        end: Option<NaiveDate>,
        hour_start: Option<u32>,
        hour_end: Option<u32>,
    ) -> Result<Self, ForecastError> {
        let end = end.unwrap_or(start);
        if end < start {
            return Err(ForecastError::InvalidRequest(format!(
                "end date {end} is before start date {start}"
            )));
        }

        let hours = match (hour_start, hour_end) {
            (None, Some(_)) => {
                return Err(ForecastError::InvalidRequest(
                    "hour_end requires hour_start".to_string(),
                ))
            }
            (None, None) => None,
            (Some(first), last) => {
                let multi_day = end > start;
                let last = last.unwrap_or(if multi_day { 23 } else { first });
                for hour in [first, last] {
                    if hour > 23 {
                        return Err(ForecastError::InvalidRequest(format!(
                            "hour {hour} is outside 0..=23"
                        )));
                    }
                }
                if last < first {
                    return Err(ForecastError::InvalidRequest(format!(
                        "hour_end {last} is before hour_start {first}"
                    )));
                }
                Some((first, last))
            }
        };

        Ok(Self {
            location,
            start,
            end,
            hours,
        })
    }

    /// Parses the query form used by the HTTP layer: dates as `YYYYMMDD`.
    pub fn from_query(
        latitude: f64,
        longitude: f64,
        start: &str,
        end: Option<&str>,
        hour_start: Option<u32>,
        hour_end: Option<u32>,
    ) -> Result<Self, ForecastError> {
        let location = Location::new(latitude, longitude)?;
        let start = parse_compact_date(start)?;
        let end = end.map(parse_compact_date).transpose()?;
        Self::builder()
            .location(location)
            .start(start)
            .maybe_end(end)
            .maybe_hour_start(hour_start)
            .maybe_hour_end(hour_end)
            .build()
    }
}

impl ForecastRequest {
    pub fn location(&self) -> Location {
        self.location
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Inclusive hour interval for hourly requests.
    pub fn hours(&self) -> Option<(u32, u32)> {
        self.hours
    }

    pub fn granularity(&self) -> Granularity {
        if self.hours.is_some() {
            Granularity::Hourly
        } else {
            Granularity::Daily
        }
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.start
            .iter_days()
            .take_while(|d| *d <= self.end)
            .collect()
    }

    /// Every (date, hour) point the request asks for, in chronological order.
    pub fn points(&self) -> Vec<ObservationKey> {
        let dates = self.dates();
        match self.hours {
            None => dates.into_iter().map(ObservationKey::daily).collect(),
            Some((first, last)) => dates
                .into_iter()
                .flat_map(|date| (first..=last).map(move |h| ObservationKey::hourly(date, h)))
                .collect(),
        }
    }
}

fn parse_compact_date(text: &str) -> Result<NaiveDate, ForecastError> {
    NaiveDate::parse_from_str(text, "%Y%m%d").map_err(|e| {
        ForecastError::InvalidRequest(format!("date '{text}' is not YYYYMMDD: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_day_hour_end_defaults_to_start() -> Result<(), Box<dyn std::error::Error>> {
        let request = ForecastRequest::from_query(-7.12, -34.88, "20251004", None, Some(10), None)?;
        assert_eq!(request.hours(), Some((10, 10)));
        assert_eq!(request.points().len(), 1);
        assert_eq!(request.granularity(), Granularity::Hourly);
        Ok(())
    }

    #[test]
    fn test_multi_day_hour_end_defaults_to_23() -> Result<(), Box<dyn std::error::Error>> {
        let request =
            ForecastRequest::from_query(0.0, 0.0, "20251004", Some("20251005"), Some(20), None)?;
        assert_eq!(request.hours(), Some((20, 23)));
        let points = request.points();
        assert_eq!(points.len(), 8);
        assert_eq!(points[4], ObservationKey::hourly(request.end(), 20));
        Ok(())
    }

    #[test]
    fn test_daily_points_cover_range() -> Result<(), Box<dyn std::error::Error>> {
        let request =
            ForecastRequest::from_query(10.0, 10.0, "20240227", Some("20240301"), None, None)?;
        assert_eq!(request.granularity(), Granularity::Daily);
        assert_eq!(request.dates().len(), 4); // leap year
        Ok(())
    }

    #[test]
    fn test_rejects_invalid_shapes() {
        let invalid = [
            ForecastRequest::from_query(0.0, 0.0, "20251005", Some("20251004"), None, None),
            ForecastRequest::from_query(0.0, 0.0, "20251004", None, None, Some(5)),
            ForecastRequest::from_query(0.0, 0.0, "20251004", None, Some(24), None),
            ForecastRequest::from_query(0.0, 0.0, "20251004", None, Some(13), Some(10)),
            ForecastRequest::from_query(0.0, 0.0, "2025-10-04", None, None, None),
        ];
        for result in invalid {
            assert!(matches!(result, Err(ForecastError::InvalidRequest(_))));
        }
    }

    #[test]
    fn test_invalid_location_is_reported_as_such() {
        let result = ForecastRequest::from_query(95.0, 0.0, "20251004", None, None, None);
        assert!(matches!(result, Err(ForecastError::LocationInvalid { .. })));
    }
}
