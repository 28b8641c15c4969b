//! NASA POWER point API client.
//!
//! Queries the daily or hourly `temporal/*/point` endpoint and turns the JSON payload
//! into [`RawObservations`]. Values are passed through untouched; sentinel removal
//! happens when records are built from the rows.

use crate::source::error::SourceError;
use crate::source::observation_source::{
    ObservationSource, RawObservations, RawRow, SourceMeta, SourceQuery,
};
use crate::types::observation::{ObservationKey, VariableValues, SENTINEL};
use crate::types::prediction::Granularity;
use crate::types::variable::Variable;
use async_trait::async_trait;
use bon::bon;
use chrono::NaiveDate;
use log::{info, warn};
use reqwest::Client;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

pub const DAILY_BASE_URL: &str = "https://power.larc.nasa.gov/api/temporal/daily/point";
pub const HOURLY_BASE_URL: &str = "https://power.larc.nasa.gov/api/temporal/hourly/point";
pub const DEFAULT_DAILY_PARAMETERS: &str = "T2M,T2M_MAX,T2M_MIN,WS10M,PRECTOTCORR";
pub const DEFAULT_HOURLY_PARAMETERS: &str = "T2M,WS10M,PRECTOTCORR";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(25);

const UNIT_KEYS: [&str; 6] = ["T2M", "T2M_MAX", "T2M_MIN", "WS10M", "PRECTOT", "PRECTOTCORR"];

/// HTTP client for the NASA POWER API.
#[derive(Debug, Clone)]
pub struct PowerClient {
    client: Client,
    daily_url: String,
    hourly_url: String,
}

#[bon]
impl PowerClient {
    /// Creates a client.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Whole-request timeout (default 25 s). A timed-out request is
    ///   reported as [`SourceError::NetworkRequest`].
    /// * `daily_url` / `hourly_url` - Endpoint overrides, mainly for mirrors.
    ///
    /// # Errors
    ///
    /// [`SourceError::ClientBuild`] if the TLS backend cannot be initialised.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use std::time::Duration;
    /// use rain_forecast::PowerClient;
    ///
    /// let client = PowerClient::builder()
    ///     .timeout(Duration::from_secs(10))
    ///     .build()
    ///     .unwrap();
    /// ```
    #[builder]
    pub fn new(
        timeout: Option<Duration>,
        daily_url: Option<String>,
        hourly_url: Option<String>,
    ) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(timeout.unwrap_or(DEFAULT_TIMEOUT))
            .user_agent(concat!("rain_forecast/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(SourceError::ClientBuild)?;
        Ok(Self {
            client,
            daily_url: daily_url.unwrap_or_else(|| DAILY_BASE_URL.to_string()),
            hourly_url: hourly_url.unwrap_or_else(|| HOURLY_BASE_URL.to_string()),
        })
    }
}

impl PowerClient {
    async fn download(&self, query: &SourceQuery) -> Result<Value, SourceError> {
        let (url, parameters) = match query.granularity {
            Granularity::Daily => (&self.daily_url, DEFAULT_DAILY_PARAMETERS),
            Granularity::Hourly => (&self.hourly_url, DEFAULT_HOURLY_PARAMETERS),
        };
        let params = [
            ("parameters", parameters.to_string()),
            ("community", "SB".to_string()),
            ("latitude", query.location.latitude().to_string()),
            ("longitude", query.location.longitude().to_string()),
            ("start", query.start.format("%Y%m%d").to_string()),
            ("end", query.end.format("%Y%m%d").to_string()),
            ("format", "JSON".to_string()),
        ];
        info!(
            "Requesting {} POWER data for {} from {} to {}",
            query.granularity, query.location, query.start, query.end
        );

        let response = self
            .client
            .get(url.as_str())
            .query(&params)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| SourceError::NetworkRequest(url.clone(), e))?;

        let response = match response.error_for_status() {
            Ok(resp) => resp,
            Err(e) => {
                warn!("HTTP error for {}: {:?}", url, e);
                return Err(if let Some(status) = e.status() {
                    SourceError::HttpStatus {
                        url: url.clone(),
                        status,
                        source: e,
                    }
                } else {
                    SourceError::NetworkRequest(url.clone(), e)
                });
            }
        };

        response
            .json::<Value>()
            .await
            .map_err(|e| SourceError::Decode(url.clone(), e))
    }
}

#[async_trait]
impl ObservationSource for PowerClient {
    async fn fetch(&self, query: &SourceQuery) -> Result<RawObservations, SourceError> {
        let payload = self.download(query).await?;
        let mut observations = parse_power_payload(&payload)?;
        observations.rows.retain(|row| query.covers(&row.key));
        info!(
            "Received {} {} rows for {}",
            observations.rows.len(),
            query.granularity,
            query.location
        );
        Ok(observations)
    }
}

/// Parses a POWER JSON payload.
///
/// Time keys are `YYYYMMDD` (daily) or `YYYYMMDDHH` (hourly). `PRECTOTCORR` is preferred
/// over `PRECTOT` when both are present. Unknown parameters are ignored.
pub fn parse_power_payload(payload: &Value) -> Result<RawObservations, SourceError> {
    let parameters = payload
        .pointer("/properties/parameter")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            SourceError::MalformedPayload("missing properties.parameter object".to_string())
        })?;

    let has_corrected = parameters.contains_key("PRECTOTCORR");
    let mut rows: BTreeMap<ObservationKey, VariableValues> = BTreeMap::new();

    for (name, series) in parameters {
        let Some(variable) = Variable::from_api_key(name) else {
            continue;
        };
        if name == "PRECTOT" && has_corrected {
            continue;
        }
        let Some(series) = series.as_object() else {
            continue;
        };
        for (time_key, value) in series {
            let key = parse_time_key(time_key)?;
            if let Some(value) = value.as_f64() {
                rows.entry(key).or_default().set(variable, Some(value));
            }
        }
    }

    let header = payload.get("header");
    let text = |pointer: &str| {
        header
            .and_then(|h| h.pointer(pointer))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    let header_date = |pointer: &str| {
        text(pointer).and_then(|s| NaiveDate::parse_from_str(&s, "%Y%m%d").ok())
    };

    let mut units = BTreeMap::new();
    for key in UNIT_KEYS {
        let unit = payload
            .pointer(&format!("/parameters/{key}/units"))
            .and_then(Value::as_str)
            .map(str::to_string);
        units.insert(key.to_string(), unit);
    }

    let meta = SourceMeta {
        service: text("/api/name"),
        version: text("/api/version"),
        time_standard: text("/time_standard"),
        available_start: header_date("/start"),
        available_end: header_date("/end"),
        units,
        fill_value: Some(
            header
                .and_then(|h| h.get("fill_value"))
                .and_then(Value::as_f64)
                .unwrap_or(SENTINEL),
        ),
    };

    Ok(RawObservations {
        meta,
        rows: rows
            .into_iter()
            .map(|(key, values)| RawRow { key, values })
            .collect(),
    })
}

fn parse_time_key(time_key: &str) -> Result<ObservationKey, SourceError> {
    let malformed = || SourceError::MalformedPayload(format!("unexpected time key '{time_key}'"));
    let date_part = time_key.get(0..8).ok_or_else(malformed)?;
    let date = NaiveDate::parse_from_str(date_part, "%Y%m%d").map_err(|_| malformed())?;
    match time_key.len() {
        8 => Ok(ObservationKey::daily(date)),
        10 => {
            let hour: u32 = time_key[8..10].parse().map_err(|_| malformed())?;
            if hour > 23 {
                return Err(malformed());
            }
            Ok(ObservationKey::hourly(date, hour))
        }
        _ => Err(malformed()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn daily_payload() -> Value {
        json!({
            "header": {
                "api": {"name": "POWER Daily API", "version": "v2.5.22"},
                "time_standard": "LST",
                "start": "20250101",
                "end": "20250103",
                "fill_value": -999.0
            },
            "properties": {
                "parameter": {
                    "T2M": {"20250101": 27.1, "20250102": 27.9, "20250103": -999.0},
                    "T2M_MAX": {"20250101": 30.2, "20250102": 31.0, "20250103": -999.0},
                    "PRECTOT": {"20250101": 9.0, "20250102": 9.0, "20250103": 9.0},
                    "PRECTOTCORR": {"20250101": 0.4, "20250102": 3.2, "20250103": -999.0},
                    "RH2M": {"20250101": 80.0}
                }
            },
            "parameters": {
                "T2M": {"units": "C", "longname": "Temperature at 2 Meters"},
                "PRECTOTCORR": {"units": "mm/day"}
            }
        })
    }

    #[test]
    fn test_parse_daily_payload() -> Result<(), Box<dyn std::error::Error>> {
        let parsed = parse_power_payload(&daily_payload())?;
        assert_eq!(parsed.rows.len(), 3);
        assert_eq!(parsed.meta.service.as_deref(), Some("POWER Daily API"));
        assert_eq!(parsed.meta.time_standard.as_deref(), Some("LST"));
        assert_eq!(
            parsed.meta.available_end,
            NaiveDate::from_ymd_opt(2025, 1, 3)
        );
        assert_eq!(parsed.meta.units["T2M"].as_deref(), Some("C"));
        assert_eq!(parsed.meta.units["WS10M"], None);

        // PRECTOTCORR wins over PRECTOT.
        assert_eq!(parsed.rows[1].values.get(Variable::Precipitation), Some(3.2));

        let records = parsed.records();
        assert_eq!(records.len(), 2, "the all-fill day is dropped");
        Ok(())
    }

    #[test]
    fn test_prectot_used_when_corrected_missing() -> Result<(), Box<dyn std::error::Error>> {
        let payload = json!({
            "properties": {"parameter": {"PRECTOT": {"20250101": 1.5}}}
        });
        let parsed = parse_power_payload(&payload)?;
        assert_eq!(parsed.rows[0].values.get(Variable::Precipitation), Some(1.5));
        assert_eq!(parsed.meta.fill_value, Some(SENTINEL));
        Ok(())
    }

    #[test]
    fn test_parse_hourly_keys() -> Result<(), Box<dyn std::error::Error>> {
        let payload = json!({
            "header": {"fill_value": -999},
            "properties": {"parameter": {
                "T2M": {"2025100410": 29.0, "2025100411": 30.0},
                "WS10M": {"2025100410": 4.0, "2025100411": -999}
            }}
        });
        let parsed = parse_power_payload(&payload)?;
        let date = NaiveDate::from_ymd_opt(2025, 10, 4).unwrap();
        assert_eq!(parsed.rows[0].key, ObservationKey::hourly(date, 10));
        let records = parsed.records();
        assert_eq!(records[1].get(Variable::WindSpeed), None);
        Ok(())
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(matches!(
            parse_power_payload(&json!({"messages": ["error"]})),
            Err(SourceError::MalformedPayload(_))
        ));
        let bad_key = json!({"properties": {"parameter": {"T2M": {"2025-01-01": 1.0}}}});
        assert!(matches!(
            parse_power_payload(&bad_key),
            Err(SourceError::MalformedPayload(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
        let client = PowerClient::builder()
            .timeout(Duration::from_millis(500))
            .daily_url("http://127.0.0.1:9/api".to_string())
            .build()?;
        let location = crate::types::location::Location::new(0.0, 0.0)?;
        let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let result = client
            .fetch(&SourceQuery::daily(location, date, date))
            .await;
        assert!(matches!(result, Err(SourceError::NetworkRequest(..))));
        Ok(())
    }
}
