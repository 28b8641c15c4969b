//! Deterministic synthetic weather, the last-resort fallback.
//!
//! Values depend only on the location and the timestamp: the location text is hashed
//! into a seed, and every (date, hour, stream) point gets its own generator derived from
//! that seed. Asking twice, or in a different order, yields the same numbers.

use crate::source::observation_source::RawRow;
use crate::types::location::Location;
use crate::types::observation::{ObservationKey, VariableValues};
use crate::types::variable::Variable;
use chrono::{Datelike, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Gamma, StandardNormal};
use std::f64::consts::PI;
use xxhash_rust::xxh3::{xxh3_64, xxh3_64_with_seed};

const STREAM_TEMPERATURE: u8 = 0;
const STREAM_MAX_OFFSET: u8 = 1;
const STREAM_MIN_OFFSET: u8 = 2;
const STREAM_WIND: u8 = 3;
const STREAM_RAIN: u8 = 4;
const STREAM_HOURLY: u8 = 5;

const DIURNAL_PEAK_HOUR: f64 = 15.0;

/// Cosine in `[-1, 1]` over the day, peaking at 15:00.
pub fn diurnal_cycle(hour: u32) -> f64 {
    (2.0 * PI * (hour as f64 - DIURNAL_PEAK_HOUR) / 24.0).cos()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticClimatology {
    location: Location,
    seed: u64,
}

impl SyntheticClimatology {
    pub fn new(location: Location) -> Self {
        Self {
            location,
            seed: xxh3_64(location.rounded_key().as_bytes()),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    fn rng(&self, date: NaiveDate, hour: Option<u32>, stream: u8) -> StdRng {
        let mut point = [0u8; 9];
        point[..4].copy_from_slice(&date.num_days_from_ce().to_le_bytes());
        point[4..8].copy_from_slice(&hour.unwrap_or(u32::MAX).to_le_bytes());
        point[8] = stream;
        StdRng::seed_from_u64(xxh3_64_with_seed(&point, self.seed))
    }

    fn normal(&self, date: NaiveDate, hour: Option<u32>, stream: u8, mean: f64, std: f64) -> f64 {
        let z: f64 = self.rng(date, hour, stream).sample(StandardNormal);
        mean + std * z
    }

    /// All five variables for one day.
    pub fn daily(&self, date: NaiveDate) -> VariableValues {
        let latitude = self.location.latitude();
        let radians = 2.0 * PI * date.ordinal() as f64 / 365.0;

        let base = 24.0 - (latitude.abs() / 90.0) * 8.0 + (radians * 0.5).cos() * 2.5;
        let t2m = base + radians.sin() * 6.0 + self.normal(date, None, STREAM_TEMPERATURE, 0.0, 1.2);
        let t2m_max = t2m + self.normal(date, None, STREAM_MAX_OFFSET, 2.5, 0.8);
        let t2m_min = t2m - self.normal(date, None, STREAM_MIN_OFFSET, 2.2, 0.7);

        let wind = (3.5 + (latitude.abs() / 90.0) * 2.0
            + radians.cos() * 1.5
            + self.normal(date, None, STREAM_WIND, 0.0, 1.0))
        .max(0.0);

        let rain_phase = ((radians + latitude / 45.0).sin() + 1.0) / 2.0;
        let rain_probability = (0.25 + rain_phase * 0.5).clamp(0.05, 0.85);
        let mut rng = self.rng(date, None, STREAM_RAIN);
        let rain = if rng.gen::<f64>() < rain_probability {
            Gamma::<f64>::new(1.8, 2.4)
                .map(|gamma| gamma.sample(&mut rng))
                .unwrap_or(1.8 * 2.4)
                .max(0.0)
        } else {
            0.0
        };

        VariableValues::new()
            .with(Variable::Temperature, t2m)
            .with(Variable::TemperatureMax, t2m_max)
            .with(Variable::TemperatureMin, t2m_min)
            .with(Variable::WindSpeed, wind)
            .with(Variable::Precipitation, rain)
    }

    /// All variables at `key`. Hourly points modulate the day: temperature follows a
    /// diurnal cosine peaking mid-afternoon, precipitation is spread over 24 hours.
    pub fn values(&self, key: ObservationKey) -> VariableValues {
        let day = self.daily(key.date);
        let Some(hour) = key.hour else {
            return day;
        };

        let mut values = day;
        if let (Some(t2m), Some(max), Some(min)) = (
            day.get(Variable::Temperature),
            day.get(Variable::TemperatureMax),
            day.get(Variable::TemperatureMin),
        ) {
            let half_range = (max - min) / 2.0;
            let jitter = self.normal(key.date, Some(hour), STREAM_HOURLY, 0.0, 0.3);
            values.set(
                Variable::Temperature,
                Some(t2m + half_range * diurnal_cycle(hour) + jitter),
            );
        }
        if let Some(rain) = day.get(Variable::Precipitation) {
            values.set(Variable::Precipitation, Some(rain / 24.0));
        }
        values
    }

    /// One variable at one point.
    pub fn generate(&self, key: ObservationKey, variable: Variable) -> f64 {
        self.values(key).get(variable).unwrap_or(0.0)
    }

    /// Daily rows for every date in `[start, end]`.
    pub fn history(&self, start: NaiveDate, end: NaiveDate) -> Vec<RawRow> {
        start
            .iter_days()
            .take_while(|d| *d <= end)
            .map(|date| RawRow {
                key: ObservationKey::daily(date),
                values: self.daily(date),
            })
            .collect()
    }
}
