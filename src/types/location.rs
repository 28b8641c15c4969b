//! Geographic point the forecast is computed for.

use crate::error::ForecastError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A validated latitude/longitude pair in decimal degrees.
///
/// Latitude must lie in `[-90, 90]` and longitude in `[-180, 180]`. The fields are
/// private so an invalid `Location` cannot be constructed.
///
/// # Examples
///
/// ```
/// use rain_forecast::Location;
///
/// let joao_pessoa = Location::new(-7.12, -34.88).unwrap();
/// assert_eq!(joao_pessoa.latitude(), -7.12);
/// assert!(Location::new(91.0, 0.0).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawLocation", into = "RawLocation")]
pub struct Location {
    latitude: f64,
    longitude: f64,
}

#[derive(Serialize, Deserialize)]
struct RawLocation {
    latitude: f64,
    longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ForecastError> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        if !valid {
            return Err(ForecastError::LocationInvalid {
                latitude,
                longitude,
            });
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Fixed-precision text form (three decimals, roughly 100 m). Used for cache file
    /// names and as the synthetic generator's hash input, so it must never change.
    pub fn rounded_key(&self) -> String {
        format!("{:.3},{:.3}", self.latitude, self.longitude)
    }
}

impl TryFrom<RawLocation> for Location {
    type Error = ForecastError;

    fn try_from(raw: RawLocation) -> Result<Self, Self::Error> {
        Location::new(raw.latitude, raw.longitude)
    }
}

impl From<Location> for RawLocation {
    fn from(location: Location) -> Self {
        RawLocation {
            latitude: location.latitude,
            longitude: location.longitude,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.4}, {:.4})", self.latitude, self.longitude)
    }
}
