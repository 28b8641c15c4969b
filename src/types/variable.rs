//! The weather variables tracked by the engine, keyed the way NASA POWER names them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A tracked weather variable.
///
/// Serialized with the NASA POWER parameter names (`T2M`, `PRECTOTCORR`, ...), which are
/// also the keys of the `accuracy` map in prediction records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Variable {
    /// Mean air temperature at 2 m (°C).
    #[serde(rename = "T2M")]
    Temperature,
    /// Daily maximum temperature at 2 m (°C).
    #[serde(rename = "T2M_MAX")]
    TemperatureMax,
    /// Daily minimum temperature at 2 m (°C).
    #[serde(rename = "T2M_MIN")]
    TemperatureMin,
    /// Wind speed at 10 m (m/s).
    #[serde(rename = "WS10M")]
    WindSpeed,
    /// Bias-corrected precipitation (mm).
    #[serde(rename = "PRECTOTCORR")]
    Precipitation,
}

impl Variable {
    pub const COUNT: usize = 5;

    pub const ALL: [Variable; Variable::COUNT] = [
        Variable::Temperature,
        Variable::TemperatureMax,
        Variable::TemperatureMin,
        Variable::WindSpeed,
        Variable::Precipitation,
    ];

    /// Variables NASA POWER publishes at hourly resolution.
    pub const HOURLY: [Variable; 3] = [
        Variable::Temperature,
        Variable::WindSpeed,
        Variable::Precipitation,
    ];

    /// Position in [`Variable::ALL`], used to index per-variable arrays.
    pub fn index(self) -> usize {
        match self {
            Variable::Temperature => 0,
            Variable::TemperatureMax => 1,
            Variable::TemperatureMin => 2,
            Variable::WindSpeed => 3,
            Variable::Precipitation => 4,
        }
    }

    pub fn api_key(self) -> &'static str {
        match self {
            Variable::Temperature => "T2M",
            Variable::TemperatureMax => "T2M_MAX",
            Variable::TemperatureMin => "T2M_MIN",
            Variable::WindSpeed => "WS10M",
            Variable::Precipitation => "PRECTOTCORR",
        }
    }

    /// Resolves a POWER parameter name. The uncorrected `PRECTOT` maps to precipitation
    /// as well; callers prefer `PRECTOTCORR` when both are present.
    pub fn from_api_key(key: &str) -> Option<Variable> {
        match key {
            "T2M" => Some(Variable::Temperature),
            "T2M_MAX" => Some(Variable::TemperatureMax),
            "T2M_MIN" => Some(Variable::TemperatureMin),
            "WS10M" => Some(Variable::WindSpeed),
            "PRECTOTCORR" | "PRECTOT" => Some(Variable::Precipitation),
            _ => None,
        }
    }

    /// Column name in the dataset frame.
    pub(crate) fn column_name(self) -> &'static str {
        match self {
            Variable::Temperature => "t2m",
            Variable::TemperatureMax => "t2m_max",
            Variable::TemperatureMin => "t2m_min",
            Variable::WindSpeed => "ws10m",
            Variable::Precipitation => "precip_mm",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Variable::Temperature | Variable::TemperatureMax | Variable::TemperatureMin => "C",
            Variable::WindSpeed => "m/s",
            Variable::Precipitation => "mm",
        }
    }

    /// Error tolerance the RMSE-to-accuracy heuristic is scaled against.
    pub fn default_tolerance(self) -> f64 {
        match self {
            Variable::Temperature => 1.0,
            Variable::TemperatureMax | Variable::TemperatureMin => 1.5,
            Variable::WindSpeed => 1.5,
            Variable::Precipitation => 3.0,
        }
    }

    /// Precipitation is scored as rain / no-rain occurrence (F1) rather than by RMSE.
    pub fn is_occurrence(self) -> bool {
        matches!(self, Variable::Precipitation)
    }

    /// Clamps a modelled value to the physically meaningful range.
    pub fn clamp(self, value: f64) -> f64 {
        match self {
            Variable::WindSpeed | Variable::Precipitation => value.max(0.0),
            _ => value,
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_key())
    }
}
