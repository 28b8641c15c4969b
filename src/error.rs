use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::dataset::error::DatasetError;
use crate::features::FeatureError;
use crate::source::error::SourceError;
use crate::trainer::TrainingError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("Invalid location ({latitude}, {longitude}): latitude must be within [-90, 90] and longitude within [-180, 180]")]
    LocationInvalid { latitude: f64, longitude: f64 },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Forecast request was cancelled")]
    Cancelled,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Training(#[from] TrainingError),

    #[error(transparent)]
    Feature(#[from] FeatureError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Background task failed to complete")]
    TaskJoin(#[from] tokio::task::JoinError),
}
