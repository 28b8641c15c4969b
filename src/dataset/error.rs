use crate::source::error::SourceError;
use polars::error::PolarsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Historical data unavailable: {returned} of {expected} expected rows carry values (minimum fraction {min_fraction})")]
    DataUnavailable {
        expected: usize,
        returned: usize,
        min_fraction: f64,
    },

    #[error("Dataset holds no observations")]
    Empty,

    #[error("Invalid history window: {0}")]
    InvalidWindow(String),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Required column '{0}' not found in DataFrame")]
    ColumnNotFound(String, #[source] PolarsError),

    #[error("Failed processing DataFrame: {0}")]
    DataFrameProcessing(#[from] PolarsError),

    #[error("Unexpected data in frame: {0}")]
    UnexpectedData(String),

    #[error("Background task failed to complete")]
    TaskJoin(#[from] tokio::task::JoinError),
}
