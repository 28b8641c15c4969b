mod cache;
mod config;
mod dataset;
mod error;
mod features;
mod models;
mod orchestrator;
mod selector;
mod source;
mod synthetic;
mod trainer;
mod types;
mod utils;

pub use cache::{CacheError, HistoryCache};
pub use config::*;
pub use error::ForecastError;
pub use orchestrator::ForecastOrchestrator;

pub use dataset::error::DatasetError;
pub use dataset::historical::HistoricalDataset;
pub use dataset::series::VariableSeries;

pub use features::{FeatureBuilder, FeatureError, FeatureVector};
pub use models::{CandidateModel, FittedModel, ModelFamily, ValidationScore};
pub use selector::{accuracy_from_rmse, ModelSelector, Selection};
pub use synthetic::SyntheticClimatology;
pub use trainer::{ModelTrainer, TemporalSplit, TrainingError, TrainingOutcome};

pub use source::error::SourceError;
pub use source::memory::InMemorySource;
pub use source::observation_source::*;
pub use source::power_client::{parse_power_payload, PowerClient};

pub use types::location::Location;
pub use types::observation::*;
pub use types::prediction::*;
pub use types::request::ForecastRequest;
pub use types::variable::Variable;
