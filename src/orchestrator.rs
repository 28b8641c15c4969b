//! The forecast entry point.
//!
//! A request is first answered from real observations. Points the provider cannot serve
//! yet are forecast by models trained on the location's own history, and when even the
//! history is out of reach the values come from [`SyntheticClimatology`].

use crate::cache::HistoryCache;
use crate::config::ForecastConfig;
use crate::dataset::error::DatasetError;
use crate::dataset::historical::HistoricalDataset;
use crate::error::ForecastError;
use crate::models::ModelFamily;
use crate::selector::{roll_forward, ModelSelector};
use crate::source::observation_source::{ObservationSource, SourceMeta, SourceQuery};
use crate::source::power_client::PowerClient;
use crate::synthetic::{diurnal_cycle, SyntheticClimatology};
use crate::trainer::{ModelTrainer, TrainingError};
use crate::types::location::Location;
use crate::types::observation::{ObservationKey, VariableValues};
use crate::types::prediction::{
    AiPrediction, AiPredictionInput, ChosenModel, DataSource, FamilyMetrics, ForecastMeta,
    ForecastResult, ForecastStage, Granularity, PredictionRecord,
};
use crate::types::request::ForecastRequest;
use crate::types::variable::Variable;
use bon::bon;
use chrono::NaiveDate;
use futures_util::future::join_all;
use futures_util::{stream, StreamExt};
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task;
use tokio_util::sync::CancellationToken;

/// Model forecast of one variable over the requested dates.
#[derive(Debug, Clone)]
struct VariableForecast {
    daily: BTreeMap<NaiveDate, f64>,
    chosen: ChosenModel,
    accuracy_pct: f64,
    metrics: BTreeMap<ModelFamily, FamilyMetrics>,
    predictions: BTreeMap<ModelFamily, f64>,
}

/// Everything the forecast path produced for one request.
#[derive(Debug, Clone)]
struct Ensemble {
    dates: Vec<NaiveDate>,
    forecasts: BTreeMap<Variable, VariableForecast>,
    fallbacks: BTreeMap<Variable, String>,
    half_amplitude: f64,
}

impl Ensemble {
    /// Forecast value and accuracy for one point, if a model covers it.
    fn value_at(&self, key: ObservationKey, variable: Variable) -> Option<(f64, f64)> {
        let forecast = self.forecasts.get(&variable)?;
        let daily = *forecast.daily.get(&key.date)?;
        let value = match key.hour {
            None => daily,
            Some(hour) => hourly_value(variable, daily, hour, self.half_amplitude),
        };
        Some((variable.clamp(value), forecast.accuracy_pct))
    }
}

/// Serves [`ForecastRequest`]s from an [`ObservationSource`].
///
/// The orchestrator holds no per-request state and can serve many requests at once.
///
/// # Example
///
/// ```no_run
/// # use rain_forecast::{ForecastConfig, ForecastError, ForecastOrchestrator, Location};
/// # use chrono::NaiveDate;
/// # #[tokio::main]
/// # async fn main() -> Result<(), ForecastError> {
/// let orchestrator = ForecastOrchestrator::with_power(ForecastConfig::default())?;
/// let result = orchestrator
///     .forecast(Location::new(-7.12, -34.88)?)
///     .start(NaiveDate::from_ymd_opt(2025, 10, 4).unwrap())
///     .call()
///     .await?;
/// println!("{}", serde_json::to_string_pretty(&result).unwrap());
/// # Ok(())
/// # }
/// ```
pub struct ForecastOrchestrator {
    source: Arc<dyn ObservationSource>,
    cache: Option<HistoryCache>,
    trainer: ModelTrainer,
    config: ForecastConfig,
}

#[bon]
impl ForecastOrchestrator {
    /// Creates an orchestrator over any observation source. A history cache is used when
    /// `config.cache_folder` is set.
    ///
    /// # Errors
    ///
    /// [`ForecastError::Config`] when `config` fails [`ForecastConfig::validate`].
    pub fn new(
        source: Arc<dyn ObservationSource>,
        config: ForecastConfig,
    ) -> Result<Self, ForecastError> {
        config.validate()?;
        let cache = config.cache_folder.clone().map(HistoryCache::new);
        let trainer = ModelTrainer::new(config.trainer.clone(), config.features.clone());
        Ok(Self {
            source,
            cache,
            trainer,
            config,
        })
    }

    /// Creates an orchestrator backed by the NASA POWER API.
    pub fn with_power(config: ForecastConfig) -> Result<Self, ForecastError> {
        let client = PowerClient::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Self::new(Arc::new(client), config)
    }

    /// Replaces the history cache.
    pub fn with_cache(mut self, cache: HistoryCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    /// Builds a request for `location` and serves it.
    ///
    /// # Arguments (builder)
    ///
    /// * `.start(NaiveDate)` - First date, required.
    /// * `.end(NaiveDate)` - Last date, defaults to `start`.
    /// * `.hour_start(u32)` / `.hour_end(u32)` - Hour interval for an hourly request.
    /// * `.cancel(CancellationToken)` - Cooperative cancellation.
    ///
    /// # Errors
    ///
    /// [`ForecastError::InvalidRequest`] for an inconsistent date or hour range and
    /// [`ForecastError::Cancelled`] when the token fires. Every other problem degrades
    /// to forecast or synthetic values instead of failing.
    #[builder(start_fn = forecast)]
    #[doc(hidden)]
    pub async fn build_forecast(
        &self,
        #[builder(start_fn)] location: Location,
        start: NaiveDate,
        end: Option<NaiveDate>,
        hour_start: Option<u32>,
        hour_end: Option<u32>,
        cancel: Option<CancellationToken>,
    ) -> Result<ForecastResult, ForecastError> {
        let request = ForecastRequest::builder()
            .location(location)
            .start(start)
            .maybe_end(end)
            .maybe_hour_start(hour_start)
            .maybe_hour_end(hour_end)
            .build()?;
        self.run(&request, &cancel.unwrap_or_default()).await
    }
}

impl ForecastOrchestrator {
    /// Serves several requests concurrently. Results come back in request order.
    pub async fn forecast_batch(
        &self,
        requests: &[ForecastRequest],
        cancel: &CancellationToken,
    ) -> Vec<Result<ForecastResult, ForecastError>> {
        join_all(requests.iter().map(|request| self.run(request, cancel))).await
    }

    /// Serves one request.
    ///
    /// Points whose required variables are all observed are returned as `POWER`. Rows
    /// dated after the provider's `available_end` are not trusted and count as missing.
    /// Every missing (point, variable) is forecast, or generated synthetically when no
    /// model is available for that variable.
    pub async fn run(
        &self,
        request: &ForecastRequest,
        cancel: &CancellationToken,
    ) -> Result<ForecastResult, ForecastError> {
        let started = Instant::now();
        let location = request.location();
        let granularity = request.granularity();
        let required = granularity.required_variables();
        let points = request.points();

        let mut trace = vec![ForecastStage::CheckRealData];
        if cancel.is_cancelled() {
            return Err(ForecastError::Cancelled);
        }

        let query = SourceQuery {
            location,
            start: request.start(),
            end: request.end(),
            granularity,
            hours: request.hours(),
        };
        let (source_meta, real) = match self.source.fetch(&query).await {
            Ok(observations) => {
                let available_end = observations.meta.available_end;
                let real: BTreeMap<ObservationKey, VariableValues> = observations
                    .records()
                    .into_iter()
                    .filter(|record| query.covers(&record.key))
                    .filter(|record| available_end.map_or(true, |end| record.date() <= end))
                    .map(|record| (record.key, *record.values()))
                    .collect();
                (Some(observations.meta), real)
            }
            Err(e) => {
                warn!("Real data check for {} failed, treating as no data: {}", location, e);
                (None, BTreeMap::new())
            }
        };

        let missing: BTreeMap<ObservationKey, Vec<Variable>> = points
            .iter()
            .filter_map(|key| {
                let observed = real.get(key).copied().unwrap_or_default();
                if observed.has_all(required) {
                    return None;
                }
                let absent: Vec<Variable> = required
                    .iter()
                    .copied()
                    .filter(|v| observed.get(*v).is_none())
                    .collect();
                Some((*key, absent))
            })
            .collect();

        let ensemble = if missing.is_empty() {
            trace.push(ForecastStage::RealDataSufficient);
            None
        } else {
            trace.push(ForecastStage::NeedsForecast);
            info!(
                "{} of {} {} points for {} need a forecast",
                missing.len(),
                points.len(),
                granularity,
                location
            );
            let available_end = source_meta.as_ref().and_then(|m| m.available_end);
            Some(
                self.forecast_missing(
                    location,
                    granularity,
                    &missing,
                    &real,
                    available_end,
                    cancel,
                    &mut trace,
                )
                .await?,
            )
        };

        trace.push(ForecastStage::AssembleResult);
        let records = assemble(location, &points, required, &real, ensemble.as_ref());
        let (data, series) = match granularity {
            Granularity::Hourly if records.len() > 1 => {
                let aggregate = PredictionRecord::aggregate(&records);
                (aggregate.into_iter().collect(), Some(records))
            }
            _ => (records, None),
        };

        let ai_prediction = ensemble.map(|ensemble| AiPrediction {
            execution_time: round2(started.elapsed().as_secs_f64()),
            input: AiPredictionInput {
                latitude: location.latitude(),
                longitude: location.longitude(),
                dates: ensemble.dates,
                years_back: self.config.years_back,
            },
            chosen: ensemble
                .forecasts
                .iter()
                .map(|(variable, f)| (*variable, f.chosen))
                .collect(),
            metrics: ensemble
                .forecasts
                .iter()
                .map(|(variable, f)| (*variable, f.metrics.clone()))
                .collect(),
            predictions: ensemble
                .forecasts
                .iter()
                .map(|(variable, f)| (*variable, f.predictions.clone()))
                .collect(),
            fallbacks: ensemble.fallbacks,
        });

        Ok(ForecastResult {
            meta: result_meta(source_meta.as_ref(), required),
            granularity,
            data,
            series,
            ai_prediction,
            trace,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn forecast_missing(
        &self,
        location: Location,
        granularity: Granularity,
        missing: &BTreeMap<ObservationKey, Vec<Variable>>,
        real: &BTreeMap<ObservationKey, VariableValues>,
        available_end: Option<NaiveDate>,
        cancel: &CancellationToken,
        trace: &mut Vec<ForecastStage>,
    ) -> Result<Ensemble, ForecastError> {
        let dates: Vec<NaiveDate> = missing
            .keys()
            .map(|key| key.date)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let variables: BTreeSet<Variable> = missing.values().flatten().copied().collect();
        let Some(first) = dates.first().copied() else {
            return Err(ForecastError::InvalidRequest(
                "forecast requested without any dates".to_string(),
            ));
        };
        let day_before = first.pred_opt().unwrap_or(first);
        let history_end = available_end.map_or(day_before, |end| end.min(day_before));

        let dataset = match self.load_history(location, history_end).await {
            Ok(dataset) => {
                trace.push(ForecastStage::HistoricalLoadOk);
                dataset
            }
            Err(e) => {
                warn!(
                    "History for {} up to {} unavailable, using synthetic values: {}",
                    location, history_end, e
                );
                trace.push(ForecastStage::HistoricalLoadFailed);
                trace.push(ForecastStage::SyntheticFallback);
                let reason = format!("historical data unavailable: {e}");
                return Ok(Ensemble {
                    dates,
                    forecasts: BTreeMap::new(),
                    fallbacks: variables.iter().map(|v| (*v, reason.clone())).collect(),
                    half_amplitude: self.config.default_half_amplitude,
                });
            }
        };

        trace.push(ForecastStage::RunEnsemble);
        let half_amplitude = dataset
            .recent_half_range(self.config.diurnal_window_days)
            .unwrap_or(self.config.default_half_amplitude);
        let dataset = Arc::new(dataset);

        let outcomes: Vec<Result<(Variable, Result<VariableForecast, TrainingError>), ForecastError>> =
            stream::iter(variables.iter().copied())
                .map(|variable| {
                    let dataset = Arc::clone(&dataset);
                    let trainer = self.trainer.clone();
                    let targets: Vec<ObservationKey> = missing
                        .iter()
                        .filter(|(_, absent)| absent.contains(&variable))
                        .map(|(key, _)| key.date)
                        .collect::<BTreeSet<_>>()
                        .into_iter()
                        .map(ObservationKey::daily)
                        .collect();
                    let known = known_daily_values(granularity, real, variable, history_end);
                    let cancel = cancel.clone();
                    async move {
                        if cancel.is_cancelled() {
                            return Err(ForecastError::Cancelled);
                        }
                        let result = task::spawn_blocking(move || {
                            forecast_variable(&trainer, &dataset, variable, &targets, &known)
                        })
                        .await?;
                        Ok((variable, result))
                    }
                })
                .buffered(self.config.training_parallelism)
                .collect()
                .await;

        if cancel.is_cancelled() {
            return Err(ForecastError::Cancelled);
        }

        let mut forecasts = BTreeMap::new();
        let mut fallbacks = BTreeMap::new();
        for outcome in outcomes {
            let (variable, result) = outcome?;
            match result {
                Ok(forecast) => {
                    debug!(
                        "{} forecast by {} ({:.1}% accuracy)",
                        variable, forecast.chosen.best_model, forecast.accuracy_pct
                    );
                    forecasts.insert(variable, forecast);
                }
                Err(e) => {
                    warn!("{} falls back to synthetic values: {}", variable, e);
                    fallbacks.insert(variable, e.to_string());
                }
            }
        }

        Ok(Ensemble {
            dates,
            forecasts,
            fallbacks,
            half_amplitude,
        })
    }

    /// Daily history ending at `end`, from the cache when possible. Cache problems are
    /// logged and otherwise ignored.
    async fn load_history(
        &self,
        location: Location,
        end: NaiveDate,
    ) -> Result<HistoricalDataset, DatasetError> {
        let years_back = self.config.years_back;
        if let Some(cache) = &self.cache {
            match cache.load(location, end, years_back).await {
                Ok(Some(dataset)) => return Ok(dataset),
                Ok(None) => {}
                Err(e) => warn!("Ignoring unreadable history cache: {}", e),
            }
        }

        let dataset = HistoricalDataset::load()
            .source(Arc::clone(&self.source))
            .location(location)
            .end(end)
            .years_back(years_back)
            .min_row_fraction(self.config.min_row_fraction)
            .call()
            .await?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.store(&dataset, end, years_back).await {
                warn!("Failed to cache history for {}: {}", location, e);
            }
        }
        Ok(dataset)
    }
}

/// Trains, selects and rolls forward one variable. Runs on the blocking pool.
fn forecast_variable(
    trainer: &ModelTrainer,
    dataset: &HistoricalDataset,
    variable: Variable,
    targets: &[ObservationKey],
    known: &BTreeMap<ObservationKey, f64>,
) -> Result<VariableForecast, TrainingError> {
    let outcome = trainer.train(dataset, variable)?;
    let selections =
        ModelSelector::select(variable, &outcome.candidates, &outcome.series, targets, known)?
            .ok_or_else(|| TrainingError::NoUsableModel {
                variable,
                reasons: "no candidate survived validation".to_string(),
            })?;
    let Some(first) = selections.first() else {
        return Err(TrainingError::NoUsableModel {
            variable,
            reasons: "nothing to forecast".to_string(),
        });
    };

    let mut predictions = BTreeMap::new();
    for (family, candidate) in &outcome.candidates {
        let values = roll_forward(candidate.model.as_ref(), &outcome.series, &targets[..1], known)?;
        if let Some(value) = values.first() {
            predictions.insert(*family, *value);
        }
    }

    Ok(VariableForecast {
        daily: targets
            .iter()
            .zip(&selections)
            .map(|(key, selection)| (key.date, selection.value))
            .collect(),
        chosen: ChosenModel {
            best_model: first.family,
            value: first.value,
            metrics: first.score.to_metrics(),
        },
        accuracy_pct: first.accuracy_pct,
        metrics: outcome
            .candidates
            .iter()
            .map(|(family, c)| (*family, c.score.to_metrics()))
            .collect(),
        predictions,
    })
}

/// Real daily observations after the history window, fed back while rolling forward.
fn known_daily_values(
    granularity: Granularity,
    real: &BTreeMap<ObservationKey, VariableValues>,
    variable: Variable,
    history_end: NaiveDate,
) -> BTreeMap<ObservationKey, f64> {
    if granularity != Granularity::Daily {
        return BTreeMap::new();
    }
    real.iter()
        .filter(|(key, _)| key.date > history_end)
        .filter_map(|(key, values)| Some((*key, values.get(variable)?)))
        .collect()
}

/// Hourly value derived from a daily forecast.
fn hourly_value(variable: Variable, daily: f64, hour: u32, half_amplitude: f64) -> f64 {
    match variable {
        Variable::Temperature => daily + half_amplitude * diurnal_cycle(hour),
        Variable::Precipitation => daily / 24.0,
        _ => daily,
    }
}

/// Merges real, forecast and synthetic values into one record per point.
fn assemble(
    location: Location,
    points: &[ObservationKey],
    required: &[Variable],
    real: &BTreeMap<ObservationKey, VariableValues>,
    ensemble: Option<&Ensemble>,
) -> Vec<PredictionRecord> {
    let synthetic = SyntheticClimatology::new(location);
    points
        .iter()
        .map(|key| {
            let observed = real.get(key).copied().unwrap_or_default();
            let mut values = VariableValues::new();
            let mut sources = BTreeMap::new();
            let mut accuracy = BTreeMap::new();
            for &variable in required {
                if let Some(value) = observed.get(variable) {
                    values.set(variable, Some(value));
                    sources.insert(variable, DataSource::Power);
                    continue;
                }
                match ensemble.and_then(|e| e.value_at(*key, variable)) {
                    Some((value, pct)) => {
                        values.set(variable, Some(value));
                        sources.insert(variable, DataSource::AiPrediction);
                        accuracy.insert(variable, pct);
                    }
                    None => {
                        values.set(variable, Some(synthetic.generate(*key, variable)));
                        sources.insert(variable, DataSource::Synthetic);
                        accuracy.insert(variable, 0.0);
                    }
                }
            }
            PredictionRecord::new(*key, values, sources, (!accuracy.is_empty()).then_some(accuracy))
        })
        .collect()
}

fn result_meta(source_meta: Option<&SourceMeta>, required: &[Variable]) -> ForecastMeta {
    let mut meta = source_meta
        .map(SourceMeta::to_forecast_meta)
        .unwrap_or_else(|| ForecastMeta {
            service: Some("rain_forecast".to_string()),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
            time_standard: Some("LST".to_string()),
            ..Default::default()
        });
    if meta.units.is_empty() {
        for variable in required {
            meta.units
                .insert(variable.api_key().to_string(), Some(variable.unit().to_string()));
        }
    }
    meta
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
