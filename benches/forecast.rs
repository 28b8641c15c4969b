use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rain_forecast::{
    FeatureSpec, ForecastConfig, ForecastOrchestrator, ForecastRequest, InMemorySource, Location,
    SyntheticClimatology, TrainerConfig,
};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

fn bench_forecast(c: &mut Criterion) {
    let location = Location::new(-7.12, -34.88).unwrap();
    let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
    let end = NaiveDate::from_ymd_opt(2025, 10, 1).unwrap();
    let synthetic = SyntheticClimatology::new(location);

    c.bench_function("synthetic_history_3y", |b| {
        b.iter(|| synthetic.history(black_box(start), black_box(end)))
    });

    let source = InMemorySource::new()
        .with_rows(synthetic.history(start, end))
        .with_available_end(end);
    let config = ForecastConfig::builder()
        .years_back(2)
        .features(FeatureSpec::builder().lags(vec![1, 2, 3, 7, 14]).build())
        .trainer(TrainerConfig::default())
        .build();
    let orchestrator = ForecastOrchestrator::new(Arc::new(source), config).unwrap();
    let request =
        ForecastRequest::from_query(-7.12, -34.88, "20251004", None, None, None).unwrap();
    let runtime = Runtime::new().unwrap();

    c.bench_function("forecast_unpublished_day", |b| {
        b.to_async(&runtime).iter(|| async {
            orchestrator
                .run(black_box(&request), &CancellationToken::new())
                .await
                .unwrap()
        })
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = bench_forecast
}
criterion_main!(benches);
