//! Looks up the weather for one point and date through NASA POWER.
//!
//! ```text
//! cargo run --example forecast_point -- -7.12 -34.88 20251004 [hour_start] [hour_end]
//! ```
//!
//! Pass `--offline` as the first argument to serve the request from a synthetic history
//! instead of the network.

use chrono::Duration;
use rain_forecast::{
    ForecastConfig, ForecastOrchestrator, ForecastRequest, InMemorySource,
    SyntheticClimatology,
};
use std::env;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args: Vec<String> = env::args().skip(1).collect();
    let offline = args.first().is_some_and(|a| a == "--offline");
    if offline {
        args.remove(0);
    }
    let arg = |i: usize, default: &str| args.get(i).cloned().unwrap_or_else(|| default.to_string());
    let hour = |i: usize| args.get(i).map(|h| h.parse::<u32>()).transpose();

    let request = ForecastRequest::from_query(
        arg(0, "-7.12").parse()?,
        arg(1, "-34.88").parse()?,
        &arg(2, "20251004"),
        None,
        hour(3)?,
        hour(4)?,
    )?;

    let config = ForecastConfig::default();
    let orchestrator = if offline {
        let available_end = request.start() - Duration::days(3);
        let history_start = available_end - Duration::days(366 * i64::from(config.years_back) + 30);
        let rows = SyntheticClimatology::new(request.location()).history(history_start, available_end);
        let source = InMemorySource::new()
            .with_rows(rows)
            .with_available_end(available_end);
        ForecastOrchestrator::new(Arc::new(source), config)?
    } else {
        ForecastOrchestrator::with_power(config)?
    };

    let result = orchestrator
        .run(&request, &CancellationToken::new())
        .await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
