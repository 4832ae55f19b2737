use std::fs::File;

use anyhow::{Context, Result};
use beta_neutral::assets::fetch_market_data;
use beta_neutral::market_data::period_bounds;
use beta_neutral::metrics::PerformanceSummary;
use beta_neutral::safe_money::{Cad, Dense, Usd};
use beta_neutral::simulation::records_to_dataframe;
use beta_neutral::{simulate_month, SimulationConfig};
use polars::prelude::*;
use time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Settings.toml".to_string());
    let config = SimulationConfig::load(&config_path)
        .with_context(|| format!("loading {config_path}"))?;

    config.validate()?;
    tracing_subscriber::fmt()
        .with_max_level(config.max_log_level()?)
        .init();

    let (start, end) = period_bounds(config.analysis_year, config.analysis_month)?;
    let history_start = start - Duration::days(config.beta_lookback_days);
    info!(%start, %end, %history_start, "analysis period");

    let start_time = std::time::Instant::now();
    let data = fetch_market_data(&config.all_tickers(), history_start, end).await?;
    info!(elapsed = ?start_time.elapsed(), days = data.len(), "market data ready");

    let result = simulate_month(&config, &data, None)?;
    let summary = PerformanceSummary::from_records(result.initial_value, &result.records);
    println!("Performance: {:#?}", summary);

    if let Some(last) = result.records.last() {
        let value = Dense::<Usd>::new(last.value_base);
        let converted: Dense<Cad> = value.convert(last.exchange_rate);
        println!("Final value: {} ({})", value, converted);
    }

    let last_day = data.len() - 1;
    let positions = result
        .final_portfolio
        .positions_to_dataframe(&data.prices_on(last_day), &result.betas)?;
    println!("Final positions: {}", positions);

    let mut records = records_to_dataframe(&result.records)?;
    let mut file = File::create(&config.output_path)
        .with_context(|| format!("creating {}", config.output_path))?;
    CsvWriter::new(&mut file).finish(&mut records)?;
    info!(path = %config.output_path, rows = records.height(), "wrote daily records");

    Ok(())
}
