use std::collections::HashSet;
use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use tracing::Level;

use crate::error::{Result, SimulationError};

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// How share counts produced by an allocation are rounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LotPolicy {
    #[default]
    Fractional,
    /// Round every share count to the nearest whole share.
    WholeShares,
}

/// What the simulation does when a rebalance cannot restore the tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfeasiblePolicy {
    /// Keep the current book for the day and flag the record.
    #[default]
    Skip,
    Abort,
}

/// Intra-leg weighting used when a rebalance resizes the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalanceWeighting {
    /// Keep each leg's current exposure mix and only resize the legs.
    #[default]
    Proportional,
    /// Weight each instrument by 1 / beta inside its leg.
    InverseBeta,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub initial_capital: f64,
    pub long_tickers: Vec<String>,
    pub short_tickers: Vec<String>,
    pub market_index: String,
    pub target_beta: f64,
    pub beta_tolerance: f64,
    pub management_fee_annual: f64,
    pub transaction_fee_per_share: f64,
    pub analysis_year: i32,
    pub analysis_month: u8,
    /// Calendar days of history before the period used to estimate betas.
    pub beta_lookback_days: i64,
    /// Base to secondary currency rate used when no rate series is supplied.
    pub exchange_rate: f64,
    pub lot_policy: LotPolicy,
    pub on_infeasible: InfeasiblePolicy,
    pub weighting: RebalanceWeighting,
    pub output_path: String,
    pub log_level: String,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            initial_capital: 10_000_000.0,
            long_tickers: tickers(&["AAPL", "MSFT", "AMZN", "JNJ", "WMT"]),
            short_tickers: tickers(&["TSLA", "META", "SHOP", "NVDA", "BA"]),
            market_index: "^GSPC".to_string(),
            target_beta: 0.0,
            beta_tolerance: 0.05,
            management_fee_annual: 0.02,
            transaction_fee_per_share: 0.01,
            analysis_year: 2025,
            analysis_month: 1,
            beta_lookback_days: 365,
            exchange_rate: 1.35,
            lot_policy: LotPolicy::Fractional,
            on_infeasible: InfeasiblePolicy::Skip,
            weighting: RebalanceWeighting::Proportional,
            output_path: "daily_records.csv".to_string(),
            log_level: "info".to_string(),
        }
    }
}

fn tickers(list: &[&str]) -> Vec<String> {
    list.iter().map(|t| t.to_string()).collect()
}

impl SimulationConfig {
    /// Layer the optional settings file under `NEUTRAL_*` environment variables.
    pub fn load(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(
                Environment::with_prefix("NEUTRAL")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("long_tickers")
                    .with_list_parse_key("short_tickers"),
            );

        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.initial_capital > 0.0) {
            return Err(SimulationError::invalid_config(format!(
                "initial capital must be positive, got {}",
                self.initial_capital
            )));
        }
        if self.long_tickers.is_empty() || self.short_tickers.is_empty() {
            return Err(SimulationError::invalid_config(format!(
                "both legs need tickers, got {} long and {} short",
                self.long_tickers.len(),
                self.short_tickers.len()
            )));
        }

        let mut seen = HashSet::new();
        for ticker in self.long_tickers.iter().chain(&self.short_tickers) {
            if !seen.insert(ticker.as_str()) {
                return Err(SimulationError::invalid_config(format!(
                    "ticker {ticker} is listed more than once"
                )));
            }
        }
        if seen.contains(self.market_index.as_str()) {
            return Err(SimulationError::invalid_config(format!(
                "market index {} cannot also be a position",
                self.market_index
            )));
        }

        if !(self.beta_tolerance > 0.0) {
            return Err(SimulationError::invalid_config(format!(
                "beta tolerance must be positive, got {}",
                self.beta_tolerance
            )));
        }
        if !self.target_beta.is_finite() {
            return Err(SimulationError::invalid_config(format!(
                "target beta must be finite, got {}",
                self.target_beta
            )));
        }
        if !(self.management_fee_annual >= 0.0) {
            return Err(SimulationError::invalid_config(format!(
                "management fee must be non-negative, got {}",
                self.management_fee_annual
            )));
        }
        if !(self.transaction_fee_per_share >= 0.0) {
            return Err(SimulationError::invalid_config(format!(
                "transaction fee must be non-negative, got {}",
                self.transaction_fee_per_share
            )));
        }
        if !(1..=12).contains(&self.analysis_month) {
            return Err(SimulationError::invalid_config(format!(
                "analysis month must be between 1 and 12, got {}",
                self.analysis_month
            )));
        }
        if self.beta_lookback_days < 2 {
            return Err(SimulationError::invalid_config(format!(
                "beta lookback must cover at least 2 days, got {}",
                self.beta_lookback_days
            )));
        }
        if !(self.exchange_rate > 0.0) {
            return Err(SimulationError::invalid_config(format!(
                "exchange rate must be positive, got {}",
                self.exchange_rate
            )));
        }
        self.max_log_level()?;
        Ok(())
    }

    /// The configured `log_level` as a tracing level.
    pub fn max_log_level(&self) -> Result<Level> {
        self.log_level.parse().map_err(|_| {
            SimulationError::invalid_config(format!(
                "log level must be one of trace, debug, info, warn, error, got {:?}",
                self.log_level
            ))
        })
    }

    /// Management fee charged per trading day, as a fraction of value.
    pub fn daily_fee_rate(&self) -> f64 {
        self.management_fee_annual / TRADING_DAYS_PER_YEAR
    }

    /// Every ticker the run needs prices for, market index last.
    pub fn all_tickers(&self) -> Vec<String> {
        let mut all: Vec<String> = self
            .long_tickers
            .iter()
            .chain(&self.short_tickers)
            .cloned()
            .collect();
        all.push(self.market_index.clone());
        all
    }
}
