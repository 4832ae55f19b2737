//! Day-by-day simulation of the beta-neutral book over one analysis month.
//!
//! Positions are opened at the close of the inception day (the last trading
//! day before the period). Every trading day of the period then:
//! reads prices, values the book, measures the return against the previous
//! post-fee value, checks beta drift, rebalances when drifted, charges the
//! daily management fee and converts the closing value to the secondary
//! currency. Days are processed strictly in order.

use std::collections::{BTreeMap, HashMap};

use polars::prelude::*;
use time::Date;
use tracing::{debug, info, warn};

use crate::beta::estimate_betas;
use crate::config::{InfeasiblePolicy, SimulationConfig};
use crate::error::{Result, SimulationError};
use crate::market_data::{period_bounds, ExchangeRates, MarketData};
use crate::portfolio::{Portfolio, PortfolioBuilder};
use crate::rebalance::{BetaState, Rebalancer};
use crate::safe_money::{Cad, Dense, Usd};

/// One simulated trading day. Appended once, never modified.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyRecord {
    pub date: Date,
    /// Closing net asset value after fees, in the base currency.
    pub value_base: f64,
    pub value_secondary: f64,
    pub exchange_rate: f64,
    /// Pre-fee value over the previous day's post-fee value, minus one.
    pub daily_return: f64,
    /// Aggregate beta observed before the rebalance decision.
    pub pre_rebalance_beta: f64,
    /// Aggregate beta of the book held at the close.
    pub portfolio_beta: f64,
    pub gross_exposure: f64,
    pub net_exposure: f64,
    pub rebalanced: bool,
    /// Drift was detected but no allocation could restore the tolerance.
    pub rebalance_skipped: bool,
    pub management_fee: f64,
    pub transaction_cost: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationResult {
    pub records: Vec<DailyRecord>,
    pub initial_value: f64,
    pub final_portfolio: Portfolio,
    pub betas: BTreeMap<String, f64>,
}

pub struct Simulation<'a> {
    config: &'a SimulationConfig,
    rebalancer: Rebalancer,
}

impl<'a> Simulation<'a> {
    pub fn new(config: &'a SimulationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            rebalancer: Rebalancer::from_config(config),
        })
    }

    /// Run over every date of `period`, opening positions at `inception_prices`.
    pub fn run(
        &self,
        inception_prices: &HashMap<String, f64>,
        period: &MarketData,
        rates: &ExchangeRates,
        betas: &BTreeMap<String, f64>,
    ) -> Result<SimulationResult> {
        let mut portfolio = PortfolioBuilder::from_config(self.config).build(inception_prices)?;
        let initial_value = portfolio.value(inception_prices)?;
        info!(
            initial_value,
            days = period.len(),
            positions = portfolio.positions().count(),
            "starting simulation"
        );

        let daily_fee_rate = self.config.daily_fee_rate();
        let mut previous_value = initial_value;
        let mut records = Vec::with_capacity(period.len());

        for (day, date) in period.dates().iter().copied().enumerate() {
            let prices = period.prices_on(day);
            let (record, next) = self
                .step(date, &prices, portfolio, previous_value, daily_fee_rate, rates, betas)
                .map_err(|e| e.on_date(date))?;
            debug!(
                %date,
                value = record.value_base,
                beta = record.portfolio_beta,
                rebalanced = record.rebalanced,
                "simulated day"
            );
            previous_value = record.value_base;
            portfolio = next;
            records.push(record);
        }

        info!(
            final_value = previous_value,
            rebalances = records.iter().filter(|r| r.rebalanced).count(),
            management_fees = portfolio.management_fees_paid(),
            transaction_costs = portfolio.transaction_costs_paid(),
            "simulation finished"
        );

        Ok(SimulationResult {
            records,
            initial_value,
            final_portfolio: portfolio,
            betas: betas.clone(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn step(
        &self,
        date: Date,
        prices: &HashMap<String, f64>,
        portfolio: Portfolio,
        previous_value: f64,
        daily_fee_rate: f64,
        rates: &ExchangeRates,
        betas: &BTreeMap<String, f64>,
    ) -> Result<(DailyRecord, Portfolio)> {
        let mut portfolio = portfolio;

        let opening_value = portfolio.value(prices)?;
        let daily_return = opening_value / previous_value - 1.0;
        let pre_rebalance_beta = portfolio.beta(prices, betas)?;

        let mut rebalanced = false;
        let mut rebalance_skipped = false;
        let mut transaction_cost = 0.0;
        if self.rebalancer.state(pre_rebalance_beta) == BetaState::Drifted {
            match self.rebalancer.rebalance(&portfolio, prices, betas) {
                Ok(outcome) => {
                    portfolio = outcome.portfolio;
                    transaction_cost = outcome.transaction_cost;
                    rebalanced = true;
                }
                Err(err @ SimulationError::RebalanceInfeasible { .. })
                    if self.config.on_infeasible == InfeasiblePolicy::Skip =>
                {
                    warn!(%date, error = %err, "skipping rebalance");
                    rebalance_skipped = true;
                }
                Err(err) => return Err(err),
            }
        }

        let management_fee = daily_fee_rate * portfolio.value(prices)?;
        let portfolio = portfolio.pay_management_fee(management_fee);

        let value_base = portfolio.value(prices)?;
        let exchange_rate = rates.rate_on(date)?;
        let value_secondary: Dense<Cad> = Dense::<Usd>::new(value_base).convert(exchange_rate);

        let record = DailyRecord {
            date,
            value_base,
            value_secondary: value_secondary.amount(),
            exchange_rate,
            daily_return,
            pre_rebalance_beta,
            portfolio_beta: portfolio.beta(prices, betas)?,
            gross_exposure: portfolio.gross_exposure(prices)?,
            net_exposure: portfolio.net_exposure(prices)?,
            rebalanced,
            rebalance_skipped,
            management_fee,
            transaction_cost,
        };
        Ok((record, portfolio))
    }
}

/// Estimate betas on the history before the analysis month and simulate the month.
///
/// `data` must hold at least three trading days before the month (two
/// returns for the regression, the last of them doubling as inception day)
/// and at least one inside it. Without `rates`, the configured constant
/// exchange rate is used.
pub fn simulate_month(
    config: &SimulationConfig,
    data: &MarketData,
    rates: Option<&ExchangeRates>,
) -> Result<SimulationResult> {
    let simulation = Simulation::new(config)?;
    let (start, end) = period_bounds(config.analysis_year, config.analysis_month)?;

    let history = data.before(start)?;
    let period = data.between(start, end)?;
    let inception = history.len() - 1;

    let tickers: Vec<String> = config
        .long_tickers
        .iter()
        .chain(&config.short_tickers)
        .cloned()
        .collect();
    let betas = estimate_betas(&history, &tickers, &config.market_index)?;
    info!(?betas, history_days = history.len(), "estimated betas");

    let constant;
    let rates = match rates {
        Some(rates) => rates,
        None => {
            constant = ExchangeRates::constant(period.dates(), config.exchange_rate)?;
            &constant
        }
    };

    simulation.run(&history.prices_on(inception), &period, rates, &betas)
}

/// The daily records as a table for the reporting layer.
pub fn records_to_dataframe(records: &[DailyRecord]) -> Result<DataFrame> {
    let column = |f: fn(&DailyRecord) -> f64| records.iter().map(f).collect::<Vec<_>>();
    let dates: Vec<String> = records.iter().map(|r| r.date.to_string()).collect();
    let rebalanced: Vec<bool> = records.iter().map(|r| r.rebalanced).collect();
    let skipped: Vec<bool> = records.iter().map(|r| r.rebalance_skipped).collect();

    let df = df!(
        "date" => dates,
        "value_base" => column(|r| r.value_base),
        "value_secondary" => column(|r| r.value_secondary),
        "exchange_rate" => column(|r| r.exchange_rate),
        "daily_return" => column(|r| r.daily_return),
        "pre_rebalance_beta" => column(|r| r.pre_rebalance_beta),
        "portfolio_beta" => column(|r| r.portfolio_beta),
        "gross_exposure" => column(|r| r.gross_exposure),
        "net_exposure" => column(|r| r.net_exposure),
        "rebalanced" => rebalanced,
        "rebalance_skipped" => skipped,
        "management_fee" => column(|r| r.management_fee),
        "transaction_cost" => column(|r| r.transaction_cost)
    )?;
    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn config() -> SimulationConfig {
        SimulationConfig {
            initial_capital: 1_000_000.0,
            long_tickers: vec!["A".to_string()],
            short_tickers: vec!["B".to_string()],
            market_index: "M".to_string(),
            management_fee_annual: 0.0,
            ..Default::default()
        }
    }

    fn table(dates: Vec<Date>, series: &[(&str, Vec<f64>)]) -> MarketData {
        let prices = series
            .iter()
            .map(|(t, s)| (t.to_string(), s.clone()))
            .collect();
        MarketData::new(dates, prices).unwrap()
    }

    fn betas(a: f64, b: f64) -> BTreeMap<String, f64> {
        [("A".to_string(), a), ("B".to_string(), b)].into_iter().collect()
    }

    fn inception() -> HashMap<String, f64> {
        [("A".to_string(), 100.0), ("B".to_string(), 100.0)]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_returns_chain_off_previous_close() {
        let config = config();
        let dates = vec![date!(2025 - 01 - 02), date!(2025 - 01 - 03)];
        let period = table(
            dates.clone(),
            &[("A", vec![110.0, 110.0]), ("B", vec![100.0, 90.0])],
        );
        let rates = ExchangeRates::constant(&dates, 2.0).unwrap();
        let result = Simulation::new(&config)
            .unwrap()
            .run(&inception(), &period, &rates, &betas(1.0, 1.0))
            .unwrap();

        // 5000 A and -5000 B: +50k on day 1, +50k on day 2
        let first = &result.records[0];
        assert!((first.value_base - 1_050_000.0).abs() < 1e-6);
        assert!((first.daily_return - 0.05).abs() < 1e-12);
        assert!((first.value_secondary - 2_100_000.0).abs() < 1e-6);
        let second = &result.records[1];
        assert!((second.daily_return - 50_000.0 / 1_050_000.0).abs() < 1e-12);
        assert_eq!(result.initial_value, 1_000_000.0);
    }

    #[test]
    fn test_infeasible_rebalance_is_skipped_and_flagged() {
        let config = config();
        let dates = vec![date!(2025 - 01 - 02)];
        let period = table(dates.clone(), &[("A", vec![100.0]), ("B", vec![100.0])]);
        let rates = ExchangeRates::constant(&dates, 1.35).unwrap();
        let result = Simulation::new(&config)
            .unwrap()
            .run(&inception(), &period, &rates, &betas(1.0, -1.0))
            .unwrap();
        assert!(result.records[0].rebalance_skipped);
        assert!(!result.records[0].rebalanced);
        assert_eq!(result.records[0].transaction_cost, 0.0);
    }

    #[test]
    fn test_infeasible_rebalance_aborts_with_date() {
        let config = SimulationConfig {
            on_infeasible: InfeasiblePolicy::Abort,
            ..config()
        };
        let dates = vec![date!(2025 - 01 - 02)];
        let period = table(dates.clone(), &[("A", vec![100.0]), ("B", vec![100.0])]);
        let rates = ExchangeRates::constant(&dates, 1.35).unwrap();
        let err = Simulation::new(&config)
            .unwrap()
            .run(&inception(), &period, &rates, &betas(1.0, -1.0))
            .unwrap_err();
        assert!(matches!(err, SimulationError::OnDate { date, .. } if date == dates[0]));
        assert!(matches!(
            err.root_cause(),
            SimulationError::RebalanceInfeasible { .. }
        ));
    }

    #[test]
    fn test_missing_exchange_rate_fails() {
        let config = config();
        let dates = vec![date!(2025 - 01 - 02)];
        let period = table(dates, &[("A", vec![100.0]), ("B", vec![100.0])]);
        let rates = ExchangeRates::constant(&[date!(2025 - 01 - 03)], 1.35).unwrap();
        assert!(Simulation::new(&config)
            .unwrap()
            .run(&inception(), &period, &rates, &betas(1.0, 1.0))
            .is_err());
    }

    #[test]
    fn test_invalid_config_is_rejected_up_front() {
        let config = SimulationConfig {
            initial_capital: -1.0,
            ..config()
        };
        assert!(matches!(
            Simulation::new(&config),
            Err(SimulationError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_simulate_month_splits_history_and_period() {
        let config = config();
        let dates = vec![
            date!(2024 - 12 - 27),
            date!(2024 - 12 - 30),
            date!(2024 - 12 - 31),
            date!(2025 - 01 - 02),
            date!(2025 - 01 - 03),
        ];
        let data = table(
            dates,
            &[
                ("M", vec![100.0, 101.0, 99.0, 100.0, 100.0]),
                ("A", vec![50.0, 50.5, 49.5, 50.0, 50.0]),
                ("B", vec![20.0, 20.2, 19.8, 20.0, 20.0]),
            ],
        );
        let result = simulate_month(&config, &data, None).unwrap();
        assert_eq!(result.records.len(), 2);
        assert!((result.betas["A"] - 1.0).abs() < 1e-12);
        assert_eq!(result.records[0].exchange_rate, 1.35);
        assert!(result.records.iter().all(|r| !r.rebalanced));

        let df = records_to_dataframe(&result.records).unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(df.width(), 13);
    }
}
