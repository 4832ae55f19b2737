//! Beta estimation by ordinary least squares against the market index.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{Result, SimulationError};
use crate::market_data::MarketData;

/// Slope of the OLS fit `instrument = alpha + beta * market`.
///
/// Equivalent to `cov(instrument, market) / var(market)`. Needs at least two
/// aligned observations and a market series with non-zero variance.
pub fn compute_beta(instrument_returns: &[f64], market_returns: &[f64]) -> Result<f64> {
    if instrument_returns.len() != market_returns.len() {
        return Err(SimulationError::MisalignedData {
            expected: market_returns.len(),
            actual: instrument_returns.len(),
        });
    }
    let n = market_returns.len();
    if n < 2 {
        return Err(SimulationError::InsufficientData {
            required: 2,
            available: n,
        });
    }

    let mean_x = market_returns.iter().sum::<f64>() / n as f64;
    let mean_y = instrument_returns.iter().sum::<f64>() / n as f64;

    let (sxy, sxx) = market_returns
        .iter()
        .zip(instrument_returns)
        .fold((0.0, 0.0), |(sxy, sxx), (x, y)| {
            let dx = x - mean_x;
            (sxy + dx * (y - mean_y), sxx + dx * dx)
        });

    // Relative to the series' magnitude so a constant series with rounding noise still counts.
    let scale = market_returns.iter().fold(0.0_f64, |m, x| m.max(x.abs()));
    if sxx <= f64::EPSILON * scale * scale * n as f64 {
        return Err(SimulationError::DegenerateInput {
            variance: sxx / (n - 1) as f64,
        });
    }

    Ok(sxy / sxx)
}

/// Beta of every ticker against `market_index`, from the table's daily returns.
pub fn estimate_betas(
    data: &MarketData,
    tickers: &[String],
    market_index: &str,
) -> Result<BTreeMap<String, f64>> {
    let market = data
        .returns(market_index)
        .map_err(|e| e.for_instrument(market_index))?;

    let mut betas = BTreeMap::new();
    for ticker in tickers {
        let returns = data.returns(ticker).map_err(|e| e.for_instrument(ticker))?;
        let beta = compute_beta(&returns, &market).map_err(|e| e.for_instrument(ticker))?;
        debug!(%ticker, beta, observations = returns.len(), "estimated beta");
        betas.insert(ticker.clone(), beta);
    }
    Ok(betas)
}
