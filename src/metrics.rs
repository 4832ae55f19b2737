//! Month-level performance summary handed to the reporting layer.

use crate::config::TRADING_DAYS_PER_YEAR;
use crate::simulation::DailyRecord;

/// Annual risk-free rate used for the Sharpe ratio.
pub const RISK_FREE_RATE: f64 = 0.02;

#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceSummary {
    pub initial_value: f64,
    pub final_value: f64,
    pub total_return: f64,
    /// NaN when the total return is negative.
    pub annualized_return: f64,
    pub sharpe_ratio: f64,
    /// Largest peak-to-trough decline, as a non-positive fraction.
    ///
    /// The running peak starts at the initial value rather than the first
    /// close, so a loss on the first simulated day counts as a drawdown.
    pub max_drawdown: f64,
    pub mean_beta: f64,
    pub var_95: f64,
    pub var_99: f64,
    pub expected_shortfall_95: f64,
    pub total_management_fees: f64,
    pub total_transaction_costs: f64,
    pub rebalance_count: usize,
}

impl PerformanceSummary {
    pub fn from_records(initial_value: f64, records: &[DailyRecord]) -> Self {
        let final_value = records.last().map_or(initial_value, |r| r.value_base);
        let total_return = final_value / initial_value - 1.0;
        let days = records.len() as f64;
        let annualized_return = if total_return >= 0.0 && !records.is_empty() {
            (1.0 + total_return).powf(TRADING_DAYS_PER_YEAR / days) - 1.0
        } else {
            f64::NAN
        };

        let returns: Vec<f64> = records.iter().map(|r| r.daily_return).collect();
        let excess: Vec<f64> = returns
            .iter()
            .map(|r| r - RISK_FREE_RATE / TRADING_DAYS_PER_YEAR)
            .collect();
        let sharpe_ratio = TRADING_DAYS_PER_YEAR.sqrt() * mean(&excess) / sample_std(&excess);

        let mut peak = initial_value;
        let mut max_drawdown: f64 = 0.0;
        for record in records {
            peak = peak.max(record.value_base);
            max_drawdown = max_drawdown.min(record.value_base / peak - 1.0);
        }

        let var_95 = percentile(&returns, 5.0);
        let var_99 = percentile(&returns, 1.0);
        let tail: Vec<f64> = returns.iter().copied().filter(|r| *r <= var_95).collect();

        Self {
            initial_value,
            final_value,
            total_return,
            annualized_return,
            sharpe_ratio,
            max_drawdown,
            mean_beta: mean(&records.iter().map(|r| r.portfolio_beta).collect::<Vec<_>>()),
            var_95,
            var_99,
            expected_shortfall_95: mean(&tail),
            total_management_fees: records.iter().map(|r| r.management_fee).sum(),
            total_transaction_costs: records.iter().map(|r| r.transaction_cost).sum(),
            rebalance_count: records.iter().filter(|r| r.rebalanced).count(),
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}

/// Percentile with linear interpolation between closest ranks.
fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}
