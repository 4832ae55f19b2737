//! Tolerance-triggered re-solve of the book back to its target beta.
//!
//! Roles are fixed: the rebalancer resizes the long and short legs (and,
//! with [`RebalanceWeighting::InverseBeta`], the mix inside each leg) while
//! keeping gross exposure unchanged. When the target cannot be reached
//! without flipping a leg it reports [`SimulationError::RebalanceInfeasible`].

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info};

use crate::allocation::allocate;
use crate::assets::Role;
use crate::config::{LotPolicy, RebalanceWeighting, SimulationConfig};
use crate::error::{Result, SimulationError};
use crate::portfolio::{portfolio_beta, Portfolio};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BetaState {
    Neutral,
    Drifted,
}

/// Outcome of one rebalance call. `portfolio` is a fresh snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Rebalance {
    pub portfolio: Portfolio,
    pub transaction_cost: f64,
    pub shares_traded: f64,
    pub beta_before: f64,
    pub beta_after: f64,
}

impl Rebalance {
    pub fn traded(&self) -> bool {
        self.shares_traded > 0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rebalancer {
    target_beta: f64,
    tolerance: f64,
    fee_per_share: f64,
    weighting: RebalanceWeighting,
    lot_policy: LotPolicy,
}

impl Rebalancer {
    pub fn new(target_beta: f64, tolerance: f64, fee_per_share: f64) -> Self {
        Self {
            target_beta,
            tolerance,
            fee_per_share,
            weighting: RebalanceWeighting::Proportional,
            lot_policy: LotPolicy::Fractional,
        }
    }

    pub fn from_config(config: &SimulationConfig) -> Self {
        Self::new(
            config.target_beta,
            config.beta_tolerance,
            config.transaction_fee_per_share,
        )
        .with_weighting(config.weighting)
        .with_lot_policy(config.lot_policy)
    }

    pub fn with_weighting(mut self, weighting: RebalanceWeighting) -> Self {
        self.weighting = weighting;
        self
    }

    pub fn with_lot_policy(mut self, lot_policy: LotPolicy) -> Self {
        self.lot_policy = lot_policy;
        self
    }

    pub fn target_beta(&self) -> f64 {
        self.target_beta
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn state(&self, beta: f64) -> BetaState {
        if (beta - self.target_beta).abs() > self.tolerance {
            BetaState::Drifted
        } else {
            BetaState::Neutral
        }
    }

    /// Bring `portfolio` back within tolerance of the target beta.
    ///
    /// A book that is already neutral comes back unchanged with zero cost,
    /// which also makes a second call in a row a no-op.
    pub fn rebalance(
        &self,
        portfolio: &Portfolio,
        prices: &HashMap<String, f64>,
        betas: &BTreeMap<String, f64>,
    ) -> Result<Rebalance> {
        let exposures = portfolio.exposures(prices)?;
        let beta_before = portfolio_beta(&exposures, betas)?;

        if self.state(beta_before) == BetaState::Neutral {
            return Ok(Rebalance {
                portfolio: portfolio.clone(),
                transaction_cost: 0.0,
                shares_traded: 0.0,
                beta_before,
                beta_after: beta_before,
            });
        }

        let gross: f64 = exposures.values().map(|e| e.abs()).sum();
        let long_weights = self.leg_weights(portfolio, Role::Long, &exposures, betas, beta_before)?;
        let short_weights =
            self.leg_weights(portfolio, Role::Short, &exposures, betas, beta_before)?;
        let long_beta = leg_beta(&long_weights, betas)?;
        let short_beta = leg_beta(&short_weights, betas)?;

        // L * long_beta - S * short_beta = target * G with L + S = G
        let denominator = long_beta + short_beta;
        if denominator.abs() <= f64::EPSILON {
            return Err(self.infeasible(
                beta_before,
                format!("leg betas {long_beta:.6} and {short_beta:.6} cancel out"),
            ));
        }
        let long_exposure = gross * (self.target_beta + short_beta) / denominator;
        let short_exposure = gross - long_exposure;
        if !(long_exposure > 0.0 && short_exposure > 0.0) {
            return Err(self.infeasible(
                beta_before,
                format!(
                    "needs long exposure {long_exposure:.2} and short exposure {short_exposure:.2} of gross {gross:.2}"
                ),
            ));
        }

        let mut targets = allocate(
            long_exposure,
            &long_weights,
            prices,
            Role::Long,
            self.lot_policy,
        )?;
        targets.extend(allocate(
            short_exposure,
            &short_weights,
            prices,
            Role::Short,
            self.lot_policy,
        )?);

        let shares_traded: f64 = targets
            .iter()
            .map(|(ticker, shares)| {
                let held = portfolio.position(ticker).map_or(0.0, |p| p.shares);
                (shares - held).abs()
            })
            .sum();
        let transaction_cost = shares_traded * self.fee_per_share;

        let next = portfolio
            .with_shares(&targets, prices)?
            .pay_transaction_cost(transaction_cost);
        let beta_after = next.beta(prices, betas)?;
        if self.state(beta_after) == BetaState::Drifted {
            return Err(self.infeasible(
                beta_before,
                format!("rounded allocation lands at {beta_after:.6}"),
            ));
        }

        info!(
            beta_before,
            beta_after,
            long_exposure,
            short_exposure,
            shares_traded,
            transaction_cost,
            "rebalanced to target beta"
        );

        Ok(Rebalance {
            portfolio: next,
            transaction_cost,
            shares_traded,
            beta_before,
            beta_after,
        })
    }

    fn leg_weights(
        &self,
        portfolio: &Portfolio,
        role: Role,
        exposures: &BTreeMap<String, f64>,
        betas: &BTreeMap<String, f64>,
        beta_before: f64,
    ) -> Result<Vec<(String, f64)>> {
        let tickers: Vec<&str> = portfolio.leg(role).map(|p| p.ticker.as_str()).collect();
        if tickers.is_empty() {
            return Err(self.infeasible(beta_before, format!("{role} leg is empty")));
        }

        let weights: Vec<(String, f64)> = match self.weighting {
            RebalanceWeighting::Proportional => {
                let leg_gross: f64 = tickers.iter().map(|t| exposures[*t].abs()).sum();
                if leg_gross > 0.0 {
                    tickers
                        .iter()
                        .map(|t| (t.to_string(), exposures[*t].abs()))
                        .collect()
                } else {
                    // a fully unwound leg is rebuilt evenly
                    tickers.iter().map(|t| (t.to_string(), 1.0)).collect()
                }
            }
            RebalanceWeighting::InverseBeta => tickers
                .iter()
                .map(|t| {
                    let beta = beta_of(betas, t)?;
                    if beta <= 0.0 {
                        return Err(self.infeasible(
                            beta_before,
                            format!("inverse-beta weighting needs a positive beta for {t}, got {beta:.6}"),
                        ));
                    }
                    Ok((t.to_string(), 1.0 / beta))
                })
                .collect::<Result<_>>()?,
        };
        debug!(%role, ?weights, "leg weights");
        Ok(weights)
    }

    fn infeasible(&self, beta: f64, reason: String) -> SimulationError {
        SimulationError::infeasible(beta, self.target_beta, self.tolerance, reason)
    }
}

fn beta_of(betas: &BTreeMap<String, f64>, ticker: &str) -> Result<f64> {
    betas
        .get(ticker)
        .copied()
        .ok_or_else(|| SimulationError::MissingBeta {
            ticker: ticker.to_string(),
        })
}

/// Weighted beta of one leg, with weights normalized to sum to one.
fn leg_beta(weights: &[(String, f64)], betas: &BTreeMap<String, f64>) -> Result<f64> {
    let total: f64 = weights.iter().map(|(_, w)| w).sum();
    weights.iter().try_fold(0.0, |acc, (ticker, w)| {
        Ok(acc + w / total * beta_of(betas, ticker)?)
    })
}
