use std::collections::{BTreeMap, HashMap, HashSet};

use polars::prelude::*;

use crate::allocation::allocate;
use crate::assets::{Instrument, Role};
use crate::config::{LotPolicy, SimulationConfig};
use crate::error::{Result, SimulationError};

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub ticker: String,
    pub role: Role,
    /// Negative for short positions.
    pub shares: f64,
}

impl Position {
    /// Signed dollar exposure at `price`.
    pub fn exposure(&self, price: f64) -> f64 {
        self.shares * price
    }
}

/// An immutable snapshot of the book: positions plus cash.
///
/// Every change (a rebalance, a fee debit) yields a new `Portfolio`, so the
/// state before and after each day stays inspectable.
#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    positions: BTreeMap<String, Position>,
    cash: f64,
    management_fees_paid: f64,
    transaction_costs_paid: f64,
}

impl Portfolio {
    pub fn builder() -> PortfolioBuilder {
        PortfolioBuilder::new()
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn position(&self, ticker: &str) -> Option<&Position> {
        self.positions.get(ticker)
    }

    pub fn leg(&self, role: Role) -> impl Iterator<Item = &Position> {
        self.positions.values().filter(move |p| p.role == role)
    }

    pub fn shares(&self) -> BTreeMap<String, f64> {
        self.positions
            .iter()
            .map(|(ticker, p)| (ticker.clone(), p.shares))
            .collect()
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn management_fees_paid(&self) -> f64 {
        self.management_fees_paid
    }

    pub fn transaction_costs_paid(&self) -> f64 {
        self.transaction_costs_paid
    }

    /// Signed dollar exposure per ticker.
    pub fn exposures(&self, prices: &HashMap<String, f64>) -> Result<BTreeMap<String, f64>> {
        self.positions
            .iter()
            .map(|(ticker, p)| {
                let price = prices
                    .get(ticker)
                    .ok_or_else(|| SimulationError::missing_price(ticker.clone()))?;
                Ok((ticker.clone(), p.exposure(*price)))
            })
            .collect()
    }

    pub fn gross_exposure(&self, prices: &HashMap<String, f64>) -> Result<f64> {
        Ok(self.exposures(prices)?.values().map(|e| e.abs()).sum())
    }

    pub fn net_exposure(&self, prices: &HashMap<String, f64>) -> Result<f64> {
        Ok(self.exposures(prices)?.values().sum())
    }

    /// Net asset value: cash plus the signed value of every position.
    pub fn value(&self, prices: &HashMap<String, f64>) -> Result<f64> {
        Ok(self.cash + self.net_exposure(prices)?)
    }

    pub fn beta(&self, prices: &HashMap<String, f64>, betas: &BTreeMap<String, f64>) -> Result<f64> {
        portfolio_beta(&self.exposures(prices)?, betas)
    }

    /// Instruments held, tagged with their role and beta.
    pub fn instruments(&self, betas: &BTreeMap<String, f64>) -> Result<Vec<Instrument>> {
        self.positions
            .values()
            .map(|p| {
                let beta = *betas.get(&p.ticker).ok_or_else(|| SimulationError::MissingBeta {
                    ticker: p.ticker.clone(),
                })?;
                Ok(Instrument {
                    ticker: p.ticker.clone(),
                    role: p.role,
                    beta,
                })
            })
            .collect()
    }

    /// Trade to `targets` at `prices`, settling against cash. Roles never change.
    pub fn with_shares(
        &self,
        targets: &[(String, f64)],
        prices: &HashMap<String, f64>,
    ) -> Result<Portfolio> {
        let mut next = self.clone();
        for (ticker, shares) in targets {
            let position = next.positions.get_mut(ticker).ok_or_else(|| {
                SimulationError::invalid_config("target for a ticker not held")
                    .for_instrument(ticker.clone())
            })?;
            let price = prices
                .get(ticker)
                .ok_or_else(|| SimulationError::missing_price(ticker.clone()))?;
            next.cash -= (shares - position.shares) * price;
            position.shares = *shares;
        }
        Ok(next)
    }

    pub fn pay_transaction_cost(&self, amount: f64) -> Portfolio {
        Portfolio {
            cash: self.cash - amount,
            transaction_costs_paid: self.transaction_costs_paid + amount,
            ..self.clone()
        }
    }

    pub fn pay_management_fee(&self, amount: f64) -> Portfolio {
        Portfolio {
            cash: self.cash - amount,
            management_fees_paid: self.management_fees_paid + amount,
            ..self.clone()
        }
    }

    pub fn positions_to_dataframe(
        &self,
        prices: &HashMap<String, f64>,
        betas: &BTreeMap<String, f64>,
    ) -> Result<DataFrame> {
        let exposures = self.exposures(prices)?;
        let instruments = self.instruments(betas)?;
        let tickers: Vec<_> = instruments.iter().map(|i| i.ticker.clone()).collect();
        let roles: Vec<_> = instruments.iter().map(|i| i.role.to_string()).collect();
        let shares: Vec<_> = tickers.iter().map(|t| self.positions[t].shares).collect();
        let exposure: Vec<_> = tickers.iter().map(|t| exposures[t]).collect();
        let beta: Vec<_> = instruments.iter().map(|i| i.beta).collect();
        Ok(df!(
            "ticker" => tickers,
            "role" => roles,
            "shares" => shares,
            "exposure" => exposure,
            "beta" => beta
        )?)
    }
}

/// Exposure-weighted beta normalized by gross exposure.
///
/// Each instrument contributes `exposure_i * beta_i / sum(|exposure_j|)`, so
/// a short leg offsets a long leg while a long-only book reduces to the plain
/// exposure-weighted average of its betas.
pub fn portfolio_beta(
    exposures: &BTreeMap<String, f64>,
    betas: &BTreeMap<String, f64>,
) -> Result<f64> {
    let gross: f64 = exposures.values().map(|e| e.abs()).sum();
    if !(gross > 0.0) {
        return Err(SimulationError::EmptyPortfolio {
            gross_exposure: gross,
        });
    }
    exposures.iter().try_fold(0.0, |acc, (ticker, exposure)| {
        let beta = betas.get(ticker).ok_or_else(|| SimulationError::MissingBeta {
            ticker: ticker.clone(),
        })?;
        Ok(acc + exposure * beta / gross)
    })
}

pub struct PortfolioBuilder {
    capital: f64,
    long: Vec<String>,
    short: Vec<String>,
    lot_policy: LotPolicy,
}

impl Default for PortfolioBuilder {
    fn default() -> Self {
        Self {
            capital: 0.0,
            long: Vec::new(),
            short: Vec::new(),
            lot_policy: LotPolicy::Fractional,
        }
    }
}

impl PortfolioBuilder {
    pub fn new() -> PortfolioBuilder {
        PortfolioBuilder::default()
    }

    pub fn from_config(config: &SimulationConfig) -> PortfolioBuilder {
        PortfolioBuilder::new()
            .capital(config.initial_capital)
            .long(&config.long_tickers)
            .short(&config.short_tickers)
            .lot_policy(config.lot_policy)
    }

    pub fn capital(mut self, capital: f64) -> Self {
        self.capital = capital;
        self
    }

    pub fn long<S: AsRef<str>>(mut self, tickers: &[S]) -> Self {
        self.long = tickers.iter().map(|t| t.as_ref().to_string()).collect();
        self
    }

    pub fn short<S: AsRef<str>>(mut self, tickers: &[S]) -> Self {
        self.short = tickers.iter().map(|t| t.as_ref().to_string()).collect();
        self
    }

    pub fn lot_policy(mut self, lot_policy: LotPolicy) -> Self {
        self.lot_policy = lot_policy;
        self
    }

    /// Split capital 50/50 between the legs and evenly within each leg.
    pub fn build(self, prices: &HashMap<String, f64>) -> Result<Portfolio> {
        if !(self.capital > 0.0 && self.capital.is_finite()) {
            return Err(SimulationError::invalid_config(format!(
                "capital must be positive, got {}",
                self.capital
            )));
        }
        if self.long.is_empty() || self.short.is_empty() {
            return Err(SimulationError::invalid_config(format!(
                "both legs need tickers, got {} long and {} short",
                self.long.len(),
                self.short.len()
            )));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self
            .long
            .iter()
            .chain(&self.short)
            .find(|t| !seen.insert(t.as_str()))
        {
            return Err(SimulationError::invalid_config(format!(
                "ticker {dup} is listed more than once"
            )));
        }

        let leg_capital = self.capital / 2.0;
        let mut positions = BTreeMap::new();
        for (role, tickers) in [(Role::Long, &self.long), (Role::Short, &self.short)] {
            let weights: Vec<_> = tickers.iter().map(|t| (t.clone(), 1.0)).collect();
            for (ticker, shares) in allocate(leg_capital, &weights, prices, role, self.lot_policy)? {
                positions.insert(
                    ticker.clone(),
                    Position {
                        ticker,
                        role,
                        shares,
                    },
                );
            }
        }

        let mut portfolio = Portfolio {
            positions,
            cash: 0.0,
            management_fees_paid: 0.0,
            transaction_costs_paid: 0.0,
        };
        portfolio.cash = self.capital - portfolio.net_exposure(prices)?;
        Ok(portfolio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prices(list: &[(&str, f64)]) -> HashMap<String, f64> {
        list.iter().map(|(t, p)| (t.to_string(), *p)).collect()
    }

    fn betas(list: &[(&str, f64)]) -> BTreeMap<String, f64> {
        list.iter().map(|(t, b)| (t.to_string(), *b)).collect()
    }

    #[test]
    fn test_initial_split_is_half_per_leg() {
        let p = prices(&[("A", 100.0), ("B", 37.0), ("C", 12.5), ("D", 250.0), ("E", 3.3)]);
        let portfolio = Portfolio::builder()
            .capital(1_000_000.0)
            .long(&["A", "B"])
            .short(&["C", "D", "E"])
            .build(&p)
            .unwrap();

        let exposures = portfolio.exposures(&p).unwrap();
        let long: f64 = portfolio.leg(Role::Long).map(|pos| exposures[&pos.ticker]).sum();
        let short: f64 = portfolio.leg(Role::Short).map(|pos| exposures[&pos.ticker]).sum();
        assert!((long - 500_000.0).abs() < 1e-6);
        assert!((short + 500_000.0).abs() < 1e-6);
        assert!((portfolio.value(&p).unwrap() - 1_000_000.0).abs() < 1e-6);
        assert!((exposures["B"] - 250_000.0).abs() < 1e-6);
        assert!(portfolio.position("E").unwrap().shares < 0.0);
    }

    #[test]
    fn test_initializer_rejects_bad_configuration() {
        let p = prices(&[("A", 100.0), ("B", 0.0)]);
        assert!(Portfolio::builder().capital(1.0).long(&["A"]).build(&p).is_err());
        assert!(Portfolio::builder()
            .capital(0.0)
            .long(&["A"])
            .short(&["B"])
            .build(&p)
            .is_err());
        let err = Portfolio::builder()
            .capital(1.0)
            .long(&["A"])
            .short(&["B"])
            .build(&p)
            .unwrap_err();
        assert!(matches!(
            err.root_cause(),
            SimulationError::InvalidConfiguration { .. }
        ));
    }

    #[test]
    fn test_whole_share_policy_rounds() {
        let p = prices(&[("A", 30.0), ("B", 70.0)]);
        let portfolio = Portfolio::builder()
            .capital(1_000.0)
            .long(&["A"])
            .short(&["B"])
            .lot_policy(LotPolicy::WholeShares)
            .build(&p)
            .unwrap();
        assert_eq!(portfolio.position("A").unwrap().shares, 17.0);
        assert_eq!(portfolio.position("B").unwrap().shares, -7.0);
        // 1000 - (17 * 30 - 7 * 70)
        assert!((portfolio.cash() - 980.0).abs() < 1e-9);
    }

    #[test]
    fn test_long_only_beta_is_weighted_average() {
        let exposures = betas(&[("A", 300.0), ("B", 100.0)]);
        let b = betas(&[("A", 1.2), ("B", 0.4)]);
        let beta = portfolio_beta(&exposures, &b).unwrap();
        assert!((beta - (0.75 * 1.2 + 0.25 * 0.4)).abs() < 1e-12);
    }

    #[test]
    fn test_balanced_book_offsets() {
        let exposures = betas(&[("A", 500.0), ("B", -500.0)]);
        let b = betas(&[("A", 1.0), ("B", 1.0)]);
        assert!(portfolio_beta(&exposures, &b).unwrap().abs() < 1e-12);
    }

    #[test]
    fn test_empty_portfolio_beta() {
        let exposures = betas(&[("A", 0.0)]);
        let b = betas(&[("A", 1.0)]);
        assert!(matches!(
            portfolio_beta(&exposures, &b),
            Err(SimulationError::EmptyPortfolio { .. })
        ));
        assert!(matches!(
            portfolio_beta(&betas(&[("A", 1.0)]), &BTreeMap::new()),
            Err(SimulationError::MissingBeta { .. })
        ));
    }

    #[test]
    fn test_trades_settle_against_cash_and_keep_snapshot() {
        let p = prices(&[("A", 10.0), ("B", 20.0)]);
        let before = Portfolio::builder()
            .capital(200.0)
            .long(&["A"])
            .short(&["B"])
            .build(&p)
            .unwrap();
        let after = before
            .with_shares(&[("A".to_string(), 15.0)], &p)
            .unwrap()
            .pay_transaction_cost(1.0);

        assert_eq!(before.position("A").unwrap().shares, 10.0);
        assert_eq!(after.position("A").unwrap().shares, 15.0);
        assert!((after.value(&p).unwrap() - 199.0).abs() < 1e-9);
        assert_eq!(after.transaction_costs_paid(), 1.0);
    }

    #[test]
    fn test_positions_dataframe() {
        let p = prices(&[("A", 10.0), ("B", 20.0)]);
        let portfolio = Portfolio::builder()
            .capital(200.0)
            .long(&["A"])
            .short(&["B"])
            .build(&p)
            .unwrap();
        let df = portfolio
            .positions_to_dataframe(&p, &betas(&[("A", 1.0), ("B", 0.5)]))
            .unwrap();
        assert_eq!(df.shape(), (2, 5));
    }
}
