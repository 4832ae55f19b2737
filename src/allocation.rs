//! Dollar-exposure to share-count conversion shared by initialization and rebalancing.

use std::collections::HashMap;

use crate::assets::Role;
use crate::config::LotPolicy;
use crate::error::{Result, SimulationError};

/// Split `exposure` dollars across `weights` and convert to signed share counts.
///
/// Weights are normalized by their sum, so only their ratios matter. Each
/// instrument receives `exposure * w / sum(w) / price` shares, negated for
/// the short role, then rounded according to `lots`.
pub fn allocate(
    exposure: f64,
    weights: &[(String, f64)],
    prices: &HashMap<String, f64>,
    role: Role,
    lots: LotPolicy,
) -> Result<Vec<(String, f64)>> {
    if !(exposure >= 0.0 && exposure.is_finite()) {
        return Err(SimulationError::invalid_config(format!(
            "{role} exposure must be non-negative, got {exposure}"
        )));
    }
    if weights.is_empty() {
        return Err(SimulationError::invalid_config(format!(
            "{role} leg has no instruments"
        )));
    }
    if let Some((ticker, w)) = weights.iter().find(|(_, w)| !(*w >= 0.0 && w.is_finite())) {
        return Err(
            SimulationError::invalid_config(format!("weight must be non-negative, got {w}"))
                .for_instrument(ticker.clone()),
        );
    }
    let total: f64 = weights.iter().map(|(_, w)| w).sum();
    if !(total > 0.0) {
        return Err(SimulationError::invalid_config(format!(
            "{role} weights sum to {total}"
        )));
    }

    weights
        .iter()
        .map(|(ticker, w)| {
            let price = *prices
                .get(ticker)
                .ok_or_else(|| SimulationError::missing_price(ticker.clone()))?;
            if !(price > 0.0 && price.is_finite()) {
                return Err(SimulationError::invalid_config(format!(
                    "price must be positive, got {price}"
                ))
                .for_instrument(ticker.clone()));
            }
            let shares = role.sign() * exposure * (w / total) / price;
            let shares = match lots {
                LotPolicy::Fractional => shares,
                LotPolicy::WholeShares => shares.round(),
            };
            Ok((ticker.clone(), shares))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prices() -> HashMap<String, f64> {
        [("A", 100.0), ("B", 40.0), ("C", 0.0)]
            .into_iter()
            .map(|(t, p)| (t.to_string(), p))
            .collect()
    }

    fn equal(tickers: &[&str]) -> Vec<(String, f64)> {
        tickers.iter().map(|t| (t.to_string(), 1.0)).collect()
    }

    #[test]
    fn test_equal_split_long() {
        let shares = allocate(
            1_000.0,
            &equal(&["A", "B"]),
            &prices(),
            Role::Long,
            LotPolicy::Fractional,
        )
        .unwrap();
        assert_eq!(shares, vec![("A".to_string(), 5.0), ("B".to_string(), 12.5)]);
    }

    #[test]
    fn test_short_role_is_negated_and_weighted() {
        let weights = vec![("A".to_string(), 3.0), ("B".to_string(), 1.0)];
        let shares =
            allocate(1_000.0, &weights, &prices(), Role::Short, LotPolicy::Fractional).unwrap();
        assert_eq!(shares[0].1, -7.5);
        assert_eq!(shares[1].1, -6.25);
    }

    #[test]
    fn test_whole_share_lots() {
        let shares = allocate(
            1_000.0,
            &equal(&["A", "B"]),
            &prices(),
            Role::Long,
            LotPolicy::WholeShares,
        )
        .unwrap();
        assert_eq!(shares[1].1, 13.0);
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let p = prices();
        assert!(allocate(1.0, &[], &p, Role::Long, LotPolicy::Fractional).is_err());
        assert!(allocate(1.0, &equal(&["C"]), &p, Role::Long, LotPolicy::Fractional).is_err());
        assert!(allocate(1.0, &equal(&["Z"]), &p, Role::Long, LotPolicy::Fractional).is_err());
        assert!(allocate(-1.0, &equal(&["A"]), &p, Role::Long, LotPolicy::Fractional).is_err());
        let zero = vec![("A".to_string(), 0.0)];
        assert!(allocate(1.0, &zero, &p, Role::Long, LotPolicy::Fractional).is_err());
    }
}
