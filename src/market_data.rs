//! Pre-fetched, date-aligned price and exchange-rate tables.

use std::collections::{BTreeSet, HashMap};

use time::{util::days_in_year_month, Date, Month};

use tracing::warn;

use crate::error::{Result, SimulationError};

/// First and last calendar day of an analysis month.
pub fn period_bounds(year: i32, month: u8) -> Result<(Date, Date)> {
    let month = Month::try_from(month).map_err(|_| {
        SimulationError::invalid_config(format!("month must be between 1 and 12, got {month}"))
    })?;
    let last_day = days_in_year_month(year, month);
    let start = Date::from_calendar_date(year, month, 1)
        .map_err(|e| SimulationError::invalid_config(e.to_string()))?;
    let end = Date::from_calendar_date(year, month, last_day)
        .map_err(|e| SimulationError::invalid_config(e.to_string()))?;
    Ok((start, end))
}

/// Simple daily returns `p[t] / p[t-1] - 1`; one element shorter than `prices`.
pub fn daily_returns(prices: &[f64]) -> Vec<f64> {
    prices.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
}

/// Join per-ticker `(date, price)` histories on the dates every ticker shares.
///
/// Dates missing from any ticker are dropped, so the table is gap-free. The
/// histories need not be sorted.
pub fn align(histories: HashMap<String, Vec<(Date, f64)>>) -> Result<MarketData> {
    let mut common: Option<BTreeSet<Date>> = None;
    for history in histories.values() {
        let dates: BTreeSet<Date> = history.iter().map(|(d, _)| *d).collect();
        common = Some(match common {
            Some(acc) => acc.intersection(&dates).copied().collect(),
            None => dates,
        });
    }
    let dates: Vec<Date> = common.unwrap_or_default().into_iter().collect();

    let mut prices = HashMap::with_capacity(histories.len());
    for (ticker, history) in histories {
        let by_date: HashMap<Date, f64> = history.into_iter().collect();
        if by_date.len() != dates.len() {
            warn!(
                %ticker,
                dropped = by_date.len() - dates.len(),
                "dropping dates missing from other tickers"
            );
        }
        let series = dates
            .iter()
            .map(|d| {
                by_date
                    .get(d)
                    .copied()
                    .ok_or_else(|| SimulationError::missing_price(ticker.clone()).on_date(*d))
            })
            .collect::<Result<Vec<f64>>>()?;
        prices.insert(ticker, series);
    }

    MarketData::new(dates, prices)
}

/// Close prices for every ticker on a shared, gap-free trading calendar.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketData {
    dates: Vec<Date>,
    prices: HashMap<String, Vec<f64>>,
}

impl MarketData {
    pub fn new(dates: Vec<Date>, prices: HashMap<String, Vec<f64>>) -> Result<Self> {
        if dates.is_empty() {
            return Err(SimulationError::InsufficientData {
                required: 1,
                available: 0,
            });
        }
        if let Some(pair) = dates.windows(2).find(|w| w[0] >= w[1]) {
            return Err(SimulationError::invalid_config(format!(
                "dates must be strictly increasing, found {} before {}",
                pair[0], pair[1]
            )));
        }
        for (ticker, series) in &prices {
            if series.len() != dates.len() {
                return Err(SimulationError::MisalignedData {
                    expected: dates.len(),
                    actual: series.len(),
                }
                .for_instrument(ticker.clone()));
            }
            if let Some((i, price)) = series
                .iter()
                .enumerate()
                .find(|(_, p)| !(**p > 0.0 && p.is_finite()))
            {
                return Err(SimulationError::invalid_config(format!(
                    "price must be positive, got {price}"
                ))
                .for_instrument(ticker.clone())
                .on_date(dates[i]));
            }
        }
        Ok(Self { dates, prices })
    }

    pub fn dates(&self) -> &[Date] {
        &self.dates
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn series(&self, ticker: &str) -> Result<&[f64]> {
        self.prices
            .get(ticker)
            .map(Vec::as_slice)
            .ok_or_else(|| SimulationError::missing_price(ticker))
    }

    pub fn returns(&self, ticker: &str) -> Result<Vec<f64>> {
        Ok(daily_returns(self.series(ticker)?))
    }

    /// Every ticker's price on trading day `index`.
    pub fn prices_on(&self, index: usize) -> HashMap<String, f64> {
        self.prices
            .iter()
            .filter_map(|(ticker, series)| series.get(index).map(|p| (ticker.clone(), *p)))
            .collect()
    }

    /// Rows with `from <= date <= to`.
    pub fn between(&self, from: Date, to: Date) -> Result<Self> {
        let keep: Vec<usize> = (0..self.dates.len())
            .filter(|&i| self.dates[i] >= from && self.dates[i] <= to)
            .collect();
        let dates: Vec<Date> = keep.iter().map(|&i| self.dates[i]).collect();
        let prices: HashMap<String, Vec<f64>> = self
            .prices
            .iter()
            .map(|(ticker, series)| (ticker.clone(), keep.iter().map(|&i| series[i]).collect()))
            .collect();
        Self::new(dates, prices)
    }

    /// Rows strictly before `date`.
    pub fn before(&self, date: Date) -> Result<Self> {
        match date.previous_day() {
            Some(last) => self.between(Date::MIN, last),
            None => Err(SimulationError::InsufficientData {
                required: 1,
                available: 0,
            }),
        }
    }
}

/// Base to secondary currency rates, one per trading day.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeRates {
    rates: HashMap<Date, f64>,
}

impl ExchangeRates {
    pub fn new(dates: &[Date], rates: &[f64]) -> Result<Self> {
        if dates.len() != rates.len() {
            return Err(SimulationError::MisalignedData {
                expected: dates.len(),
                actual: rates.len(),
            });
        }
        if let Some((date, rate)) = dates.iter().zip(rates).find(|(_, r)| !(**r > 0.0)) {
            return Err(
                SimulationError::invalid_config(format!("exchange rate must be positive, got {rate}"))
                    .on_date(*date),
            );
        }
        Ok(Self {
            rates: dates.iter().copied().zip(rates.iter().copied()).collect(),
        })
    }

    /// The same rate on every date.
    pub fn constant(dates: &[Date], rate: f64) -> Result<Self> {
        Self::new(dates, &vec![rate; dates.len()])
    }

    pub fn rate_on(&self, date: Date) -> Result<f64> {
        self.rates.get(&date).copied().ok_or_else(|| {
            SimulationError::MissingPrice {
                ticker: "exchange rate".to_string(),
            }
            .on_date(date)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn sample() -> MarketData {
        let dates = vec![
            date!(2024 - 12 - 30),
            date!(2024 - 12 - 31),
            date!(2025 - 01 - 02),
            date!(2025 - 01 - 03),
        ];
        let mut prices = HashMap::new();
        prices.insert("AAPL".to_string(), vec![100.0, 101.0, 102.0, 103.0]);
        prices.insert("^GSPC".to_string(), vec![50.0, 50.5, 51.0, 50.0]);
        MarketData::new(dates, prices).unwrap()
    }

    #[test]
    fn test_period_bounds() {
        assert_eq!(
            period_bounds(2024, 2).unwrap(),
            (date!(2024 - 02 - 01), date!(2024 - 02 - 29))
        );
        assert!(period_bounds(2025, 0).is_err());
    }

    #[test]
    fn test_daily_returns() {
        let returns = daily_returns(&[100.0, 110.0, 99.0]);
        assert_eq!(returns.len(), 2);
        assert!((returns[0] - 0.1).abs() < 1e-12);
        assert!((returns[1] + 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_split_history_and_period() {
        let data = sample();
        let (start, end) = period_bounds(2025, 1).unwrap();
        let period = data.between(start, end).unwrap();
        let history = data.before(start).unwrap();
        assert_eq!(period.len(), 2);
        assert_eq!(history.len(), 2);
        assert_eq!(period.series("AAPL").unwrap(), &[102.0, 103.0]);
        assert_eq!(period.prices_on(1)["^GSPC"], 50.0);
    }

    #[test]
    fn test_rejects_unsorted_dates() {
        let dates = vec![date!(2025 - 01 - 03), date!(2025 - 01 - 02)];
        let mut prices = HashMap::new();
        prices.insert("AAPL".to_string(), vec![1.0, 2.0]);
        assert!(MarketData::new(dates, prices).is_err());
    }

    #[test]
    fn test_rejects_misaligned_and_non_positive_prices() {
        let dates = vec![date!(2025 - 01 - 02), date!(2025 - 01 - 03)];
        let mut prices = HashMap::new();
        prices.insert("AAPL".to_string(), vec![1.0]);
        let err = MarketData::new(dates.clone(), prices).unwrap_err();
        assert!(matches!(err.root_cause(), SimulationError::MisalignedData { .. }));

        let mut prices = HashMap::new();
        prices.insert("AAPL".to_string(), vec![1.0, 0.0]);
        assert!(MarketData::new(dates, prices).is_err());
    }

    fn history(points: &[(Date, f64)]) -> Vec<(Date, f64)> {
        points.to_vec()
    }

    #[test]
    fn test_align_keeps_only_shared_dates_in_order() {
        let mut histories = HashMap::new();
        histories.insert(
            "AAPL".to_string(),
            history(&[
                (date!(2025 - 01 - 06), 104.0),
                (date!(2025 - 01 - 02), 101.0),
                (date!(2025 - 01 - 03), 102.0),
                (date!(2025 - 01 - 07), 105.0),
            ]),
        );
        histories.insert(
            "^GSPC".to_string(),
            history(&[
                (date!(2025 - 01 - 02), 50.0),
                (date!(2025 - 01 - 06), 52.0),
                (date!(2025 - 01 - 07), 53.0),
                (date!(2025 - 01 - 08), 54.0),
            ]),
        );

        let data = align(histories).unwrap();
        assert_eq!(
            data.dates(),
            &[date!(2025 - 01 - 02), date!(2025 - 01 - 06), date!(2025 - 01 - 07)]
        );
        assert_eq!(data.series("AAPL").unwrap(), &[101.0, 104.0, 105.0]);
        assert_eq!(data.series("^GSPC").unwrap(), &[50.0, 52.0, 53.0]);
    }

    #[test]
    fn test_align_without_shared_dates_fails() {
        let mut histories = HashMap::new();
        histories.insert("AAPL".to_string(), history(&[(date!(2025 - 01 - 02), 101.0)]));
        histories.insert("^GSPC".to_string(), history(&[(date!(2025 - 01 - 03), 50.0)]));
        assert!(matches!(
            align(histories),
            Err(SimulationError::InsufficientData { available: 0, .. })
        ));
        assert!(align(HashMap::new()).is_err());
    }

    #[test]
    fn test_exchange_rates() {
        let dates = [date!(2025 - 01 - 02), date!(2025 - 01 - 03)];
        let rates = ExchangeRates::constant(&dates, 1.35).unwrap();
        assert_eq!(rates.rate_on(date!(2025 - 01 - 03)).unwrap(), 1.35);
        assert!(rates.rate_on(date!(2025 - 01 - 06)).is_err());
        assert!(ExchangeRates::new(&dates, &[1.3]).is_err());
    }
}
