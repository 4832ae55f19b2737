use std::collections::HashMap;

use anyhow::{Context, Result};
use futures::{stream::FuturesUnordered, StreamExt};
use time::{Date, OffsetDateTime, Time};
use tracing::info;
use yahoo_finance_api::YahooConnector;

use crate::market_data::{align, MarketData};

/// Which leg of the book an instrument belongs to. Fixed for the month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Long,
    Short,
}

impl Role {
    /// Sign of a share count held in this role.
    pub fn sign(&self) -> f64 {
        match self {
            Role::Long => 1.0,
            Role::Short => -1.0,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Long => write!(f, "long"),
            Role::Short => write!(f, "short"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instrument {
    pub ticker: String,
    pub role: Role,
    pub beta: f64,
}

/// Daily adjusted closes for `ticker` between `start` and `end`, inclusive.
pub async fn fetch_price_history(
    client: &YahooConnector,
    ticker: &str,
    start: Date,
    end: Date,
) -> Result<Vec<(Date, f64)>> {
    let start = OffsetDateTime::new_utc(start, Time::MIDNIGHT);
    // the end bound is exclusive upstream
    let end = OffsetDateTime::new_utc(end.next_day().unwrap_or(end), Time::MIDNIGHT);

    let res = client
        .get_quote_history(ticker, start, end)
        .await
        .with_context(|| format!("downloading {ticker}"))?;
    let quotes = res.quotes().with_context(|| format!("parsing quotes for {ticker}"))?;

    let mut history = Vec::with_capacity(quotes.len());
    for quote in quotes {
        let date = OffsetDateTime::from_unix_timestamp(quote.timestamp as i64)?.date();
        let price = if quote.adjclose > 0.0 {
            quote.adjclose
        } else {
            quote.close
        };
        history.push((date, price));
    }
    history.sort_by_key(|(date, _)| *date);
    history.dedup_by_key(|(date, _)| *date);
    Ok(history)
}

/// Download every ticker concurrently and align them on their common dates.
pub async fn fetch_market_data(tickers: &[String], start: Date, end: Date) -> Result<MarketData> {
    let client = YahooConnector::new()?;

    let mut futures: FuturesUnordered<_> = tickers
        .iter()
        .map(|ticker| {
            let client = &client;
            async move {
                let history = fetch_price_history(client, ticker, start, end).await;
                (ticker.clone(), history)
            }
        })
        .collect();

    let mut histories = HashMap::new();
    while let Some((ticker, history)) = futures.next().await {
        let history = history?;
        if history.is_empty() {
            anyhow::bail!("no price data for {ticker} between {start} and {end}");
        }
        info!(%ticker, days = history.len(), "downloaded price history");
        histories.insert(ticker, history);
    }

    Ok(align(histories)?)
}
