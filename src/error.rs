//! Error types for the simulation core.

use polars::prelude::PolarsError;
use thiserror::Error;
use time::Date;

pub type Result<T> = std::result::Result<T, SimulationError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationError {
    /// Bad capital, tickers, prices or policy values. Fatal before day 1.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("insufficient data: need at least {required} aligned observations, got {available}")]
    InsufficientData { required: usize, available: usize },

    /// The market return series has zero variance, so beta is undefined.
    #[error("degenerate input: market return variance is {variance:e}")]
    DegenerateInput { variance: f64 },

    #[error("misaligned series: expected {expected} observations, got {actual}")]
    MisalignedData { expected: usize, actual: usize },

    #[error("missing price for {ticker}")]
    MissingPrice { ticker: String },

    #[error("no beta estimate for {ticker}")]
    MissingBeta { ticker: String },

    #[error("empty portfolio: total absolute exposure is {gross_exposure}")]
    EmptyPortfolio { gross_exposure: f64 },

    #[error(
        "rebalance infeasible: beta {beta:.6} cannot reach {target:.6} +/- {tolerance} ({reason})"
    )]
    RebalanceInfeasible {
        beta: f64,
        target: f64,
        tolerance: f64,
        reason: String,
    },

    /// A reporting table could not be assembled.
    #[error("report table: {message}")]
    Report { message: String },

    #[error("{ticker}: {source}")]
    Instrument {
        ticker: String,
        #[source]
        source: Box<SimulationError>,
    },

    #[error("{date}: {source}")]
    OnDate {
        date: Date,
        #[source]
        source: Box<SimulationError>,
    },
}

impl SimulationError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    pub fn missing_price(ticker: impl Into<String>) -> Self {
        Self::MissingPrice {
            ticker: ticker.into(),
        }
    }

    pub fn infeasible(beta: f64, target: f64, tolerance: f64, reason: impl Into<String>) -> Self {
        Self::RebalanceInfeasible {
            beta,
            target,
            tolerance,
            reason: reason.into(),
        }
    }

    /// Attach the instrument the error was raised for.
    pub fn for_instrument(self, ticker: impl Into<String>) -> Self {
        Self::Instrument {
            ticker: ticker.into(),
            source: Box::new(self),
        }
    }

    /// Attach the trading day the error was raised on.
    pub fn on_date(self, date: Date) -> Self {
        Self::OnDate {
            date,
            source: Box::new(self),
        }
    }

    /// The underlying error with every context wrapper removed.
    pub fn root_cause(&self) -> &SimulationError {
        match self {
            Self::Instrument { source, .. } | Self::OnDate { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<PolarsError> for SimulationError {
    fn from(err: PolarsError) -> Self {
        Self::Report {
            message: err.to_string(),
        }
    }
}
