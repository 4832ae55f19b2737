//! Market-neutral long/short equity simulation.
//!
//! A book is opened with equal gross exposure on both legs, then simulated
//! day by day over one calendar month. Whenever the exposure-weighted beta
//! drifts outside the configured tolerance the legs are resized back to the
//! target, paying a per-share transaction fee; a daily management fee is
//! charged and each close is converted to a secondary currency.

pub mod allocation;
pub mod assets;
pub mod beta;
pub mod config;
pub mod error;
pub mod market_data;
pub mod metrics;
pub mod portfolio;
pub mod rebalance;
pub mod safe_money;
pub mod simulation;

pub use config::SimulationConfig;
pub use error::{Result, SimulationError};
pub use portfolio::Portfolio;
pub use simulation::{simulate_month, DailyRecord, Simulation, SimulationResult};
