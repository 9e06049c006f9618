//! Analytical core for NCAA basketball market modeling: canonical data
//! ingestion behind a quality gate, leakage-free feature extraction, and a
//! walk-forward backtest with Kelly staking and closing-line-value tracking.
//!
//! Data flows one way: raw feed rows -> quality gate -> entity builder ->
//! append-only sqlite store -> immutable [`store::CanonicalSnapshot`] ->
//! pure feature/rating functions -> [`backtest::run_backtest`]. Prediction
//! models live outside the crate and plug in through
//! [`backtest::Predictor`].

pub mod backtest;
pub mod builder;
pub mod entities;
pub mod feed;
pub mod features;
pub mod market;
pub mod quality;
pub mod ratings;
pub mod resolver;
pub mod season;
pub mod store;
