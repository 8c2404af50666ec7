//! Core domain types and logic.

pub mod ohlcv;
pub mod split;
pub mod candlestick;
pub mod moving_average;
pub mod trend;
pub mod chart;
pub mod pattern;
pub mod backtest;
pub mod resolver;
pub mod stats;
pub mod orchestrator;
pub mod error;
