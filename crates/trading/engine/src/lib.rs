//! Candle execution engine
//!
//! Drives a [`Strategy`] over per-pair candle streams:
//! - Backtest: historical feeds replayed in timestamp order through an
//!   [`bus::EventSequencer`]
//! - Paper: live feeds, orders matched by a [`sim::PaperWallet`]
//! - Live: live feeds, orders forwarded to an exchange [`common::Broker`]
//!
//! The strategy trades through an [`OrderController`], which records every
//! order and produces per-pair [`TradeSummary`] statistics.

#![deny(clippy::all)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod dataframe;
pub mod error;
pub mod orchestrator;
pub mod order_controller;
pub mod strategy;

// Re-exports
pub use config::{EngineConfig, ExecutionMode};
pub use dataframe::{DataFrame, SeriesKey};
pub use error::{DataFrameError, EngineError, EngineResult};
pub use orchestrator::Engine;
pub use order_controller::{OrderController, StrategyPosition, TradeSummary};
pub use strategy::{Strategy, StrategyController};
