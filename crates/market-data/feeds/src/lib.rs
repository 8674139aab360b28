//! Candle feeds for the execution engine
//!
//! - [`FeedRouter`]: one upstream subscription per `(pair, timeframe)` fanned
//!   out to any number of subscribers
//! - [`HistoricalFeed`]: in-memory [`common::Feeder`] that replays stored candles
//! - [`csv`]: loader for headered OHLCV files
//! - [`retry`]: bounded exponential backoff for upstream connections

#![deny(clippy::all)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

pub mod csv;
pub mod historical;
pub mod retry;
pub mod router;

pub use historical::{HistoricalFeed, HistoricalFeedConfig};
pub use retry::{RetryConfig, retry_with_backoff};
pub use router::{CandleSink, FeedRouter, FeedRouterConfig, SubscriberId};
