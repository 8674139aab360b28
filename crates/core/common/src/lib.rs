//! Common types for the `ShrivenQ` candle execution engine
//!
//! Candles, orders, balances and the two capability traits the engine is
//! written against:
//! - [`Feeder`]: any source of candles (exchange, CSV replay, paper wallet proxy)
//! - [`Broker`]: any venue that accepts orders (exchange adapter or simulated ledger)

#![deny(clippy::all)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

pub mod candle;
pub mod error;
pub mod exchange;
pub mod market;
pub mod order;

pub use candle::{Candle, CandleMetadata, Metric};
pub use error::{BrokerError, BrokerResult, FeedError, FeedResult, MetadataError};
pub use exchange::{Broker, CandleSubscription, Feeder};
pub use market::{
    Account, AssetBalance, AssetInfo, Balance, FeedKey, Position, Timeframe, split_asset_quote,
};
pub use order::{Order, OrderStatus, OrderType, Side};
