//! Capability traits the engine is written against
//!
//! Core code depends on the narrow capability it needs: a [`Feeder`] for
//! candles or a [`Broker`] for orders. Exchange adapters, replay sources and
//! the simulated ledger implement them.

use crate::candle::Candle;
use crate::error::{BrokerResult, FeedError, FeedResult};
use crate::market::{Account, AssetInfo, Position, Timeframe};
use crate::order::{Order, Side};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};

/// Live candle stream for one pair and timeframe
#[derive(Debug)]
pub struct CandleSubscription {
    /// Candles in arrival order; closes when the upstream ends
    pub candles: mpsc::Receiver<Candle>,
    /// Non-fatal upstream errors
    pub errors: mpsc::Receiver<FeedError>,
}

/// Source of market data
#[async_trait]
pub trait Feeder: Send + Sync {
    /// Trading limits for a pair
    ///
    /// # Errors
    /// Returns an error if the pair is unknown to the source.
    fn assets_info(&self, pair: &str) -> FeedResult<AssetInfo>;

    /// Latest traded price
    ///
    /// # Errors
    /// Returns an error if no price is available.
    async fn last_quote(&self, pair: &str) -> FeedResult<f64>;

    /// Closed candles with `start <= time <= end`
    ///
    /// # Errors
    /// Returns an error if the source cannot serve the range.
    async fn candles_by_period(
        &self,
        pair: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> FeedResult<Vec<Candle>>;

    /// The most recent `limit` closed candles, oldest first
    ///
    /// # Errors
    /// Returns an error if the source cannot serve the request.
    async fn candles_by_limit(
        &self,
        pair: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> FeedResult<Vec<Candle>>;

    /// Open a candle stream; the stream ends when `shutdown` fires
    ///
    /// # Errors
    /// Returns an error if the upstream connection cannot be established.
    async fn candles_subscription(
        &self,
        pair: &str,
        timeframe: Timeframe,
        shutdown: broadcast::Receiver<()>,
    ) -> FeedResult<CandleSubscription>;
}

/// Venue that accepts and reports orders
#[async_trait]
pub trait Broker: Send + Sync {
    /// Balances of every asset
    ///
    /// # Errors
    /// Returns an error if the venue cannot be queried.
    async fn account(&self) -> BrokerResult<Account>;

    /// Asset and quote totals for a pair
    ///
    /// # Errors
    /// Returns an error if the pair is unknown or the venue cannot be queried.
    async fn position(&self, pair: &str) -> BrokerResult<Position>;

    /// Look up an order by exchange id
    ///
    /// # Errors
    /// Returns [`crate::BrokerError::OrderNotFound`] for unknown ids.
    async fn order(&self, pair: &str, id: i64) -> BrokerResult<Order>;

    /// Create two linked orders; a fill of one cancels the other
    ///
    /// # Errors
    /// Returns an error if the quantity is invalid or funds are insufficient.
    async fn create_order_oco(
        &self,
        side: Side,
        pair: &str,
        quantity: f64,
        price: f64,
        stop: f64,
        stop_limit: f64,
    ) -> BrokerResult<Vec<Order>>;

    /// Create a resting limit order
    ///
    /// # Errors
    /// Returns an error if the quantity is invalid or funds are insufficient.
    async fn create_order_limit(
        &self,
        side: Side,
        pair: &str,
        quantity: f64,
        limit: f64,
    ) -> BrokerResult<Order>;

    /// Create an immediately executed market order
    ///
    /// # Errors
    /// Returns an error if the quantity is invalid, no price is known, or
    /// funds are insufficient.
    async fn create_order_market(&self, side: Side, pair: &str, quantity: f64)
    -> BrokerResult<Order>;

    /// Create a market order sized in quote currency
    ///
    /// # Errors
    /// Same as [`Broker::create_order_market`].
    async fn create_order_market_quote(
        &self,
        side: Side,
        pair: &str,
        quote_quantity: f64,
    ) -> BrokerResult<Order>;

    /// Create a resting sell stop-loss order
    ///
    /// # Errors
    /// Returns an error if the quantity is invalid or funds are insufficient.
    async fn create_order_stop(&self, pair: &str, quantity: f64, limit: f64)
    -> BrokerResult<Order>;

    /// Cancel a resting order
    ///
    /// # Errors
    /// Returns an error if the order is unknown or no longer resting.
    async fn cancel(&self, order: &Order) -> BrokerResult<()>;
}
