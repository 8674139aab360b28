//! Simulated exchange account
//!
//! [`PaperWallet`] implements [`Broker`] by matching one account's resting
//! orders against the candles it is shown through [`PaperWallet::on_candle`].
//! With a data source attached it also implements [`Feeder`] by proxying, so
//! the same object can be wired in as both sides of the engine.

use crate::config::WalletConfig;
use crate::drawdown::AssetValue;
use crate::ledger::Ledger;
use crate::summary::WalletSummary;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    Account, AssetBalance, AssetInfo, Broker, BrokerResult, Candle, CandleSubscription, FeedError,
    FeedResult, Feeder, Order, Position, Side, Timeframe,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{Span, info};

/// Paper trading wallet
pub struct PaperWallet {
    ledger: RwLock<Ledger>,
    feeder: Option<Arc<dyn Feeder>>,
}

impl PaperWallet {
    /// Create a wallet with the configured starting balances
    pub fn new(config: WalletConfig, span: Span) -> Self {
        info!(parent: &span, base_coin = %config.base_coin, assets = config.assets.len(), "paper wallet created");
        Self {
            ledger: RwLock::new(Ledger::new(config, span)),
            feeder: None,
        }
    }

    /// Proxy [`Feeder`] calls to a data source
    #[must_use]
    pub fn with_feeder(mut self, feeder: Arc<dyn Feeder>) -> Self {
        self.feeder = Some(feeder);
        self
    }

    /// Record a candle, fill triggered orders and mark equity on closed bars
    pub fn on_candle(&self, candle: &Candle) {
        self.ledger.write().on_candle(candle);
    }

    /// Free and locked balance of an asset
    pub fn balance(&self, asset: &str) -> AssetBalance {
        self.ledger.read().balance(&asset.to_uppercase())
    }

    /// `(long, short)` average entry price of a pair
    pub fn average_price(&self, pair: &str) -> (f64, f64) {
        self.ledger.read().average_price(pair)
    }

    /// Traded notional of a pair
    pub fn volume(&self, pair: &str) -> f64 {
        self.ledger.read().volume(pair)
    }

    /// Last close seen for a pair
    pub fn last_price(&self, pair: &str) -> Option<f64> {
        self.ledger.read().last_price(pair)
    }

    /// Mark-to-market history of an asset
    pub fn asset_values(&self, asset: &str) -> Vec<AssetValue> {
        self.ledger.read().asset_values(asset)
    }

    /// Aggregate equity history
    pub fn equity_values(&self) -> Vec<AssetValue> {
        self.ledger.read().equity_values().to_vec()
    }

    /// Every order ever created, in creation order
    pub fn orders(&self) -> Vec<Order> {
        self.ledger.read().orders().to_vec()
    }

    /// Performance snapshot
    pub fn summary(&self) -> WalletSummary {
        self.ledger.read().summary()
    }

    fn feeder(&self, operation: &'static str) -> FeedResult<Arc<dyn Feeder>> {
        self.feeder
            .clone()
            .ok_or(FeedError::Unsupported { operation })
    }
}

#[async_trait]
impl Broker for PaperWallet {
    async fn account(&self) -> BrokerResult<Account> {
        Ok(self.ledger.read().account())
    }

    async fn position(&self, pair: &str) -> BrokerResult<Position> {
        self.ledger.read().position(pair)
    }

    async fn order(&self, pair: &str, id: i64) -> BrokerResult<Order> {
        self.ledger.read().order(pair, id)
    }

    async fn create_order_oco(
        &self,
        side: Side,
        pair: &str,
        quantity: f64,
        price: f64,
        stop: f64,
        stop_limit: f64,
    ) -> BrokerResult<Vec<Order>> {
        self.ledger
            .write()
            .create_order_oco(side, pair, quantity, price, stop, stop_limit)
    }

    async fn create_order_limit(
        &self,
        side: Side,
        pair: &str,
        quantity: f64,
        limit: f64,
    ) -> BrokerResult<Order> {
        self.ledger
            .write()
            .create_order_limit(side, pair, quantity, limit)
    }

    async fn create_order_market(
        &self,
        side: Side,
        pair: &str,
        quantity: f64,
    ) -> BrokerResult<Order> {
        self.ledger.write().create_order_market(side, pair, quantity)
    }

    async fn create_order_market_quote(
        &self,
        side: Side,
        pair: &str,
        quote_quantity: f64,
    ) -> BrokerResult<Order> {
        self.ledger
            .write()
            .create_order_market_quote(side, pair, quote_quantity)
    }

    async fn create_order_stop(&self, pair: &str, quantity: f64, limit: f64) -> BrokerResult<Order> {
        self.ledger.write().create_order_stop(pair, quantity, limit)
    }

    async fn cancel(&self, order: &Order) -> BrokerResult<()> {
        self.ledger.write().cancel(order.exchange_id)
    }
}

#[async_trait]
impl Feeder for PaperWallet {
    fn assets_info(&self, pair: &str) -> FeedResult<AssetInfo> {
        match &self.feeder {
            Some(feeder) => feeder.assets_info(pair),
            None => {
                let (asset, quote) = self.ledger.read().split(pair).map_err(|e| FeedError::Parse {
                    message: e.to_string(),
                })?;
                Ok(AssetInfo::unrestricted(asset, quote))
            }
        }
    }

    async fn last_quote(&self, pair: &str) -> FeedResult<f64> {
        self.feeder("last_quote")?.last_quote(pair).await
    }

    async fn candles_by_period(
        &self,
        pair: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> FeedResult<Vec<Candle>> {
        self.feeder("candles_by_period")?
            .candles_by_period(pair, timeframe, start, end)
            .await
    }

    async fn candles_by_limit(
        &self,
        pair: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> FeedResult<Vec<Candle>> {
        self.feeder("candles_by_limit")?
            .candles_by_limit(pair, timeframe, limit)
            .await
    }

    async fn candles_subscription(
        &self,
        pair: &str,
        timeframe: Timeframe,
        shutdown: broadcast::Receiver<()>,
    ) -> FeedResult<CandleSubscription> {
        self.feeder("candles_subscription")?
            .candles_subscription(pair, timeframe, shutdown)
            .await
    }
}

impl std::fmt::Debug for PaperWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaperWallet")
            .field("orders", &self.ledger.read().orders().len())
            .field("proxying", &self.feeder.is_some())
            .finish()
    }
}
