//! Broker wrapper that records the strategy's orders and trade results
//!
//! The controller is the [`Broker`] strategies see. Every order created
//! through it is remembered; resting orders are refreshed from the wrapped
//! broker on each closed candle (and on a timer in live mode) and fills are
//! folded into a per-pair position whose closing trades become wins or losses.

use async_trait::async_trait;
use common::{
    Account, Broker, BrokerResult, Candle, Order, OrderStatus, Position, Side,
};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{Span, debug, info, warn};

/// Closed-trade statistics of one pair
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TradeSummary {
    /// Trading pair
    pub pair: String,
    /// Realized profit of each winning trade
    pub wins: Vec<f64>,
    /// Realized loss of each losing trade (negative)
    pub losses: Vec<f64>,
    /// Traded notional
    pub volume: f64,
}

impl TradeSummary {
    /// Number of closed trades
    #[must_use]
    pub fn trades(&self) -> usize {
        self.wins.len() + self.losses.len()
    }

    /// Sum of wins and losses
    #[must_use]
    pub fn profit(&self) -> f64 {
        self.wins.iter().sum::<f64>() + self.losses.iter().sum::<f64>()
    }

    /// Winning trades as a fraction of all trades
    #[must_use]
    pub fn win_rate(&self) -> f64 {
        match self.trades() {
            0 => 0.0,
            n => self.wins.len() as f64 / n as f64,
        }
    }

    /// Average win over average loss
    #[must_use]
    pub fn payoff(&self) -> f64 {
        let avg_loss = mean(&self.losses).abs();
        if avg_loss == 0.0 {
            0.0
        } else {
            mean(&self.wins) / avg_loss
        }
    }

    /// Gross profit over gross loss
    #[must_use]
    pub fn profit_factor(&self) -> f64 {
        let gross_loss = self.losses.iter().sum::<f64>().abs();
        if gross_loss == 0.0 {
            0.0
        } else {
            self.wins.iter().sum::<f64>() / gross_loss
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

impl fmt::Display for TradeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | trades {} | win {:.1}% | payoff {:.2} | profit factor {:.2} | profit {:.2} | volume {:.2}",
            self.pair,
            self.trades(),
            self.win_rate() * 100.0,
            self.payoff(),
            self.profit_factor(),
            self.profit(),
            self.volume
        )
    }
}

/// Net position opened by the strategy on one pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyPosition {
    /// Long for a buy-opened position
    pub side: Side,
    /// Open quantity, always positive
    pub quantity: f64,
    /// Average entry price
    pub avg_price: f64,
}

#[derive(Default)]
struct Book {
    orders: Vec<Order>,
    positions: FxHashMap<String, StrategyPosition>,
    summaries: FxHashMap<String, TradeSummary>,
}

impl Book {
    fn record(&mut self, order: Order, span: &Span) {
        if order.status == OrderStatus::Filled {
            self.apply_fill(&order, span);
        }
        self.orders.push(order);
    }

    fn update(&mut self, order: Order, span: &Span) {
        let Some(index) = self
            .orders
            .iter()
            .position(|o| o.exchange_id == order.exchange_id)
        else {
            return;
        };
        if self.orders[index].status == order.status {
            return;
        }
        debug!(parent: span, id = order.exchange_id, status = %order.status, "order updated");
        if order.status == OrderStatus::Filled {
            self.apply_fill(&order, span);
        }
        self.orders[index] = order;
    }

    fn apply_fill(&mut self, order: &Order, span: &Span) {
        let summary = self
            .summaries
            .entry(order.pair.clone())
            .or_insert_with(|| TradeSummary {
                pair: order.pair.clone(),
                ..TradeSummary::default()
            });
        summary.volume += order.quantity * order.price;

        let Some(mut position) = self.positions.remove(&order.pair) else {
            self.positions.insert(
                order.pair.clone(),
                StrategyPosition {
                    side: order.side,
                    quantity: order.quantity,
                    avg_price: order.price,
                },
            );
            return;
        };

        if position.side == order.side {
            let quantity = position.quantity + order.quantity;
            position.avg_price =
                (position.avg_price * position.quantity + order.price * order.quantity) / quantity;
            position.quantity = quantity;
            self.positions.insert(order.pair.clone(), position);
            return;
        }

        let closed = position.quantity.min(order.quantity);
        let profit = match position.side {
            Side::Buy => (order.price - position.avg_price) * closed,
            Side::Sell => (position.avg_price - order.price) * closed,
        };
        if profit >= 0.0 {
            summary.wins.push(profit);
        } else {
            summary.losses.push(profit);
        }
        info!(parent: span, pair = %order.pair, profit, closed, "trade closed");

        let remaining = position.quantity - closed;
        let excess = order.quantity - closed;
        if remaining > 0.0 {
            position.quantity = remaining;
            self.positions.insert(order.pair.clone(), position);
        } else if excess > 0.0 {
            self.positions.insert(
                order.pair.clone(),
                StrategyPosition {
                    side: order.side,
                    quantity: excess,
                    avg_price: order.price,
                },
            );
        }
    }
}

/// Order bookkeeping in front of a broker
pub struct OrderController {
    broker: Arc<dyn Broker>,
    book: RwLock<Book>,
    span: Span,
}

impl OrderController {
    /// Wrap a broker
    pub fn new(broker: Arc<dyn Broker>, span: Span) -> Self {
        Self {
            broker,
            book: RwLock::new(Book::default()),
            span,
        }
    }

    /// Every order created through the controller
    pub fn orders(&self) -> Vec<Order> {
        self.book.read().orders.clone()
    }

    /// Open strategy position on a pair
    pub fn strategy_position(&self, pair: &str) -> Option<StrategyPosition> {
        self.book.read().positions.get(pair).copied()
    }

    /// Trade statistics of a pair
    pub fn summary(&self, pair: &str) -> Option<TradeSummary> {
        self.book.read().summaries.get(pair).cloned()
    }

    /// Trade statistics of every traded pair, sorted by pair
    pub fn summaries(&self) -> Vec<TradeSummary> {
        let mut summaries: Vec<TradeSummary> =
            self.book.read().summaries.values().cloned().collect();
        summaries.sort_by(|a, b| a.pair.cmp(&b.pair));
        summaries
    }

    /// Re-read every resting order from the broker
    pub async fn refresh(&self) {
        let resting: Vec<(String, i64)> = self
            .book
            .read()
            .orders
            .iter()
            .filter(|o| o.status == OrderStatus::New)
            .map(|o| (o.pair.clone(), o.exchange_id))
            .collect();

        for (pair, id) in resting {
            match self.broker.order(&pair, id).await {
                Ok(order) => self.book.write().update(order, &self.span),
                Err(e) => warn!(parent: &self.span, %pair, id, error = %e, "order refresh failed"),
            }
        }
    }

    /// Refresh resting orders after a closed candle
    pub async fn on_candle(&self, candle: &Candle) {
        if candle.complete {
            self.refresh().await;
        }
    }

    /// Refresh resting orders on a timer until shutdown
    pub fn start(
        self: &Arc<Self>,
        period: Duration,
        shutdown: &broadcast::Sender<()>,
    ) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        let mut shutdown = shutdown.subscribe();
        info!(parent: &self.span, period_ms = period.as_millis() as u64, "order controller started");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => controller.refresh().await,
                }
            }
            debug!(parent: &controller.span, "order controller stopped");
        })
    }

    fn record(&self, order: &Order) {
        self.book.write().record(order.clone(), &self.span);
    }
}

#[async_trait]
impl Broker for OrderController {
    async fn account(&self) -> BrokerResult<Account> {
        self.broker.account().await
    }

    async fn position(&self, pair: &str) -> BrokerResult<Position> {
        self.broker.position(pair).await
    }

    async fn order(&self, pair: &str, id: i64) -> BrokerResult<Order> {
        let order = self.broker.order(pair, id).await?;
        self.book.write().update(order.clone(), &self.span);
        Ok(order)
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
        let orders = self
            .broker
            .create_order_oco(side, pair, quantity, price, stop, stop_limit)
            .await?;
        for order in &orders {
            self.record(order);
        }
        Ok(orders)
    }

    async fn create_order_limit(
        &self,
        side: Side,
        pair: &str,
        quantity: f64,
        limit: f64,
    ) -> BrokerResult<Order> {
        let order = self
            .broker
            .create_order_limit(side, pair, quantity, limit)
            .await?;
        self.record(&order);
        Ok(order)
    }

    async fn create_order_market(
        &self,
        side: Side,
        pair: &str,
        quantity: f64,
    ) -> BrokerResult<Order> {
        let order = self.broker.create_order_market(side, pair, quantity).await?;
        self.record(&order);
        Ok(order)
    }

    async fn create_order_market_quote(
        &self,
        side: Side,
        pair: &str,
        quote_quantity: f64,
    ) -> BrokerResult<Order> {
        let order = self
            .broker
            .create_order_market_quote(side, pair, quote_quantity)
            .await?;
        self.record(&order);
        Ok(order)
    }

    async fn create_order_stop(&self, pair: &str, quantity: f64, limit: f64) -> BrokerResult<Order> {
        let order = self.broker.create_order_stop(pair, quantity, limit).await?;
        self.record(&order);
        Ok(order)
    }

    async fn cancel(&self, order: &Order) -> BrokerResult<()> {
        self.broker.cancel(order).await?;
        // OCO siblings change state too.
        self.refresh().await;
        Ok(())
    }
}

impl fmt::Debug for OrderController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let book = self.book.read();
        f.debug_struct("OrderController")
            .field("orders", &book.orders.len())
            .field("positions", &book.positions.len())
            .finish()
    }
}
