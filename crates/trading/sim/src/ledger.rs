//! Order state machine and balance accounting of the simulated exchange
//!
//! Every resting order owns one reservation (OCO legs share the group's).
//! Creating the order moves the reservation from free to lock, cancelling
//! moves it back, and a fill first releases it and then settles the trade
//! against free balances at the fill price.
//!
//! Short positions are modelled as a negative free asset balance backed by
//! quote collateral. Covering a short returns
//! `cover × (2 × avg_short − price)` to the quote balance.

use crate::config::WalletConfig;
use crate::drawdown::{AssetValue, max_drawdown};
use crate::summary::{Holding, WalletSummary};
use chrono::{DateTime, Utc};
use common::{
    Account, AssetBalance, Balance, BrokerError, BrokerResult, Candle, Order, OrderStatus,
    OrderType, Position, Side, split_asset_quote,
};
use rustc_hash::FxHashMap;
use tracing::{Span, debug, info};

/// Funds held back for a resting order or OCO group
#[derive(Debug, Clone, PartialEq)]
struct Reservation {
    asset: String,
    quote: String,
    asset_qty: f64,
    quote_qty: f64,
}

/// Mutable wallet state; callers serialize access
pub(crate) struct Ledger {
    base_coin: String,
    maker_fee: f64,
    taker_fee: f64,
    counter: i64,
    assets: FxHashMap<String, AssetBalance>,
    avg_long: FxHashMap<String, f64>,
    avg_short: FxHashMap<String, f64>,
    volume: FxHashMap<String, f64>,
    last_candle: FxHashMap<String, Candle>,
    first_candle: FxHashMap<String, Candle>,
    asset_pairs: FxHashMap<String, String>,
    orders: Vec<Order>,
    reservations: FxHashMap<i64, Reservation>,
    asset_values: FxHashMap<String, Vec<AssetValue>>,
    equity_values: Vec<AssetValue>,
    initial_value: Option<f64>,
    span: Span,
}

impl Ledger {
    pub(crate) fn new(config: WalletConfig, span: Span) -> Self {
        let base_coin = config.base_coin.to_uppercase();
        let assets = config
            .assets
            .into_iter()
            .map(|(asset, amount)| {
                (
                    asset.to_uppercase(),
                    AssetBalance {
                        free: amount,
                        lock: 0.0,
                    },
                )
            })
            .collect();

        Self {
            base_coin,
            maker_fee: config.maker_fee,
            taker_fee: config.taker_fee,
            counter: 0,
            assets,
            avg_long: FxHashMap::default(),
            avg_short: FxHashMap::default(),
            volume: FxHashMap::default(),
            last_candle: FxHashMap::default(),
            first_candle: FxHashMap::default(),
            asset_pairs: FxHashMap::default(),
            orders: Vec::new(),
            reservations: FxHashMap::default(),
            asset_values: FxHashMap::default(),
            equity_values: Vec::new(),
            initial_value: None,
            span,
        }
    }

    fn next_id(&mut self) -> i64 {
        self.counter += 1;
        self.counter
    }

    fn clock(&self, pair: &str) -> DateTime<Utc> {
        self.last_candle
            .get(pair)
            .map_or_else(Utc::now, |candle| candle.time)
    }

    /// Asset and quote of a pair, preferring the wallet's base coin as quote
    pub(crate) fn split(&self, pair: &str) -> BrokerResult<(String, String)> {
        let upper = pair.trim().to_uppercase();
        if !upper.contains(['/', '-'])
            && upper.len() > self.base_coin.len()
            && upper.ends_with(&self.base_coin)
        {
            let asset = &upper[..upper.len() - self.base_coin.len()];
            return Ok((asset.to_string(), self.base_coin.clone()));
        }
        split_asset_quote(&upper).ok_or_else(|| BrokerError::UnknownPair {
            pair: pair.to_string(),
        })
    }

    pub(crate) fn balance(&self, asset: &str) -> AssetBalance {
        self.assets.get(asset).copied().unwrap_or_default()
    }

    fn balance_mut(&mut self, asset: &str) -> &mut AssetBalance {
        self.assets.entry(asset.to_string()).or_default()
    }

    pub(crate) fn average_price(&self, pair: &str) -> (f64, f64) {
        (
            self.avg_long.get(pair).copied().unwrap_or(0.0),
            self.avg_short.get(pair).copied().unwrap_or(0.0),
        )
    }

    pub(crate) fn volume(&self, pair: &str) -> f64 {
        self.volume.get(pair).copied().unwrap_or(0.0)
    }

    pub(crate) fn last_price(&self, pair: &str) -> Option<f64> {
        self.last_candle.get(pair).map(|candle| candle.close)
    }

    pub(crate) fn asset_values(&self, asset: &str) -> Vec<AssetValue> {
        self.asset_values
            .get(&asset.to_uppercase())
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn equity_values(&self) -> &[AssetValue] {
        &self.equity_values
    }

    pub(crate) fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub(crate) fn account(&self) -> Account {
        let mut balances: Vec<Balance> = self
            .assets
            .iter()
            .map(|(asset, balance)| Balance {
                asset: asset.clone(),
                free: balance.free,
                lock: balance.lock,
            })
            .collect();
        balances.sort_by(|a, b| a.asset.cmp(&b.asset));
        Account { balances }
    }

    pub(crate) fn position(&self, pair: &str) -> BrokerResult<Position> {
        let (asset, quote) = self.split(pair)?;
        Ok(Position {
            asset: self.balance(&asset).total(),
            quote: self.balance(&quote).total(),
        })
    }

    pub(crate) fn order(&self, pair: &str, id: i64) -> BrokerResult<Order> {
        self.orders
            .iter()
            .find(|order| order.exchange_id == id && order.pair == pair)
            .cloned()
            .ok_or(BrokerError::OrderNotFound { order_id: id })
    }

    fn validate_quantity(pair: &str, quantity: f64) -> BrokerResult<()> {
        if quantity.is_finite() && quantity > 0.0 {
            Ok(())
        } else {
            Err(BrokerError::InvalidQuantity {
                pair: pair.to_string(),
                quantity,
            })
        }
    }

    fn validate_price(pair: &str, price: f64) -> BrokerResult<()> {
        if price.is_finite() && price > 0.0 {
            Ok(())
        } else {
            Err(BrokerError::InvalidPrice {
                pair: pair.to_string(),
                price,
            })
        }
    }

    /// Check that an order can be covered and compute what it must reserve
    ///
    /// Sells are covered by the long holding's value plus free quote; the part
    /// above the holding opens a short backed by quote collateral. Buys first
    /// cover an open short, whose liquidation value counts as funds.
    #[allow(clippy::too_many_arguments)]
    fn check_funds(
        &self,
        side: Side,
        pair: &str,
        asset: &str,
        quote: &str,
        quantity: f64,
        price: f64,
        fee_rate: f64,
    ) -> BrokerResult<Reservation> {
        let asset_balance = self.balance(asset);
        let quote_balance = self.balance(quote);
        let fee = quantity * price * fee_rate;

        let (funds, required, asset_qty, quote_qty) = match side {
            Side::Sell => {
                let held = asset_balance.free.max(0.0);
                let asset_qty = held.min(quantity);
                (
                    quote_balance.free + held * price,
                    quantity * price + fee,
                    asset_qty,
                    (quantity - asset_qty) * price,
                )
            }
            Side::Buy => {
                let short = (-asset_balance.free).max(0.0);
                let cover = short.min(quantity);
                let new_long = quantity - cover;
                let avg_short = self.avg_short.get(pair).copied().unwrap_or(price);
                let liquid = cover * (2.0 * avg_short - price);
                (
                    quote_balance.free + liquid,
                    new_long * price + fee,
                    0.0,
                    (new_long * price - liquid).max(0.0),
                )
            }
        };

        if funds < required {
            debug!(parent: &self.span, pair, %side, quantity, price, funds, required, "insufficient funds");
            return Err(BrokerError::InsufficientFunds {
                pair: pair.to_string(),
                quantity,
            });
        }

        Ok(Reservation {
            asset: asset.to_string(),
            quote: quote.to_string(),
            asset_qty,
            quote_qty,
        })
    }

    fn reserve(&mut self, owner: i64, reservation: Reservation) {
        let asset = self.balance_mut(&reservation.asset);
        asset.free -= reservation.asset_qty;
        asset.lock += reservation.asset_qty;
        let quote = self.balance_mut(&reservation.quote);
        quote.free -= reservation.quote_qty;
        quote.lock += reservation.quote_qty;
        self.reservations.insert(owner, reservation);
    }

    fn release(&mut self, owner: i64) {
        let Some(reservation) = self.reservations.remove(&owner) else {
            return;
        };
        let asset = self.balance_mut(&reservation.asset);
        asset.free += reservation.asset_qty;
        asset.lock = (asset.lock - reservation.asset_qty).max(0.0);
        let quote = self.balance_mut(&reservation.quote);
        quote.free += reservation.quote_qty;
        quote.lock = (quote.lock - reservation.quote_qty).max(0.0);
    }

    /// Update the long/short average of a pair before a fill is settled
    fn update_average_price(
        &mut self,
        side: Side,
        pair: &str,
        asset: &str,
        quantity: f64,
        price: f64,
    ) {
        let actual = self.balance(asset).free;
        let avg_long = self.avg_long.get(pair).copied().unwrap_or(0.0);
        let avg_short = self.avg_short.get(pair).copied().unwrap_or(0.0);

        if actual == 0.0 {
            match side {
                Side::Buy => self.avg_long.insert(pair.to_string(), price),
                Side::Sell => self.avg_short.insert(pair.to_string(), price),
            };
            return;
        }

        match (side, actual > 0.0) {
            (Side::Buy, true) => {
                let blended = (avg_long * actual + quantity * price) / (actual + quantity);
                self.avg_long.insert(pair.to_string(), blended);
            }
            (Side::Sell, false) => {
                let held = -actual;
                let blended = (avg_short * held + quantity * price) / (held + quantity);
                self.avg_short.insert(pair.to_string(), blended);
            }
            (Side::Sell, true) => {
                let profit = quantity * price - quantity.min(actual) * avg_long;
                let pct = profit / (quantity * avg_long);
                info!(parent: &self.span, pair, side = "long", profit, pct, "position reduced");
                if quantity > actual {
                    self.avg_short.insert(pair.to_string(), price);
                }
            }
            (Side::Buy, false) => {
                let held = -actual;
                let profit = quantity.min(held) * avg_short - quantity * price;
                let pct = profit / (quantity * avg_short);
                info!(parent: &self.span, pair, side = "short", profit, pct, "position reduced");
                if quantity > held {
                    self.avg_long.insert(pair.to_string(), price);
                }
            }
        }
    }

    /// Settle a trade against free balances
    #[allow(clippy::too_many_arguments)]
    fn execute(
        &mut self,
        side: Side,
        pair: &str,
        asset: &str,
        quote: &str,
        quantity: f64,
        price: f64,
        fee_rate: f64,
    ) {
        let free = self.balance(asset).free;
        let avg_short = self.avg_short.get(pair).copied().unwrap_or(price);
        let quote_delta = match side {
            Side::Sell => {
                let closed = free.max(0.0).min(quantity);
                closed * price - (quantity - closed) * price
            }
            Side::Buy => {
                let cover = (-free).max(0.0).min(quantity);
                let liquid = cover * (2.0 * avg_short - price);
                liquid - (quantity - cover) * price
            }
        };

        self.update_average_price(side, pair, asset, quantity, price);

        let fee = quantity * price * fee_rate;
        let quote_balance = self.balance_mut(quote);
        quote_balance.free += quote_delta - fee;
        let asset_balance = self.balance_mut(asset);
        match side {
            Side::Buy => asset_balance.free += quantity,
            Side::Sell => asset_balance.free -= quantity,
        }
        *self.volume.entry(pair.to_string()).or_default() += quantity * price;
    }

    fn new_order(
        &mut self,
        side: Side,
        pair: &str,
        order_type: OrderType,
        quantity: f64,
        price: f64,
    ) -> Order {
        let now = self.clock(pair);
        Order {
            exchange_id: self.next_id(),
            group_id: None,
            pair: pair.to_string(),
            side,
            order_type,
            status: OrderStatus::New,
            price,
            stop: None,
            quantity,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn create_order_market(
        &mut self,
        side: Side,
        pair: &str,
        quantity: f64,
    ) -> BrokerResult<Order> {
        Self::validate_quantity(pair, quantity)?;
        let (asset, quote) = self.split(pair)?;
        let price = self.last_price(pair).ok_or_else(|| BrokerError::MissingPrice {
            pair: pair.to_string(),
        })?;
        self.check_funds(side, pair, &asset, &quote, quantity, price, self.taker_fee)?;

        self.execute(side, pair, &asset, &quote, quantity, price, self.taker_fee);
        let mut order = self.new_order(side, pair, OrderType::Market, quantity, price);
        order.status = OrderStatus::Filled;
        info!(parent: &self.span, id = order.exchange_id, pair, %side, quantity, price, "market order filled");
        self.orders.push(order.clone());
        Ok(order)
    }

    pub(crate) fn create_order_market_quote(
        &mut self,
        side: Side,
        pair: &str,
        quote_quantity: f64,
    ) -> BrokerResult<Order> {
        Self::validate_quantity(pair, quote_quantity)?;
        let price = self.last_price(pair).ok_or_else(|| BrokerError::MissingPrice {
            pair: pair.to_string(),
        })?;
        self.create_order_market(side, pair, quote_quantity / price)
    }

    pub(crate) fn create_order_limit(
        &mut self,
        side: Side,
        pair: &str,
        quantity: f64,
        limit: f64,
    ) -> BrokerResult<Order> {
        Self::validate_quantity(pair, quantity)?;
        Self::validate_price(pair, limit)?;
        let (asset, quote) = self.split(pair)?;
        let reservation =
            self.check_funds(side, pair, &asset, &quote, quantity, limit, self.maker_fee)?;

        let order = self.new_order(side, pair, OrderType::Limit, quantity, limit);
        self.reserve(order.exchange_id, reservation);
        info!(parent: &self.span, id = order.exchange_id, pair, %side, quantity, limit, "limit order created");
        self.orders.push(order.clone());
        Ok(order)
    }

    pub(crate) fn create_order_stop(
        &mut self,
        pair: &str,
        quantity: f64,
        stop: f64,
    ) -> BrokerResult<Order> {
        Self::validate_quantity(pair, quantity)?;
        Self::validate_price(pair, stop)?;
        let (asset, quote) = self.split(pair)?;
        let reservation =
            self.check_funds(Side::Sell, pair, &asset, &quote, quantity, stop, self.maker_fee)?;

        let mut order = self.new_order(Side::Sell, pair, OrderType::StopLoss, quantity, stop);
        order.stop = Some(stop);
        self.reserve(order.exchange_id, reservation);
        info!(parent: &self.span, id = order.exchange_id, pair, quantity, stop, "stop order created");
        self.orders.push(order.clone());
        Ok(order)
    }

    pub(crate) fn create_order_oco(
        &mut self,
        side: Side,
        pair: &str,
        quantity: f64,
        price: f64,
        stop: f64,
        stop_limit: f64,
    ) -> BrokerResult<Vec<Order>> {
        Self::validate_quantity(pair, quantity)?;
        for value in [price, stop, stop_limit] {
            Self::validate_price(pair, value)?;
        }
        let (asset, quote) = self.split(pair)?;
        // Either leg may execute; the stop leg fills at `stop`
        let worst = price.max(stop);
        let reservation =
            self.check_funds(side, pair, &asset, &quote, quantity, worst, self.maker_fee)?;

        let group = self.next_id();
        let mut limit_maker = self.new_order(side, pair, OrderType::LimitMaker, quantity, price);
        limit_maker.group_id = Some(group);
        let mut stop_order = self.new_order(side, pair, OrderType::StopLossLimit, quantity, stop_limit);
        stop_order.group_id = Some(group);
        stop_order.stop = Some(stop);

        self.reserve(group, reservation);
        info!(parent: &self.span, group, pair, %side, quantity, price, stop, stop_limit, "oco created");
        self.orders.push(limit_maker.clone());
        self.orders.push(stop_order.clone());
        Ok(vec![limit_maker, stop_order])
    }

    pub(crate) fn cancel(&mut self, id: i64) -> BrokerResult<()> {
        let order = self
            .orders
            .iter()
            .find(|order| order.exchange_id == id)
            .cloned()
            .ok_or(BrokerError::OrderNotFound { order_id: id })?;
        if order.status != OrderStatus::New {
            return Err(BrokerError::InvalidOrderState {
                order_id: id,
                operation: "canceled",
                status: order.status,
            });
        }

        self.release(order.group_id.unwrap_or(order.exchange_id));
        let now = self.clock(&order.pair);
        for resting in self.orders.iter_mut().filter(|o| o.status == OrderStatus::New) {
            let same_group = order.group_id.is_some() && resting.group_id == order.group_id;
            if resting.exchange_id == id || same_group {
                resting.status = OrderStatus::Canceled;
                resting.updated_at = now;
            }
        }
        info!(parent: &self.span, id, pair = %order.pair, group = ?order.group_id, "order canceled");
        Ok(())
    }

    /// Price at which a resting order executes against a candle, if any
    fn trigger(order: &Order, candle: &Candle) -> Option<f64> {
        let order_type = order.order_type;
        if order_type.is_limit_like() {
            let hit = match order.side {
                Side::Buy => candle.close <= order.price,
                Side::Sell => candle.high >= order.price,
            };
            return hit.then_some(order.price);
        }
        if order_type.is_stop_like() {
            let stop = order.stop.unwrap_or(order.price);
            let hit = match order.side {
                Side::Sell => candle.low <= stop,
                Side::Buy => candle.high >= stop,
            };
            return hit.then_some(stop);
        }
        None
    }

    fn fill(&mut self, index: usize, price: f64, time: DateTime<Utc>) {
        let order = self.orders[index].clone();
        let Ok((asset, quote)) = self.split(&order.pair) else {
            return;
        };

        self.release(order.group_id.unwrap_or(order.exchange_id));
        if let Some(group) = order.group_id {
            let span = &self.span;
            for sibling in self.orders.iter_mut().filter(|o| {
                o.group_id == Some(group)
                    && o.exchange_id != order.exchange_id
                    && o.status == OrderStatus::New
            }) {
                sibling.status = OrderStatus::Canceled;
                sibling.updated_at = time;
                debug!(parent: span, id = sibling.exchange_id, group, "oco sibling canceled");
            }
        }

        self.execute(order.side, &order.pair, &asset, &quote, order.quantity, price, self.maker_fee);
        let filled = &mut self.orders[index];
        filled.status = OrderStatus::Filled;
        filled.price = price;
        filled.updated_at = time;
        info!(
            parent: &self.span,
            id = order.exchange_id,
            pair = %order.pair,
            side = %order.side,
            order_type = %order.order_type,
            quantity = order.quantity,
            price,
            "order filled"
        );
    }

    pub(crate) fn on_candle(&mut self, candle: &Candle) {
        let pair = candle.pair.clone();
        self.first_candle
            .entry(pair.clone())
            .or_insert_with(|| candle.clone());
        self.last_candle.insert(pair.clone(), candle.clone());
        if let Ok((asset, quote)) = self.split(&pair) {
            if quote == self.base_coin {
                self.asset_pairs.insert(asset, pair.clone());
            }
        }

        for index in 0..self.orders.len() {
            let order = &self.orders[index];
            if order.pair != pair || order.status != OrderStatus::New {
                continue;
            }
            if let Some(price) = Self::trigger(order, candle) {
                self.fill(index, price, candle.time);
            }
        }

        if candle.complete {
            self.mark_to_market(candle.time);
        }
    }

    /// Value of a holding at the last close; shorts at liquidation value
    fn holding_value(&self, pair: &str, amount: f64, close: f64) -> f64 {
        if amount < 0.0 {
            let size = amount.abs();
            let avg_short = self.avg_short.get(pair).copied().unwrap_or(close);
            2.0 * size * avg_short - size * close
        } else {
            amount * close
        }
    }

    fn mark_to_market(&mut self, time: DateTime<Utc>) {
        let mut held: Vec<(String, f64)> = self
            .assets
            .iter()
            .filter(|(asset, _)| **asset != self.base_coin)
            .filter_map(|(asset, balance)| {
                let pair = self.asset_pairs.get(asset)?;
                let close = self.last_candle.get(pair)?.close;
                Some((asset.clone(), self.holding_value(pair, balance.total(), close)))
            })
            .collect();
        held.sort_by(|a, b| a.0.cmp(&b.0));

        let mut total = 0.0;
        for (asset, value) in held {
            total += value;
            self.asset_values
                .entry(asset)
                .or_default()
                .push(AssetValue { time, value });
        }

        let equity = total + self.balance(&self.base_coin).total();
        self.initial_value.get_or_insert(equity);
        self.equity_values.push(AssetValue { time, value: equity });
    }

    pub(crate) fn summary(&self) -> WalletSummary {
        let mut pairs: Vec<&String> = self.last_candle.keys().collect();
        pairs.sort();

        let mut holdings = Vec::new();
        let mut total = 0.0;
        let mut market_change = 0.0;
        let mut volume = 0.0;
        for pair in &pairs {
            let Some(last) = self.last_candle.get(*pair) else {
                continue;
            };
            if let Ok((asset, _)) = self.split(pair) {
                let quantity = self.balance(&asset).total();
                let value = self.holding_value(pair, quantity, last.close);
                total += value;
                holdings.push(Holding {
                    asset,
                    quantity,
                    value,
                });
            }
            if let Some(first) = self.first_candle.get(*pair) {
                if first.close != 0.0 {
                    market_change += (last.close - first.close) / first.close;
                }
            }
            volume += self.volume(pair);
        }

        let base_balance = self.balance(&self.base_coin).total();
        let final_value = total + base_balance;
        let initial_value = self.initial_value.unwrap_or(final_value);
        WalletSummary {
            base_coin: self.base_coin.clone(),
            holdings,
            base_balance,
            initial_value,
            final_value,
            profit: final_value - initial_value,
            market_change: if pairs.is_empty() {
                0.0
            } else {
                market_change / pairs.len() as f64
            },
            drawdown: max_drawdown(&self.equity_values),
            volume,
        }
    }
}
