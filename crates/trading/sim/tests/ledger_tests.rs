//! Paper wallet behaviour through the Broker interface
//!
//! Covers fund conservation, average price accounting, OCO handling, cancel
//! semantics and the end-to-end limit order round trip.

use chrono::{DateTime, TimeZone, Utc};
use common::{
    Broker, BrokerError, BrokerResult, Candle, FeedError, Feeder, OrderStatus, OrderType, Side,
    Timeframe,
};
use feeds::{HistoricalFeed, HistoricalFeedConfig};
use proptest::prelude::*;
use rstest::rstest;
use sim::{PaperWallet, WalletConfig};
use std::sync::Arc;
use tracing::Span;

const PAIR: &str = "BTCUSDT";

fn at(minute: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + minute * 60, 0)
        .single()
        .unwrap_or_default()
}

fn candle(minute: i64, low: f64, high: f64, close: f64) -> Candle {
    Candle::new(PAIR, at(minute), close, high, low, close, 1.0)
}

fn flat(minute: i64, price: f64) -> Candle {
    candle(minute, price, price, price)
}

fn wallet(usdt: f64, btc: f64) -> PaperWallet {
    let config = WalletConfig::new("USDT")
        .with_asset("USDT", usdt)
        .with_asset("BTC", btc);
    PaperWallet::new(config, Span::none())
}

fn totals(wallet: &PaperWallet) -> (f64, f64) {
    (wallet.balance("BTC").total(), wallet.balance("USDT").total())
}

#[tokio::test]
async fn test_end_to_end_limit_round_trip() -> BrokerResult<()> {
    let wallet = wallet(100.0, 0.0);

    let buy = wallet.create_order_limit(Side::Buy, PAIR, 1.0, 100.0).await?;
    assert_eq!(buy.status, OrderStatus::New);
    assert_eq!(wallet.balance("USDT").free, 0.0);
    assert_eq!(wallet.balance("USDT").lock, 100.0);

    wallet.on_candle(&flat(0, 100.0));
    assert_eq!(wallet.order(PAIR, buy.exchange_id).await?.status, OrderStatus::Filled);
    assert_eq!(wallet.balance("USDT").lock, 0.0);
    assert_eq!(wallet.balance("BTC").free, 1.0);
    assert_eq!(wallet.average_price(PAIR).0, 100.0);

    let sell = wallet.create_order_limit(Side::Sell, PAIR, 1.0, 200.0).await?;
    assert_eq!(wallet.balance("BTC").free, 0.0);
    assert_eq!(wallet.balance("BTC").lock, 1.0);

    wallet.on_candle(&candle(1, 200.0, 200.0, 200.0));
    assert_eq!(wallet.order(PAIR, sell.exchange_id).await?.status, OrderStatus::Filled);
    assert_eq!(wallet.balance("USDT").free, 200.0);
    assert_eq!(wallet.balance("BTC").free, 0.0);
    assert_eq!(wallet.balance("BTC").lock, 0.0);
    assert_eq!(wallet.volume(PAIR), 300.0);
    Ok(())
}

#[tokio::test]
async fn test_average_price_blends_same_direction_fills() -> BrokerResult<()> {
    let wallet = wallet(1_000.0, 0.0);
    wallet.on_candle(&flat(0, 100.0));
    wallet.create_order_market(Side::Buy, PAIR, 1.0).await?;
    wallet.on_candle(&flat(1, 50.0));
    wallet.create_order_market(Side::Buy, PAIR, 1.0).await?;

    assert_eq!(wallet.average_price(PAIR).0, 75.0);
    assert_eq!(wallet.balance("BTC").free, 2.0);
    Ok(())
}

#[tokio::test]
async fn test_position_flip_opens_short_at_fill_price() -> BrokerResult<()> {
    let wallet = wallet(200.0, 0.0);
    wallet.on_candle(&flat(0, 100.0));
    wallet.create_order_market(Side::Buy, PAIR, 1.0).await?;
    wallet.create_order_market(Side::Sell, PAIR, 2.0).await?;

    assert_eq!(wallet.balance("BTC").free, -1.0);
    assert_eq!(wallet.average_price(PAIR), (100.0, 100.0));
    assert_eq!(wallet.balance("USDT").free, 100.0);
    Ok(())
}

#[tokio::test]
async fn test_fill_conserves_value_at_fill_price() -> BrokerResult<()> {
    let wallet = wallet(1_000.0, 1.0);
    wallet.on_candle(&flat(0, 100.0));
    let before = wallet.balance("USDT").total() + wallet.balance("BTC").total() * 100.0;

    // Sells through the long holding into a short of 2.
    wallet.create_order_market(Side::Sell, PAIR, 3.0).await?;
    let short = -wallet.balance("BTC").total();
    let avg_short = wallet.average_price(PAIR).1;
    let short_value = 2.0 * short * avg_short - short * 100.0;
    let after = wallet.balance("USDT").total() + short_value;

    assert_eq!(short, 2.0);
    assert_eq!(before, after);
    Ok(())
}

#[tokio::test]
async fn test_cancel_restores_free_balance() -> BrokerResult<()> {
    let wallet = wallet(1_000.0, 2.0);
    let before = (wallet.balance("BTC"), wallet.balance("USDT"));

    let buy = wallet.create_order_limit(Side::Buy, PAIR, 3.0, 90.0).await?;
    let sell = wallet.create_order_limit(Side::Sell, PAIR, 3.0, 120.0).await?;
    assert_eq!(totals(&wallet), (2.0, 1_000.0));

    wallet.cancel(&buy).await?;
    wallet.cancel(&sell).await?;
    assert_eq!((wallet.balance("BTC"), wallet.balance("USDT")), before);
    Ok(())
}

#[tokio::test]
async fn test_cancel_filled_order_fails_without_mutation() -> BrokerResult<()> {
    let wallet = wallet(100.0, 0.0);
    let buy = wallet.create_order_limit(Side::Buy, PAIR, 1.0, 100.0).await?;
    wallet.on_candle(&flat(0, 100.0));
    let before = (wallet.balance("BTC"), wallet.balance("USDT"));

    let result = wallet.cancel(&buy).await;
    assert!(matches!(
        result,
        Err(BrokerError::InvalidOrderState {
            status: OrderStatus::Filled,
            ..
        })
    ));
    assert_eq!((wallet.balance("BTC"), wallet.balance("USDT")), before);

    let again = wallet.cancel(&buy).await;
    assert!(matches!(again, Err(BrokerError::InvalidOrderState { .. })));
    Ok(())
}

#[tokio::test]
async fn test_cancel_unknown_order() -> BrokerResult<()> {
    let wallet = wallet(100.0, 0.0);
    let mut order = wallet.create_order_limit(Side::Buy, PAIR, 1.0, 50.0).await?;
    order.exchange_id = 999;

    let result = wallet.cancel(&order).await;
    assert!(matches!(result, Err(BrokerError::OrderNotFound { order_id: 999 })));
    assert!(matches!(
        wallet.order(PAIR, 999).await,
        Err(BrokerError::OrderNotFound { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_oco_stop_leg_cancels_limit_leg() -> BrokerResult<()> {
    let wallet = wallet(0.0, 1.0);
    wallet.on_candle(&flat(0, 100.0));

    let legs = wallet
        .create_order_oco(Side::Sell, PAIR, 1.0, 120.0, 90.0, 89.0)
        .await?;
    assert_eq!(legs.len(), 2);
    assert_eq!(legs[0].order_type, OrderType::LimitMaker);
    assert_eq!(legs[1].order_type, OrderType::StopLossLimit);
    assert_eq!(legs[0].group_id, legs[1].group_id);
    assert_eq!(wallet.balance("BTC").lock, 1.0);

    wallet.on_candle(&candle(1, 85.0, 101.0, 88.0));

    let limit = wallet.order(PAIR, legs[0].exchange_id).await?;
    let stop = wallet.order(PAIR, legs[1].exchange_id).await?;
    assert_eq!(limit.status, OrderStatus::Canceled);
    assert_eq!(stop.status, OrderStatus::Filled);
    assert_eq!(stop.price, 90.0);
    assert_eq!(wallet.balance("BTC").total(), 0.0);
    assert_eq!(wallet.balance("BTC").lock, 0.0);
    assert_eq!(wallet.balance("USDT").free, 90.0);
    assert_eq!(wallet.balance("USDT").lock, 0.0);
    Ok(())
}

#[tokio::test]
async fn test_oco_limit_leg_wins_when_both_trigger() -> BrokerResult<()> {
    let wallet = wallet(0.0, 1.0);
    let legs = wallet
        .create_order_oco(Side::Sell, PAIR, 1.0, 120.0, 90.0, 89.0)
        .await?;

    wallet.on_candle(&candle(0, 80.0, 130.0, 100.0));

    let orders = wallet.orders();
    let filled: Vec<_> = orders
        .iter()
        .filter(|o| o.status == OrderStatus::Filled)
        .collect();
    assert_eq!(filled.len(), 1);
    assert_eq!(filled[0].exchange_id, legs[0].exchange_id);
    assert_eq!(wallet.balance("USDT").free, 120.0);
    Ok(())
}

#[tokio::test]
async fn test_cancel_oco_leg_cancels_group() -> BrokerResult<()> {
    let wallet = wallet(0.0, 1.0);
    let legs = wallet
        .create_order_oco(Side::Sell, PAIR, 1.0, 120.0, 90.0, 89.0)
        .await?;

    wallet.cancel(&legs[1]).await?;
    for leg in &legs {
        assert_eq!(wallet.order(PAIR, leg.exchange_id).await?.status, OrderStatus::Canceled);
    }
    assert_eq!(wallet.balance("BTC").free, 1.0);
    assert_eq!(wallet.balance("BTC").lock, 0.0);
    Ok(())
}

#[tokio::test]
async fn test_buy_oco_reserves_for_stop_leg() -> BrokerResult<()> {
    let wallet = wallet(100.0, 0.0);
    wallet.on_candle(&flat(0, 100.0));

    let rejected = wallet
        .create_order_oco(Side::Buy, PAIR, 1.0, 90.0, 110.0, 111.0)
        .await;
    assert!(matches!(rejected, Err(BrokerError::InsufficientFunds { .. })));
    assert_eq!(wallet.balance("USDT").free, 100.0);
    assert_eq!(wallet.balance("USDT").lock, 0.0);
    Ok(())
}

#[tokio::test]
async fn test_buy_oco_stop_leg_fills_at_stop() -> BrokerResult<()> {
    let wallet = wallet(120.0, 0.0);
    wallet.on_candle(&flat(0, 100.0));

    let legs = wallet
        .create_order_oco(Side::Buy, PAIR, 1.0, 90.0, 110.0, 111.0)
        .await?;
    assert_eq!(wallet.balance("USDT").lock, 110.0);
    assert_eq!(wallet.balance("USDT").free, 10.0);

    wallet.on_candle(&candle(1, 100.0, 112.0, 105.0));

    let limit = wallet.order(PAIR, legs[0].exchange_id).await?;
    let stop = wallet.order(PAIR, legs[1].exchange_id).await?;
    assert_eq!(limit.status, OrderStatus::Canceled);
    assert_eq!(stop.status, OrderStatus::Filled);
    assert_eq!(stop.price, 110.0);
    assert_eq!(wallet.balance("BTC").free, 1.0);
    assert_eq!(wallet.balance("USDT").free, 10.0);
    assert_eq!(wallet.balance("USDT").lock, 0.0);
    Ok(())
}

#[tokio::test]
async fn test_stop_order_fills_at_stop_on_low_touch() -> BrokerResult<()> {
    let wallet = wallet(0.0, 2.0);
    let stop = wallet.create_order_stop(PAIR, 2.0, 95.0).await?;
    wallet.on_candle(&candle(0, 96.0, 110.0, 100.0));
    assert_eq!(wallet.order(PAIR, stop.exchange_id).await?.status, OrderStatus::New);

    wallet.on_candle(&candle(1, 94.0, 100.0, 97.0));
    assert_eq!(wallet.order(PAIR, stop.exchange_id).await?.status, OrderStatus::Filled);
    assert_eq!(wallet.balance("USDT").free, 190.0);
    Ok(())
}

#[tokio::test]
async fn test_buy_limit_fills_on_close_not_low() -> BrokerResult<()> {
    // A wick below the limit is not enough for a buy; the close must reach it.
    let wallet = wallet(100.0, 0.0);
    let buy = wallet.create_order_limit(Side::Buy, PAIR, 1.0, 100.0).await?;

    wallet.on_candle(&candle(0, 90.0, 120.0, 110.0));
    assert_eq!(wallet.order(PAIR, buy.exchange_id).await?.status, OrderStatus::New);

    wallet.on_candle(&candle(1, 95.0, 105.0, 99.0));
    assert_eq!(wallet.order(PAIR, buy.exchange_id).await?.status, OrderStatus::Filled);
    Ok(())
}

#[rstest]
#[case(0.0)]
#[case(-1.0)]
#[case(f64::NAN)]
#[tokio::test]
async fn test_invalid_quantity_rejected(#[case] quantity: f64) {
    let wallet = wallet(100.0, 0.0);
    wallet.on_candle(&flat(0, 100.0));
    let market = wallet.create_order_market(Side::Buy, PAIR, quantity).await;
    let limit = wallet.create_order_limit(Side::Buy, PAIR, quantity, 10.0).await;
    assert!(matches!(market, Err(BrokerError::InvalidQuantity { .. })));
    assert!(matches!(limit, Err(BrokerError::InvalidQuantity { .. })));
}

#[tokio::test]
async fn test_market_order_needs_price_and_funds() {
    let wallet = wallet(100.0, 0.0);
    let result = wallet.create_order_market(Side::Buy, PAIR, 1.0).await;
    assert!(matches!(result, Err(BrokerError::MissingPrice { .. })));

    wallet.on_candle(&flat(0, 100.0));
    let result = wallet.create_order_market(Side::Buy, PAIR, 1.5).await;
    assert!(matches!(
        result,
        Err(BrokerError::InsufficientFunds { ref pair, quantity }) if pair == PAIR && quantity == 1.5
    ));
    assert_eq!(wallet.balance("USDT").free, 100.0);
}

#[tokio::test]
async fn test_market_quote_sizes_by_last_close() -> BrokerResult<()> {
    let wallet = wallet(100.0, 0.0);
    wallet.on_candle(&flat(0, 50.0));
    let order = wallet.create_order_market_quote(Side::Buy, PAIR, 100.0).await?;
    assert_eq!(order.quantity, 2.0);
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(wallet.balance("USDT").free, 0.0);
    Ok(())
}

#[tokio::test]
async fn test_account_and_position_snapshots() -> BrokerResult<()> {
    let wallet = wallet(500.0, 1.5);
    wallet.create_order_limit(Side::Sell, PAIR, 1.0, 200.0).await?;

    let account = wallet.account().await?;
    let (btc, usdt) = account.balance("BTC", "USDT");
    assert_eq!((btc.free, btc.lock), (0.5, 1.0));
    assert_eq!(usdt.free, 500.0);

    let position = wallet.position(PAIR).await?;
    assert_eq!((position.asset, position.quote), (1.5, 500.0));
    Ok(())
}

#[tokio::test]
async fn test_summary_reports_profit_and_drawdown() -> BrokerResult<()> {
    let wallet = wallet(100.0, 0.0);
    wallet.on_candle(&flat(0, 100.0));
    wallet.create_order_market(Side::Buy, PAIR, 1.0).await?;
    wallet.on_candle(&flat(1, 50.0));
    wallet.on_candle(&flat(2, 150.0));

    let summary = wallet.summary();
    assert_eq!(summary.initial_value, 100.0);
    assert_eq!(summary.final_value, 150.0);
    assert_eq!(summary.profit, 50.0);
    assert_eq!(summary.market_change, 0.5);
    assert_eq!(summary.volume, 100.0);
    assert_eq!(summary.drawdown.map(|d| d.value), Some(-0.5));
    assert_eq!(wallet.equity_values().len(), 3);
    assert_eq!(wallet.asset_values("BTC").len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_feeder_proxy() -> Result<(), FeedError> {
    let plain = wallet(100.0, 0.0);
    assert!(matches!(
        plain.candles_by_limit(PAIR, Timeframe::M1, 1).await,
        Err(FeedError::Unsupported { .. })
    ));

    let feed = HistoricalFeed::new(HistoricalFeedConfig::default(), Span::none()).with_candles(
        PAIR,
        Timeframe::M1,
        vec![flat(0, 100.0), flat(1, 101.0)],
    );
    let proxy = wallet(100.0, 0.0).with_feeder(Arc::new(feed));
    let candles = proxy.candles_by_limit(PAIR, Timeframe::M1, 1).await?;
    assert_eq!(candles.len(), 1);
    assert_eq!(proxy.last_quote(PAIR).await?, 101.0);
    Ok(())
}

#[derive(Debug, Clone)]
enum Op {
    Limit(Side, f64, f64),
    Stop(f64, f64),
    Oco(f64, f64),
    Market(Side, f64),
    Cancel(usize),
    Bar(f64, f64),
}

fn arb_side() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Buy), Just(Side::Sell)]
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (arb_side(), 0.1f64..3.0, 50.0f64..150.0).prop_map(|(s, q, p)| Op::Limit(s, q, p)),
        (0.1f64..3.0, 50.0f64..100.0).prop_map(|(q, p)| Op::Stop(q, p)),
        (0.1f64..3.0, 80.0f64..120.0).prop_map(|(q, p)| Op::Oco(q, p)),
        (arb_side(), 0.1f64..3.0).prop_map(|(s, q)| Op::Market(s, q)),
        (0usize..32).prop_map(Op::Cancel),
        (50.0f64..150.0, 0.0f64..20.0).prop_map(|(c, w)| Op::Bar(c, w)),
    ]
}

proptest! {
    #[test]
    fn prop_locks_never_negative_and_cancel_conserves(ops in prop::collection::vec(arb_op(), 1..60)) {
        tokio_test::block_on(async {
            let wallet = wallet(1_000.0, 2.0);
            wallet.on_candle(&flat(0, 100.0));
            for (minute, op) in (1i64..).zip(ops) {
                match op {
                    Op::Limit(side, q, p) => { let _ = wallet.create_order_limit(side, PAIR, q, p).await; }
                    Op::Stop(q, p) => { let _ = wallet.create_order_stop(PAIR, q, p).await; }
                    Op::Oco(q, p) => { let _ = wallet.create_order_oco(Side::Sell, PAIR, q, p + 10.0, p - 10.0, p - 11.0).await; }
                    Op::Market(side, q) => { let _ = wallet.create_order_market(side, PAIR, q).await; }
                    Op::Cancel(index) => {
                        let orders = wallet.orders();
                        if let Some(order) = orders.get(index) {
                            let before = totals(&wallet);
                            let _ = wallet.cancel(order).await;
                            let after = totals(&wallet);
                            prop_assert!((before.0 - after.0).abs() < 1e-9);
                            prop_assert!((before.1 - after.1).abs() < 1e-9);
                        }
                    }
                    Op::Bar(close, wick) => {
                        wallet.on_candle(&candle(minute, close - wick, close + wick, close));
                    }
                }
                for asset in ["BTC", "USDT"] {
                    prop_assert!(wallet.balance(asset).lock >= 0.0);
                }
            }
            Ok::<(), proptest::test_runner::TestCaseError>(())
        })?;
    }
}
