//! Strategy interface and the per-pair controller that drives it

use crate::dataframe::DataFrame;
use crate::error::DataFrameError;
use async_trait::async_trait;
use common::{Broker, Candle, Timeframe};
use std::sync::Arc;
use tracing::{Span, debug, info, warn};

/// Trading strategy
///
/// One instance is shared by every pair; per-pair state belongs in the
/// [`DataFrame`] or behind interior mutability.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Candle timeframe the strategy trades on
    fn timeframe(&self) -> Timeframe;

    /// Closed candles required before the strategy is called
    fn warmup_period(&self) -> usize;

    /// Compute indicator series on the closed frame
    ///
    /// # Errors
    /// Returns an error if a series cannot be stored; the bar is then skipped.
    fn indicators(&self, dataframe: &mut DataFrame) -> Result<(), DataFrameError>;

    /// Called once per closed candle after [`Strategy::indicators`]
    async fn on_candle(&self, dataframe: &DataFrame, broker: &dyn Broker);

    /// Called for every update, including forming candles
    async fn on_partial_candle(&self, _dataframe: &DataFrame, _broker: &dyn Broker) {}
}

/// Owns the frame of one pair and feeds it to the strategy
pub struct StrategyController {
    strategy: Arc<dyn Strategy>,
    broker: Arc<dyn Broker>,
    dataframe: DataFrame,
    started: bool,
    span: Span,
}

impl StrategyController {
    /// Controller for one pair
    pub fn new(
        pair: &str,
        strategy: Arc<dyn Strategy>,
        broker: Arc<dyn Broker>,
        span: Span,
    ) -> Self {
        Self {
            strategy,
            broker,
            dataframe: DataFrame::new(pair),
            started: false,
            span,
        }
    }

    /// Begin calling the strategy
    pub fn start(&mut self) {
        self.started = true;
        info!(parent: &self.span, pair = %self.dataframe.pair, bars = self.dataframe.len(), "strategy controller started");
    }

    /// Controller has been started
    #[must_use]
    pub const fn is_started(&self) -> bool {
        self.started
    }

    /// Closed-bar history
    #[must_use]
    pub const fn dataframe(&self) -> &DataFrame {
        &self.dataframe
    }

    fn is_warm(&self) -> bool {
        self.dataframe.len() >= self.strategy.warmup_period()
    }

    /// Apply a forming or closed candle to a copy of the frame
    pub async fn on_partial_candle(&self, candle: &Candle) {
        if !self.started || !self.is_warm() {
            return;
        }
        let frame = self.dataframe.with_partial(candle);
        self.strategy
            .on_partial_candle(&frame, self.broker.as_ref())
            .await;
    }

    /// Append a closed candle and run the strategy once warm
    pub async fn on_candle(&mut self, candle: &Candle) {
        self.dataframe.push(candle);
        if !self.is_warm() {
            debug!(
                parent: &self.span,
                pair = %candle.pair,
                bars = self.dataframe.len(),
                warmup = self.strategy.warmup_period(),
                "warming up"
            );
            return;
        }

        if let Err(e) = self.strategy.indicators(&mut self.dataframe) {
            warn!(parent: &self.span, pair = %candle.pair, error = %e, "indicator update failed");
            return;
        }
        if self.started {
            self.strategy
                .on_candle(&self.dataframe, self.broker.as_ref())
                .await;
        }
    }
}

impl std::fmt::Debug for StrategyController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyController")
            .field("pair", &self.dataframe.pair)
            .field("bars", &self.dataframe.len())
            .field("started", &self.started)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use parking_lot::Mutex;
    use sim::{PaperWallet, WalletConfig};

    #[derive(Default)]
    struct Recorder {
        closed: Mutex<Vec<usize>>,
        partial: Mutex<Vec<f64>>,
    }

    #[async_trait]
    impl Strategy for Recorder {
        fn timeframe(&self) -> Timeframe {
            Timeframe::M1
        }

        fn warmup_period(&self) -> usize {
            2
        }

        fn indicators(&self, dataframe: &mut DataFrame) -> Result<(), DataFrameError> {
            let doubled = dataframe.close.iter().map(|c| c * 2.0).collect();
            dataframe.set_indicator("double", doubled)
        }

        async fn on_candle(&self, dataframe: &DataFrame, _broker: &dyn Broker) {
            assert_eq!(dataframe.indicator("double").map(<[f64]>::len), Some(dataframe.len()));
            self.closed.lock().push(dataframe.len());
        }

        async fn on_partial_candle(&self, dataframe: &DataFrame, _broker: &dyn Broker) {
            self.partial.lock().extend(dataframe.last_close());
        }
    }

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + minute * 60, 0)
            .single()
            .unwrap_or_default()
    }

    fn controller(strategy: Arc<Recorder>) -> StrategyController {
        let wallet = PaperWallet::new(WalletConfig::default(), Span::none());
        StrategyController::new("BTCUSDT", strategy, Arc::new(wallet), Span::none())
    }

    #[tokio::test]
    async fn test_strategy_runs_only_when_started_and_warm() {
        let strategy = Arc::new(Recorder::default());
        let mut controller = controller(Arc::clone(&strategy));

        for minute in 0..2 {
            controller
                .on_candle(&Candle::new("BTCUSDT", at(minute), 1.0, 1.0, 1.0, 1.0, 1.0))
                .await;
        }
        assert!(strategy.closed.lock().is_empty());

        controller.start();
        controller
            .on_candle(&Candle::new("BTCUSDT", at(2), 1.0, 1.0, 1.0, 1.0, 1.0))
            .await;
        assert_eq!(*strategy.closed.lock(), vec![3]);
    }

    #[tokio::test]
    async fn test_partial_candle_does_not_grow_frame() {
        let strategy = Arc::new(Recorder::default());
        let mut controller = controller(Arc::clone(&strategy));
        for minute in 0..2 {
            controller
                .on_candle(&Candle::new("BTCUSDT", at(minute), 1.0, 1.0, 1.0, 1.0, 1.0))
                .await;
        }
        controller.start();

        let forming = Candle::new("BTCUSDT", at(2), 1.0, 5.0, 1.0, 4.0, 1.0).with_complete(false);
        controller.on_partial_candle(&forming).await;

        assert_eq!(*strategy.partial.lock(), vec![4.0]);
        assert_eq!(controller.dataframe().len(), 2);
    }
}
