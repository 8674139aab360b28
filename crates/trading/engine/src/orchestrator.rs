//! Execution orchestrator
//!
//! Wires a [`Feeder`], a [`Broker`] and a [`Strategy`] together:
//! - one [`StrategyController`] per configured pair
//! - candles routed by a [`FeedRouter`]
//! - in backtests every pair sinks into one [`EventSequencer`] which is
//!   drained in timestamp order after the finite feeds have ended
//! - live and paper modes consume one channel per pair in its own task
//!
//! Every candle takes the same path: paper wallet, partial-candle callback,
//! then for closed candles the strategy and the order controller.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::order_controller::OrderController;
use crate::strategy::{Strategy, StrategyController};
use bus::EventSequencer;
use common::{Broker, Candle, Feeder};
use feeds::{CandleSink, FeedRouter};
use rustc_hash::FxHashMap;
use sim::PaperWallet;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{Span, debug, info, warn};

/// Candle processing shared by backtest drain and live pair tasks
#[derive(Clone)]
struct Pipeline {
    wallet: Option<Arc<PaperWallet>>,
    orders: Arc<OrderController>,
}

impl Pipeline {
    async fn process(&self, controller: &mut StrategyController, candle: &Candle) {
        if let Some(wallet) = &self.wallet {
            wallet.on_candle(candle);
        }
        controller.on_partial_candle(candle).await;
        if candle.complete {
            controller.on_candle(candle).await;
            self.orders.on_candle(candle).await;
        }
    }
}

/// Strategy execution engine
pub struct Engine {
    config: EngineConfig,
    feeder: Arc<dyn Feeder>,
    strategy: Arc<dyn Strategy>,
    pipeline: Pipeline,
    router: FeedRouter,
    span: Span,
}

impl Engine {
    /// Create an engine
    ///
    /// # Errors
    /// Returns [`EngineError::Config`] if the configuration is invalid.
    pub fn new(
        config: EngineConfig,
        feeder: Arc<dyn Feeder>,
        broker: Arc<dyn Broker>,
        strategy: Arc<dyn Strategy>,
        span: Span,
    ) -> EngineResult<Self> {
        config.validate()?;
        let router = FeedRouter::new(Arc::clone(&feeder), config.feed.clone(), span.clone());
        let orders = Arc::new(OrderController::new(broker, span.clone()));
        info!(parent: &span, mode = %config.mode, pairs = ?config.pairs, "engine created");
        Ok(Self {
            config,
            feeder,
            strategy,
            pipeline: Pipeline {
                wallet: None,
                orders,
            },
            router,
            span,
        })
    }

    /// Feed every candle to a paper wallet before the strategy sees it
    #[must_use]
    pub fn with_paper_wallet(mut self, wallet: Arc<PaperWallet>) -> Self {
        self.pipeline.wallet = Some(wallet);
        self
    }

    /// Router, for extra subscribers registered before [`Engine::run`]
    pub const fn router(&self) -> &FeedRouter {
        &self.router
    }

    /// Order controller the strategy trades through
    pub const fn orders(&self) -> &Arc<OrderController> {
        &self.pipeline.orders
    }

    /// Attached paper wallet
    pub const fn wallet(&self) -> Option<&Arc<PaperWallet>> {
        self.pipeline.wallet.as_ref()
    }

    /// Configuration in use
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run until the feeds end (backtest) or `shutdown` fires (live, paper)
    ///
    /// # Errors
    /// Returns an error if warm-up history cannot be fetched or a feed
    /// cannot be connected.
    pub async fn run(&self, shutdown: &broadcast::Sender<()>) -> EngineResult<()> {
        let timeframe = self.strategy.timeframe();
        let backtest = self.config.mode.is_backtest();
        let sequencer = Arc::new(EventSequencer::new());
        let mut controllers: FxHashMap<String, StrategyController> = FxHashMap::default();
        let mut channels = Vec::new();

        for pair in &self.config.pairs {
            let mut controller = StrategyController::new(
                pair,
                Arc::clone(&self.strategy),
                Arc::clone(&self.pipeline.orders) as Arc<dyn Broker>,
                self.span.clone(),
            );

            if !backtest {
                self.warm_up(pair, &mut controller).await?;
            }

            let sink = if backtest {
                CandleSink::Sequencer(Arc::clone(&sequencer))
            } else {
                let (tx, rx) = mpsc::unbounded_channel();
                channels.push((pair.clone(), rx));
                CandleSink::Channel(tx)
            };
            self.router.subscribe(pair, timeframe, sink, false);
            controller.start();
            controllers.insert(pair.clone(), controller);
        }

        if backtest {
            self.router.connect(shutdown).await?;
            self.router.start(shutdown, true).await;
            self.drain(&sequencer, &mut controllers).await;
            return Ok(());
        }

        self.router.connect(shutdown).await?;
        let refresher = self
            .pipeline
            .orders
            .start(self.config.order_refresh(), shutdown);

        let tasks: Vec<JoinHandle<()>> = channels
            .into_iter()
            .filter_map(|(pair, rx)| {
                let controller = controllers.remove(&pair)?;
                Some(tokio::spawn(consume(
                    controller,
                    rx,
                    self.pipeline.clone(),
                    shutdown.subscribe(),
                    self.span.clone(),
                )))
            })
            .collect();
        self.router.start(shutdown, false).await;

        for task in tasks {
            if let Err(e) = task.await {
                warn!(parent: &self.span, error = %e, "pair task failed");
            }
        }
        self.router.wait().await;
        if let Err(e) = refresher.await {
            warn!(parent: &self.span, error = %e, "order refresh task failed");
        }
        info!(parent: &self.span, "engine stopped");
        Ok(())
    }

    async fn warm_up(&self, pair: &str, controller: &mut StrategyController) -> EngineResult<()> {
        let timeframe = self.strategy.timeframe();
        let candles = self
            .feeder
            .candles_by_limit(pair, timeframe, self.strategy.warmup_period())
            .await
            .map_err(|source| EngineError::Warmup {
                pair: pair.to_string(),
                source,
            })?;
        for candle in &candles {
            self.pipeline.process(controller, candle).await;
        }
        self.router.preload(pair, timeframe, &candles);
        info!(parent: &self.span, pair, candles = candles.len(), "warm-up complete");
        Ok(())
    }

    async fn drain(
        &self,
        sequencer: &EventSequencer<Candle>,
        controllers: &mut FxHashMap<String, StrategyController>,
    ) {
        let pause = self.config.drain_pause();
        let mut processed = 0usize;
        while let Some(candle) = sequencer.pop() {
            match controllers.get_mut(&candle.pair) {
                Some(controller) => self.pipeline.process(controller, &candle).await,
                None => debug!(parent: &self.span, pair = %candle.pair, "candle for unknown pair"),
            }
            processed += 1;
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }
        info!(parent: &self.span, candles = processed, "backtest finished");
    }
}

async fn consume(
    mut controller: StrategyController,
    mut candles: mpsc::UnboundedReceiver<Candle>,
    pipeline: Pipeline,
    mut shutdown: broadcast::Receiver<()>,
    span: Span,
) {
    let pair = controller.dataframe().pair.clone();
    debug!(parent: &span, %pair, "pair task running");
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            candle = candles.recv() => match candle {
                Some(candle) => pipeline.process(&mut controller, &candle).await,
                None => break,
            },
        }
    }
    debug!(parent: &span, %pair, bars = controller.dataframe().len(), "pair task stopped");
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("paper_wallet", &self.pipeline.wallet.is_some())
            .finish()
    }
}
