//! In-memory candle source for backtests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    AssetInfo, Candle, CandleSubscription, FeedError, FeedKey, FeedResult, Feeder, Timeframe,
    split_asset_quote,
};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{Span, debug};

/// Historical feed configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoricalFeedConfig {
    /// Buffer of each replay channel
    pub channel_capacity: usize,
}

impl Default for HistoricalFeedConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1_024,
        }
    }
}

/// Replays stored candles per `(pair, timeframe)`
pub struct HistoricalFeed {
    config: HistoricalFeedConfig,
    candles: FxHashMap<FeedKey, Vec<Candle>>,
    span: Span,
}

impl HistoricalFeed {
    /// Create an empty feed
    pub fn new(config: HistoricalFeedConfig, span: Span) -> Self {
        Self {
            config,
            candles: FxHashMap::default(),
            span,
        }
    }

    /// Builder form of [`HistoricalFeed::insert`]
    #[must_use]
    pub fn with_candles(mut self, pair: &str, timeframe: Timeframe, candles: Vec<Candle>) -> Self {
        self.insert(pair, timeframe, candles);
        self
    }

    /// Store candles for a key, replacing earlier data
    pub fn insert(&mut self, pair: &str, timeframe: Timeframe, mut candles: Vec<Candle>) {
        candles.sort_by(Candle::replay_cmp);
        let key = FeedKey::new(pair, timeframe);
        debug!(parent: &self.span, feed = %key, count = candles.len(), "historical candles stored");
        self.candles.insert(key, candles);
    }

    fn series(&self, pair: &str, timeframe: Timeframe) -> FeedResult<&[Candle]> {
        self.candles
            .get(&FeedKey::new(pair, timeframe))
            .map(Vec::as_slice)
            .ok_or_else(|| FeedError::NotAvailable {
                pair: pair.to_string(),
                timeframe: timeframe.to_string(),
            })
    }
}

#[async_trait]
impl Feeder for HistoricalFeed {
    fn assets_info(&self, pair: &str) -> FeedResult<AssetInfo> {
        let (asset, quote) = split_asset_quote(pair).ok_or_else(|| FeedError::Parse {
            message: format!("cannot split pair {pair}"),
        })?;
        Ok(AssetInfo::unrestricted(asset, quote))
    }

    async fn last_quote(&self, pair: &str) -> FeedResult<f64> {
        self.candles
            .iter()
            .filter(|(key, _)| key.pair == pair)
            .filter_map(|(_, candles)| candles.last())
            .max_by(|a, b| a.replay_cmp(b))
            .map(|candle| candle.close)
            .ok_or_else(|| FeedError::NotAvailable {
                pair: pair.to_string(),
                timeframe: "any".to_string(),
            })
    }

    async fn candles_by_period(
        &self,
        pair: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> FeedResult<Vec<Candle>> {
        Ok(self
            .series(pair, timeframe)?
            .iter()
            .filter(|c| c.time >= start && c.time <= end)
            .cloned()
            .collect())
    }

    async fn candles_by_limit(
        &self,
        pair: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> FeedResult<Vec<Candle>> {
        let series = self.series(pair, timeframe)?;
        let skip = series.len().saturating_sub(limit);
        Ok(series[skip..].to_vec())
    }

    async fn candles_subscription(
        &self,
        pair: &str,
        timeframe: Timeframe,
        mut shutdown: broadcast::Receiver<()>,
    ) -> FeedResult<CandleSubscription> {
        let candles = self.series(pair, timeframe)?.to_vec();
        let capacity = self.config.channel_capacity.max(1);
        let (candle_tx, candle_rx) = mpsc::channel(capacity);
        let (error_tx, error_rx) = mpsc::channel(1);
        let span = self.span.clone();
        let key = FeedKey::new(pair, timeframe);

        tokio::spawn(async move {
            // Keeps the error channel open until replay ends.
            let _errors = error_tx;
            let total = candles.len();
            let mut sent = 0usize;
            for candle in candles {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    result = candle_tx.send(candle) => {
                        if result.is_err() {
                            break;
                        }
                        sent += 1;
                    }
                }
            }
            debug!(parent: &span, feed = %key, sent, total, "historical replay finished");
        });

        Ok(CandleSubscription {
            candles: candle_rx,
            errors: error_rx,
        })
    }
}
