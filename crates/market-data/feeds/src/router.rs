//! Fan-out of upstream candle streams to registered subscribers
//!
//! The router keeps an explicit subscriber table keyed by [`FeedKey`]. Each
//! record carries its id, its filter (`closed_only`) and its sink. Upstream
//! subscriptions are opened lazily in [`FeedRouter::connect`], one per key
//! that has at least one subscriber, and consumed by one task per key in
//! [`FeedRouter::start`].

use crate::retry::{RetryConfig, retry_with_backoff};
use bus::EventSequencer;
use common::{Candle, CandleSubscription, FeedKey, FeedResult, Feeder, Timeframe};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{Span, debug, info, trace, warn};

/// Handle returned by [`FeedRouter::subscribe`]
pub type SubscriberId = u64;

/// Router configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedRouterConfig {
    /// Backoff policy for opening upstream subscriptions
    pub retry: RetryConfig,
}

/// Destination of routed candles
#[derive(Clone)]
pub enum CandleSink {
    /// Unbounded channel owned by a consumer task
    Channel(mpsc::UnboundedSender<Candle>),
    /// Shared ordering queue (backtests)
    Sequencer(Arc<EventSequencer<Candle>>),
}

impl CandleSink {
    fn deliver(&self, candle: Candle) -> bool {
        match self {
            Self::Channel(tx) => tx.send(candle).is_ok(),
            Self::Sequencer(queue) => {
                queue.push(candle);
                true
            }
        }
    }
}

impl fmt::Debug for CandleSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Channel(_) => f.write_str("CandleSink::Channel"),
            Self::Sequencer(queue) => write!(f, "CandleSink::Sequencer(len={})", queue.len()),
        }
    }
}

#[derive(Debug, Clone)]
struct Subscriber {
    id: SubscriberId,
    closed_only: bool,
    sink: CandleSink,
}

impl Subscriber {
    fn accepts(&self, candle: &Candle) -> bool {
        candle.complete || !self.closed_only
    }
}

type SubscriberTable = Arc<RwLock<FxHashMap<FeedKey, Vec<Subscriber>>>>;

/// Routes candle streams from a [`Feeder`] to subscribers
pub struct FeedRouter {
    feeder: Arc<dyn Feeder>,
    config: FeedRouterConfig,
    subscribers: SubscriberTable,
    connected: Mutex<Vec<(FeedKey, CandleSubscription)>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    next_id: AtomicU64,
    span: Span,
}

impl FeedRouter {
    /// Create a router over a data source
    pub fn new(feeder: Arc<dyn Feeder>, config: FeedRouterConfig, span: Span) -> Self {
        Self {
            feeder,
            config,
            subscribers: Arc::new(RwLock::new(FxHashMap::default())),
            connected: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            span,
        }
    }

    /// Register a subscriber for `(pair, timeframe)`
    ///
    /// Subscribers of one key receive candles in registration order. With
    /// `closed_only` set, forming (incomplete) candles are skipped.
    pub fn subscribe(
        &self,
        pair: &str,
        timeframe: Timeframe,
        sink: CandleSink,
        closed_only: bool,
    ) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let key = FeedKey::new(pair, timeframe);
        debug!(parent: &self.span, feed = %key, id, closed_only, ?sink, "subscriber registered");
        self.subscribers
            .write()
            .entry(key)
            .or_default()
            .push(Subscriber {
                id,
                closed_only,
                sink,
            });
        id
    }

    /// Remove a subscriber; `false` if the id is unknown
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut table = self.subscribers.write();
        let mut removed = false;
        for subscribers in table.values_mut() {
            let before = subscribers.len();
            subscribers.retain(|s| s.id != id);
            removed |= subscribers.len() != before;
        }
        table.retain(|_, subscribers| !subscribers.is_empty());
        if removed {
            debug!(parent: &self.span, id, "subscriber removed");
        }
        removed
    }

    /// Keys with at least one subscriber, sorted
    pub fn feeds(&self) -> Vec<FeedKey> {
        let mut keys: Vec<FeedKey> = self.subscribers.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Deliver historical closed candles to the current subscribers of a key
    pub fn preload(&self, pair: &str, timeframe: Timeframe, candles: &[Candle]) {
        let key = FeedKey::new(pair, timeframe);
        for candle in candles {
            dispatch(&self.subscribers, &key, candle, &self.span);
        }
        debug!(parent: &self.span, feed = %key, count = candles.len(), "preloaded candles");
    }

    /// Open one upstream subscription per subscribed key
    ///
    /// Only the initial subscription is retried. Reconnecting a stream that
    /// drops later belongs to the feeder; the router logs errors from the
    /// error channel and ends a feed once its candle channel closes.
    ///
    /// # Errors
    /// Returns the last upstream error once retries for a key are exhausted.
    pub async fn connect(&self, shutdown: &broadcast::Sender<()>) -> FeedResult<()> {
        for key in self.feeds() {
            let label = key.to_string();
            let subscription = retry_with_backoff(&self.config.retry, &self.span, &label, || {
                let feeder = Arc::clone(&self.feeder);
                let pair = key.pair.clone();
                let timeframe = key.timeframe;
                let shutdown = shutdown.subscribe();
                async move { feeder.candles_subscription(&pair, timeframe, shutdown).await }
            })
            .await?;
            info!(parent: &self.span, feed = %key, "feed connected");
            self.connected.lock().push((key, subscription));
        }
        Ok(())
    }

    /// Spawn one task per connected feed
    ///
    /// With `blocking` the call returns once every feed has ended (finite
    /// historical feeds); otherwise it returns immediately and
    /// [`FeedRouter::wait`] joins the tasks later.
    pub async fn start(&self, shutdown: &broadcast::Sender<()>, blocking: bool) {
        let connected: Vec<_> = self.connected.lock().drain(..).collect();
        let handles: Vec<JoinHandle<()>> = connected
            .into_iter()
            .map(|(key, subscription)| {
                tokio::spawn(run_feed(
                    key,
                    subscription,
                    Arc::clone(&self.subscribers),
                    shutdown.subscribe(),
                    self.span.clone(),
                ))
            })
            .collect();
        info!(parent: &self.span, feeds = handles.len(), blocking, "feeds started");

        if blocking {
            join_all(handles, &self.span).await;
        } else {
            self.tasks.lock().extend(handles);
        }
    }

    /// Wait for feed tasks spawned by a non-blocking [`FeedRouter::start`]
    pub async fn wait(&self) {
        let handles: Vec<_> = self.tasks.lock().drain(..).collect();
        join_all(handles, &self.span).await;
    }
}

async fn join_all(handles: Vec<JoinHandle<()>>, span: &Span) {
    for handle in handles {
        if let Err(e) = handle.await {
            warn!(parent: span, error = %e, "feed task failed");
        }
    }
}

fn dispatch(subscribers: &SubscriberTable, key: &FeedKey, candle: &Candle, span: &Span) {
    // Sinks are cloned out so no lock is held while delivering.
    let sinks: Vec<CandleSink> = subscribers
        .read()
        .get(key)
        .map(|subs| {
            subs.iter()
                .filter(|s| s.accepts(candle))
                .map(|s| s.sink.clone())
                .collect()
        })
        .unwrap_or_default();

    for sink in sinks {
        if !sink.deliver(candle.clone()) {
            trace!(parent: span, feed = %key, "subscriber channel closed");
        }
    }
}

async fn run_feed(
    key: FeedKey,
    mut subscription: CandleSubscription,
    subscribers: SubscriberTable,
    mut shutdown: broadcast::Receiver<()>,
    span: Span,
) {
    debug!(parent: &span, feed = %key, "feed task running");
    let mut errors_open = true;
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!(parent: &span, feed = %key, "feed task shutting down");
                break;
            }
            candle = subscription.candles.recv() => match candle {
                Some(candle) => dispatch(&subscribers, &key, &candle, &span),
                None => {
                    debug!(parent: &span, feed = %key, "feed ended");
                    break;
                }
            },
            error = subscription.errors.recv(), if errors_open => match error {
                Some(e) => warn!(parent: &span, feed = %key, error = %e, "feed error"),
                None => errors_open = false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::historical::{HistoricalFeed, HistoricalFeedConfig};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + minute * 60, 0)
            .single()
            .unwrap_or_default()
    }

    fn candle(pair: &str, minute: i64, complete: bool) -> Candle {
        Candle::new(pair, at(minute), 1.0, 2.0, 0.5, 1.5, 10.0).with_complete(complete)
    }

    fn router() -> FeedRouter {
        let feed = HistoricalFeed::new(HistoricalFeedConfig::default(), Span::none());
        FeedRouter::new(Arc::new(feed), FeedRouterConfig::default(), Span::none())
    }

    #[test]
    fn test_closed_only_filter_applies_to_preload() {
        let router = router();
        let (all_tx, mut all_rx) = mpsc::unbounded_channel();
        let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
        router.subscribe("BTCUSDT", Timeframe::M1, CandleSink::Channel(all_tx), false);
        router.subscribe("BTCUSDT", Timeframe::M1, CandleSink::Channel(closed_tx), true);

        let batch = [candle("BTCUSDT", 0, false), candle("BTCUSDT", 0, true)];
        router.preload("BTCUSDT", Timeframe::M1, &batch);

        assert_eq!(all_rx.try_recv().map(|c| c.complete).ok(), Some(false));
        assert_eq!(all_rx.try_recv().map(|c| c.complete).ok(), Some(true));
        assert_eq!(closed_rx.try_recv().map(|c| c.complete).ok(), Some(true));
        assert!(closed_rx.try_recv().is_err());
    }

    #[test]
    fn test_preload_ignores_other_keys() {
        let router = router();
        let (tx, mut rx) = mpsc::unbounded_channel();
        router.subscribe("BTCUSDT", Timeframe::M1, CandleSink::Channel(tx), false);

        router.preload("BTCUSDT", Timeframe::H1, &[candle("BTCUSDT", 0, true)]);
        router.preload("ETHUSDT", Timeframe::M1, &[candle("ETHUSDT", 0, true)]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unsubscribe_removes_only_that_subscriber() {
        let router = router();
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        let a = router.subscribe("BTCUSDT", Timeframe::M1, CandleSink::Channel(a_tx), false);
        router.subscribe("BTCUSDT", Timeframe::M1, CandleSink::Channel(b_tx), false);

        assert!(router.unsubscribe(a));
        assert!(!router.unsubscribe(a));
        router.preload("BTCUSDT", Timeframe::M1, &[candle("BTCUSDT", 0, true)]);

        assert!(a_rx.try_recv().is_err());
        assert!(b_rx.try_recv().is_ok());
    }

    #[test]
    fn test_feeds_lists_only_subscribed_keys() {
        let router = router();
        let queue = Arc::new(EventSequencer::new());
        router.subscribe("ETHUSDT", Timeframe::M5, CandleSink::Sequencer(Arc::clone(&queue)), true);
        router.subscribe("BTCUSDT", Timeframe::M1, CandleSink::Sequencer(Arc::clone(&queue)), true);
        router.subscribe("BTCUSDT", Timeframe::M1, CandleSink::Sequencer(queue), false);

        assert_eq!(
            router.feeds(),
            vec![
                FeedKey::new("BTCUSDT", Timeframe::M1),
                FeedKey::new("ETHUSDT", Timeframe::M5)
            ]
        );
    }
}
