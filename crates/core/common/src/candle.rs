//! OHLCV candles and their typed auxiliary metadata

use crate::error::MetadataError;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Known auxiliary signals a feed may attach to a candle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Volume expressed in the quote currency
    QuoteVolume,
    /// Number of trades in the bar
    Trades,
    /// Base volume bought by takers
    TakerBuyBaseVolume,
    /// Quote volume bought by takers
    TakerBuyQuoteVolume,
    /// Open interest at bar close (derivatives)
    OpenInterest,
    /// Funding rate at bar close (perpetuals)
    FundingRate,
}

impl Metric {
    /// All known metrics
    pub const ALL: [Self; 6] = [
        Self::QuoteVolume,
        Self::Trades,
        Self::TakerBuyBaseVolume,
        Self::TakerBuyQuoteVolume,
        Self::OpenInterest,
        Self::FundingRate,
    ];

    /// Canonical name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::QuoteVolume => "quote_volume",
            Self::Trades => "trades",
            Self::TakerBuyBaseVolume => "taker_buy_base_volume",
            Self::TakerBuyQuoteVolume => "taker_buy_quote_volume",
            Self::OpenInterest => "open_interest",
            Self::FundingRate => "funding_rate",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|metric| metric.as_str() == s)
            .ok_or_else(|| MetadataError::UnknownMetric {
                name: s.to_string(),
            })
    }
}

/// Typed metadata attached to a candle
///
/// Known signals live under [`Metric`]; anything else goes to the numeric
/// extension map. Both reject non-finite values on insert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandleMetadata {
    metrics: FxHashMap<Metric, f64>,
    extra: FxHashMap<String, f64>,
}

impl CandleMetadata {
    /// Set a known metric
    ///
    /// # Errors
    /// Returns an error if the value is NaN or infinite.
    pub fn set(&mut self, metric: Metric, value: f64) -> Result<(), MetadataError> {
        if !value.is_finite() {
            return Err(MetadataError::NonFinite {
                name: metric.to_string(),
                value,
            });
        }
        self.metrics.insert(metric, value);
        Ok(())
    }

    /// Set an extension value
    ///
    /// # Errors
    /// Returns an error if the name is empty, shadows a known [`Metric`], or
    /// the value is not finite.
    pub fn set_extra(&mut self, name: impl Into<String>, value: f64) -> Result<(), MetadataError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(MetadataError::EmptyName);
        }
        if Metric::from_str(&name).is_ok() {
            return Err(MetadataError::ReservedName { name });
        }
        if !value.is_finite() {
            return Err(MetadataError::NonFinite { name, value });
        }
        self.extra.insert(name, value);
        Ok(())
    }

    /// Get a known metric
    #[must_use]
    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.metrics.get(&metric).copied()
    }

    /// Get an extension value
    #[must_use]
    pub fn extra(&self, name: &str) -> Option<f64> {
        self.extra.get(name).copied()
    }

    /// Iterate over known metrics
    pub fn metrics(&self) -> impl Iterator<Item = (Metric, f64)> + '_ {
        self.metrics.iter().map(|(metric, value)| (*metric, *value))
    }

    /// Iterate over extension values
    pub fn extras(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.extra.iter().map(|(name, value)| (name.as_str(), *value))
    }

    /// No metadata at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty() && self.extra.is_empty()
    }
}

/// One OHLCV bar for a pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Trading pair, e.g. `BTCUSDT`
    pub pair: String,
    /// Bar open time
    pub time: DateTime<Utc>,
    /// Time of the last update of this bar
    pub updated_at: DateTime<Utc>,
    /// Open price
    pub open: f64,
    /// High price
    pub high: f64,
    /// Low price
    pub low: f64,
    /// Close (or last) price
    pub close: f64,
    /// Base volume
    pub volume: f64,
    /// Bar is closed; `false` while still forming
    pub complete: bool,
    /// Auxiliary signals
    #[serde(default)]
    pub metadata: CandleMetadata,
}

impl Candle {
    /// Create a closed candle
    #[must_use]
    pub fn new(
        pair: impl Into<String>,
        time: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            pair: pair.into(),
            time,
            updated_at: time,
            open,
            high,
            low,
            close,
            volume,
            complete: true,
            metadata: CandleMetadata::default(),
        }
    }

    /// Mark the candle as still forming (or closed)
    #[must_use]
    pub const fn with_complete(mut self, complete: bool) -> Self {
        self.complete = complete;
        self
    }

    /// Override the update time
    #[must_use]
    pub const fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = updated_at;
        self
    }

    /// Replay order: time, then update time, then pair name
    #[must_use]
    pub fn replay_cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.updated_at.cmp(&other.updated_at))
            .then_with(|| self.pair.cmp(&other.pair))
    }

    /// Strictly earlier in replay order
    #[must_use]
    pub fn precedes(&self, other: &Self) -> bool {
        self.replay_cmp(other) == Ordering::Less
    }
}
