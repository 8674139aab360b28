//! Per-pair candle history handed to strategies
//!
//! Columns are plain vectors indexed by bar. Candle metadata is exposed as
//! typed series under [`SeriesKey::Metric`]; strategies add their own under
//! [`SeriesKey::Indicator`]. Metric series stay aligned with the frame and
//! hold `NaN` for bars that did not carry the metric.

use crate::error::DataFrameError;
use chrono::{DateTime, Utc};
use common::{Candle, Metric};
use rustc_hash::FxHashMap;
use std::fmt;

/// Name of a derived series
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SeriesKey {
    /// Auxiliary signal carried by the candles
    Metric(Metric),
    /// Strategy-computed indicator
    Indicator(String),
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Metric(metric) => write!(f, "{metric}"),
            Self::Indicator(name) => f.write_str(name),
        }
    }
}

/// Closed-bar history of one pair
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataFrame {
    /// Trading pair
    pub pair: String,
    /// Bar open times
    pub time: Vec<DateTime<Utc>>,
    /// Open prices
    pub open: Vec<f64>,
    /// High prices
    pub high: Vec<f64>,
    /// Low prices
    pub low: Vec<f64>,
    /// Close prices
    pub close: Vec<f64>,
    /// Volumes
    pub volume: Vec<f64>,
    /// Update time of the latest bar
    pub last_update: Option<DateTime<Utc>>,
    series: FxHashMap<SeriesKey, Vec<f64>>,
}

impl DataFrame {
    /// Empty frame for a pair
    pub fn new(pair: impl Into<String>) -> Self {
        Self {
            pair: pair.into(),
            ..Self::default()
        }
    }

    /// Number of bars
    #[must_use]
    pub fn len(&self) -> usize {
        self.close.len()
    }

    /// No bars yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }

    /// Latest close
    #[must_use]
    pub fn last_close(&self) -> Option<f64> {
        self.close.last().copied()
    }

    /// Append a bar, or overwrite the latest one if it has the same open time
    pub fn push(&mut self, candle: &Candle) {
        if self.time.last() == Some(&candle.time) {
            self.replace_last(candle);
            return;
        }

        self.time.push(candle.time);
        self.open.push(candle.open);
        self.high.push(candle.high);
        self.low.push(candle.low);
        self.close.push(candle.close);
        self.volume.push(candle.volume);
        self.last_update = Some(candle.updated_at);

        let len = self.len();
        for metric in Metric::ALL {
            let value = candle.metadata.get(metric);
            let key = SeriesKey::Metric(metric);
            if value.is_none() && !self.series.contains_key(&key) {
                continue;
            }
            let series = self.series.entry(key).or_default();
            series.resize(len - 1, f64::NAN);
            series.push(value.unwrap_or(f64::NAN));
        }
    }

    fn replace_last(&mut self, candle: &Candle) {
        let Some(index) = self.len().checked_sub(1) else {
            return;
        };
        self.open[index] = candle.open;
        self.high[index] = candle.high;
        self.low[index] = candle.low;
        self.close[index] = candle.close;
        self.volume[index] = candle.volume;
        self.last_update = Some(candle.updated_at);

        let len = self.len();
        for metric in Metric::ALL {
            if let Some(value) = candle.metadata.get(metric) {
                let series = self.series.entry(SeriesKey::Metric(metric)).or_default();
                series.resize(len, f64::NAN);
                series[index] = value;
            }
        }
    }

    /// Copy of the frame with a forming candle applied
    ///
    /// Indicator series keep the values computed on the last closed frame.
    #[must_use]
    pub fn with_partial(&self, candle: &Candle) -> Self {
        let mut frame = self.clone();
        frame.push(candle);
        frame
    }

    /// Any series by key
    #[must_use]
    pub fn series(&self, key: &SeriesKey) -> Option<&[f64]> {
        self.series.get(key).map(Vec::as_slice)
    }

    /// Series of a candle metric
    #[must_use]
    pub fn metric(&self, metric: Metric) -> Option<&[f64]> {
        self.series(&SeriesKey::Metric(metric))
    }

    /// Series of a strategy indicator
    #[must_use]
    pub fn indicator(&self, name: &str) -> Option<&[f64]> {
        self.series(&SeriesKey::Indicator(name.to_string()))
    }

    /// Store an indicator series; it must have one value per bar
    ///
    /// # Errors
    /// Returns an error if the name is blank or the length differs from the frame.
    pub fn set_indicator(
        &mut self,
        name: impl Into<String>,
        values: Vec<f64>,
    ) -> Result<(), DataFrameError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DataFrameError::EmptyName);
        }
        if values.len() != self.len() {
            return Err(DataFrameError::LengthMismatch {
                name,
                expected: self.len(),
                actual: values.len(),
            });
        }
        self.series.insert(SeriesKey::Indicator(name), values);
        Ok(())
    }

    /// Keys of every stored series, sorted
    #[must_use]
    pub fn series_keys(&self) -> Vec<SeriesKey> {
        let mut keys: Vec<SeriesKey> = self.series.keys().cloned().collect();
        keys.sort();
        keys
    }
}
