//! CSV candle loader
//!
//! Expected header: `time,open,close,low,high,volume` with `time` in unix
//! seconds. Extra columns are ignored.

use chrono::{TimeZone, Utc};
use common::{Candle, FeedError, FeedResult};
use serde::Deserialize;
use std::path::Path;

/// One row of a candle file
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CandleRecord {
    /// Bar open time, unix seconds
    pub time: i64,
    /// Open price
    pub open: f64,
    /// Close price
    pub close: f64,
    /// Low price
    pub low: f64,
    /// High price
    pub high: f64,
    /// Base volume
    pub volume: f64,
}

impl CandleRecord {
    /// Normalize into a closed candle
    ///
    /// # Errors
    /// Returns [`FeedError::Parse`] for out-of-range timestamps or non-finite
    /// prices.
    pub fn into_candle(self, pair: &str) -> FeedResult<Candle> {
        let time = Utc
            .timestamp_opt(self.time, 0)
            .single()
            .ok_or_else(|| FeedError::Parse {
                message: format!("invalid timestamp {}", self.time),
            })?;

        let values = [self.open, self.close, self.low, self.high, self.volume];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(FeedError::Parse {
                message: format!("non-finite value in row at {}", self.time),
            });
        }

        Ok(Candle::new(
            pair,
            time,
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume,
        ))
    }
}

/// Load every row of a candle file, sorted by time
///
/// # Errors
/// Returns [`FeedError::Parse`] if the file cannot be read or a row is
/// malformed.
pub fn load_candles(path: impl AsRef<Path>, pair: &str) -> FeedResult<Vec<Candle>> {
    let path = path.as_ref();
    let mut reader = ::csv::ReaderBuilder::new()
        .trim(::csv::Trim::All)
        .from_path(path)
        .map_err(|e| FeedError::Parse {
            message: format!("{}: {e}", path.display()),
        })?;

    let mut candles = reader
        .deserialize::<CandleRecord>()
        .map(|row| {
            row.map_err(|e| FeedError::Parse {
                message: format!("{}: {e}", path.display()),
            })
            .and_then(|record| record.into_candle(pair))
        })
        .collect::<FeedResult<Vec<_>>>()?;

    candles.sort_by_key(|c| c.time);
    Ok(candles)
}
