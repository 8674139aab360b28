//! Maximum drawdown of an equity series

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamped value of one asset or of the whole wallet
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AssetValue {
    /// Candle time the value was marked at
    pub time: DateTime<Utc>,
    /// Value in the base coin
    pub value: f64,
}

/// Worst peak-to-trough decline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Drawdown {
    /// Decline as a negative fraction of the starting value
    pub value: f64,
    /// Time of the value the decline started from
    pub start: DateTime<Utc>,
    /// Time of the trough
    pub end: DateTime<Utc>,
}

/// Single pass over the series tracking the current excursion and the worst one
///
/// A local excursion restarts whenever it turns positive; otherwise each step
/// extends it. `None` for fewer than two points or a series with no decline.
#[must_use]
pub fn max_drawdown(series: &[AssetValue]) -> Option<Drawdown> {
    let first = series.first()?;

    let mut local = f64::MAX;
    let mut local_base = first.value;
    let mut local_start = first.time;
    let mut local_end = first.time;

    let mut global = f64::MAX;
    let mut global_base = local_base;
    let mut global_start = local_start;
    let mut global_end = local_end;

    for window in series.windows(2) {
        let (prev, curr) = (window[0], window[1]);
        let diff = curr.value - prev.value;
        if local > 0.0 {
            local = diff;
            local_base = prev.value;
            local_start = prev.time;
        } else {
            local += diff;
        }
        local_end = curr.time;

        if local < global {
            global = local;
            global_base = local_base;
            global_start = local_start;
            global_end = local_end;
        }
    }

    if global >= 0.0 || global_base == 0.0 {
        return None;
    }
    Some(Drawdown {
        value: global / global_base,
        start: global_start,
        end: global_end,
    })
}
