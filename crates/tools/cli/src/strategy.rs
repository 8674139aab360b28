//! Moving average cross demo strategy

use async_trait::async_trait;
use common::{Broker, Side, Timeframe};
use engine::{DataFrame, DataFrameError, Strategy};
use tracing::{debug, warn};

const FAST: &str = "sma_fast";
const SLOW: &str = "sma_slow";

/// Simple moving average of `values`; `NaN` until `period` values are seen
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 {
        return vec![f64::NAN; values.len()];
    }
    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for (i, value) in values.iter().enumerate() {
        sum += value;
        if i >= period {
            sum -= values[i - period];
        }
        out.push(if i + 1 >= period {
            sum / period as f64
        } else {
            f64::NAN
        });
    }
    out
}

/// Goes all-in when the fast average crosses above the slow one and exits
/// on the opposite cross
#[derive(Debug, Clone)]
pub struct MovingAverageCross {
    timeframe: Timeframe,
    fast: usize,
    slow: usize,
}

impl MovingAverageCross {
    /// Strategy with the given periods
    ///
    /// # Errors
    /// Returns an error unless `0 < fast < slow`.
    pub fn new(timeframe: Timeframe, fast: usize, slow: usize) -> anyhow::Result<Self> {
        if fast == 0 || fast >= slow {
            anyhow::bail!("fast period {fast} must be positive and below slow period {slow}");
        }
        Ok(Self {
            timeframe,
            fast,
            slow,
        })
    }
}

fn last_two(series: Option<&[f64]>) -> Option<(f64, f64)> {
    match series? {
        [.., prev, last] if prev.is_finite() && last.is_finite() => Some((*prev, *last)),
        _ => None,
    }
}

#[async_trait]
impl Strategy for MovingAverageCross {
    fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    fn warmup_period(&self) -> usize {
        self.slow + 1
    }

    fn indicators(&self, dataframe: &mut DataFrame) -> Result<(), DataFrameError> {
        let fast = sma(&dataframe.close, self.fast);
        let slow = sma(&dataframe.close, self.slow);
        dataframe.set_indicator(FAST, fast)?;
        dataframe.set_indicator(SLOW, slow)
    }

    async fn on_candle(&self, dataframe: &DataFrame, broker: &dyn Broker) {
        let (Some((fast_prev, fast)), Some((slow_prev, slow))) = (
            last_two(dataframe.indicator(FAST)),
            last_two(dataframe.indicator(SLOW)),
        ) else {
            return;
        };
        let pair = dataframe.pair.as_str();
        let position = match broker.position(pair).await {
            Ok(position) => position,
            Err(e) => {
                warn!(pair, error = %e, "position lookup failed");
                return;
            }
        };

        let result = if fast_prev <= slow_prev && fast > slow && position.asset <= 0.0 {
            debug!(pair, fast, slow, "bullish cross");
            broker
                .create_order_market_quote(Side::Buy, pair, position.quote)
                .await
        } else if fast_prev >= slow_prev && fast < slow && position.asset > 0.0 {
            debug!(pair, fast, slow, "bearish cross");
            broker
                .create_order_market(Side::Sell, pair, position.asset)
                .await
        } else {
            return;
        };

        if let Err(e) = result {
            warn!(pair, error = %e, "order rejected");
        }
    }
}
