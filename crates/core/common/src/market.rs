//! Market identities and account snapshots

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Quote currencies recognised when splitting concatenated symbols
const KNOWN_QUOTES: [&str; 12] = [
    "FDUSD", "USDT", "BUSD", "USDC", "TUSD", "DAI", "USD", "EUR", "TRY", "BTC", "ETH", "BNB",
];

/// Split a pair into `(asset, quote)`
///
/// Accepts `BTC/USDT`, `BTC-USDT` and concatenated `BTCUSDT`; the longest
/// known quote suffix wins for the concatenated form.
#[must_use]
pub fn split_asset_quote(pair: &str) -> Option<(String, String)> {
    let pair = pair.trim().to_uppercase();
    if let Some((asset, quote)) = pair.split_once(['/', '-']) {
        if asset.is_empty() || quote.is_empty() {
            return None;
        }
        return Some((asset.to_string(), quote.to_string()));
    }

    KNOWN_QUOTES
        .iter()
        .filter(|quote| pair.len() > quote.len() && pair.ends_with(*quote))
        .max_by_key(|quote| quote.len())
        .map(|quote| {
            let asset = &pair[..pair.len() - quote.len()];
            (asset.to_string(), (*quote).to_string())
        })
}

/// Candle interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Timeframe {
    /// 1 minute
    M1,
    /// 3 minutes
    M3,
    /// 5 minutes
    M5,
    /// 15 minutes
    M15,
    /// 30 minutes
    M30,
    /// 1 hour
    H1,
    /// 2 hours
    H2,
    /// 4 hours
    H4,
    /// 6 hours
    H6,
    /// 12 hours
    H12,
    /// 1 day
    D1,
    /// 1 week
    W1,
}

impl Timeframe {
    const TABLE: [(Self, &'static str, u64); 12] = [
        (Self::M1, "1m", 60),
        (Self::M3, "3m", 180),
        (Self::M5, "5m", 300),
        (Self::M15, "15m", 900),
        (Self::M30, "30m", 1_800),
        (Self::H1, "1h", 3_600),
        (Self::H2, "2h", 7_200),
        (Self::H4, "4h", 14_400),
        (Self::H6, "6h", 21_600),
        (Self::H12, "12h", 43_200),
        (Self::D1, "1d", 86_400),
        (Self::W1, "1w", 604_800),
    ];

    fn entry(self) -> (Self, &'static str, u64) {
        Self::TABLE
            .into_iter()
            .find(|(tf, _, _)| *tf == self)
            .unwrap_or((Self::M1, "1m", 60))
    }

    /// Exchange-style name, e.g. `1h`
    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.entry().1
    }

    /// Bar length
    #[must_use]
    pub fn duration(self) -> Duration {
        Duration::from_secs(self.entry().2)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::TABLE
            .into_iter()
            .find(|(_, name, _)| *name == s.trim())
            .map(|(tf, _, _)| tf)
            .ok_or_else(|| format!("unknown timeframe: {s}"))
    }
}

impl TryFrom<String> for Timeframe {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(value: Timeframe) -> Self {
        value.as_str().to_string()
    }
}

/// Identity of one logical candle channel
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FeedKey {
    /// Trading pair
    pub pair: String,
    /// Candle interval
    pub timeframe: Timeframe,
}

impl FeedKey {
    /// Create a key
    #[must_use]
    pub fn new(pair: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            pair: pair.into(),
            timeframe,
        }
    }
}

impl fmt::Display for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}--{}", self.pair, self.timeframe)
    }
}

/// Free and locked quantity of one asset
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetBalance {
    /// Available quantity; negative for a short position
    pub free: f64,
    /// Quantity reserved by resting orders
    pub lock: f64,
}

impl AssetBalance {
    /// Free plus locked
    #[must_use]
    pub fn total(&self) -> f64 {
        self.free + self.lock
    }
}

/// Named balance in an account snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    /// Asset symbol
    pub asset: String,
    /// Available quantity
    pub free: f64,
    /// Reserved quantity
    pub lock: f64,
}

/// Account snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Balances per asset
    pub balances: Vec<Balance>,
}

impl Account {
    /// Balances of an asset and its quote, zero when absent
    #[must_use]
    pub fn balance(&self, asset: &str, quote: &str) -> (Balance, Balance) {
        let find = |name: &str| {
            self.balances
                .iter()
                .find(|balance| balance.asset == name)
                .cloned()
                .unwrap_or_else(|| Balance {
                    asset: name.to_string(),
                    free: 0.0,
                    lock: 0.0,
                })
        };
        (find(asset), find(quote))
    }
}

/// Totals held for one pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Asset quantity (free + lock); negative when short
    pub asset: f64,
    /// Quote quantity (free + lock)
    pub quote: f64,
}

/// Trading limits for a pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetInfo {
    /// Base asset
    pub base_asset: String,
    /// Quote asset
    pub quote_asset: String,
    /// Smallest order quantity
    pub min_quantity: f64,
    /// Largest order quantity
    pub max_quantity: f64,
    /// Smallest price
    pub min_price: f64,
    /// Largest price
    pub max_price: f64,
    /// Quantity increment
    pub step_size: f64,
    /// Price increment
    pub tick_size: f64,
    /// Quote precision in decimals
    pub quote_precision: u32,
    /// Base precision in decimals
    pub base_asset_precision: u32,
}

impl AssetInfo {
    /// Permissive limits used by simulated venues
    #[must_use]
    pub fn unrestricted(base_asset: impl Into<String>, quote_asset: impl Into<String>) -> Self {
        Self {
            base_asset: base_asset.into(),
            quote_asset: quote_asset.into(),
            min_quantity: 0.0,
            max_quantity: f64::MAX,
            min_price: 0.0,
            max_price: f64::MAX,
            step_size: 0.000_000_01,
            tick_size: 0.000_000_01,
            quote_precision: 8,
            base_asset_precision: 8,
        }
    }
}
