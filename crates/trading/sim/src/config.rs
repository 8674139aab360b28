//! Paper wallet configuration

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Initial balances and fee schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Quote currency used for valuation
    pub base_coin: String,
    /// Starting free balance per asset
    pub assets: FxHashMap<String, f64>,
    /// Fee rate for resting orders
    pub maker_fee: f64,
    /// Fee rate for market orders
    pub taker_fee: f64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self::new("USDT")
    }
}

impl WalletConfig {
    /// Empty wallet valued in `base_coin`, no fees
    pub fn new(base_coin: impl Into<String>) -> Self {
        Self {
            base_coin: base_coin.into(),
            assets: FxHashMap::default(),
            maker_fee: 0.0,
            taker_fee: 0.0,
        }
    }

    /// Add a starting balance
    #[must_use]
    pub fn with_asset(mut self, asset: &str, amount: f64) -> Self {
        *self.assets.entry(asset.to_uppercase()).or_default() += amount;
        self
    }

    /// Set maker and taker fee rates
    #[must_use]
    pub fn with_fees(mut self, maker_fee: f64, taker_fee: f64) -> Self {
        self.maker_fee = maker_fee;
        self.taker_fee = taker_fee;
        self
    }
}
